//! Shared coordinator context
//!
//! All services and repository handles are built once at startup and handed
//! to handlers through `web::Data`; nothing hangs off process globals.

use std::sync::Arc;

use signage_gateway_core::config::ServiceConfig;
use signage_gateway_core::EventBus;

use crate::broadcast::BroadcastCoordinator;
use crate::catalog::CatalogService;
use crate::registry::DeviceRegistry;
use crate::repository::Repositories;
use crate::resolver::ContentResolver;
use crate::updates::UpdateCoordinator;

#[derive(Clone)]
pub struct CoordinatorContext {
    pub settings: ServiceConfig,
    pub events: EventBus,
    pub registry: Arc<DeviceRegistry>,
    pub catalog: Arc<CatalogService>,
    pub resolver: Arc<ContentResolver>,
    pub broadcasts: Arc<BroadcastCoordinator>,
    pub updates: Arc<UpdateCoordinator>,
}

impl CoordinatorContext {
    pub fn new(repos: Repositories, settings: ServiceConfig) -> Self {
        let events = EventBus::default();
        let registry = Arc::new(DeviceRegistry::new(
            repos.devices.clone(),
            repos.config.clone(),
            events.clone(),
            settings.offline_timeout,
        ));
        let catalog = Arc::new(CatalogService::new(repos.content.clone()));
        let resolver = Arc::new(ContentResolver::new(
            repos.broadcasts.clone(),
            repos.content.clone(),
        ));
        let broadcasts = Arc::new(BroadcastCoordinator::new(
            repos.broadcasts.clone(),
            repos.devices.clone(),
            repos.content.clone(),
            events.clone(),
        ));
        let updates = Arc::new(UpdateCoordinator::new(
            repos.updates.clone(),
            repos.devices.clone(),
            events.clone(),
        ));

        Self {
            settings,
            events,
            registry,
            catalog,
            resolver,
            broadcasts,
            updates,
        }
    }

    /// Context over in-memory stores, used by tests and dev runs
    pub fn in_memory(settings: ServiceConfig) -> Self {
        Self::new(Repositories::in_memory(), settings)
    }

    pub fn postgres(pool: sqlx::PgPool, settings: ServiceConfig) -> Self {
        Self::new(Repositories::postgres(pool), settings)
    }
}
