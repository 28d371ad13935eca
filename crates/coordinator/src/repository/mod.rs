//! Persistence traits for the coordinator
//!
//! Each entity family gets its own trait so services depend only on the
//! storage they touch. Two implementations ship: an in-memory store used by
//! tests and single-node dev runs, and PostgreSQL for production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use signage_gateway_core::models::{
    Assignment, BroadcastDelivery, BroadcastStatus, Device, DeviceConfigEntry, DeviceGroup,
    DeviceUpdate, EmergencyBroadcast, Playlist, PlaylistItem, ReportedContent, SystemUpdate, Video,
};
use signage_gateway_core::{ReleaseVersion, Result};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Fields a heartbeat is allowed to touch
#[derive(Debug, Clone)]
pub struct HeartbeatPatch {
    pub seen_at: DateTime<Utc>,
    pub current_content: Option<ReportedContent>,
    pub software_version: Option<ReleaseVersion>,
    pub ip_address: Option<String>,
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn insert_device(&self, device: Device) -> Result<()>;
    async fn get_device(&self, id: Uuid) -> Result<Option<Device>>;
    async fn find_by_serial(&self, serial: &str) -> Result<Option<Device>>;
    /// Non-deleted devices only
    async fn list_devices(&self) -> Result<Vec<Device>>;
    async fn list_by_group(&self, group_id: Uuid) -> Result<Vec<Device>>;
    /// Applies a heartbeat atomically with respect to other heartbeats for
    /// the same device. Returns false when the device does not exist.
    async fn apply_heartbeat(&self, id: Uuid, patch: HeartbeatPatch) -> Result<bool>;
    async fn rotate_credential(&self, id: Uuid, credential_hash: String) -> Result<()>;
    async fn soft_delete_device(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    async fn insert_group(&self, group: DeviceGroup) -> Result<()>;
    async fn get_group(&self, id: Uuid) -> Result<Option<DeviceGroup>>;
    async fn list_groups(&self) -> Result<Vec<DeviceGroup>>;
}

#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn insert_video(&self, video: Video) -> Result<()>;
    async fn get_video(&self, id: Uuid) -> Result<Option<Video>>;
    async fn list_videos(&self) -> Result<Vec<Video>>;

    async fn insert_playlist(&self, playlist: Playlist) -> Result<()>;
    async fn get_playlist(&self, id: Uuid) -> Result<Option<Playlist>>;
    async fn list_playlists(&self) -> Result<Vec<Playlist>>;
    /// Replaces the full item sequence; callers renumber before writing.
    async fn replace_playlist_items(
        &self,
        playlist_id: Uuid,
        items: Vec<PlaylistItem>,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;
    /// Items ordered by position
    async fn playlist_items(&self, playlist_id: Uuid) -> Result<Vec<PlaylistItem>>;

    /// A device holds at most one assignment; writing replaces any existing one.
    async fn upsert_assignment(&self, assignment: Assignment) -> Result<()>;
    async fn assignment_for_device(&self, device_id: Uuid) -> Result<Option<Assignment>>;
    async fn clear_assignment(&self, device_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait BroadcastRepository: Send + Sync {
    /// Persists the broadcast and its delivery snapshot in one atomic write.
    async fn create_broadcast(
        &self,
        broadcast: EmergencyBroadcast,
        deliveries: Vec<BroadcastDelivery>,
    ) -> Result<()>;
    async fn get_broadcast(&self, id: Uuid) -> Result<Option<EmergencyBroadcast>>;
    async fn list_with_status(&self, status: BroadcastStatus) -> Result<Vec<EmergencyBroadcast>>;
    /// Compare-and-set status transition. Returns false when the row was not
    /// in `from`, which callers treat as a lost race.
    async fn transition_status(
        &self,
        id: Uuid,
        from: BroadcastStatus,
        to: BroadcastStatus,
    ) -> Result<bool>;
    /// Active broadcasts whose delivery snapshot includes the device
    async fn active_for_device(&self, device_id: Uuid) -> Result<Vec<EmergencyBroadcast>>;
    async fn get_delivery(
        &self,
        broadcast_id: Uuid,
        device_id: Uuid,
    ) -> Result<Option<BroadcastDelivery>>;
    /// Sets acknowledged_at if unset; returns the stored row either way.
    async fn mark_acknowledged(
        &self,
        broadcast_id: Uuid,
        device_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<BroadcastDelivery>>;
    /// Sets displayed_at if unset; returns the stored row either way.
    async fn mark_displayed(
        &self,
        broadcast_id: Uuid,
        device_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<BroadcastDelivery>>;
}

#[async_trait]
pub trait UpdateRepository: Send + Sync {
    async fn insert_update(&self, update: SystemUpdate) -> Result<()>;
    async fn get_update(&self, id: Uuid) -> Result<Option<SystemUpdate>>;
    async fn list_updates(&self) -> Result<Vec<SystemUpdate>>;

    async fn insert_device_update(&self, row: DeviceUpdate) -> Result<()>;
    async fn get_device_update(
        &self,
        device_id: Uuid,
        update_id: Uuid,
    ) -> Result<Option<DeviceUpdate>>;
    async fn device_updates_for_device(&self, device_id: Uuid) -> Result<Vec<DeviceUpdate>>;
    /// Read-modify-write of one rollout row, serialized per (device, update)
    /// pair. The closure returns the replacement row or an error, which
    /// aborts the write.
    async fn with_device_update(
        &self,
        device_id: Uuid,
        update_id: Uuid,
        apply: Box<dyn FnOnce(Option<DeviceUpdate>) -> Result<DeviceUpdate> + Send>,
    ) -> Result<DeviceUpdate>;
}

#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn upsert_entry(&self, device_id: Uuid, entry: DeviceConfigEntry) -> Result<()>;
    /// Entries sorted by key
    async fn entries_for_device(&self, device_id: Uuid) -> Result<Vec<DeviceConfigEntry>>;
}

/// Bundle of repository handles wired into the service context
#[derive(Clone)]
pub struct Repositories {
    pub devices: Arc<dyn DeviceRepository>,
    pub content: Arc<dyn ContentRepository>,
    pub broadcasts: Arc<dyn BroadcastRepository>,
    pub updates: Arc<dyn UpdateRepository>,
    pub config: Arc<dyn ConfigRepository>,
}

impl Repositories {
    /// In-memory stores, used by tests and dev runs without PostgreSQL
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            devices: store.clone(),
            content: store.clone(),
            broadcasts: store.clone(),
            updates: store.clone(),
            config: store,
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(PostgresStore::new(pool));
        Self {
            devices: store.clone(),
            content: store.clone(),
            broadcasts: store.clone(),
            updates: store.clone(),
            config: store,
        }
    }
}
