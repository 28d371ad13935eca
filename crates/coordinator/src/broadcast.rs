//! Emergency broadcast lifecycle and fan-out
//!
//! The target set is expanded to concrete devices at creation time and
//! written as delivery rows in the same transaction as the broadcast itself.
//! Devices registered later are never retroactively targeted; re-creating the
//! broadcast is the way to reach them.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use signage_gateway_core::models::{
    AcknowledgeResponse, BroadcastContent, BroadcastDelivery, BroadcastStatus, BroadcastTarget,
    CreateBroadcastRequest, CreateBroadcastResponse, EmergencyBroadcast, MAX_BROADCAST_PRIORITY,
    MIN_BROADCAST_PRIORITY,
};
use signage_gateway_core::{EventBus, GatewayEvent, Result, SignageError};

use crate::catalog::CatalogService;
use crate::repository::{BroadcastRepository, ContentRepository, DeviceRepository};

pub struct BroadcastCoordinator {
    broadcasts: Arc<dyn BroadcastRepository>,
    devices: Arc<dyn DeviceRepository>,
    content: Arc<dyn ContentRepository>,
    events: EventBus,
}

impl BroadcastCoordinator {
    pub fn new(
        broadcasts: Arc<dyn BroadcastRepository>,
        devices: Arc<dyn DeviceRepository>,
        content: Arc<dyn ContentRepository>,
        events: EventBus,
    ) -> Self {
        Self {
            broadcasts,
            devices,
            content,
            events,
        }
    }

    pub async fn create(&self, request: CreateBroadcastRequest) -> Result<CreateBroadcastResponse> {
        if request.title.trim().is_empty() {
            return Err(SignageError::Validation("title must not be empty".into()));
        }
        if !(MIN_BROADCAST_PRIORITY..=MAX_BROADCAST_PRIORITY).contains(&request.priority) {
            return Err(SignageError::Validation(format!(
                "priority must be between {} and {}",
                MIN_BROADCAST_PRIORITY, MAX_BROADCAST_PRIORITY
            )));
        }
        if let Some(video_id) = request.video_id {
            if self.content.get_video(video_id).await?.is_none() {
                return Err(SignageError::NotFound(format!("video {}", video_id)));
            }
        }

        let now = Utc::now();
        let device_ids = self.expand_target(&request.target).await?;
        if device_ids.is_empty() {
            return Err(SignageError::Validation(
                "broadcast target matches no devices".into(),
            ));
        }

        let status = match request.activate_at {
            Some(at) if at > now => BroadcastStatus::Pending,
            _ => BroadcastStatus::Active,
        };

        let broadcast = EmergencyBroadcast {
            id: Uuid::new_v4(),
            title: request.title,
            message: request.message,
            video_id: request.video_id,
            priority: request.priority,
            duration_secs: request.duration_secs,
            target: request.target,
            status,
            activate_at: request.activate_at,
            created_at: now,
        };
        let deliveries: Vec<BroadcastDelivery> = device_ids
            .iter()
            .map(|&device_id| BroadcastDelivery {
                broadcast_id: broadcast.id,
                device_id,
                acknowledged_at: None,
                displayed_at: None,
                created_at: now,
            })
            .collect();

        let broadcast_id = broadcast.id;
        let targeted_devices = deliveries.len();
        self.broadcasts.create_broadcast(broadcast, deliveries).await?;

        info!(
            broadcast_id = %broadcast_id,
            targeted = targeted_devices,
            status = status.as_str(),
            "emergency broadcast created"
        );
        if status == BroadcastStatus::Active {
            self.events
                .publish(GatewayEvent::BroadcastActivated { broadcast_id });
        }

        Ok(CreateBroadcastResponse {
            broadcast_id,
            targeted_devices,
        })
    }

    /// Cancel a pending or active broadcast. Terminal broadcasts reject the
    /// call rather than silently staying ended.
    pub async fn cancel(&self, broadcast_id: Uuid) -> Result<()> {
        let broadcast = self
            .broadcasts
            .get_broadcast(broadcast_id)
            .await?
            .ok_or_else(|| SignageError::NotFound(format!("broadcast {}", broadcast_id)))?;

        if broadcast.status.is_terminal() {
            return Err(SignageError::InvalidState(format!(
                "broadcast {} is already {}",
                broadcast_id,
                broadcast.status.as_str()
            )));
        }

        let transitioned = self
            .broadcasts
            .transition_status(broadcast_id, broadcast.status, BroadcastStatus::Cancelled)
            .await?;
        if !transitioned {
            // Lost a race with the sweeper or another cancel.
            return Err(SignageError::InvalidState(format!(
                "broadcast {} changed state concurrently",
                broadcast_id
            )));
        }

        info!(broadcast_id = %broadcast_id, "broadcast cancelled");
        self.events.publish(GatewayEvent::BroadcastEnded {
            broadcast_id,
            outcome: "cancelled".to_string(),
        });
        Ok(())
    }

    /// Device acknowledgment. Idempotent: the first timestamp sticks.
    pub async fn acknowledge(
        &self,
        broadcast_id: Uuid,
        device_id: Uuid,
    ) -> Result<AcknowledgeResponse> {
        let delivery = self
            .broadcasts
            .mark_acknowledged(broadcast_id, device_id, Utc::now())
            .await?
            .ok_or_else(|| {
                SignageError::NotFound(format!(
                    "broadcast {} does not target device {}",
                    broadcast_id, device_id
                ))
            })?;
        // mark_acknowledged always leaves a timestamp behind
        let acknowledged_at = delivery.acknowledged_at.unwrap_or_else(Utc::now);
        Ok(AcknowledgeResponse { acknowledged_at })
    }

    /// Device reports the override actually reached the screen.
    pub async fn mark_displayed(&self, broadcast_id: Uuid, device_id: Uuid) -> Result<()> {
        self.broadcasts
            .mark_displayed(broadcast_id, device_id, Utc::now())
            .await?
            .ok_or_else(|| {
                SignageError::NotFound(format!(
                    "broadcast {} does not target device {}",
                    broadcast_id, device_id
                ))
            })?;
        Ok(())
    }

    /// Active overrides for a device's emergency poll, strongest first
    pub async fn active_for_device(&self, device_id: Uuid) -> Result<Vec<BroadcastContent>> {
        let mut active = self.broadcasts.active_for_device(device_id).await?;
        active.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.created_at.cmp(&a.created_at))
        });

        let mut contents = Vec::with_capacity(active.len());
        for broadcast in active {
            let video = match broadcast.video_id {
                Some(video_id) => self
                    .content
                    .get_video(video_id)
                    .await?
                    .map(|v| CatalogService::descriptor(&v)),
                None => None,
            };
            contents.push(BroadcastContent {
                broadcast_id: broadcast.id,
                priority: broadcast.priority,
                title: broadcast.title,
                message: broadcast.message,
                video,
            });
        }
        Ok(contents)
    }

    pub async fn get(&self, broadcast_id: Uuid) -> Result<EmergencyBroadcast> {
        self.broadcasts
            .get_broadcast(broadcast_id)
            .await?
            .ok_or_else(|| SignageError::NotFound(format!("broadcast {}", broadcast_id)))
    }

    /// One pass of the lifecycle sweep: activate due pending broadcasts and
    /// expire active ones past their duration. Returns (activated, expired).
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let mut activated = 0;
        for broadcast in self.broadcasts.list_with_status(BroadcastStatus::Pending).await? {
            if broadcast.is_due_for_activation(now)
                && self
                    .broadcasts
                    .transition_status(broadcast.id, BroadcastStatus::Pending, BroadcastStatus::Active)
                    .await?
            {
                info!(broadcast_id = %broadcast.id, "broadcast activated");
                self.events.publish(GatewayEvent::BroadcastActivated {
                    broadcast_id: broadcast.id,
                });
                activated += 1;
            }
        }

        let mut expired = 0;
        for broadcast in self.broadcasts.list_with_status(BroadcastStatus::Active).await? {
            if broadcast.is_expired_at(now) {
                if self
                    .broadcasts
                    .transition_status(broadcast.id, BroadcastStatus::Active, BroadcastStatus::Expired)
                    .await?
                {
                    info!(broadcast_id = %broadcast.id, "broadcast expired");
                    self.events.publish(GatewayEvent::BroadcastEnded {
                        broadcast_id: broadcast.id,
                        outcome: "expired".to_string(),
                    });
                    expired += 1;
                } else {
                    warn!(broadcast_id = %broadcast.id, "expiry lost race, skipping");
                }
            }
        }
        Ok((activated, expired))
    }

    async fn expand_target(&self, target: &BroadcastTarget) -> Result<Vec<Uuid>> {
        match target {
            BroadcastTarget::AllDevices => Ok(self
                .devices
                .list_devices()
                .await?
                .into_iter()
                .map(|d| d.id)
                .collect()),
            BroadcastTarget::Group(group_id) => {
                if self.devices.get_group(*group_id).await?.is_none() {
                    return Err(SignageError::NotFound(format!("group {}", group_id)));
                }
                Ok(self
                    .devices
                    .list_by_group(*group_id)
                    .await?
                    .into_iter()
                    .map(|d| d.id)
                    .collect())
            }
            BroadcastTarget::Devices(ids) => {
                if ids.is_empty() {
                    return Err(SignageError::Validation(
                        "device target list must not be empty".into(),
                    ));
                }
                let mut resolved = Vec::with_capacity(ids.len());
                for &id in ids {
                    match self.devices.get_device(id).await? {
                        Some(device) if !device.is_deleted() => resolved.push(device.id),
                        _ => return Err(SignageError::NotFound(format!("device {}", id))),
                    }
                }
                Ok(resolved)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repositories;
    use signage_gateway_core::models::Device;
    use signage_gateway_core::ReleaseVersion;

    struct Fixture {
        repos: Repositories,
        coordinator: BroadcastCoordinator,
    }

    fn fixture() -> Fixture {
        let repos = Repositories::in_memory();
        let coordinator = BroadcastCoordinator::new(
            repos.broadcasts.clone(),
            repos.devices.clone(),
            repos.content.clone(),
            EventBus::default(),
        );
        Fixture { repos, coordinator }
    }

    async fn seed_device(repos: &Repositories, serial: &str, group_id: Option<Uuid>) -> Uuid {
        let device = Device {
            id: Uuid::new_v4(),
            name: serial.to_string(),
            serial: serial.to_string(),
            credential_hash: "hash".to_string(),
            ip_address: None,
            registered_at: Utc::now(),
            last_seen: None,
            current_content: None,
            software_version: ReleaseVersion::new(1, 0, 0),
            group_id,
            deleted_at: None,
        };
        let id = device.id;
        repos.devices.insert_device(device).await.unwrap();
        id
    }

    fn request(priority: u8, target: BroadcastTarget) -> CreateBroadcastRequest {
        CreateBroadcastRequest {
            title: "fire drill".to_string(),
            message: "leave calmly".to_string(),
            video_id: None,
            priority,
            duration_secs: Some(300),
            target,
            activate_at: None,
        }
    }

    #[tokio::test]
    async fn create_snapshots_current_fleet() {
        let f = fixture();
        let d1 = seed_device(&f.repos, "RPI-001", None).await;
        let d2 = seed_device(&f.repos, "RPI-002", None).await;

        let response = f
            .coordinator
            .create(request(5, BroadcastTarget::AllDevices))
            .await
            .unwrap();
        assert_eq!(response.targeted_devices, 2);

        // A device registered after creation is outside the snapshot.
        let late = seed_device(&f.repos, "RPI-003", None).await;
        assert!(f
            .repos
            .broadcasts
            .get_delivery(response.broadcast_id, late)
            .await
            .unwrap()
            .is_none());
        assert!(f
            .repos
            .broadcasts
            .get_delivery(response.broadcast_id, d1)
            .await
            .unwrap()
            .is_some());
        assert!(f
            .repos
            .broadcasts
            .get_delivery(response.broadcast_id, d2)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn group_target_only_reaches_members() {
        let f = fixture();
        let group = f
            .repos
            .devices
            .insert_group(signage_gateway_core::models::DeviceGroup {
                id: Uuid::new_v4(),
                name: "lobby".to_string(),
                description: None,
                created_at: Utc::now(),
            })
            .await;
        group.unwrap();
        let groups = f.repos.devices.list_groups().await.unwrap();
        let group_id = groups[0].id;

        let member = seed_device(&f.repos, "RPI-001", Some(group_id)).await;
        let _outsider = seed_device(&f.repos, "RPI-002", None).await;

        let response = f
            .coordinator
            .create(request(3, BroadcastTarget::Group(group_id)))
            .await
            .unwrap();
        assert_eq!(response.targeted_devices, 1);
        assert!(f
            .repos
            .broadcasts
            .get_delivery(response.broadcast_id, member)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn priority_out_of_range_rejected() {
        let f = fixture();
        seed_device(&f.repos, "RPI-001", None).await;

        for priority in [0u8, 6] {
            let err = f
                .coordinator
                .create(request(priority, BroadcastTarget::AllDevices))
                .await
                .unwrap_err();
            assert!(matches!(err, SignageError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn future_activation_starts_pending_and_sweep_activates() {
        let f = fixture();
        seed_device(&f.repos, "RPI-001", None).await;

        let mut req = request(4, BroadcastTarget::AllDevices);
        req.activate_at = Some(Utc::now() + chrono::Duration::minutes(5));
        let response = f.coordinator.create(req).await.unwrap();

        let broadcast = f.coordinator.get(response.broadcast_id).await.unwrap();
        assert_eq!(broadcast.status, BroadcastStatus::Pending);

        // Not due yet
        let (activated, _) = f.coordinator.sweep(Utc::now()).await.unwrap();
        assert_eq!(activated, 0);

        let (activated, _) = f
            .coordinator
            .sweep(Utc::now() + chrono::Duration::minutes(6))
            .await
            .unwrap();
        assert_eq!(activated, 1);
        let broadcast = f.coordinator.get(response.broadcast_id).await.unwrap();
        assert_eq!(broadcast.status, BroadcastStatus::Active);
    }

    #[tokio::test]
    async fn sweep_expires_past_duration() {
        let f = fixture();
        seed_device(&f.repos, "RPI-001", None).await;
        let response = f
            .coordinator
            .create(request(5, BroadcastTarget::AllDevices))
            .await
            .unwrap();

        let (_, expired) = f.coordinator.sweep(Utc::now()).await.unwrap();
        assert_eq!(expired, 0, "not expired inside its duration");

        let (_, expired) = f
            .coordinator
            .sweep(Utc::now() + chrono::Duration::seconds(301))
            .await
            .unwrap();
        assert_eq!(expired, 1);
        let broadcast = f.coordinator.get(response.broadcast_id).await.unwrap();
        assert_eq!(broadcast.status, BroadcastStatus::Expired);
    }

    #[tokio::test]
    async fn cancel_is_rejected_once_terminal() {
        let f = fixture();
        seed_device(&f.repos, "RPI-001", None).await;
        let response = f
            .coordinator
            .create(request(5, BroadcastTarget::AllDevices))
            .await
            .unwrap();

        f.coordinator.cancel(response.broadcast_id).await.unwrap();
        let err = f.coordinator.cancel(response.broadcast_id).await.unwrap_err();
        assert!(matches!(err, SignageError::InvalidState(_)));
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent_and_scoped_to_snapshot() {
        let f = fixture();
        let device = seed_device(&f.repos, "RPI-001", None).await;
        let response = f
            .coordinator
            .create(request(5, BroadcastTarget::AllDevices))
            .await
            .unwrap();

        let first = f
            .coordinator
            .acknowledge(response.broadcast_id, device)
            .await
            .unwrap();
        let second = f
            .coordinator
            .acknowledge(response.broadcast_id, device)
            .await
            .unwrap();
        assert_eq!(first.acknowledged_at, second.acknowledged_at);

        let stranger = Uuid::new_v4();
        let err = f
            .coordinator
            .acknowledge(response.broadcast_id, stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, SignageError::NotFound(_)));
    }

    #[tokio::test]
    async fn empty_device_target_rejected() {
        let f = fixture();
        let err = f
            .coordinator
            .create(request(3, BroadcastTarget::Devices(vec![])))
            .await
            .unwrap_err();
        assert!(matches!(err, SignageError::Validation(_)));
    }
}
