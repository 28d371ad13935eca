//! Device registry: registration, credential checks, heartbeats, presence
//!
//! Credentials are random tokens handed out exactly once; only their SHA-256
//! lands in storage. Re-registering a known serial rotates the credential,
//! which both recovers a device that lost its local state and locks out
//! anything still holding the old token.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use signage_gateway_core::models::{
    ConfigValue, Device, DeviceConfigEntry, DeviceConfigResponse, DeviceGroup, DeviceSummary,
    HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
};
use signage_gateway_core::{EventBus, GatewayEvent, ReleaseVersion, Result, SignageError};

use crate::repository::{ConfigRepository, DeviceRepository, HeartbeatPatch};

const CREDENTIAL_LENGTH: usize = 48;

pub struct DeviceRegistry {
    devices: Arc<dyn DeviceRepository>,
    config: Arc<dyn ConfigRepository>,
    events: EventBus,
    offline_timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(
        devices: Arc<dyn DeviceRepository>,
        config: Arc<dyn ConfigRepository>,
        events: EventBus,
        offline_timeout: Duration,
    ) -> Self {
        Self {
            devices,
            config,
            events,
            offline_timeout,
        }
    }

    /// Register a device, or rotate the credential of an existing serial.
    ///
    /// Both paths return a freshly generated credential; it is the only time
    /// the caller ever sees it in the clear.
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        if request.name.trim().is_empty() {
            return Err(SignageError::Validation("name must not be empty".into()));
        }
        if request.serial.trim().is_empty() {
            return Err(SignageError::Validation("serial must not be empty".into()));
        }

        let credential = generate_credential();
        let credential_hash = hash_credential(&credential);

        if let Some(existing) = self.devices.find_by_serial(&request.serial).await? {
            self.devices
                .rotate_credential(existing.id, credential_hash)
                .await?;
            warn!(
                device_id = %existing.id,
                serial = %request.serial,
                "re-registration rotated device credential"
            );
            return Ok(RegisterResponse {
                device_id: existing.id,
                credential,
            });
        }

        let device = Device {
            id: Uuid::new_v4(),
            name: request.name,
            serial: request.serial.clone(),
            credential_hash,
            ip_address: request.ip_address,
            registered_at: Utc::now(),
            last_seen: None,
            current_content: None,
            software_version: request
                .software_version
                .unwrap_or_else(|| ReleaseVersion::new(0, 0, 0)),
            group_id: None,
            deleted_at: None,
        };
        let device_id = device.id;
        self.devices.insert_device(device).await?;

        info!(device_id = %device_id, serial = %request.serial, "device registered");
        self.events.publish(GatewayEvent::DeviceRegistered {
            device_id,
            serial: request.serial,
        });

        Ok(RegisterResponse {
            device_id,
            credential,
        })
    }

    /// Resolve and authenticate a device from its id and presented credential.
    ///
    /// Deleted and unknown devices are indistinguishable to the caller.
    pub async fn authenticate(&self, device_id: Uuid, credential: &str) -> Result<Device> {
        let device = self
            .devices
            .get_device(device_id)
            .await?
            .filter(|d| !d.is_deleted())
            .ok_or_else(|| SignageError::NotFound(format!("device {}", device_id)))?;

        if device.credential_hash != hash_credential(credential) {
            return Err(SignageError::Unauthorized(
                "invalid device credential".into(),
            ));
        }
        Ok(device)
    }

    /// Record a heartbeat. Idempotent: replaying one only moves `last_seen`.
    pub async fn heartbeat(
        &self,
        device: &Device,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatResponse> {
        let now = Utc::now();
        let applied = self
            .devices
            .apply_heartbeat(
                device.id,
                HeartbeatPatch {
                    seen_at: now,
                    current_content: request.current_content,
                    software_version: request.software_version,
                    ip_address: request.ip_address,
                },
            )
            .await?;
        if !applied {
            return Err(SignageError::NotFound(format!("device {}", device.id)));
        }

        self.events.publish(GatewayEvent::DeviceHeartbeat {
            device_id: device.id,
            at: now,
        });
        Ok(HeartbeatResponse { server_time: now })
    }

    pub async fn get(&self, device_id: Uuid) -> Result<Device> {
        self.devices
            .get_device(device_id)
            .await?
            .filter(|d| !d.is_deleted())
            .ok_or_else(|| SignageError::NotFound(format!("device {}", device_id)))
    }

    /// Fleet listing with presence derived at call time
    pub async fn summaries(&self) -> Result<Vec<DeviceSummary>> {
        let now = Utc::now();
        let devices = self.devices.list_devices().await?;
        Ok(devices
            .into_iter()
            .map(|d| DeviceSummary {
                is_online: d.is_online(now, self.offline_timeout),
                id: d.id,
                name: d.name,
                serial: d.serial,
                last_seen: d.last_seen,
                current_content: d.current_content,
                software_version: d.software_version,
            })
            .collect())
    }

    pub async fn soft_delete(&self, device_id: Uuid) -> Result<()> {
        let deleted = self
            .devices
            .soft_delete_device(device_id, Utc::now())
            .await?;
        if !deleted {
            return Err(SignageError::NotFound(format!("device {}", device_id)));
        }
        info!(device_id = %device_id, "device soft-deleted");
        Ok(())
    }

    pub async fn set_config(&self, device_id: Uuid, key: String, value: ConfigValue) -> Result<()> {
        if key.trim().is_empty() {
            return Err(SignageError::Validation("config key must not be empty".into()));
        }
        // Last writer wins; updated_at is the freshness stamp devices poll on.
        self.get(device_id).await?;
        self.config
            .upsert_entry(
                device_id,
                DeviceConfigEntry {
                    key,
                    value,
                    updated_at: Utc::now(),
                },
            )
            .await
    }

    pub async fn config_for_device(&self, device_id: Uuid) -> Result<DeviceConfigResponse> {
        let entries = self.config.entries_for_device(device_id).await?;
        let last_modified = entries.iter().map(|e| e.updated_at).max();
        Ok(DeviceConfigResponse {
            entries,
            last_modified,
        })
    }

    pub async fn create_group(&self, name: String, description: Option<String>) -> Result<DeviceGroup> {
        if name.trim().is_empty() {
            return Err(SignageError::Validation("group name must not be empty".into()));
        }
        let group = DeviceGroup {
            id: Uuid::new_v4(),
            name,
            description,
            created_at: Utc::now(),
        };
        self.devices.insert_group(group.clone()).await?;
        Ok(group)
    }

    pub async fn list_groups(&self) -> Result<Vec<DeviceGroup>> {
        self.devices.list_groups().await
    }
}

fn generate_credential() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CREDENTIAL_LENGTH)
        .map(char::from)
        .collect()
}

pub(crate) fn hash_credential(credential: &str) -> String {
    hex::encode(Sha256::digest(credential.as_bytes()))
}
