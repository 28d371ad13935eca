//! Wire request/response types shared by coordinator handlers and the
//! player agent's client

use crate::models::broadcast::BroadcastTarget;
use crate::models::device::{DeviceConfigEntry, ReportedContent};
use crate::models::update::DeviceUpdateStatus;
use crate::version::ReleaseVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the device credential on authenticated calls
pub const DEVICE_KEY_HEADER: &str = "X-Device-Key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub serial: String,
    pub ip_address: Option<String>,
    pub software_version: Option<ReleaseVersion>,
}

/// Registration always returns a fresh credential; re-registering an
/// existing serial rotates it and invalidates the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub device_id: Uuid,
    pub credential: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub current_content: Option<ReportedContent>,
    pub software_version: Option<ReleaseVersion>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfigResponse {
    pub entries: Vec<DeviceConfigEntry>,
    /// Newest `updated_at` across entries; the config poll short-circuits
    /// when this has not moved
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetConfigRequest {
    pub key: String,
    pub value: crate::models::device::ConfigValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBroadcastRequest {
    pub title: String,
    pub message: String,
    pub video_id: Option<Uuid>,
    pub priority: u8,
    pub duration_secs: Option<u32>,
    pub target: BroadcastTarget,
    pub activate_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBroadcastResponse {
    pub broadcast_id: Uuid,
    /// Number of delivery rows snapshotted at creation
    pub targeted_devices: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcknowledgeResponse {
    pub acknowledged_at: DateTime<Utc>,
}

/// Catalog entry offered to a device by the update check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    pub update_id: Uuid,
    pub version: ReleaseVersion,
    pub description: Option<String>,
    pub file_name: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub is_critical: bool,
    pub download_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckUpdatesResponse {
    /// Strictly newer than the device's reported version, newest first
    pub updates: Vec<UpdateDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateProgressReport {
    pub status: DeviceUpdateStatus,
    pub progress: u8,
    /// SHA-256 the device computed over the downloaded artifact; required
    /// when moving into `installing`, where it is checked against the catalog
    pub artifact_checksum: Option<String>,
    pub error: Option<String>,
}

/// Dashboard-facing device summary with derived presence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: Uuid,
    pub name: String,
    pub serial: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub current_content: Option<ReportedContent>,
    pub software_version: ReleaseVersion,
}
