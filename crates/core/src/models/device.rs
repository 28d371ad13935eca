//! Device registry records and presence derivation

use crate::version::ReleaseVersion;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A registered playback endpoint
///
/// Online/offline is derived from `last_seen`, never stored, so the
/// dashboard and the resolver can never disagree about presence. Devices are
/// soft-deleted only: broadcast delivery rows and update rows keep referring
/// to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    /// Hardware serial, unique across the fleet
    pub serial: String,
    /// SHA-256 of the current credential; the credential itself is returned
    /// once at registration and never stored
    pub credential_hash: String,
    pub ip_address: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    /// What the device last reported playing
    pub current_content: Option<ReportedContent>,
    pub software_version: ReleaseVersion,
    pub group_id: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Pure presence check: a device seen exactly `offline_timeout` ago is
    /// still online; one second older is offline.
    pub fn is_online(&self, now: DateTime<Utc>, offline_timeout: Duration) -> bool {
        match self.last_seen {
            Some(last_seen) => {
                let timeout = ChronoDuration::from_std(offline_timeout)
                    .unwrap_or_else(|_| ChronoDuration::seconds(300));
                now.signed_duration_since(last_seen) <= timeout
            }
            None => false,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Player state carried in heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Playing,
    Idle,
}

/// Content a device reports itself to be playing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedContent {
    /// Human-readable name of the current video or playlist
    pub name: String,
    pub status: PlayerStatus,
}

/// Named group of devices, used as a broadcast target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Typed value of a device config entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Bool(bool),
    Structured(serde_json::Value),
}

/// One key of the device-scoped key/value store
///
/// Last-writer-wins; `updated_at` is the freshness stamp the config poll
/// compares against, nothing more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfigEntry {
    pub key: String,
    pub value: ConfigValue,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_seen_at(last_seen: Option<DateTime<Utc>>) -> Device {
        Device {
            id: Uuid::new_v4(),
            name: "lobby-screen".to_string(),
            serial: "RPI-AABBCC".to_string(),
            credential_hash: "deadbeef".to_string(),
            ip_address: None,
            registered_at: Utc::now(),
            last_seen,
            current_content: None,
            software_version: ReleaseVersion::new(1, 0, 0),
            group_id: None,
            deleted_at: None,
        }
    }

    #[test]
    fn online_at_exact_timeout_boundary() {
        let now = Utc::now();
        let timeout = Duration::from_secs(300);

        let on_boundary = device_seen_at(Some(now - ChronoDuration::seconds(300)));
        assert!(on_boundary.is_online(now, timeout));

        let past_boundary = device_seen_at(Some(now - ChronoDuration::seconds(301)));
        assert!(!past_boundary.is_online(now, timeout));
    }

    #[test]
    fn never_seen_is_offline() {
        let device = device_seen_at(None);
        assert!(!device.is_online(Utc::now(), Duration::from_secs(300)));
    }

    #[test]
    fn config_value_round_trips_through_json() {
        let value = ConfigValue::Structured(serde_json::json!({"rotation": 90}));
        let encoded = serde_json::to_string(&value).unwrap();
        let decoded: ConfigValue = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, decoded);

        let flag = ConfigValue::Bool(true);
        let encoded = serde_json::to_string(&flag).unwrap();
        assert_eq!(encoded, r#"{"kind":"bool","value":true}"#);
    }
}
