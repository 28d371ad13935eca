//! Software update catalog and per-device rollout state

use crate::version::ReleaseVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable catalog entry for a published release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemUpdate {
    pub id: Uuid,
    pub version: ReleaseVersion,
    pub description: Option<String>,
    pub file_name: String,
    /// SHA-256 of the artifact; verified before install
    pub checksum: String,
    pub size_bytes: u64,
    /// Critical updates are surfaced even when a device overrides its
    /// check interval
    pub is_critical: bool,
    pub released_at: DateTime<Utc>,
}

/// Per-(device, update) rollout state machine
///
/// pending -> downloading -> installing -> {completed, failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceUpdateStatus {
    Pending,
    Downloading,
    Installing,
    Completed,
    Failed,
}

impl DeviceUpdateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeviceUpdateStatus::Completed | DeviceUpdateStatus::Failed
        )
    }

    /// Legal forward transitions; `Failed` is reachable from any live state.
    pub fn can_transition_to(&self, next: DeviceUpdateStatus) -> bool {
        use DeviceUpdateStatus::*;
        match (self, next) {
            (Pending, Downloading) => true,
            (Downloading, Installing) => true,
            (Installing, Completed) => true,
            (Pending | Downloading | Installing, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceUpdateStatus::Pending => "pending",
            DeviceUpdateStatus::Downloading => "downloading",
            DeviceUpdateStatus::Installing => "installing",
            DeviceUpdateStatus::Completed => "completed",
            DeviceUpdateStatus::Failed => "failed",
        }
    }
}

/// Rollout row for one update on one device
///
/// Terminal rows are never reused: a newer update starts a fresh row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub id: Uuid,
    pub device_id: Uuid,
    pub update_id: Uuid,
    pub status: DeviceUpdateStatus,
    /// Monotonically non-decreasing 0..=100
    pub progress: u8,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeviceUpdateStatus::*;

    #[test]
    fn forward_transitions_only() {
        assert!(Pending.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Installing));
        assert!(Installing.can_transition_to(Completed));

        assert!(!Downloading.can_transition_to(Pending));
        assert!(!Installing.can_transition_to(Downloading));
        assert!(!Pending.can_transition_to(Installing));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn failed_reachable_from_live_states_only() {
        assert!(Pending.can_transition_to(Failed));
        assert!(Downloading.can_transition_to(Failed));
        assert!(Installing.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states_are_sticky() {
        for next in [Pending, Downloading, Installing, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }
}
