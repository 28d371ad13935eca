//! Emergency broadcast records and lifecycle states

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_BROADCAST_PRIORITY: u8 = 1;
pub const MAX_BROADCAST_PRIORITY: u8 = 5;

/// Broadcast lifecycle: pending -> active -> {expired, cancelled}
///
/// Terminal states never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl BroadcastStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BroadcastStatus::Expired | BroadcastStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Pending => "pending",
            BroadcastStatus::Active => "active",
            BroadcastStatus::Expired => "expired",
            BroadcastStatus::Cancelled => "cancelled",
        }
    }
}

/// Which devices a broadcast preempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", content = "ids", rename_all = "snake_case")]
pub enum BroadcastTarget {
    AllDevices,
    Group(Uuid),
    Devices(Vec<Uuid>),
}

/// A high-priority override that preempts normal content
///
/// The target set is snapshotted into delivery rows at creation time; a
/// device registered afterwards is never retroactively targeted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyBroadcast {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    /// Video override; message-only broadcasts leave this unset
    pub video_id: Option<Uuid>,
    /// 1 (low) to 5 (critical)
    pub priority: u8,
    /// Seconds after creation at which the broadcast expires; `None` runs
    /// until explicitly cancelled
    pub duration_secs: Option<u32>,
    pub target: BroadcastTarget,
    pub status: BroadcastStatus,
    /// Future activation time; `None` activates immediately on creation
    pub activate_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EmergencyBroadcast {
    /// Expiry instant, if the broadcast carries a duration
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.duration_secs
            .map(|secs| self.created_at + chrono::Duration::seconds(secs as i64))
    }

    /// Whether the expiry sweep should transition this broadcast
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, BroadcastStatus::Active)
            && self.expires_at().map(|at| at <= now).unwrap_or(false)
    }

    /// Whether the activation sweep should transition this broadcast
    pub fn is_due_for_activation(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, BroadcastStatus::Pending)
            && self.activate_at.map(|at| at <= now).unwrap_or(true)
    }
}

/// Per-device record of a broadcast's delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastDelivery {
    pub broadcast_id: Uuid,
    pub device_id: Uuid,
    /// When the device acknowledged receipt
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// When the device reported the override on screen
    pub displayed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn broadcast(duration_secs: Option<u32>, status: BroadcastStatus) -> EmergencyBroadcast {
        EmergencyBroadcast {
            id: Uuid::new_v4(),
            title: "evacuate".to_string(),
            message: "leave the building".to_string(),
            video_id: None,
            priority: 5,
            duration_secs,
            target: BroadcastTarget::AllDevices,
            status,
            activate_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn terminal_states() {
        assert!(BroadcastStatus::Expired.is_terminal());
        assert!(BroadcastStatus::Cancelled.is_terminal());
        assert!(!BroadcastStatus::Pending.is_terminal());
        assert!(!BroadcastStatus::Active.is_terminal());
    }

    #[test]
    fn expiry_at_duration_boundary() {
        let b = broadcast(Some(300), BroadcastStatus::Active);
        let exactly = b.created_at + Duration::seconds(300);
        assert!(b.is_expired_at(exactly));
        assert!(!b.is_expired_at(exactly - Duration::seconds(1)));
    }

    #[test]
    fn no_duration_never_expires() {
        let b = broadcast(None, BroadcastStatus::Active);
        assert!(!b.is_expired_at(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn pending_without_delay_activates_immediately() {
        let b = broadcast(None, BroadcastStatus::Pending);
        assert!(b.is_due_for_activation(Utc::now()));
    }

    #[test]
    fn pending_with_future_activation_waits() {
        let mut b = broadcast(None, BroadcastStatus::Pending);
        b.activate_at = Some(Utc::now() + Duration::minutes(10));
        assert!(!b.is_due_for_activation(Utc::now()));
        assert!(b.is_due_for_activation(Utc::now() + Duration::minutes(11)));
    }
}
