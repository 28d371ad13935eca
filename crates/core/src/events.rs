//! Advisory in-process event bus
//!
//! The coordinator publishes an event after each state mutation so a live
//! dashboard can be pushed to instead of polling. The bus is purely a latency
//! optimization: no subscriber ever has to exist, publishes to an empty bus
//! are dropped, and every protocol guarantee holds over plain polling.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_BUS_CAPACITY: usize = 256;

/// Events emitted after coordinator state mutations
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    DeviceRegistered {
        device_id: Uuid,
        serial: String,
    },
    DeviceHeartbeat {
        device_id: Uuid,
        at: DateTime<Utc>,
    },
    BroadcastActivated {
        broadcast_id: Uuid,
    },
    BroadcastEnded {
        broadcast_id: Uuid,
        /// "expired" or "cancelled"
        outcome: String,
    },
    UpdateProgress {
        device_id: Uuid,
        update_id: Uuid,
        status: String,
        progress: u8,
    },
}

/// Broadcast-channel event bus shared through the coordinator context
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; silently dropped when nobody is subscribed.
    pub fn publish(&self, event: GatewayEvent) {
        if let Err(err) = self.tx.send(event) {
            tracing::trace!("event dropped, no subscribers: {}", err.0.kind());
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl GatewayEvent {
    /// Short name used in logs and trace output
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayEvent::DeviceRegistered { .. } => "device_registered",
            GatewayEvent::DeviceHeartbeat { .. } => "device_heartbeat",
            GatewayEvent::BroadcastActivated { .. } => "broadcast_activated",
            GatewayEvent::BroadcastEnded { .. } => "broadcast_ended",
            GatewayEvent::UpdateProgress { .. } => "update_progress",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let id = Uuid::new_v4();
        bus.publish(GatewayEvent::BroadcastActivated { broadcast_id: id });

        match rx.recv().await.unwrap() {
            GatewayEvent::BroadcastActivated { broadcast_id } => assert_eq!(broadcast_id, id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::default();
        bus.publish(GatewayEvent::DeviceHeartbeat {
            device_id: Uuid::new_v4(),
            at: Utc::now(),
        });
    }
}
