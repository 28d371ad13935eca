//! Background broadcast lifecycle sweep
//!
//! Activates pending broadcasts whose activation time arrived and expires
//! active ones past their duration. Sweep errors are logged and retried on
//! the next tick; a failing store must not kill the task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::broadcast::BroadcastCoordinator;

pub async fn run_sweeper(
    broadcasts: Arc<BroadcastCoordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "broadcast sweeper started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match broadcasts.sweep(Utc::now()).await {
                    Ok((0, 0)) => {}
                    Ok((activated, expired)) => {
                        debug!(activated, expired, "sweep transitioned broadcasts");
                    }
                    Err(e) => error!("broadcast sweep failed: {}", e),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("broadcast sweeper stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CoordinatorContext;
    use signage_gateway_core::config::ServiceConfig;
    use signage_gateway_core::models::{BroadcastTarget, CreateBroadcastRequest, RegisterRequest};

    #[tokio::test]
    async fn sweeper_expires_broadcast_and_stops_on_shutdown() {
        let ctx = CoordinatorContext::in_memory(ServiceConfig::default());
        ctx.registry
            .register(RegisterRequest {
                name: "screen".to_string(),
                serial: "RPI-001".to_string(),
                ip_address: None,
                software_version: None,
            })
            .await
            .unwrap();
        let created = ctx
            .broadcasts
            .create(CreateBroadcastRequest {
                title: "drill".to_string(),
                message: "test".to_string(),
                video_id: None,
                priority: 5,
                duration_secs: Some(0),
                target: BroadcastTarget::AllDevices,
                activate_at: None,
            })
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_sweeper(
            ctx.broadcasts.clone(),
            Duration::from_millis(10),
            rx,
        ));

        // Zero-duration broadcast expires on the first sweep.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let broadcast = ctx.broadcasts.get(created.broadcast_id).await.unwrap();
        assert_eq!(
            broadcast.status,
            signage_gateway_core::models::BroadcastStatus::Expired
        );

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
