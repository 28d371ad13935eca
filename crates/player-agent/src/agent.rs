//! Agent runtime: registration, sync loops, and shutdown
//!
//! One task per concern, each on its own interval: heartbeat, content sync,
//! config poll, emergency poll, and update check. The emergency poll runs
//! much tighter than the content sync so overrides reach the screen within
//! seconds while normal catalog churn stays cheap. All tasks share one
//! identity; any of them hitting `Unauthorized` re-registers, which rotates
//! the credential server-side and persists the new one.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use signage_gateway_core::models::{
    BroadcastContent, ConfigValue, ContentDecision, HeartbeatRequest, RegisterRequest,
    ResolvedContent, ResolvedMedia, VideoDescriptor,
};
use signage_gateway_core::{retry_with_backoff, Result, RetryPolicy, SignageError};

use crate::cache::VideoCache;
use crate::client::CoordinatorClient;
use crate::config::AgentConfig;
use crate::identity::DeviceIdentity;
use crate::playback::{run_supervisor, PlayTarget, PlaybackController};
use crate::updater::UpdateRunner;

const SCREENSHOT_FLAG: &str = "screenshot_requested";

#[derive(Debug, Clone, Copy)]
enum SyncTask {
    Heartbeat,
    ContentSync,
    ConfigPoll,
    EmergencyPoll,
    UpdateCheck,
}

impl SyncTask {
    fn name(&self) -> &'static str {
        match self {
            SyncTask::Heartbeat => "heartbeat",
            SyncTask::ContentSync => "content-sync",
            SyncTask::ConfigPoll => "config-poll",
            SyncTask::EmergencyPoll => "emergency-poll",
            SyncTask::UpdateCheck => "update-check",
        }
    }
}

pub struct Agent {
    config: AgentConfig,
    client: CoordinatorClient,
    cache: VideoCache,
    controller: PlaybackController,
    updater: UpdateRunner,
    identity: RwLock<DeviceIdentity>,
    /// Serializes re-registration when several tasks hit 401 at once
    reregister: Mutex<()>,
    /// `last_modified` from the previous config poll
    config_stamp: Mutex<Option<chrono::DateTime<chrono::Utc>>>,
    targets: Mutex<Option<watch::Receiver<PlayTarget>>>,
}

impl Agent {
    /// Connect to the coordinator and establish an identity, registering if
    /// no valid one is stored. Retries while the coordinator is unreachable
    /// so a player that boots before the network is up still comes online.
    pub async fn bootstrap(config: AgentConfig) -> Result<Arc<Agent>> {
        let client = CoordinatorClient::new(&config.coordinator_url)?;
        let cache = VideoCache::new(config.cache_dir());
        cache.init().await?;

        let identity = match DeviceIdentity::load(&config.identity_path()).await? {
            Some(identity) => {
                info!(device_id = %identity.device_id, "loaded stored identity");
                identity
            }
            None => register(&client, &config).await?,
        };

        let (controller, targets) = PlaybackController::new();
        let updater = UpdateRunner::new(config.staging_dir(), config.install_command.clone());

        Ok(Arc::new(Agent {
            config,
            client,
            cache,
            controller,
            updater,
            identity: RwLock::new(identity),
            reregister: Mutex::new(()),
            config_stamp: Mutex::new(None),
            targets: Mutex::new(Some(targets)),
        }))
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let targets = self
            .targets
            .lock()
            .await
            .take()
            .ok_or_else(|| SignageError::InvalidState("agent already running".to_string()))?;

        let supervisor = tokio::spawn(run_supervisor(
            self.config.player_command.clone(),
            targets,
            shutdown.clone(),
        ));

        let tasks = [
            (SyncTask::Heartbeat, self.config.heartbeat_interval),
            (SyncTask::ContentSync, self.config.content_sync_interval),
            (SyncTask::ConfigPoll, self.config.config_poll_interval),
            (SyncTask::EmergencyPoll, self.config.emergency_poll_interval),
            (SyncTask::UpdateCheck, self.config.update_check_interval),
        ];
        let mut handles = Vec::with_capacity(tasks.len());
        for (task, interval) in tasks {
            handles.push(tokio::spawn(Arc::clone(&self).run_task(
                task,
                interval,
                shutdown.clone(),
            )));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("sync task panicked: {}", e);
            }
        }
        if let Err(e) = supervisor.await {
            error!("playback supervisor panicked: {}", e);
        }
        info!("agent stopped");
        Ok(())
    }

    async fn run_task(
        self: Arc<Self>,
        task: SyncTask,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(task = task.name(), period_secs = period.as_secs(), "sync task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(task).await {
                        if matches!(e, SignageError::Unauthorized(_)) {
                            warn!(task = task.name(), "credential rejected, re-registering");
                            if let Err(e) = self.reregister().await {
                                error!("re-registration failed: {}", e);
                            }
                        } else {
                            warn!(task = task.name(), "sync pass failed: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(task = task.name(), "sync task stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn run_once(&self, task: SyncTask) -> Result<()> {
        match task {
            SyncTask::Heartbeat => self.heartbeat().await,
            SyncTask::ContentSync => self.sync_content().await,
            SyncTask::ConfigPoll => self.poll_config().await,
            SyncTask::EmergencyPoll => self.poll_emergencies().await,
            SyncTask::UpdateCheck => self.check_updates().await,
        }
    }

    async fn heartbeat(&self) -> Result<()> {
        let identity = self.identity.read().await.clone();
        let request = HeartbeatRequest {
            current_content: self.controller.current().reported(),
            software_version: Some(self.config.software_version.clone()),
            ip_address: None,
        };
        self.client.heartbeat(&identity, &request).await?;
        Ok(())
    }

    /// Pull the resolver's decision and make the local state match: cache
    /// what it needs, point the player at it, evict what it no longer names.
    async fn sync_content(&self) -> Result<()> {
        let identity = self.identity.read().await.clone();
        let decision = self.client.resolve(&identity).await?;

        let referenced: HashSet<String> = decision
            .required_videos()
            .iter()
            .map(|v| v.content_hash.clone())
            .collect();

        match decision {
            ContentDecision::EmergencyOverride(broadcast) => {
                self.show_emergency(&identity, &broadcast).await?;
            }
            ContentDecision::ScheduledAssignment(resolved)
            | ContentDecision::DefaultAssignment(resolved) => {
                let target = self.content_target(&identity, resolved).await?;
                self.controller.set_content(target);
            }
            ContentDecision::NoContent => {
                self.controller.set_content(PlayTarget::Idle);
            }
        }

        // Eviction would race with an override video the resolver no longer
        // names, so skip it while one is on screen.
        if !self.controller.in_emergency() {
            let removed = self.cache.cleanup(&referenced).await?;
            if removed > 0 {
                info!(removed, "evicted unreferenced cache entries");
            }
        }
        Ok(())
    }

    async fn content_target(
        &self,
        identity: &DeviceIdentity,
        resolved: ResolvedContent,
    ) -> Result<PlayTarget> {
        let (name, descriptors): (String, Vec<VideoDescriptor>) = match resolved.content {
            ResolvedMedia::Video(video) => (video.file_name.clone(), vec![video]),
            ResolvedMedia::Playlist { name, items, .. } => (name, items),
        };

        let mut paths = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            paths.push(self.cache.ensure(&self.client, identity, descriptor).await?);
        }
        Ok(PlayTarget::Content { name, paths })
    }

    /// Show the strongest active broadcast, acknowledging receipt and
    /// confirming display. A broadcast already on screen is left alone so the
    /// player does not restart every poll.
    async fn poll_emergencies(&self) -> Result<()> {
        let identity = self.identity.read().await.clone();
        let broadcasts = self.client.active_broadcasts(&identity).await?;

        match broadcasts.first() {
            Some(broadcast) => self.show_emergency(&identity, broadcast).await,
            None => {
                self.controller.clear_emergency();
                Ok(())
            }
        }
    }

    async fn show_emergency(
        &self,
        identity: &DeviceIdentity,
        broadcast: &BroadcastContent,
    ) -> Result<()> {
        let already_showing = matches!(
            self.controller.current(),
            PlayTarget::Emergency { broadcast_id, .. } if broadcast_id == broadcast.broadcast_id
        );
        if already_showing {
            return Ok(());
        }

        let path: Option<PathBuf> = match &broadcast.video {
            Some(descriptor) => Some(self.cache.ensure(&self.client, identity, descriptor).await?),
            None => None,
        };

        self.client
            .acknowledge_broadcast(identity, broadcast.broadcast_id)
            .await?;
        self.controller
            .set_emergency(broadcast.broadcast_id, broadcast.message.clone(), path);
        self.client
            .broadcast_displayed(identity, broadcast.broadcast_id)
            .await?;
        info!(
            broadcast_id = %broadcast.broadcast_id,
            priority = broadcast.priority,
            "emergency broadcast on screen"
        );
        Ok(())
    }

    async fn poll_config(&self) -> Result<()> {
        let identity = self.identity.read().await.clone();
        let response = self.client.device_config(&identity).await?;

        let mut stamp = self.config_stamp.lock().await;
        if response.last_modified.is_some() && response.last_modified == *stamp {
            return Ok(());
        }
        *stamp = response.last_modified;
        drop(stamp);

        for entry in &response.entries {
            if entry.key == SCREENSHOT_FLAG && entry.value == ConfigValue::Bool(true) {
                if let Err(e) = self.capture_and_upload_screenshot(&identity).await {
                    warn!("screenshot request failed: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Run the configured screenshot tool and ship the result upstream; the
    /// coordinator clears the request flag on upload.
    async fn capture_and_upload_screenshot(&self, identity: &DeviceIdentity) -> Result<()> {
        let path = self.config.data_dir.join("screenshot.png");
        let status = tokio::process::Command::new(&self.config.screenshot_command)
            .arg(&path)
            .status()
            .await
            .map_err(|e| {
                SignageError::Storage(format!(
                    "spawning {}: {}",
                    self.config.screenshot_command, e
                ))
            })?;
        if !status.success() {
            return Err(SignageError::Storage(format!(
                "{} exited with {}",
                self.config.screenshot_command, status
            )));
        }

        let png = tokio::fs::read(&path)
            .await
            .map_err(|e| SignageError::Storage(format!("reading screenshot: {}", e)))?;
        self.client.upload_screenshot(identity, png).await?;
        let _ = tokio::fs::remove_file(&path).await;
        info!("screenshot uploaded");
        Ok(())
    }

    /// Apply the newest offered update, if any. The coordinator only offers
    /// versions strictly newer than the one we report.
    async fn check_updates(&self) -> Result<()> {
        let identity = self.identity.read().await.clone();
        let response = self.client.check_updates(&identity).await?;
        let Some(update) = response.updates.first() else {
            return Ok(());
        };
        self.updater.apply(&self.client, &identity, update).await
    }

    /// Rotate the identity after a credential rejection. Only one task does
    /// the work; the rest find the fresh identity already in place.
    async fn reregister(&self) -> Result<()> {
        let _guard = self.reregister.lock().await;

        // Another task may have re-registered while we waited on the lock.
        let current = self.identity.read().await.clone();
        let probe = HeartbeatRequest {
            current_content: None,
            software_version: Some(self.config.software_version.clone()),
            ip_address: None,
        };
        if self.client.heartbeat(&current, &probe).await.is_ok() {
            return Ok(());
        }

        let identity = register(&self.client, &self.config).await?;
        *self.identity.write().await = identity;
        Ok(())
    }
}

async fn register(client: &CoordinatorClient, config: &AgentConfig) -> Result<DeviceIdentity> {
    let request = RegisterRequest {
        name: config.device_name.clone(),
        serial: config.device_serial.clone(),
        ip_address: None,
        software_version: Some(config.software_version.clone()),
    };
    let response = retry_with_backoff(
        || client.register(&request),
        RetryPolicy::download(),
        SignageError::is_transient,
    )
    .await?;

    let identity = DeviceIdentity {
        device_id: response.device_id,
        credential: response.credential,
        serial: config.device_serial.clone(),
        name: config.device_name.clone(),
    };
    identity.store(&config.identity_path()).await?;
    info!(device_id = %identity.device_id, serial = %identity.serial, "registered with coordinator");
    Ok(identity)
}
