//! Playback target state and player process supervision
//!
//! The sync tasks publish a desired `PlayTarget` through a watch channel;
//! the supervisor owns the actual player process and restarts it whenever the
//! target changes or the player dies. Emergency targets preempt the normal
//! target, which is remembered and restored when the emergency clears.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use signage_gateway_core::models::{PlayerStatus, ReportedContent};

const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// What the screen should be doing right now
#[derive(Debug, Clone, PartialEq)]
pub enum PlayTarget {
    Idle,
    /// Normal content looped until told otherwise
    Content { name: String, paths: Vec<PathBuf> },
    /// Broadcast override; `path` is absent for message-only broadcasts
    Emergency {
        broadcast_id: Uuid,
        message: String,
        path: Option<PathBuf>,
    },
}

impl PlayTarget {
    pub fn reported(&self) -> Option<ReportedContent> {
        match self {
            PlayTarget::Idle => Some(ReportedContent {
                name: "idle".to_string(),
                status: PlayerStatus::Idle,
            }),
            PlayTarget::Content { name, .. } => Some(ReportedContent {
                name: name.clone(),
                status: PlayerStatus::Playing,
            }),
            PlayTarget::Emergency { message, .. } => Some(ReportedContent {
                name: format!("emergency: {}", message),
                status: PlayerStatus::Playing,
            }),
        }
    }
}

/// Last-writer-wins playback intent, shared by the sync tasks
pub struct PlaybackController {
    sender: watch::Sender<PlayTarget>,
    /// Most recent normal target, restored when an emergency clears
    last_content: Mutex<PlayTarget>,
}

impl PlaybackController {
    pub fn new() -> (Self, watch::Receiver<PlayTarget>) {
        let (sender, receiver) = watch::channel(PlayTarget::Idle);
        (
            Self {
                sender,
                last_content: Mutex::new(PlayTarget::Idle),
            },
            receiver,
        )
    }

    pub fn current(&self) -> PlayTarget {
        self.sender.borrow().clone()
    }

    pub fn in_emergency(&self) -> bool {
        matches!(*self.sender.borrow(), PlayTarget::Emergency { .. })
    }

    /// Set the normal content target. Deferred while an emergency is showing;
    /// it becomes the restore point instead.
    pub fn set_content(&self, target: PlayTarget) {
        *self.last_content.lock() = target.clone();
        if !self.in_emergency() {
            self.publish(target);
        }
    }

    /// Preempt whatever is playing with a broadcast override.
    pub fn set_emergency(&self, broadcast_id: Uuid, message: String, path: Option<PathBuf>) {
        self.publish(PlayTarget::Emergency {
            broadcast_id,
            message,
            path,
        });
    }

    /// Clear an ended emergency and restore the last normal target.
    pub fn clear_emergency(&self) {
        if self.in_emergency() {
            let restored = self.last_content.lock().clone();
            self.publish(restored);
        }
    }

    fn publish(&self, target: PlayTarget) {
        // send only fails with no receivers, which means the supervisor is
        // gone and the agent is shutting down anyway.
        let _ = self.sender.send(target);
    }
}

/// Own the player process and keep it matching the published target.
pub async fn run_supervisor(
    player_command: String,
    mut targets: watch::Receiver<PlayTarget>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut child: Option<Child> = None;
    let mut current = targets.borrow().clone();
    info!(player = %player_command, "playback supervisor started");

    loop {
        tokio::select! {
            changed = targets.changed() => {
                if changed.is_err() {
                    break;
                }
                current = targets.borrow_and_update().clone();
                stop(&mut child).await;
                child = spawn_for(&player_command, &current);
            }
            status = wait_child(&mut child) => {
                match status {
                    Ok(status) => warn!(%status, "player exited, respawning"),
                    Err(e) => error!("waiting on player: {}", e),
                }
                child = None;
                tokio::time::sleep(RESPAWN_DELAY).await;
                child = spawn_for(&player_command, &current);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    stop(&mut child).await;
                    info!("playback supervisor stopping");
                    break;
                }
            }
        }
    }
}

/// Wait on the running player, or forever if there is none.
async fn wait_child(child: &mut Option<Child>) -> std::io::Result<std::process::ExitStatus> {
    match child {
        Some(c) => c.wait().await,
        None => std::future::pending().await,
    }
}

async fn stop(child: &mut Option<Child>) {
    if let Some(mut c) = child.take() {
        if let Err(e) = c.kill().await {
            warn!("killing player: {}", e);
        }
    }
}

fn spawn_for(player_command: &str, target: &PlayTarget) -> Option<Child> {
    let paths: Vec<&PathBuf> = match target {
        PlayTarget::Idle => return None,
        PlayTarget::Emergency { path: None, message, .. } => {
            // Message-only broadcast: nothing to hand the player, the message
            // itself is reported upstream via the heartbeat.
            info!(message = %message, "message-only emergency, screen idle");
            return None;
        }
        PlayTarget::Content { paths, .. } => paths.iter().collect(),
        PlayTarget::Emergency { path: Some(path), .. } => vec![path],
    };

    let mut command = Command::new(player_command);
    command
        .arg("--fullscreen")
        .arg("--no-terminal")
        .arg("--loop-playlist=inf")
        .args(paths.iter().map(|p| p.as_os_str()))
        .kill_on_drop(true);

    match command.spawn() {
        Ok(child) => Some(child),
        Err(e) => {
            error!(player = %player_command, "failed to spawn player: {}", e);
            None
        }
    }
}
