//! Device-side update execution
//!
//! Walks one update through the coordinator's rollout state machine:
//! downloading (with verification), installing (presenting the computed
//! digest), then completed or failed. The actual install step is delegated
//! to an external command so the agent itself stays update-agnostic.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::{error, info, warn};

use signage_gateway_core::models::{DeviceUpdateStatus, UpdateDescriptor, UpdateProgressReport};
use signage_gateway_core::{retry_with_backoff, Result, RetryPolicy, SignageError};

use crate::cache::sha256_file;
use crate::client::CoordinatorClient;
use crate::identity::DeviceIdentity;

pub struct UpdateRunner {
    staging_dir: PathBuf,
    /// Command invoked with the verified artifact path; `None` stages only.
    install_command: Option<String>,
}

impl UpdateRunner {
    pub fn new(staging_dir: PathBuf, install_command: Option<String>) -> Self {
        Self {
            staging_dir,
            install_command,
        }
    }

    /// Download, verify, and install one update, reporting progress along
    /// the way. Any failure is reported upstream before returning the error.
    pub async fn apply(
        &self,
        client: &CoordinatorClient,
        identity: &DeviceIdentity,
        update: &UpdateDescriptor,
    ) -> Result<()> {
        info!(version = %update.version, critical = update.is_critical, "applying update");
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| SignageError::Storage(format!("creating staging dir: {}", e)))?;

        self.report(client, identity, update, DeviceUpdateStatus::Downloading, 0, None, None)
            .await?;

        let artifact = self.staging_dir.join(&update.file_name);
        let download = retry_with_backoff(
            || client.download_to(identity, &update.download_path, &artifact),
            RetryPolicy::download(),
            SignageError::is_transient,
        )
        .await;
        if let Err(e) = download {
            self.fail(client, identity, update, 0, format!("download failed: {}", e))
                .await;
            return Err(e);
        }

        let digest = sha256_file(&artifact).await?;
        if digest != update.checksum {
            let _ = tokio::fs::remove_file(&artifact).await;
            self.fail(
                client,
                identity,
                update,
                0,
                format!("checksum mismatch: expected {}, got {}", update.checksum, digest),
            )
            .await;
            return Err(SignageError::ChecksumMismatch {
                expected: update.checksum.clone(),
                actual: digest,
            });
        }
        self.report(client, identity, update, DeviceUpdateStatus::Downloading, 100, None, None)
            .await?;

        // The coordinator re-checks the digest before allowing installing.
        self.report(
            client,
            identity,
            update,
            DeviceUpdateStatus::Installing,
            100,
            Some(digest),
            None,
        )
        .await?;

        if let Err(e) = self.install(&artifact).await {
            self.fail(client, identity, update, 100, format!("install failed: {}", e))
                .await;
            return Err(e);
        }

        self.report(client, identity, update, DeviceUpdateStatus::Completed, 100, None, None)
            .await?;
        info!(version = %update.version, "update completed");
        Ok(())
    }

    async fn install(&self, artifact: &std::path::Path) -> Result<()> {
        let Some(command) = &self.install_command else {
            info!(artifact = %artifact.display(), "no install command, artifact staged");
            return Ok(());
        };

        let status = Command::new(command)
            .arg(artifact)
            .status()
            .await
            .map_err(|e| SignageError::Storage(format!("spawning {}: {}", command, e)))?;
        if !status.success() {
            return Err(SignageError::Storage(format!(
                "{} exited with {}",
                command, status
            )));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn report(
        &self,
        client: &CoordinatorClient,
        identity: &DeviceIdentity,
        update: &UpdateDescriptor,
        status: DeviceUpdateStatus,
        progress: u8,
        artifact_checksum: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        client
            .report_update_progress(
                identity,
                update.update_id,
                &UpdateProgressReport {
                    status,
                    progress,
                    artifact_checksum,
                    error,
                },
            )
            .await
    }

    /// Best-effort failure report; the local error is what propagates.
    /// `progress` must be the last value reported so the failure does not
    /// look like a regression.
    async fn fail(
        &self,
        client: &CoordinatorClient,
        identity: &DeviceIdentity,
        update: &UpdateDescriptor,
        progress: u8,
        message: String,
    ) {
        error!(version = %update.version, "{}", message);
        if let Err(e) = self
            .report(
                client,
                identity,
                update,
                DeviceUpdateStatus::Failed,
                progress,
                None,
                Some(message),
            )
            .await
        {
            warn!("could not report update failure: {}", e);
        }
    }
}
