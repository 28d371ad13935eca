//! Software update catalog and per-device rollout tracking
//!
//! Each (device, update) pair runs one state machine:
//! pending -> downloading -> installing -> {completed, failed}. Progress only
//! moves forward, the installing transition must present the catalog
//! checksum, and terminal rows are never reused.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use signage_gateway_core::models::{
    CheckUpdatesResponse, Device, DeviceUpdate, DeviceUpdateStatus, SystemUpdate,
    UpdateDescriptor, UpdateProgressReport,
};
use signage_gateway_core::{EventBus, GatewayEvent, ReleaseVersion, Result, SignageError};

use crate::repository::{DeviceRepository, UpdateRepository};

pub struct UpdateCoordinator {
    updates: Arc<dyn UpdateRepository>,
    devices: Arc<dyn DeviceRepository>,
    events: EventBus,
}

impl UpdateCoordinator {
    pub fn new(
        updates: Arc<dyn UpdateRepository>,
        devices: Arc<dyn DeviceRepository>,
        events: EventBus,
    ) -> Self {
        Self {
            updates,
            devices,
            events,
        }
    }

    pub async fn publish_update(
        &self,
        version: ReleaseVersion,
        description: Option<String>,
        file_name: String,
        checksum: String,
        size_bytes: u64,
        is_critical: bool,
    ) -> Result<SystemUpdate> {
        if checksum.trim().is_empty() {
            return Err(SignageError::Validation("checksum must not be empty".into()));
        }
        let existing = self.updates.list_updates().await?;
        if existing.iter().any(|u| u.version == version) {
            return Err(SignageError::Validation(format!(
                "version {} is already published",
                version
            )));
        }

        let update = SystemUpdate {
            id: Uuid::new_v4(),
            version,
            description,
            file_name,
            checksum,
            size_bytes,
            is_critical,
            released_at: Utc::now(),
        };
        self.updates.insert_update(update.clone()).await?;
        info!(update_id = %update.id, version = %update.version, "update published");
        Ok(update)
    }

    pub async fn get_update(&self, update_id: Uuid) -> Result<SystemUpdate> {
        self.updates
            .get_update(update_id)
            .await?
            .ok_or_else(|| SignageError::NotFound(format!("update {}", update_id)))
    }

    /// Updates strictly newer than the device's reported version, newest
    /// first. Critical releases are not filtered differently here; criticality
    /// controls how aggressively the device acts on the answer.
    pub async fn check_updates(&self, device: &Device) -> Result<CheckUpdatesResponse> {
        let mut updates = self.updates.list_updates().await?;
        updates.retain(|u| u.version > device.software_version);
        updates.sort_by(|a, b| b.version.cmp(&a.version));

        Ok(CheckUpdatesResponse {
            updates: updates.iter().map(descriptor).collect(),
        })
    }

    /// Seed pending rollout rows for every device running something older.
    /// Pairs that already have a row, live or terminal, are left alone.
    pub async fn deploy(&self, update_id: Uuid) -> Result<usize> {
        let update = self.get_update(update_id).await?;
        let now = Utc::now();
        let mut seeded = 0;
        for device in self.devices.list_devices().await? {
            if device.software_version >= update.version {
                continue;
            }
            if self
                .updates
                .get_device_update(device.id, update_id)
                .await?
                .is_some()
            {
                continue;
            }
            self.updates
                .insert_device_update(DeviceUpdate {
                    id: Uuid::new_v4(),
                    device_id: device.id,
                    update_id,
                    status: DeviceUpdateStatus::Pending,
                    progress: 0,
                    error: None,
                    started_at: None,
                    completed_at: None,
                    created_at: now,
                })
                .await?;
            seeded += 1;
        }
        info!(update_id = %update_id, seeded, "update deployed");
        Ok(seeded)
    }

    pub async fn rollout_for_device(&self, device_id: Uuid) -> Result<Vec<DeviceUpdate>> {
        self.updates.device_updates_for_device(device_id).await
    }

    /// Apply one progress report from a device.
    ///
    /// A first report may arrive for a pair that was never deployed (the
    /// device found the update through its own check); it starts from an
    /// implicit pending row.
    pub async fn report_progress(
        &self,
        device_id: Uuid,
        update_id: Uuid,
        report: UpdateProgressReport,
    ) -> Result<DeviceUpdate> {
        if report.progress > 100 {
            return Err(SignageError::Validation(format!(
                "progress {} exceeds 100",
                report.progress
            )));
        }
        let update = self.get_update(update_id).await?;

        // Checksum gate: entering installing requires the digest the device
        // computed over its download to match the catalog. Once the mismatch
        // has failed the pair, repeating the report hits the terminal row
        // inside fail_pair and surfaces InvalidState instead.
        if report.status == DeviceUpdateStatus::Installing {
            let matches = report
                .artifact_checksum
                .as_deref()
                .map(|actual| actual == update.checksum)
                .unwrap_or(false);
            if !matches {
                let actual = report.artifact_checksum.clone().unwrap_or_default();
                self.fail_pair(device_id, update_id, &update.checksum, &actual)
                    .await?;
                warn!(
                    device_id = %device_id,
                    update_id = %update_id,
                    "artifact checksum mismatch, rollout failed"
                );
                return Err(SignageError::ChecksumMismatch {
                    expected: update.checksum,
                    actual,
                });
            }
        }

        let now = Utc::now();
        let row = self
            .updates
            .with_device_update(
                device_id,
                update_id,
                Box::new(move |current| {
                    let mut row = current.unwrap_or_else(|| DeviceUpdate {
                        id: Uuid::new_v4(),
                        device_id,
                        update_id,
                        status: DeviceUpdateStatus::Pending,
                        progress: 0,
                        error: None,
                        started_at: None,
                        completed_at: None,
                        created_at: now,
                    });

                    if row.status.is_terminal() {
                        return Err(SignageError::InvalidState(format!(
                            "rollout already {} for device {}",
                            row.status.as_str(),
                            device_id
                        )));
                    }
                    if report.progress < row.progress {
                        return Err(SignageError::InvalidProgress {
                            reported: report.progress,
                            recorded: row.progress,
                        });
                    }
                    if report.status != row.status && !row.status.can_transition_to(report.status) {
                        return Err(SignageError::InvalidState(format!(
                            "cannot move rollout from {} to {}",
                            row.status.as_str(),
                            report.status.as_str()
                        )));
                    }

                    if row.started_at.is_none() && report.status != DeviceUpdateStatus::Pending {
                        row.started_at = Some(now);
                    }
                    if report.status.is_terminal() {
                        row.completed_at = Some(now);
                    }
                    row.status = report.status;
                    row.progress = report.progress;
                    row.error = report.error;
                    Ok(row)
                }),
            )
            .await?;

        self.events.publish(GatewayEvent::UpdateProgress {
            device_id,
            update_id,
            status: row.status.as_str().to_string(),
            progress: row.progress,
        });
        Ok(row)
    }

    /// Force a live rollout row into failed after a checksum mismatch.
    async fn fail_pair(
        &self,
        device_id: Uuid,
        update_id: Uuid,
        expected: &str,
        actual: &str,
    ) -> Result<()> {
        let message = format!("checksum mismatch: expected {}, got {}", expected, actual);
        let now = Utc::now();
        let row = self
            .updates
            .with_device_update(
                device_id,
                update_id,
                Box::new(move |current| {
                    let mut row = current.unwrap_or_else(|| DeviceUpdate {
                        id: Uuid::new_v4(),
                        device_id,
                        update_id,
                        status: DeviceUpdateStatus::Pending,
                        progress: 0,
                        error: None,
                        started_at: None,
                        completed_at: None,
                        created_at: now,
                    });
                    if row.status.is_terminal() {
                        return Err(SignageError::InvalidState(format!(
                            "rollout already {} for device {}",
                            row.status.as_str(),
                            device_id
                        )));
                    }
                    row.status = DeviceUpdateStatus::Failed;
                    row.error = Some(message);
                    row.completed_at = Some(now);
                    Ok(row)
                }),
            )
            .await?;

        self.events.publish(GatewayEvent::UpdateProgress {
            device_id,
            update_id,
            status: row.status.as_str().to_string(),
            progress: row.progress,
        });
        Ok(())
    }
}

fn descriptor(update: &SystemUpdate) -> UpdateDescriptor {
    UpdateDescriptor {
        update_id: update.id,
        version: update.version.clone(),
        description: update.description.clone(),
        file_name: update.file_name.clone(),
        checksum: update.checksum.clone(),
        size_bytes: update.size_bytes,
        is_critical: update.is_critical,
        download_path: format!("/api/updates/{}/download", update.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repositories;

    struct Fixture {
        repos: Repositories,
        coordinator: UpdateCoordinator,
    }

    fn fixture() -> Fixture {
        let repos = Repositories::in_memory();
        let coordinator = UpdateCoordinator::new(
            repos.updates.clone(),
            repos.devices.clone(),
            EventBus::default(),
        );
        Fixture { repos, coordinator }
    }

    async fn seed_device(repos: &Repositories, serial: &str, version: &str) -> Device {
        let device = Device {
            id: Uuid::new_v4(),
            name: serial.to_string(),
            serial: serial.to_string(),
            credential_hash: "hash".to_string(),
            ip_address: None,
            registered_at: Utc::now(),
            last_seen: None,
            current_content: None,
            software_version: version.parse().unwrap(),
            group_id: None,
            deleted_at: None,
        };
        repos.devices.insert_device(device.clone()).await.unwrap();
        device
    }

    async fn publish(f: &Fixture, version: &str, checksum: &str) -> SystemUpdate {
        f.coordinator
            .publish_update(
                version.parse().unwrap(),
                None,
                format!("signage-{}.tar.gz", version),
                checksum.to_string(),
                4096,
                false,
            )
            .await
            .unwrap()
    }

    fn report(status: DeviceUpdateStatus, progress: u8) -> UpdateProgressReport {
        UpdateProgressReport {
            status,
            progress,
            artifact_checksum: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn check_updates_returns_strictly_newer_newest_first() {
        let f = fixture();
        let device = seed_device(&f.repos, "RPI-001", "1.2.0").await;
        publish(&f, "1.1.0", "aaa").await;
        publish(&f, "1.2.0", "bbb").await;
        publish(&f, "1.3.0", "ccc").await;
        publish(&f, "2.0.0", "ddd").await;

        let response = f.coordinator.check_updates(&device).await.unwrap();
        let versions: Vec<String> = response
            .updates
            .iter()
            .map(|u| u.version.to_string())
            .collect();
        assert_eq!(versions, vec!["2.0.0", "1.3.0"]);
    }

    #[tokio::test]
    async fn duplicate_version_rejected() {
        let f = fixture();
        publish(&f, "1.0.0", "aaa").await;
        let err = f
            .coordinator
            .publish_update(
                "1.0.0".parse().unwrap(),
                None,
                "again.tar.gz".to_string(),
                "bbb".to_string(),
                10,
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SignageError::Validation(_)));
    }

    #[tokio::test]
    async fn full_rollout_lifecycle() {
        let f = fixture();
        let device = seed_device(&f.repos, "RPI-001", "1.0.0").await;
        let update = publish(&f, "1.1.0", "digest-abc").await;

        let row = f
            .coordinator
            .report_progress(device.id, update.id, report(DeviceUpdateStatus::Downloading, 10))
            .await
            .unwrap();
        assert_eq!(row.status, DeviceUpdateStatus::Downloading);
        assert!(row.started_at.is_some());

        f.coordinator
            .report_progress(device.id, update.id, report(DeviceUpdateStatus::Downloading, 80))
            .await
            .unwrap();

        let mut installing = report(DeviceUpdateStatus::Installing, 90);
        installing.artifact_checksum = Some("digest-abc".to_string());
        f.coordinator
            .report_progress(device.id, update.id, installing)
            .await
            .unwrap();

        let row = f
            .coordinator
            .report_progress(device.id, update.id, report(DeviceUpdateStatus::Completed, 100))
            .await
            .unwrap();
        assert_eq!(row.status, DeviceUpdateStatus::Completed);
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_the_rollout() {
        let f = fixture();
        let device = seed_device(&f.repos, "RPI-001", "1.0.0").await;
        let update = publish(&f, "1.1.0", "digest-abc").await;

        f.coordinator
            .report_progress(device.id, update.id, report(DeviceUpdateStatus::Downloading, 50))
            .await
            .unwrap();

        let mut installing = report(DeviceUpdateStatus::Installing, 60);
        installing.artifact_checksum = Some("digest-wrong".to_string());
        let err = f
            .coordinator
            .report_progress(device.id, update.id, installing)
            .await
            .unwrap_err();
        assert!(matches!(err, SignageError::ChecksumMismatch { .. }));

        let row = f
            .repos
            .updates
            .get_device_update(device.id, update.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, DeviceUpdateStatus::Failed);
        assert!(row.error.as_deref().unwrap().contains("checksum mismatch"));
    }

    #[tokio::test]
    async fn repeated_checksum_mismatch_reports_terminal_state() {
        let f = fixture();
        let device = seed_device(&f.repos, "RPI-001", "1.0.0").await;
        let update = publish(&f, "1.1.0", "digest-abc").await;

        f.coordinator
            .report_progress(device.id, update.id, report(DeviceUpdateStatus::Downloading, 50))
            .await
            .unwrap();

        let bad_installing = || {
            let mut r = report(DeviceUpdateStatus::Installing, 60);
            r.artifact_checksum = Some("digest-wrong".to_string());
            r
        };
        let err = f
            .coordinator
            .report_progress(device.id, update.id, bad_installing())
            .await
            .unwrap_err();
        assert!(matches!(err, SignageError::ChecksumMismatch { .. }));

        // The first mismatch already failed the pair, so the retry is an
        // attempt to touch a terminal row.
        let err = f
            .coordinator
            .report_progress(device.id, update.id, bad_installing())
            .await
            .unwrap_err();
        assert!(matches!(err, SignageError::InvalidState(_)));

        let row = f
            .repos
            .updates
            .get_device_update(device.id, update.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, DeviceUpdateStatus::Failed);
    }

    #[tokio::test]
    async fn progress_never_regresses() {
        let f = fixture();
        let device = seed_device(&f.repos, "RPI-001", "1.0.0").await;
        let update = publish(&f, "1.1.0", "digest").await;

        f.coordinator
            .report_progress(device.id, update.id, report(DeviceUpdateStatus::Downloading, 70))
            .await
            .unwrap();
        let err = f
            .coordinator
            .report_progress(device.id, update.id, report(DeviceUpdateStatus::Downloading, 40))
            .await
            .unwrap_err();
        match err {
            SignageError::InvalidProgress { reported, recorded } => {
                assert_eq!(reported, 40);
                assert_eq!(recorded, 70);
            }
            other => panic!("expected InvalidProgress, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn illegal_transition_rejected() {
        let f = fixture();
        let device = seed_device(&f.repos, "RPI-001", "1.0.0").await;
        let update = publish(&f, "1.1.0", "digest").await;

        // Straight from implicit pending to completed skips two states.
        let err = f
            .coordinator
            .report_progress(device.id, update.id, report(DeviceUpdateStatus::Completed, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, SignageError::InvalidState(_)));
    }

    #[tokio::test]
    async fn terminal_rows_are_never_reused() {
        let f = fixture();
        let device = seed_device(&f.repos, "RPI-001", "1.0.0").await;
        let update = publish(&f, "1.1.0", "digest").await;

        let mut failed = report(DeviceUpdateStatus::Failed, 0);
        failed.error = Some("power loss".to_string());
        f.coordinator
            .report_progress(device.id, update.id, failed)
            .await
            .unwrap();

        let err = f
            .coordinator
            .report_progress(device.id, update.id, report(DeviceUpdateStatus::Downloading, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SignageError::InvalidState(_)));
    }

    #[tokio::test]
    async fn deploy_seeds_only_older_devices_without_rows() {
        let f = fixture();
        let old = seed_device(&f.repos, "RPI-001", "1.0.0").await;
        let _current = seed_device(&f.repos, "RPI-002", "1.1.0").await;
        let update = publish(&f, "1.1.0", "digest").await;

        let seeded = f.coordinator.deploy(update.id).await.unwrap();
        assert_eq!(seeded, 1);
        let row = f
            .repos
            .updates
            .get_device_update(old.id, update.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, DeviceUpdateStatus::Pending);

        // Re-deploying leaves existing rows alone.
        let seeded = f.coordinator.deploy(update.id).await.unwrap();
        assert_eq!(seeded, 0);
    }
}
