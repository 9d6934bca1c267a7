//! Transfer orchestration
//!
//! Moves one task's media folder to its device:
//!
//! 1. resolve post label to a device and check it is reachable
//! 2. list media files in the task folder
//! 3. skip files already delivered with identical content
//! 4. push the rest, recording every outcome in the ledger
//! 5. write the task-complete sentinel once every file is delivered
//!
//! `transfer` never retries; the dispatch loop calls it again next tick and
//! only outstanding files are re-attempted.

use crate::services::change_detector::{ChangeCheck, ChangeDetector};
use crate::services::ledger::{Ledger, NO_FILE};
use crate::services::materializer::Materializer;
use crate::transport::Transport;
use chrono::NaiveDateTime;
use postrelay_common::config::{AppConfig, DeviceConfig, MediaConfig};
use postrelay_common::{OutcomeCode, TaskKey};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Outcome of one `transfer` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub success: bool,
    pub outcome: OutcomeCode,
    /// Files pushed by this call
    pub pushed: Vec<String>,
    /// Files already delivered earlier
    pub skipped: Vec<String>,
    pub failed: Vec<(String, OutcomeCode)>,
}

impl TransferReport {
    fn outcome(outcome: OutcomeCode) -> Self {
        Self {
            success: outcome.is_delivered(),
            outcome,
            pushed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }
}

struct MediaFile {
    path: PathBuf,
    name: String,
    check: ChangeCheck,
}

pub struct TransferOrchestrator {
    devices: BTreeMap<String, DeviceConfig>,
    transport: Arc<dyn Transport>,
    ledger: Ledger,
    materializer: Materializer,
    media: MediaConfig,
    detector: Arc<ChangeDetector>,
}

impl TransferOrchestrator {
    pub fn new(
        devices: BTreeMap<String, DeviceConfig>,
        transport: Arc<dyn Transport>,
        ledger: Ledger,
        materializer: Materializer,
        media: MediaConfig,
    ) -> Self {
        Self {
            devices,
            transport,
            ledger,
            materializer,
            media,
            detector: Arc::new(ChangeDetector::new()),
        }
    }

    pub fn from_config(config: &AppConfig, transport: Arc<dyn Transport>, ledger: Ledger) -> Self {
        Self::new(
            config.devices.clone(),
            transport,
            ledger,
            Materializer::new(&config.uploads_root),
            config.media.clone(),
        )
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Device serial for a post label
    pub fn device_serial(&self, post_label: &str) -> Option<String> {
        self.devices.get(post_label).map(|d| d.serial.clone())
    }

    /// Device paths the task's current media files are pushed to
    pub fn remote_media_paths(&self, task: &TaskKey) -> Vec<String> {
        let Some(remote) = self.remote_root(&task.post_label) else {
            return Vec::new();
        };
        let dirs = self.materializer.task_dirs(&task.post_label, &task.scheduled);
        list_media(&dirs.media, &self.media)
            .into_iter()
            .map(|(_, name)| remote_path(remote, task, &name))
            .collect()
    }

    /// Transfer media for the task `(post_label, scheduled)`
    pub async fn transfer(&self, post_label: &str, scheduled: NaiveDateTime) -> TransferReport {
        let task = TaskKey::new(post_label, scheduled);

        let Some(device) = self.devices.get(post_label) else {
            warn!(task = %task, "No device mapped to post label");
            return TransferReport::outcome(OutcomeCode::DeviceNotFound);
        };
        let Some(remote) = self.remote_root(post_label) else {
            warn!(task = %task, serial = %device.serial, "Device has no remote path configured");
            return TransferReport::outcome(OutcomeCode::InvalidPath);
        };
        let serial = device.serial.as_str();

        if !self.transport.is_reachable(serial).await {
            let detail = format!("device {} not reachable", serial);
            self.record(&task, NO_FILE, OutcomeCode::DeviceNotConnected, Some(&detail))
                .await;
            return TransferReport::outcome(OutcomeCode::DeviceNotConnected);
        }

        let dirs = self.materializer.task_dirs(post_label, &scheduled);
        if !dirs.media.is_dir() {
            debug!(task = %task, dir = %dirs.media.display(), "Media folder not created yet");
            return TransferReport::outcome(OutcomeCode::WaitingMedia);
        }

        let listed = list_media(&dirs.media, &self.media);
        if listed.is_empty() {
            debug!(task = %task, "Media folder is empty");
            return TransferReport::outcome(OutcomeCode::NoMediaFiles);
        }

        let files = self.check_files(listed).await;
        let any_changed = files.iter().any(|f| f.check.changed);
        if !any_changed && self.ledger.is_task_complete(&task).await {
            debug!(task = %task, files = files.len(), "No changes since last complete transfer");
            let mut report = TransferReport::outcome(OutcomeCode::NoChanges);
            report.skipped = files.into_iter().map(|f| f.name).collect();
            return report;
        }

        let mut report = TransferReport::outcome(OutcomeCode::Success);
        for file in files {
            if self.already_delivered(&task, &file).await {
                report.skipped.push(file.name);
                continue;
            }

            let target = remote_path(remote, &task, &file.name);
            let result = self.transport.push(serial, &file.path, &target).await;

            let hash = if result.success { file.check.hash.as_deref() } else { None };
            if let Err(e) = self
                .ledger
                .record_delivery(&task, &file.name, result.success, result.code, result.detail.as_deref(), hash)
                .await
            {
                warn!(task = %task, file = %file.name, error = %e, "Failed to record delivery");
            }

            if result.success {
                info!(task = %task, file = %file.name, remote = %target, "File delivered");
                report.pushed.push(file.name);
            } else {
                warn!(
                    task = %task,
                    file = %file.name,
                    code = %result.code,
                    detail = result.detail.as_deref().unwrap_or(""),
                    "File push failed"
                );
                self.detector.forget(&file.path);
                report.failed.push((file.name, result.code));
            }
        }

        if report.failed.is_empty() {
            if !report.pushed.is_empty() || !self.ledger.is_task_complete(&task).await {
                if let Err(e) = self.ledger.mark_task_complete(&task).await {
                    warn!(task = %task, error = %e, "Failed to record task completion");
                }
            }
            info!(
                task = %task,
                pushed = report.pushed.len(),
                skipped = report.skipped.len(),
                "Transfer complete"
            );
            return report;
        }

        let delivered = report.pushed.len() + report.skipped.len();
        report.success = false;
        report.outcome = if delivered > 0 {
            OutcomeCode::TransferIncomplete
        } else {
            report
                .failed
                .first()
                .map(|(_, code)| *code)
                .unwrap_or(OutcomeCode::Failed)
        };
        warn!(
            task = %task,
            delivered,
            failed = report.failed.len(),
            outcome = %report.outcome,
            "Transfer incomplete"
        );
        report
    }

    /// Re-transfer after a media file appeared in the task folder
    pub async fn handle_media_created(&self, task: &TaskKey) -> TransferReport {
        self.transfer(&task.post_label, task.scheduled).await
    }

    fn remote_root(&self, post_label: &str) -> Option<&str> {
        self.devices
            .get(post_label)
            .and_then(|d| d.remote_path.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    async fn check_files(&self, listed: Vec<(PathBuf, String)>) -> Vec<MediaFile> {
        let mut files = Vec::with_capacity(listed.len());
        for (path, name) in listed {
            let detector = Arc::clone(&self.detector);
            let probe = path.clone();
            let check = tokio::task::spawn_blocking(move || detector.check(&probe))
                .await
                .unwrap_or(ChangeCheck {
                    changed: true,
                    hash: None,
                });
            files.push(MediaFile { path, name, check });
        }
        files
    }

    async fn already_delivered(&self, task: &TaskKey, file: &MediaFile) -> bool {
        if !file.check.changed {
            return self.ledger.is_file_complete(task, &file.name).await;
        }
        match &file.check.hash {
            Some(hash) => self.ledger.delivered_hash(task, &file.name).await.as_deref() == Some(hash.as_str()),
            None => false,
        }
    }

    async fn record(
        &self,
        task: &TaskKey,
        file_name: &str,
        code: OutcomeCode,
        detail: Option<&str>,
    ) {
        if let Err(e) = self
            .ledger
            .record_outcome(task, file_name, code.is_delivered(), code, detail)
            .await
        {
            warn!(task = %task, error = %e, "Failed to record outcome");
        }
    }
}

/// Media files directly inside `dir`, sorted by name
fn list_media(dir: &Path, media: &MediaConfig) -> Vec<(PathBuf, String)> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && media.is_media(entry.path()))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            Some((entry.into_path(), name))
        })
        .collect()
}

fn remote_path(remote_root: &str, task: &TaskKey, file_name: &str) -> String {
    format!(
        "{}/{}/{}",
        remote_root.trim_end_matches('/'),
        task.dir_name(),
        file_name
    )
}
