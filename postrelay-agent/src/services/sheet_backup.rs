//! Spreadsheet backups
//!
//! Copies of the task sheet are taken as `content_backup_YYYYMMDD_HHMMSS.<ext>`
//! before status write-back. Backups older than the retention window are removed.

use chrono::Local;
use postrelay_common::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const BACKUP_PREFIX: &str = "content_backup_";

#[derive(Debug, Clone)]
pub struct SheetBackup {
    dir: PathBuf,
    keep_days: u32,
}

impl SheetBackup {
    pub fn new(dir: impl Into<PathBuf>, keep_days: u32) -> Self {
        Self {
            dir: dir.into(),
            keep_days,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `source` into the backup directory
    pub fn create_backup(&self, source: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("xlsx");
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let target = self.dir.join(format!("{}{}.{}", BACKUP_PREFIX, stamp, ext));

        std::fs::copy(source, &target)?;
        info!(backup = %target.display(), "Spreadsheet backed up");
        Ok(target)
    }

    /// Remove backups whose modification time is older than `keep_days`
    pub fn cleanup_old_backups(&self) -> usize {
        let max_age = Duration::from_secs(u64::from(self.keep_days) * 24 * 60 * 60);
        let now = SystemTime::now();

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "No backup directory to clean");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_backup = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(BACKUP_PREFIX))
                .unwrap_or(false);
            if !is_backup {
                continue;
            }

            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());

            if matches!(age, Some(age) if age > max_age) {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove old backup"),
                }
            }
        }

        if removed > 0 {
            info!(removed, "Old spreadsheet backups removed");
        }
        removed
    }
}
