//! Spreadsheet source watcher
//!
//! Keeps a TTL-bounded snapshot of the valid task rows. Three triggers force
//! a re-check through [`SourceWatcher::force_refresh`]: filesystem
//! notifications on the sheet (debounced), a poll timer, and startup.
//!
//! The uploads tree is also watched so that media files dropped into a task
//! folder are broadcast as [`SchedulerEvent::MediaCreated`].

use crate::services::materializer::{parse_media_path, Materializer};
use crate::sheet::{SheetRow, TaskSheet};
use crate::utils::retry_fixed;
use chrono::Utc;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use postrelay_common::config::{AppConfig, MediaConfig, SheetConfig, WatcherConfig};
use postrelay_common::events::{EventBus, SchedulerEvent};
use postrelay_common::validity::{Classification, Validity, ValidityPolicy};
use postrelay_common::{time, Error, Result, TaskKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A valid spreadsheet row with its parsed task identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRow {
    pub row: SheetRow,
    pub key: TaskKey,
    /// Classification at snapshot time
    pub validity: Validity,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub rows: Arc<Vec<TaskRow>>,
    pub fingerprint: String,
    pub taken_at: Instant,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            rows: Arc::new(Vec::new()),
            fingerprint: String::new(),
            taken_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// No snapshot taken yet
    Idle,
    Checking,
    Cached,
}

/// Settings the watcher takes from [`AppConfig`]
#[derive(Debug, Clone, Default)]
pub struct WatcherSettings {
    pub sheet: SheetConfig,
    pub watcher: WatcherConfig,
    pub media: MediaConfig,
}

impl From<&AppConfig> for WatcherSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            sheet: config.sheet.clone(),
            watcher: config.watcher.clone(),
            media: config.media.clone(),
        }
    }
}

enum WatchSignal {
    SheetChanged,
    Media(PathBuf),
}

pub struct SourceWatcher {
    sheet: Arc<dyn TaskSheet>,
    materializer: Materializer,
    policy: ValidityPolicy,
    settings: WatcherSettings,
    event_bus: EventBus,
    cache: tokio::sync::Mutex<Option<Snapshot>>,
    state: Mutex<WatcherState>,
    force_pending: AtomicBool,
    last_notification: Mutex<Option<Instant>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    fs_watcher: Mutex<Option<RecommendedWatcher>>,
}

impl SourceWatcher {
    pub fn new(
        sheet: Arc<dyn TaskSheet>,
        materializer: Materializer,
        policy: ValidityPolicy,
        settings: WatcherSettings,
        event_bus: EventBus,
    ) -> Self {
        Self {
            sheet,
            materializer,
            policy,
            settings,
            event_bus,
            cache: tokio::sync::Mutex::new(None),
            state: Mutex::new(WatcherState::Idle),
            force_pending: AtomicBool::new(false),
            last_notification: Mutex::new(None),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            fs_watcher: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WatcherState {
        *lock(&self.state)
    }

    /// Whether a notification asked for a re-check that has not run yet
    pub fn is_refresh_pending(&self) -> bool {
        self.force_pending.load(Ordering::SeqCst)
    }

    /// Valid rows, re-reading the sheet when the cache is stale or invalidated
    pub async fn get_valid_rows(&self) -> Arc<Vec<TaskRow>> {
        {
            let cache = self.cache.lock().await;
            if let Some(snapshot) = cache.as_ref() {
                let fresh = snapshot.taken_at.elapsed() < self.settings.watcher.cache_ttl();
                if fresh && !self.is_refresh_pending() {
                    return Arc::clone(&snapshot.rows);
                }
            }
        }

        let force = self.force_pending.swap(false, Ordering::SeqCst);
        self.refresh(force).await.rows
    }

    /// Invalidate the cache and re-check the sheet now
    pub async fn force_refresh(&self) -> Snapshot {
        self.force_pending.store(false, Ordering::SeqCst);
        self.refresh(true).await
    }

    /// Read, filter and fingerprint the sheet
    ///
    /// The snapshot is replaced (and FUTURE task directories materialized)
    /// when the fingerprint changed or `force` is set. Read failures return
    /// the last known-good snapshot.
    pub async fn refresh(&self, force: bool) -> Snapshot {
        let mut cache = self.cache.lock().await;
        self.set_state(WatcherState::Checking);

        let rows = match self.read_with_retry().await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Spreadsheet read failed, keeping last snapshot");
                let snapshot = cache.clone();
                self.set_state(if snapshot.is_some() {
                    WatcherState::Cached
                } else {
                    WatcherState::Idle
                });
                return snapshot.unwrap_or_else(Snapshot::empty);
            }
        };

        let (valid, rejected) = self.filter_rows(rows, time::now());
        let fingerprint = fingerprint(&valid);
        let changed = cache
            .as_ref()
            .map(|s| s.fingerprint != fingerprint)
            .unwrap_or(true);

        if !changed && !force {
            if let Some(snapshot) = cache.as_mut() {
                snapshot.taken_at = Instant::now();
                self.set_state(WatcherState::Cached);
                return snapshot.clone();
            }
        }

        if changed {
            for reason in &rejected {
                warn!("Skipping spreadsheet {}", reason);
            }
        }

        for task in valid.iter().filter(|t| t.validity.can_modify()) {
            if let Err(e) = self.materializer.materialize(&task.key) {
                warn!(task = %task.key, error = %e, "Failed to materialize task directory");
            }
        }

        let snapshot = Snapshot {
            rows: Arc::new(valid),
            fingerprint: fingerprint.clone(),
            taken_at: Instant::now(),
        };
        *cache = Some(snapshot.clone());
        self.set_state(WatcherState::Cached);

        info!(
            rows = snapshot.rows.len(),
            rejected = rejected.len(),
            changed,
            "Spreadsheet snapshot updated"
        );
        self.event_bus.emit_lossy(SchedulerEvent::SnapshotChanged {
            rows: snapshot.rows.len(),
            fingerprint,
            timestamp: Utc::now(),
        });

        snapshot
    }

    /// Sheet notification with leading-edge debounce
    ///
    /// The first notification re-checks at once; further notifications
    /// inside the debounce window only mark the cache invalid, so the next
    /// `get_valid_rows` picks up the final state.
    pub async fn notify_sheet_changed(&self) {
        let now = Instant::now();
        let debounce = self.settings.watcher.debounce();
        let within_window = {
            let mut last = lock(&self.last_notification);
            let within = last
                .map(|t| now.duration_since(t) < debounce)
                .unwrap_or(false);
            if !within {
                *last = Some(now);
            }
            within
        };

        if within_window {
            debug!("Spreadsheet notification debounced");
            self.force_pending.store(true, Ordering::SeqCst);
        } else {
            debug!("Spreadsheet changed, re-checking");
            self.force_refresh().await;
        }
    }

    /// Broadcast a media file landing in a task folder
    pub fn notify_media_created(&self, path: &Path) {
        match parse_media_path(self.materializer.uploads_root(), path) {
            Some(task) => {
                debug!(task = %task, path = %path.display(), "Media file created");
                self.event_bus.emit_lossy(SchedulerEvent::MediaCreated {
                    task,
                    path: path.to_path_buf(),
                    timestamp: Utc::now(),
                });
            }
            None => debug!(path = %path.display(), "Ignoring file outside task media folders"),
        }
    }

    /// Start notification and poll tasks, then take the initial snapshot
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<WatchSignal>(256);

        let sheet_path = self.sheet.path().map(Path::to_path_buf);
        let sheet_name = sheet_path
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_os_string());
        let uploads_root = self.materializer.uploads_root().to_path_buf();
        let media = self.settings.media.clone();
        let root_for_events = uploads_root.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Filesystem watch error");
                        return;
                    }
                };

                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }

                let touches_sheet = sheet_name.as_ref().is_some_and(|name| {
                    event.paths.iter().any(|p| p.file_name() == Some(name.as_os_str()))
                });
                if touches_sheet {
                    let _ = tx.try_send(WatchSignal::SheetChanged);
                    return;
                }

                let media_event = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_))
                );
                if media_event {
                    for path in &event.paths {
                        if path.starts_with(&root_for_events) && media.is_media(path) {
                            let _ = tx.try_send(WatchSignal::Media(path.clone()));
                        }
                    }
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| Error::Internal(format!("Failed to create filesystem watcher: {}", e)))?;

        if let Some(dir) = sheet_path.as_deref().and_then(Path::parent) {
            let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                warn!(dir = %dir.display(), error = %e, "Cannot watch spreadsheet directory, relying on polling");
            }
        }

        std::fs::create_dir_all(&uploads_root)?;
        if let Err(e) = watcher.watch(&uploads_root, RecursiveMode::Recursive) {
            warn!(dir = %uploads_root.display(), error = %e, "Cannot watch uploads directory");
        }
        *lock(&self.fs_watcher) = Some(watcher);

        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let consumer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    signal = rx.recv() => match signal {
                        Some(WatchSignal::SheetChanged) => this.notify_sheet_changed().await,
                        Some(WatchSignal::Media(path)) => this.notify_media_created(&path),
                        None => break,
                    },
                }
            }
            debug!("Notification consumer stopped");
        });

        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let poll_interval = self.settings.watcher.poll_interval();
        let poller = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick fires immediately; startup already refreshes
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        debug!("Poll timer re-checking spreadsheet");
                        this.force_refresh().await;
                    }
                }
            }
            debug!("Poll timer stopped");
        });

        lock(&self.tasks).extend([consumer, poller]);

        info!(
            sheet = ?sheet_path,
            uploads = %uploads_root.display(),
            poll_secs = poll_interval.as_secs(),
            "Source watcher started"
        );

        self.force_refresh().await;
        Ok(())
    }

    /// Cancel auxiliary tasks and wait for them to finish
    pub async fn stop(&self) {
        self.cancel.cancel();
        lock(&self.fs_watcher).take();

        let handles: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Watcher task ended abnormally");
            }
        }
        info!("Source watcher stopped");
    }

    async fn read_with_retry(&self) -> Result<Vec<SheetRow>> {
        let attempts = self.settings.sheet.read_retries;
        let delay = Duration::from_secs(self.settings.sheet.read_retry_delay_secs);

        retry_fixed("sheet_read", attempts, delay, || {
            let sheet = Arc::clone(&self.sheet);
            async move {
                tokio::task::spawn_blocking(move || sheet.read_rows())
                    .await
                    .map_err(|e| Error::Internal(format!("Sheet read task failed: {}", e)))
                    .and_then(|rows| rows)
            }
        })
        .await
    }

    /// Split rows into valid task rows (chronological) and rejection reasons
    fn filter_rows(&self, rows: Vec<SheetRow>, now: chrono::NaiveDateTime) -> (Vec<TaskRow>, Vec<String>) {
        let mut valid = Vec::new();
        let mut rejected = Vec::new();

        for row in rows {
            let missing: Vec<&str> = self
                .settings
                .sheet
                .required_columns
                .iter()
                .map(String::as_str)
                .filter(|c| !row.has_value(c))
                .collect();
            if !missing.is_empty() {
                // Fully blank rows are spreadsheet padding
                if row.cells.values().any(|v| !v.trim().is_empty()) {
                    rejected.push(format!(
                        "row {}: missing required field(s) {}",
                        row.display_row(),
                        missing.join(", ")
                    ));
                }
                continue;
            }

            match self.policy.classify_str(row.time(), now) {
                Classification::Valid { scheduled, validity } if validity.is_valid() => {
                    valid.push(TaskRow {
                        key: TaskKey::new(row.post_name(), scheduled),
                        validity,
                        row,
                    });
                }
                Classification::Valid { .. } => {
                    debug!(row = row.display_row(), "Row expired");
                }
                Classification::Invalid(e) => {
                    rejected.push(format!("row {}: {}", row.display_row(), e));
                }
            }
        }

        valid.sort_by(|a, b| {
            a.key
                .scheduled
                .cmp(&b.key.scheduled)
                .then(a.row.index.cmp(&b.row.index))
        });
        (valid, rejected)
    }

    fn set_state(&self, state: WatcherState) {
        *lock(&self.state) = state;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// SHA-256 over the serialized row contents
fn fingerprint(rows: &[TaskRow]) -> String {
    let cells: Vec<&SheetRow> = rows.iter().map(|r| &r.row).collect();
    let bytes = serde_json::to_vec(&cells).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::MemorySheet;
    use chrono::Duration as ChronoDuration;
    use postrelay_common::time::display;
    use tempfile::TempDir;

    fn row(index: usize, time: &str, label: &str) -> SheetRow {
        SheetRow::new(index).with("time", time).with("postName", label)
    }

    fn watcher(sheet: Arc<MemorySheet>, root: &Path) -> SourceWatcher {
        let settings = WatcherSettings {
            sheet: SheetConfig {
                read_retries: 2,
                read_retry_delay_secs: 0,
                ..SheetConfig::default()
            },
            ..WatcherSettings::default()
        };
        SourceWatcher::new(
            sheet,
            Materializer::new(root),
            ValidityPolicy::default(),
            settings,
            EventBus::new(16),
        )
    }

    #[test]
    fn test_fingerprint_tracks_row_contents() {
        let a = vec![TaskRow {
            row: row(0, "2030-01-01 10:00:00", "A"),
            key: TaskKey::new("A", chrono::NaiveDateTime::default()),
            validity: Validity::Future,
        }];
        let mut b = a.clone();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        b[0].row = b[0].row.clone().with("status", "执行成功");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[tokio::test]
    async fn test_filter_sorts_and_rejects() {
        let dir = TempDir::new().unwrap();
        let now = time::now();
        let later = display(&(now + ChronoDuration::hours(2)));
        let sooner = display(&(now + ChronoDuration::hours(1)));
        let old = display(&(now - ChronoDuration::days(2)));

        let sheet = Arc::new(MemorySheet::new(vec![
            row(0, &later, "A"),
            row(1, "tomorrow-ish", "B"),
            row(2, &sooner, "C"),
            row(3, &old, "D"),
            row(4, &sooner, ""),
            SheetRow::new(5),
        ]));
        let w = watcher(sheet, dir.path());
        let (valid, rejected) = w.filter_rows(w.sheet.read_rows().unwrap(), now);

        let labels: Vec<&str> = valid.iter().map(|r| r.key.post_label.as_str()).collect();
        assert_eq!(labels, vec!["C", "A"]);
        assert_eq!(rejected.len(), 2);
        assert!(rejected[0].contains("row 3"));
        assert!(rejected[1].contains("row 6"));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let dir = TempDir::new().unwrap();
        let sheet = Arc::new(MemorySheet::default());
        let w = watcher(sheet, dir.path());

        assert_eq!(w.state(), WatcherState::Idle);
        w.force_refresh().await;
        assert_eq!(w.state(), WatcherState::Cached);
    }
}
