//! Dispatch loop
//!
//! Each tick walks the valid rows in chronological order, transfers what is
//! not yet delivered, writes operator-facing status back to the sheet, and
//! queues early deliveries for publishing at their scheduled time.

use crate::automation::{AutomationResult, Automator};
use crate::services::automation_queue::AutomationQueue;
use crate::services::content_reader::read_content;
use crate::services::ledger::{Ledger, AUTOMATION_FILE};
use crate::services::materializer::Materializer;
use crate::services::sheet_backup::SheetBackup;
use crate::services::source_watcher::{SourceWatcher, TaskRow};
use crate::services::transfer_orchestrator::TransferOrchestrator;
use crate::sheet::TaskSheet;
use chrono::{NaiveDateTime, Utc};
use postrelay_common::events::{EventBus, SchedulerEvent};
use postrelay_common::status::is_success_status;
use postrelay_common::validity::ValidityPolicy;
use postrelay_common::{time, Error, OutcomeCode, TaskKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Rows a transfer was attempted for
    pub processed: usize,
    pub skipped: usize,
    /// Status cells written
    pub written: usize,
    pub enqueued: usize,
    /// Queued posts published this tick
    pub automated: usize,
}

pub struct Dispatcher {
    watcher: Arc<SourceWatcher>,
    orchestrator: Arc<TransferOrchestrator>,
    sheet: Arc<dyn TaskSheet>,
    automator: Arc<dyn Automator>,
    ledger: Ledger,
    policy: ValidityPolicy,
    materializer: Materializer,
    queue: AutomationQueue,
    backup: Option<SheetBackup>,
    event_bus: EventBus,
    events: broadcast::Receiver<SchedulerEvent>,
    tick: Duration,
    media_settle: Duration,
    cancel: CancellationToken,
    /// Statuses written but not yet visible in the snapshot
    written: HashMap<TaskKey, String>,
    /// Media notifications waiting for the folder to settle
    pending_media: HashMap<TaskKey, Instant>,
}

/// Components a [`Dispatcher`] drives
pub struct DispatcherParts {
    pub watcher: Arc<SourceWatcher>,
    pub orchestrator: Arc<TransferOrchestrator>,
    pub sheet: Arc<dyn TaskSheet>,
    pub automator: Arc<dyn Automator>,
    pub policy: ValidityPolicy,
    pub materializer: Materializer,
    pub backup: Option<SheetBackup>,
    pub event_bus: EventBus,
}

impl Dispatcher {
    pub fn new(parts: DispatcherParts, tick: Duration, media_settle: Duration, cancel: CancellationToken) -> Self {
        let events = parts.event_bus.subscribe();
        Self {
            ledger: parts.orchestrator.ledger().clone(),
            watcher: parts.watcher,
            orchestrator: parts.orchestrator,
            sheet: parts.sheet,
            automator: parts.automator,
            policy: parts.policy,
            materializer: parts.materializer,
            queue: AutomationQueue::new(),
            backup: parts.backup,
            event_bus: parts.event_bus,
            events,
            tick,
            media_settle,
            cancel,
            written: HashMap::new(),
            pending_media: HashMap::new(),
        }
    }

    pub fn queue(&self) -> &AutomationQueue {
        &self.queue
    }

    /// Run until cancelled, then stop the watcher
    pub async fn run(mut self) {
        info!(tick_ms = self.tick.as_millis() as u64, "Dispatch loop started");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let summary = self.tick_at(time::now()).await;
                    if summary.processed > 0 || summary.automated > 0 {
                        debug!(?summary, "Tick finished");
                    }
                }
                event = self.events.recv() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Dispatcher lagged behind scheduler events");
                    }
                    Err(RecvError::Closed) => {}
                },
            }
        }

        info!("Dispatch loop stopping");
        self.watcher.stop().await;
    }

    /// One dispatch pass at `now`
    pub async fn tick_at(&mut self, now: NaiveDateTime) -> TickSummary {
        let mut summary = TickSummary::default();
        let rows = self.watcher.get_valid_rows().await;

        // A written status stays authoritative until the snapshot shows it
        self.written.retain(|key, status| {
            rows.iter()
                .any(|r| &r.key == key && r.row.status() != status.as_str())
        });

        let mut backed_up = false;
        for task_row in rows.iter() {
            if self.cancel.is_cancelled() {
                debug!("Cancellation requested, ending tick early");
                break;
            }

            let key = &task_row.key;
            if !self.policy.classify(key.scheduled, now).is_valid() {
                debug!(task = %key, "Task no longer valid");
                summary.skipped += 1;
                continue;
            }

            let current = self.current_status(task_row);
            if is_success_status(&current) {
                summary.skipped += 1;
                continue;
            }

            let report = self
                .orchestrator
                .transfer(&key.post_label, key.scheduled)
                .await;
            summary.processed += 1;

            self.settle_outcome(task_row, &current, report.outcome, now, &mut backed_up, &mut summary)
                .await;
        }

        summary.automated = self.run_due_automation(now).await;
        self.process_settled_media(now, &mut backed_up, &mut summary).await;
        summary
    }

    /// Status the sheet holds for the task, counting writes the snapshot has not caught up with
    fn current_status(&self, task_row: &TaskRow) -> String {
        self.written
            .get(&task_row.key)
            .cloned()
            .unwrap_or_else(|| task_row.row.status().to_string())
    }

    /// Write a transfer outcome back to the sheet and queue the task once delivered
    async fn settle_outcome(
        &mut self,
        task_row: &TaskRow,
        current: &str,
        outcome: OutcomeCode,
        now: NaiveDateTime,
        backed_up: &mut bool,
        summary: &mut TickSummary,
    ) {
        let key = &task_row.key;
        let status = outcome.human();
        if status != current {
            if !*backed_up {
                self.backup_sheet();
                *backed_up = true;
            }
            if self.write_status(key, status).await {
                self.written.insert(key.clone(), status.to_string());
                summary.written += 1;
            }
        }

        if outcome.is_delivered() && self.queue.enqueue(key.clone(), task_row.row.clone(), now) {
            info!(task = %key, "Queued for publishing at scheduled time");
            summary.enqueued += 1;
        }

        self.event_bus.emit_lossy(SchedulerEvent::TaskOutcome {
            task: key.clone(),
            outcome,
            timestamp: Utc::now(),
        });
    }

    /// Publish every queued post whose time has arrived
    pub async fn run_due_automation(&mut self, now: NaiveDateTime) -> usize {
        let due = self.queue.take_due(now);
        let count = due.len();

        for post in due {
            let key = post.key;
            let result = match self.orchestrator.device_serial(&key.post_label) {
                Some(serial) => self.publish(&key, &serial).await,
                None => AutomationResult::failed(OutcomeCode::DeviceNotFound),
            };

            if result.success {
                info!(task = %key, "Post published");
            } else {
                warn!(task = %key, code = %result.code, "Publishing failed");
            }

            if let Err(e) = self
                .ledger
                .record_outcome(&key, AUTOMATION_FILE, result.success, result.code, None)
                .await
            {
                warn!(task = %key, error = %e, "Failed to record publishing outcome");
            }

            self.event_bus.emit_lossy(SchedulerEvent::TaskOutcome {
                task: key,
                outcome: result.code,
                timestamp: Utc::now(),
            });
        }

        count
    }

    /// React to a watcher event between ticks
    pub fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::MediaCreated { task, path, .. } => {
                if self.policy.classify(task.scheduled, time::now()).can_modify() {
                    debug!(task = %task, path = %path.display(), "Media change queued");
                    self.pending_media.insert(task, Instant::now());
                } else {
                    debug!(task = %task, "Ignoring media change for task past its schedule");
                }
            }
            SchedulerEvent::SnapshotChanged { rows, .. } => {
                debug!(rows, "Snapshot changed");
            }
            SchedulerEvent::TaskOutcome { .. } => {}
        }
    }

    async fn publish(&self, key: &TaskKey, serial: &str) -> AutomationResult {
        let dirs = self.materializer.task_dirs(&key.post_label, &key.scheduled);
        let content = read_content(&dirs.content).await;
        let media = self.orchestrator.remote_media_paths(key);

        if !self.automator.connect(serial).await {
            warn!(task = %key, serial, "Automation could not connect to device");
            return AutomationResult::failed(OutcomeCode::AutomationFailed);
        }

        self.automator
            .post_content(serial, &content.title, &content.body, &media)
            .await
    }

    /// Re-transfer tasks whose media folder has been quiet for the settle window
    ///
    /// The outcome is written back like a tick's, so a failed late file
    /// takes the row off success and the next tick retries it.
    async fn process_settled_media(&mut self, now: NaiveDateTime, backed_up: &mut bool, summary: &mut TickSummary) {
        let settle = self.media_settle;
        let settled: Vec<TaskKey> = self
            .pending_media
            .iter()
            .filter(|(_, seen)| seen.elapsed() >= settle)
            .map(|(key, _)| key.clone())
            .collect();
        if settled.is_empty() {
            return;
        }

        let rows = self.watcher.get_valid_rows().await;
        for key in settled {
            self.pending_media.remove(&key);
            if !self.policy.classify(key.scheduled, now).can_modify() {
                continue;
            }
            let report = self.orchestrator.handle_media_created(&key).await;
            info!(
                task = %key,
                outcome = %report.outcome,
                pushed = report.pushed.len(),
                "Media change processed"
            );

            match rows.iter().find(|r| r.key == key) {
                Some(task_row) => {
                    let current = self.current_status(task_row);
                    self.settle_outcome(task_row, &current, report.outcome, now, backed_up, summary)
                        .await;
                }
                None => debug!(task = %key, "Task not in the current snapshot, status left alone"),
            }
        }
    }

    fn backup_sheet(&self) {
        let (Some(backup), Some(path)) = (&self.backup, self.sheet.path()) else {
            return;
        };
        if let Err(e) = backup.create_backup(path) {
            warn!(error = %e, "Spreadsheet backup failed");
        }
    }

    async fn write_status(&self, key: &TaskKey, status: &str) -> bool {
        let sheet = Arc::clone(&self.sheet);
        let task = key.clone();
        let value = status.to_string();
        match tokio::task::spawn_blocking(move || sheet.write_status(&task, &value)).await {
            Ok(Ok(())) => true,
            Ok(Err(Error::NotFound(what))) => {
                warn!(task = %key, status, reason = %what, "Task moved or removed from the sheet, status not written");
                false
            }
            Ok(Err(e)) => {
                error!(task = %key, status, error = %e, "Status write-back failed");
                false
            }
            Err(e) => {
                error!(task = %key, error = %e, "Status write-back task failed");
                false
            }
        }
    }
}
