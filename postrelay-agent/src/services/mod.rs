//! Scheduler services
//!
//! Bottom-up: ledger, change detection and directory layout feed the
//! transfer orchestrator; the source watcher feeds the dispatcher, which
//! drives the orchestrator and the deferred automation queue.

pub mod automation_queue;
pub mod change_detector;
pub mod content_reader;
pub mod dispatcher;
pub mod ledger;
pub mod materializer;
pub mod sheet_backup;
pub mod source_watcher;
pub mod transfer_orchestrator;

pub use automation_queue::{AutomationQueue, QueuedPost};
pub use change_detector::{ChangeCheck, ChangeDetector};
pub use content_reader::{read_content, PostContent};
pub use dispatcher::{Dispatcher, DispatcherParts, TickSummary};
pub use ledger::{Ledger, LedgerEntry};
pub use materializer::{Materializer, TaskDirs};
pub use sheet_backup::SheetBackup;
pub use source_watcher::{Snapshot, SourceWatcher, TaskRow, WatcherSettings, WatcherState};
pub use transfer_orchestrator::{TransferOrchestrator, TransferReport};
