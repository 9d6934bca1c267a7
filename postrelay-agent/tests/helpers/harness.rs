//! Agent wired to an in-memory sheet, fake collaborators and an in-memory ledger

use super::fakes::{FakeTransport, RecordingAutomator};
use chrono::{Duration, NaiveDateTime, Timelike};
use postrelay_agent::db::init_memory_pool;
use postrelay_agent::services::{Materializer, TaskDirs, TransferOrchestrator};
use postrelay_agent::sheet::{MemorySheet, SheetRow};
use postrelay_agent::transport::Transport;
use postrelay_agent::{build_agent, Agent, Collaborators};
use postrelay_common::config::{AppConfig, DeviceConfig};
use postrelay_common::time::{display, now};
use postrelay_common::TaskKey;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const DEVICE_LABEL: &str = "deviceA";
pub const DEVICE_SERIAL: &str = "SER-A";
pub const REMOTE_ROOT: &str = "/sdcard/postrelay";

/// Local time `minutes` from now, truncated to whole seconds
pub fn at_offset(minutes: i64) -> NaiveDateTime {
    (now() + Duration::minutes(minutes)).with_nanosecond(0).unwrap()
}

pub struct Harness {
    pub dir: TempDir,
    pub config: AppConfig,
    pub sheet: Arc<MemorySheet>,
    pub transport: Arc<FakeTransport>,
    pub automator: Arc<RecordingAutomator>,
    pub agent: Agent,
}

impl Harness {
    pub async fn new(rows: Vec<SheetRow>) -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        Self::with_config(dir, config, rows).await
    }

    pub async fn with_config(dir: TempDir, config: AppConfig, rows: Vec<SheetRow>) -> Self {
        let sheet = Arc::new(MemorySheet::new(rows));
        let transport = Arc::new(FakeTransport::with_devices(&[DEVICE_SERIAL]));
        let automator = Arc::new(RecordingAutomator::default());
        let pool = init_memory_pool().await.unwrap();

        let agent = build_agent(
            &config,
            Collaborators {
                sheet: sheet.clone(),
                transport: transport.clone(),
                automator: automator.clone(),
            },
            pool,
        );

        Self {
            dir,
            config,
            sheet,
            transport,
            automator,
            agent,
        }
    }

    pub fn materializer(&self) -> Materializer {
        Materializer::new(&self.config.uploads_root)
    }

    pub fn dirs(&self, key: &TaskKey) -> TaskDirs {
        self.materializer().task_dirs(&key.post_label, &key.scheduled)
    }

    /// Write a media file into the task folder, creating it if needed
    pub fn write_media(&self, key: &TaskKey, name: &str, bytes: &[u8]) -> PathBuf {
        let dirs = self.materializer().materialize(key).unwrap();
        let path = dirs.media.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    /// A second orchestrator sharing the ledger, as after a process restart
    pub fn restarted_orchestrator(&self) -> TransferOrchestrator {
        let transport: Arc<dyn Transport> = self.transport.clone();
        TransferOrchestrator::from_config(&self.config, transport, self.agent.ledger.clone())
    }

    pub fn ledger_log(&self) -> PathBuf {
        self.config.ledger_log_path()
    }
}

/// Configuration rooted at `root` with one reachable device
pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.sheet.path = root.join("content.xlsx");
    config.sheet.read_retries = 1;
    config.sheet.read_retry_delay_secs = 0;
    config.uploads_root = root.join("uploads");
    config.ledger_log = Some(root.join("logs").join("transfer_history.log"));
    config.watcher.cache_ttl_secs = 0;
    config.watcher.debounce_secs = 0;
    config.devices.insert(
        DEVICE_LABEL.to_string(),
        DeviceConfig {
            serial: DEVICE_SERIAL.to_string(),
            remote_path: Some(REMOTE_ROOT.to_string()),
        },
    );
    config
}

/// Sheet row for `label` at `scheduled`
pub fn task_row(index: usize, label: &str, scheduled: &NaiveDateTime) -> SheetRow {
    SheetRow::new(index)
        .with("time", display(scheduled))
        .with("postName", label)
}
