//! Component wiring
//!
//! [`build_agent`] assembles the watcher, orchestrator and dispatcher from
//! configuration plus the three external collaborators. Tests pass fakes
//! through [`Collaborators`]; the binary uses [`Collaborators::from_config`].

use crate::automation::{self, Automator};
use crate::db::init_database_pool;
use crate::services::{
    Dispatcher, DispatcherParts, Ledger, Materializer, SheetBackup, SourceWatcher,
    TransferOrchestrator, WatcherSettings,
};
use crate::sheet::{TaskSheet, XlsxSheet};
use crate::transport::{AdbTransport, Transport};
use postrelay_common::config::AppConfig;
use postrelay_common::events::EventBus;
use postrelay_common::validity::ValidityPolicy;
use postrelay_common::Result;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const EVENT_BUS_CAPACITY: usize = 256;

/// External systems the scheduler talks to
pub struct Collaborators {
    pub sheet: Arc<dyn TaskSheet>,
    pub transport: Arc<dyn Transport>,
    pub automator: Arc<dyn Automator>,
}

impl Collaborators {
    /// `.xlsx` sheet, `adb` transport and the configured automation program
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sheet: Arc::new(XlsxSheet::new(config.sheet.path.clone(), config.sheet.clone())),
            transport: Arc::new(AdbTransport::new(&config.transport)),
            automator: automation::from_config(&config.automation),
        }
    }
}

/// A fully wired scheduler
pub struct Agent {
    pub dispatcher: Dispatcher,
    pub watcher: Arc<SourceWatcher>,
    pub orchestrator: Arc<TransferOrchestrator>,
    pub transport: Arc<dyn Transport>,
    pub ledger: Ledger,
    pub backup: Option<SheetBackup>,
    pub event_bus: EventBus,
    pub cancel: CancellationToken,
}

pub fn build_agent(config: &AppConfig, collaborators: Collaborators, pool: SqlitePool) -> Agent {
    let Collaborators {
        sheet,
        transport,
        automator,
    } = collaborators;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let cancel = CancellationToken::new();
    let policy = ValidityPolicy::new(config.validity.buffer_minutes);
    let materializer = Materializer::new(&config.uploads_root);
    let ledger = Ledger::new(pool, Some(config.ledger_log_path()));

    let backup = sheet.path().and_then(|path| {
        let dir = config
            .backup
            .dir
            .clone()
            .or_else(|| path.parent().map(|p| p.join("backup")))?;
        Some(SheetBackup::new(dir, config.backup.keep_days))
    });

    let watcher = Arc::new(SourceWatcher::new(
        Arc::clone(&sheet),
        materializer.clone(),
        policy,
        WatcherSettings::from(config),
        event_bus.clone(),
    ));

    let orchestrator = Arc::new(TransferOrchestrator::from_config(
        config,
        Arc::clone(&transport),
        ledger.clone(),
    ));

    let dispatcher = Dispatcher::new(
        DispatcherParts {
            watcher: Arc::clone(&watcher),
            orchestrator: Arc::clone(&orchestrator),
            sheet,
            automator,
            policy,
            materializer,
            backup: backup.clone(),
            event_bus: event_bus.clone(),
        },
        Duration::from_secs(config.dispatch.tick_secs),
        config.watcher.debounce(),
        cancel.clone(),
    );

    Agent {
        dispatcher,
        watcher,
        orchestrator,
        transport,
        ledger,
        backup,
        event_bus,
        cancel,
    }
}

/// Open the ledger database and wire the production collaborators
pub async fn build_from_config(config: &AppConfig) -> Result<Agent> {
    let pool = init_database_pool(&config.ledger_db_path()).await?;
    Ok(build_agent(config, Collaborators::from_config(config), pool))
}

impl Agent {
    /// Startup housekeeping: log attached devices, back up the sheet
    pub async fn prepare(&self, sheet_path: &Path) {
        match self.transport.list_devices().await {
            Ok(devices) if devices.is_empty() => tracing::warn!("No devices attached"),
            Ok(devices) => tracing::info!(devices = ?devices, "Attached devices"),
            Err(e) => tracing::warn!(error = %e, "Could not list devices"),
        }

        if let Some(backup) = &self.backup {
            if sheet_path.is_file() {
                if let Err(e) = backup.create_backup(sheet_path) {
                    tracing::warn!(error = %e, "Startup backup failed");
                }
            }
            backup.cleanup_old_backups();
        }
    }
}
