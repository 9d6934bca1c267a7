//! Configuration loading and resolution
//!
//! One [`AppConfig`] is built at startup and handed to each component's
//! constructor. Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config file (`~/.config/postrelay/config.toml`, `/etc/postrelay/config.toml`)
//! 4. Built-in defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "POSTRELAY_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sheet: SheetConfig,
    /// Root of the per-task directory tree
    pub uploads_root: PathBuf,
    /// Ledger database (defaults to `<uploads_root>/logs/transfer_ledger.db`)
    pub ledger_db: Option<PathBuf>,
    /// Human-readable ledger log (defaults to `<uploads_root>/logs/transfer_history.log`)
    pub ledger_log: Option<PathBuf>,
    pub validity: ValidityConfig,
    pub watcher: WatcherConfig,
    pub dispatch: DispatchConfig,
    pub media: MediaConfig,
    /// Post label → device
    pub devices: BTreeMap<String, DeviceConfig>,
    pub transport: TransportConfig,
    pub automation: AutomationConfig,
    pub backup: BackupConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sheet: SheetConfig::default(),
            uploads_root: default_uploads_root(),
            ledger_db: None,
            ledger_log: None,
            validity: ValidityConfig::default(),
            watcher: WatcherConfig::default(),
            dispatch: DispatchConfig::default(),
            media: MediaConfig::default(),
            devices: BTreeMap::new(),
            transport: TransportConfig::default(),
            automation: AutomationConfig::default(),
            backup: BackupConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Spreadsheet source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    pub path: PathBuf,
    /// Columns that must be non-empty for a row to be considered
    pub required_columns: Vec<String>,
    pub read_retries: u32,
    pub read_retry_delay_secs: u64,
    /// How long a write waits for another program to release the file
    pub lock_timeout_secs: u64,
    pub lock_check_interval_secs: u64,
    pub write_retries: u32,
    pub write_retry_delay_secs: u64,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            required_columns: vec!["time".to_string(), "postName".to_string()],
            read_retries: 3,
            read_retry_delay_secs: 1,
            lock_timeout_secs: 300,
            lock_check_interval_secs: 2,
            write_retries: 3,
            write_retry_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidityConfig {
    pub buffer_minutes: u32,
}

impl Default for ValidityConfig {
    fn default() -> Self {
        Self {
            buffer_minutes: crate::validity::DEFAULT_BUFFER_MINUTES,
        }
    }
}

/// Source watcher timings (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub debounce_secs: u64,
    pub poll_interval_secs: u64,
    pub cache_ttl_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 1,
            poll_interval_secs: 60,
            cache_ttl_secs: 2,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub tick_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { tick_secs: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Lowercase file extensions treated as media
    pub extensions: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()],
        }
    }
}

impl MediaConfig {
    pub fn is_media(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
    }
}

/// A target device for one post label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Debug-bridge serial
    pub serial: String,
    /// Base directory on the device, e.g. `/storage/emulated/0/Pictures`
    #[serde(default)]
    pub remote_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub adb_command: String,
    pub command_timeout_secs: u64,
    pub connect_retries: u32,
    pub connect_retry_delay_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            adb_command: "adb".to_string(),
            command_timeout_secs: 60,
            connect_retries: 3,
            connect_retry_delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// External program that performs the on-device publish
    pub command: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Backup directory; backups are disabled when unset
    pub dir: Option<PathBuf>,
    pub keep_days: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: None,
            keep_days: 7,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path (optional, logs to stderr only if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl AppConfig {
    /// Parse a TOML document; missing keys take built-in defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load from an explicit file, or defaults when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Read config {} failed: {}", path.display(), e))
                })?;
                let config = Self::from_toml_str(&content)?;
                tracing::info!(path = %path.display(), "Loaded configuration");
                Ok(config)
            }
            None => {
                tracing::warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject configurations the scheduler cannot run with
    ///
    /// Labels without a device mapping are not errors here; they surface per
    /// task as `DEVICE_NOT_FOUND`.
    pub fn validate(&self) -> Result<()> {
        if self.sheet.path.as_os_str().is_empty() {
            return Err(Error::Config("sheet.path is not set".to_string()));
        }
        if self.dispatch.tick_secs == 0 {
            return Err(Error::Config("dispatch.tick_secs must be > 0".to_string()));
        }
        if self.watcher.poll_interval_secs == 0 {
            return Err(Error::Config(
                "watcher.poll_interval_secs must be > 0".to_string(),
            ));
        }
        if self.media.extensions.is_empty() {
            return Err(Error::Config("media.extensions is empty".to_string()));
        }
        for (label, device) in &self.devices {
            if device.serial.trim().is_empty() {
                return Err(Error::Config(format!(
                    "devices.{} has an empty serial",
                    label
                )));
            }
        }
        Ok(())
    }

    pub fn ledger_db_path(&self) -> PathBuf {
        self.ledger_db
            .clone()
            .unwrap_or_else(|| self.uploads_root.join("logs").join("transfer_ledger.db"))
    }

    pub fn ledger_log_path(&self) -> PathBuf {
        self.ledger_log
            .clone()
            .unwrap_or_else(|| self.uploads_root.join("logs").join("transfer_history.log"))
    }
}

/// Resolve which config file to load, if any
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config file
    default_config_file()
}

fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("postrelay").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/postrelay/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default uploads root
fn default_uploads_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("postrelay").join("uploads"))
        .unwrap_or_else(|| PathBuf::from("./uploads"))
}
