//! Device transport
//!
//! The orchestrator talks to devices through [`Transport`]. [`AdbTransport`]
//! shells out to the Android debug bridge; tests supply their own fakes.

mod adb;

pub use adb::{parse_devices, AdbTransport};

use async_trait::async_trait;
use postrelay_common::{OutcomeCode, Result};
use std::path::Path;

/// Result of pushing one file to a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    pub success: bool,
    pub code: OutcomeCode,
    pub detail: Option<String>,
}

impl PushResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            code: OutcomeCode::Success,
            detail: None,
        }
    }

    pub fn failed(code: OutcomeCode, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            detail: Some(detail.into()),
        }
    }
}

/// File transport to a device identified by serial
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the device answers, after the transport's own bounded retry
    async fn is_reachable(&self, serial: &str) -> bool;

    /// Copy `local` to `remote` (a full device path, file name included)
    async fn push(&self, serial: &str, local: &Path, remote: &str) -> PushResult;

    /// Serials of attached, authorized devices
    async fn list_devices(&self) -> Result<Vec<String>>;
}
