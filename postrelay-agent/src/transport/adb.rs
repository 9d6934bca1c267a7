//! Android debug bridge transport
//!
//! Every invocation is a separate `adb` process bounded by the configured
//! command timeout; a hung bridge never blocks the dispatch loop.

use super::{PushResult, Transport};
use async_trait::async_trait;
use postrelay_common::config::TransportConfig;
use postrelay_common::{Error, OutcomeCode, Result};
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct AdbTransport {
    command: String,
    timeout: Duration,
    connect_retries: u32,
    connect_retry_delay: Duration,
}

impl AdbTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            command: config.adb_command.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
            connect_retries: config.connect_retries.max(1),
            connect_retry_delay: Duration::from_secs(config.connect_retry_delay_secs),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(Error::Transport(format!(
                "Failed to run {}: {}",
                self.command, e
            ))),
            Err(_) => Err(Error::Transport(format!(
                "{} {} timed out after {}s",
                self.command,
                args.join(" "),
                self.timeout.as_secs()
            ))),
        }
    }

    /// Query `get-state` up to `connect_retries` times
    pub async fn connect_with_retry(&self, serial: &str) -> bool {
        for attempt in 1..=self.connect_retries {
            match self.run(&["-s", serial, "get-state"]).await {
                Ok(output) if output.status.success() => {
                    let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if state == "device" {
                        if attempt > 1 {
                            info!(serial, attempt, "Device connected after retry");
                        }
                        return true;
                    }
                    debug!(serial, attempt, state = %state, "Device not ready");
                }
                Ok(output) => {
                    debug!(
                        serial,
                        attempt,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "get-state failed"
                    );
                }
                Err(e) => debug!(serial, attempt, error = %e, "get-state failed"),
            }

            if attempt < self.connect_retries {
                tokio::time::sleep(self.connect_retry_delay).await;
            }
        }

        warn!(serial, attempts = self.connect_retries, "Device not reachable");
        false
    }
}

#[async_trait]
impl Transport for AdbTransport {
    async fn is_reachable(&self, serial: &str) -> bool {
        self.connect_with_retry(serial).await
    }

    async fn push(&self, serial: &str, local: &Path, remote: &str) -> PushResult {
        if !local.is_file() {
            return PushResult::failed(
                OutcomeCode::SourceNotFound,
                format!("{} does not exist", local.display()),
            );
        }

        if let Some((parent, _)) = remote.rsplit_once('/') {
            if !parent.is_empty() {
                // Failure here surfaces as a push failure below
                if let Err(e) = self.run(&["-s", serial, "shell", "mkdir", "-p", parent]).await {
                    debug!(serial, dir = parent, error = %e, "Remote mkdir failed");
                }
            }
        }

        let local_arg = local.to_string_lossy();
        match self.run(&["-s", serial, "push", &*local_arg, remote]).await {
            Ok(output) if output.status.success() => {
                debug!(serial, local = %local.display(), remote, "Pushed file");
                PushResult::ok()
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let code = if stderr.contains("not found") {
                    OutcomeCode::DeviceNotFound
                } else {
                    OutcomeCode::TransferFailed
                };
                PushResult::failed(code, stderr)
            }
            Err(e) => PushResult::failed(OutcomeCode::Failed, e.to_string()),
        }
    }

    async fn list_devices(&self) -> Result<Vec<String>> {
        let output = self.run(&["devices"]).await?;
        if !output.status.success() {
            return Err(Error::Transport(format!(
                "adb devices failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `adb devices` output, keeping authorized devices only
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}
