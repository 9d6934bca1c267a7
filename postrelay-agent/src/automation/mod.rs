//! On-device publishing automation
//!
//! Once a task's media is on the device and its scheduled time arrives, an
//! [`Automator`] drives the device to publish the post.

use async_trait::async_trait;
use postrelay_common::config::AutomationConfig;
use postrelay_common::OutcomeCode;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Result of one publishing run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationResult {
    pub success: bool,
    pub code: OutcomeCode,
}

impl AutomationResult {
    pub fn success() -> Self {
        Self {
            success: true,
            code: OutcomeCode::Success,
        }
    }

    pub fn failed(code: OutcomeCode) -> Self {
        Self {
            success: false,
            code,
        }
    }
}

#[async_trait]
pub trait Automator: Send + Sync {
    /// Attach to the device; `false` aborts the publishing run
    async fn connect(&self, serial: &str) -> bool;

    /// Publish a post using media already on the device
    async fn post_content(
        &self,
        serial: &str,
        title: &str,
        body: &str,
        media: &[String],
    ) -> AutomationResult;
}

/// Failure codes an automation program may report
fn is_automation_code(code: OutcomeCode) -> bool {
    matches!(
        code,
        OutcomeCode::AutomationFailed
            | OutcomeCode::NoImagesSelected
            | OutcomeCode::FolderNotFound
            | OutcomeCode::NextButtonNotFound
            | OutcomeCode::SelectAlbumFailed
    )
}

/// Failure code from the last non-empty stdout line, else `AUTOMATION_FAILED`
pub fn parse_failure_code(stdout: &str) -> OutcomeCode {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| OutcomeCode::from_str(line).ok())
        .filter(|code| is_automation_code(*code))
        .unwrap_or(OutcomeCode::AutomationFailed)
}

/// Runs an external automation program
///
/// Invoked as `<program> connect <serial>` and
/// `<program> post <serial> --title <t> --body <b> [media...]`.
pub struct CommandAutomator {
    program: PathBuf,
    timeout: Duration,
}

impl CommandAutomator {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Option<std::process::Output> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Some(output),
            Ok(Err(e)) => {
                warn!(program = %self.program.display(), error = %e, "Automation program failed to start");
                None
            }
            Err(_) => {
                warn!(program = %self.program.display(), timeout_secs = self.timeout.as_secs(), "Automation program timed out");
                None
            }
        }
    }
}

#[async_trait]
impl Automator for CommandAutomator {
    async fn connect(&self, serial: &str) -> bool {
        self.run(&["connect", serial])
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    async fn post_content(
        &self,
        serial: &str,
        title: &str,
        body: &str,
        media: &[String],
    ) -> AutomationResult {
        let mut args = vec!["post", serial, "--title", title, "--body", body];
        args.extend(media.iter().map(String::as_str));

        match self.run(&args).await {
            Some(output) if output.status.success() => AutomationResult::success(),
            Some(output) => {
                AutomationResult::failed(parse_failure_code(&String::from_utf8_lossy(&output.stdout)))
            }
            None => AutomationResult::failed(OutcomeCode::AutomationFailed),
        }
    }
}

/// Automator used when no program is configured
#[derive(Debug, Default)]
pub struct NoopAutomator;

#[async_trait]
impl Automator for NoopAutomator {
    async fn connect(&self, _serial: &str) -> bool {
        true
    }

    async fn post_content(
        &self,
        serial: &str,
        title: &str,
        _body: &str,
        media: &[String],
    ) -> AutomationResult {
        info!(serial, title, media = media.len(), "No automation configured, skipping publish");
        AutomationResult::success()
    }
}

/// Automator for the configured program, or [`NoopAutomator`]
pub fn from_config(config: &AutomationConfig) -> Arc<dyn Automator> {
    match &config.command {
        Some(program) => Arc::new(CommandAutomator::new(
            program.clone(),
            Duration::from_secs(config.timeout_secs),
        )),
        None => Arc::new(NoopAutomator),
    }
}
