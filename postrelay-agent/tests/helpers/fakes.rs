//! Recording fakes for the device transport and publishing automation

use async_trait::async_trait;
use postrelay_agent::automation::{AutomationResult, Automator};
use postrelay_agent::transport::{PushResult, Transport};
use postrelay_common::{OutcomeCode, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One recorded push: (serial, local path, remote path)
pub type Push = (String, PathBuf, String);

#[derive(Default)]
pub struct FakeTransport {
    reachable: Mutex<HashSet<String>>,
    failing_files: Mutex<HashSet<String>>,
    pushes: Mutex<Vec<Push>>,
    reachability_checks: AtomicUsize,
}

impl FakeTransport {
    pub fn with_devices(serials: &[&str]) -> Self {
        let transport = Self::default();
        for serial in serials {
            transport.set_reachable(serial, true);
        }
        transport
    }

    pub fn set_reachable(&self, serial: &str, reachable: bool) {
        let mut set = self.reachable.lock().unwrap();
        if reachable {
            set.insert(serial.to_string());
        } else {
            set.remove(serial);
        }
    }

    /// Make pushes of `file_name` fail with TRANSFER_FAILED
    pub fn fail_file(&self, file_name: &str) {
        self.failing_files.lock().unwrap().insert(file_name.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_files.lock().unwrap().clear();
    }

    pub fn pushes(&self) -> Vec<Push> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn pushed_remotes(&self) -> Vec<String> {
        self.pushes().into_iter().map(|(_, _, remote)| remote).collect()
    }

    pub fn reachability_checks(&self) -> usize {
        self.reachability_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn is_reachable(&self, serial: &str) -> bool {
        self.reachability_checks.fetch_add(1, Ordering::SeqCst);
        self.reachable.lock().unwrap().contains(serial)
    }

    async fn push(&self, serial: &str, local: &Path, remote: &str) -> PushResult {
        if !local.is_file() {
            return PushResult::failed(OutcomeCode::SourceNotFound, "missing");
        }

        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.failing_files.lock().unwrap().contains(&name) {
            return PushResult::failed(OutcomeCode::TransferFailed, "injected failure");
        }

        self.pushes
            .lock()
            .unwrap()
            .push((serial.to_string(), local.to_path_buf(), remote.to_string()));
        PushResult::ok()
    }

    async fn list_devices(&self) -> Result<Vec<String>> {
        let mut devices: Vec<String> = self.reachable.lock().unwrap().iter().cloned().collect();
        devices.sort();
        Ok(devices)
    }
}

/// One recorded publish: (serial, title, body, media)
pub type Post = (String, String, String, Vec<String>);

pub struct RecordingAutomator {
    posts: Mutex<Vec<Post>>,
    result: Mutex<AutomationResult>,
    connectable: Mutex<bool>,
}

impl Default for RecordingAutomator {
    fn default() -> Self {
        Self {
            posts: Mutex::new(Vec::new()),
            result: Mutex::new(AutomationResult::success()),
            connectable: Mutex::new(true),
        }
    }
}

impl RecordingAutomator {
    pub fn respond_with(&self, result: AutomationResult) {
        *self.result.lock().unwrap() = result;
    }

    pub fn set_connectable(&self, connectable: bool) {
        *self.connectable.lock().unwrap() = connectable;
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Automator for RecordingAutomator {
    async fn connect(&self, _serial: &str) -> bool {
        *self.connectable.lock().unwrap()
    }

    async fn post_content(
        &self,
        serial: &str,
        title: &str,
        body: &str,
        media: &[String],
    ) -> AutomationResult {
        self.posts.lock().unwrap().push((
            serial.to_string(),
            title.to_string(),
            body.to_string(),
            media.to_vec(),
        ));
        self.result.lock().unwrap().clone()
    }
}
