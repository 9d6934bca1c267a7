//! Deferred automation queue
//!
//! Tasks whose media reached the device ahead of schedule wait here until
//! their scheduled time. Each task key is executed at most once per process.

use crate::sheet::SheetRow;
use chrono::NaiveDateTime;
use postrelay_common::TaskKey;
use std::collections::{BTreeMap, HashSet};

/// A post waiting for its scheduled time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPost {
    pub key: TaskKey,
    pub row: SheetRow,
}

#[derive(Debug, Default)]
pub struct AutomationQueue {
    pending: BTreeMap<TaskKey, QueuedPost>,
    executed: HashSet<TaskKey>,
}

impl AutomationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` if it is still in the future and not seen before
    pub fn enqueue(&mut self, key: TaskKey, row: SheetRow, now: NaiveDateTime) -> bool {
        if key.scheduled <= now || self.executed.contains(&key) || self.pending.contains_key(&key) {
            return false;
        }
        self.pending.insert(key.clone(), QueuedPost { key, row });
        true
    }

    /// Remove and return every post due at `now`, earliest first
    pub fn take_due(&mut self, now: NaiveDateTime) -> Vec<QueuedPost> {
        let due_keys: Vec<TaskKey> = self
            .pending
            .keys()
            .filter(|k| k.scheduled <= now)
            .cloned()
            .collect();

        let mut due: Vec<QueuedPost> = due_keys
            .into_iter()
            .filter_map(|k| {
                self.executed.insert(k.clone());
                self.pending.remove(&k)
            })
            .collect();
        due.sort_by(|a, b| a.key.scheduled.cmp(&b.key.scheduled).then_with(|| a.key.cmp(&b.key)));
        due
    }

    pub fn is_queued(&self, key: &TaskKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn was_executed(&self, key: &TaskKey) -> bool {
        self.executed.contains(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
