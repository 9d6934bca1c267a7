//! Event types and broadcast bus
//!
//! The source watcher publishes snapshot changes and media-file creations
//! here; the dispatcher (and tests) subscribe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::status::OutcomeCode;
use crate::validity::TaskKey;

/// Events emitted by postrelay components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SchedulerEvent {
    /// The valid-row snapshot was replaced
    SnapshotChanged {
        rows: usize,
        fingerprint: String,
        timestamp: DateTime<Utc>,
    },

    /// A media file appeared under a task's media folder
    MediaCreated {
        task: TaskKey,
        path: PathBuf,
        timestamp: DateTime<Utc>,
    },

    /// A dispatch tick produced an outcome for a task
    TaskOutcome {
        task: TaskKey,
        outcome: OutcomeCode,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`SchedulerEvent`]
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SchedulerEvent,
    ) -> Result<usize, broadcast::error::SendError<SchedulerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SchedulerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn key() -> TaskKey {
        let ts = NaiveDate::from_ymd_opt(2025, 3, 17)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        TaskKey::new("deviceA", ts)
    }

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit(SchedulerEvent::MediaCreated {
            task: key(),
            path: PathBuf::from("/tmp/a.jpg"),
            timestamp: Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            SchedulerEvent::MediaCreated { task, .. } => assert_eq!(task, key()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_errors_but_lossy_does_not() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus
            .emit(SchedulerEvent::SnapshotChanged {
                rows: 0,
                fingerprint: String::new(),
                timestamp: Utc::now(),
            })
            .is_err());
        bus.emit_lossy(SchedulerEvent::SnapshotChanged {
            rows: 0,
            fingerprint: String::new(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.capacity(), 4);
    }
}
