//! Task time parsing and validity classification
//!
//! A task is classified against "now" with a grace buffer:
//! - `Future`: scheduled strictly after now (may still be modified)
//! - `Current`: within the buffer window behind now (may execute, not modify)
//! - `Expired`: older than the buffer (kept for audit, never executed)
//!
//! The buffer exists so that upstream latency (spreadsheet edits syncing,
//! media still copying) does not make a task look missed.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::time::DISPLAY_FORMAT;

/// Coarse hour-only spreadsheet format, e.g. `2025-03-17_14`
pub const COARSE_FORMAT: &str = "%Y-%m-%d_%H";

/// The one on-disk directory name format for a task's scheduled time
pub const CANONICAL_DIR_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Default grace buffer in minutes
pub const DEFAULT_BUFFER_MINUTES: u32 = 30;

/// Temporal classification of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Validity {
    Future,
    Current,
    Expired,
}

impl Validity {
    /// Eligible for modification (media/content edits before execution)
    pub fn can_modify(self) -> bool {
        self == Validity::Future
    }

    /// Eligible for execution
    pub fn is_valid(self) -> bool {
        matches!(self, Validity::Future | Validity::Current)
    }
}

/// Classification of a raw spreadsheet time cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Valid {
        scheduled: NaiveDateTime,
        validity: Validity,
    },
    /// Time cell could not be parsed in any supported format
    Invalid(TimeParseError),
}

impl Classification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Classification::Valid { validity, .. } if validity.is_valid())
    }

    pub fn can_modify(&self) -> bool {
        matches!(self, Classification::Valid { validity, .. } if validity.can_modify())
    }
}

/// Unsupported or malformed task time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported time format: {raw:?}")]
pub struct TimeParseError {
    pub raw: String,
}

/// Classify a scheduled time against `now` with a grace buffer
pub fn classify(scheduled: NaiveDateTime, now: NaiveDateTime, buffer_minutes: u32) -> Validity {
    if scheduled > now {
        return Validity::Future;
    }

    let window_start = now - Duration::minutes(i64::from(buffer_minutes));
    if scheduled > window_start {
        Validity::Current
    } else {
        Validity::Expired
    }
}

/// Parse and classify a raw time cell
pub fn classify_str(raw: &str, now: NaiveDateTime, buffer_minutes: u32) -> Classification {
    match parse_task_time(raw) {
        Ok(scheduled) => Classification::Valid {
            scheduled,
            validity: classify(scheduled, now, buffer_minutes),
        },
        Err(e) => Classification::Invalid(e),
    }
}

/// Parse a task time cell.
///
/// Accepts `YYYY-MM-DD HH:MM:SS` first, then the coarse `YYYY-MM-DD_HH`.
/// The first format that parses wins.
pub fn parse_task_time(raw: &str) -> Result<NaiveDateTime, TimeParseError> {
    let trimmed = raw.trim();

    if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, DISPLAY_FORMAT) {
        return Ok(ts);
    }

    parse_coarse(trimmed).ok_or_else(|| TimeParseError {
        raw: raw.to_string(),
    })
}

// chrono refuses to build a time from an hour without minutes, so the coarse
// form is split by hand.
fn parse_coarse(s: &str) -> Option<NaiveDateTime> {
    let (date_part, hour_part) = s.split_once('_')?;
    if hour_part.is_empty() || hour_part.len() > 2 || !hour_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let hour: u32 = hour_part.parse().ok()?;
    date.and_hms_opt(hour, 0, 0)
}

/// Canonical directory name for a scheduled time
///
/// Every producer and consumer of on-disk or on-device task paths goes
/// through this function.
pub fn canonical_dir_name(scheduled: &NaiveDateTime) -> String {
    scheduled.format(CANONICAL_DIR_FORMAT).to_string()
}

/// Inverse of [`canonical_dir_name`]
pub fn parse_canonical_dir_name(name: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(name, CANONICAL_DIR_FORMAT).ok()
}

/// Validity policy configured with a grace buffer
#[derive(Debug, Clone, Copy)]
pub struct ValidityPolicy {
    pub buffer_minutes: u32,
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        Self {
            buffer_minutes: DEFAULT_BUFFER_MINUTES,
        }
    }
}

impl ValidityPolicy {
    pub fn new(buffer_minutes: u32) -> Self {
        Self { buffer_minutes }
    }

    pub fn classify(&self, scheduled: NaiveDateTime, now: NaiveDateTime) -> Validity {
        classify(scheduled, now, self.buffer_minutes)
    }

    pub fn classify_str(&self, raw: &str, now: NaiveDateTime) -> Classification {
        classify_str(raw, now, self.buffer_minutes)
    }
}

/// Task identity: (post label, scheduled time)
///
/// Compares the parsed timestamp, so two spellings of the same time
/// (`2025-03-17_14` and `2025-03-17 14:00:00`) are the same task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub post_label: String,
    pub scheduled: NaiveDateTime,
}

impl TaskKey {
    pub fn new(post_label: impl Into<String>, scheduled: NaiveDateTime) -> Self {
        Self {
            post_label: post_label.into(),
            scheduled,
        }
    }

    /// Canonical directory name of this task
    pub fn dir_name(&self) -> String {
        canonical_dir_name(&self.scheduled)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.post_label, self.scheduled.format(DISPLAY_FORMAT))
    }
}
