//! Timestamp utilities
//!
//! Task times in the spreadsheet are wall-clock local times without a zone, so
//! the scheduler works in `NaiveDateTime` throughout.

use chrono::{Local, NaiveDateTime};

/// Display format used for log lines and ledger blocks
pub const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local wall-clock time
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Format a timestamp for logs and the ledger text log
pub fn display(ts: &NaiveDateTime) -> String {
    ts.format(DISPLAY_FORMAT).to_string()
}

/// Convert seconds to duration
pub fn secs_to_duration(secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(secs)
}
