//! Spreadsheet collaborator
//!
//! The scheduler only needs two things from the task spreadsheet: read every
//! row, and rewrite a single row's `status` cell. [`TaskSheet`] is that
//! interface; [`XlsxSheet`] is the `.xlsx` implementation and [`MemorySheet`]
//! backs tests.

mod memory;
mod xlsx;

pub use memory::MemorySheet;
pub use xlsx::XlsxSheet;

use postrelay_common::validity::parse_task_time;
use postrelay_common::{Result, TaskKey};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const TIME_COLUMN: &str = "time";
pub const POST_NAME_COLUMN: &str = "postName";
pub const STATUS_COLUMN: &str = "status";

/// One spreadsheet data row, cells keyed by header name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetRow {
    /// Zero-based data row index (header excluded)
    pub index: usize,
    pub cells: BTreeMap<String, String>,
}

impl SheetRow {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            cells: BTreeMap::new(),
        }
    }

    /// Builder-style cell setter
    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.cells.insert(column.to_string(), value.into());
        self
    }

    /// Cell value, empty when the column is absent
    pub fn get(&self, column: &str) -> &str {
        self.cells.get(column).map(String::as_str).unwrap_or("")
    }

    pub fn time(&self) -> &str {
        self.get(TIME_COLUMN)
    }

    pub fn post_name(&self) -> &str {
        self.get(POST_NAME_COLUMN).trim()
    }

    pub fn status(&self) -> &str {
        self.get(STATUS_COLUMN)
    }

    /// Whether `column` holds a real value (not blank, not a `nan` placeholder)
    pub fn has_value(&self, column: &str) -> bool {
        !postrelay_common::status::is_unstarted(self.get(column))
    }

    /// Human spreadsheet row number (1-based, after the header row)
    pub fn display_row(&self) -> usize {
        self.index + 2
    }

    /// Whether this row currently describes `task`
    pub fn matches(&self, task: &TaskKey) -> bool {
        self.post_name() == task.post_label
            && parse_task_time(self.time()).map_or(false, |ts| ts == task.scheduled)
    }
}

/// Index of the first row describing `task`
///
/// Rows move when operators insert or sort, so writers locate their
/// target by key on the rows they are about to rewrite.
pub fn locate_row(rows: &[SheetRow], task: &TaskKey) -> Option<usize> {
    rows.iter().find(|r| r.matches(task)).map(|r| r.index)
}

/// Task spreadsheet storage
///
/// Methods are blocking; async callers go through `spawn_blocking`.
pub trait TaskSheet: Send + Sync {
    /// Read all data rows in sheet order
    fn read_rows(&self) -> Result<Vec<SheetRow>>;

    /// Replace the `status` cell of the row holding `task`, leaving every
    /// other cell intact. `Error::NotFound` when no row holds it any more.
    fn write_status(&self, task: &TaskKey, status: &str) -> Result<()>;

    /// Backing file, when there is one (watched for changes, backed up)
    fn path(&self) -> Option<&Path> {
        None
    }
}
