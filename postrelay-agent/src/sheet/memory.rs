//! In-memory spreadsheet

use super::{locate_row, SheetRow, TaskSheet, STATUS_COLUMN};
use postrelay_common::{Error, Result, TaskKey};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Spreadsheet held in memory, with failure injection for reads
#[derive(Debug, Default)]
pub struct MemorySheet {
    rows: Mutex<Vec<SheetRow>>,
    writes: Mutex<Vec<(usize, String)>>,
    failing_reads: AtomicU32,
    reads: AtomicUsize,
}

impl MemorySheet {
    pub fn new(rows: Vec<SheetRow>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    /// Replace the whole sheet contents
    pub fn set_rows(&self, rows: Vec<SheetRow>) {
        *lock(&self.rows) = rows;
    }

    pub fn rows(&self) -> Vec<SheetRow> {
        lock(&self.rows).clone()
    }

    pub fn row(&self, index: usize) -> Option<SheetRow> {
        lock(&self.rows).iter().find(|r| r.index == index).cloned()
    }

    /// Make the next `n` reads fail as if the file were locked
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every `(row index, status)` written so far
    pub fn writes(&self) -> Vec<(usize, String)> {
        lock(&self.writes).clone()
    }
}

impl TaskSheet for MemorySheet {
    fn read_rows(&self) -> Result<Vec<SheetRow>> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing_reads.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_reads.store(failing - 1, Ordering::SeqCst);
            return Err(Error::Sheet("sheet is locked".to_string()));
        }

        Ok(lock(&self.rows).clone())
    }

    fn write_status(&self, task: &TaskKey, status: &str) -> Result<()> {
        let mut rows = lock(&self.rows);
        let index = locate_row(&rows, task).ok_or_else(|| Error::NotFound(format!("task {}", task)))?;
        let row = rows
            .iter_mut()
            .find(|r| r.index == index)
            .ok_or_else(|| Error::NotFound(format!("row {}", index)))?;
        row.cells.insert(STATUS_COLUMN.to_string(), status.to_string());
        lock(&self.writes).push((index, status.to_string()));
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
