//! `.xlsx` spreadsheet backend
//!
//! Reads the first worksheet with calamine. Status writes rebuild the sheet
//! with rust_xlsxwriter into `<file>.temp.xlsx` and rename it over the
//! original, after waiting (bounded) for other programs to release the file.

use super::{locate_row, SheetRow, TaskSheet, STATUS_COLUMN};
use calamine::{open_workbook_auto, Data, Reader};
use postrelay_common::config::SheetConfig;
use postrelay_common::time::DISPLAY_FORMAT;
use postrelay_common::{Error, Result, TaskKey};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Cell value preserved across a rewrite
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Bool(*b),
            // Excel dates are stored as serial numbers; keep them as the
            // full display string so the time column stays parseable.
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(ts) => Cell::Text(ts.format(DISPLAY_FORMAT).to_string()),
                None => Cell::Number(dt.as_f64()),
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.replace('T', " ")),
        }
    }

    fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
            Cell::Bool(b) => b.to_string(),
        }
    }
}

/// Worksheet contents: header row first
#[derive(Debug, Clone)]
struct Grid {
    sheet_name: String,
    rows: Vec<Vec<Cell>>,
}

impl Grid {
    fn headers(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|r| r.iter().map(|c| c.as_text().trim().to_string()).collect())
            .unwrap_or_default()
    }

    fn data_rows(&self) -> Vec<SheetRow> {
        let headers = self.headers();

        self.rows
            .iter()
            .skip(1)
            .enumerate()
            .map(|(index, cells)| {
                let mut map = BTreeMap::new();
                for (col, header) in headers.iter().enumerate() {
                    if header.is_empty() {
                        continue;
                    }
                    let value = cells.get(col).map(Cell::as_text).unwrap_or_default();
                    map.insert(header.clone(), value);
                }
                SheetRow { index, cells: map }
            })
            .collect()
    }

    fn set_status(&mut self, index: usize, status: &str) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::Sheet("sheet has no header row".to_string()));
        }

        let col = match self.headers().iter().position(|h| h == STATUS_COLUMN) {
            Some(col) => col,
            None => {
                self.rows[0].push(Cell::Text(STATUS_COLUMN.to_string()));
                self.rows[0].len() - 1
            }
        };

        let row = self
            .rows
            .get_mut(index + 1)
            .ok_or_else(|| Error::NotFound(format!("sheet row {}", index)))?;
        if row.len() <= col {
            row.resize(col + 1, Cell::Empty);
        }
        row[col] = Cell::Text(status.to_string());
        Ok(())
    }
}

/// Task spreadsheet stored as an `.xlsx` workbook
pub struct XlsxSheet {
    path: PathBuf,
    config: SheetConfig,
}

impl XlsxSheet {
    pub fn new(path: impl Into<PathBuf>, config: SheetConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    fn load_grid(&self) -> Result<Grid> {
        let mut workbook = open_workbook_auto(&self.path).map_err(|e| {
            Error::Sheet(format!("Failed to open {}: {}", self.path.display(), e))
        })?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .unwrap_or_else(|| "Sheet1".to_string());

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| Error::Sheet(format!("{} has no worksheets", self.path.display())))?
            .map_err(|e| Error::Sheet(format!("Failed to read {}: {}", self.path.display(), e)))?;

        let rows = range
            .rows()
            .map(|r| r.iter().map(Cell::from_data).collect())
            .collect();

        Ok(Grid { sheet_name, rows })
    }

    fn save_grid(&self, grid: &Grid) -> Result<()> {
        let temp = temp_path(&self.path);

        let result = (|| -> std::result::Result<(), rust_xlsxwriter::XlsxError> {
            let mut workbook = rust_xlsxwriter::Workbook::new();
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&grid.sheet_name)?;

            for (r, row) in grid.rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    let (r, c) = (r as u32, c as u16);
                    match cell {
                        Cell::Empty => {}
                        Cell::Text(s) => {
                            worksheet.write_string(r, c, s)?;
                        }
                        Cell::Number(n) => {
                            worksheet.write_number(r, c, *n)?;
                        }
                        Cell::Bool(b) => {
                            worksheet.write_boolean(r, c, *b)?;
                        }
                    }
                }
            }

            workbook.save(&temp)
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp);
            return Err(Error::Sheet(format!("Failed to write {}: {}", temp.display(), e)));
        }

        if let Err(e) = std::fs::rename(&temp, &self.path) {
            let _ = std::fs::remove_file(&temp);
            return Err(Error::Io(e));
        }

        Ok(())
    }

    /// Poll until the file can be opened for writing, or `deadline` passes
    fn wait_for_unlock(&self, deadline: Instant) -> bool {
        let interval = Duration::from_secs(self.config.lock_check_interval_secs.max(1));

        loop {
            if !is_locked(&self.path) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                error!(path = %self.path.display(), "Timed out waiting for spreadsheet lock");
                return false;
            }
            debug!(path = %self.path.display(), "Spreadsheet is locked, waiting");
            std::thread::sleep(interval.min(deadline - now));
        }
    }
}

impl TaskSheet for XlsxSheet {
    fn read_rows(&self) -> Result<Vec<SheetRow>> {
        Ok(self.load_grid()?.data_rows())
    }

    fn write_status(&self, task: &TaskKey, status: &str) -> Result<()> {
        let attempts = self.config.write_retries.max(1);
        // One lock budget for the whole write, however many attempts it takes
        let deadline = Instant::now() + Duration::from_secs(self.config.lock_timeout_secs);

        for attempt in 1..=attempts {
            if !self.wait_for_unlock(deadline) {
                break;
            }

            let outcome = self.load_grid().and_then(|mut grid| {
                let index = locate_row(&grid.data_rows(), task)
                    .ok_or_else(|| Error::NotFound(format!("no sheet row holds task {}", task)))?;
                grid.set_status(index, status)?;
                self.save_grid(&grid)?;
                Ok(index)
            });

            match outcome {
                Ok(index) => {
                    info!(row = index + 2, task = %task, status, "Spreadsheet status updated");
                    return Ok(());
                }
                Err(Error::NotFound(what)) => return Err(Error::NotFound(what)),
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Spreadsheet write failed");
                    if attempt < attempts {
                        std::thread::sleep(Duration::from_secs(self.config.write_retry_delay_secs));
                    }
                }
            }
        }

        Err(Error::Sheet(format!(
            "Could not update {} after {} attempts (file may be held open)",
            self.path.display(),
            attempts
        )))
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "sheet.xlsx".to_string());
    path.with_file_name(format!("{}.temp.xlsx", name))
}

/// A file is locked when it exists but cannot be opened read-write
fn is_locked(path: &Path) -> bool {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(_) => false,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_fixture(path: &Path) {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let ws = workbook.add_worksheet();
        ws.write_string(0, 0, "time").unwrap();
        ws.write_string(0, 1, "postName").unwrap();
        ws.write_string(0, 2, "desc").unwrap();
        ws.write_string(1, 0, "2030-01-01 10:00:00").unwrap();
        ws.write_string(1, 1, "deviceA").unwrap();
        ws.write_number(1, 2, 42.0).unwrap();
        ws.write_string(2, 0, "2030-01-02_09").unwrap();
        ws.write_string(2, 1, "deviceB").unwrap();
        workbook.save(path).unwrap();
    }

    fn key(label: &str, time: &str) -> TaskKey {
        TaskKey::new(label, postrelay_common::validity::parse_task_time(time).unwrap())
    }

    fn fast_config() -> SheetConfig {
        SheetConfig {
            lock_timeout_secs: 1,
            lock_check_interval_secs: 1,
            write_retries: 1,
            write_retry_delay_secs: 0,
            ..SheetConfig::default()
        }
    }

    #[test]
    fn test_read_rows_maps_headers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.xlsx");
        write_fixture(&path);

        let sheet = XlsxSheet::new(&path, fast_config());
        let rows = sheet.read_rows().unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].time(), "2030-01-01 10:00:00");
        assert_eq!(rows[0].post_name(), "deviceA");
        assert_eq!(rows[0].get("desc"), "42");
        assert_eq!(rows[1].index, 1);
        assert_eq!(rows[1].status(), "");
    }

    #[test]
    fn test_write_status_adds_column_and_keeps_other_cells() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.xlsx");
        write_fixture(&path);

        let sheet = XlsxSheet::new(&path, fast_config());
        sheet.write_status(&key("deviceB", "2030-01-02 09:00:00"), "等待图片").unwrap();

        let rows = sheet.read_rows().unwrap();
        assert_eq!(rows[0].status(), "");
        assert_eq!(rows[1].status(), "等待图片");
        assert_eq!(rows[1].post_name(), "deviceB");
        assert_eq!(rows[0].get("desc"), "42");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_write_status_for_missing_task_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.xlsx");
        write_fixture(&path);
        let before = std::fs::read(&path).unwrap();

        let sheet = XlsxSheet::new(&path, fast_config());
        let result = sheet.write_status(&key("deviceA", "2030-01-02 09:00:00"), "x");

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_write_status_after_rows_reordered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.xlsx");
        write_fixture(&path);
        let sheet = XlsxSheet::new(&path, fast_config());
        let target = key("deviceA", "2030-01-01 10:00:00");

        // Operator inserts a row above the task between read and write
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let ws = workbook.add_worksheet();
        ws.write_string(0, 0, "time").unwrap();
        ws.write_string(0, 1, "postName").unwrap();
        ws.write_string(1, 0, "2030-01-03 08:00:00").unwrap();
        ws.write_string(1, 1, "otherLabel").unwrap();
        ws.write_string(2, 0, "2030-01-01 10:00:00").unwrap();
        ws.write_string(2, 1, "deviceA").unwrap();
        workbook.save(&path).unwrap();

        sheet.write_status(&target, "执行成功").unwrap();

        let rows = sheet.read_rows().unwrap();
        assert_eq!(rows[0].post_name(), "otherLabel");
        assert_eq!(rows[0].status(), "");
        assert_eq!(rows[1].status(), "执行成功");
    }

    #[test]
    fn test_lock_wait_is_bounded_across_attempts() {
        let dir = TempDir::new().unwrap();
        // A directory never opens read-write, so it stays "locked"
        let path = dir.path().join("content.xlsx");
        std::fs::create_dir(&path).unwrap();

        let sheet = XlsxSheet::new(
            &path,
            SheetConfig {
                lock_timeout_secs: 1,
                lock_check_interval_secs: 1,
                write_retries: 3,
                write_retry_delay_secs: 0,
                ..SheetConfig::default()
            },
        );

        let started = Instant::now();
        let result = sheet.write_status(&key("deviceA", "2030-01-01 10:00:00"), "x");

        assert!(matches!(result, Err(Error::Sheet(_))));
        assert!(started.elapsed() < Duration::from_millis(2500));
    }

    #[test]
    fn test_missing_file_is_a_sheet_error() {
        let dir = TempDir::new().unwrap();
        let sheet = XlsxSheet::new(dir.path().join("absent.xlsx"), fast_config());
        assert!(matches!(sheet.read_rows(), Err(Error::Sheet(_))));
    }
}
