//! Transfer ledger
//!
//! Append-only record of every transfer and automation outcome. Entries go
//! to the `transfer_ledger` table (queried by exact task key) and are also
//! rendered as text blocks to the human-readable transfer log.
//!
//! Queries answer `false` / `None` on any database error: a missed record
//! only causes a redundant push, never a skipped one.

use crate::utils::retry_on_lock;
use postrelay_common::time::{display, now};
use postrelay_common::{Error, OutcomeCode, Result, TaskKey};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// File name of the whole-task completion sentinel
pub const TASK_COMPLETE_FILE: &str = "TASK_COMPLETE";

/// File name of publishing (automation) outcomes
pub const AUTOMATION_FILE: &str = "AUTOMATION";

/// File name used when an outcome concerns no particular file
pub const NO_FILE: &str = "N/A";

const LOCK_WAIT_MS: u64 = 5000;

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub post_label: String,
    pub scheduled: String,
    pub file_name: String,
    pub success: bool,
    pub status_code: String,
    pub detail: Option<String>,
    pub content_hash: Option<String>,
    pub recorded_at: String,
}

impl LedgerEntry {
    /// Text log block for this entry
    pub fn render(&self, scheduled_display: &str) -> String {
        let mut block = format!(
            "时间: {}\n设备: {}\n计划时间: {}\n文件: {}\n结果: {}\n状态: {}\n",
            self.recorded_at,
            self.post_label,
            scheduled_display,
            self.file_name,
            if self.success { "成功" } else { "失败" },
            self.status_code,
        );
        if let Some(detail) = self.detail.as_deref().filter(|d| !d.is_empty()) {
            block.push_str(&format!("错误信息: {}\n", detail));
        }
        block.push_str(&"-".repeat(50));
        block.push('\n');
        block
    }
}

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
    log_path: Option<PathBuf>,
}

impl Ledger {
    pub fn new(pool: SqlitePool, log_path: Option<PathBuf>) -> Self {
        Self { pool, log_path }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Append an outcome for `task` / `file_name`
    pub async fn record_outcome(
        &self,
        task: &TaskKey,
        file_name: &str,
        success: bool,
        code: OutcomeCode,
        detail: Option<&str>,
    ) -> Result<()> {
        self.append(task, file_name, success, code, detail, None).await
    }

    /// Append a push outcome carrying the delivered content hash
    pub async fn record_delivery(
        &self,
        task: &TaskKey,
        file_name: &str,
        success: bool,
        code: OutcomeCode,
        detail: Option<&str>,
        content_hash: Option<&str>,
    ) -> Result<()> {
        self.append(task, file_name, success, code, detail, content_hash)
            .await
    }

    /// Write the whole-task completion sentinel
    pub async fn mark_task_complete(&self, task: &TaskKey) -> Result<()> {
        self.append(task, TASK_COMPLETE_FILE, true, OutcomeCode::Success, None, None)
            .await
    }

    pub async fn is_task_complete(&self, task: &TaskKey) -> bool {
        self.has_success(task, TASK_COMPLETE_FILE, Some(OutcomeCode::Success))
            .await
    }

    pub async fn is_file_complete(&self, task: &TaskKey, file_name: &str) -> bool {
        self.has_success(task, file_name, None).await
    }

    /// Content hash of the latest successful delivery of `file_name`
    pub async fn delivered_hash(&self, task: &TaskKey, file_name: &str) -> Option<String> {
        let result: std::result::Result<Option<Option<String>>, sqlx::Error> = sqlx::query_scalar(
            r#"
            SELECT content_hash FROM transfer_ledger
            WHERE post_label = ? AND scheduled = ? AND file_name = ? AND success = 1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(&task.post_label)
        .bind(task.dir_name())
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await;

        match result {
            Ok(hash) => hash.flatten(),
            Err(e) => {
                warn!(task = %task, file = file_name, error = %e, "Ledger hash lookup failed");
                None
            }
        }
    }

    /// All entries for `task`, oldest first
    pub async fn entries(&self, task: &TaskKey) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<(String, String, String, i64, String, Option<String>, Option<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT post_label, scheduled, file_name, success, status_code,
                       detail, content_hash, recorded_at
                FROM transfer_ledger
                WHERE post_label = ? AND scheduled = ?
                ORDER BY seq
                "#,
            )
            .bind(&task.post_label)
            .bind(task.dir_name())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(post_label, scheduled, file_name, success, status_code, detail, content_hash, recorded_at)| {
                    LedgerEntry {
                        post_label,
                        scheduled,
                        file_name,
                        success: success != 0,
                        status_code,
                        detail,
                        content_hash,
                        recorded_at,
                    }
                },
            )
            .collect())
    }

    async fn has_success(&self, task: &TaskKey, file_name: &str, code: Option<OutcomeCode>) -> bool {
        let code = code.map(OutcomeCode::as_code);
        let result: std::result::Result<i64, sqlx::Error> = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transfer_ledger
            WHERE post_label = ? AND scheduled = ? AND file_name = ? AND success = 1
              AND (? IS NULL OR status_code = ?)
            "#,
        )
        .bind(&task.post_label)
        .bind(task.dir_name())
        .bind(file_name)
        .bind(code)
        .bind(code)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(count) => count > 0,
            Err(e) => {
                warn!(task = %task, file = file_name, error = %e, "Ledger query failed");
                false
            }
        }
    }

    async fn append(
        &self,
        task: &TaskKey,
        file_name: &str,
        success: bool,
        code: OutcomeCode,
        detail: Option<&str>,
        content_hash: Option<&str>,
    ) -> Result<()> {
        let entry = LedgerEntry {
            post_label: task.post_label.clone(),
            scheduled: task.dir_name(),
            file_name: file_name.to_string(),
            success,
            status_code: code.as_code().to_string(),
            detail: detail.map(str::to_string),
            content_hash: content_hash.map(str::to_string),
            recorded_at: display(&now()),
        };

        let pool = self.pool.clone();
        retry_on_lock("ledger_append", LOCK_WAIT_MS, || {
            let pool = pool.clone();
            let entry = entry.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO transfer_ledger
                        (entry_id, post_label, scheduled, file_name, success,
                         status_code, detail, content_hash, recorded_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&entry.post_label)
                .bind(&entry.scheduled)
                .bind(&entry.file_name)
                .bind(entry.success as i64)
                .bind(&entry.status_code)
                .bind(&entry.detail)
                .bind(&entry.content_hash)
                .bind(&entry.recorded_at)
                .execute(&pool)
                .await
                .map(|_| ())
                .map_err(Error::from)
            }
        })
        .await?;

        debug!(task = %task, file = file_name, code = %code, success, "Ledger entry recorded");

        if let Some(path) = &self.log_path {
            let block = entry.render(&display(&task.scheduled));
            if let Err(e) = append_text(path, &block).await {
                warn!(path = %path.display(), error = %e, "Failed to append transfer log");
            }
        }

        Ok(())
    }
}

async fn append_text(path: &Path, text: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await
}
