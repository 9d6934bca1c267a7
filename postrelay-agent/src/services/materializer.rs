//! Task directory materialization
//!
//! Layout under the uploads root:
//!
//! ```text
//! {root}/{postLabel}/{YYYY-MM-DD_HH-MM-SS}/media/
//! {root}/{postLabel}/{YYYY-MM-DD_HH-MM-SS}/content
//! ```

use chrono::NaiveDateTime;
use postrelay_common::validity::{canonical_dir_name, parse_canonical_dir_name};
use postrelay_common::{Result, TaskKey};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

pub const MEDIA_DIR: &str = "media";
pub const CONTENT_FILE: &str = "content";

/// Initial content file body
pub const CONTENT_TEMPLATE: &str = "标题：\n正文：\n";

/// Paths belonging to one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDirs {
    pub root: PathBuf,
    pub media: PathBuf,
    pub content: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Materializer {
    uploads_root: PathBuf,
}

impl Materializer {
    pub fn new(uploads_root: impl Into<PathBuf>) -> Self {
        Self {
            uploads_root: uploads_root.into(),
        }
    }

    pub fn uploads_root(&self) -> &Path {
        &self.uploads_root
    }

    /// Compute task paths without touching the filesystem
    pub fn task_dirs(&self, post_label: &str, scheduled: &NaiveDateTime) -> TaskDirs {
        let root = self
            .uploads_root
            .join(post_label)
            .join(canonical_dir_name(scheduled));
        TaskDirs {
            media: root.join(MEDIA_DIR),
            content: root.join(CONTENT_FILE),
            root,
        }
    }

    /// Ensure the task's directories and content template exist
    ///
    /// Idempotent; an existing content file is never overwritten.
    pub fn materialize(&self, task: &TaskKey) -> Result<TaskDirs> {
        let dirs = self.task_dirs(&task.post_label, &task.scheduled);
        std::fs::create_dir_all(&dirs.media)?;

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dirs.content)
        {
            Ok(mut file) => {
                file.write_all(CONTENT_TEMPLATE.as_bytes())?;
                info!(task = %task, dir = %dirs.root.display(), "Created task directory");
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(task = %task, "Task directory already present");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(dirs)
    }

    /// Task of a media file path, when it matches `{root}/{label}/{canonical}/media/{file}`
    pub fn parse_media_path(&self, path: &Path) -> Option<TaskKey> {
        parse_media_path(&self.uploads_root, path)
    }
}

/// See [`Materializer::parse_media_path`]
pub fn parse_media_path(root: &Path, path: &Path) -> Option<TaskKey> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    match parts.as_slice() {
        [label, dir, MEDIA_DIR, _file] => {
            let scheduled = parse_canonical_dir_name(dir)?;
            Some(TaskKey::new(*label, scheduled))
        }
        _ => None,
    }
}
