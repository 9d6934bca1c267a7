//! Media file change detection
//!
//! Remembers the SHA-256 of every media file it has seen, keyed by absolute
//! path. A file whose hash cannot be computed always reports changed.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Result of one change check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCheck {
    pub changed: bool,
    /// Current content hash, `None` when the file could not be read
    pub hash: Option<String>,
}

#[derive(Debug, Default)]
pub struct ChangeDetector {
    hashes: Mutex<HashMap<PathBuf, String>>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `path` and compare with the last recorded hash
    ///
    /// Blocking; async callers use `spawn_blocking`.
    pub fn check(&self, path: &Path) -> ChangeCheck {
        let key = absolute(path);

        match hash_file(&key) {
            Ok(hash) => {
                let previous = self.lock().insert(key, hash.clone());
                ChangeCheck {
                    changed: previous.as_deref() != Some(hash.as_str()),
                    hash: Some(hash),
                }
            }
            Err(e) => {
                debug!(path = %key.display(), error = %e, "Cannot hash file, treating as changed");
                self.lock().remove(&key);
                ChangeCheck {
                    changed: true,
                    hash: None,
                }
            }
        }
    }

    pub fn has_changed(&self, path: &Path) -> bool {
        self.check(path).changed
    }

    /// Drop the record for `path` so the next check reports changed
    pub fn forget(&self, path: &Path) {
        self.lock().remove(&absolute(path));
    }

    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, String>> {
        self.hashes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// SHA-256 of a file as lowercase hex, read in 1MB chunks
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
