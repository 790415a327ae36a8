//! Best-effort raw text archive.
//!
//! Every accepted article's body is written to `<dir>/<sanitized title>.txt`.
//! The archive is a side log: callers ignore its failures, and a later
//! article with the same sanitized title overwrites the earlier file.

use crate::utils::{ensure_writable_dir, sanitize_title};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory of raw article texts.
#[derive(Debug, Clone)]
pub struct RawArchive {
    dir: PathBuf,
}

impl RawArchive {
    /// Prepare `dir` for writing. Returns `None` (archiving disabled) when the
    /// directory cannot be created or written.
    pub async fn open(dir: &Path) -> Option<Self> {
        match ensure_writable_dir(dir).await {
            Ok(()) => Some(Self {
                dir: dir.to_path_buf(),
            }),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Raw archive unavailable; continuing without it");
                None
            }
        }
    }

    /// Path the article with `title` is archived under.
    pub fn path_for(&self, title: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", sanitize_title(title)))
    }

    /// Write `content` for `title`.
    pub async fn store(&self, title: &str, content: &str) -> io::Result<PathBuf> {
        let path = self.path_for(title);
        tokio::fs::write(&path, content).await?;
        debug!(path = %path.display(), "Archived raw article");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_writes_under_sanitized_title() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RawArchive::open(dir.path()).await.unwrap();

        let path = archive.store("Budget: what's new?", "body text").await.unwrap();

        assert_eq!(path, dir.path().join("Budget_whats_new.txt"));
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "body text");
    }

    #[tokio::test]
    async fn test_open_fails_soft_on_unusable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir");
        tokio::fs::write(&file, "x").await.unwrap();

        assert!(RawArchive::open(&file).await.is_none());
    }
}
