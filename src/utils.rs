//! Utility functions for string handling and file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation for logging
//! - Character-safe prefixes for model input
//! - Title sanitization for archive file names
//! - File system validation for output directories

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs as stdfs;
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Maximum number of title characters kept in an archive file name.
const SANITIZED_TITLE_CHARS: usize = 40;

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[:?'"/\\<>|*\x00-\x1f]"#).expect("valid regex"));

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to at most `max` bytes (backing off to a char
/// boundary) with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// The first `max_chars` characters of `s`.
pub fn char_prefix(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Turn an article title into a file name stem.
///
/// Keeps the first 40 characters, replaces spaces with underscores and drops
/// characters that are awkward or unsafe in file names. Falls back to
/// `"untitled"` when nothing is left.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(sanitize_title("What's next: RBI policy?"), "Whats_next_RBI_policy");
/// ```
pub fn sanitize_title(title: &str) -> String {
    let stem = char_prefix(title.trim(), SANITIZED_TITLE_CHARS).replace(' ', "_");
    let stem = UNSAFE_FILENAME_CHARS.replace_all(&stem, "");
    let stem = stem.trim_matches(|c| c == '.' || c == '_');
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem.to_string()
    }
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Directory is writable");
    Ok(())
}
