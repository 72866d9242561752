//! Source directory scanning and active/historical classification.
//!
//! Filenames follow `table_<epochTimestamp>.csv`; the embedded timestamp is
//! the sole ordering truth (mtime is informational only). The greatest
//! timestamp on disk is the active file, everything older is historical.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

/// Directory scanned when the configured one does not exist.
pub const DEFAULT_SOURCE_DIR: &str = "source_tables";

const FILE_PREFIX: &str = "table_";
const FILE_SUFFIX: &str = ".csv";

/// One source CSV as observed on disk.
#[derive(Debug, Clone)]
pub struct SourceFileInfo {
    pub path: PathBuf,
    pub filename: String,
    /// Epoch timestamp embedded in the filename.
    pub timestamp: i64,
    /// Byte size at scan time.
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

/// Scan result split into sealed files and the single growing one.
#[derive(Debug, Default)]
pub struct Classified {
    /// Ascending by embedded timestamp.
    pub historical: Vec<SourceFileInfo>,
    /// The greatest-timestamp file, presumed still being appended to.
    pub active: Option<SourceFileInfo>,
}

/// Extract the epoch timestamp from a `table_<digits>.csv` filename.
pub fn parse_source_timestamp(filename: &str) -> Option<i64> {
    let digits = filename
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// List matching files in `dir`, sorted ascending by embedded timestamp.
///
/// A missing directory falls back to [`DEFAULT_SOURCE_DIR`]; no matches is an
/// empty result, not an error — callers treat it as "no data yet".
pub fn scan_source_dir(dir: &Path) -> Vec<SourceFileInfo> {
    let dir = if dir.exists() {
        dir.to_path_buf()
    } else {
        warn!(
            dir = %dir.display(),
            fallback = DEFAULT_SOURCE_DIR,
            "source directory missing, falling back"
        );
        PathBuf::from(DEFAULT_SOURCE_DIR)
    };

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot read source directory");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let filename = entry.file_name().to_string_lossy().to_string();
        let Some(timestamp) = parse_source_timestamp(&filename) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            debug!(filename, "metadata unavailable, skipping");
            continue;
        };
        files.push(SourceFileInfo {
            path: entry.path(),
            filename,
            timestamp,
            size: meta.len(),
            mtime: meta.modified().ok(),
        });
    }

    files.sort_by_key(|f| f.timestamp);
    files
}

/// Label the greatest-timestamp file active and the rest historical.
pub fn classify(mut files: Vec<SourceFileInfo>) -> Classified {
    let active = files.pop();
    Classified {
        historical: files,
        active,
    }
}
