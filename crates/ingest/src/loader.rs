//! The ingestion engine: one-time idempotent loads for sealed historical
//! files, delete-then-reinsert reloads for the still-growing active file.
//!
//! The active file is written by an external producer, so every read races
//! a possible append or rotation. Reloads validate size stability first and
//! retry on a fixed delay; exhausting the retry budget is a non-fatal
//! outcome the scheduler simply retries on its next tick.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use layerscope_store::Store;

use crate::classify::{classify, scan_source_dir, SourceFileInfo};
use crate::reader::read_submissions;
use crate::IngestError;

/// Historical files above this are skipped entirely; a deliberate,
/// non-escalating data-loss tradeoff.
pub const MAX_HISTORICAL_BYTES: u64 = 500 * 1024 * 1024;

/// Warn (but still load) when the active file crosses this.
const ACTIVE_SIZE_WARN_BYTES: u64 = 1024 * 1024 * 1024;

/// How many of the most recent un-ingested historical files to load per sync.
pub const DEFAULT_MAX_HISTORICAL_FILES: usize = 5;

/// Bounded fixed-delay retry for active-file reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Snapshot of the engine's process-lifetime state, for health reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStatus {
    pub active_file: Option<String>,
    pub active_file_size: u64,
    pub historical_loaded: Vec<String>,
    pub total_rows: usize,
    pub last_updated_unix: Option<i64>,
}

#[derive(Debug, Default)]
struct IngestState {
    loaded_historical: HashSet<String>,
    active: Option<SourceFileInfo>,
    active_last_size: u64,
    total_rows: usize,
    last_updated: Option<SystemTime>,
}

/// Single-writer ingestion engine. Clones share state; only the scheduler
/// calls the mutating operations.
#[derive(Clone)]
pub struct Ingestor {
    store: Store,
    source_dir: PathBuf,
    retry: RetryPolicy,
    max_historical: usize,
    state: Arc<Mutex<IngestState>>,
}

impl Ingestor {
    pub fn new(store: Store, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            source_dir: source_dir.into(),
            retry: RetryPolicy::default(),
            max_historical: DEFAULT_MAX_HISTORICAL_FILES,
            state: Arc::new(Mutex::new(IngestState::default())),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_historical(mut self, max: usize) -> Self {
        self.max_historical = max;
        self
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Health snapshot; the internal state is never exposed directly.
    pub fn status(&self) -> IngestStatus {
        let state = self.lock_state();
        let mut historical: Vec<String> = state.loaded_historical.iter().cloned().collect();
        historical.sort_unstable();
        IngestStatus {
            active_file: state.active.as_ref().map(|f| f.filename.clone()),
            active_file_size: state.active_last_size,
            historical_loaded: historical,
            total_rows: state.total_rows,
            last_updated_unix: state
                .last_updated
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, IngestState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn active_snapshot(&self) -> (Option<SourceFileInfo>, u64) {
        let state = self.lock_state();
        (state.active.clone(), state.active_last_size)
    }

    pub(crate) fn note_active_size(&self, size: u64) {
        self.lock_state().active_last_size = size;
    }

    /// Load a sealed historical file exactly once. Returns `Ok(None)` when
    /// nothing was done: already recorded as ingested, or skipped for size.
    pub fn load_historical(&self, info: &SourceFileInfo) -> Result<Option<usize>, IngestError> {
        if self.lock_state().loaded_historical.contains(&info.filename) {
            debug!(file = %info.filename, "historical file already loaded, skipping");
            return Ok(None);
        }

        if info.size > MAX_HISTORICAL_BYTES {
            warn!(
                file = %info.filename,
                size_mb = info.size / (1024 * 1024),
                "skipping oversized historical file"
            );
            return Ok(None);
        }

        info!(
            file = %info.filename,
            size_mb = info.size / (1024 * 1024),
            "loading historical file"
        );
        let rows = read_submissions(&info.path)?;
        let count = self.store.insert_source_rows(&info.filename, &rows)?;

        self.lock_state()
            .loaded_historical
            .insert(info.filename.clone());
        self.refresh_totals()?;
        info!(file = %info.filename, rows = count, "historical file loaded");
        Ok(Some(count))
    }

    /// Load or reload the active file with race-tolerant retries. A reload
    /// replaces every row previously tagged with this file.
    pub async fn load_active(
        &self,
        info: &SourceFileInfo,
        is_reload: bool,
    ) -> Result<usize, IngestError> {
        if info.size > ACTIVE_SIZE_WARN_BYTES {
            warn!(
                file = %info.filename,
                size_mb = info.size / (1024 * 1024),
                "very large active file, loading anyway"
            );
        }

        let max = self.retry.max_attempts.max(1);
        let mut expected_size = info.size;

        for attempt in 1..=max {
            let last_attempt = attempt == max;

            let current_size = match std::fs::metadata(&info.path) {
                Ok(meta) => meta.len(),
                Err(_) => return Err(IngestError::FileVanished(info.filename.clone())),
            };

            if current_size == 0 {
                if last_attempt {
                    break;
                }
                warn!(
                    file = %info.filename,
                    attempt,
                    max,
                    "file is empty, retrying after delay"
                );
                sleep(self.retry.delay).await;
                continue;
            }

            // More than 10% drift since first observation means the producer
            // is mid-write; wait for it to settle.
            let drift = current_size.abs_diff(expected_size);
            if drift * 10 > expected_size {
                expected_size = current_size;
                if !last_attempt {
                    warn!(
                        file = %info.filename,
                        attempt,
                        max,
                        current_size,
                        "size drifted since observation, retrying after delay"
                    );
                    sleep(self.retry.delay).await;
                    continue;
                }
                warn!(
                    file = %info.filename,
                    current_size,
                    "size still drifting, proceeding with current size"
                );
            }

            let rows = match read_submissions(&info.path) {
                Ok(rows) => rows,
                Err(e) => {
                    if last_attempt {
                        return Err(e);
                    }
                    warn!(file = %info.filename, attempt, max, error = %e, "read failed, retrying after delay");
                    sleep(self.retry.delay).await;
                    continue;
                }
            };

            if rows.is_empty() {
                if last_attempt {
                    break;
                }
                warn!(
                    file = %info.filename,
                    attempt,
                    max,
                    "no rows parsed, retrying after delay"
                );
                sleep(self.retry.delay).await;
                continue;
            }

            let count = if is_reload {
                self.store.replace_source_rows(&info.filename, &rows)?
            } else {
                self.store.insert_source_rows(&info.filename, &rows)?
            };

            {
                let mut state = self.lock_state();
                let mut observed = info.clone();
                observed.size = current_size;
                state.active = Some(observed);
                state.active_last_size = current_size;
            }
            self.refresh_totals()?;
            info!(file = %info.filename, rows = count, attempt, "active file loaded");
            return Ok(count);
        }

        Err(IngestError::RetriesExhausted {
            file: info.filename.clone(),
            attempts: max,
        })
    }

    /// Full directory sync: reclassify a superseded active file, load capped
    /// un-ingested historical files, then load the current active file.
    pub async fn sync_all(&self) -> Result<(), IngestError> {
        let files = scan_source_dir(&self.source_dir);
        if files.is_empty() {
            warn!(dir = %self.source_dir.display(), "no source files found");
            return Ok(());
        }
        let classified = classify(files);

        if let Some(active) = classified.active.as_ref() {
            let mut state = self.lock_state();
            if let Some(prev) = state.active.clone() {
                if prev.filename != active.filename {
                    // The previously active file is sealed now; its rows are
                    // already in the store.
                    info!(file = %prev.filename, "previous active file is now historical");
                    state.loaded_historical.insert(prev.filename);
                }
            }
        }

        // Cap historical loads to the most recent files to bound memory.
        let skip = classified
            .historical
            .len()
            .saturating_sub(self.max_historical);
        if skip > 0 {
            debug!(skipped = skip, "capping historical backlog to most recent files");
        }
        for info in &classified.historical[skip..] {
            if let Err(e) = self.load_historical(info) {
                error!(file = %info.filename, error = %e, "historical load failed, continuing");
            }
        }

        if let Some(active) = classified.active {
            self.load_active(&active, false).await?;
        }

        // Scoped recomputes only rewrite each file's own rows; epochs that
        // span files need one full pass to agree.
        self.store.recompute_epoch_power(None)?;
        Ok(())
    }

    /// Recompute the cached totals after any store mutation.
    fn refresh_totals(&self) -> Result<(), IngestError> {
        let total = self.store.row_count()?;
        let mut state = self.lock_state();
        state.total_rows = total;
        state.last_updated = Some(SystemTime::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(50),
        }
    }

    fn write_file(dir: &Path, name: &str, rows: &[(&str, i64, i64)]) -> SourceFileInfo {
        let mut contents = String::from("REPORTER,POWER,TIMESTAMP,TX_HASH\n");
        for (hash, ts, power) in rows {
            contents.push_str(&format!("rep-{hash},{power},{ts},{hash}\n"));
        }
        let path = dir.join(name);
        fs::write(&path, &contents).unwrap();
        let meta = fs::metadata(&path).unwrap();
        SourceFileInfo {
            path,
            filename: name.to_string(),
            timestamp: crate::classify::parse_source_timestamp(name).unwrap_or(0),
            size: meta.len(),
            mtime: meta.modified().ok(),
        }
    }

    fn ingestor(dir: &Path) -> Ingestor {
        let store = Store::open_in_memory().unwrap();
        Ingestor::new(store, dir).with_retry(fast_retry())
    }

    #[test]
    fn test_historical_load_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let ing = ingestor(tmp.path());
        let info = write_file(tmp.path(), "table_100.csv", &[("0x1", 100, 5), ("0x2", 100, 7)]);

        assert_eq!(ing.load_historical(&info).unwrap(), Some(2));
        // Second call is a recorded no-op.
        assert_eq!(ing.load_historical(&info).unwrap(), None);
        assert_eq!(ing.store().row_count().unwrap(), 2);
        assert_eq!(ing.status().historical_loaded, vec!["table_100.csv"]);
    }

    #[test]
    fn test_oversized_historical_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let ing = ingestor(tmp.path());
        let mut info = write_file(tmp.path(), "table_100.csv", &[("0x1", 100, 5)]);
        info.size = MAX_HISTORICAL_BYTES + 1;

        assert_eq!(ing.load_historical(&info).unwrap(), None);
        assert_eq!(ing.store().row_count().unwrap(), 0);
        // Not recorded as loaded, so a later (smaller) pass may retry it.
        assert!(ing.status().historical_loaded.is_empty());
    }

    #[tokio::test]
    async fn test_active_load_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let ing = ingestor(tmp.path());
        let info = write_file(tmp.path(), "table_200.csv", &[("0xa", 200, 1)]);
        assert_eq!(ing.load_active(&info, false).await.unwrap(), 1);

        let info = write_file(
            tmp.path(),
            "table_200.csv",
            &[("0xa", 200, 1), ("0xb", 200, 2), ("0xc", 201, 3)],
        );
        assert_eq!(ing.load_active(&info, true).await.unwrap(), 3);
        assert_eq!(ing.store().row_count().unwrap(), 3);
        assert_eq!(ing.store().epoch_power_of(200).unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_truncated_then_restored_within_retry_window() {
        let tmp = tempfile::tempdir().unwrap();
        let ing = ingestor(tmp.path());
        let info = write_file(
            tmp.path(),
            "table_200.csv",
            &[("0xa", 200, 1), ("0xb", 200, 2)],
        );
        assert_eq!(ing.load_active(&info, false).await.unwrap(), 2);

        // Simulate the producer rotating: truncate to zero, restore shortly
        // after, well inside the retry window.
        fs::write(&info.path, "").unwrap();
        let restore_path = info.path.clone();
        let handle = tokio::spawn(async move {
            sleep(Duration::from_millis(80)).await;
            fs::write(
                &restore_path,
                "REPORTER,POWER,TIMESTAMP,TX_HASH\n\
                 rep-a,1,200,0xa\n\
                 rep-b,2,200,0xb\n",
            )
            .unwrap();
        });

        let count = ing.load_active(&info, true).await.unwrap();
        handle.await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(ing.store().row_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_persistently_empty_file_exhausts_retries() {
        let tmp = tempfile::tempdir().unwrap();
        let ing = ingestor(tmp.path()).with_retry(RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        });
        let mut info = write_file(tmp.path(), "table_200.csv", &[("0xa", 200, 1)]);
        fs::write(&info.path, "").unwrap();
        info.size = 0;

        let err = ing.load_active(&info, true).await.unwrap_err();
        assert!(matches!(err, IngestError::RetriesExhausted { attempts: 2, .. }));
        // Nothing was deleted: the failed reload left the store intact.
        assert_eq!(ing.store().row_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_all_loads_historical_and_active() {
        let tmp = tempfile::tempdir().unwrap();
        let ing = ingestor(tmp.path());
        write_file(tmp.path(), "table_100.csv", &[("0x1", 100, 5)]);
        write_file(tmp.path(), "table_200.csv", &[("0x2", 200, 6)]);
        write_file(tmp.path(), "table_300.csv", &[("0x3", 300, 7)]);

        ing.sync_all().await.unwrap();

        let status = ing.status();
        assert_eq!(status.active_file.as_deref(), Some("table_300.csv"));
        assert_eq!(
            status.historical_loaded,
            vec!["table_100.csv", "table_200.csv"]
        );
        assert_eq!(status.total_rows, 3);
    }

    #[tokio::test]
    async fn test_sync_all_reconciles_epoch_power_across_files() {
        let tmp = tempfile::tempdir().unwrap();
        let ing = ingestor(tmp.path());
        // Both files contribute rows to epoch 100.
        write_file(tmp.path(), "table_100.csv", &[("0x1", 100, 5)]);
        write_file(tmp.path(), "table_200.csv", &[("0x2", 100, 7)]);

        ing.sync_all().await.unwrap();

        let rows = ing
            .store()
            .recent_submissions(10, &layerscope_store::SafeFilter::All)
            .unwrap();
        assert_eq!(rows.len(), 2);
        // Rows from the earlier file carry the cross-file sum too.
        assert!(rows.iter().all(|r| r.epoch_power == Some(12)));
    }

    #[tokio::test]
    async fn test_sync_all_reclassifies_superseded_active() {
        let tmp = tempfile::tempdir().unwrap();
        let ing = ingestor(tmp.path());
        write_file(tmp.path(), "table_100.csv", &[("0x1", 100, 5)]);
        ing.sync_all().await.unwrap();
        assert_eq!(ing.status().active_file.as_deref(), Some("table_100.csv"));

        write_file(tmp.path(), "table_200.csv", &[("0x2", 200, 6)]);
        ing.sync_all().await.unwrap();

        let status = ing.status();
        assert_eq!(status.active_file.as_deref(), Some("table_200.csv"));
        assert!(status
            .historical_loaded
            .contains(&"table_100.csv".to_string()));
    }

    #[tokio::test]
    async fn test_historical_backlog_is_capped() {
        let tmp = tempfile::tempdir().unwrap();
        let ing = ingestor(tmp.path()).with_max_historical(2);
        for ts in [100, 200, 300, 400, 500] {
            write_file(
                tmp.path(),
                &format!("table_{ts}.csv"),
                &[(&format!("0x{ts}"), ts, 1)],
            );
        }

        ing.sync_all().await.unwrap();

        // Only the two most recent historical files plus the active one.
        assert_eq!(
            ing.status().historical_loaded,
            vec!["table_300.csv", "table_400.csv"]
        );
        assert_eq!(ing.store().row_count().unwrap(), 3);
    }
}
