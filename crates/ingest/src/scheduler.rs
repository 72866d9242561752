//! Fixed-interval ingestion scheduler.
//!
//! One background task owns the single-writer role: every tick it decides
//! between ingesting a brand-new active file, reloading a grown one, or
//! idling. Faults are counted per tick; a run of consecutive failures backs
//! the loop off for an extended cooldown instead of killing it.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::classify::{classify, scan_source_dir};
use crate::loader::Ingestor;
use crate::IngestError;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Cadence of directory checks.
    pub interval: Duration,
    /// Minimum active-file growth that justifies a reload.
    pub min_growth_bytes: u64,
    /// Consecutive tick failures before entering cooldown.
    pub max_consecutive_errors: u32,
    /// How long to back off once the failure threshold is hit.
    pub cooldown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            min_growth_bytes: 1024,
            max_consecutive_errors: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// What a single tick decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Directory empty (or missing): nothing to ingest yet.
    NoFiles,
    /// A new greatest-timestamp file appeared and a full sync ran.
    NewActiveLoaded,
    /// The active file grew and was reloaded.
    Reloaded,
    /// The reload's retry budget ran out; it will be retried next tick.
    ReloadSkipped,
    /// The active file changed by less than the growth threshold.
    BelowThreshold,
    Idle,
}

pub struct Scheduler {
    ingestor: Ingestor,
    config: SchedulerConfig,
    consecutive_errors: u32,
}

impl Scheduler {
    pub fn new(ingestor: Ingestor, config: SchedulerConfig) -> Self {
        Self {
            ingestor,
            config,
            consecutive_errors: 0,
        }
    }

    /// One scheduling decision. Exposed separately from [`run`] so tests can
    /// drive the loop deterministically.
    pub async fn tick(&mut self) -> Result<TickOutcome, IngestError> {
        let files = scan_source_dir(self.ingestor.source_dir());
        if files.is_empty() {
            debug!("no source files found, idling");
            return Ok(TickOutcome::NoFiles);
        }

        let classified = classify(files);
        let Some(newest) = classified.active else {
            return Ok(TickOutcome::NoFiles);
        };

        let (current_active, last_size) = self.ingestor.active_snapshot();

        let is_new_active = match &current_active {
            None => true,
            Some(current) => newest.timestamp > current.timestamp,
        };
        if is_new_active {
            info!(file = %newest.filename, "detected new active file, syncing");
            self.ingestor.sync_all().await?;
            return Ok(TickOutcome::NewActiveLoaded);
        }

        let same_file = current_active
            .as_ref()
            .map(|c| c.filename == newest.filename)
            .unwrap_or(false);
        if same_file && newest.size != last_size {
            let growth = newest.size as i64 - last_size as i64;
            if growth >= self.config.min_growth_bytes as i64 {
                info!(file = %newest.filename, growth, "active file grew, reloading");
                return match self.ingestor.load_active(&newest, true).await {
                    Ok(_) => Ok(TickOutcome::Reloaded),
                    Err(IngestError::RetriesExhausted { file, attempts }) => {
                        // Not a scheduler fault: the loader already retried.
                        warn!(file, attempts, "reload failed, will retry on next tick");
                        Ok(TickOutcome::ReloadSkipped)
                    }
                    Err(e) => Err(e),
                };
            }
            debug!(file = %newest.filename, growth, "size change below threshold, skipping");
            // Record the size anyway so tiny deltas don't re-trigger forever.
            self.ingestor.note_active_size(newest.size);
            return Ok(TickOutcome::BelowThreshold);
        }

        Ok(TickOutcome::Idle)
    }

    /// Record a tick result; returns the cooldown to apply before the next
    /// tick once the consecutive-failure threshold is hit. Successes and a
    /// triggered cooldown both reset the counter.
    fn after_tick(&mut self, failed: bool) -> Option<Duration> {
        if !failed {
            self.consecutive_errors = 0;
            return None;
        }
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.config.max_consecutive_errors {
            self.consecutive_errors = 0;
            return Some(self.config.cooldown);
        }
        None
    }

    /// Run forever at the configured cadence. Never returns; repeated faults
    /// only slow the loop down.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "ingestion scheduler starting"
        );
        loop {
            sleep(self.config.interval).await;
            let backoff = match self.tick().await {
                Ok(outcome) => {
                    debug!(?outcome, "tick complete");
                    self.after_tick(false)
                }
                Err(e) => {
                    error!(
                        error = %e,
                        consecutive = self.consecutive_errors + 1,
                        max = self.config.max_consecutive_errors,
                        "tick failed"
                    );
                    self.after_tick(true)
                }
            };
            if let Some(cooldown) = backoff {
                error!(
                    cooldown_secs = cooldown.as_secs(),
                    "too many consecutive failures, backing off"
                );
                sleep(cooldown).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::RetryPolicy;
    use layerscope_store::Store;
    use std::fs;
    use std::path::Path;

    fn scheduler(dir: &Path) -> Scheduler {
        let store = Store::open_in_memory().unwrap();
        let ingestor = Ingestor::new(store, dir).with_retry(RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        });
        Scheduler::new(ingestor, SchedulerConfig::default())
    }

    fn write_rows(dir: &Path, name: &str, hashes: &[&str]) {
        let mut contents = String::from("REPORTER,POWER,TIMESTAMP,TX_HASH\n");
        for hash in hashes {
            contents.push_str(&format!("rep,1,100,{hash}\n"));
        }
        fs::write(dir.join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn test_tick_with_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sched = scheduler(tmp.path());
        assert_eq!(sched.tick().await.unwrap(), TickOutcome::NoFiles);
    }

    #[tokio::test]
    async fn test_tick_loads_new_active_then_idles() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sched = scheduler(tmp.path());
        write_rows(tmp.path(), "table_100.csv", &["0x1"]);

        assert_eq!(sched.tick().await.unwrap(), TickOutcome::NewActiveLoaded);
        assert_eq!(sched.tick().await.unwrap(), TickOutcome::Idle);
        assert_eq!(sched.ingestor.store().row_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_tick_detects_rotation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sched = scheduler(tmp.path());
        write_rows(tmp.path(), "table_100.csv", &["0x1"]);
        assert_eq!(sched.tick().await.unwrap(), TickOutcome::NewActiveLoaded);

        write_rows(tmp.path(), "table_200.csv", &["0x2"]);
        assert_eq!(sched.tick().await.unwrap(), TickOutcome::NewActiveLoaded);

        let status = sched.ingestor.status();
        assert_eq!(status.active_file.as_deref(), Some("table_200.csv"));
        assert!(status
            .historical_loaded
            .contains(&"table_100.csv".to_string()));
    }

    #[tokio::test]
    async fn test_tick_reloads_grown_active_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sched = scheduler(tmp.path());
        write_rows(tmp.path(), "table_100.csv", &["0x1"]);
        sched.tick().await.unwrap();

        // Grow past the 1 KiB threshold.
        let hashes: Vec<String> = (0..64).map(|i| format!("0xlong-hash-number-{i:04}")).collect();
        let refs: Vec<&str> = hashes.iter().map(String::as_str).collect();
        write_rows(tmp.path(), "table_100.csv", &refs);

        assert_eq!(sched.tick().await.unwrap(), TickOutcome::Reloaded);
        assert_eq!(sched.ingestor.store().row_count().unwrap(), 64);
    }

    #[tokio::test]
    async fn test_tick_ignores_small_growth() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sched = scheduler(tmp.path());
        write_rows(tmp.path(), "table_100.csv", &["0x1"]);
        sched.tick().await.unwrap();

        write_rows(tmp.path(), "table_100.csv", &["0x1", "0x2"]);
        assert_eq!(sched.tick().await.unwrap(), TickOutcome::BelowThreshold);
        // Size was noted, so the unchanged file no longer looks grown.
        assert_eq!(sched.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[test]
    fn test_consecutive_failures_trigger_cooldown() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sched = scheduler(tmp.path());

        // Four failures stay below the default threshold of five.
        for _ in 0..4 {
            assert_eq!(sched.after_tick(true), None);
        }
        let cooldown = sched.after_tick(true);
        assert_eq!(cooldown, Some(sched.config.cooldown));

        // The counter resets once the cooldown fires.
        assert_eq!(sched.after_tick(true), None);

        // A success clears a partial failure run.
        assert_eq!(sched.after_tick(false), None);
        assert_eq!(sched.consecutive_errors, 0);
    }

    #[tokio::test]
    async fn test_failed_reload_is_skipped_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sched = scheduler(tmp.path());
        write_rows(tmp.path(), "table_100.csv", &["0x1"]);
        sched.tick().await.unwrap();

        // Replace with a grown file whose rows all lack a tx hash: parses to
        // zero usable rows every attempt.
        let mut junk = String::from("REPORTER,POWER,TIMESTAMP,TX_HASH\n");
        for _ in 0..200 {
            junk.push_str("rep,1,100,\n");
        }
        fs::write(tmp.path().join("table_100.csv"), junk).unwrap();

        assert_eq!(sched.tick().await.unwrap(), TickOutcome::ReloadSkipped);
        // The failed reload left previously-visible rows in place.
        assert_eq!(sched.ingestor.store().row_count().unwrap(), 1);
    }
}
