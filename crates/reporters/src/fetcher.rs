//! The reference reconciler loop.
//!
//! Runs on its own cadence, independent of ingestion: fetch reporter
//! metadata from the chain, upsert the reference table, then close the gap
//! for reporters that started submitting before this fetch saw them. Every
//! failure is logged and retried next interval; the loop never dies.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info};

use layerscope_store::Store;

use crate::client::ReporterClient;
use crate::ReporterError;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Health snapshot for the reconciler loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetcherStatus {
    pub running: bool,
    pub last_fetch_unix: Option<i64>,
    pub interval_secs: u64,
}

#[derive(Debug, Default)]
struct StatusInner {
    running: bool,
    last_fetch: Option<i64>,
}

/// Periodic reporter-reference reconciler. Clones share status.
#[derive(Clone)]
pub struct ReporterFetcher {
    client: ReporterClient,
    store: Store,
    interval: Duration,
    status: Arc<Mutex<StatusInner>>,
}

impl ReporterFetcher {
    pub fn new(client: ReporterClient, store: Store) -> Self {
        Self {
            client,
            store,
            interval: DEFAULT_INTERVAL,
            status: Arc::new(Mutex::new(StatusInner::default())),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn status(&self) -> FetcherStatus {
        let inner = self.status.lock().unwrap_or_else(|e| e.into_inner());
        FetcherStatus {
            running: inner.running,
            last_fetch_unix: inner.last_fetch,
            interval_secs: self.interval.as_secs(),
        }
    }

    /// One fetch-and-upsert cycle. Returns the number of records stored.
    pub async fn fetch_and_store(&self) -> Result<usize, ReporterError> {
        let records = self.client.fetch().await?;
        if records.is_empty() {
            return Err(ReporterError::EmptyResponse);
        }
        let count = self.store.upsert_reporters(&records)?;

        let mut inner = self.status.lock().unwrap_or_else(|e| e.into_inner());
        inner.last_fetch = Some(now_unix());
        Ok(count)
    }

    /// Insert flagged stubs for reporter identities present in submissions
    /// but missing from the reference table. Returns how many were created.
    pub fn reconcile_unknown(&self) -> Result<usize, ReporterError> {
        let unknown = self.store.unknown_reporters()?;
        if unknown.is_empty() {
            return Ok(0);
        }
        info!(count = unknown.len(), "found unknown reporters in submission data");
        Ok(self.store.create_placeholder_reporters(&unknown, now_unix())?)
    }

    /// Run forever at the configured cadence.
    pub async fn run(self) {
        {
            let mut inner = self.status.lock().unwrap_or_else(|e| e.into_inner());
            inner.running = true;
        }
        info!(
            interval_secs = self.interval.as_secs(),
            "reporter reconciler starting"
        );

        loop {
            match self.fetch_and_store().await {
                Ok(count) => debug!(count, "reporter update complete"),
                Err(e) => error!(error = %e, "reporter fetch failed, retrying next interval"),
            }
            // Placeholders are worth creating even when the fetch failed:
            // the submission stream may have moved on since last interval.
            if let Err(e) = self.reconcile_unknown() {
                error!(error = %e, "unknown-reporter reconciliation failed");
            }
            sleep(self.interval).await;
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
