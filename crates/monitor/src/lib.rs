//! Layerscope Monitor
//!
//! Composition root: wires the store, the ingestion scheduler, and the
//! reporter reconciler together from one config, validates the pieces that
//! must exist at startup, and exposes the read-side facade the rest of the
//! process queries through.

pub mod config;

pub use config::MonitorConfig;
pub use layerscope_logging::LogLevel;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use layerscope_ingest::classify::DEFAULT_SOURCE_DIR;
use layerscope_ingest::{IngestError, IngestStatus, Ingestor, Scheduler, SchedulerConfig};
use layerscope_reporters::{FetcherStatus, ReporterClient, ReporterError, ReporterFetcher};
use layerscope_store::{
    EpochPower, ReporterActivity, Store, StoreError, StoredSubmission,
};

/// Initialize process-wide logging. Losing the race to another subscriber
/// is fine (tests, embedding).
pub fn init_logging(level: LogLevel) {
    let _ = layerscope_logging::try_init(level);
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("source directory not found: {0}")]
    SourceDirMissing(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),
    #[error("reporter error: {0}")]
    Reporter(#[from] ReporterError),
    #[error("settings error: {0}")]
    Settings(#[from] layerscope_settings::SettingsError),
}

/// Combined health snapshot, serializable as one JSON document.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub ingestion: IngestStatus,
    pub reporters: Option<FetcherStatus>,
}

/// A wired but not yet running monitor. [`Monitor::start`] spawns the
/// background loops; the handle itself stays usable for reads afterwards.
pub struct Monitor {
    config: MonitorConfig,
    store: Store,
    ingestor: Ingestor,
    fetcher: Option<ReporterFetcher>,
}

impl Monitor {
    /// Validate the config and wire all components. A missing source
    /// directory (after falling back to the default) or a configured but
    /// absent query binary fails here rather than at first tick.
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        let store = match &config.database_path {
            Some(path) => Store::open(Path::new(path))?,
            None => Store::open_in_memory()?,
        };

        let source_dir = resolve_source_dir(&config.source_dir)?;
        let ingestor = Ingestor::new(store.clone(), source_dir)
            .with_max_historical(config.max_historical_files);

        let fetcher = match &config.binary_path {
            Some(binary) => {
                let client = ReporterClient::new(binary)?
                    .with_rpc_url(config.rpc_url.clone())
                    .with_timeout(Duration::from_secs(config.rpc_timeout_secs));
                Some(
                    ReporterFetcher::new(client, store.clone())
                        .with_interval(Duration::from_secs(config.reporter_interval_secs)),
                )
            }
            None => {
                info!("no query binary configured, reporter fetching disabled");
                None
            }
        };

        Ok(Self {
            config,
            store,
            ingestor,
            fetcher,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run the initial full sync, then spawn the background loops. Returns
    /// the task handles so a caller can await or abort them.
    ///
    /// A transient load failure during the initial sync (the producer may be
    /// mid-rotation) is not fatal: the scheduler retries on its first tick.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>, MonitorError> {
        match self.ingestor.sync_all().await {
            Ok(()) => {}
            Err(e @ (IngestError::RetriesExhausted { .. } | IngestError::FileVanished(_))) => {
                warn!(error = %e, "initial sync incomplete, scheduler will retry");
            }
            Err(e) => return Err(e.into()),
        }

        let scheduler_config = SchedulerConfig {
            interval: Duration::from_secs(self.config.scheduler_interval_secs),
            min_growth_bytes: self.config.min_growth_bytes,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(self.ingestor.clone(), scheduler_config);

        let mut handles = vec![tokio::spawn(scheduler.run())];
        if let Some(fetcher) = &self.fetcher {
            handles.push(tokio::spawn(fetcher.clone().run()));
        }
        info!(tasks = handles.len(), "monitor started");
        Ok(handles)
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            ingestion: self.ingestor.status(),
            reporters: self.fetcher.as_ref().map(|f| f.status()),
        }
    }

    /// Newest submissions, excluding the still-filling epoch.
    pub fn recent_submissions(&self, limit: usize) -> Result<Vec<StoredSubmission>, MonitorError> {
        let filter = self.store.safe_filter()?;
        Ok(self.store.recent_submissions(limit, &filter)?)
    }

    pub fn submission_by_hash(
        &self,
        tx_hash: &str,
    ) -> Result<Option<StoredSubmission>, MonitorError> {
        Ok(self.store.submission_by_hash(tx_hash)?)
    }

    /// Total power per complete epoch.
    pub fn epoch_power_totals(&self) -> Result<Vec<EpochPower>, MonitorError> {
        let filter = self.store.safe_filter()?;
        Ok(self.store.epoch_power_totals(&filter)?)
    }

    pub fn reporter_activity(
        &self,
        reporter: &str,
    ) -> Result<Option<ReporterActivity>, MonitorError> {
        Ok(self.store.reporter_activity(reporter)?)
    }

    /// The most recent epoch safe to read as complete.
    pub fn safe_timestamp(&self) -> Result<Option<i64>, MonitorError> {
        Ok(self.store.safe_timestamp()?)
    }
}

/// The configured directory if it exists, the default directory as a
/// fallback, otherwise a startup error.
fn resolve_source_dir(configured: &str) -> Result<PathBuf, MonitorError> {
    let dir = PathBuf::from(configured);
    if dir.is_dir() {
        return Ok(dir);
    }
    let fallback = PathBuf::from(DEFAULT_SOURCE_DIR);
    if fallback.is_dir() {
        warn!(
            configured,
            fallback = DEFAULT_SOURCE_DIR,
            "configured source directory missing, using default"
        );
        return Ok(fallback);
    }
    Err(MonitorError::SourceDirMissing(configured.to_string()))
}
