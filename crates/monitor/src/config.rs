//! Monitor configuration, persisted via the shared settings crate.

use std::path::Path;

use serde::{Deserialize, Serialize};

use layerscope_settings::{Settings, SettingsError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Directory the oracle exports rotate into.
    pub source_dir: String,
    /// SQLite database file. `None` keeps everything in memory.
    pub database_path: Option<String>,
    /// Path to the chain query binary. `None` disables reporter fetching.
    pub binary_path: Option<String>,
    /// RPC endpoint passed to the binary via `--node`.
    pub rpc_url: Option<String>,
    pub scheduler_interval_secs: u64,
    /// Active-file growth below this many bytes does not trigger a reload.
    pub min_growth_bytes: u64,
    pub reporter_interval_secs: u64,
    pub rpc_timeout_secs: u64,
    /// How many un-ingested historical files to backfill on a sync.
    pub max_historical_files: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            source_dir: layerscope_ingest::classify::DEFAULT_SOURCE_DIR.to_string(),
            database_path: None,
            binary_path: None,
            rpc_url: None,
            scheduler_interval_secs: 10,
            min_growth_bytes: 1024,
            reporter_interval_secs: 60,
            rpc_timeout_secs: 30,
            max_historical_files: 5,
        }
    }
}

impl MonitorConfig {
    /// Load from the service's settings file, creating it with defaults on
    /// first run.
    pub fn load(custom_path: Option<&Path>) -> Result<Settings<Self>, SettingsError> {
        Settings::load_or_default("layerscope", custom_path)
    }
}
