//! Chain query client: invokes the node binary as a subprocess and parses
//! its YAML response into reporter records.
//!
//! The binary is treated as an opaque process. Non-zero exit, a timeout, or
//! unparsable output are all failures; a single malformed entry inside an
//! otherwise good response is skipped, not fatal.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::DateTime;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use layerscope_store::ReporterRecord;

use crate::ReporterError;

/// The chain's "unset" timestamp sentinel.
const UNSET_TIME: &str = "0001-01-01T00:00:00Z";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Wrapper around the external query binary.
#[derive(Debug, Clone)]
pub struct ReporterClient {
    binary: PathBuf,
    rpc_url: Option<String>,
    timeout: Duration,
}

impl ReporterClient {
    /// Create a client. The binary must exist; its absence is a startup
    /// failure, not something to retry.
    pub fn new(binary: impl Into<PathBuf>) -> Result<Self, ReporterError> {
        let binary = binary.into();
        if !binary.exists() {
            return Err(ReporterError::BinaryNotFound(
                binary.display().to_string(),
            ));
        }
        Ok(Self {
            binary,
            rpc_url: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_rpc_url(mut self, url: Option<String>) -> Self {
        self.rpc_url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run `query reporter reporters` and parse the response.
    pub async fn fetch(&self) -> Result<Vec<ReporterRecord>, ReporterError> {
        debug!(binary = %self.binary.display(), "fetching reporter data from chain");

        let mut cmd = Command::new(&self.binary);
        cmd.args(["query", "reporter", "reporters"]);
        if let Some(url) = &self.rpc_url {
            cmd.args(["--node", url]);
        }
        cmd.kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ReporterError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(ReporterError::CommandFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let records = parse_reporters(&text, now_unix())?;
        info!(count = records.len(), "fetched reporter records");
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct ReportersPage {
    #[serde(default)]
    reporters: Vec<RawReporter>,
}

#[derive(Debug, Deserialize)]
struct RawReporter {
    address: Option<String>,
    #[serde(default)]
    power: Option<serde_yaml::Value>,
    #[serde(default)]
    metadata: RawMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    moniker: Option<String>,
    #[serde(default)]
    commission_rate: Option<String>,
    #[serde(default)]
    jailed: Option<bool>,
    #[serde(default)]
    jailed_until: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    min_tokens_required: Option<serde_yaml::Value>,
}

/// Parse the raw YAML response into storable records. Entries without an
/// address are skipped with a warning.
pub fn parse_reporters(yaml: &str, fetched_at: i64) -> Result<Vec<ReporterRecord>, ReporterError> {
    let page: ReportersPage = serde_yaml::from_str(yaml)?;

    let mut records = Vec::with_capacity(page.reporters.len());
    for raw in page.reporters {
        let Some(address) = raw.address.filter(|a| !a.is_empty()) else {
            warn!("skipping reporter entry without address");
            continue;
        };
        let meta = raw.metadata;
        records.push(ReporterRecord {
            moniker: meta.moniker.unwrap_or_default(),
            commission_rate: meta.commission_rate.unwrap_or_else(|| "0".to_string()),
            jailed: meta.jailed.unwrap_or(false),
            jailed_until: meta.jailed_until.as_deref().and_then(parse_chain_time),
            last_updated: meta.last_updated.as_deref().and_then(parse_chain_time),
            min_tokens_required: yaml_int(meta.min_tokens_required.as_ref()),
            power: yaml_int(raw.power.as_ref()),
            fetched_at,
            placeholder: false,
            address,
        });
    }
    Ok(records)
}

/// RFC3339 chain timestamp to unix seconds; the zero-value sentinel and
/// anything unparsable map to None.
fn parse_chain_time(value: &str) -> Option<i64> {
    if value.is_empty() || value == UNSET_TIME {
        return None;
    }
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Some(dt.timestamp()),
        Err(e) => {
            warn!(value, error = %e, "unparsable chain timestamp");
            None
        }
    }
}

/// Chain numerics arrive as quoted strings or bare numbers depending on the
/// field; accept both, defaulting to zero.
fn yaml_int(value: Option<&serde_yaml::Value>) -> i64 {
    match value {
        Some(serde_yaml::Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(serde_yaml::Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
