//! Layerscope Reporters
//!
//! Reference reconciliation for reporter identity and power. An independent
//! loop polls the chain's query binary, parses its YAML output, and upserts
//! the reference table; identities that show up in submissions before the
//! next successful fetch get flagged placeholder entries in the meantime.

pub mod client;
pub mod fetcher;

pub use client::{parse_reporters, ReporterClient};
pub use fetcher::{FetcherStatus, ReporterFetcher};

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("rpc binary not found at {0}")]
    BinaryNotFound(String),
    #[error("rpc query timed out after {0:?}")]
    Timeout(Duration),
    #[error("rpc query failed with status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },
    #[error("failed to parse rpc output: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("rpc response contained no reporters")]
    EmptyResponse,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] layerscope_store::StoreError),
}
