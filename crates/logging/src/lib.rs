//! Layerscope Logging
//!
//! Shared tracing-subscriber initialization for all Layerscope services.
//! `RUST_LOG` overrides the programmatic level when set.

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Log verbosity for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Self::Debug
        } else {
            Self::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Initialize the global subscriber. Returns Err if one is already set,
/// which callers may ignore (tests, embedding).
pub fn try_init(level: LogLevel) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| e.to_string())?;

    debug!(level = level.as_str(), "logging initialized");
    Ok(())
}
