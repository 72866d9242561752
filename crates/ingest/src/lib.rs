//! Layerscope Ingest
//!
//! Turns a directory of rotating oracle CSV exports into the live submissions
//! table. The newest file by embedded timestamp is "active" and still growing;
//! older files are sealed "historical" ones, safe to load exactly once. The
//! scheduler polls the directory, the loader tolerates the races that come
//! with reading a file something else is appending to.

pub mod classify;
pub mod columns;
pub mod loader;
pub mod reader;
pub mod scheduler;

pub use classify::{classify, scan_source_dir, Classified, SourceFileInfo};
pub use columns::ColumnMap;
pub use loader::{IngestStatus, Ingestor, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerConfig, TickOutcome};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store error: {0}")]
    Store(#[from] layerscope_store::StoreError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source file vanished during load: {0}")]
    FileVanished(String),
    #[error("loading {file} failed after {attempts} attempts")]
    RetriesExhausted { file: String, attempts: u32 },
}
