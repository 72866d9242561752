//! Layerscope Store
//!
//! SQLite-backed table store for oracle submissions and reporter reference
//! data. One connection, one lock: every reader and writer in the process
//! goes through the same `Store` handle, so a reload blocks concurrent reads
//! for its duration. Submissions are keyed by transaction hash, which makes
//! cross-file overlap deduplicate naturally via `INSERT OR IGNORE`.

pub mod filter;
pub mod queries;
pub mod reporters;
pub mod submission;

pub use filter::SafeFilter;
pub use queries::{EpochPower, ReporterActivity, StoredSubmission};
pub use reporters::ReporterRecord;
pub use submission::Submission;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Shared handle to the unified submission + reporter tables.
///
/// Cloning is cheap; all clones serialize on the same internal lock.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open an in-memory store and create the schema.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open a file-backed store and create the schema.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_schema()?;
        Ok(store)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another thread panicked mid-operation;
        // the connection itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS submissions (
                reporter TEXT,
                query_type TEXT,
                query_id TEXT,
                aggregate_method TEXT,
                cyclelist INTEGER,
                power INTEGER,
                timestamp INTEGER,
                trusted_value REAL,
                tx_hash TEXT PRIMARY KEY,
                \"current_time\" INTEGER,
                time_diff INTEGER,
                value REAL,
                disputable INTEGER,
                source_file TEXT NOT NULL,
                epoch_power INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_submissions_timestamp ON submissions(timestamp);
            CREATE INDEX IF NOT EXISTS idx_submissions_reporter ON submissions(reporter);
            CREATE INDEX IF NOT EXISTS idx_submissions_query_id ON submissions(query_id);
            CREATE INDEX IF NOT EXISTS idx_submissions_timestamp_reporter
                ON submissions(timestamp, reporter);

            CREATE TABLE IF NOT EXISTS reporters (
                address TEXT PRIMARY KEY,
                moniker TEXT NOT NULL DEFAULT '',
                commission_rate TEXT NOT NULL DEFAULT '0',
                jailed INTEGER NOT NULL DEFAULT 0,
                jailed_until INTEGER,
                last_updated INTEGER,
                min_tokens_required INTEGER NOT NULL DEFAULT 0,
                power INTEGER NOT NULL DEFAULT 0,
                fetched_at INTEGER,
                placeholder INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_reporters_moniker ON reporters(moniker);
            CREATE INDEX IF NOT EXISTS idx_reporters_power ON reporters(power);
            CREATE INDEX IF NOT EXISTS idx_reporters_jailed ON reporters(jailed);",
        )?;
        debug!("schema ready");
        Ok(())
    }

    /// Insert submissions from one source file, ignoring duplicate tx hashes,
    /// then bring epoch power up to date for the touched rows. Returns the
    /// number of rows now tagged with `source_file`.
    pub fn insert_source_rows(&self, source_file: &str, rows: &[Submission]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_rows(&tx, source_file, rows)?;
        recompute_epoch_power_tx(&tx, Some(source_file))?;
        let count = source_row_count(&tx, source_file)?;
        tx.commit()?;
        info!(source_file, rows = count, "inserted submissions");
        Ok(count)
    }

    /// Delete every row previously tagged with `source_file`, re-insert the
    /// given rows, and recompute epoch power — all in one transaction, so
    /// readers never observe the file half-replaced.
    pub fn replace_source_rows(&self, source_file: &str, rows: &[Submission]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM submissions WHERE source_file = ?1",
            [source_file],
        )?;
        insert_rows(&tx, source_file, rows)?;
        recompute_epoch_power_tx(&tx, Some(source_file))?;
        let count = source_row_count(&tx, source_file)?;
        tx.commit()?;
        info!(source_file, deleted, rows = count, "replaced submissions");
        Ok(count)
    }

    /// Recompute the per-epoch power sum. When scoped to a source file only
    /// rows from that file are rewritten, but the sum always ranges over the
    /// whole table since other files may share an epoch.
    pub fn recompute_epoch_power(&self, source_file: Option<&str>) -> Result<usize> {
        let conn = self.conn();
        let updated = recompute_epoch_power_tx(&conn, source_file)?;
        debug!(updated, "epoch power recomputed");
        Ok(updated)
    }

    /// Total rows across all source files.
    pub fn row_count(&self) -> Result<usize> {
        let conn = self.conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM submissions", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Rows tagged with one source file.
    pub fn source_row_count(&self, source_file: &str) -> Result<usize> {
        let conn = self.conn();
        source_row_count(&conn, source_file)
    }

    /// Epoch power recorded for an epoch, if the epoch has any rows.
    pub fn epoch_power_of(&self, timestamp: i64) -> Result<Option<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT epoch_power FROM submissions WHERE timestamp = ?1 LIMIT 1",
        )?;
        let mut iter = stmt.query_map([timestamp], |r| r.get::<_, Option<i64>>(0))?;
        match iter.next() {
            Some(v) => Ok(v?),
            None => Ok(None),
        }
    }
}

fn insert_rows(conn: &Connection, source_file: &str, rows: &[Submission]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO submissions (
            reporter, query_type, query_id, aggregate_method, cyclelist,
            power, timestamp, trusted_value, tx_hash, \"current_time\",
            time_diff, value, disputable, source_file, epoch_power
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, NULL)",
    )?;
    for row in rows {
        stmt.execute(rusqlite::params![
            row.reporter,
            row.query_type,
            row.query_id,
            row.aggregate_method,
            row.cyclelist,
            row.power,
            row.timestamp,
            row.trusted_value,
            row.tx_hash,
            row.current_time,
            row.time_diff,
            row.value,
            row.disputable,
            source_file,
        ])?;
    }
    Ok(())
}

fn recompute_epoch_power_tx(conn: &Connection, source_file: Option<&str>) -> Result<usize> {
    let updated = match source_file {
        Some(file) => conn.execute(
            "UPDATE submissions SET epoch_power = (
                SELECT SUM(power) FROM submissions s2
                WHERE s2.timestamp = submissions.timestamp
            ) WHERE source_file = ?1",
            [file],
        )?,
        None => conn.execute(
            "UPDATE submissions SET epoch_power = (
                SELECT SUM(power) FROM submissions s2
                WHERE s2.timestamp = submissions.timestamp
            )",
            [],
        )?,
    };
    Ok(updated)
}

fn source_row_count(conn: &Connection, source_file: &str) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM submissions WHERE source_file = ?1",
        [source_file],
        |r| r.get(0),
    )?;
    Ok(n as usize)
}
