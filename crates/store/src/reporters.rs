//! Reporter reference table: identity and power metadata fetched from the
//! chain, plus placeholder entries for reporters that appear in submissions
//! before the next successful fetch observes them.

use rusqlite::params;
use serde::Serialize;
use tracing::{debug, info};

use crate::{Result, Store};

/// Reference metadata for one reporter identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReporterRecord {
    pub address: String,
    pub moniker: String,
    /// Kept as the chain's decimal string, e.g. "0.050000000000000000".
    pub commission_rate: String,
    pub jailed: bool,
    /// Unix seconds; None when the chain reports the unset sentinel.
    pub jailed_until: Option<i64>,
    pub last_updated: Option<i64>,
    pub min_tokens_required: i64,
    pub power: i64,
    pub fetched_at: i64,
    /// True for stub entries created ahead of authoritative data.
    pub placeholder: bool,
}

impl ReporterRecord {
    /// A flagged stub for an identity seen only in submissions so far.
    pub fn placeholder(address: &str, now: i64) -> Self {
        let short: String = address.chars().take(12).collect();
        Self {
            address: address.to_string(),
            moniker: format!("Unknown ({short}...)"),
            commission_rate: "0".to_string(),
            jailed: false,
            jailed_until: None,
            last_updated: None,
            min_tokens_required: 0,
            power: 0,
            fetched_at: now,
            placeholder: true,
        }
    }
}

impl Store {
    /// Upsert fetched reporter records, replacing on address conflict.
    /// Real data overwrites placeholders last-write-wins.
    pub fn upsert_reporters(&self, records: &[ReporterRecord]) -> Result<usize> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO reporters (
                address, moniker, commission_rate, jailed, jailed_until,
                last_updated, min_tokens_required, power, fetched_at, placeholder
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for rec in records {
            stmt.execute(params![
                rec.address,
                rec.moniker,
                rec.commission_rate,
                rec.jailed,
                rec.jailed_until,
                rec.last_updated,
                rec.min_tokens_required,
                rec.power,
                rec.fetched_at,
                rec.placeholder,
            ])?;
        }
        info!(count = records.len(), "stored reporter records");
        Ok(records.len())
    }

    /// Reporter identities present in submissions but absent from the
    /// reference table.
    pub fn unknown_reporters(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT s.reporter
             FROM submissions s
             LEFT JOIN reporters r ON s.reporter = r.address
             WHERE r.address IS NULL
               AND s.reporter IS NOT NULL
               AND s.reporter != ''",
        )?;
        let unknown: Vec<String> = stmt
            .query_map([], |r| r.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        if !unknown.is_empty() {
            debug!(count = unknown.len(), "unknown reporters in submission data");
        }
        Ok(unknown)
    }

    /// Insert flagged stubs for the given addresses, skipping any that
    /// gained a real record in the meantime.
    pub fn create_placeholder_reporters(&self, addresses: &[String], now: i64) -> Result<usize> {
        if addresses.is_empty() {
            return Ok(0);
        }
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "INSERT OR IGNORE INTO reporters (
                address, moniker, commission_rate, jailed, jailed_until,
                last_updated, min_tokens_required, power, fetched_at, placeholder
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        let mut created = 0;
        for address in addresses {
            let stub = ReporterRecord::placeholder(address, now);
            created += stmt.execute(params![
                stub.address,
                stub.moniker,
                stub.commission_rate,
                stub.jailed,
                stub.jailed_until,
                stub.last_updated,
                stub.min_tokens_required,
                stub.power,
                stub.fetched_at,
                stub.placeholder,
            ])?;
        }
        info!(created, "created placeholder reporter entries");
        Ok(created)
    }

    /// One reporter record by address.
    pub fn reporter(&self, address: &str) -> Result<Option<ReporterRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT address, moniker, commission_rate, jailed, jailed_until,
                    last_updated, min_tokens_required, power, fetched_at, placeholder
             FROM reporters WHERE address = ?1",
        )?;
        let mut rows = stmt.query_map([address], |r| {
            Ok(ReporterRecord {
                address: r.get(0)?,
                moniker: r.get(1)?,
                commission_rate: r.get(2)?,
                jailed: r.get(3)?,
                jailed_until: r.get(4)?,
                last_updated: r.get(5)?,
                min_tokens_required: r.get(6)?,
                power: r.get(7)?,
                fetched_at: r.get(8)?,
                placeholder: r.get(9)?,
            })
        })?;
        match rows.next() {
            Some(rec) => Ok(Some(rec?)),
            None => Ok(None),
        }
    }

    /// Total reference records, placeholders included.
    pub fn reporter_count(&self) -> Result<usize> {
        let conn = self.conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM reporters", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}
