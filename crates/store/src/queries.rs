//! Read queries over the submissions table, always executed under the
//! shared lock and optionally composed with the consistency filter.

use rusqlite::params_from_iter;
use serde::Serialize;

use crate::{Result, SafeFilter, Store, Submission};

/// A submission as stored, with provenance and derived epoch power.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSubmission {
    #[serde(flatten)]
    pub submission: Submission,
    pub source_file: String,
    pub epoch_power: Option<i64>,
}

/// Total reporting power for one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpochPower {
    pub timestamp: i64,
    pub total_power: i64,
}

/// Grouped activity summary for one reporter identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReporterActivity {
    pub reporter: String,
    pub submission_count: usize,
    pub avg_time_diff: Option<f64>,
    pub last_timestamp: Option<i64>,
}

const SUBMISSION_COLUMNS: &str = "reporter, query_type, query_id, aggregate_method, cyclelist, \
     power, timestamp, trusted_value, tx_hash, \"current_time\", \
     time_diff, value, disputable, source_file, epoch_power";

impl Store {
    /// Most recent submissions by epoch timestamp, newest first.
    pub fn recent_submissions(
        &self,
        limit: usize,
        filter: &SafeFilter,
    ) -> Result<Vec<StoredSubmission>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions
             WHERE {} ORDER BY timestamp DESC, tx_hash LIMIT {limit}",
            filter.clause()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(filter.params()), row_to_stored)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// One submission by its transaction hash.
    pub fn submission_by_hash(&self, tx_hash: &str) -> Result<Option<StoredSubmission>> {
        let conn = self.conn();
        let sql = format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE tx_hash = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map([tx_hash], row_to_stored)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Per-epoch power totals, ascending by epoch.
    pub fn epoch_power_totals(&self, filter: &SafeFilter) -> Result<Vec<EpochPower>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT timestamp, SUM(power) FROM submissions
             WHERE timestamp IS NOT NULL AND {}
             GROUP BY timestamp ORDER BY timestamp",
            filter.clause()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(filter.params()), |r| {
                Ok(EpochPower {
                    timestamp: r.get(0)?,
                    total_power: r.get::<_, Option<i64>>(1)?.unwrap_or(0),
                })
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Grouped activity for one reporter, or None if it never submitted.
    pub fn reporter_activity(&self, reporter: &str) -> Result<Option<ReporterActivity>> {
        let conn = self.conn();
        let activity = conn.query_row(
            "SELECT COUNT(*), AVG(time_diff), MAX(timestamp)
             FROM submissions WHERE reporter = ?1",
            [reporter],
            |r| {
                Ok(ReporterActivity {
                    reporter: reporter.to_string(),
                    submission_count: r.get::<_, i64>(0)? as usize,
                    avg_time_diff: r.get(1)?,
                    last_timestamp: r.get(2)?,
                })
            },
        )?;
        if activity.submission_count == 0 {
            return Ok(None);
        }
        Ok(Some(activity))
    }

    /// Count of distinct reporter identities seen in submissions.
    pub fn distinct_reporter_count(&self) -> Result<usize> {
        let conn = self.conn();
        let n: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT reporter) FROM submissions WHERE reporter IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }
}

fn row_to_stored(r: &rusqlite::Row<'_>) -> rusqlite::Result<StoredSubmission> {
    Ok(StoredSubmission {
        submission: Submission {
            reporter: r.get(0)?,
            query_type: r.get(1)?,
            query_id: r.get(2)?,
            aggregate_method: r.get(3)?,
            cyclelist: r.get(4)?,
            power: r.get(5)?,
            timestamp: r.get(6)?,
            trusted_value: r.get(7)?,
            tx_hash: r.get(8)?,
            current_time: r.get(9)?,
            time_diff: r.get(10)?,
            value: r.get(11)?,
            disputable: r.get(12)?,
        },
        source_file: r.get(13)?,
        epoch_power: r.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(tx_hash: &str, reporter: &str, timestamp: i64, power: i64) -> Submission {
        Submission {
            tx_hash: tx_hash.to_string(),
            reporter: Some(reporter.to_string()),
            power: Some(power),
            timestamp: Some(timestamp),
            time_diff: Some(2),
            ..Submission::default()
        }
    }

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_source_rows(
                "t.csv",
                &[
                    sub("a", "rep1", 100, 5),
                    sub("b", "rep2", 100, 7),
                    sub("c", "rep1", 200, 6),
                    sub("d", "rep1", 300, 9),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_recent_submissions_with_safe_filter() {
        let store = seeded_store();
        let filter = store.safe_filter().unwrap();
        let rows = store.recent_submissions(10, &filter).unwrap();

        // Epoch 300 is the latest and excluded.
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.submission.timestamp != Some(300)));
        assert_eq!(rows[0].submission.timestamp, Some(200));
    }

    #[test]
    fn test_submission_by_hash() {
        let store = seeded_store();
        let found = store.submission_by_hash("c").unwrap().unwrap();
        assert_eq!(found.submission.reporter.as_deref(), Some("rep1"));
        assert_eq!(found.source_file, "t.csv");
        assert!(store.submission_by_hash("zzz").unwrap().is_none());
    }

    #[test]
    fn test_epoch_power_totals() {
        let store = seeded_store();
        let totals = store.epoch_power_totals(&SafeFilter::All).unwrap();
        assert_eq!(
            totals,
            vec![
                EpochPower { timestamp: 100, total_power: 12 },
                EpochPower { timestamp: 200, total_power: 6 },
                EpochPower { timestamp: 300, total_power: 9 },
            ]
        );

        let filtered = store.epoch_power_totals(&SafeFilter::Before(300)).unwrap();
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_reporter_activity() {
        let store = seeded_store();
        let activity = store.reporter_activity("rep1").unwrap().unwrap();
        assert_eq!(activity.submission_count, 3);
        assert_eq!(activity.last_timestamp, Some(300));
        assert!(store.reporter_activity("nobody").unwrap().is_none());
    }

    #[test]
    fn test_distinct_reporter_count() {
        let store = seeded_store();
        assert_eq!(store.distinct_reporter_count().unwrap(), 2);
    }
}
