//! Read-time consistency filter.
//!
//! The most recent epoch may still be filling in from the active file, so
//! reads that need a complete picture exclude it — unless it is the only
//! epoch present, in which case it is included despite the risk because
//! nothing else exists.

use tracing::{debug, warn};

use crate::{Result, Store};

/// A predicate over the submissions table, composable into read queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeFilter {
    /// No restriction (empty table, or a single epoch we must include).
    All,
    /// Only epochs strictly before the given timestamp.
    Before(i64),
}

impl SafeFilter {
    /// SQL fragment for a WHERE clause. `Before` binds one parameter.
    pub fn clause(&self) -> &'static str {
        match self {
            Self::All => "1=1",
            Self::Before(_) => "timestamp < ?",
        }
    }

    pub fn params(&self) -> Vec<i64> {
        match self {
            Self::All => vec![],
            Self::Before(ts) => vec![*ts],
        }
    }
}

impl Store {
    /// Compute the filter excluding the latest, possibly-incomplete epoch.
    pub fn safe_filter(&self) -> Result<SafeFilter> {
        let conn = self.conn();
        let most_recent: Option<i64> =
            conn.query_row("SELECT MAX(timestamp) FROM submissions", [], |r| r.get(0))?;

        let most_recent = match most_recent {
            Some(ts) => ts,
            None => return Ok(SafeFilter::All),
        };

        let older: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT timestamp) FROM submissions WHERE timestamp < ?1",
            [most_recent],
            |r| r.get(0),
        )?;

        if older > 0 {
            debug!(excluded = most_recent, "filtering potentially incomplete epoch");
            Ok(SafeFilter::Before(most_recent))
        } else {
            warn!(
                timestamp = most_recent,
                "only one epoch present, including it despite potential incompleteness"
            );
            Ok(SafeFilter::All)
        }
    }

    /// The most recent epoch guaranteed fully observed: the second-most-recent
    /// distinct timestamp, or the only one if a single epoch exists.
    pub fn safe_timestamp(&self) -> Result<Option<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT timestamp FROM submissions
             WHERE timestamp IS NOT NULL
             ORDER BY timestamp DESC LIMIT 2",
        )?;
        let recent: Vec<i64> = stmt
            .query_map([], |r| r.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        match recent.as_slice() {
            [_, second] => Ok(Some(*second)),
            [only] => {
                warn!(timestamp = only, "only one epoch available, using it");
                Ok(Some(*only))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Submission;

    fn sub(tx_hash: &str, timestamp: i64) -> Submission {
        Submission {
            tx_hash: tx_hash.to_string(),
            power: Some(1),
            timestamp: Some(timestamp),
            ..Submission::default()
        }
    }

    #[test]
    fn test_filter_excludes_latest_epoch() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_source_rows(
                "t.csv",
                &[sub("a", 100), sub("b", 200), sub("c", 300)],
            )
            .unwrap();

        assert_eq!(store.safe_filter().unwrap(), SafeFilter::Before(300));
    }

    #[test]
    fn test_filter_keeps_lone_epoch() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_source_rows("t.csv", &[sub("a", 100), sub("b", 100)])
            .unwrap();

        assert_eq!(store.safe_filter().unwrap(), SafeFilter::All);
    }

    #[test]
    fn test_filter_on_empty_store() {
        let store = Store::open_in_memory().unwrap();
        // Match-all over an empty table matches nothing.
        assert_eq!(store.safe_filter().unwrap(), SafeFilter::All);
    }

    #[test]
    fn test_safe_timestamp() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.safe_timestamp().unwrap(), None);

        store.insert_source_rows("t.csv", &[sub("a", 100)]).unwrap();
        assert_eq!(store.safe_timestamp().unwrap(), Some(100));

        store
            .insert_source_rows("t.csv", &[sub("b", 200), sub("c", 300)])
            .unwrap();
        assert_eq!(store.safe_timestamp().unwrap(), Some(200));
    }

    #[test]
    fn test_clause_and_params() {
        assert_eq!(SafeFilter::All.clause(), "1=1");
        assert!(SafeFilter::All.params().is_empty());
        assert_eq!(SafeFilter::Before(42).clause(), "timestamp < ?");
        assert_eq!(SafeFilter::Before(42).params(), vec![42]);
    }
}
