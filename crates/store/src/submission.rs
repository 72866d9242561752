//! A single oracle submission as parsed from a source CSV.

use serde::Serialize;

/// One reporter submission. Every field except the transaction hash is
/// optional: a malformed or absent cell becomes `None`, never a rejected row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Submission {
    /// Transaction hash, the store-wide primary key.
    pub tx_hash: String,
    pub reporter: Option<String>,
    pub query_type: Option<String>,
    pub query_id: Option<String>,
    pub aggregate_method: Option<String>,
    pub cyclelist: Option<bool>,
    /// Voting weight of the reporter at submission time.
    pub power: Option<i64>,
    /// Epoch timestamp grouping submissions into a reporting round.
    pub timestamp: Option<i64>,
    pub trusted_value: Option<f64>,
    /// Wall-clock time the row was observed.
    pub current_time: Option<i64>,
    pub time_diff: Option<i64>,
    pub value: Option<f64>,
    pub disputable: Option<bool>,
}
