//! Permissive CSV reading.
//!
//! Typing is best-effort per cell: anything that fails to parse becomes
//! NULL, never a rejected row. The only hard requirement is the transaction
//! hash — it is the primary key, so rows without one are skipped.

use std::path::Path;

use tracing::debug;

use layerscope_store::Submission;

use crate::columns::ColumnMap;
use crate::IngestError;

/// Read every usable submission row from a source CSV.
pub fn read_submissions(path: &Path) -> Result<Vec<Submission>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let map = ColumnMap::resolve(&headers);

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                // Partial writes leave a torn last line; drop it quietly.
                debug!(error = %e, "skipping unreadable record");
                skipped += 1;
                continue;
            }
        };

        let cell = |field: &str| -> Option<&str> {
            map.get(field)
                .and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let Some(tx_hash) = cell("TX_HASH") else {
            skipped += 1;
            continue;
        };

        rows.push(Submission {
            tx_hash: tx_hash.to_string(),
            reporter: cell("REPORTER").map(str::to_string),
            query_type: cell("QUERY_TYPE").map(str::to_string),
            query_id: cell("QUERY_ID").map(str::to_string),
            aggregate_method: cell("AGGREGATE_METHOD").map(str::to_string),
            cyclelist: cell("CYCLELIST").and_then(parse_bool),
            power: cell("POWER").and_then(|s| s.parse().ok()),
            timestamp: cell("TIMESTAMP").and_then(|s| s.parse().ok()),
            trusted_value: cell("TRUSTED_VALUE").and_then(|s| s.parse().ok()),
            current_time: cell("CURRENT_TIME").and_then(|s| s.parse().ok()),
            time_diff: cell("TIME_DIFF").and_then(|s| s.parse().ok()),
            value: cell("VALUE").and_then(|s| s.parse().ok()),
            disputable: cell("DISPUTABLE").and_then(parse_bool),
        });
    }

    if skipped > 0 {
        debug!(path = %path.display(), skipped, "rows skipped during read");
    }
    Ok(rows)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}
