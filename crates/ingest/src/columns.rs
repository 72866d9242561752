//! Header reconciliation between a CSV's actual columns and the canonical
//! submission fields.
//!
//! Exports sometimes arrive with underscore characters mangled by transport
//! encodings (`+AF8-` from UTF-7, `%5F` from URL encoding). Resolution order
//! per canonical field: exact header match, then normalized match, else the
//! field is absent and ingestion substitutes NULL for it on every row.

use std::collections::HashMap;

use tracing::debug;

/// Canonical submission fields, in table column order.
pub const CANONICAL_FIELDS: [&str; 13] = [
    "REPORTER",
    "QUERY_TYPE",
    "QUERY_ID",
    "AGGREGATE_METHOD",
    "CYCLELIST",
    "POWER",
    "TIMESTAMP",
    "TRUSTED_VALUE",
    "TX_HASH",
    "CURRENT_TIME",
    "TIME_DIFF",
    "VALUE",
    "DISPUTABLE",
];

/// Undo known underscore substitutions in a header name.
pub fn normalize_header(name: &str) -> String {
    name.trim().replace("+AF8-", "_").replace("%5F", "_")
}

/// Lookup table from canonical field to the index of the matching actual
/// column, if any.
#[derive(Debug)]
pub struct ColumnMap {
    index: HashMap<&'static str, Option<usize>>,
}

impl ColumnMap {
    /// Resolve the discovered header list against the canonical fields.
    pub fn resolve(headers: &[String]) -> Self {
        let mut index = HashMap::with_capacity(CANONICAL_FIELDS.len());
        for field in CANONICAL_FIELDS {
            let found = headers
                .iter()
                .position(|h| h == field)
                .or_else(|| headers.iter().position(|h| normalize_header(h) == field));
            if found.is_none() {
                debug!(field, "column not present, will insert NULL");
            }
            index.insert(field, found);
        }
        Self { index }
    }

    /// Index of the actual column backing a canonical field.
    pub fn get(&self, field: &str) -> Option<usize> {
        self.index.get(field).copied().flatten()
    }

    /// Canonical fields with no backing column.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing: Vec<&'static str> = self
            .index
            .iter()
            .filter(|(_, idx)| idx.is_none())
            .map(|(field, _)| *field)
            .collect();
        missing.sort_unstable();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_match() {
        let map = ColumnMap::resolve(&headers(&["TX_HASH", "POWER", "REPORTER"]));
        assert_eq!(map.get("TX_HASH"), Some(0));
        assert_eq!(map.get("POWER"), Some(1));
        assert_eq!(map.get("REPORTER"), Some(2));
    }

    #[test]
    fn test_encoded_underscores_resolve() {
        let map = ColumnMap::resolve(&headers(&["TX+AF8-HASH", "QUERY%5FID", "POWER"]));
        assert_eq!(map.get("TX_HASH"), Some(0));
        assert_eq!(map.get("QUERY_ID"), Some(1));
    }

    #[test]
    fn test_exact_wins_over_normalized() {
        // Both a mangled and a clean TX_HASH column: the exact one is used.
        let map = ColumnMap::resolve(&headers(&["TX+AF8-HASH", "TX_HASH"]));
        assert_eq!(map.get("TX_HASH"), Some(1));
    }

    #[test]
    fn test_missing_fields_reported() {
        let map = ColumnMap::resolve(&headers(&["TX_HASH"]));
        assert_eq!(map.get("DISPUTABLE"), None);
        let missing = map.missing();
        assert_eq!(missing.len(), CANONICAL_FIELDS.len() - 1);
        assert!(missing.contains(&"POWER"));
        assert!(!missing.contains(&"TX_HASH"));
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header(" TIME+AF8-DIFF "), "TIME_DIFF");
        assert_eq!(normalize_header("CURRENT%5FTIME"), "CURRENT_TIME");
        assert_eq!(normalize_header("VALUE"), "VALUE");
    }
}
