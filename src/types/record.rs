//! Cached datafile records and revision extraction.

use std::time::Instant;

use serde_json::Value;

use crate::{GjallarhornError, Result};

/// One cached datafile: the document itself plus the metadata the refresh
/// protocol keys on.
///
/// Within one cache there is at most one record per key, and `revision`
/// is non-decreasing over the record's lifetime (enforced by the refresh
/// coordinator, not by this type).
#[derive(Debug, Clone)]
pub struct DatafileRecord {
    /// SDK key the document was fetched under.
    pub key: String,
    /// Revision extracted from the document's `revision` field.
    pub revision: u64,
    /// The full JSON document as served by the origin.
    pub document: Value,
    /// When the document was fetched (diagnostic only).
    pub fetched_at: Instant,
}

impl DatafileRecord {
    /// Build a record from a freshly fetched document.
    ///
    /// Fails with [`GjallarhornError::InvalidDocument`] when the document
    /// carries no usable revision.
    pub fn new(key: impl Into<String>, document: Value) -> Result<Self> {
        let revision = revision_of(&document)?;
        Ok(Self {
            key: key.into(),
            revision,
            document,
            fetched_at: Instant::now(),
        })
    }
}

/// Extract the revision from a datafile document.
///
/// Accepts a JSON integer or a decimal string — CDNs serve
/// `"revision": "42"` as a string, newer origins as a number.
pub fn revision_of(document: &Value) -> Result<u64> {
    match document.get("revision") {
        Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
            GjallarhornError::InvalidDocument(format!(
                "revision must be a non-negative integer, got {n}"
            ))
        }),
        Some(Value::String(s)) => s.parse::<u64>().map_err(|_| {
            GjallarhornError::InvalidDocument(format!("revision is not numeric: {s:?}"))
        }),
        Some(other) => Err(GjallarhornError::InvalidDocument(format!(
            "revision has unsupported type: {other}"
        ))),
        None => Err(GjallarhornError::InvalidDocument(
            "missing revision field".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_revision() {
        assert_eq!(revision_of(&json!({"revision": 42})).unwrap(), 42);
    }

    #[test]
    fn string_revision() {
        assert_eq!(revision_of(&json!({"revision": "42"})).unwrap(), 42);
    }

    #[test]
    fn zero_revision_is_valid() {
        assert_eq!(revision_of(&json!({"revision": 0})).unwrap(), 0);
    }

    #[test]
    fn missing_revision_is_rejected() {
        assert!(revision_of(&json!({"experiments": []})).is_err());
    }

    #[test]
    fn negative_revision_is_rejected() {
        assert!(revision_of(&json!({"revision": -1})).is_err());
    }

    #[test]
    fn non_numeric_string_is_rejected() {
        assert!(revision_of(&json!({"revision": "latest"})).is_err());
    }

    #[test]
    fn record_carries_revision() {
        let record = DatafileRecord::new("key-1", json!({"revision": 7})).unwrap();
        assert_eq!(record.key, "key-1");
        assert_eq!(record.revision, 7);
    }
}
