use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vector::Vector;

/// Record identifier, assigned monotonically at insertion.
pub type RecordId = i32;

/// One row of an insert batch: a vector plus its raw JSON metadata.
///
/// Metadata is carried as bytes with an explicit length rather than a
/// NUL-terminated string, so payloads may contain any valid JSON.
#[derive(Debug, Clone)]
pub struct RecordInsert {
    pub vector: Vec<f32>,
    pub metadata: Bytes,
}

impl RecordInsert {
    #[inline]
    #[must_use]
    pub fn new(vector: Vec<f32>, metadata: impl Into<Bytes>) -> Self {
        Self {
            vector,
            metadata: metadata.into(),
        }
    }

    /// Build a row from a parsed JSON value.
    #[must_use]
    pub fn with_json(vector: Vec<f32>, metadata: &serde_json::Value) -> Self {
        Self {
            vector,
            metadata: Bytes::from(metadata.to_string()),
        }
    }
}

/// Wire shape for insert rows read from JSON (CLI, import tooling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordJson {
    pub vector: Vec<f32>,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl From<RecordJson> for RecordInsert {
    fn from(row: RecordJson) -> Self {
        RecordInsert::with_json(row.vector, &row.metadata)
    }
}

/// A single search match. Owns independent copies of its data, so it
/// remains valid after the database is mutated or compacted.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: RecordId,
    pub score: f32,
    pub metadata: Bytes,
}

impl SearchHit {
    /// Parse the metadata payload as JSON.
    pub fn metadata_json(&self) -> Result<serde_json::Value> {
        serde_json::from_slice(&self.metadata)
            .map_err(|e| Error::Corrupt(format!("metadata for record {}: {}", self.id, e)))
    }
}

/// A record page entry returned by pagination.
#[derive(Debug, Clone)]
pub struct PaginatedRecord {
    pub id: RecordId,
    pub vector: Vector,
    pub metadata: Bytes,
}
