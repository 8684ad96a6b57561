//! Shared types used by the Qdrant client and helpers.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Record ready for an upsert: primary key, source text, vector, and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInsert {
    /// Caller-visible primary key.
    pub pk: String,
    /// Text the vector was generated from.
    pub text: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Open metadata map stored with the record.
    pub metadata: Map<String, Value>,
}

/// Write counters reported after an upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    /// Records written as new rows.
    pub insert_count: usize,
    /// Records removed by the request.
    pub delete_count: usize,
    /// Records written by the upsert.
    pub upsert_count: usize,
    /// Records acknowledged by the store.
    pub success_count: usize,
    /// Records the store rejected.
    pub err_count: usize,
}

impl UpsertSummary {
    /// Summary for a fully acknowledged upsert of `count` records.
    pub fn acknowledged(count: usize) -> Self {
        Self {
            insert_count: count,
            delete_count: 0,
            upsert_count: count,
            success_count: count,
            err_count: 0,
        }
    }

    /// Add another summary's counters into this one.
    pub fn accumulate(&mut self, other: UpsertSummary) {
        self.insert_count += other.insert_count;
        self.delete_count += other.delete_count;
        self.upsert_count += other.upsert_count;
        self.success_count += other.success_count;
        self.err_count += other.err_count;
    }
}

/// Record returned by filtered queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    /// Caller-visible primary key.
    pub pk: String,
    /// Stored text, if present in the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Stored metadata map.
    pub metadata: Map<String, Value>,
}

/// Record returned by similarity search, with its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    /// Caller-visible primary key.
    pub pk: String,
    /// Similarity score computed by Qdrant.
    pub score: f32,
    /// Stored text, if present in the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Stored metadata map.
    pub metadata: Map<String, Value>,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
pub(crate) struct BatchQueryResponse {
    pub(crate) result: Vec<QueryResponseResult>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

impl QueryResponseResult {
    pub(crate) fn into_points(self) -> Vec<QueryPoint> {
        match self {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) id: Value,
    #[serde(default)]
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
pub(crate) struct RetrieveResponse {
    #[serde(default)]
    pub(crate) result: Vec<RetrievedPoint>,
}

#[derive(Deserialize)]
pub(crate) struct RetrievedPoint {
    #[allow(dead_code)]
    pub(crate) id: Value,
}
