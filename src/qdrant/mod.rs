//! Qdrant vector store integration.

pub mod client;
pub mod expr;
pub mod payload;
pub mod types;

use async_trait::async_trait;
use serde_json::Value;

pub use client::QdrantService;
pub use expr::{ExprError, compile_filter};
pub use payload::{collection_namespace, compute_content_hash, point_id_for_pk};
pub use types::{QdrantError, RecordInsert, ScoredRecord, StoredRecord, UpsertSummary};

/// Record-level operations the service needs from a vector database.
///
/// `collection` is always the physical collection name (see [`collection_namespace`]).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by primary key.
    async fn upsert_records(
        &self,
        collection: &str,
        records: Vec<RecordInsert>,
    ) -> Result<UpsertSummary, QdrantError>;

    /// Delete one record by primary key, returning the number of records removed.
    async fn delete_record(&self, collection: &str, pk: &str) -> Result<usize, QdrantError>;

    /// Page through records matching an optional compiled filter.
    async fn query_records(
        &self,
        collection: &str,
        filter: Option<Value>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, QdrantError>;

    /// Run one similarity search per vector and return the hit lists in order.
    async fn search_records(
        &self,
        collection: &str,
        vectors: Vec<Vec<f32>>,
        filter: Option<Value>,
        limit: usize,
    ) -> Result<Vec<Vec<ScoredRecord>>, QdrantError>;
}
