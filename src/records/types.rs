//! Request, response, and error types for record operations.

use crate::{
    embedding::EmbeddingClientError,
    ingest::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_SEPARATOR, SplitOptions},
    metadata::MetadataError,
    qdrant::{ExprError, QdrantError, ScoredRecord, StoredRecord, UpsertSummary},
    queue::QueueError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Default page size for filtered queries and searches.
pub const DEFAULT_RESULT_LIMIT: usize = 30;

/// Errors surfaced by [`crate::records::RecordService`].
#[derive(Debug, Error)]
pub enum RecordError {
    /// Request body is missing required input or is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// No collection with this name is visible to the caller.
    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),
    /// The filter expression failed to parse.
    #[error("Invalid filter expression: {0}")]
    InvalidFilter(#[from] ExprError),
    /// The embedding provider returned no vector for a text.
    #[error("Embedding provider returned no vectors")]
    EmptyEmbedding,
    /// Embedding generation failed.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Vector store request failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Metadata store request failed.
    #[error("Metadata store request failed: {0}")]
    Metadata(#[from] MetadataError),
    /// Job submission failed.
    #[error("Failed to submit file job: {0}")]
    Queue(#[from] QueueError),
}

/// Caller identity resolved from the inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Tenant issuing the request.
    pub team_id: String,
    /// Application issuing the request.
    pub app_id: String,
    /// User issuing the request.
    pub user_id: String,
}

/// Body of the create endpoint: either `text` or `fileURL`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRecordRequest {
    /// Text stored as a single record.
    #[serde(default)]
    pub text: Option<String>,
    /// File expanded into chunk records.
    #[serde(default, rename = "fileURL")]
    pub file_url: Option<String>,
    /// Queue the file instead of ingesting it inline (default `true`).
    #[serde(default, rename = "async")]
    pub run_async: Option<bool>,
    /// Metadata stored with the record or every chunk.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    /// File cleaning and splitting options.
    #[serde(default)]
    pub split: Option<SplitConfig>,
}

/// `split` section of a create request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SplitConfig {
    /// Split parameters.
    #[serde(default)]
    pub params: SplitParams,
}

/// Parameters under `split.params`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitParams {
    /// Path selecting texts from JSON sources.
    #[serde(default)]
    pub jq_schema: Option<String>,
    /// Clean-up rule ids applied before splitting.
    #[serde(default)]
    pub pre_process_rules: Vec<String>,
    /// Segmenting parameters.
    #[serde(default)]
    pub segment_params: SegmentParams,
}

/// Parameters under `split.params.segmentParams`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentParams {
    /// Maximum characters per chunk.
    #[serde(default)]
    pub segment_max_length: Option<usize>,
    /// Characters carried between adjacent chunks.
    #[serde(default)]
    pub segment_chunk_overlap: Option<usize>,
    /// Separator the text is first cut on.
    #[serde(default)]
    pub segment_symbol: Option<String>,
}

impl From<Option<SplitConfig>> for SplitOptions {
    fn from(config: Option<SplitConfig>) -> Self {
        let params = config.map(|split| split.params).unwrap_or_default();
        let segment = params.segment_params;
        SplitOptions {
            chunk_size: segment.segment_max_length.unwrap_or(DEFAULT_CHUNK_SIZE),
            chunk_overlap: segment.segment_chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP),
            separator: segment
                .segment_symbol
                .unwrap_or_else(|| DEFAULT_SEPARATOR.to_string()),
            pre_process_rules: params.pre_process_rules,
            jq_schema: params.jq_schema,
        }
    }
}

/// Result of the create endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CreateRecordResponse {
    /// Text or synchronous file write counters.
    Written(UpsertSummary),
    /// Asynchronous file ingestion was queued.
    Queued {
        /// Task tracking the queued ingestion.
        #[serde(rename = "taskId")]
        task_id: Uuid,
    },
    /// Synchronous file ingestion failed; the task carries the reason.
    Failed {
        /// Always `false`.
        success: bool,
    },
}

/// One entry of a batch upsert body.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRecord {
    /// Caller-chosen primary key.
    pub pk: String,
    /// Text to embed.
    pub text: String,
    /// Metadata stored with the record.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Response carrying the number of upserted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertCountResponse {
    /// Records written.
    pub upsert_count: usize,
}

/// Body of the query endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    /// Filter expression; empty selects everything.
    #[serde(default)]
    pub expr: Option<String>,
    /// Records to skip.
    #[serde(default)]
    pub offset: Option<usize>,
    /// Maximum records returned.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Response of the query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    /// Matching records.
    pub records: Vec<StoredRecord>,
}

/// One query text or several.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SearchQuery {
    /// A single query text.
    Single(String),
    /// Several query texts searched in one batch.
    Many(Vec<String>),
}

/// Body of the search endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    /// Optional filter expression.
    #[serde(default)]
    pub expr: Option<String>,
    /// Query text(s).
    #[serde(default)]
    pub q: Option<SearchQuery>,
    /// Maximum hits per query.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Hits for one query, or one hit list per query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchHits {
    /// Hits of a single query.
    Single(Vec<ScoredRecord>),
    /// Hit lists in query order.
    Batch(Vec<Vec<ScoredRecord>>),
}

/// Response of the search endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    /// Search hits.
    pub records: SearchHits,
}

/// Response of the delete endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteResponse {
    /// Records that existed and were removed.
    pub delete_count: usize,
}

/// Body of the single-record upsert endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpsertRecordRequest {
    /// Text to embed.
    #[serde(default)]
    pub text: Option<String>,
    /// Metadata stored with the record.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_options_fall_back_to_defaults() {
        let options = SplitOptions::from(None);
        assert_eq!(options, SplitOptions::default());

        let request: CreateRecordRequest = serde_json::from_value(json!({
            "fileURL": "https://files.example/a.json",
            "split": { "params": {
                "jqSchema": ".[].body",
                "preProcessRules": ["remove-urls-emails"],
                "segmentParams": { "segmentMaxLength": 200, "segmentSymbol": "\n" }
            }}
        }))
        .expect("request");
        let options = SplitOptions::from(request.split);
        assert_eq!(options.chunk_size, 200);
        assert_eq!(options.chunk_overlap, DEFAULT_CHUNK_OVERLAP);
        assert_eq!(options.separator, "\n");
        assert_eq!(options.jq_schema.as_deref(), Some(".[].body"));
        assert_eq!(options.pre_process_rules, vec!["remove-urls-emails"]);
    }

    #[test]
    fn create_responses_render_their_wire_shapes() {
        let task_id = Uuid::nil();
        assert_eq!(
            serde_json::to_value(CreateRecordResponse::Queued { task_id }).unwrap(),
            json!({ "taskId": task_id.to_string() })
        );
        assert_eq!(
            serde_json::to_value(CreateRecordResponse::Failed { success: false }).unwrap(),
            json!({ "success": false })
        );
        assert_eq!(
            serde_json::to_value(CreateRecordResponse::Written(UpsertSummary::acknowledged(1)))
                .unwrap(),
            json!({
                "insert_count": 1,
                "delete_count": 0,
                "upsert_count": 1,
                "success_count": 1,
                "err_count": 0
            })
        );
    }

    #[test]
    fn search_query_accepts_string_or_list() {
        let single: SearchRequest = serde_json::from_value(json!({ "q": "hello" })).unwrap();
        assert_eq!(single.q, Some(SearchQuery::Single("hello".into())));
        let many: SearchRequest = serde_json::from_value(json!({ "q": ["a", "b"] })).unwrap();
        assert_eq!(many.q, Some(SearchQuery::Many(vec!["a".into(), "b".into()])));
    }
}
