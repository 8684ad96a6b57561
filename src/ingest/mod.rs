//! File ingestion: download a file, split it into chunks, embed, and upsert them as records.
//!
//! [`FileIngestor::ingest`] never returns an error. Failures come back as
//! [`IngestOutcome::Failed`] so the caller decides how to record them against the task.

pub mod source;
pub mod splitter;

use crate::{
    embedding::{EmbeddingClient, EmbeddingClientError},
    metadata::{MetadataError, MetadataStore},
    qdrant::{
        QdrantError, RecordInsert, UpsertSummary, VectorStore, collection_namespace,
        compute_content_hash,
    },
    queue::ProcessFileJob,
};
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Chunks embedded and upserted per round trip.
pub const INGEST_BATCH_SIZE: usize = 64;

/// Default maximum characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default characters carried between adjacent chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 10;
/// Default separator the text is first cut on.
pub const DEFAULT_SEPARATOR: &str = "\n\n";

/// Errors raised while ingesting a file.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The file could not be fetched.
    #[error("Failed to download file: {0}")]
    Download(#[from] reqwest::Error),
    /// The file server answered with a non-success status.
    #[error("File download returned {status} for {url}")]
    DownloadStatus {
        /// Status returned by the file server.
        status: StatusCode,
        /// URL that was requested.
        url: String,
    },
    /// The file body is not valid UTF-8.
    #[error("File is not valid UTF-8 text")]
    InvalidUtf8,
    /// A JSON source failed to parse.
    #[error("Invalid JSON source: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// The jq program was rejected or failed on the document.
    #[error("Invalid jqSchema {0}")]
    JqSchema(String),
    /// Chunk size was zero.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Embedding generation failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// The vector store rejected a write.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Task progress could not be recorded.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Options controlling how a file is cleaned and split.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitOptions {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters carried between adjacent chunks.
    pub chunk_overlap: usize,
    /// Separator the text is first cut on.
    pub separator: String,
    /// Clean-up rules applied before splitting.
    pub pre_process_rules: Vec<String>,
    /// Path selecting texts from JSON sources.
    pub jq_schema: Option<String>,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separator: DEFAULT_SEPARATOR.to_string(),
            pre_process_rules: Vec::new(),
            jq_schema: None,
        }
    }
}

/// A single file-ingestion request.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Physical vector collection.
    pub collection: String,
    /// Embedding model of the collection.
    pub embedding_model: String,
    /// Location of the file.
    pub file_url: String,
    /// Metadata attached to every chunk.
    pub metadata: Map<String, Value>,
    /// Task receiving progress updates.
    pub task_id: Uuid,
    /// Cleaning and splitting options.
    pub split: SplitOptions,
}

/// Result of a file ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Every chunk was written; counters are summed over all batches.
    Succeeded(UpsertSummary),
    /// Ingestion stopped; the message describes why.
    Failed(String),
}

/// Expands a file URL into chunk records in a collection.
pub struct FileIngestor {
    http: Client,
    embedding_client: Arc<dyn EmbeddingClient>,
    vector_store: Arc<dyn VectorStore>,
    metadata_store: Arc<dyn MetadataStore>,
}

impl From<&ProcessFileJob> for IngestRequest {
    fn from(job: &ProcessFileJob) -> Self {
        IngestRequest {
            collection: collection_namespace(&job.app_id, &job.collection_name),
            embedding_model: job.embedding_model.clone(),
            file_url: job.file_url.clone(),
            metadata: job.metadata.clone(),
            task_id: job.task_id,
            split: SplitOptions {
                chunk_size: job.chunk_size,
                chunk_overlap: job.chunk_overlap,
                separator: job.separator.clone(),
                pre_process_rules: job.pre_process_rules.clone(),
                jq_schema: job.jq_schema.clone(),
            },
        }
    }
}

impl FileIngestor {
    /// Build an ingestor over shared collaborators.
    pub fn new(
        http: Client,
        embedding_client: Arc<dyn EmbeddingClient>,
        vector_store: Arc<dyn VectorStore>,
        metadata_store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            http,
            embedding_client,
            vector_store,
            metadata_store,
        }
    }

    /// Ingest the file described by `request`.
    pub async fn ingest(&self, request: &IngestRequest) -> IngestOutcome {
        match self.run(request).await {
            Ok(summary) => {
                tracing::info!(
                    task_id = %request.task_id,
                    collection = %request.collection,
                    upserted = summary.upsert_count,
                    "File ingested"
                );
                IngestOutcome::Succeeded(summary)
            }
            Err(error) => {
                tracing::warn!(
                    task_id = %request.task_id,
                    collection = %request.collection,
                    file_url = %request.file_url,
                    error = %error,
                    "File ingestion failed"
                );
                IngestOutcome::Failed(error.to_string())
            }
        }
    }

    /// Run a queued job and record its result against the task and collection.
    ///
    /// A job whose metadata fields cannot be registered counts as failed.
    pub async fn process_job(&self, job: &ProcessFileJob) -> IngestOutcome {
        let message = match self.ingest(&IngestRequest::from(job)).await {
            IngestOutcome::Succeeded(summary) => {
                let fields: Vec<String> = job.metadata.keys().cloned().collect();
                match self
                    .metadata_store
                    .add_metadata_fields(&job.app_id, &job.team_id, &job.collection_name, &fields)
                    .await
                {
                    Ok(()) => return IngestOutcome::Succeeded(summary),
                    Err(error) => IngestError::from(error).to_string(),
                }
            }
            IngestOutcome::Failed(message) => message,
        };

        if let Err(error) = self.metadata_store.fail_task(job.task_id, &message).await {
            tracing::error!(task_id = %job.task_id, error = %error, "Failed to record job failure");
        }
        IngestOutcome::Failed(message)
    }

    async fn run(&self, request: &IngestRequest) -> Result<UpsertSummary, IngestError> {
        let chunks = self.load_chunks(request).await?;
        let total = chunks.len();
        tracing::debug!(task_id = %request.task_id, chunks = total, "File split into chunks");

        let mut summary = UpsertSummary::default();
        let mut done = 0usize;
        for batch in chunks.chunks(INGEST_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(text, _)| text.clone()).collect();
            let vectors = self
                .embedding_client
                .generate_embeddings(&request.embedding_model, texts)
                .await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingClientError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                }
                .into());
            }

            let records = batch
                .iter()
                .zip(vectors)
                .map(|((text, pk), vector)| RecordInsert {
                    pk: pk.clone(),
                    text: text.clone(),
                    vector,
                    metadata: request.metadata.clone(),
                })
                .collect();
            summary.accumulate(
                self.vector_store
                    .upsert_records(&request.collection, records)
                    .await?,
            );

            done += batch.len();
            self.metadata_store
                .update_task_progress(request.task_id, done as f32 / total as f32)
                .await?;
        }

        self.metadata_store.complete_task(request.task_id).await?;
        Ok(summary)
    }

    /// Download, clean, split, and dedupe; returns `(text, pk)` pairs.
    async fn load_chunks(&self, request: &IngestRequest) -> Result<Vec<(String, String)>, IngestError> {
        let response = self.http.get(&request.file_url).send().await?;
        if !response.status().is_success() {
            return Err(IngestError::DownloadStatus {
                status: response.status(),
                url: request.file_url.clone(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;
        let body = String::from_utf8(bytes.to_vec()).map_err(|_| IngestError::InvalidUtf8)?;

        let kind = source::detect_source_kind(&request.file_url, content_type.as_deref());
        let options = &request.split;
        let texts = source::extract_texts(kind, &body, options.jq_schema.as_deref())?;

        let mut seen = HashSet::new();
        let mut chunks = Vec::new();
        for text in texts {
            let cleaned = source::apply_pre_process_rules(&text, &options.pre_process_rules);
            for chunk in splitter::split_text(
                &cleaned,
                options.chunk_size,
                options.chunk_overlap,
                &options.separator,
            )? {
                let pk = compute_content_hash(&chunk);
                if seen.insert(pk.clone()) {
                    chunks.push((chunk, pk));
                }
            }
        }
        Ok(chunks)
    }
}
