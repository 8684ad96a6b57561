//! Record service orchestrating metadata lookups, embeddings, vector writes, and file jobs.

use super::types::{
    BatchRecord, CreateRecordRequest, CreateRecordResponse, DEFAULT_RESULT_LIMIT, DeleteResponse,
    QueryRequest, QueryResponse, RecordError, RequestContext, SearchHits, SearchQuery,
    SearchRequest, SearchResponse, UpsertCountResponse, UpsertRecordRequest,
};
use crate::{
    embedding::{EmbeddingClient, EmbeddingClientError},
    ingest::{FileIngestor, IngestOutcome, IngestRequest, SplitOptions},
    metadata::{CollectionInfo, MetadataStore},
    qdrant::{RecordInsert, VectorStore, collection_namespace, compile_filter, compute_content_hash},
    queue::{ProcessFileJob, TaskQueue},
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Metadata key the caller's user id is stored under.
pub const USER_ID_KEY: &str = "userId";

/// Record operations exposed to the HTTP surface.
#[async_trait]
pub trait RecordApi: Send + Sync {
    /// Store a text record, or ingest a file into chunk records.
    async fn create(
        &self,
        ctx: &RequestContext,
        collection: &str,
        request: CreateRecordRequest,
    ) -> Result<CreateRecordResponse, RecordError>;

    /// Embed and upsert caller-keyed records in one round trip.
    async fn upsert_batch(
        &self,
        ctx: &RequestContext,
        collection: &str,
        records: Vec<BatchRecord>,
    ) -> Result<UpsertCountResponse, RecordError>;

    /// Page through records matching a filter expression.
    async fn query(
        &self,
        ctx: &RequestContext,
        collection: &str,
        request: QueryRequest,
    ) -> Result<QueryResponse, RecordError>;

    /// Similarity search for one or more query texts.
    async fn search(
        &self,
        ctx: &RequestContext,
        collection: &str,
        request: SearchRequest,
    ) -> Result<SearchResponse, RecordError>;

    /// Delete a record by primary key.
    async fn delete(
        &self,
        ctx: &RequestContext,
        collection: &str,
        pk: &str,
    ) -> Result<DeleteResponse, RecordError>;

    /// Re-embed and replace a single record by primary key.
    async fn upsert_one(
        &self,
        ctx: &RequestContext,
        collection: &str,
        pk: &str,
        request: UpsertRecordRequest,
    ) -> Result<UpsertCountResponse, RecordError>;
}

/// Orchestrates each record endpoint over four external collaborators.
///
/// Build once at startup and share through an `Arc`; every collaborator is itself shared.
pub struct RecordService {
    embedding_client: Arc<dyn EmbeddingClient>,
    vector_store: Arc<dyn VectorStore>,
    metadata_store: Arc<dyn MetadataStore>,
    task_queue: Arc<dyn TaskQueue>,
    ingestor: FileIngestor,
}

impl RecordService {
    /// Wire the service; `http` is used to download files for synchronous ingestion.
    pub fn new(
        embedding_client: Arc<dyn EmbeddingClient>,
        vector_store: Arc<dyn VectorStore>,
        metadata_store: Arc<dyn MetadataStore>,
        task_queue: Arc<dyn TaskQueue>,
        http: reqwest::Client,
    ) -> Self {
        let ingestor = FileIngestor::new(
            http,
            embedding_client.clone(),
            vector_store.clone(),
            metadata_store.clone(),
        );
        Self {
            embedding_client,
            vector_store,
            metadata_store,
            task_queue,
            ingestor,
        }
    }

    async fn resolve_collection(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<CollectionInfo, RecordError> {
        self.metadata_store
            .find_collection(&ctx.app_id, &ctx.team_id, name)
            .await?
            .ok_or_else(|| RecordError::CollectionNotFound(name.to_string()))
    }

    async fn embed_one(&self, model: &str, text: String) -> Result<Vec<f32>, RecordError> {
        self.embedding_client
            .generate_embeddings(model, vec![text])
            .await?
            .into_iter()
            .next()
            .ok_or(RecordError::EmptyEmbedding)
    }

    async fn register_metadata_fields(
        &self,
        ctx: &RequestContext,
        collection: &CollectionInfo,
        metadata: &Map<String, Value>,
    ) -> Result<(), RecordError> {
        let fields: Vec<String> = metadata.keys().cloned().collect();
        self.metadata_store
            .add_metadata_fields(&ctx.app_id, &ctx.team_id, &collection.name, &fields)
            .await?;
        Ok(())
    }

    async fn create_from_text(
        &self,
        ctx: &RequestContext,
        collection: &CollectionInfo,
        text: String,
        metadata: Map<String, Value>,
    ) -> Result<CreateRecordResponse, RecordError> {
        let physical = collection_namespace(&ctx.app_id, &collection.name);
        let vector = self
            .embed_one(&collection.embedding_model, text.clone())
            .await?;
        let pk = compute_content_hash(&text);
        let summary = self
            .vector_store
            .upsert_records(
                &physical,
                vec![RecordInsert {
                    pk: pk.clone(),
                    text,
                    vector,
                    metadata: metadata.clone(),
                }],
            )
            .await?;
        self.register_metadata_fields(ctx, collection, &metadata)
            .await?;
        tracing::info!(collection = %physical, pk = %pk, "Text record stored");
        Ok(CreateRecordResponse::Written(summary))
    }

    async fn create_from_file(
        &self,
        ctx: &RequestContext,
        collection: &CollectionInfo,
        file_url: String,
        metadata: Map<String, Value>,
        run_async: bool,
        split: SplitOptions,
    ) -> Result<CreateRecordResponse, RecordError> {
        let task_id = Uuid::new_v4();
        self.metadata_store
            .create_task(&ctx.app_id, &ctx.team_id, &collection.name, task_id)
            .await?;

        if run_async {
            let job = ProcessFileJob {
                app_id: ctx.app_id.clone(),
                team_id: ctx.team_id.clone(),
                user_id: ctx.user_id.clone(),
                collection_name: collection.name.clone(),
                embedding_model: collection.embedding_model.clone(),
                file_url,
                metadata,
                task_id,
                chunk_size: split.chunk_size,
                chunk_overlap: split.chunk_overlap,
                separator: split.separator,
                pre_process_rules: split.pre_process_rules,
                jq_schema: split.jq_schema,
            };
            self.task_queue.submit(&job).await?;
            return Ok(CreateRecordResponse::Queued { task_id });
        }

        let request = IngestRequest {
            collection: collection_namespace(&ctx.app_id, &collection.name),
            embedding_model: collection.embedding_model.clone(),
            file_url,
            metadata,
            task_id,
            split,
        };
        let failure = match self.ingestor.ingest(&request).await {
            IngestOutcome::Succeeded(summary) => {
                match self
                    .register_metadata_fields(ctx, collection, &request.metadata)
                    .await
                {
                    Ok(()) => return Ok(CreateRecordResponse::Written(summary)),
                    Err(error) => error.to_string(),
                }
            }
            IngestOutcome::Failed(message) => message,
        };

        tracing::error!(
            %task_id,
            collection = %request.collection,
            error = %failure,
            "Synchronous file ingestion failed"
        );
        if let Err(error) = self.metadata_store.fail_task(task_id, &failure).await {
            tracing::error!(%task_id, error = %error, "Failed to mark task failed");
        }
        Ok(CreateRecordResponse::Failed { success: false })
    }
}

enum CreateSource {
    Text(String),
    File(String),
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}

#[async_trait]
impl RecordApi for RecordService {
    async fn create(
        &self,
        ctx: &RequestContext,
        collection: &str,
        request: CreateRecordRequest,
    ) -> Result<CreateRecordResponse, RecordError> {
        // Text wins when both are present.
        let source = match (non_empty(request.text), non_empty(request.file_url)) {
            (Some(text), _) => CreateSource::Text(text),
            (None, Some(file_url)) => CreateSource::File(file_url),
            (None, None) => {
                return Err(RecordError::InvalidRequest(
                    "either text or fileURL must be provided".to_string(),
                ));
            }
        };

        let info = self.resolve_collection(ctx, collection).await?;
        let mut metadata = request.metadata.unwrap_or_default();
        metadata.insert(USER_ID_KEY.to_string(), Value::String(ctx.user_id.clone()));

        match source {
            CreateSource::Text(text) => self.create_from_text(ctx, &info, text, metadata).await,
            CreateSource::File(file_url) => {
                let run_async = request.run_async.unwrap_or(true);
                let split = SplitOptions::from(request.split);
                self.create_from_file(ctx, &info, file_url, metadata, run_async, split)
                    .await
            }
        }
    }

    async fn upsert_batch(
        &self,
        ctx: &RequestContext,
        collection: &str,
        records: Vec<BatchRecord>,
    ) -> Result<UpsertCountResponse, RecordError> {
        // Batch upserts resolve the collection by application only.
        let info = self
            .metadata_store
            .find_collection_by_name(&ctx.app_id, collection)
            .await?
            .ok_or_else(|| RecordError::CollectionNotFound(collection.to_string()))?;
        if records.is_empty() {
            return Ok(UpsertCountResponse { upsert_count: 0 });
        }

        let texts: Vec<String> = records.iter().map(|record| record.text.clone()).collect();
        let vectors = self
            .embedding_client
            .generate_embeddings(&info.embedding_model, texts)
            .await?;
        if vectors.len() != records.len() {
            return Err(EmbeddingClientError::CountMismatch {
                expected: records.len(),
                actual: vectors.len(),
            }
            .into());
        }

        let inserts = records
            .into_iter()
            .zip(vectors)
            .map(|(record, vector)| RecordInsert {
                pk: record.pk,
                text: record.text,
                vector,
                metadata: record.metadata,
            })
            .collect();
        let physical = collection_namespace(&ctx.app_id, collection);
        let summary = self.vector_store.upsert_records(&physical, inserts).await?;
        tracing::info!(collection = %physical, upserted = summary.upsert_count, "Batch upsert completed");
        Ok(UpsertCountResponse {
            upsert_count: summary.upsert_count,
        })
    }

    async fn query(
        &self,
        ctx: &RequestContext,
        collection: &str,
        request: QueryRequest,
    ) -> Result<QueryResponse, RecordError> {
        let filter = compile_filter(request.expr.as_deref().unwrap_or(""))?;
        let physical = collection_namespace(&ctx.app_id, collection);
        let records = self
            .vector_store
            .query_records(
                &physical,
                filter,
                request.offset.unwrap_or(0),
                request.limit.unwrap_or(DEFAULT_RESULT_LIMIT),
            )
            .await?;
        tracing::debug!(collection = %physical, returned = records.len(), "Query completed");
        Ok(QueryResponse { records })
    }

    async fn search(
        &self,
        ctx: &RequestContext,
        collection: &str,
        request: SearchRequest,
    ) -> Result<SearchResponse, RecordError> {
        let (texts, single) = match request.q {
            Some(SearchQuery::Single(text)) => (vec![text], true),
            Some(SearchQuery::Many(texts)) if !texts.is_empty() => (texts, false),
            Some(SearchQuery::Many(_)) => {
                return Err(RecordError::InvalidRequest("q must not be empty".to_string()));
            }
            None => return Err(RecordError::InvalidRequest("q is required".to_string())),
        };
        let filter = compile_filter(request.expr.as_deref().unwrap_or(""))?;

        let info = self.resolve_collection(ctx, collection).await?;
        let query_count = texts.len();
        let vectors = self
            .embedding_client
            .generate_embeddings(&info.embedding_model, texts)
            .await?;
        if vectors.len() != query_count {
            return Err(EmbeddingClientError::CountMismatch {
                expected: query_count,
                actual: vectors.len(),
            }
            .into());
        }

        let physical = collection_namespace(&ctx.app_id, collection);
        let mut hits = self
            .vector_store
            .search_records(
                &physical,
                vectors,
                filter,
                request.limit.unwrap_or(DEFAULT_RESULT_LIMIT),
            )
            .await?;
        tracing::debug!(collection = %physical, queries = query_count, "Search completed");

        let records = if single {
            SearchHits::Single(hits.pop().unwrap_or_default())
        } else {
            SearchHits::Batch(hits)
        };
        Ok(SearchResponse { records })
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        collection: &str,
        pk: &str,
    ) -> Result<DeleteResponse, RecordError> {
        let physical = collection_namespace(&ctx.app_id, collection);
        let delete_count = self.vector_store.delete_record(&physical, pk).await?;
        tracing::info!(collection = %physical, pk, delete_count, "Record delete completed");
        Ok(DeleteResponse { delete_count })
    }

    async fn upsert_one(
        &self,
        ctx: &RequestContext,
        collection: &str,
        pk: &str,
        request: UpsertRecordRequest,
    ) -> Result<UpsertCountResponse, RecordError> {
        let text = request
            .text
            .ok_or_else(|| RecordError::InvalidRequest("text is required".to_string()))?;
        let info = self.resolve_collection(ctx, collection).await?;
        let vector = self.embed_one(&info.embedding_model, text.clone()).await?;

        let physical = collection_namespace(&ctx.app_id, collection);
        let summary = self
            .vector_store
            .upsert_records(
                &physical,
                vec![RecordInsert {
                    pk: pk.to_string(),
                    text,
                    vector,
                    metadata: request.metadata.unwrap_or_default(),
                }],
            )
            .await?;
        tracing::info!(collection = %physical, pk, "Record upserted");
        Ok(UpsertCountResponse {
            upsert_count: summary.upsert_count,
        })
    }
}
