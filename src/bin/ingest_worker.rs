//! Out-of-process file ingestion.
//!
//! Reads `ProcessFileJob`s from the configured Redis stream through a consumer group and runs each
//! through the same ingestor the HTTP service uses for synchronous requests. On startup the
//! worker replays its own unacknowledged entries; while running it also claims entries that
//! other workers abandoned.

use anyhow::Context;
use std::sync::Arc;
use vector_records::{
    config, embedding,
    ingest::{FileIngestor, IngestOutcome},
    logging,
    metadata::PgMetadataStore,
    qdrant::QdrantService,
    queue::{DEFAULT_CONSUMER_GROUP, QueuedJob, RedisJobConsumer},
};

const READ_BATCH: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing("ingest-worker");
    let config = config::init_config().context("Failed to load configuration")?;

    let metadata_store = PgMetadataStore::connect(&config.database_url)
        .await
        .context("Failed to connect to the metadata database")?;
    metadata_store
        .ensure_schema()
        .await
        .context("Failed to ensure metadata schema")?;
    let vector_store = QdrantService::new(&config.qdrant_url, config.qdrant_api_key.clone())
        .context("Failed to build Qdrant client")?;
    let embedding_client =
        embedding::build_embedding_client(config).context("Failed to build embedding client")?;
    let ingestor = FileIngestor::new(
        reqwest::Client::new(),
        embedding_client,
        Arc::new(vector_store),
        Arc::new(metadata_store),
    );

    let consumer_name = config
        .worker_consumer_name
        .clone()
        .unwrap_or_else(|| format!("ingest-worker-{}", std::process::id()));
    let consumer = RedisJobConsumer::connect(
        &config.redis_url,
        config.process_file_queue.clone(),
        DEFAULT_CONSUMER_GROUP,
        consumer_name.clone(),
    )
    .await
    .context("Failed to connect to Redis")?;
    consumer
        .ensure_group()
        .await
        .context("Failed to create consumer group")?;

    tracing::info!(
        stream = %config.process_file_queue,
        consumer = %consumer_name,
        "Ingest worker started"
    );

    // Replay until every entry this consumer already received has been acknowledged.
    loop {
        let entries = consumer
            .read_pending(READ_BATCH)
            .await
            .context("Failed to read pending jobs")?;
        if entries.is_empty() {
            break;
        }
        tracing::info!(count = entries.len(), "Replaying unacknowledged jobs");
        if handle(&ingestor, &consumer, entries).await == 0 {
            break;
        }
    }

    loop {
        match consumer.claim_stale(READ_BATCH).await {
            Ok(entries) => {
                handle(&ingestor, &consumer, entries).await;
            }
            Err(error) => tracing::error!(error = %error, "Failed to claim abandoned jobs"),
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested; stopping ingest worker");
                return Ok(());
            }
            batch = consumer.read_new(READ_BATCH) => {
                match batch {
                    Ok(entries) => {
                        handle(&ingestor, &consumer, entries).await;
                    }
                    Err(error) => {
                        tracing::error!(error = %error, "Failed to read job stream");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Process and acknowledge `entries`; returns how many were acknowledged.
async fn handle(
    ingestor: &FileIngestor,
    consumer: &RedisJobConsumer,
    entries: Vec<QueuedJob>,
) -> usize {
    let mut acked = 0;
    for entry in entries {
        if let Some(job) = &entry.job {
            match ingestor.process_job(job).await {
                IngestOutcome::Succeeded(summary) => tracing::info!(
                    task_id = %job.task_id,
                    upserted = summary.upsert_count,
                    "Job completed"
                ),
                IngestOutcome::Failed(message) => tracing::warn!(
                    task_id = %job.task_id,
                    error = %message,
                    "Job failed"
                ),
            }
        }
        match consumer.ack(&entry.stream_id).await {
            Ok(()) => acked += 1,
            Err(error) => {
                tracing::error!(stream_id = %entry.stream_id, error = %error, "Failed to acknowledge job")
            }
        }
    }
    acked
}
