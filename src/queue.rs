//! File-ingestion job queue on a Redis stream.
//!
//! Jobs are appended with `XADD` under the field `job`, JSON encoded, and read back by the
//! ingestion worker through a consumer group.
//!
//! Every delivered entry is acknowledged by the worker, including entries whose job fails to
//! parse, so a malformed message is never redelivered. Entries left unacknowledged by a worker
//! that stopped mid-job are replayed from its own pending list on restart, or claimed by another
//! worker once they have been idle long enough.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Stream field carrying the serialized job.
pub const JOB_FIELD: &str = "job";

/// Consumer group the ingestion workers share.
pub const DEFAULT_CONSUMER_GROUP: &str = "vector-records-workers";

/// Idle time after which another consumer's pending entry may be claimed.
pub const DEFAULT_CLAIM_IDLE_MS: u64 = 300_000;

const DEFAULT_MAX_LENGTH: i64 = 100_000;
const DEFAULT_BLOCK_MS: u64 = 5_000;

type StreamReply = Vec<(String, Vec<(String, Vec<(String, String)>)>)>;
type StreamEntries = Vec<(String, Vec<(String, String)>)>;
/// `XPENDING` extended form: id, consumer, idle milliseconds, delivery count.
type PendingEntry = (String, String, u64, u64);

/// Errors raised while submitting jobs.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// Job could not be serialized.
    #[error("Failed to serialize job: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Everything the worker needs to ingest one file out of process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessFileJob {
    /// Application owning the collection.
    pub app_id: String,
    /// Tenant owning the collection.
    pub team_id: String,
    /// User that submitted the file.
    pub user_id: String,
    /// Logical collection name.
    pub collection_name: String,
    /// Embedding model of the collection.
    pub embedding_model: String,
    /// Location of the file to ingest.
    pub file_url: String,
    /// Metadata attached to every chunk.
    pub metadata: Map<String, Value>,
    /// Progress-tracking task created before submission.
    pub task_id: Uuid,
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters carried over between adjacent chunks.
    pub chunk_overlap: usize,
    /// Separator the text is first split on.
    pub separator: String,
    /// Text clean-up rule ids applied before splitting.
    pub pre_process_rules: Vec<String>,
    /// Path selecting values from JSON sources.
    pub jq_schema: Option<String>,
}

/// Fire-and-forget submission of file-ingestion jobs.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a job, returning the queue's message id.
    async fn submit(&self, job: &ProcessFileJob) -> Result<String, QueueError>;
}

/// Producer appending jobs to a named Redis stream.
pub struct RedisTaskQueue {
    redis: ConnectionManager,
    stream_name: String,
    max_length: i64,
}

impl RedisTaskQueue {
    /// Create a producer for `stream_name` over an existing connection manager.
    pub fn new(redis: ConnectionManager, stream_name: impl Into<String>) -> Self {
        Self {
            redis,
            stream_name: stream_name.into(),
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// Open a connection manager against `redis_url`.
    pub async fn connect(redis_url: &str, stream_name: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager, stream_name))
    }

    /// Stream this producer writes to.
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn submit(&self, job: &ProcessFileJob) -> Result<String, QueueError> {
        let mut conn = self.redis.clone();
        let job_json = serde_json::to_string(job)?;

        // MAXLEN ~ trims approximately, which Redis can do without scanning.
        let stream_id: String = redis::cmd("XADD")
            .arg(&self.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(JOB_FIELD)
            .arg(&job_json)
            .query_async(&mut conn)
            .await?;

        tracing::info!(
            stream = %self.stream_name,
            stream_id = %stream_id,
            task_id = %job.task_id,
            collection = %job.collection_name,
            "Enqueued file ingestion job"
        );
        Ok(stream_id)
    }
}

/// Entry read from the job stream.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    /// Stream id used to acknowledge the entry.
    pub stream_id: String,
    /// Decoded job, or `None` when the entry carried no parsable job.
    pub job: Option<ProcessFileJob>,
}

/// Consumer-group reader over the job stream.
pub struct RedisJobConsumer {
    redis: ConnectionManager,
    stream_name: String,
    group: String,
    consumer: String,
    block_ms: u64,
    claim_idle_ms: u64,
}

impl RedisJobConsumer {
    /// Create a reader for `stream_name` identifying itself as `consumer` in `group`.
    pub fn new(
        redis: ConnectionManager,
        stream_name: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            redis,
            stream_name: stream_name.into(),
            group: group.into(),
            consumer: consumer.into(),
            block_ms: DEFAULT_BLOCK_MS,
            claim_idle_ms: DEFAULT_CLAIM_IDLE_MS,
        }
    }

    /// Override how long another consumer's entry must sit idle before it is claimed.
    pub fn with_claim_idle_ms(mut self, claim_idle_ms: u64) -> Self {
        self.claim_idle_ms = claim_idle_ms;
        self
    }

    /// Open a connection manager against `redis_url`.
    pub async fn connect(
        redis_url: &str,
        stream_name: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager, stream_name, group, consumer))
    }

    /// Create the consumer group (and the stream) unless it already exists.
    pub async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_name)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                tracing::info!(stream = %self.stream_name, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(err) if err.to_string().contains("BUSYGROUP") => {
                tracing::debug!(stream = %self.stream_name, group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Block until new entries arrive or the block timeout elapses.
    pub async fn read_new(&self, count: usize) -> Result<Vec<QueuedJob>, QueueError> {
        let mut conn = self.redis.clone();
        let reply: Option<StreamReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("BLOCK")
            .arg(self.block_ms)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_stream, entries)| parse_entries(entries))
            .collect())
    }

    /// Entries already delivered to this consumer but never acknowledged.
    pub async fn read_pending(&self, count: usize) -> Result<Vec<QueuedJob>, QueueError> {
        let mut conn = self.redis.clone();
        let reply: Option<StreamReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.stream_name)
            .arg("0")
            .query_async(&mut conn)
            .await?;

        Ok(reply
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(_stream, entries)| parse_entries(entries))
            .collect())
    }

    /// Take over entries other consumers left idle past the claim threshold.
    pub async fn claim_stale(&self, count: usize) -> Result<Vec<QueuedJob>, QueueError> {
        let mut conn = self.redis.clone();
        let pending: Vec<PendingEntry> = redis::cmd("XPENDING")
            .arg(&self.stream_name)
            .arg(&self.group)
            .arg("IDLE")
            .arg(self.claim_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let ids = stale_ids(&pending, &self.consumer, self.claim_idle_ms);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(&self.stream_name)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.claim_idle_ms);
        for id in &ids {
            claim.arg(id);
        }
        let entries: StreamEntries = claim.query_async(&mut conn).await?;

        let claimed = parse_entries(entries);
        if !claimed.is_empty() {
            tracing::warn!(
                stream = %self.stream_name,
                count = claimed.len(),
                "Claimed abandoned jobs"
            );
        }
        Ok(claimed)
    }

    /// Acknowledge a processed entry.
    pub async fn ack(&self, stream_id: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream_name)
            .arg(&self.group)
            .arg(stream_id)
            .query_async(&mut conn)
            .await?;
        tracing::debug!(stream_id, "Acknowledged job");
        Ok(())
    }
}

fn stale_ids(pending: &[PendingEntry], consumer: &str, min_idle_ms: u64) -> Vec<String> {
    pending
        .iter()
        .filter(|(_, owner, idle_ms, _)| owner != consumer && *idle_ms >= min_idle_ms)
        .map(|(id, _, _, _)| id.clone())
        .collect()
}

fn parse_entries(entries: StreamEntries) -> Vec<QueuedJob> {
    entries
        .into_iter()
        .map(|(stream_id, fields)| {
            let job = match fields.iter().find(|(key, _)| key == JOB_FIELD) {
                Some((_, raw)) => match serde_json::from_str::<ProcessFileJob>(raw) {
                    Ok(job) => Some(job),
                    Err(err) => {
                        tracing::warn!(stream_id = %stream_id, error = %err, "Failed to parse job");
                        None
                    }
                },
                None => {
                    tracing::warn!(stream_id = %stream_id, "Missing job field in stream entry");
                    None
                }
            };
            QueuedJob { stream_id, job }
        })
        .collect()
}
