//! Relational metadata: collection definitions and file-ingestion task progress.

mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use postgres::PgMetadataStore;

/// Errors raised by the metadata store.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Database driver or connection failure.
    #[error("Metadata database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A task update referenced an id that was never created.
    #[error("File task {0} not found")]
    TaskNotFound(Uuid),
}

/// A vector collection as registered in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CollectionInfo {
    /// Application that owns the collection.
    pub app_id: String,
    /// Tenant (team) that owns the collection.
    pub team_id: String,
    /// Collection name, unique per application and team.
    pub name: String,
    /// Embedding model every record in the collection is embedded with.
    pub embedding_model: String,
    /// Metadata keys observed on records written to the collection.
    pub metadata_fields: Vec<String>,
}

/// Lifecycle states of a file-ingestion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, not yet picked up.
    Pending,
    /// Ingestion running; progress is being reported.
    Processing,
    /// All chunks written.
    Completed,
    /// Ingestion aborted; the task carries an error message.
    Failed,
}

impl TaskStatus {
    /// Stable string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Accessor for collection definitions and file-task progress.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up a collection scoped to application and team.
    async fn find_collection(
        &self,
        app_id: &str,
        team_id: &str,
        name: &str,
    ) -> Result<Option<CollectionInfo>, MetadataError>;

    /// Look up a collection by application and name, regardless of team.
    async fn find_collection_by_name(
        &self,
        app_id: &str,
        name: &str,
    ) -> Result<Option<CollectionInfo>, MetadataError>;

    /// Register metadata keys on a collection; keys already present are left alone.
    async fn add_metadata_fields(
        &self,
        app_id: &str,
        team_id: &str,
        name: &str,
        fields: &[String],
    ) -> Result<(), MetadataError>;

    /// Record a new pending file-ingestion task.
    async fn create_task(
        &self,
        app_id: &str,
        team_id: &str,
        collection_name: &str,
        task_id: Uuid,
    ) -> Result<(), MetadataError>;

    /// Move a task to `processing` with the given completion fraction.
    async fn update_task_progress(&self, task_id: Uuid, progress: f32) -> Result<(), MetadataError>;

    /// Mark a task as completed.
    async fn complete_task(&self, task_id: Uuid) -> Result<(), MetadataError>;

    /// Mark a task as failed with a message.
    async fn fail_task(&self, task_id: Uuid, message: &str) -> Result<(), MetadataError>;
}
