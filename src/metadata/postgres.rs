//! PostgreSQL-backed metadata store.

use super::{CollectionInfo, MetadataError, MetadataStore, TaskStatus};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS vector_collections (
        app_id TEXT NOT NULL,
        team_id TEXT NOT NULL,
        name TEXT NOT NULL,
        embedding_model TEXT NOT NULL,
        metadata_fields TEXT[] NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (app_id, team_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS file_process_tasks (
        task_id UUID PRIMARY KEY,
        app_id TEXT NOT NULL,
        team_id TEXT NOT NULL,
        collection_name TEXT NOT NULL,
        status TEXT NOT NULL,
        progress REAL NOT NULL DEFAULT 0,
        message TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

const COLLECTION_COLUMNS: &str = "app_id, team_id, name, embedding_model, metadata_fields";

/// Metadata store over a shared `PgPool`.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, MetadataError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        tracing::debug!("Connected to metadata database");
        Ok(Self::new(pool))
    }

    /// Create the metadata tables when they are missing.
    pub async fn ensure_schema(&self) -> Result<(), MetadataError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("Metadata schema ensured");
        Ok(())
    }

    async fn set_task_state(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        progress: Option<f32>,
        message: Option<&str>,
    ) -> Result<(), MetadataError> {
        let result = sqlx::query(
            "UPDATE file_process_tasks \
             SET status = $2, progress = COALESCE($3, progress), message = COALESCE($4, message), \
                 updated_at = now() \
             WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(progress)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::TaskNotFound(task_id));
        }
        tracing::debug!(%task_id, status = status.as_str(), ?progress, "File task updated");
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn find_collection(
        &self,
        app_id: &str,
        team_id: &str,
        name: &str,
    ) -> Result<Option<CollectionInfo>, MetadataError> {
        let collection = sqlx::query_as::<_, CollectionInfo>(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM vector_collections \
             WHERE app_id = $1 AND team_id = $2 AND name = $3"
        ))
        .bind(app_id)
        .bind(team_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(collection)
    }

    async fn find_collection_by_name(
        &self,
        app_id: &str,
        name: &str,
    ) -> Result<Option<CollectionInfo>, MetadataError> {
        let collection = sqlx::query_as::<_, CollectionInfo>(&format!(
            "SELECT {COLLECTION_COLUMNS} FROM vector_collections \
             WHERE app_id = $1 AND name = $2 \
             ORDER BY created_at LIMIT 1"
        ))
        .bind(app_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(collection)
    }

    async fn add_metadata_fields(
        &self,
        app_id: &str,
        team_id: &str,
        name: &str,
        fields: &[String],
    ) -> Result<(), MetadataError> {
        if fields.is_empty() {
            return Ok(());
        }

        // Union that keeps the first-seen order of keys.
        sqlx::query(
            "UPDATE vector_collections \
             SET metadata_fields = ARRAY( \
                 SELECT field FROM unnest(metadata_fields || $4::text[]) \
                     WITH ORDINALITY AS t(field, position) \
                 GROUP BY field ORDER BY min(position)) \
             WHERE app_id = $1 AND team_id = $2 AND name = $3",
        )
        .bind(app_id)
        .bind(team_id)
        .bind(name)
        .bind(fields)
        .execute(&self.pool)
        .await?;
        tracing::debug!(collection = name, fields = fields.len(), "Metadata fields registered");
        Ok(())
    }

    async fn create_task(
        &self,
        app_id: &str,
        team_id: &str,
        collection_name: &str,
        task_id: Uuid,
    ) -> Result<(), MetadataError> {
        sqlx::query(
            "INSERT INTO file_process_tasks (task_id, app_id, team_id, collection_name, status) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(task_id)
        .bind(app_id)
        .bind(team_id)
        .bind(collection_name)
        .bind(TaskStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        tracing::info!(%task_id, collection = collection_name, "File task created");
        Ok(())
    }

    async fn update_task_progress(&self, task_id: Uuid, progress: f32) -> Result<(), MetadataError> {
        self.set_task_state(
            task_id,
            TaskStatus::Processing,
            Some(progress.clamp(0.0, 1.0)),
            None,
        )
        .await
    }

    async fn complete_task(&self, task_id: Uuid) -> Result<(), MetadataError> {
        self.set_task_state(task_id, TaskStatus::Completed, Some(1.0), None)
            .await
    }

    async fn fail_task(&self, task_id: Uuid, message: &str) -> Result<(), MetadataError> {
        self.set_task_state(task_id, TaskStatus::Failed, None, Some(message))
            .await
    }
}
