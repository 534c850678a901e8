use crate::config::DatabaseConfig;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("video {0} disappeared before it could be updated")]
    Missing(Uuid),
}

/// Stored video metadata
///
/// `thumbnail_url` and `video_url` hold object references (`bucket,key`),
/// which are turned into presigned URLs on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct VideoRecord {
    pub id: Uuid,
    /// Owner of the video
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Video metadata persistence used by the upload pipeline.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get_video(&self, id: Uuid) -> Result<Option<VideoRecord>, RecordStoreError>;

    async fn update_video(&self, video: &VideoRecord) -> Result<(), RecordStoreError>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), RecordStoreError>;
}

/// PostgreSQL-backed [`VideoStore`]
pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    /// Create a new store with its own connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool (shared with the session resolver)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn get_video(&self, id: Uuid) -> Result<Option<VideoRecord>, RecordStoreError> {
        let video = sqlx::query_as::<_, VideoRecord>(
            r#"
            SELECT id, user_id, title, description,
                   thumbnail_url, video_url, created_at, updated_at
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(video)
    }

    #[instrument(skip(self, video), fields(video_id = %video.id))]
    async fn update_video(&self, video: &VideoRecord) -> Result<(), RecordStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET title = $2,
                description = $3,
                thumbnail_url = $4,
                video_url = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(video.id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.thumbnail_url)
        .bind(&video.video_url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::Missing(video.id));
        }

        debug!("Video record updated");
        Ok(())
    }

    async fn ping(&self) -> Result<(), RecordStoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
