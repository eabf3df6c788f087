use super::model::VideoStatus;
use crate::infrastructure::db::pool::DbPool;
use crate::modules::job::model::JobResult;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// The media record a job publishes into. Only terminal states are written.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn mark_ready(&self, media_id: Uuid, result: &JobResult) -> Result<()>;

    async fn mark_failed(&self, media_id: Uuid) -> Result<()>;
}

pub struct MediaRepository {
    pool: DbPool,
}

impl MediaRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaStore for MediaRepository {
    async fn mark_ready(&self, media_id: Uuid, result: &JobResult) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE media
            SET hls_url = $1, thumbnail_url = $2, video_duration = $3, video_status = $4
            WHERE id = $5
            "#,
        )
        .bind(&result.hls_url)
        .bind(&result.thumbnail_url)
        .bind(result.duration)
        .bind(VideoStatus::Ready.as_str())
        .bind(media_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, media_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE media SET video_status = $1 WHERE id = $2")
            .bind(VideoStatus::Failed.as_str())
            .bind(media_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
