use super::model::{Job, JobResult, JobStatus};
use crate::infrastructure::db::pool::DbPool;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Persisted queue of transcoding jobs, owned by the surrounding application.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Atomically moves the oldest claimable PENDING job to PROCESSING and returns it.
    ///
    /// Progress and the previous error are reset in the same statement, so a retried job
    /// never shows its old progress while PROCESSING.
    async fn claim_next(&self, max_retries: i32) -> Result<Option<Job>>;

    /// Never lowers progress; the claim already reset it.
    async fn mark_processing(&self, id: Uuid) -> Result<()>;

    /// Never lowers the stored value.
    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<()>;

    async fn mark_completed(&self, id: Uuid, result: &JobResult) -> Result<()>;

    /// Records the failure and returns the incremented retry count.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<i32>;
}

pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn claim_next(&self, max_retries: i32) -> Result<Option<Job>> {
        // SKIP LOCKED lets several workers poll the same table without blocking on each other.
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE video_processing_jobs
            SET status = $1, progress = 0, error = NULL, started_at = NOW()
            WHERE id = (
                SELECT id FROM video_processing_jobs
                WHERE status = $2 AND retry_count < $3
                ORDER BY created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status = $2
            RETURNING *
            "#,
        )
        .bind(JobStatus::Processing.as_str())
        .bind(JobStatus::Pending.as_str())
        .bind(max_retries)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn mark_processing(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE video_processing_jobs
            SET status = $1, error = NULL, started_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(JobStatus::Processing.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE video_processing_jobs
            SET progress = $1
            WHERE id = $2 AND status = $3 AND progress < $1
            "#,
        )
        .bind(progress)
        .bind(id)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, result: &JobResult) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE video_processing_jobs
            SET
                status = $1,
                progress = 100,
                hls_url = $2,
                thumbnail_url = $3,
                duration = $4,
                error = NULL,
                completed_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(&result.hls_url)
        .bind(&result.thumbnail_url)
        .bind(result.duration)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<i32> {
        let retry_count: i32 = sqlx::query_scalar(
            r#"
            UPDATE video_processing_jobs
            SET status = $1, error = $2, retry_count = retry_count + 1
            WHERE id = $3
            RETURNING retry_count
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(error)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(retry_count)
    }
}
