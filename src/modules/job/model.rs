use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Attempts allowed before a job stops being claimable.
pub const MAX_RETRIES: i32 = 3;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown job status '{0}'")]
pub struct UnknownJobStatus(pub String);

impl TryFrom<&str> for JobStatus {
    type Error = UnknownJobStatus;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(UnknownJobStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct Job {
    pub id: Uuid,
    pub media_id: Uuid,
    pub status: String, // Stored as text in DB
    pub progress: i32,
    pub retry_count: i32,
    pub error: Option<String>,
    pub original_url: String,
    pub hls_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration: Option<i32>,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
}

impl Job {
    pub fn status(&self) -> Result<JobStatus, UnknownJobStatus> {
        JobStatus::try_from(self.status.as_str())
    }
}

/// Published locations of a finished job, written to both the job and its media record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub hls_url: String,
    pub thumbnail_url: String,
    /// Whole seconds, rounded from the probed duration.
    pub duration: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_round_trips() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::try_from(status.as_str()), Ok(status));
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_eq!(
            JobStatus::try_from("pending"),
            Err(UnknownJobStatus("pending".to_string()))
        );
        assert!(JobStatus::try_from("").is_err());
    }
}
