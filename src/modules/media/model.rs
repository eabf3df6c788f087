use serde::{Deserialize, Serialize};

/// Values of `media.video_status` written by the worker.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Ready,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Ready => "ready",
            VideoStatus::Failed => "failed",
        }
    }
}
