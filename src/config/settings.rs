use crate::config::env::{self, EnvKey};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub poll_interval_ms: u64,
    pub work_dir: PathBuf,
    pub health_port: u16,
    pub storage: StorageConfig,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub shutdown_grace_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Base URL the processed tree is publicly served from.
    pub public_url: String,
    /// Leading key segment shared by every uploaded object.
    pub namespace: String,
}

impl AppConfig {
    pub fn new() -> Result<Self> {
        let default_work_dir = std::env::temp_dir().join("hls-worker");

        Ok(Self {
            database_url: required(EnvKey::DatabaseUrl)?,
            poll_interval_ms: env::get_parsed(EnvKey::PollIntervalMs, 10_000),
            work_dir: env::get(EnvKey::WorkDir)
                .map(PathBuf::from)
                .unwrap_or(default_work_dir),
            health_port: env::get_parsed(EnvKey::HealthPort, 3001),
            storage: StorageConfig {
                endpoint: env::get_or(EnvKey::S3Endpoint, "http://localhost:9000"),
                bucket: env::get_or(EnvKey::S3Bucket, "media"),
                region: env::get_or(EnvKey::S3Region, "us-east-1"),
                access_key: required(EnvKey::S3AccessKey)?,
                secret_key: required(EnvKey::S3SecretKey)?,
                public_url: required(EnvKey::S3PublicUrl)?
                    .trim_end_matches('/')
                    .to_string(),
                namespace: env::get_or(EnvKey::StorageNamespace, "videos")
                    .trim_matches('/')
                    .to_string(),
            },
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            ffprobe_path: env::get_or(EnvKey::FfprobePath, "ffprobe"),
            shutdown_grace_secs: env::get_parsed(EnvKey::ShutdownGraceSecs, 300),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn required(key: EnvKey) -> Result<String> {
    let name = key.as_str();
    env::get(key).with_context(|| format!("missing required environment variable {}", name))
}
