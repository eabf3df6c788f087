use std::env;
use std::str::FromStr;

pub enum EnvKey {
    DatabaseUrl,
    PollIntervalMs,
    WorkDir,
    HealthPort,
    S3Endpoint,
    S3Bucket,
    S3Region,
    S3AccessKey,
    S3SecretKey,
    S3PublicUrl,
    StorageNamespace,
    FfmpegPath,
    FfprobePath,
    ShutdownGraceSecs,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::PollIntervalMs => "POLL_INTERVAL_MS",
            EnvKey::WorkDir => "WORK_DIR",
            EnvKey::HealthPort => "HEALTH_PORT",
            EnvKey::S3Endpoint => "S3_ENDPOINT",
            EnvKey::S3Bucket => "S3_BUCKET",
            EnvKey::S3Region => "S3_REGION",
            EnvKey::S3AccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::S3SecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::S3PublicUrl => "S3_PUBLIC_URL",
            EnvKey::StorageNamespace => "STORAGE_NAMESPACE",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
            EnvKey::ShutdownGraceSecs => "SHUTDOWN_GRACE_SECS",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
