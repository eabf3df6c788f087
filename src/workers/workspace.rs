use super::error::{PipelineError, PipelineResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const OUTPUT_DIR: &str = "output";
pub const THUMBNAIL_FILE: &str = "thumbnail.jpg";

/// Scratch directory owned by one job for the duration of its processing.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(scratch_root: &Path, job_id: Uuid) -> Self {
        Self {
            root: scratch_root.join(job_id.to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Everything below this directory gets published.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    pub fn thumbnail_path(&self) -> PathBuf {
        self.output_dir().join(THUMBNAIL_FILE)
    }

    /// Local path for the downloaded source, keeping the object's extension for the probe.
    pub fn input_path(&self, source_key: &str) -> PathBuf {
        let extension = Path::new(source_key)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()));

        match extension {
            Some(ext) => self.root.join(format!("source.{}", ext)),
            None => self.root.join("source"),
        }
    }

    /// Creates the workspace, discarding leftovers from an earlier attempt of the same job.
    pub async fn prepare(&self) -> PipelineResult<()> {
        if tokio::fs::metadata(&self.root).await.is_ok() {
            self.cleanup().await;
        }

        let output = self.output_dir();
        tokio::fs::create_dir_all(&output)
            .await
            .map_err(|source| PipelineError::Workspace { path: output, source })?;

        debug!(path = %self.root.display(), "Workspace ready");
        Ok(())
    }

    /// Best-effort recursive delete. Errors are logged, never returned.
    pub async fn cleanup(&self) {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(path = %self.root.display(), "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), "Failed to remove workspace: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_then_cleanup() {
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::new(scratch.path(), Uuid::new_v4());

        ws.prepare().await.unwrap();
        assert!(ws.output_dir().is_dir());

        std::fs::write(ws.input_path("a/b/movie.mov"), b"data").unwrap();
        ws.cleanup().await;
        assert!(!ws.root().exists());

        // A second cleanup is a no-op.
        ws.cleanup().await;
    }

    #[tokio::test]
    async fn prepare_clears_previous_attempt() {
        let scratch = tempfile::tempdir().unwrap();
        let ws = Workspace::new(scratch.path(), Uuid::new_v4());

        ws.prepare().await.unwrap();
        std::fs::write(ws.output_dir().join("stale.ts"), b"old").unwrap();

        ws.prepare().await.unwrap();
        assert!(!ws.output_dir().join("stale.ts").exists());
    }

    #[test]
    fn input_path_keeps_safe_extension() {
        let ws = Workspace::new(Path::new("/scratch"), Uuid::nil());
        let root = PathBuf::from("/scratch").join(Uuid::nil().to_string());

        assert_eq!(ws.input_path("uploads/x/clip.MP4"), root.join("source.MP4"));
        assert_eq!(ws.input_path("uploads/x/clip"), root.join("source"));
        assert_eq!(ws.input_path("uploads/x/clip.m p4"), root.join("source"));
    }
}
