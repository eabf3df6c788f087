use super::error::{PipelineError, PipelineResult};
use super::ladder::{default_ladder, select_rungs, QualityRung};
use super::playlist::{write_master_playlist, MASTER_PLAYLIST};
use super::probe::{MediaInfo, MediaProbe};
use super::transcoder::{Encoder, RungOutput};
use super::workspace::{Workspace, THUMBNAIL_FILE};
use crate::config::settings::AppConfig;
use crate::infrastructure::storage::{content_type_for, upload_tree, ObjectStore};
use crate::modules::job::model::{Job, JobResult, MAX_RETRIES};
use crate::modules::job::repository::JobStore;
use crate::modules::media::repository::MediaStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

/// Poster frame position. Shorter sources use their first frame.
const THUMBNAIL_OFFSET_SECS: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub work_dir: PathBuf,
    pub ladder: Vec<QualityRung>,
    pub namespace: String,
    pub public_url: String,
    pub bucket: String,
}

impl ProcessorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            ladder: default_ladder(),
            namespace: config.storage.namespace.clone(),
            public_url: config.storage.public_url.clone(),
            bucket: config.storage.bucket.clone(),
        }
    }

    /// Key prefix the output tree of `media_id` is published under.
    pub fn output_prefix(&self, media_id: Uuid) -> String {
        if self.namespace.is_empty() {
            format!("processed/{}", media_id)
        } else {
            format!("{}/processed/{}", self.namespace, media_id)
        }
    }

    pub fn public_url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_url.trim_end_matches('/'), key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(JobResult),
    Failed {
        error: String,
        /// `None` when the failure itself could not be recorded.
        retry_count: Option<i32>,
    },
}

/// Runs one claimed job from download to publish.
pub struct JobProcessor {
    jobs: Arc<dyn JobStore>,
    media: Arc<dyn MediaStore>,
    storage: Arc<dyn ObjectStore>,
    probe: Arc<dyn MediaProbe>,
    encoder: Arc<dyn Encoder>,
    settings: ProcessorSettings,
}

impl JobProcessor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        media: Arc<dyn MediaStore>,
        storage: Arc<dyn ObjectStore>,
        probe: Arc<dyn MediaProbe>,
        encoder: Arc<dyn Encoder>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            jobs,
            media,
            storage,
            probe,
            encoder,
            settings,
        }
    }

    /// Never returns an error: failures are written to the job and media records instead.
    /// The workspace is removed whatever the outcome.
    pub async fn run(&self, job: &Job) -> JobOutcome {
        let workspace = Workspace::new(&self.settings.work_dir, job.id);

        let outcome = match self.execute(job, &workspace).await {
            Ok(result) => match self.commit(job, &result).await {
                Ok(()) => JobOutcome::Completed(result),
                Err(e) => self.fail(job, e).await,
            },
            Err(e) => self.fail(job, e).await,
        };

        workspace.cleanup().await;
        outcome
    }

    async fn execute(&self, job: &Job, workspace: &Workspace) -> PipelineResult<JobResult> {
        workspace.prepare().await?;

        self.jobs
            .mark_processing(job.id)
            .await
            .map_err(|e| PipelineError::Store(format!("{:#}", e)))?;

        let key = resolve_source_key(&job.original_url, &self.settings.public_url, &self.settings.bucket)?;
        let input = workspace.input_path(&key);

        info!(job_id = %job.id, key = %key, "⬇️ Downloading source");
        self.storage
            .download(&key, &input)
            .await
            .map_err(|e| PipelineError::download(&key, format!("{:#}", e)))?;

        let source = self.probe.probe(&input).await?;
        let rungs = select_rungs(&self.settings.ladder, source.height);
        info!(
            job_id = %job.id,
            width = source.width,
            height = source.height,
            duration = source.duration,
            rungs = ?rungs.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            "Source probed"
        );

        let output_dir = workspace.output_dir();
        let outputs = self
            .encode_ladder(job.id, &input, &source, &rungs, &output_dir)
            .await?;

        self.encoder
            .thumbnail(&input, thumbnail_offset(source.duration), &workspace.thumbnail_path())
            .await?;

        write_master_playlist(&output_dir, &outputs)
            .await
            .map_err(PipelineError::Manifest)?;

        let prefix = self.settings.output_prefix(job.media_id);
        info!(job_id = %job.id, prefix = %prefix, "⬆️ Uploading output");
        upload_tree(self.storage.as_ref(), &output_dir, &prefix, content_type_for)
            .await
            .map_err(|e| PipelineError::Upload(format!("{:#}", e)))?;

        Ok(JobResult {
            hls_url: self
                .settings
                .public_url_for(&format!("{}/{}", prefix, MASTER_PLAYLIST)),
            thumbnail_url: self
                .settings
                .public_url_for(&format!("{}/{}", prefix, THUMBNAIL_FILE)),
            duration: source.duration.round() as i32,
        })
    }

    /// Encodes `rungs` one after another, stopping at the first failure.
    async fn encode_ladder(
        &self,
        job_id: Uuid,
        input: &Path,
        source: &MediaInfo,
        rungs: &[QualityRung],
        output_dir: &Path,
    ) -> PipelineResult<Vec<RungOutput>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(persist_progress(Arc::clone(&self.jobs), job_id, rx));

        let total = rungs.len();
        let mut outputs = Vec::with_capacity(total);
        let mut failure = None;

        for (index, rung) in rungs.iter().enumerate() {
            info!(job_id = %job_id, rung = %rung.name, "🎥 Encoding rung {}/{}", index + 1, total);

            let progress_tx = tx.clone();
            let duration = source.duration;
            let on_progress = move |secs: f64| {
                let _ = progress_tx.send(overall_progress(index, rung_fraction(secs, duration), total));
            };

            match self
                .encoder
                .transcode(input, source, rung, output_dir, &on_progress)
                .await
            {
                Ok(output) => {
                    outputs.push(output);
                    let _ = tx.send(overall_progress(index + 1, 0.0, total));
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        drop(tx);
        if let Err(e) = writer.await {
            warn!(job_id = %job_id, "Progress writer stopped: {}", e);
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }

    async fn commit(&self, job: &Job, result: &JobResult) -> PipelineResult<()> {
        self.jobs
            .mark_completed(job.id, result)
            .await
            .map_err(|e| PipelineError::Store(format!("{:#}", e)))?;

        if let Err(e) = self.media.mark_ready(job.media_id, result).await {
            error!(job_id = %job.id, media_id = %job.media_id, "Failed to mark media ready: {:#}", e);
        }

        info!(
            job_id = %job.id,
            media_id = %job.media_id,
            hls_url = %result.hls_url,
            duration = result.duration,
            "✅ Job completed"
        );
        Ok(())
    }

    async fn fail(&self, job: &Job, err: PipelineError) -> JobOutcome {
        let message = err.to_string();
        error!(job_id = %job.id, media_id = %job.media_id, error = %message, "❌ Job failed");

        let retry_count = match self.jobs.mark_failed(job.id, &message).await {
            Ok(count) => {
                if count >= MAX_RETRIES {
                    error!(
                        job_id = %job.id,
                        retry_count = count,
                        "Retries exhausted; job will not be claimed again"
                    );
                }
                Some(count)
            }
            Err(e) => {
                error!(job_id = %job.id, "Failed to record job failure: {:#}", e);
                None
            }
        };

        if let Err(e) = self.media.mark_failed(job.media_id).await {
            error!(job_id = %job.id, media_id = %job.media_id, "Failed to mark media failed: {:#}", e);
        }

        JobOutcome::Failed {
            error: message,
            retry_count,
        }
    }
}

/// Single writer so progress reaches the store in order; only increases are forwarded.
async fn persist_progress(
    jobs: Arc<dyn JobStore>,
    job_id: Uuid,
    mut rx: mpsc::UnboundedReceiver<i32>,
) {
    let mut last = 0;
    while let Some(progress) = rx.recv().await {
        if progress <= last {
            continue;
        }
        match jobs.update_progress(job_id, progress).await {
            Ok(()) => last = progress,
            Err(e) => warn!(job_id = %job_id, progress, "Failed to persist progress: {:#}", e),
        }
    }
}

/// Share of the current rung done, clamped to `[0, 1]`.
pub fn rung_fraction(encoded_secs: f64, duration: f64) -> f64 {
    if duration <= 0.0 || !encoded_secs.is_finite() {
        return 0.0;
    }
    (encoded_secs / duration).clamp(0.0, 1.0)
}

/// Whole-job percentage with every rung weighted equally.
pub fn overall_progress(completed_rungs: usize, rung_fraction: f64, total_rungs: usize) -> i32 {
    if total_rungs == 0 {
        return 0;
    }
    let done = (completed_rungs as f64 + rung_fraction) / total_rungs as f64;
    ((done * 100.0).round() as i32).clamp(0, 100)
}

fn thumbnail_offset(duration: f64) -> f64 {
    if duration > THUMBNAIL_OFFSET_SECS {
        THUMBNAIL_OFFSET_SECS
    } else {
        0.0
    }
}

/// Object key of the uploaded source referenced by a job.
///
/// Accepts a URL under the public base, an `s3://bucket/key` reference, an http(s) URL
/// (path-style URLs have the bucket segment removed) or a bare key.
pub fn resolve_source_key(original_url: &str, public_url: &str, bucket: &str) -> PipelineResult<String> {
    let original = original_url.trim();
    let base = public_url.trim_end_matches('/');

    let encoded_path = match original.strip_prefix(base) {
        Some(rest) if !base.is_empty() && rest.starts_with('/') => rest.to_string(),
        _ => match Url::parse(original) {
            Ok(url) => match url.scheme() {
                "s3" => url.path().to_string(),
                "http" | "https" => {
                    let path = url.path().trim_start_matches('/');
                    let bucket_prefix = format!("{}/", bucket);
                    path.strip_prefix(bucket_prefix.as_str())
                        .unwrap_or(path)
                        .to_string()
                }
                _ => return Err(PipelineError::InvalidSource(original.to_string())),
            },
            // Not absolute: already a key, taken verbatim.
            Err(_) => return non_empty_key(original, original),
        },
    };

    let key = urlencoding::decode(&encoded_path)
        .map_err(|_| PipelineError::InvalidSource(original.to_string()))?;
    non_empty_key(&key, original)
}

fn non_empty_key(key: &str, original: &str) -> PipelineResult<String> {
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        return Err(PipelineError::InvalidSource(original.to_string()));
    }
    Ok(key.to_string())
}
