//! In-memory stand-ins for the database, object storage and ffmpeg used by unit tests.

use crate::infrastructure::storage::ObjectStore;
use crate::modules::job::model::{Job, JobResult, JobStatus};
use crate::modules::job::repository::JobStore;
use crate::modules::media::model::VideoStatus;
use crate::modules::media::repository::MediaStore;
use crate::workers::error::{PipelineError, PipelineResult};
use crate::workers::ladder::QualityRung;
use crate::workers::probe::{MediaInfo, MediaProbe};
use crate::workers::transcoder::{Encoder, RungOutput, VARIANT_PLAYLIST};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::Notify;
use uuid::Uuid;

pub fn pending_job(original_url: &str) -> Job {
    Job {
        id: Uuid::new_v4(),
        media_id: Uuid::new_v4(),
        status: JobStatus::Pending.as_str().to_string(),
        progress: 0,
        retry_count: 0,
        error: None,
        original_url: original_url.to_string(),
        hls_url: None,
        thumbnail_url: None,
        duration: None,
        created_at: OffsetDateTime::now_utc(),
        started_at: None,
        completed_at: None,
    }
}

/// Job table with compare-and-swap claims. Jobs are kept in insertion order.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
    progress: Mutex<HashMap<Uuid, Vec<i32>>>,
    fail_progress: AtomicBool,
}

impl MemoryJobStore {
    pub fn insert(&self, job: Job) {
        self.jobs.lock().unwrap().push(job);
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    /// Stored progress after every accepted update.
    pub fn progress_history(&self, id: Uuid) -> Vec<i32> {
        self.progress.lock().unwrap().get(&id).cloned().unwrap_or_default()
    }

    pub fn fail_progress_updates(&self) {
        self.fail_progress.store(true, Ordering::SeqCst);
    }

    fn compare_and_swap(&self, id: Uuid, expected: JobStatus, next: JobStatus) -> Option<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.iter_mut().find(|j| j.id == id)?;
        if job.status().ok() != Some(expected) {
            return None;
        }
        job.status = next.as_str().to_string();
        job.progress = 0;
        job.error = None;
        job.started_at = Some(OffsetDateTime::now_utc());
        Some(job.clone())
    }

    fn update<T>(&self, id: Uuid, f: impl FnOnce(&mut Job) -> T) -> Result<T> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| anyhow!("job {} not found", id))?;
        Ok(f(job))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn claim_next(&self, max_retries: i32) -> Result<Option<Job>> {
        let candidate = {
            let jobs = self.jobs.lock().unwrap();
            jobs.iter()
                .filter(|j| j.status().ok() == Some(JobStatus::Pending) && j.retry_count < max_retries)
                .min_by_key(|j| j.created_at)
                .map(|j| j.id)
        };

        let Some(id) = candidate else {
            return Ok(None);
        };

        // Let a competing claimer read the same candidate before the swap.
        tokio::task::yield_now().await;

        Ok(self.compare_and_swap(id, JobStatus::Pending, JobStatus::Processing))
    }

    async fn mark_processing(&self, id: Uuid) -> Result<()> {
        self.update(id, |job| {
            job.status = JobStatus::Processing.as_str().to_string();
            job.error = None;
            job.started_at = Some(OffsetDateTime::now_utc());
        })
    }

    async fn update_progress(&self, id: Uuid, progress: i32) -> Result<()> {
        if self.fail_progress.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset"));
        }

        let stored = self.update(id, |job| {
            if job.status().ok() == Some(JobStatus::Processing) && job.progress < progress {
                job.progress = progress;
            }
            job.progress
        })?;
        self.progress.lock().unwrap().entry(id).or_default().push(stored);
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, result: &JobResult) -> Result<()> {
        self.update(id, |job| {
            job.status = JobStatus::Completed.as_str().to_string();
            job.progress = 100;
            job.hls_url = Some(result.hls_url.clone());
            job.thumbnail_url = Some(result.thumbnail_url.clone());
            job.duration = Some(result.duration);
            job.error = None;
            job.completed_at = Some(OffsetDateTime::now_utc());
        })
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<i32> {
        self.update(id, |job| {
            job.status = JobStatus::Failed.as_str().to_string();
            job.error = Some(error.to_string());
            job.retry_count += 1;
            job.retry_count
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaRecord {
    pub hls_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_duration: Option<i32>,
    pub video_status: Option<VideoStatus>,
}

#[derive(Default)]
pub struct MemoryMediaStore {
    records: Mutex<HashMap<Uuid, MediaRecord>>,
}

impl MemoryMediaStore {
    pub fn insert(&self, media_id: Uuid) {
        self.records.lock().unwrap().insert(media_id, MediaRecord::default());
    }

    pub fn get(&self, media_id: Uuid) -> Option<MediaRecord> {
        self.records.lock().unwrap().get(&media_id).cloned()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn mark_ready(&self, media_id: Uuid, result: &JobResult) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(media_id).or_default();
        record.hls_url = Some(result.hls_url.clone());
        record.thumbnail_url = Some(result.thumbnail_url.clone());
        record.video_duration = Some(result.duration);
        record.video_status = Some(VideoStatus::Ready);
        Ok(())
    }

    async fn mark_failed(&self, media_id: Uuid) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        records.entry(media_id).or_default().video_status = Some(VideoStatus::Failed);
        Ok(())
    }
}

/// Bucket contents keyed by object key, with the content type each was written with.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    uploads: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    /// Seeds an object without counting it as an upload.
    pub fn put(&self, key: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes, "video/mp4".to_string()));
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|(b, _)| b.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).map(|(_, t)| t.clone())
    }

    pub fn uploaded_keys(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        let bytes = self
            .object(key)
            .ok_or_else(|| anyhow!("NoSuchKey: {}", key))?;
        tokio::fs::write(local_path, bytes).await?;
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<()> {
        let bytes = tokio::fs::read(local_path).await?;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (bytes, content_type.to_string()));
        self.uploads.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

pub struct FakeProbe {
    info: Option<MediaInfo>,
    calls: AtomicUsize,
}

impl FakeProbe {
    pub fn video(width: u32, height: u32, duration: f64) -> Self {
        Self {
            info: Some(MediaInfo {
                width,
                height,
                duration,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    /// Behaves like an audio-only source.
    pub fn no_video() -> Self {
        Self {
            info: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, _input: &Path) -> PipelineResult<MediaInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.info.ok_or(PipelineError::NoVideoStream)
    }
}

/// Writes a plausible rung layout instead of running ffmpeg.
#[derive(Default)]
pub struct FakeEncoder {
    fail_on: Option<String>,
    gate: Option<Arc<Notify>>,
    opened: AtomicBool,
    transcoded: Mutex<Vec<String>>,
    thumbnails: Mutex<Vec<f64>>,
}

impl FakeEncoder {
    pub fn failing_on(mut self, rung: &str) -> Self {
        self.fail_on = Some(rung.to_string());
        self
    }

    /// The first rung blocks until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Rung names in the order they were started.
    pub fn transcoded(&self) -> Vec<String> {
        self.transcoded.lock().unwrap().clone()
    }

    pub fn thumbnail_offsets(&self) -> Vec<f64> {
        self.thumbnails.lock().unwrap().clone()
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn transcode(
        &self,
        _input: &Path,
        source: &MediaInfo,
        rung: &QualityRung,
        output_root: &Path,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> PipelineResult<RungOutput> {
        self.transcoded.lock().unwrap().push(rung.name.clone());

        if let Some(gate) = &self.gate {
            if !self.opened.load(Ordering::SeqCst) {
                gate.notified().await;
                self.opened.store(true, Ordering::SeqCst);
            }
        }

        // Repeats and overshoot included, as ffmpeg reports them.
        for fraction in [0.25, 0.5, 0.5, 0.9, 1.1] {
            on_progress(source.duration * fraction);
        }

        if self.fail_on.as_deref() == Some(rung.name.as_str()) {
            return Err(PipelineError::encoder(&rung.name, "exit status: 1: Conversion failed!"));
        }

        let dir = output_root.join(&rung.name);
        let write = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join(VARIANT_PLAYLIST), "#EXTM3U\n#EXT-X-ENDLIST\n").await?;
            tokio::fs::write(dir.join("segment-000.ts"), [0x47u8; 188]).await
        };
        write
            .await
            .map_err(|e| PipelineError::encoder(&rung.name, e.to_string()))?;

        Ok(RungOutput::for_rung(source, rung))
    }

    async fn thumbnail(&self, _input: &Path, offset_secs: f64, output: &Path) -> PipelineResult<()> {
        self.thumbnails.lock().unwrap().push(offset_secs);
        tokio::fs::write(output, [0xffu8, 0xd8, 0xff, 0xd9])
            .await
            .map_err(|e| PipelineError::Thumbnail(e.to_string()))
    }
}
