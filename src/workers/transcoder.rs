use super::error::{PipelineError, PipelineResult};
use super::ladder::{output_dimensions, QualityRung};
use super::probe::MediaInfo;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const HLS_SEGMENT_SECONDS: u32 = 6;
pub const VARIANT_PLAYLIST: &str = "playlist.m3u8";
const SEGMENT_PATTERN: &str = "segment-%03d.ts";

/// Stderr lines kept for the error message of a failed run.
const STDERR_TAIL_LINES: usize = 12;

/// A finished rung, as referenced from the master playlist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RungOutput {
    pub rung: QualityRung,
    pub width: u32,
    pub height: u32,
    /// Variant playlist path relative to the output root.
    pub playlist: String,
}

impl RungOutput {
    pub fn for_rung(source: &MediaInfo, rung: &QualityRung) -> Self {
        let (width, height) = output_dimensions(source.width, source.height, rung);
        Self {
            rung: rung.clone(),
            width,
            height,
            playlist: format!("{}/{}", rung.name, VARIANT_PLAYLIST),
        }
    }
}

#[async_trait]
pub trait Encoder: Send + Sync {
    /// Encodes one rung into `output_root/<rung name>/`.
    ///
    /// `on_progress` receives encoded seconds, strictly increasing.
    async fn transcode(
        &self,
        input: &Path,
        source: &MediaInfo,
        rung: &QualityRung,
        output_root: &Path,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> PipelineResult<RungOutput>;

    /// Writes a single JPEG frame taken `offset_secs` into the source.
    async fn thumbnail(&self, input: &Path, offset_secs: f64, output: &Path) -> PipelineResult<()>;
}

pub struct FfmpegEncoder {
    binary: String,
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn spawn_error(&self, rung: &str, e: std::io::Error) -> PipelineError {
        if e.kind() == ErrorKind::NotFound {
            PipelineError::EncoderMissing(self.binary.clone())
        } else {
            PipelineError::encoder(rung, format!("failed to start {}: {}", self.binary, e))
        }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn transcode(
        &self,
        input: &Path,
        source: &MediaInfo,
        rung: &QualityRung,
        output_root: &Path,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> PipelineResult<RungOutput> {
        let rung_dir = output_root.join(&rung.name);
        tokio::fs::create_dir_all(&rung_dir)
            .await
            .map_err(|e| PipelineError::encoder(&rung.name, e.to_string()))?;

        let args = hls_args(input, rung, &rung_dir);
        debug!(rung = %rung.name, "Running {} {}", self.binary, args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(&rung.name, e))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::encoder(&rung.name, "stderr not captured"))?;

        // ffmpeg rewrites its stats line with '\r', so split on both terminators.
        let mut reader = BufReader::new(stderr);
        let mut tracker = ProgressTracker::default();
        let mut tail = StderrTail::new(STDERR_TAIL_LINES);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\r', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let chunk = String::from_utf8_lossy(&buf);
                    for line in chunk.split(['\r', '\n']) {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match parse_progress_time(line) {
                            Some(secs) => {
                                if let Some(secs) = tracker.observe(secs) {
                                    on_progress(secs);
                                }
                            }
                            None => tail.push(line),
                        }
                    }
                }
                Err(e) => {
                    warn!(rung = %rung.name, "Stopped reading encoder output: {}", e);
                    break;
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| PipelineError::encoder(&rung.name, e.to_string()))?;

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(PipelineError::encoder(
                &rung.name,
                format!("{} exited with {}: {}", self.binary, code, tail.joined()),
            ));
        }

        info!(rung = %rung.name, "Rung encoded");
        Ok(RungOutput::for_rung(source, rung))
    }

    async fn thumbnail(&self, input: &Path, offset_secs: f64, output: &Path) -> PipelineResult<()> {
        let offset = format!("{:.3}", offset_secs);
        let out = Command::new(&self.binary)
            .args(["-hide_banner", "-y", "-ss", offset.as_str(), "-i"])
            .arg(input)
            .args(["-frames:v", "1", "-vf", "scale=-2:'min(720,ih)'", "-q:v", "2"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => PipelineError::EncoderMissing(self.binary.clone()),
                _ => PipelineError::Thumbnail(e.to_string()),
            })?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let mut tail = StderrTail::new(STDERR_TAIL_LINES);
            stderr.lines().for_each(|l| tail.push(l.trim()));
            return Err(PipelineError::Thumbnail(tail.joined()));
        }

        if tokio::fs::metadata(output).await.is_err() {
            return Err(PipelineError::Thumbnail(format!(
                "no frame at {:.3}s",
                offset_secs
            )));
        }

        Ok(())
    }
}

/// ffmpeg arguments for one HLS VOD rendition of `rung` into `rung_dir`.
pub fn hls_args(input: &Path, rung: &QualityRung, rung_dir: &Path) -> Vec<String> {
    let segments = rung_dir.join(SEGMENT_PATTERN);
    let playlist = rung_dir.join(VARIANT_PLAYLIST);

    vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "0:a:0?".to_string(),
        "-vf".to_string(),
        format!("scale=-2:'min({},ih)'", rung.height),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        rung.crf.to_string(),
        "-maxrate".to_string(),
        format!("{}k", rung.video_bitrate),
        "-bufsize".to_string(),
        format!("{}k", rung.video_bitrate * 2),
        "-force_key_frames".to_string(),
        format!("expr:gte(t,n_forced*{})", HLS_SEGMENT_SECONDS),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        format!("{}k", rung.audio_bitrate),
        "-ac".to_string(),
        "2".to_string(),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        HLS_SEGMENT_SECONDS.to_string(),
        "-hls_playlist_type".to_string(),
        "vod".to_string(),
        "-hls_segment_filename".to_string(),
        segments.to_string_lossy().to_string(),
        playlist.to_string_lossy().to_string(),
    ]
}

/// Encoded position from an ffmpeg stats line (`... time=00:01:02.50 bitrate=...`), in seconds.
pub fn parse_progress_time(line: &str) -> Option<f64> {
    line.split_whitespace()
        .find_map(|token| token.strip_prefix("time="))
        .and_then(parse_timestamp)
}

fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;

    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }

    Some((hours * 3600 + minutes * 60) as f64 + seconds)
}

/// Drops progress readings that do not move forward.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Option<f64>,
}

impl ProgressTracker {
    pub fn observe(&mut self, secs: f64) -> Option<f64> {
        match self.last {
            Some(last) if secs <= last => None,
            _ => {
                self.last = Some(secs);
                Some(secs)
            }
        }
    }
}

struct StderrTail {
    lines: VecDeque<String>,
    cap: usize,
}

impl StderrTail {
    fn new(cap: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn push(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn joined(&self) -> String {
        if self.lines.is_empty() {
            return "no diagnostic output".to_string();
        }
        self.lines.iter().cloned().collect::<Vec<_>>().join(" | ")
    }
}
