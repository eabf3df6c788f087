use super::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// What the pipeline needs to know about a source file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    /// Seconds
    pub duration: f64,
}

#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Fails with [`PipelineError::NoVideoStream`] when the file has nothing to encode.
    async fn probe(&self, input: &Path) -> PipelineResult<MediaInfo>;
}

pub struct FfprobeProbe {
    binary: String,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, input: &Path) -> PipelineResult<MediaInfo> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PipelineError::Probe(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Probe(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }

        let info = parse_ffprobe_json(&output.stdout)?;
        debug!(width = info.width, height = info.height, duration = info.duration, "Probed source");
        Ok(info)
    }
}

pub(crate) fn parse_ffprobe_json(raw: &[u8]) -> PipelineResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(raw)
        .map_err(|e| PipelineError::Probe(format!("unreadable ffprobe output: {}", e)))?;

    let video = probe
        .streams
        .iter()
        .find(|s| {
            s.codec_type.as_deref() == Some("video")
                && s.width.unwrap_or(0) > 0
                && s.height.unwrap_or(0) > 0
        })
        .ok_or(PipelineError::NoVideoStream)?;

    // Container duration first; some muxers only report it per stream.
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    Ok(MediaInfo {
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_stream() {
        let raw = br#"{
            "streams": [
                {"index": 0, "codec_type": "audio", "codec_name": "aac"},
                {"index": 1, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080}
            ],
            "format": {"duration": "30.040000", "size": "1048576"}
        }"#;

        let info = parse_ffprobe_json(raw).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert!((info.duration - 30.04).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_stream_duration() {
        let raw = br#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 360, "duration": "12.5"}],
            "format": {}
        }"#;

        let info = parse_ffprobe_json(raw).unwrap();
        assert!((info.duration - 12.5).abs() < 1e-9);
    }

    #[test]
    fn audio_only_has_no_video_stream() {
        let raw = br#"{
            "streams": [{"codec_type": "audio", "codec_name": "mp3"}],
            "format": {"duration": "180.0"}
        }"#;

        assert!(matches!(parse_ffprobe_json(raw), Err(PipelineError::NoVideoStream)));
    }

    #[test]
    fn empty_output_has_no_video_stream() {
        assert!(matches!(parse_ffprobe_json(b"{}"), Err(PipelineError::NoVideoStream)));
    }

    #[test]
    fn garbage_is_a_probe_error() {
        assert!(matches!(parse_ffprobe_json(b"not json"), Err(PipelineError::Probe(_))));
    }
}
