use serde::Serialize;

/// One quality level of the encoding ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityRung {
    pub name: String,
    pub height: u32,
    /// kbps
    pub video_bitrate: u32,
    /// kbps
    pub audio_bitrate: u32,
    /// x264 constant rate factor.
    pub crf: u8,
}

impl QualityRung {
    pub fn new(name: &str, height: u32, video_bitrate: u32, audio_bitrate: u32, crf: u8) -> Self {
        Self {
            name: name.to_string(),
            height,
            video_bitrate,
            audio_bitrate,
            crf,
        }
    }

    /// Declared HLS bandwidth in bits per second.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.video_bitrate) * 1000
    }
}

/// Highest quality first.
pub fn default_ladder() -> Vec<QualityRung> {
    vec![
        QualityRung::new("1080p", 1080, 5000, 192, 22),
        QualityRung::new("720p", 720, 2800, 128, 23),
        QualityRung::new("480p", 480, 1400, 128, 24),
    ]
}

/// Rungs worth encoding for a source of `source_height`.
///
/// Every rung at or below the source height, in ladder order. A source smaller than every
/// rung still gets the lowest one so the job always publishes at least one variant.
pub fn select_rungs(ladder: &[QualityRung], source_height: u32) -> Vec<QualityRung> {
    let selected: Vec<QualityRung> = ladder
        .iter()
        .filter(|r| r.height <= source_height)
        .cloned()
        .collect();

    if !selected.is_empty() {
        return selected;
    }

    ladder
        .iter()
        .min_by_key(|r| (r.height, r.video_bitrate))
        .cloned()
        .into_iter()
        .collect()
}

/// Output dimensions for `rung`: aspect preserved, width rounded to even, never upscaled.
pub fn output_dimensions(source_width: u32, source_height: u32, rung: &QualityRung) -> (u32, u32) {
    let height = rung.height.min(source_height);
    if source_height == 0 {
        return (0, height);
    }

    let exact = f64::from(source_width) * f64::from(height) / f64::from(source_height);
    let width = ((exact / 2.0).round() as u32) * 2;
    (width, height)
}
