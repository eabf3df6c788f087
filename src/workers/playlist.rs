use super::transcoder::RungOutput;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const MASTER_PLAYLIST: &str = "master.m3u8";

/// Renders the HLS master playlist, highest bandwidth first.
pub fn build_master_playlist(outputs: &[RungOutput]) -> String {
    let mut variants: Vec<&RungOutput> = outputs.iter().collect();
    variants.sort_by(|a, b| b.rung.bandwidth().cmp(&a.rung.bandwidth()));

    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for variant in variants {
        // Writing into a String cannot fail.
        let _ = writeln!(
            playlist,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}",
            variant.rung.bandwidth(),
            variant.width,
            variant.height
        );
        let _ = writeln!(playlist, "{}", variant.playlist);
    }
    playlist
}

/// Writes `master.m3u8` into `output_root` and returns its path.
pub async fn write_master_playlist(
    output_root: &Path,
    outputs: &[RungOutput],
) -> std::io::Result<PathBuf> {
    let path = output_root.join(MASTER_PLAYLIST);
    tokio::fs::write(&path, build_master_playlist(outputs)).await?;
    Ok(path)
}
