use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub mod s3;

pub const HLS_PLAYLIST_MIME: &str = "application/vnd.apple.mpegurl";
pub const MPEG_TS_MIME: &str = "video/mp2t";

/// Blob storage used for source downloads and publishing processed output.
///
/// Both operations overwrite unconditionally, so a retried job can re-run them safely.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Streams the object at `key` into `local_path`.
    async fn download(&self, key: &str, local_path: &Path) -> Result<()>;

    /// Streams `local_path` to `key`.
    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<()>;
}

/// Content type for a file of the processed output tree.
pub fn content_type_for(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("m3u8") => HLS_PLAYLIST_MIME.to_string(),
        Some("ts") => MPEG_TS_MIME.to_string(),
        _ => mime_guess::from_path(path)
            .first()
            .filter(|m| m.type_() == mime::IMAGE)
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string()),
    }
}

/// Uploads every file below `local_dir` to `key_prefix/<relative path>`.
///
/// Files are uploaded in lexical path order. Returns the keys written.
pub async fn upload_tree<F>(
    store: &dyn ObjectStore,
    local_dir: &Path,
    key_prefix: &str,
    content_type: F,
) -> Result<Vec<String>>
where
    F: Fn(&Path) -> String,
{
    let files = collect_files(local_dir).await?;
    let prefix = key_prefix.trim_end_matches('/');
    let mut keys = Vec::with_capacity(files.len());

    for file in files {
        let relative = file
            .strip_prefix(local_dir)
            .with_context(|| format!("{} is outside {}", file.display(), local_dir.display()))?;
        let key = object_key(prefix, relative);
        let mime = content_type(&file);

        debug!(key = %key, content_type = %mime, "Uploading object");
        store.upload(&file, &key, &mime).await?;
        keys.push(key);
    }

    info!(prefix = %prefix, objects = keys.len(), "Uploaded output tree");
    Ok(keys)
}

fn object_key(prefix: &str, relative: &Path) -> String {
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    if prefix.is_empty() {
        relative
    } else {
        format!("{}/{}", prefix, relative)
    }
}

async fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryObjectStore;

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for(Path::new("master.m3u8")), HLS_PLAYLIST_MIME);
        assert_eq!(content_type_for(Path::new("720p/segment-004.ts")), MPEG_TS_MIME);
        assert_eq!(content_type_for(Path::new("thumbnail.jpg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("poster.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("notes.txt")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
    }

    #[tokio::test]
    async fn upload_tree_keeps_relative_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("480p")).unwrap();
        std::fs::write(root.join("master.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(root.join("thumbnail.jpg"), [0xff, 0xd8]).unwrap();
        std::fs::write(root.join("480p/playlist.m3u8"), "#EXTM3U\n").unwrap();
        std::fs::write(root.join("480p/segment-000.ts"), [0x47]).unwrap();

        let store = MemoryObjectStore::default();
        let keys = upload_tree(&store, root, "videos/processed/abc/", content_type_for)
            .await
            .unwrap();

        assert_eq!(
            keys,
            vec![
                "videos/processed/abc/480p/playlist.m3u8",
                "videos/processed/abc/480p/segment-000.ts",
                "videos/processed/abc/master.m3u8",
                "videos/processed/abc/thumbnail.jpg",
            ]
        );
        assert_eq!(
            store.content_type("videos/processed/abc/480p/segment-000.ts").as_deref(),
            Some(MPEG_TS_MIME)
        );
        assert_eq!(
            store.content_type("videos/processed/abc/thumbnail.jpg").as_deref(),
            Some("image/jpeg")
        );
        assert_eq!(
            store.object("videos/processed/abc/master.m3u8").unwrap(),
            b"#EXTM3U\n".to_vec()
        );
    }

    #[tokio::test]
    async fn upload_tree_uses_resolver() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();

        let store = MemoryObjectStore::default();
        upload_tree(&store, dir.path(), "p", |_| "custom/type".to_string())
            .await
            .unwrap();

        assert_eq!(store.content_type("p/a.bin").as_deref(), Some("custom/type"));
    }
}
