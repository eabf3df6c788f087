use crate::infrastructure::storage::s3::StorageService;
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use futures_util::StreamExt;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

// Minimum part size for S3 is 5MB. We use 8MB to stay clear of it.
const PART_SIZE: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 256 * 1024;

pub struct MultipartUploader<'a> {
    storage: &'a StorageService,
    key: String,
    upload_id: String,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    part_number: i32,
    buffer: Vec<u8>,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(storage: &'a StorageService, key: String, content_type: &str) -> Result<Self> {
        let upload_id = storage.create_multipart_upload(&key, content_type).await?;

        Ok(Self {
            storage,
            key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            buffer: Vec::with_capacity(PART_SIZE),
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);

        if self.buffer.len() >= PART_SIZE {
            self.flush_part().await?;
        }

        Ok(())
    }

    async fn flush_part(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let body = Bytes::from(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(PART_SIZE),
        ));

        let part = self
            .storage
            .upload_part(&self.key, &self.upload_id, self.part_number, body)
            .await?;

        self.parts.push(part);
        self.part_number += 1;

        Ok(())
    }

    pub async fn finish(mut self) -> Result<usize> {
        self.flush_part().await?;

        let parts = self.parts.len();
        let completed = std::mem::take(&mut self.parts);
        if let Err(e) = self
            .storage
            .complete_multipart_upload(&self.key, &self.upload_id, completed)
            .await
        {
            return Err(self.abort_with(e).await);
        }

        Ok(parts)
    }

    /// Aborts after `err` and returns it; a failing abort is only logged.
    async fn abort_with(&self, err: anyhow::Error) -> anyhow::Error {
        error!(key = %self.key, "Upload error: {:#}", err);
        if let Err(abort_err) = self.abort().await {
            error!(key = %self.key, "Failed to abort upload: {:#}", abort_err);
        }
        err
    }

    pub async fn abort(&self) -> Result<()> {
        self.storage
            .abort_multipart_upload(&self.key, &self.upload_id)
            .await
    }
}

/// Streams a local file to `key` in fixed-size parts, never holding more than one part in memory.
pub async fn stream_file_to_s3(
    storage: &StorageService,
    path: &Path,
    key: String,
    content_type: &str,
) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut stream = ReaderStream::with_capacity(file, READ_CHUNK);

    let mut uploader = MultipartUploader::new(storage, key.clone(), content_type).await?;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let err = anyhow!("Reading {} interrupted: {}", path.display(), e);
                return Err(uploader.abort_with(err).await);
            }
        };

        if let Err(e) = uploader.write_chunk(chunk).await {
            return Err(uploader.abort_with(e).await);
        }
    }

    if let Err(e) = uploader.flush_part().await {
        return Err(uploader.abort_with(e).await);
    }

    let parts = uploader.finish().await?;
    info!(key = %key, parts, "Uploaded object in parts");
    Ok(())
}
