use super::ObjectStore;
use crate::common::upload::stream_file_to_s3;
use crate::config::settings::StorageConfig;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::{config::BehaviorVersion, config::Credentials, config::Region, Client};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Files at or above this size go through the multipart uploader.
const MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
}

impl StorageService {
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "static",
        );

        let s3_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(s3_config);

        info!(endpoint = %config.endpoint, bucket = %config.bucket, "✅ Object storage client ready");

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }

    pub async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to initiate upload of {}: {}", key, DisplayErrorContext(e)))?;

        result
            .upload_id
            .ok_or_else(|| anyhow!("No upload id returned for {}", key))
    }

    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: bytes::Bytes,
    ) -> Result<CompletedPart> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to upload part {} of {}: {}", part_number, key, DisplayErrorContext(e)))?;

        let e_tag = result
            .e_tag
            .ok_or_else(|| anyhow!("No ETag returned for part {} of {}", part_number, key))?;

        Ok(CompletedPart::builder()
            .e_tag(e_tag)
            .part_number(part_number)
            .build())
    }

    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to complete upload of {}: {}", key, DisplayErrorContext(e)))?;

        Ok(())
    }

    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to abort upload of {}: {}", key, DisplayErrorContext(e)))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        debug!(key = %key, path = %local_path.display(), "Downloading object");

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to fetch {}: {}", key, DisplayErrorContext(e)))?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut reader = resp.body.into_async_read();
        let mut file = tokio::fs::File::create(local_path)
            .await
            .with_context(|| format!("Failed to create {}", local_path.display()))?;

        let bytes = tokio::io::copy(&mut reader, &mut file)
            .await
            .with_context(|| format!("Failed to stream {} to disk", key))?;
        file.flush().await?;

        info!(key = %key, bytes, "⬇️ Downloaded source object");
        Ok(())
    }

    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<()> {
        let size = tokio::fs::metadata(local_path)
            .await
            .with_context(|| format!("Failed to stat {}", local_path.display()))?
            .len();

        if size >= MULTIPART_THRESHOLD {
            return stream_file_to_s3(self, local_path, key.to_string(), content_type).await;
        }

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| anyhow!("Failed to open {}: {}", local_path.display(), e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to upload {}: {}", key, DisplayErrorContext(e)))?;

        debug!(key = %key, bytes = size, "Uploaded object");
        Ok(())
    }
}
