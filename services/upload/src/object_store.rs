use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use aws_smithy_types::byte_stream::Length;
use aws_types::region::Region;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store request failed: {0}")]
    Request(String),

    #[error("failed to read local file: {0}")]
    Read(String),

    #[error("invalid presign request: {0}")]
    Presign(String),
}

/// The object store operations the pipeline depends on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the file at `path` under `bucket`/`key`.
    ///
    /// Must not leave a partial object visible under `key` on failure.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        path: &Path,
        len: u64,
    ) -> Result<(), StoreError>;

    /// Time-limited GET URL for `bucket`/`key`.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError>;
}

/// S3 (or S3-compatible) implementation of [`ObjectStore`]
pub struct S3ObjectStore {
    client: S3Client,
    multipart_threshold: u64,
    part_size: u64,
}

impl S3ObjectStore {
    /// Create a new S3 client from configuration
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self {
            client,
            multipart_threshold: config.multipart_threshold_bytes as u64,
            part_size: config.part_size_bytes as u64,
        }
    }

    /// Single-part upload streamed from disk
    async fn simple_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        path: &Path,
    ) -> Result<(), StoreError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(request_error)?;

        Ok(())
    }

    /// Multipart upload for large files; aborted on any failure so no
    /// object becomes visible.
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        path: &Path,
        len: u64,
    ) -> Result<(), StoreError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(request_error)?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StoreError::Request("no upload ID in response".to_string()))?
            .to_string();

        let result = match self.upload_parts(bucket, key, &upload_id, path, len).await {
            Ok(parts) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(request_error)
            }
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(
                    key = %key,
                    upload_id = %upload_id,
                    error = %DisplayErrorContext(&e),
                    "Failed to abort multipart upload"
                );
            }
        }

        result
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
        len: u64,
    ) -> Result<Vec<CompletedPart>, StoreError> {
        let part_count = len.div_ceil(self.part_size);
        let mut completed_parts = Vec::with_capacity(part_count as usize);

        for index in 0..part_count {
            let offset = index * self.part_size;
            let length = self.part_size.min(len - offset);
            let part_number = (index + 1) as i32;

            let body = ByteStream::read_from()
                .path(path)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|e| StoreError::Read(e.to_string()))?;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .map_err(request_error)?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );

            debug!(key = %key, part_number, length, "Uploaded part");
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, path), fields(key = %key))]
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        path: &Path,
        len: u64,
    ) -> Result<(), StoreError> {
        if len > self.multipart_threshold {
            self.multipart_upload(bucket, key, content_type, path, len)
                .await
        } else {
            self.simple_upload(bucket, key, content_type, path).await
        }
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StoreError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(request_error)?;

        Ok(presigned.uri().to_string())
    }
}

fn request_error<E: std::error::Error>(err: E) -> StoreError {
    StoreError::Request(DisplayErrorContext(err).to_string())
}
