//! S3-compatible storage (AWS, R2, MinIO) via `aws-sdk-s3`.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;

use super::{ObjectStore, ProgressFn, StorageError, UploadReceipt};

/// One part of a multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number.
    pub number: i32,
    pub offset: u64,
    pub len: u64,
}

/// Split `size` bytes into parts of `part_size` (the last may be shorter).
pub fn plan_parts(size: u64, part_size: u64) -> Vec<PartRange> {
    let part_size = part_size.max(1);
    let count = size.div_ceil(part_size);

    (0..count)
        .map(|i| {
            let offset = i * part_size;
            PartRange {
                number: i as i32 + 1,
                offset,
                len: part_size.min(size - offset),
            }
        })
        .collect()
}

/// Uploads to one bucket of an S3-compatible endpoint.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    part_size: u64,
    max_concurrent_parts: usize,
}

impl S3ObjectStore {
    /// Build a path-style client with static credentials.
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "movies-on-demand",
        );

        let s3_config = S3ConfigBuilder::new()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .force_path_style(true)
            .build();

        Self::with_client(
            Client::from_conf(s3_config),
            config.bucket.clone(),
            config.part_size_bytes,
            config.max_concurrent_parts,
        )
    }

    pub fn with_client(
        client: Client,
        bucket: impl Into<String>,
        part_size: u64,
        max_concurrent_parts: usize,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            part_size: part_size.max(1),
            max_concurrent_parts: max_concurrent_parts.max(1),
        }
    }

    async fn put_single(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload(key, e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::upload(key, DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        path: &Path,
        range: PartRange,
    ) -> Result<CompletedPart, StorageError> {
        let io_err = |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = File::open(path).await.map_err(io_err)?;
        file.seek(SeekFrom::Start(range.offset)).await.map_err(io_err)?;
        let mut buffer = vec![0u8; range.len as usize];
        file.read_exact(&mut buffer).await.map_err(io_err)?;

        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(range.number)
            .body(ByteStream::from(buffer))
            .send()
            .await
            .map_err(|e| {
                StorageError::upload(
                    key,
                    format!("part {}: {}", range.number, DisplayErrorContext(&e)),
                )
            })?;

        debug!(part = range.number, bytes = range.len, "Uploaded part");
        Ok(CompletedPart::builder()
            .part_number(range.number)
            .e_tag(response.e_tag().unwrap_or_default())
            .build())
    }

    async fn put_multipart(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        size: u64,
        progress: &ProgressFn,
    ) -> Result<usize, StorageError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload(key, DisplayErrorContext(&e).to_string()))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::upload(key, "no upload id returned"))?
            .to_string();

        let ranges = plan_parts(size, self.part_size);
        let part_count = ranges.len();
        let uploaded = AtomicU64::new(0);

        info!(
            key,
            parts = part_count,
            concurrency = self.max_concurrent_parts,
            "Starting multipart upload"
        );

        let result: Result<Vec<CompletedPart>, StorageError> = stream::iter(ranges)
            .map(|range| {
                let uploaded = &uploaded;
                let upload_id = upload_id.as_str();
                async move {
                    let part = self.upload_part(key, upload_id, path, range).await?;
                    let done = uploaded.fetch_add(range.len, Ordering::SeqCst) + range.len;
                    progress(done, size);
                    Ok::<_, StorageError>(part)
                }
            })
            .buffer_unordered(self.max_concurrent_parts)
            .try_collect()
            .await;

        let mut parts = match result {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, "Failed to abort multipart upload: {}", DisplayErrorContext(&abort_err));
                }
                return Err(e);
            }
        };

        // Completion requires ascending part numbers
        parts.sort_by_key(|p| p.part_number());

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StorageError::upload(key, DisplayErrorContext(&e).to_string()))?;

        Ok(part_count)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        "s3"
    }

    async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, StorageError> {
        let size = fs::metadata(path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if size == 0 {
            return Err(StorageError::EmptyFile(path.to_path_buf()));
        }

        let parts = if size < self.part_size {
            self.put_single(key, path, content_type).await?;
            progress(size, size);
            1
        } else {
            self.put_multipart(key, path, content_type, size, &progress)
                .await?
        };

        info!(bucket = %self.bucket, key, size, parts, "Upload complete");
        Ok(UploadReceipt {
            key: key.to_string(),
            size_bytes: size,
            parts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::retry::RetryConfig;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer, part_size: u64) -> S3ObjectStore {
        let s3_config = S3ConfigBuilder::new()
            .credentials_provider(Credentials::new("AKIA", "secret", None, None, "test"))
            .region(Region::new("auto"))
            .endpoint_url(server.uri())
            .force_path_style(true)
            .retry_config(RetryConfig::disabled())
            .build();
        S3ObjectStore::with_client(Client::from_conf(s3_config), "media", part_size, 2)
    }

    fn recorder() -> (ProgressFn, Arc<Mutex<Vec<(u64, u64)>>>) {
        let seen: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |done: u64, total: u64| {
            sink.lock().unwrap().push((done, total))
        });
        (progress, seen)
    }

    fn write_file(dir: &TempDir, bytes: usize) -> std::path::PathBuf {
        let file = dir.path().join("movie.mkv");
        std::fs::write(&file, vec![7u8; bytes]).unwrap();
        file
    }

    #[test]
    fn test_plan_parts() {
        let parts = plan_parts(25, 10);
        assert_eq!(
            parts,
            vec![
                PartRange { number: 1, offset: 0, len: 10 },
                PartRange { number: 2, offset: 10, len: 10 },
                PartRange { number: 3, offset: 20, len: 5 },
            ]
        );
        assert_eq!(plan_parts(20, 10).len(), 2);
        assert!(plan_parts(0, 10).is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = write_file(&temp_dir, 0);
        let server = MockServer::start().await;
        let (progress, _) = recorder();

        let err = store_for(&server, 10)
            .upload_file("movies/job-1/movie.mkv", &file, "video/x-matroska", progress)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EmptyFile(_)));
    }

    #[tokio::test]
    async fn test_small_file_single_put() {
        let temp_dir = TempDir::new().unwrap();
        let file = write_file(&temp_dir, 8);
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/media/movies/job-1/movie.mkv"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"abc\""))
            .expect(1)
            .mount(&server)
            .await;
        let (progress, seen) = recorder();

        let receipt = store_for(&server, 1024)
            .upload_file("movies/job-1/movie.mkv", &file, "video/x-matroska", progress)
            .await
            .unwrap();
        assert_eq!(receipt.size_bytes, 8);
        assert_eq!(receipt.parts, 1);
        assert_eq!(*seen.lock().unwrap(), vec![(8, 8)]);
    }

    async fn mount_create(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/media/movies/job-1/movie.mkv"))
            .and(query_param("uploads", ""))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <InitiateMultipartUploadResult><Bucket>media</Bucket>\
                 <Key>movies/job-1/movie.mkv</Key><UploadId>up-1</UploadId>\
                 </InitiateMultipartUploadResult>",
            ))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let temp_dir = TempDir::new().unwrap();
        let file = write_file(&temp_dir, 25);
        let server = MockServer::start().await;
        mount_create(&server).await;
        Mock::given(method("PUT"))
            .and(query_param("uploadId", "up-1"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"part\""))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(query_param("uploadId", "up-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <CompleteMultipartUploadResult><Bucket>media</Bucket>\
                 <Key>movies/job-1/movie.mkv</Key><ETag>\"final\"</ETag>\
                 </CompleteMultipartUploadResult>",
            ))
            .expect(1)
            .mount(&server)
            .await;
        let (progress, seen) = recorder();

        let receipt = store_for(&server, 10)
            .upload_file("movies/job-1/movie.mkv", &file, "video/x-matroska", progress)
            .await
            .unwrap();
        assert_eq!(receipt.parts, 3);
        assert_eq!(receipt.size_bytes, 25);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last(), Some(&(25, 25)));
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let temp_dir = TempDir::new().unwrap();
        let file = write_file(&temp_dir, 25);
        let server = MockServer::start().await;
        mount_create(&server).await;
        Mock::given(method("PUT"))
            .and(query_param("uploadId", "up-1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(query_param("uploadId", "up-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let (progress, _) = recorder();

        let err = store_for(&server, 10)
            .upload_file("movies/job-1/movie.mkv", &file, "video/x-matroska", progress)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Upload { ref key, .. } if key == "movies/job-1/movie.mkv"));
    }
}
