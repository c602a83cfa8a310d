//! Mock object store for testing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::storage::{plan_parts, ObjectStore, ProgressFn, StorageError, UploadReceipt};

/// A recorded upload for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub key: String,
    pub path: PathBuf,
    pub content_type: String,
    pub size_bytes: u64,
}

/// ObjectStore that reads the file and reports progress per simulated part,
/// without any network.
#[derive(Debug)]
pub struct MockObjectStore {
    part_size: u64,
    uploads: Arc<RwLock<Vec<RecordedUpload>>>,
    /// If set, the next upload will fail with this message.
    next_error: Arc<RwLock<Option<String>>>,
}

impl Default for MockObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::with_part_size(16 * 1024 * 1024)
    }

    /// Report progress every `part_size` bytes.
    pub fn with_part_size(part_size: u64) -> Self {
        Self {
            part_size: part_size.max(1),
            uploads: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.read().await.clone()
    }

    /// Configure the next upload to fail.
    pub async fn fail_next_upload(&self, message: impl Into<String>) {
        *self.next_error.write().await = Some(message.into());
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, StorageError> {
        if let Some(message) = self.next_error.write().await.take() {
            return Err(StorageError::upload(key, message));
        }

        let size = tokio::fs::metadata(path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        if size == 0 {
            return Err(StorageError::EmptyFile(path.to_path_buf()));
        }

        let parts = plan_parts(size, self.part_size);
        let mut done = 0;
        for part in &parts {
            done += part.len;
            progress(done, size);
        }

        self.uploads.write().await.push(RecordedUpload {
            key: key.to_string(),
            path: path.to_path_buf(),
            content_type: content_type.to_string(),
            size_bytes: size,
        });

        Ok(UploadReceipt {
            key: key.to_string(),
            size_bytes: size,
            parts: parts.len(),
        })
    }
}
