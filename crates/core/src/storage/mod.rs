//! Object storage upload.

mod s3;

pub use s3::{plan_parts, PartRange, S3ObjectStore};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Upload progress callback: `(uploaded_bytes, total_bytes)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Errors from the object store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Refusing to upload empty file {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload of '{key}' failed: {message}")]
    Upload { key: String, message: String },
}

impl StorageError {
    pub(crate) fn upload(key: &str, message: impl Into<String>) -> Self {
        StorageError::Upload {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// What ended up in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub size_bytes: u64,
    /// Number of parts; 1 for a single put.
    pub parts: usize,
}

/// Trait for object storage backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Upload a local file under `key`, reporting progress as it goes.
    async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, StorageError>;
}
