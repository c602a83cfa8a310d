//! Types for the acquisition orchestrator.

use thiserror::Error;

use crate::artifact::{ArtifactError, LocatedArtifact};
use crate::daemon::{DaemonError, JobHandle};
use crate::source::SourceError;
use crate::storage::{StorageError, UploadReceipt};

/// Errors that end the job.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Source document could not be fetched or is not an NZB.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Daemon failed, crashed or rejected the download.
    #[error("daemon error: {0}")]
    Daemon(#[from] DaemonError),

    /// No video in the completed downloads.
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// Upload to object storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Shutdown signal received before the job finished.
    #[error("interrupted by shutdown signal")]
    Interrupted,
}

/// Everything a successful acquisition produced.
#[derive(Debug, Clone)]
pub struct AcquisitionOutcome {
    pub handle: JobHandle,
    pub file: LocatedArtifact,
    pub receipt: UploadReceipt,
}
