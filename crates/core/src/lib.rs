pub mod artifact;
pub mod config;
pub mod daemon;
pub mod notifier;
pub mod orchestrator;
pub mod progress;
pub mod source;
pub mod storage;
pub mod testing;

pub use artifact::{locate_video, object_key, ArtifactError, LocatedArtifact};
pub use config::{
    load_config, load_config_from_figment, validate_config, ConfigError, JobConfig,
    SanitizedConfig,
};
pub use daemon::{
    DaemonController, DaemonError, DaemonProcess, DownloadDaemon, JobHandle, NzbgetRpcClient,
};
pub use notifier::{JobStatus, NotificationEvent, StatusSink, WebhookNotifier};
pub use orchestrator::{run_job, AcquisitionOutcome, Orchestrator, OrchestratorError};
pub use progress::{combine_parts, extract_progress, ProgressSnapshot, ProgressTracker};
pub use source::{SourceError, SourceFetcher};
pub use storage::{ObjectStore, S3ObjectStore, StorageError, UploadReceipt};
