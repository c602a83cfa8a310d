//! Acquisition flow for one job.
//!
//! starting -> fetch NZB -> daemon ready -> settings -> submit -> poll ->
//! locate video -> upload -> ready. Any failure ends in a single `error`.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::artifact::{content_type_for, extension_of, locate_video, object_key};
use crate::config::JobConfig;
use crate::daemon::{DaemonController, DaemonProcess};
use crate::notifier::{NotificationEvent, ReadyDetails, StatusSink};
use crate::progress::{extract_progress, ProgressTracker};
use crate::source::{nzb_file_name, SourceFetcher};
use crate::storage::{ObjectStore, ProgressFn, UploadReceipt};

use super::types::{AcquisitionOutcome, OrchestratorError};

/// Status text attached to upload progress.
const UPLOADING_STATUS: &str = "UPLOADING";

/// Runs the acquisition for one job.
pub struct Orchestrator {
    config: JobConfig,
    controller: DaemonController,
    fetcher: SourceFetcher,
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn StatusSink>,
}

impl Orchestrator {
    pub fn new(
        config: JobConfig,
        controller: DaemonController,
        fetcher: SourceFetcher,
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            config,
            controller,
            fetcher,
            store,
            sink,
        }
    }

    fn job_id(&self) -> &str {
        &self.config.job.job_id
    }

    /// Download the release and upload the video.
    ///
    /// Emits `starting`, `downloading` and `uploading` along the way; the
    /// final `ready` or `error` is left to the caller.
    pub async fn acquire(&self) -> Result<AcquisitionOutcome, OrchestratorError> {
        let job = &self.config.job;
        info!(job_id = %job.job_id, movie_id = %job.movie_id, release = %job.release_title, "Starting acquisition");
        self.sink.notify(NotificationEvent::starting(self.job_id())).await;

        // Validate the source before the daemon sees anything
        let nzb = self.fetcher.fetch(&job.nzb_url).await?;

        self.controller.wait_until_ready().await?;
        self.controller.apply_settings(&self.config.servers).await?;

        let handle = self
            .controller
            .submit(&nzb_file_name(&job.release_title), &nzb)
            .await?;
        let completed = self
            .controller
            .wait_for_completion(handle, self.sink.as_ref(), self.job_id())
            .await?;
        info!(handle = %handle, name = %completed.name, dest = %completed.dest_dir, "Download finished");

        let paths = &self.config.paths;
        let file = locate_video(&paths.dest_dir, &paths.inter_dir, &paths.main_dir).await?;

        let storage = &self.config.storage;
        let key = object_key(&storage.key_prefix, self.job_id(), &storage.object_stem, &file.path);
        let content_type = content_type_for(&extension_of(&file.path));

        let receipt = self.upload(&key, &file.path, content_type, file.size_bytes).await?;

        Ok(AcquisitionOutcome {
            handle,
            file,
            receipt,
        })
    }

    /// Upload while forwarding de-duplicated `uploading` notifications.
    async fn upload(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        size: u64,
    ) -> Result<UploadReceipt, OrchestratorError> {
        info!(key, size, store = self.store.name(), "Uploading video");

        let mut tracker = ProgressTracker::new();
        let initial = extract_progress(size, size, UPLOADING_STATUS);
        tracker.observe(&initial);
        self.sink
            .notify(NotificationEvent::uploading(self.job_id(), initial.rounded_percent()))
            .await;

        let (tx, mut rx) = watch::channel((0u64, size));
        let progress: ProgressFn = Arc::new(move |done: u64, total: u64| {
            let _ = tx.send((done, total));
        });

        let upload = self.store.upload_file(key, path, content_type, progress);
        tokio::pin!(upload);

        let receipt = loop {
            tokio::select! {
                biased;
                result = &mut upload => break result?,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break (&mut upload).await?;
                    }
                    let (done, total) = *rx.borrow_and_update();
                    let snapshot = extract_progress(total, total.saturating_sub(done), UPLOADING_STATUS);
                    if tracker.observe(&snapshot) {
                        self.sink
                            .notify(NotificationEvent::uploading(self.job_id(), snapshot.rounded_percent()))
                            .await;
                    }
                }
            }
        };

        Ok(receipt)
    }

    /// Send the `ready` notification.
    pub async fn report_ready(&self, outcome: &AcquisitionOutcome) {
        let details = ReadyDetails {
            movie_id: self.config.job.movie_id.clone(),
            storage_key: outcome.receipt.key.clone(),
            file_size: outcome.receipt.size_bytes,
            file_name: outcome.file.file_name.clone(),
        };
        info!(key = %details.storage_key, size = details.file_size, "Movie ready");
        self.sink
            .notify(NotificationEvent::ready(self.job_id(), &details))
            .await;
    }

    /// Send the single `error` notification.
    pub async fn report_failure(&self, err: &OrchestratorError) {
        self.sink
            .notify(NotificationEvent::error(self.job_id(), err.to_string()))
            .await;
    }
}

/// Run the job to completion against a supervised daemon.
///
/// Races the acquisition against a daemon crash and `shutdown`. On success
/// `ready` is sent and then the daemon is stopped; on failure exactly one
/// `error` is sent and the error is returned.
pub async fn run_job<S>(
    orchestrator: &Orchestrator,
    process: DaemonProcess,
    shutdown: S,
) -> Result<AcquisitionOutcome, OrchestratorError>
where
    S: Future<Output = ()>,
{
    let result = tokio::select! {
        result = orchestrator.acquire() => result,
        err = process.crashed() => Err(err.into()),
        _ = shutdown => Err(OrchestratorError::Interrupted),
    };

    match result {
        Ok(outcome) => {
            orchestrator.report_ready(&outcome).await;
            if let Err(e) = process.stop().await {
                warn!("Daemon did not stop cleanly: {}", e);
            }
            Ok(outcome)
        }
        Err(e) => {
            error!(job_id = %orchestrator.job_id(), "Acquisition failed: {}", e);
            orchestrator.report_failure(&e).await;
            if let Err(stop_err) = process.stop().await {
                warn!("Daemon did not stop cleanly: {}", stop_err);
            }
            Err(e)
        }
    }
}
