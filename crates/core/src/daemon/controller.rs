//! High-level driving of the download daemon for one job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{DaemonConfig, NewsServerConfig};
use crate::notifier::{NotificationEvent, StatusSink};
use crate::progress::{extract_progress, ProgressTracker};

use super::settings::{find_unapplied, merge_options, runtime_options};
use super::{AppendRequest, DaemonError, DownloadDaemon, HistoryEntry, JobHandle, ProcessStateHandle};

/// Category every submitted download is filed under.
pub const JOB_CATEGORY: &str = "movies";

/// How a history entry ends the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    Succeeded,
    Deleted,
    Failed,
    /// Status not recognised; keep polling.
    Undetermined,
}

/// Classify a history entry. The delete status wins over the main status.
pub fn classify_history(entry: &HistoryEntry) -> HistoryOutcome {
    if !entry.delete_status.eq_ignore_ascii_case("NONE") {
        return HistoryOutcome::Deleted;
    }

    let status = entry.status.to_ascii_uppercase();
    if status.starts_with("SUCCESS") {
        HistoryOutcome::Succeeded
    } else if ["FAILURE", "DELETED", "WARNING"]
        .iter()
        .any(|prefix| status.starts_with(prefix))
    {
        HistoryOutcome::Failed
    } else {
        HistoryOutcome::Undetermined
    }
}

/// A download the daemon finished successfully.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub handle: JobHandle,
    pub name: String,
    pub status: String,
    /// Final directory reported by the daemon, may be empty.
    pub dest_dir: String,
    pub total_bytes: u64,
}

/// Drives one daemon instance through readiness, settings, submission and
/// completion.
pub struct DaemonController {
    daemon: Arc<dyn DownloadDaemon>,
    process: Option<ProcessStateHandle>,
    ready_attempts: u32,
    ready_interval: Duration,
    poll_interval: Duration,
    submitted: AtomicBool,
}

impl DaemonController {
    pub fn new(daemon: Arc<dyn DownloadDaemon>, config: &DaemonConfig) -> Self {
        Self {
            daemon,
            process: None,
            ready_attempts: config.ready_attempts.max(1),
            ready_interval: Duration::from_millis(config.ready_interval_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            submitted: AtomicBool::new(false),
        }
    }

    /// Report readiness to the supervised process as well.
    pub fn with_process(mut self, process: ProcessStateHandle) -> Self {
        self.process = Some(process);
        self
    }

    /// Poll `version` until the control API answers.
    pub async fn wait_until_ready(&self) -> Result<String, DaemonError> {
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.ready_attempts {
            match self.daemon.version().await {
                Ok(version) => {
                    info!(daemon = self.daemon.name(), version = %version, attempt, "Download daemon ready");
                    if let Some(process) = &self.process {
                        process.mark_ready()?;
                    }
                    return Ok(version);
                }
                // Wrong credentials will not fix themselves
                Err(DaemonError::Unauthorized) => return Err(DaemonError::Unauthorized),
                Err(e) => {
                    debug!(attempt, error = %e, "Download daemon not ready yet");
                    last_error = e.to_string();
                }
            }

            if attempt < self.ready_attempts {
                sleep(self.ready_interval).await;
            }
        }

        Err(DaemonError::NotReady {
            attempts: self.ready_attempts,
            last_error,
        })
    }

    /// Push the news servers and post-processing options, then confirm the
    /// daemon is running with them.
    pub async fn apply_settings(&self, servers: &[NewsServerConfig]) -> Result<(), DaemonError> {
        let overrides = runtime_options(servers);
        let current = self.daemon.config().await?;
        let merged = merge_options(&current, &overrides);

        if !self.daemon.save_config(&merged).await? {
            return Err(DaemonError::SettingsRejected);
        }
        if !self.daemon.reload().await? {
            return Err(DaemonError::SettingsRejected);
        }

        self.wait_until_ready().await?;

        let reported = self.daemon.config().await?;
        if let Some(option) = find_unapplied(&reported, &overrides) {
            return Err(DaemonError::SettingsNotApplied {
                name: option.name.clone(),
            });
        }

        info!(
            servers = servers.len(),
            options = overrides.len(),
            "Daemon settings applied"
        );
        Ok(())
    }

    /// Queue the NZB document. Only one submission is allowed per controller.
    pub async fn submit(&self, nzb_name: &str, nzb: &[u8]) -> Result<JobHandle, DaemonError> {
        if self.submitted.swap(true, Ordering::SeqCst) {
            return Err(DaemonError::InvalidState(
                "a download was already submitted".to_string(),
            ));
        }

        let request = AppendRequest::new(nzb_name, STANDARD.encode(nzb)).with_category(JOB_CATEGORY);
        let id = self.daemon.append(&request).await?;
        if id <= 0 {
            return Err(DaemonError::SubmitRejected { id });
        }

        let handle = JobHandle(id);
        info!(handle = %handle, file = nzb_name, "Download queued");
        Ok(handle)
    }

    /// Poll the queue and history until the download reaches a terminal
    /// status, emitting `downloading` notifications along the way.
    pub async fn wait_for_completion(
        &self,
        handle: JobHandle,
        sink: &dyn StatusSink,
        job_id: &str,
    ) -> Result<CompletedJob, DaemonError> {
        let mut tracker = ProgressTracker::new();

        loop {
            let groups = self.daemon.list_groups().await?;
            let history = self.daemon.history().await?;

            if let Some(entry) = history.iter().find(|h| h.nzb_id == handle.0) {
                match classify_history(entry) {
                    HistoryOutcome::Succeeded => {
                        if tracker.last_percent().map_or(true, |p| p < 100.0) {
                            sink.notify(NotificationEvent::downloading(job_id, 100.0, &entry.status))
                                .await;
                        }
                        info!(handle = %handle, status = %entry.status, "Download completed");
                        return Ok(CompletedJob {
                            handle,
                            name: entry.name.clone(),
                            status: entry.status.clone(),
                            dest_dir: entry.dest_dir.clone(),
                            total_bytes: entry.total_bytes(),
                        });
                    }
                    HistoryOutcome::Deleted => {
                        return Err(DaemonError::JobDeleted(entry.diagnostics()));
                    }
                    HistoryOutcome::Failed => {
                        return Err(DaemonError::JobFailed(entry.diagnostics()));
                    }
                    HistoryOutcome::Undetermined => {
                        warn!(handle = %handle, status = %entry.status, "Unrecognised history status, still waiting");
                    }
                }
            } else if let Some(group) = groups.iter().find(|g| g.nzb_id == handle.0) {
                let snapshot =
                    extract_progress(group.total_bytes(), group.remaining_bytes(), &group.status);
                if tracker.observe(&snapshot) {
                    info!(
                        handle = %handle,
                        percent = snapshot.rounded_percent(),
                        status = %snapshot.status_text,
                        "Download progress"
                    );
                    sink.notify(NotificationEvent::downloading(
                        job_id,
                        snapshot.rounded_percent(),
                        &snapshot.status_text,
                    ))
                    .await;
                }
            } else {
                debug!(handle = %handle, "Download not listed yet, treating as queued");
            }

            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::JobStatus;
    use crate::testing::{fixtures, MockDaemon, RecordingNotifier};

    fn controller(daemon: &Arc<MockDaemon>) -> DaemonController {
        DaemonController::new(daemon.clone(), &fixtures::fast_daemon_config())
    }

    fn history(status: &str, delete_status: &str) -> HistoryEntry {
        fixtures::history_entry(1, status, delete_status)
    }

    #[test]
    fn test_classify_history() {
        assert_eq!(classify_history(&history("SUCCESS/ALL", "NONE")), HistoryOutcome::Succeeded);
        assert_eq!(classify_history(&history("SUCCESS/UNPACK", "NONE")), HistoryOutcome::Succeeded);
        assert_eq!(classify_history(&history("FAILURE/PAR", "NONE")), HistoryOutcome::Failed);
        assert_eq!(classify_history(&history("WARNING/SCRIPT", "NONE")), HistoryOutcome::Failed);
        assert_eq!(classify_history(&history("DELETED/DUPE", "NONE")), HistoryOutcome::Failed);
        assert_eq!(classify_history(&history("SUCCESS/ALL", "HEALTH")), HistoryOutcome::Deleted);
        assert_eq!(classify_history(&history("PP_QUEUED", "NONE")), HistoryOutcome::Undetermined);
    }

    #[tokio::test]
    async fn test_wait_until_ready_retries() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.fail_version_times(2).await;

        let version = controller(&daemon).wait_until_ready().await.unwrap();
        assert_eq!(version, "24.3");
        assert_eq!(daemon.call_count("version").await, 3);
    }

    #[tokio::test]
    async fn test_wait_until_ready_gives_up() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.fail_version_times(100).await;

        let err = controller(&daemon).wait_until_ready().await.unwrap_err();
        match err {
            DaemonError::NotReady { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("connection refused"));
            }
            other => panic!("Expected NotReady, got {:?}", other),
        }
        assert_eq!(daemon.call_count("version").await, 3);
    }

    #[tokio::test]
    async fn test_apply_settings_round_trip() {
        let daemon = Arc::new(MockDaemon::new());
        let config = fixtures::job_config();

        controller(&daemon).apply_settings(&config.servers).await.unwrap();

        let saved = daemon.saved_config().await.unwrap();
        assert!(saved
            .iter()
            .any(|o| o.name == "Server1.Host" && o.value == "news.example"));
        assert!(saved.iter().any(|o| o.name == "Unpack" && o.value == "yes"));
        assert_eq!(daemon.call_count("reload").await, 1);
        assert_eq!(daemon.call_count("config").await, 2);
    }

    #[tokio::test]
    async fn test_apply_settings_rejected() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.set_save_result(false).await;

        let err = controller(&daemon)
            .apply_settings(&fixtures::job_config().servers)
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::SettingsRejected));
        assert_eq!(daemon.call_count("reload").await, 0);
    }

    #[tokio::test]
    async fn test_apply_settings_not_applied() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.ignore_saved_config(true).await;

        let err = controller(&daemon)
            .apply_settings(&fixtures::job_config().servers)
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::SettingsNotApplied { ref name } if name == "Server1.Active"));
    }

    #[tokio::test]
    async fn test_submit_encodes_payload() {
        let daemon = Arc::new(MockDaemon::new());
        let controller = controller(&daemon);

        let handle = controller.submit("movie.nzb", b"<nzb/>").await.unwrap();
        assert_eq!(handle, JobHandle(1));

        let appended = daemon.appended().await;
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].nzb_filename, "movie.nzb");
        assert_eq!(appended[0].category, "movies");
        assert_eq!(appended[0].content_base64, "PG56Yi8+");

        let again = controller.submit("movie.nzb", b"<nzb/>").await;
        assert!(matches!(again, Err(DaemonError::InvalidState(_))));
        assert_eq!(daemon.appended().await.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejected_id() {
        let daemon = Arc::new(MockDaemon::new());
        daemon.set_append_id(0).await;

        let err = controller(&daemon).submit("movie.nzb", b"<nzb/>").await.unwrap_err();
        assert!(matches!(err, DaemonError::SubmitRejected { id: 0 }));
    }

    #[tokio::test]
    async fn test_success_sends_one_final_progress() {
        let daemon = Arc::new(MockDaemon::new());
        let sink = RecordingNotifier::new();
        daemon.push_poll(vec![fixtures::group_entry(1, 1000, 600, "DOWNLOADING")], vec![]).await;
        daemon.push_poll(vec![fixtures::group_entry(1, 1000, 600, "DOWNLOADING")], vec![]).await;
        daemon.push_poll(vec![], vec![history("SUCCESS/ALL", "NONE")]).await;

        let completed = controller(&daemon)
            .wait_for_completion(JobHandle(1), &sink, "job-1")
            .await
            .unwrap();
        assert_eq!(completed.status, "SUCCESS/ALL");

        let events = sink.events_with_status(JobStatus::Downloading).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].extra["progress"], 40.0);
        assert_eq!(events[1].extra["progress"], 100.0);
    }

    #[tokio::test]
    async fn test_success_at_full_progress_sends_nothing_extra() {
        let daemon = Arc::new(MockDaemon::new());
        let sink = RecordingNotifier::new();
        daemon.push_poll(vec![fixtures::group_entry(1, 1000, 0, "UNPACKING")], vec![]).await;
        daemon.push_poll(vec![], vec![history("SUCCESS/ALL", "NONE")]).await;

        controller(&daemon)
            .wait_for_completion(JobHandle(1), &sink, "job-1")
            .await
            .unwrap();

        let events = sink.events_with_status(JobStatus::Downloading).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].extra["status_text"], "UNPACKING");
    }

    #[tokio::test]
    async fn test_deleted_job_reports_diagnostics() {
        let daemon = Arc::new(MockDaemon::new());
        let sink = RecordingNotifier::new();
        let mut entry = history("DELETED/HEALTH", "HEALTH");
        entry.health = 853;
        entry.failed_articles = 147;
        entry.total_articles = 1000;
        entry.par_status = "FAILURE".to_string();
        entry.unpack_status = "NONE".to_string();
        daemon.push_poll(vec![], vec![entry]).await;

        let err = controller(&daemon)
            .wait_for_completion(JobHandle(1), &sink, "job-1")
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::JobDeleted(_)));

        let message = err.to_string();
        assert!(message.contains("health=85.3%"));
        assert!(message.contains("failed_articles=147/1000"));
        assert!(message.contains("par_status=FAILURE"));
        assert!(message.contains("unpack_status=NONE"));
    }

    #[tokio::test]
    async fn test_failed_job() {
        let daemon = Arc::new(MockDaemon::new());
        let sink = RecordingNotifier::new();
        daemon.push_poll(vec![], vec![history("FAILURE/UNPACK", "NONE")]).await;

        let err = controller(&daemon)
            .wait_for_completion(JobHandle(1), &sink, "job-1")
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::JobFailed(ref d) if d.status == "FAILURE/UNPACK"));
    }

    #[tokio::test]
    async fn test_missing_job_is_still_queued() {
        let daemon = Arc::new(MockDaemon::new());
        let sink = RecordingNotifier::new();
        daemon.push_poll(vec![], vec![]).await;
        daemon.push_poll(vec![fixtures::group_entry(7, 100, 100, "QUEUED")], vec![]).await;
        daemon.push_poll(vec![], vec![history("SUCCESS/ALL", "NONE")]).await;

        controller(&daemon)
            .wait_for_completion(JobHandle(1), &sink, "job-1")
            .await
            .unwrap();

        // Only the final notification, the other group belongs to another job
        assert_eq!(sink.events_with_status(JobStatus::Downloading).await.len(), 1);
    }

    #[tokio::test]
    async fn test_rpc_failure_while_polling_is_fatal() {
        let daemon = Arc::new(MockDaemon::new());
        let sink = RecordingNotifier::new();
        daemon
            .set_next_error(DaemonError::Request("connection reset".to_string()))
            .await;

        let err = controller(&daemon)
            .wait_for_completion(JobHandle(1), &sink, "job-1")
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Request(_)));
    }
}
