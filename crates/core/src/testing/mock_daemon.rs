//! Mock download daemon for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::daemon::{
    AppendRequest, ConfigOption, DaemonError, DownloadDaemon, GroupEntry, HistoryEntry,
};

/// One scripted poll: what `listgroups` and the following `history` return.
#[derive(Debug, Clone, Default)]
struct MockPoll {
    groups: Vec<GroupEntry>,
    history: Vec<HistoryEntry>,
}

/// Mock implementation of the DownloadDaemon trait.
///
/// Provides controllable behavior for testing:
/// - Script `listgroups`/`history` answers poll by poll
/// - Record saved options and appended downloads
/// - Simulate readiness delays and failures
///
/// # Example
///
/// ```rust,ignore
/// let daemon = MockDaemon::new();
/// daemon.push_poll(vec![fixtures::group_entry(1, 1000, 500, "DOWNLOADING")], vec![]).await;
/// daemon.push_poll(vec![], vec![fixtures::history_entry(1, "SUCCESS/ALL", "NONE")]).await;
///
/// let handle = daemon.append(&AppendRequest::new("movie.nzb", "...")).await?;
/// assert_eq!(daemon.appended().await.len(), 1);
/// ```
#[derive(Debug)]
pub struct MockDaemon {
    /// Options reported before any save.
    base_config: Arc<RwLock<Vec<ConfigOption>>>,
    /// Last `saveconfig` payload.
    saved: Arc<RwLock<Option<Vec<ConfigOption>>>>,
    /// Report `base_config` even after a save.
    ignore_saved: Arc<RwLock<bool>>,
    save_result: Arc<RwLock<bool>>,
    /// Recorded append calls.
    appended: Arc<RwLock<Vec<AppendRequest>>>,
    /// Id returned by the next append; `None` counts up from 1.
    append_id: Arc<RwLock<Option<i64>>>,
    /// Remaining `version` calls that fail.
    version_failures: Arc<RwLock<u32>>,
    polls: Arc<RwLock<VecDeque<MockPoll>>>,
    /// Poll being served; repeated once the script runs out.
    current: Arc<RwLock<MockPoll>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<DaemonError>>>,
    calls: Arc<RwLock<HashMap<&'static str, usize>>>,
}

impl Default for MockDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDaemon {
    /// Create a mock daemon with a small default configuration.
    pub fn new() -> Self {
        Self {
            base_config: Arc::new(RwLock::new(vec![
                ConfigOption::new("MainDir", "/downloads"),
                ConfigOption::new("ControlPort", "6789"),
                ConfigOption::new("Unpack", "no"),
            ])),
            saved: Arc::new(RwLock::new(None)),
            ignore_saved: Arc::new(RwLock::new(false)),
            save_result: Arc::new(RwLock::new(true)),
            appended: Arc::new(RwLock::new(Vec::new())),
            append_id: Arc::new(RwLock::new(None)),
            version_failures: Arc::new(RwLock::new(0)),
            polls: Arc::new(RwLock::new(VecDeque::new())),
            current: Arc::new(RwLock::new(MockPoll::default())),
            next_error: Arc::new(RwLock::new(None)),
            calls: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Queue the answers for one poll.
    pub async fn push_poll(&self, groups: Vec<GroupEntry>, history: Vec<HistoryEntry>) {
        self.polls
            .write()
            .await
            .push_back(MockPoll { groups, history });
    }

    /// Fail the next `times` readiness probes with a connection error.
    pub async fn fail_version_times(&self, times: u32) {
        *self.version_failures.write().await = times;
    }

    pub async fn set_save_result(&self, accepted: bool) {
        *self.save_result.write().await = accepted;
    }

    /// Keep reporting the original options after a save.
    pub async fn ignore_saved_config(&self, ignore: bool) {
        *self.ignore_saved.write().await = ignore;
    }

    pub async fn set_append_id(&self, id: i64) {
        *self.append_id.write().await = Some(id);
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: DaemonError) {
        *self.next_error.write().await = Some(error);
    }

    /// Options passed to the last `saveconfig`.
    pub async fn saved_config(&self) -> Option<Vec<ConfigOption>> {
        self.saved.read().await.clone()
    }

    /// Recorded append requests.
    pub async fn appended(&self) -> Vec<AppendRequest> {
        self.appended.read().await.clone()
    }

    /// Number of calls made to an RPC method (by its wire name).
    pub async fn call_count(&self, method: &str) -> usize {
        self.calls.read().await.get(method).copied().unwrap_or(0)
    }

    /// Count the call and take the pending error, if any.
    async fn enter(&self, method: &'static str) -> Result<(), DaemonError> {
        *self.calls.write().await.entry(method).or_insert(0) += 1;
        match self.next_error.write().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DownloadDaemon for MockDaemon {
    fn name(&self) -> &str {
        "mock"
    }

    async fn version(&self) -> Result<String, DaemonError> {
        self.enter("version").await?;
        let mut failures = self.version_failures.write().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(DaemonError::Request("connection refused".to_string()));
        }
        Ok("24.3".to_string())
    }

    async fn config(&self) -> Result<Vec<ConfigOption>, DaemonError> {
        self.enter("config").await?;
        if !*self.ignore_saved.read().await {
            if let Some(saved) = self.saved.read().await.clone() {
                return Ok(saved);
            }
        }
        Ok(self.base_config.read().await.clone())
    }

    async fn save_config(&self, options: &[ConfigOption]) -> Result<bool, DaemonError> {
        self.enter("saveconfig").await?;
        let accepted = *self.save_result.read().await;
        if accepted {
            *self.saved.write().await = Some(options.to_vec());
        }
        Ok(accepted)
    }

    async fn reload(&self) -> Result<bool, DaemonError> {
        self.enter("reload").await?;
        Ok(true)
    }

    async fn append(&self, request: &AppendRequest) -> Result<i64, DaemonError> {
        self.enter("append").await?;
        let mut appended = self.appended.write().await;
        appended.push(request.clone());
        let id = self
            .append_id
            .read()
            .await
            .unwrap_or(appended.len() as i64);
        Ok(id)
    }

    async fn list_groups(&self) -> Result<Vec<GroupEntry>, DaemonError> {
        self.enter("listgroups").await?;
        if let Some(next) = self.polls.write().await.pop_front() {
            *self.current.write().await = next;
        }
        Ok(self.current.read().await.groups.clone())
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>, DaemonError> {
        self.enter("history").await?;
        Ok(self.current.read().await.history.clone())
    }
}
