//! Types for the download daemon control API.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::progress::combine_parts;

/// Errors that can occur while driving the download daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Daemon request failed: {0}")]
    Request(String),

    #[error("Daemon request timeout")]
    Timeout,

    #[error("Daemon rejected control credentials")]
    Unauthorized,

    #[error("Daemon returned HTTP {status}")]
    Http { status: u16 },

    #[error("Daemon RPC '{method}' failed: {message}")]
    Rpc { method: String, message: String },

    #[error("Unexpected response to '{method}': {reason}")]
    UnexpectedResponse { method: String, reason: String },

    #[error("Failed to start daemon: {0}")]
    SpawnFailed(String),

    #[error("Daemon exited unexpectedly (exit code: {})", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Crashed { code: Option<i32> },

    #[error("Daemon not ready after {attempts} attempts: {last_error}")]
    NotReady { attempts: u32, last_error: String },

    #[error("Daemon refused to save settings")]
    SettingsRejected,

    #[error("Daemon did not apply setting '{name}'")]
    SettingsNotApplied { name: String },

    #[error("Daemon did not accept the job (returned id {id})")]
    SubmitRejected { id: i64 },

    #[error("Download was deleted by the daemon: {0}")]
    JobDeleted(JobDiagnostics),

    #[error("Download failed: {0}")]
    JobFailed(JobDiagnostics),

    #[error("Invalid daemon process transition: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque identifier of the submitted download (the daemon's NZBID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub i64);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One `Name=Value` daemon option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOption {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl ConfigOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An entry of the live download queue (`listgroups`).
#[derive(Debug, Clone, Deserialize)]
pub struct GroupEntry {
    #[serde(rename = "NZBID")]
    pub nzb_id: i64,
    #[serde(rename = "NZBName", default)]
    pub nzb_name: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "FileSizeLo", default)]
    pub file_size_lo: u32,
    #[serde(rename = "FileSizeHi", default)]
    pub file_size_hi: u32,
    #[serde(rename = "RemainingSizeLo", default)]
    pub remaining_size_lo: u32,
    #[serde(rename = "RemainingSizeHi", default)]
    pub remaining_size_hi: u32,
    /// Per-mille (1000 = 100%).
    #[serde(rename = "Health", default)]
    pub health: u32,
}

impl GroupEntry {
    pub fn total_bytes(&self) -> u64 {
        combine_parts(self.file_size_lo, self.file_size_hi)
    }

    pub fn remaining_bytes(&self) -> u64 {
        combine_parts(self.remaining_size_lo, self.remaining_size_hi)
    }
}

/// An entry of the download history (`history`).
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "NZBID")]
    pub nzb_id: i64,
    #[serde(rename = "Name", default)]
    pub name: String,
    /// e.g. `SUCCESS/ALL`, `FAILURE/PAR`, `DELETED/HEALTH`.
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "DeleteStatus", default = "none_status")]
    pub delete_status: String,
    #[serde(rename = "ParStatus", default = "none_status")]
    pub par_status: String,
    #[serde(rename = "UnpackStatus", default = "none_status")]
    pub unpack_status: String,
    /// Per-mille (1000 = 100%).
    #[serde(rename = "Health", default)]
    pub health: u32,
    #[serde(rename = "FailedArticles", default)]
    pub failed_articles: u64,
    #[serde(rename = "TotalArticles", default)]
    pub total_articles: u64,
    #[serde(rename = "FileSizeLo", default)]
    pub file_size_lo: u32,
    #[serde(rename = "FileSizeHi", default)]
    pub file_size_hi: u32,
    #[serde(rename = "DestDir", default)]
    pub dest_dir: String,
}

fn none_status() -> String {
    "NONE".to_string()
}

impl HistoryEntry {
    pub fn total_bytes(&self) -> u64 {
        combine_parts(self.file_size_lo, self.file_size_hi)
    }

    pub fn diagnostics(&self) -> JobDiagnostics {
        JobDiagnostics {
            status: self.status.clone(),
            delete_status: self.delete_status.clone(),
            health_permille: self.health,
            failed_articles: self.failed_articles,
            total_articles: self.total_articles,
            par_status: self.par_status.clone(),
            unpack_status: self.unpack_status.clone(),
        }
    }
}

/// Why a download ended badly, as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDiagnostics {
    pub status: String,
    pub delete_status: String,
    pub health_permille: u32,
    pub failed_articles: u64,
    pub total_articles: u64,
    pub par_status: String,
    pub unpack_status: String,
}

impl fmt::Display for JobDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status={}, delete_status={}, health={:.1}%, failed_articles={}/{}, par_status={}, unpack_status={}",
            self.status,
            self.delete_status,
            self.health_permille as f64 / 10.0,
            self.failed_articles,
            self.total_articles,
            self.par_status,
            self.unpack_status
        )
    }
}

/// Request to queue a download.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    /// File name the daemon shows for the job.
    pub nzb_filename: String,
    /// Base64-encoded NZB document.
    pub content_base64: String,
    pub category: String,
    pub priority: i32,
    pub add_to_top: bool,
    pub add_paused: bool,
    pub dupe_key: String,
    pub dupe_score: i32,
    pub dupe_mode: String,
}

impl AppendRequest {
    /// Create a request with default queue options.
    pub fn new(nzb_filename: impl Into<String>, content_base64: impl Into<String>) -> Self {
        Self {
            nzb_filename: nzb_filename.into(),
            content_base64: content_base64.into(),
            category: String::new(),
            priority: 0,
            add_to_top: false,
            add_paused: false,
            dupe_key: String::new(),
            dupe_score: 0,
            dupe_mode: "FORCE".to_string(),
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Positional parameters of the `append` method.
    pub fn to_params(&self) -> Value {
        json!([
            self.nzb_filename,
            self.content_base64,
            self.category,
            self.priority,
            self.add_to_top,
            self.add_paused,
            self.dupe_key,
            self.dupe_score,
            self.dupe_mode,
            []
        ])
    }
}

/// Trait for download daemon control backends.
#[async_trait]
pub trait DownloadDaemon: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Daemon version; doubles as the readiness probe.
    async fn version(&self) -> Result<String, DaemonError>;

    /// Current configuration options.
    async fn config(&self) -> Result<Vec<ConfigOption>, DaemonError>;

    /// Persist configuration options. Returns the daemon's verdict.
    async fn save_config(&self, options: &[ConfigOption]) -> Result<bool, DaemonError>;

    /// Reload the daemon so saved options take effect.
    async fn reload(&self) -> Result<bool, DaemonError>;

    /// Queue a download. Returns the new NZBID (<= 0 on failure).
    async fn append(&self, request: &AppendRequest) -> Result<i64, DaemonError>;

    /// Downloads currently queued or in post-processing.
    async fn list_groups(&self) -> Result<Vec<GroupEntry>, DaemonError>;

    /// Finished downloads.
    async fn history(&self) -> Result<Vec<HistoryEntry>, DaemonError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_entry_deserialization() {
        let json = r#"{
            "NZBID": 12,
            "NZBName": "The.Matrix.1999",
            "Status": "DOWNLOADING",
            "FileSizeLo": 705032704,
            "FileSizeHi": 1,
            "RemainingSizeLo": 100,
            "RemainingSizeHi": 0,
            "Health": 1000,
            "DownloadRate": 1048576
        }"#;
        let entry: GroupEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.nzb_id, 12);
        assert_eq!(entry.status, "DOWNLOADING");
        assert_eq!(entry.total_bytes(), 5_000_000_000);
        assert_eq!(entry.remaining_bytes(), 100);
    }

    #[test]
    fn test_history_entry_defaults() {
        let json = r#"{ "NZBID": 3, "Status": "SUCCESS/ALL" }"#;
        let entry: HistoryEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.delete_status, "NONE");
        assert_eq!(entry.par_status, "NONE");
        assert_eq!(entry.health, 0);
    }

    #[test]
    fn test_history_entry_missing_id_is_error() {
        let json = r#"{ "Status": "SUCCESS/ALL" }"#;
        assert!(serde_json::from_str::<HistoryEntry>(json).is_err());
    }

    #[test]
    fn test_diagnostics_display() {
        let diagnostics = JobDiagnostics {
            status: "FAILURE/PAR".to_string(),
            delete_status: "NONE".to_string(),
            health_permille: 853,
            failed_articles: 147,
            total_articles: 1000,
            par_status: "FAILURE".to_string(),
            unpack_status: "NONE".to_string(),
        };
        assert_eq!(
            diagnostics.to_string(),
            "status=FAILURE/PAR, delete_status=NONE, health=85.3%, failed_articles=147/1000, par_status=FAILURE, unpack_status=NONE"
        );
    }

    #[test]
    fn test_append_params_positional() {
        let request = AppendRequest::new("movie.nzb", "PG56Yj4=").with_category("movies");
        let params = request.to_params();
        let params = params.as_array().unwrap();
        assert_eq!(params.len(), 10);
        assert_eq!(params[0], "movie.nzb");
        assert_eq!(params[1], "PG56Yj4=");
        assert_eq!(params[2], "movies");
        assert_eq!(params[8], "FORCE");
        assert!(params[9].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_crashed_display() {
        assert_eq!(
            DaemonError::Crashed { code: Some(3) }.to_string(),
            "Daemon exited unexpectedly (exit code: 3)"
        );
        assert_eq!(
            DaemonError::Crashed { code: None }.to_string(),
            "Daemon exited unexpectedly (exit code: signal)"
        );
    }
}
