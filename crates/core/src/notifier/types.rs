//! Notification payloads and the sink trait.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Lifecycle status reported to the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Downloading,
    Uploading,
    Ready,
    Error,
}

impl JobStatus {
    /// Critical statuses decide the job's outcome downstream and are retried.
    pub fn is_critical(&self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Downloading => "downloading",
            JobStatus::Uploading => "uploading",
            JobStatus::Ready => "ready",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a finished upload, carried by the `ready` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyDetails {
    pub movie_id: String,
    pub storage_key: String,
    pub file_size: u64,
    pub file_name: String,
}

/// One event posted to the callback: `{ "job_id", "status", ...extra }`.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// When the event was raised. Kept out of the payload.
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            extra: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Add an extra payload field.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn starting(job_id: impl Into<String>) -> Self {
        Self::new(job_id, JobStatus::Starting)
    }

    pub fn downloading(job_id: impl Into<String>, progress: f64, status_text: &str) -> Self {
        Self::new(job_id, JobStatus::Downloading)
            .with("progress", json!(progress))
            .with("status_text", json!(status_text))
    }

    pub fn uploading(job_id: impl Into<String>, progress: f64) -> Self {
        Self::new(job_id, JobStatus::Uploading).with("progress", json!(progress))
    }

    pub fn ready(job_id: impl Into<String>, details: &ReadyDetails) -> Self {
        Self::new(job_id, JobStatus::Ready)
            .with("movie_id", json!(details.movie_id))
            .with("storage_key", json!(details.storage_key))
            .with("file_size", json!(details.file_size))
            .with("file_name", json!(details.file_name))
    }

    pub fn error(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(job_id, JobStatus::Error).with("error", Value::String(message.into()))
    }

    /// Serialized JSON body.
    pub fn to_payload(&self) -> Value {
        // Map keys and plain values cannot fail to serialize
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Destination for lifecycle events.
///
/// Delivery problems are handled (logged) by the sink itself; callers never
/// see an error, since a lost notification must not abort the job.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn notify(&self, event: NotificationEvent);
}
