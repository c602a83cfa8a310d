//! Status sink that records every event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::notifier::{JobStatus, NotificationEvent, StatusSink};

/// A recorded notification for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedNotification {
    pub event: NotificationEvent,
    /// When the sink received it.
    pub timestamp: DateTime<Utc>,
}

/// StatusSink that keeps events in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    recorded: Arc<RwLock<Vec<RecordedNotification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in arrival order.
    pub async fn events(&self) -> Vec<NotificationEvent> {
        self.recorded
            .read()
            .await
            .iter()
            .map(|r| r.event.clone())
            .collect()
    }

    /// Events with the given status, in arrival order.
    pub async fn events_with_status(&self, status: JobStatus) -> Vec<NotificationEvent> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.status == status)
            .collect()
    }

    /// Status sequence, e.g. `[Starting, Downloading, Ready]`.
    pub async fn statuses(&self) -> Vec<JobStatus> {
        self.events().await.iter().map(|e| e.status).collect()
    }

    pub async fn recorded(&self) -> Vec<RecordedNotification> {
        self.recorded.read().await.clone()
    }
}

#[async_trait]
impl StatusSink for RecordingNotifier {
    async fn notify(&self, event: NotificationEvent) {
        self.recorded.write().await.push(RecordedNotification {
            event,
            timestamp: Utc::now(),
        });
    }
}
