//! Callback webhook delivery.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::CallbackConfig;

use super::{NotificationEvent, RetryPolicy, StatusSink};

/// Longest response body excerpt kept in logs.
const BODY_PREVIEW_CHARS: usize = 200;

/// Result of delivering one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted with a 2xx after `attempts` tries.
    Delivered { attempts: u32 },
    /// Refused in a way retrying cannot fix (403, 302, 404).
    Rejected { status: u16 },
    /// Every attempt failed.
    Exhausted { attempts: u32 },
}

/// Posts events to the callback URL with the service auth headers.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    service_key_header: String,
    service_key: String,
    secret_header: String,
    secret: String,
    policy: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new(config: &CallbackConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .redirect(Policy::none())
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            url: config.url.clone(),
            service_key_header: config.service_key_header.clone(),
            service_key: config.service_key.clone(),
            secret_header: config.secret_header.clone(),
            secret: config.secret.clone(),
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Deliver `event`, retrying critical statuses per the policy.
    pub async fn deliver(&self, event: &NotificationEvent) -> DeliveryOutcome {
        let payload = event.to_payload();
        self.deliver_with(event, || self.post(&payload)).await
    }

    /// Retry loop over any transport that yields a status and body excerpt.
    async fn deliver_with<F, Fut, E>(&self, event: &NotificationEvent, mut send: F) -> DeliveryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(StatusCode, String), E>>,
        E: Display,
    {
        let attempts = self.policy.attempts_for(event.status);

        for attempt in 1..=attempts {
            match send().await {
                Ok((status, _)) if status.is_success() => {
                    debug!(status = %event.status, attempt, "Callback delivered");
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Ok((status @ (StatusCode::FORBIDDEN | StatusCode::FOUND), _)) => {
                    error!(
                        status = %event.status,
                        http_status = status.as_u16(),
                        "Callback refused: check the service key and callback URL"
                    );
                    return DeliveryOutcome::Rejected {
                        status: status.as_u16(),
                    };
                }
                Ok((StatusCode::NOT_FOUND, _)) => {
                    warn!(job_id = %event.job_id, status = %event.status, "Callback reports job not found");
                    return DeliveryOutcome::Rejected { status: 404 };
                }
                Ok((status, body)) => {
                    warn!(
                        status = %event.status,
                        attempt,
                        attempts,
                        http_status = status.as_u16(),
                        body = %body,
                        "Callback failed"
                    );
                }
                Err(e) => {
                    warn!(status = %event.status, attempt, attempts, error = %e, "Callback request failed");
                }
            }

            if attempt < attempts {
                sleep(self.policy.delay_after(attempt)).await;
            }
        }

        error!(
            job_id = %event.job_id,
            status = %event.status,
            attempts,
            raised_at = %event.created_at.to_rfc3339(),
            "Giving up on callback"
        );
        DeliveryOutcome::Exhausted { attempts }
    }

    async fn post(&self, payload: &Value) -> Result<(StatusCode, String), reqwest::Error> {
        let response = self
            .client
            .post(&self.url)
            .header(self.service_key_header.as_str(), self.service_key.as_str())
            .header(self.secret_header.as_str(), self.secret.as_str())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = if status.is_success() {
            String::new()
        } else {
            let text = response.text().await.unwrap_or_default();
            text.chars().take(BODY_PREVIEW_CHARS).collect()
        };
        Ok((status, body))
    }
}

#[async_trait]
impl StatusSink for WebhookNotifier {
    async fn notify(&self, event: NotificationEvent) {
        self.deliver(&event).await;
    }
}
