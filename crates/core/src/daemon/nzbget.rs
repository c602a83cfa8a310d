//! NZBGet JSON-RPC client implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::config::DaemonConfig;

use super::{
    AppendRequest, ConfigOption, DaemonError, DownloadDaemon, GroupEntry, HistoryEntry,
};

/// Per-request timeout. `append` carries the whole document, so this is
/// generous compared to the status calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// NZBGet control API client.
pub struct NzbgetRpcClient {
    client: Client,
    url: String,
    username: String,
    password: String,
    next_id: AtomicU64,
}

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

impl NzbgetRpcClient {
    /// Create a client for the daemon described by `config`.
    pub fn new(config: &DaemonConfig) -> Self {
        Self::with_url(
            config.rpc_url(),
            config.control_username.clone(),
            config.control_password.clone(),
        )
    }

    /// Create a client for an explicit endpoint URL.
    pub fn with_url(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            url: url.into(),
            username: username.into(),
            password: password.into(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Invoke `method` and decode its `result` into `T`.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, DaemonError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        trace!(method, id, "Daemon RPC call");

        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DaemonError::Timeout
                } else {
                    DaemonError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DaemonError::Unauthorized);
        }
        if !status.is_success() {
            return Err(DaemonError::Http {
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| DaemonError::Request(e.to_string()))?;

        decode_response(method, &text)
    }
}

/// Parse a raw response body into the typed `result` of `method`.
fn decode_response<T: DeserializeOwned>(method: &str, text: &str) -> Result<T, DaemonError> {
    let envelope: RpcEnvelope =
        serde_json::from_str(text).map_err(|e| DaemonError::UnexpectedResponse {
            method: method.to_string(),
            reason: format!("invalid JSON-RPC envelope: {}", e),
        })?;

    if let Some(fault) = envelope.error {
        return Err(DaemonError::Rpc {
            method: method.to_string(),
            message: format!("{} (code {})", fault.message, fault.code),
        });
    }

    let result = envelope
        .result
        .ok_or_else(|| DaemonError::UnexpectedResponse {
            method: method.to_string(),
            reason: "missing result".to_string(),
        })?;

    serde_json::from_value(result).map_err(|e| DaemonError::UnexpectedResponse {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl DownloadDaemon for NzbgetRpcClient {
    fn name(&self) -> &str {
        "nzbget"
    }

    async fn version(&self) -> Result<String, DaemonError> {
        self.call("version", json!([])).await
    }

    async fn config(&self) -> Result<Vec<ConfigOption>, DaemonError> {
        self.call("config", json!([])).await
    }

    async fn save_config(&self, options: &[ConfigOption]) -> Result<bool, DaemonError> {
        debug!(count = options.len(), "Saving daemon options");
        self.call("saveconfig", json!([options])).await
    }

    async fn reload(&self) -> Result<bool, DaemonError> {
        self.call("reload", json!([])).await
    }

    async fn append(&self, request: &AppendRequest) -> Result<i64, DaemonError> {
        debug!(
            file = %request.nzb_filename,
            category = %request.category,
            "Appending download"
        );
        self.call("append", request.to_params()).await
    }

    async fn list_groups(&self) -> Result<Vec<GroupEntry>, DaemonError> {
        // 0 = no log entries attached
        self.call("listgroups", json!([0])).await
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>, DaemonError> {
        // false = hidden entries excluded
        self.call("history", json!([false])).await
    }
}
