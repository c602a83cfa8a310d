use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Root configuration for one acquisition job.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub job: JobSpec,
    pub callback: CallbackConfig,
    /// Upstream news servers, ordered by priority (index 0 = primary).
    pub servers: Vec<NewsServerConfig>,
    pub storage: StorageConfig,
    pub paths: PathsConfig,
    pub daemon: DaemonConfig,
}

/// What to acquire.
#[derive(Debug, Clone, Serialize)]
pub struct JobSpec {
    pub job_id: String,
    pub movie_id: String,
    /// Source document URL, already HTML-entity decoded.
    pub nzb_url: String,
    pub release_title: String,
}

/// Callback webhook configuration
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    pub url: String,
    pub service_key: String,
    pub secret: String,
    pub service_key_header: String,
    pub secret_header: String,
    pub timeout_secs: u32,
}

/// One upstream Usenet server.
#[derive(Debug, Clone)]
pub struct NewsServerConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub connections: u32,
    pub encryption: bool,
    /// Priority level: 0 is the primary, higher levels are only used for
    /// articles missing on lower levels.
    pub level: u32,
}

/// S3-compatible object storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// Leading key segment, e.g. "movies" -> "movies/<job_id>/movie.mkv".
    pub key_prefix: String,
    /// Fixed file name stem of the uploaded object.
    pub object_stem: String,
    pub part_size_bytes: u64,
    pub max_concurrent_parts: usize,
}

/// Local filesystem layout used by the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct PathsConfig {
    pub main_dir: PathBuf,
    /// Completed (unpacked) downloads.
    pub dest_dir: PathBuf,
    /// Intermediate files of in-progress downloads.
    pub inter_dir: PathBuf,
    /// Daemon configuration file written before boot.
    pub daemon_conf: PathBuf,
}

impl PathsConfig {
    /// Standard layout under a single download root.
    pub fn under(main_dir: impl Into<PathBuf>) -> Self {
        let main_dir = main_dir.into();
        Self {
            dest_dir: main_dir.join("completed"),
            inter_dir: main_dir.join("intermediate"),
            daemon_conf: main_dir.join("nzbget.conf"),
            main_dir,
        }
    }
}

/// Download daemon process and control API settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub binary: PathBuf,
    pub control_port: u16,
    pub control_username: String,
    pub control_password: String,
    /// How many `version` probes before giving up on readiness.
    pub ready_attempts: u32,
    pub ready_interval_ms: u64,
    /// Job status poll interval.
    pub poll_interval_ms: u64,
}

impl DaemonConfig {
    /// JSON-RPC endpoint of the locally running daemon.
    pub fn rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}/jsonrpc", self.control_port)
    }
}

pub(crate) fn default_ready_attempts() -> u32 {
    30
}

pub(crate) fn default_ready_interval_ms() -> u64 {
    1000
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    5000 // 5 seconds
}

/// Sanitized config for logs (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub job: JobSpec,
    pub callback_url: String,
    pub servers: Vec<SanitizedServer>,
    pub storage: SanitizedStorage,
    pub paths: PathsConfig,
    pub daemon_binary: String,
    pub control_port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedServer {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub connections: u32,
    pub encryption: bool,
    pub level: u32,
    pub credentials_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorage {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub key_prefix: String,
    pub part_size_bytes: u64,
    pub max_concurrent_parts: usize,
}

impl From<&JobConfig> for SanitizedConfig {
    fn from(config: &JobConfig) -> Self {
        Self {
            job: JobSpec {
                // Indexer URLs carry the API key in the query
                nzb_url: config
                    .job
                    .nzb_url
                    .split('?')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                ..config.job.clone()
            },
            callback_url: config.callback.url.clone(),
            servers: config
                .servers
                .iter()
                .map(|s| SanitizedServer {
                    name: s.name.clone(),
                    host: s.host.clone(),
                    port: s.port,
                    connections: s.connections,
                    encryption: s.encryption,
                    level: s.level,
                    credentials_configured: !s.username.is_empty() && !s.password.is_empty(),
                })
                .collect(),
            storage: SanitizedStorage {
                endpoint: config.storage.endpoint.clone(),
                region: config.storage.region.clone(),
                bucket: config.storage.bucket.clone(),
                key_prefix: config.storage.key_prefix.clone(),
                part_size_bytes: config.storage.part_size_bytes,
                max_concurrent_parts: config.storage.max_concurrent_parts,
            },
            paths: config.paths.clone(),
            daemon_binary: config.daemon.binary.display().to_string(),
            control_port: config.daemon.control_port,
        }
    }
}

impl SanitizedConfig {
    /// First 16 hex chars of the SHA-256 of the sanitized JSON.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        Sha256::digest(&json)
            .iter()
            .take(8)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}
