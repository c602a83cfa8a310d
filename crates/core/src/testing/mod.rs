//! Testing utilities and mock implementations.
//!
//! Mocks for every external seam of the acquisition flow, so the whole
//! job can be exercised without a daemon, a bucket or a callback server.
//!
//! # Example
//!
//! ```rust,ignore
//! use ondemand_core::testing::{fixtures, MockDaemon, MockObjectStore, RecordingNotifier};
//!
//! let daemon = MockDaemon::new();
//! let store = MockObjectStore::new();
//! let notifier = RecordingNotifier::new();
//!
//! daemon.push_poll(vec![], vec![fixtures::history_entry(1, "SUCCESS/ALL", "NONE")]).await;
//! ```

mod mock_daemon;
mod mock_object_store;
mod recording_notifier;

pub use mock_daemon::MockDaemon;
pub use mock_object_store::{MockObjectStore, RecordedUpload};
pub use recording_notifier::{RecordedNotification, RecordingNotifier};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use crate::config::{
        CallbackConfig, DaemonConfig, JobConfig, JobSpec, NewsServerConfig, PathsConfig,
        StorageConfig,
    };
    use crate::daemon::{GroupEntry, HistoryEntry};

    /// A complete job configuration with one primary server.
    pub fn job_config() -> JobConfig {
        JobConfig {
            job: JobSpec {
                job_id: "job-1".to_string(),
                movie_id: "tt0133093".to_string(),
                nzb_url: "https://indexer.example/get?id=1&apikey=k".to_string(),
                release_title: "The.Matrix.1999.1080p".to_string(),
            },
            callback: CallbackConfig {
                url: "https://portfolio.example/api/movies/callback".to_string(),
                service_key: "svc".to_string(),
                secret: "shh".to_string(),
                service_key_header: "x-service-key".to_string(),
                secret_header: "x-callback-secret".to_string(),
                timeout_secs: 15,
            },
            servers: vec![NewsServerConfig {
                name: "primary".to_string(),
                host: "news.example".to_string(),
                port: 563,
                username: "user".to_string(),
                password: "pass".to_string(),
                connections: 20,
                encryption: true,
                level: 0,
            }],
            storage: StorageConfig {
                endpoint: "https://s3.example".to_string(),
                region: "auto".to_string(),
                access_key_id: "AKIA".to_string(),
                secret_access_key: "secret".to_string(),
                bucket: "media".to_string(),
                key_prefix: "movies".to_string(),
                object_stem: "movie".to_string(),
                part_size_bytes: 16 * 1024 * 1024,
                max_concurrent_parts: 4,
            },
            paths: PathsConfig::under("/downloads"),
            daemon: DaemonConfig {
                binary: "nzbget".into(),
                control_port: 6789,
                control_username: "nzbget".to_string(),
                control_password: "control".to_string(),
                ready_attempts: 30,
                ready_interval_ms: 1000,
                poll_interval_ms: 5000,
            },
        }
    }

    /// Job configuration rooted at `root` with millisecond intervals.
    pub fn job_config_under(root: &Path) -> JobConfig {
        let mut config = job_config();
        config.paths = PathsConfig::under(root);
        config.daemon = fast_daemon_config();
        config
    }

    /// Daemon settings with short intervals and three readiness attempts.
    pub fn fast_daemon_config() -> DaemonConfig {
        DaemonConfig {
            ready_attempts: 3,
            ready_interval_ms: 5,
            poll_interval_ms: 5,
            ..job_config().daemon
        }
    }

    /// A queue entry with the given byte counts.
    pub fn group_entry(nzb_id: i64, total: u64, remaining: u64, status: &str) -> GroupEntry {
        GroupEntry {
            nzb_id,
            nzb_name: "The.Matrix.1999.1080p".to_string(),
            status: status.to_string(),
            file_size_lo: total as u32,
            file_size_hi: (total >> 32) as u32,
            remaining_size_lo: remaining as u32,
            remaining_size_hi: (remaining >> 32) as u32,
            health: 1000,
        }
    }

    /// A history entry with healthy defaults.
    pub fn history_entry(nzb_id: i64, status: &str, delete_status: &str) -> HistoryEntry {
        HistoryEntry {
            nzb_id,
            name: "The.Matrix.1999.1080p".to_string(),
            status: status.to_string(),
            delete_status: delete_status.to_string(),
            par_status: "SUCCESS".to_string(),
            unpack_status: "SUCCESS".to_string(),
            health: 1000,
            failed_articles: 0,
            total_articles: 1000,
            file_size_lo: 1000,
            file_size_hi: 0,
            dest_dir: "/downloads/completed/movies/The.Matrix.1999.1080p".to_string(),
        }
    }

    /// Minimal valid NZB document.
    pub fn nzb_document() -> &'static str {
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\"></nzb>\n"
    }
}
