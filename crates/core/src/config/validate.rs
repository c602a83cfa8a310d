use super::{types::JobConfig, ConfigError};

/// Smallest part size S3 accepts for all but the last part.
const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum number of upstream servers (one primary plus two backups).
const MAX_SERVERS: usize = 3;

/// Validate configuration
/// Currently validates:
/// - URLs are http(s)
/// - 1 to 3 servers with non-zero port and connections
/// - S3 part size and queue size
/// - Daemon control port is not 0
pub fn validate_config(config: &JobConfig) -> Result<(), ConfigError> {
    for (name, url) in [
        ("NZB_URL", &config.job.nzb_url),
        ("CALLBACK_URL", &config.callback.url),
        ("S3_ENDPOINT", &config.storage.endpoint),
    ] {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "{} must be an http(s) URL",
                name
            )));
        }
    }

    if config.servers.is_empty() || config.servers.len() > MAX_SERVERS {
        return Err(ConfigError::ValidationError(format!(
            "expected 1 to {} news servers, got {}",
            MAX_SERVERS,
            config.servers.len()
        )));
    }

    for server in &config.servers {
        if server.port == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} server port cannot be 0",
                server.name
            )));
        }
        if server.connections == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{} server needs at least one connection",
                server.name
            )));
        }
    }

    if config.storage.part_size_bytes < MIN_PART_SIZE {
        return Err(ConfigError::ValidationError(
            "S3_PART_SIZE_MB must be at least 5".to_string(),
        ));
    }

    if config.storage.max_concurrent_parts == 0 {
        return Err(ConfigError::ValidationError(
            "S3_QUEUE_SIZE cannot be 0".to_string(),
        ));
    }

    if config.daemon.control_port == 0 {
        return Err(ConfigError::ValidationError(
            "NZBGET_CONTROL_PORT cannot be 0".to_string(),
        ));
    }

    Ok(())
}
