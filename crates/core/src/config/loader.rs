use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::types::{
    default_poll_interval_ms, default_ready_attempts, default_ready_interval_ms, CallbackConfig,
    DaemonConfig, JobConfig, JobSpec, NewsServerConfig, PathsConfig, StorageConfig,
};
use super::ConfigError;
use crate::source::decode_html;

/// Environment variable naming an optional TOML file with defaults.
pub const CONFIG_FILE_ENV: &str = "ONDEMAND_CONFIG";

const MIB: u64 = 1024 * 1024;

/// Load the job configuration from the process environment.
///
/// If `ONDEMAND_CONFIG` names a TOML file, its keys (same names as the
/// environment variables, lowercased) act as defaults that the environment
/// overrides.
pub fn load_config() -> Result<JobConfig, ConfigError> {
    let mut figment = Figment::new();

    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        figment = figment.merge(Toml::file(path));
    }

    load_config_from_figment(figment.merge(env_provider()))
}

/// The process environment as unparsed strings, keys lowercased.
///
/// `Env` would turn `JOB_ID=007` into the number 7.
fn env_provider() -> Serialized<BTreeMap<String, String>> {
    let vars = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect::<BTreeMap<_, _>>();
    Serialized::defaults(vars)
}

/// Load configuration from a TOML file only (useful for testing)
pub fn load_config_from_file(path: &Path) -> Result<JobConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }
    load_config_from_figment(Figment::new().merge(Toml::file(path)))
}

/// Extract and check the job configuration from an assembled figment.
pub fn load_config_from_figment(figment: Figment) -> Result<JobConfig, ConfigError> {
    let raw: RawJobEnv = figment
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;
    raw.into_config()
}

/// Flat view of the job environment, keys lowercased.
#[derive(Debug, Default, Deserialize)]
struct RawJobEnv {
    #[serde(default, deserialize_with = "lenient_string")]
    job_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    movie_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    nzb_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    release_title: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    callback_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    callback_service_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    callback_secret: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    callback_service_key_header: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    callback_secret_header: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    callback_timeout_secs: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    usenet_host: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_port: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_password: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_connections: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_encryption: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup1_host: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup1_port: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup1_username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup1_password: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup1_connections: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup1_encryption: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup2_host: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup2_port: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup2_username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup2_password: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup2_connections: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    usenet_backup2_encryption: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    s3_endpoint: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    s3_region: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    s3_access_key_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    s3_secret_access_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    s3_bucket: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    s3_key_prefix: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    s3_object_stem: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    s3_part_size_mb: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    s3_queue_size: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    download_dir: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    nzbget_binary: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    nzbget_control_port: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    nzbget_control_username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    nzbget_control_password: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    nzbget_poll_interval_ms: Option<String>,
}

/// Accept strings, numbers and booleans for string-typed settings.
///
/// TOML defaults may spell `job_id = 42` as a number.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Bool(bool),
    }

    let value = Option::<Scalar>::deserialize(deserializer)?;
    Ok(value
        .map(|v| match v {
            Scalar::Text(s) => s,
            Scalar::Unsigned(n) => n.to_string(),
            Scalar::Signed(n) => n.to_string(),
            Scalar::Float(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Collects missing required variables so they are all reported at once.
struct Required {
    missing: Vec<String>,
}

impl Required {
    fn new() -> Self {
        Self {
            missing: Vec::new(),
        }
    }

    fn take(&mut self, name: &str, value: Option<String>) -> String {
        match value {
            Some(v) => v,
            None => {
                self.missing.push(name.to_string());
                String::new()
            }
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::ValidationError(format!("{} must be a number, got '{}'", name, v))),
    }
}

fn parse_flag(name: &str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::ValidationError(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

struct RawServer {
    host: Option<String>,
    port: Option<String>,
    username: Option<String>,
    password: Option<String>,
    connections: Option<String>,
    encryption: Option<String>,
}

impl RawServer {
    fn build(
        self,
        name: &str,
        env_prefix: &str,
        level: u32,
        required: &mut Required,
    ) -> Result<Option<NewsServerConfig>, ConfigError> {
        // Backups are optional; a primary host is always required.
        if self.host.is_none() && level > 0 {
            return Ok(None);
        }

        let host = required.take(&format!("{}_HOST", env_prefix), self.host);
        let username = required.take(&format!("{}_USERNAME", env_prefix), self.username);
        let password = required.take(&format!("{}_PASSWORD", env_prefix), self.password);

        Ok(Some(NewsServerConfig {
            name: name.to_string(),
            host,
            port: parse_number(&format!("{}_PORT", env_prefix), self.port, 563u16)?,
            username,
            password,
            connections: parse_number(
                &format!("{}_CONNECTIONS", env_prefix),
                self.connections,
                20u32,
            )?,
            encryption: parse_flag(&format!("{}_ENCRYPTION", env_prefix), self.encryption, true)?,
            level,
        }))
    }
}

impl RawJobEnv {
    fn into_config(self) -> Result<JobConfig, ConfigError> {
        let mut required = Required::new();

        let job = JobSpec {
            job_id: required.take("JOB_ID", self.job_id),
            movie_id: required.take("MOVIE_ID", self.movie_id),
            nzb_url: decode_html(&required.take("NZB_URL", self.nzb_url)),
            release_title: required.take("RELEASE_TITLE", self.release_title),
        };

        let callback = CallbackConfig {
            url: required.take("CALLBACK_URL", self.callback_url),
            service_key: required.take("CALLBACK_SERVICE_KEY", self.callback_service_key),
            secret: required.take("CALLBACK_SECRET", self.callback_secret),
            service_key_header: self
                .callback_service_key_header
                .unwrap_or_else(|| "x-service-key".to_string()),
            secret_header: self
                .callback_secret_header
                .unwrap_or_else(|| "x-callback-secret".to_string()),
            timeout_secs: parse_number("CALLBACK_TIMEOUT_SECS", self.callback_timeout_secs, 15)?,
        };

        let raw_servers = [
            (
                "primary",
                "USENET",
                RawServer {
                    host: self.usenet_host,
                    port: self.usenet_port,
                    username: self.usenet_username,
                    password: self.usenet_password,
                    connections: self.usenet_connections,
                    encryption: self.usenet_encryption,
                },
            ),
            (
                "backup1",
                "USENET_BACKUP1",
                RawServer {
                    host: self.usenet_backup1_host,
                    port: self.usenet_backup1_port,
                    username: self.usenet_backup1_username,
                    password: self.usenet_backup1_password,
                    connections: self.usenet_backup1_connections,
                    encryption: self.usenet_backup1_encryption,
                },
            ),
            (
                "backup2",
                "USENET_BACKUP2",
                RawServer {
                    host: self.usenet_backup2_host,
                    port: self.usenet_backup2_port,
                    username: self.usenet_backup2_username,
                    password: self.usenet_backup2_password,
                    connections: self.usenet_backup2_connections,
                    encryption: self.usenet_backup2_encryption,
                },
            ),
        ];

        let mut servers = Vec::new();
        for (name, prefix, raw) in raw_servers {
            let level = servers.len() as u32;
            if let Some(server) = raw.build(name, prefix, level, &mut required)? {
                servers.push(server);
            }
        }

        let part_size_mb: u64 = parse_number("S3_PART_SIZE_MB", self.s3_part_size_mb, 16)?;
        let storage = StorageConfig {
            endpoint: required.take("S3_ENDPOINT", self.s3_endpoint),
            region: self.s3_region.unwrap_or_else(|| "auto".to_string()),
            access_key_id: required.take("S3_ACCESS_KEY_ID", self.s3_access_key_id),
            secret_access_key: required.take("S3_SECRET_ACCESS_KEY", self.s3_secret_access_key),
            bucket: required.take("S3_BUCKET", self.s3_bucket),
            key_prefix: self
                .s3_key_prefix
                .map(|p| p.trim_matches('/').to_string())
                .unwrap_or_else(|| "movies".to_string()),
            object_stem: self.s3_object_stem.unwrap_or_else(|| "movie".to_string()),
            part_size_bytes: part_size_mb.checked_mul(MIB).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "S3_PART_SIZE_MB is too large: {}",
                    part_size_mb
                ))
            })?,
            max_concurrent_parts: parse_number("S3_QUEUE_SIZE", self.s3_queue_size, 4usize)?,
        };

        if !required.missing.is_empty() {
            return Err(ConfigError::MissingVariables(required.missing));
        }

        let paths = PathsConfig::under(
            self.download_dir
                .unwrap_or_else(|| "/downloads".to_string()),
        );

        let daemon = DaemonConfig {
            binary: PathBuf::from(self.nzbget_binary.unwrap_or_else(|| "nzbget".to_string())),
            control_port: parse_number("NZBGET_CONTROL_PORT", self.nzbget_control_port, 6789u16)?,
            control_username: self
                .nzbget_control_username
                .unwrap_or_else(|| "nzbget".to_string()),
            control_password: self
                .nzbget_control_password
                .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()),
            ready_attempts: default_ready_attempts(),
            ready_interval_ms: default_ready_interval_ms(),
            poll_interval_ms: parse_number(
                "NZBGET_POLL_INTERVAL_MS",
                self.nzbget_poll_interval_ms,
                default_poll_interval_ms(),
            )?,
        };

        Ok(JobConfig {
            job,
            callback,
            servers,
            storage,
            paths,
            daemon,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Serialized;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn full_env() -> serde_json::Value {
        json!({
            "job_id": "job-7",
            "movie_id": "tt0133093",
            "nzb_url": "https://indexer.example/api?t=get&amp;id=abc&amp;apikey=k",
            "release_title": "The.Matrix.1999.1080p.BluRay",
            "callback_url": "https://portfolio.example/api/movies/callback",
            "callback_service_key": "svc-key",
            "callback_secret": "cb-secret",
            "usenet_host": "news.example",
            "usenet_username": "user",
            "usenet_password": "pass",
            "s3_endpoint": "https://account.r2.example",
            "s3_access_key_id": "AKIA",
            "s3_secret_access_key": "secret",
            "s3_bucket": "media",
        })
    }

    fn load(value: serde_json::Value) -> Result<JobConfig, ConfigError> {
        load_config_from_figment(Figment::from(Serialized::defaults(value)))
    }

    #[test]
    fn test_load_full_environment_with_defaults() {
        let config = load(full_env()).unwrap();

        assert_eq!(config.job.job_id, "job-7");
        assert_eq!(
            config.job.nzb_url,
            "https://indexer.example/api?t=get&id=abc&apikey=k"
        );
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].level, 0);
        assert_eq!(config.servers[0].port, 563);
        assert_eq!(config.servers[0].connections, 20);
        assert!(config.servers[0].encryption);
        assert_eq!(config.storage.region, "auto");
        assert_eq!(config.storage.key_prefix, "movies");
        assert_eq!(config.storage.part_size_bytes, 16 * MIB);
        assert_eq!(config.storage.max_concurrent_parts, 4);
        assert_eq!(config.daemon.control_port, 6789);
        assert_eq!(config.daemon.ready_attempts, 30);
        assert_eq!(config.daemon.poll_interval_ms, 5000);
        assert!(!config.daemon.control_password.is_empty());
        assert_eq!(config.paths.dest_dir, PathBuf::from("/downloads/completed"));
        assert_eq!(config.callback.service_key_header, "x-service-key");
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        let result = load(json!({ "job_id": "job-7", "usenet_host": "news.example" }));

        match result {
            Err(ConfigError::MissingVariables(missing)) => {
                assert!(missing.contains(&"MOVIE_ID".to_string()));
                assert!(missing.contains(&"NZB_URL".to_string()));
                assert!(missing.contains(&"CALLBACK_SECRET".to_string()));
                assert!(missing.contains(&"USENET_USERNAME".to_string()));
                assert!(missing.contains(&"S3_BUCKET".to_string()));
                assert!(!missing.contains(&"JOB_ID".to_string()));
                assert!(!missing.contains(&"USENET_HOST".to_string()));
            }
            other => panic!("Expected MissingVariables, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let mut env = full_env();
        env["s3_bucket"] = json!("   ");
        let result = load(env);
        assert!(
            matches!(result, Err(ConfigError::MissingVariables(ref m)) if m == &vec!["S3_BUCKET".to_string()])
        );
    }

    #[test]
    fn test_numeric_values_accepted_for_strings() {
        let mut env = full_env();
        env["job_id"] = json!(42);
        env["usenet_password"] = json!(123456);
        let config = load(env).unwrap();
        assert_eq!(config.job.job_id, "42");
        assert_eq!(config.servers[0].password, "123456");
    }

    #[test]
    fn test_backup_servers_get_increasing_levels() {
        let mut env = full_env();
        env["usenet_backup1_host"] = json!("backup-a.example");
        env["usenet_backup1_username"] = json!("a");
        env["usenet_backup1_password"] = json!("b");
        env["usenet_backup1_port"] = json!(119);
        env["usenet_backup1_encryption"] = json!("no");
        env["usenet_backup2_host"] = json!("backup-b.example");
        env["usenet_backup2_username"] = json!("c");
        env["usenet_backup2_password"] = json!("d");
        env["usenet_backup2_connections"] = json!("8");

        let config = load(env).unwrap();
        assert_eq!(config.servers.len(), 3);
        assert_eq!(config.servers[1].name, "backup1");
        assert_eq!(config.servers[1].level, 1);
        assert_eq!(config.servers[1].port, 119);
        assert!(!config.servers[1].encryption);
        assert_eq!(config.servers[2].level, 2);
        assert_eq!(config.servers[2].connections, 8);
    }

    #[test]
    fn test_backup_without_credentials_is_missing() {
        let mut env = full_env();
        env["usenet_backup1_host"] = json!("backup-a.example");
        let result = load(env);
        match result {
            Err(ConfigError::MissingVariables(missing)) => {
                assert_eq!(
                    missing,
                    vec![
                        "USENET_BACKUP1_USERNAME".to_string(),
                        "USENET_BACKUP1_PASSWORD".to_string()
                    ]
                );
            }
            other => panic!("Expected MissingVariables, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_port_is_validation_error() {
        let mut env = full_env();
        env["usenet_port"] = json!("not-a-port");
        let result = load(env);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_environment_values_are_kept_verbatim() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            for (key, value) in full_env().as_object().unwrap() {
                jail.set_env(key.to_ascii_uppercase(), value.as_str().unwrap());
            }
            jail.set_env("JOB_ID", "007");
            jail.set_env("USENET_PASSWORD", "000123");
            jail.set_env("CALLBACK_SECRET", "1e3");
            jail.set_env("S3_SECRET_ACCESS_KEY", "1.50");
            jail.set_env("USENET_PORT", "0563");

            let config = load_config().unwrap();
            assert_eq!(config.job.job_id, "007");
            assert_eq!(config.servers[0].password, "000123");
            assert_eq!(config.callback.secret, "1e3");
            assert_eq!(config.storage.secret_access_key, "1.50");
            assert_eq!(config.servers[0].port, 563);
            Ok(())
        });
    }

    #[test]
    fn test_huge_part_size_rejected() {
        let mut env = full_env();
        env["s3_part_size_mb"] = json!(u64::MAX.to_string());
        let result = load(env);
        assert!(
            matches!(result, Err(ConfigError::ValidationError(ref m)) if m.contains("S3_PART_SIZE_MB"))
        );
    }

    #[test]
    fn test_key_prefix_slashes_trimmed() {
        let mut env = full_env();
        env["s3_key_prefix"] = json!("/library/movies/");
        let config = load(env).unwrap();
        assert_eq!(config.storage.key_prefix, "library/movies");
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config_from_file(Path::new("/nonexistent/ondemand.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
job_id = "from-file"
movie_id = "tt1"
nzb_url = "https://indexer.example/1.nzb"
release_title = "Some.Movie"
callback_url = "https://portfolio.example/cb"
callback_service_key = "k"
callback_secret = "s"
usenet_host = "news.example"
usenet_username = "u"
usenet_password = "p"
usenet_connections = 30
s3_endpoint = "https://s3.example"
s3_access_key_id = "a"
s3_secret_access_key = "b"
s3_bucket = "bucket"
download_dir = "/data"
"#
        )
        .unwrap();

        let config = load_config_from_file(temp_file.path()).unwrap();
        assert_eq!(config.job.job_id, "from-file");
        assert_eq!(config.servers[0].connections, 30);
        assert_eq!(config.paths.main_dir, PathBuf::from("/data"));
    }
}
