//! Daemon configuration: the boot-time file and the runtime option set.

use std::collections::HashMap;

use tokio::fs;

use crate::config::{DaemonConfig, NewsServerConfig, PathsConfig};

use super::{ConfigOption, DaemonError};

/// Render the minimal configuration file the daemon needs to boot.
///
/// Paths and the control endpoint can only be set before start; everything
/// else goes through `saveconfig` once the control API is up.
pub fn render_daemon_conf(paths: &PathsConfig, daemon: &DaemonConfig) -> String {
    let main = paths.main_dir.display();
    let lines = [
        format!("MainDir={}", main),
        format!("DestDir={}", paths.dest_dir.display()),
        format!("InterDir={}", paths.inter_dir.display()),
        format!("NzbDir={}/nzb", main),
        format!("QueueDir={}/queue", main),
        format!("TempDir={}/tmp", main),
        format!("LogFile={}/nzbget.log", main),
        "WriteLog=append".to_string(),
        "OutputMode=loggable".to_string(),
        "ControlIP=127.0.0.1".to_string(),
        format!("ControlPort={}", daemon.control_port),
        format!("ControlUsername={}", daemon.control_username),
        format!("ControlPassword={}", daemon.control_password),
        "RestrictedUsername=".to_string(),
        "AddUsername=".to_string(),
        "SecureControl=no".to_string(),
        "UpdateCheck=none".to_string(),
    ];

    let mut conf = lines.join("\n");
    conf.push('\n');
    conf
}

/// Create the download directories and write the daemon config file.
pub async fn write_daemon_conf(
    paths: &PathsConfig,
    daemon: &DaemonConfig,
) -> Result<(), DaemonError> {
    for dir in [&paths.main_dir, &paths.dest_dir, &paths.inter_dir] {
        fs::create_dir_all(dir).await?;
    }
    if let Some(parent) = paths.daemon_conf.parent() {
        fs::create_dir_all(parent).await?;
    }

    fs::write(&paths.daemon_conf, render_daemon_conf(paths, daemon)).await?;
    Ok(())
}

/// Per-server options, numbered from 1 in priority order.
pub fn server_options(servers: &[NewsServerConfig]) -> Vec<ConfigOption> {
    let mut options = Vec::new();

    for (idx, server) in servers.iter().enumerate() {
        let prefix = format!("Server{}", idx + 1);
        let opt = |key: &str, value: String| ConfigOption::new(format!("{}.{}", prefix, key), value);

        options.extend([
            opt("Active", "yes".to_string()),
            opt("Name", server.name.clone()),
            opt("Level", server.level.to_string()),
            opt("Optional", "no".to_string()),
            opt("Group", "0".to_string()),
            opt("Host", server.host.clone()),
            opt("Port", server.port.to_string()),
            opt("Username", server.username.clone()),
            opt("Password", server.password.clone()),
            opt("JoinGroup", "no".to_string()),
            opt("Encryption", yes_no(server.encryption).to_string()),
            opt("Connections", server.connections.to_string()),
            opt("Retention", "0".to_string()),
        ]);
    }

    options
}

/// Post-processing options: repair and unpack into `DestDir`.
pub fn unpack_options() -> Vec<ConfigOption> {
    vec![
        ConfigOption::new("ParCheck", "auto"),
        ConfigOption::new("ParRepair", "yes"),
        ConfigOption::new("Unpack", "yes"),
        ConfigOption::new("DirectUnpack", "no"),
        ConfigOption::new("UnpackCleanupDisk", "yes"),
    ]
}

/// All runtime overrides for this job.
pub fn runtime_options(servers: &[NewsServerConfig]) -> Vec<ConfigOption> {
    let mut options = server_options(servers);
    options.extend(unpack_options());
    options
}

/// Overlay `overrides` onto the daemon's current option list.
///
/// Existing names keep their position, new names are appended. Names are
/// compared case-insensitively, as the daemon does.
pub fn merge_options(current: &[ConfigOption], overrides: &[ConfigOption]) -> Vec<ConfigOption> {
    let mut merged: Vec<ConfigOption> = current.to_vec();
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, o)| (o.name.to_ascii_lowercase(), i))
        .collect();

    for option in overrides {
        let key = option.name.to_ascii_lowercase();
        match index.get(&key) {
            Some(&i) => merged[i].value = option.value.clone(),
            None => {
                index.insert(key, merged.len());
                merged.push(option.clone());
            }
        }
    }

    merged
}

/// First override whose value the daemon does not report back.
pub fn find_unapplied<'a>(
    reported: &[ConfigOption],
    overrides: &'a [ConfigOption],
) -> Option<&'a ConfigOption> {
    let reported: HashMap<String, &str> = reported
        .iter()
        .map(|o| (o.name.to_ascii_lowercase(), o.value.as_str()))
        .collect();

    overrides.iter().find(|o| {
        reported
            .get(&o.name.to_ascii_lowercase())
            .map(|v| !values_match(&o.value, v))
            .unwrap_or(true)
    })
}

/// Hosts, paths and credentials must match exactly; only keyword values
/// such as `yes` or `auto` may differ in case.
fn values_match(expected: &str, reported: &str) -> bool {
    const KEYWORDS: &[&str] = &["yes", "no", "auto", "force", "none"];

    if KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(expected)) {
        expected.eq_ignore_ascii_case(reported)
    } else {
        expected == reported
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
