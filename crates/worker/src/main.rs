use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ondemand_core::{
    daemon::write_daemon_conf, load_config, run_job, validate_config, DaemonController,
    DaemonProcess, JobConfig, NotificationEvent, NzbgetRpcClient, Orchestrator, S3ObjectStore,
    SanitizedConfig, SourceFetcher, StatusSink, WebhookNotifier,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Timeout for downloading the NZB document.
const SOURCE_TIMEOUT_SECS: u64 = 60;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    info!(version = VERSION, "movies-on-demand worker starting");

    let config = load_config().context("Failed to load job configuration")?;
    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = SanitizedConfig::from(&config);
    info!(
        job_id = %config.job.job_id,
        movie_id = %config.job.movie_id,
        fingerprint = %sanitized.fingerprint(),
        "Configuration loaded"
    );
    info!(
        "Effective configuration: {}",
        serde_json::to_string(&sanitized).unwrap_or_default()
    );

    // Built first so startup failures still reach the callback
    let notifier = Arc::new(WebhookNotifier::new(&config.callback));

    let process = match start_daemon(&config).await {
        Ok(process) => process,
        Err(e) => {
            error!(job_id = %config.job.job_id, "Daemon startup failed: {:#}", e);
            notifier
                .notify(NotificationEvent::error(&config.job.job_id, format!("{:#}", e)))
                .await;
            return Err(e);
        }
    };

    let rpc = Arc::new(NzbgetRpcClient::new(&config.daemon));
    let controller =
        DaemonController::new(rpc, &config.daemon).with_process(process.state_handle());

    let store = Arc::new(S3ObjectStore::new(&config.storage));
    info!(
        bucket = %config.storage.bucket,
        callback = %sanitized.callback_url,
        "Clients initialized"
    );

    let orchestrator = Orchestrator::new(
        config,
        controller,
        SourceFetcher::new(SOURCE_TIMEOUT_SECS),
        store,
        notifier,
    );

    let outcome = run_job(&orchestrator, process, shutdown_signal())
        .await
        .context("Acquisition failed")?;

    info!(
        key = %outcome.receipt.key,
        size = outcome.receipt.size_bytes,
        parts = outcome.receipt.parts,
        "Job complete"
    );
    Ok(())
}

/// Write the boot config and spawn the download daemon.
async fn start_daemon(config: &JobConfig) -> Result<DaemonProcess> {
    write_daemon_conf(&config.paths, &config.daemon)
        .await
        .context("Failed to prepare download directories")?;
    let process = DaemonProcess::spawn(&config.daemon.binary, &config.paths.daemon_conf)
        .with_context(|| format!("Failed to start {:?}", config.daemon.binary))?;
    info!(pid = ?process.pid(), "Download daemon started");
    Ok(process)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
