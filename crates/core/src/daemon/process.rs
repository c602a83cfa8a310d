//! Download daemon subprocess supervision.
//!
//! The child is owned by a supervisor task. The controller only sees a
//! `ProcessState` through a watch channel; every state change goes through
//! the transition guard, so "we asked it to stop" (`Stopping -> Stopped`) and
//! "it died on its own" (`Starting | Ready -> Crashed`) cannot be confused.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::DaemonError;

/// Lifecycle of the daemon subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawned, control API not confirmed yet.
    Starting,
    /// Control API answered.
    Ready,
    /// Shutdown requested by us.
    Stopping,
    /// Exited after a request, or cleanly on its own.
    Stopped,
    /// Exited on its own with a failure code or signal.
    Crashed { code: Option<i32> },
}

impl ProcessState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: &ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, next),
            (Starting, Ready)
                | (Starting | Ready, Stopping)
                | (Starting | Ready, Crashed { .. })
                | (Starting | Ready | Stopping, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Crashed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Ready => "ready",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
            ProcessState::Crashed { .. } => "crashed",
        }
    }
}

/// Apply `next` if the guard allows it. Returns whether the state changed.
fn transition(tx: &watch::Sender<ProcessState>, next: ProcessState) -> bool {
    tx.send_if_modified(|state| {
        if state.can_transition_to(&next) {
            debug!(from = state.as_str(), to = next.as_str(), "Daemon state change");
            *state = next;
            true
        } else {
            false
        }
    })
}

/// Cloneable handle for reporting readiness from the controller.
#[derive(Clone)]
pub struct ProcessStateHandle {
    tx: Arc<watch::Sender<ProcessState>>,
}

impl ProcessStateHandle {
    /// Record that the control API answered.
    pub fn mark_ready(&self) -> Result<(), DaemonError> {
        let current = *self.tx.borrow();
        if current == ProcessState::Ready || transition(&self.tx, ProcessState::Ready) {
            Ok(())
        } else {
            Err(DaemonError::InvalidState(format!(
                "{} -> ready",
                current.as_str()
            )))
        }
    }

    pub fn state(&self) -> ProcessState {
        *self.tx.borrow()
    }
}

/// A running download daemon.
pub struct DaemonProcess {
    pid: Option<u32>,
    tx: Arc<watch::Sender<ProcessState>>,
    rx: watch::Receiver<ProcessState>,
    stop_tx: Option<oneshot::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl DaemonProcess {
    /// Start the daemon in foreground server mode with the given config file.
    pub fn spawn(binary: &Path, conf: &Path) -> Result<Self, DaemonError> {
        let mut command = Command::new(binary);
        command.arg("-c").arg(conf).arg("-s");
        Self::spawn_command(command)
    }

    /// Start an arbitrary command under supervision.
    pub fn spawn_command(mut command: Command) -> Result<Self, DaemonError> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DaemonError::SpawnFailed(e.to_string()))?;

        let pid = child.id();
        info!(pid = ?pid, "Download daemon spawned");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr));
        }

        let (tx, rx) = watch::channel(ProcessState::Starting);
        let tx = Arc::new(tx);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let supervisor_tx = Arc::clone(&tx);
        let supervisor = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let code = status.as_ref().ok().and_then(|s| s.code());
                    let requested = *supervisor_tx.borrow() == ProcessState::Stopping;

                    if requested || code == Some(0) {
                        if !requested {
                            warn!("Download daemon exited on its own with code 0");
                        }
                        transition(&supervisor_tx, ProcessState::Stopped);
                    } else {
                        error!(code = ?code, "Download daemon exited unexpectedly");
                        transition(&supervisor_tx, ProcessState::Crashed { code });
                    }
                }
                // Fires on an explicit stop and when the owner is dropped.
                _ = stop_rx => {
                    transition(&supervisor_tx, ProcessState::Stopping);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill download daemon: {}", e);
                    }
                    transition(&supervisor_tx, ProcessState::Stopped);
                }
            }
        });

        Ok(Self {
            pid,
            tx,
            rx,
            stop_tx: Some(stop_tx),
            supervisor: Some(supervisor),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.rx.borrow()
    }

    /// Handle the controller uses to mark the daemon ready.
    pub fn state_handle(&self) -> ProcessStateHandle {
        ProcessStateHandle {
            tx: Arc::clone(&self.tx),
        }
    }

    /// Resolves only if the daemon crashes; pending otherwise.
    pub async fn crashed(&self) -> DaemonError {
        let mut rx = self.rx.clone();
        loop {
            if let ProcessState::Crashed { code } = *rx.borrow_and_update() {
                return DaemonError::Crashed { code };
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Stop the daemon and wait for it to exit.
    pub async fn stop(mut self) -> Result<(), DaemonError> {
        let current = self.state();
        if current.is_terminal() {
            debug!(state = current.as_str(), "Download daemon already exited");
            return Ok(());
        }

        if !transition(&self.tx, ProcessState::Stopping) {
            return Err(DaemonError::InvalidState(format!(
                "{} -> stopping",
                current.as_str()
            )));
        }

        info!("Stopping download daemon");
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(supervisor) = self.supervisor.take() {
            supervisor
                .await
                .map_err(|e| DaemonError::InvalidState(format!("supervisor failed: {}", e)))?;
        }

        match self.state() {
            ProcessState::Stopped => {
                info!("Download daemon stopped");
                Ok(())
            }
            other => Err(DaemonError::InvalidState(format!(
                "expected stopped, found {}",
                other.as_str()
            ))),
        }
    }
}

/// Forward daemon console output into the log.
async fn forward_output<R: AsyncRead + Unpin>(stream: R) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "nzbget", "{}", line);
    }
}
