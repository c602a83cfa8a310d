//! Download daemon control.
//!
//! The daemon (NZBGet) runs as a child process and is driven through its
//! JSON-RPC control API:
//!
//! 1. `settings` renders the boot-time config file.
//! 2. `process` spawns and supervises the child.
//! 3. `controller` waits for the API, pushes news server settings, submits
//!    the job and polls it to a terminal status.

mod controller;
mod nzbget;
mod process;
mod settings;
mod types;

pub use controller::{classify_history, CompletedJob, DaemonController, HistoryOutcome, JOB_CATEGORY};
pub use nzbget::NzbgetRpcClient;
pub use process::{DaemonProcess, ProcessState, ProcessStateHandle};
pub use settings::{
    find_unapplied, merge_options, render_daemon_conf, runtime_options, server_options,
    unpack_options, write_daemon_conf,
};
pub use types::*;
