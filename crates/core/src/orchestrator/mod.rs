//! Acquisition orchestrator.
//!
//! Ties the pieces together for the single job a worker runs:
//! source fetch, daemon control, artifact lookup, upload and notifications.

mod runner;
mod types;

pub use runner::{run_job, Orchestrator};
pub use types::{AcquisitionOutcome, OrchestratorError};
