//! Lifecycle notifications to the callback webhook.
//!
//! `ready` and `error` get a small retry budget; progress updates are sent
//! once. Nothing here ever fails the caller.

mod retry;
mod types;
mod webhook;

pub use retry::RetryPolicy;
pub use types::{JobStatus, NotificationEvent, ReadyDetails, StatusSink};
pub use webhook::{DeliveryOutcome, WebhookNotifier};
