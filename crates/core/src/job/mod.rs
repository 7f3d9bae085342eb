//! Asynchronous platform jobs.
//!
//! `JobPoller` owns the job state machine used by both export and import:
//! - **submit**: exactly one remote submission per `JobHandle`
//! - **poll**: one status check, a no-op once the handle is terminal
//! - **wait**: cancellable poll loop bounded by `max_attempts`

mod cancel;
mod config;
mod poller;
mod types;

pub use cancel::CancelToken;
pub use config::{PollerConfig, RemoteState, StatusMapping};
pub use poller::JobPoller;
pub use types::*;
