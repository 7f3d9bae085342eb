//! Platform sessions.
//!
//! A `Session` is a time-bounded credential handle obtained from the asset
//! platform. It lives only for the duration of one promotion run and is never
//! persisted: its token is skipped on serialization and redacted on debug.

mod manager;
mod types;

pub use manager::SessionManager;
pub use types::*;
