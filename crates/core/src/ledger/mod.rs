//! Run ledger: durable record of promotion runs and their pipeline events.

mod sqlite;
mod store;

pub use sqlite::*;
pub use store::*;
