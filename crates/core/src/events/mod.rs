//! Structured pipeline events.
//!
//! Components emit through a cloneable `EventHandle`; an `EventWriter`
//! background task drains the channel into a `LedgerStore`.

mod event;
mod handle;
mod writer;

pub use event::*;
pub use handle::*;
pub use writer::*;
