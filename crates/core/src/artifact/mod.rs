//! Content-addressed artifacts.
//!
//! Exported assets are packaged into one immutable bundle whose SHA-256 digest
//! is its identity. `ArtifactStore` publishes bundles to an `ArtifactRepository`
//! under a version label and fetches them back for import.

mod bundle;
mod nexus;
mod store;
mod types;

pub use bundle::{content_hash, decode_bundle, package};
pub use nexus::NexusRepository;
pub use store::{ArtifactStore, RepositoryLayout};
pub use types::*;
