//! Asset-management platform abstraction.
//!
//! This module provides an `AssetPlatform` trait covering login, export/import
//! job submission, job status and export package download, plus the IICS REST
//! implementation.

mod iics;
mod types;

pub use iics::IicsClient;
pub use types::*;
