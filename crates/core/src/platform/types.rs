//! Types for asset platform operations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{AssetManifest, ExportedFile};
use crate::job::JobKind;
use crate::session::{Secret, ServiceIdentity, Session};

/// Errors that can occur talking to the asset platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    /// 401/403 or an explicit login failure.
    #[error("rejected: {0}")]
    Rejected(String),

    /// 400/404/422: the request itself is wrong.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// 429/5xx.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub session_token: Secret,
    /// Base URL for subsequent API calls.
    pub api_endpoint: String,
    /// Validity window stated by the service, if any.
    pub valid_for: Option<Duration>,
}

/// Status of a remote job as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJobStatus {
    /// Raw remote state string (e.g. "IN_PROGRESS", "SUCCESSFUL").
    pub state: String,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RemoteJobStatus {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Bundle contents handed to an import job.
#[derive(Debug, Clone)]
pub struct ImportPackage {
    /// Content hash of the artifact being imported.
    pub content_hash: String,
    /// Version label the artifact was fetched under.
    pub version_label: String,
    /// Files carried by the artifact.
    pub files: Vec<ExportedFile>,
}

impl ImportPackage {
    /// The single platform package file inside the bundle.
    ///
    /// Prefers a `.zip` entry; falls back to the only file if there is exactly one.
    pub fn package_file(&self) -> Option<&ExportedFile> {
        let zips: Vec<&ExportedFile> = self
            .files
            .iter()
            .filter(|f| f.path.to_ascii_lowercase().ends_with(".zip"))
            .collect();
        match (zips.as_slice(), self.files.as_slice()) {
            ([only], _) => Some(*only),
            ([], [only]) => Some(only),
            _ => None,
        }
    }
}

/// Trait for asset platform backends.
#[async_trait]
pub trait AssetPlatform: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Exchange credentials for a session token.
    async fn login(
        &self,
        identity: &ServiceIdentity,
        username: &str,
        secret: &Secret,
    ) -> Result<LoginGrant, PlatformError>;

    /// Start an export job for the assets in the manifest. Returns the job id.
    async fn submit_export(
        &self,
        session: &Session,
        manifest: &AssetManifest,
    ) -> Result<String, PlatformError>;

    /// Upload a package and start an import job. Returns the job id.
    async fn submit_import(
        &self,
        session: &Session,
        package: &ImportPackage,
    ) -> Result<String, PlatformError>;

    /// Current status of a job.
    async fn job_status(
        &self,
        session: &Session,
        kind: JobKind,
        job_id: &str,
    ) -> Result<RemoteJobStatus, PlatformError>;

    /// Download the package produced by a finished export job.
    async fn download_export(
        &self,
        session: &Session,
        job_id: &str,
    ) -> Result<Vec<ExportedFile>, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> ExportedFile {
        ExportedFile::new(path, b"data".to_vec())
    }

    fn package(files: Vec<ExportedFile>) -> ImportPackage {
        ImportPackage {
            content_hash: "abc".to_string(),
            version_label: "v1".to_string(),
            files,
        }
    }

    #[test]
    fn test_package_file_prefers_zip() {
        let pkg = package(vec![file("export_assets.json"), file("export_package.zip")]);
        assert_eq!(pkg.package_file().unwrap().path, "export_package.zip");
    }

    #[test]
    fn test_package_file_single_non_zip() {
        let pkg = package(vec![file("bundle.bin")]);
        assert_eq!(pkg.package_file().unwrap().path, "bundle.bin");
    }

    #[test]
    fn test_package_file_ambiguous() {
        let pkg = package(vec![file("a.zip"), file("b.zip")]);
        assert!(pkg.package_file().is_none());

        let pkg = package(vec![file("a.json"), file("b.json")]);
        assert!(pkg.package_file().is_none());

        let pkg = package(vec![]);
        assert!(pkg.package_file().is_none());
    }

    #[test]
    fn test_remote_status_serialization() {
        let status = RemoteJobStatus::new("IN_PROGRESS");
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"state":"IN_PROGRESS"}"#);
    }
}
