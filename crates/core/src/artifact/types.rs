//! Types for artifact packaging and storage.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One asset selected for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Platform object id.
    pub id: String,
    /// Project/folder path, for traceability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Asset type (e.g. "DTEMPLATE", "MTT", "Project").
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    #[serde(default = "default_include_dependencies")]
    pub include_dependencies: bool,
}

fn default_include_dependencies() -> bool {
    true
}

impl AssetRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: None,
            asset_type: None,
            include_dependencies: true,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_type(mut self, asset_type: impl Into<String>) -> Self {
        self.asset_type = Some(asset_type.into());
        self
    }
}

/// The list of assets to export, as read from the asset list file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    #[serde(default = "default_manifest_name")]
    pub name: String,
    pub assets: Vec<AssetRef>,
}

fn default_manifest_name() -> String {
    "asset-export".to_string()
}

/// Accepted shapes of the asset list file.
#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Manifest(AssetManifest),
    Bare(Vec<AssetRef>),
}

impl AssetManifest {
    pub fn new(name: impl Into<String>, assets: Vec<AssetRef>) -> Self {
        Self {
            name: name.into(),
            assets,
        }
    }

    /// Parse an asset list: either `{"name": .., "assets": [..]}` or a bare array.
    pub fn from_json(json: &str) -> Result<Self, BundleError> {
        let parsed: ManifestFile = serde_json::from_str(json)
            .map_err(|e| BundleError::InvalidManifest(e.to_string()))?;
        Ok(match parsed {
            ManifestFile::Manifest(manifest) => manifest,
            ManifestFile::Bare(assets) => Self {
                name: default_manifest_name(),
                assets,
            },
        })
    }
}

/// A file produced by an export job.
#[derive(Clone, PartialEq, Eq)]
pub struct ExportedFile {
    /// Relative path inside the bundle.
    pub path: String,
    pub contents: Vec<u8>,
}

impl ExportedFile {
    pub fn new(path: impl Into<String>, contents: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            contents,
        }
    }
}

impl fmt::Debug for ExportedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedFile")
            .field("path", &self.path)
            .field("size", &self.contents.len())
            .finish()
    }
}

/// An immutable, content-addressed bundle.
///
/// Only produced by `package` or by decoding fetched bytes, so `content_hash`
/// always matches the bytes it describes.
#[derive(Clone, Serialize)]
pub struct Artifact {
    /// Lowercase hex SHA-256 of the bundle bytes.
    pub content_hash: String,
    /// Label the artifact was published or fetched under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_label: Option<String>,
    /// Bundle size in bytes.
    pub size: u64,
    pub source_asset_manifest: AssetManifest,
    #[serde(skip)]
    files: Vec<ExportedFile>,
    #[serde(skip)]
    bytes: Vec<u8>,
}

impl Artifact {
    pub(crate) fn from_parts(
        content_hash: String,
        manifest: AssetManifest,
        files: Vec<ExportedFile>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            content_hash,
            version_label: None,
            size: bytes.len() as u64,
            source_asset_manifest: manifest,
            files,
            bytes,
        }
    }

    /// Serialized bundle bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Files carried by the bundle, sorted by path.
    pub fn files(&self) -> &[ExportedFile] {
        &self.files
    }

    /// A copy of this artifact carrying a version label.
    pub fn labelled(&self, version_label: impl Into<String>) -> Self {
        Self {
            version_label: Some(version_label.into()),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("content_hash", &self.content_hash)
            .field("version_label", &self.version_label)
            .field("size", &self.size)
            .field("assets", &self.source_asset_manifest.assets.len())
            .field("files", &self.files.len())
            .finish()
    }
}

/// Address of a version in the artifact repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCoordinates {
    pub repository: String,
    pub project: String,
    pub artifact_name: String,
    pub version_label: String,
}

impl ArtifactCoordinates {
    /// `{repository}/{project}/{artifact_name}/{version_label}`
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.repository, self.project, self.artifact_name, self.version_label
        )
    }

    /// File name of the bundle itself.
    pub fn bundle_file(&self) -> String {
        format!("{}.bundle", self.artifact_name)
    }

    /// File name of the digest sidecar.
    pub fn digest_file(&self) -> String {
        format!("{}.bundle.sha256", self.artifact_name)
    }
}

/// Where a published artifact lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLocation {
    pub url: String,
    pub coordinates: ArtifactCoordinates,
    pub content_hash: String,
    /// True when the same content was already present under this label.
    pub reused: bool,
}

/// Errors encoding or decoding a bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("not an artifact bundle (bad magic)")]
    BadMagic,

    #[error("bundle truncated while reading {0}")]
    Truncated(&'static str),

    #[error("unexpected trailing bytes after last file")]
    TrailingBytes,

    #[error("duplicate file path in bundle: {0}")]
    DuplicatePath(String),

    #[error("invalid file path in bundle: {0:?}")]
    InvalidPath(String),

    #[error("invalid asset manifest: {0}")]
    InvalidManifest(String),

    #[error("bundle entry too large: {0}")]
    TooLarge(String),
}

/// Errors from an artifact repository backend.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

/// Errors from `ArtifactStore` operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The label already holds different content.
    #[error("version {version_label} already holds different content (existing {}, attempted {attempted_hash})", .existing_hash.as_deref().unwrap_or("unknown"))]
    Conflict {
        version_label: String,
        existing_hash: Option<String>,
        attempted_hash: String,
    },

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("artifact version not found: {0}")]
    NotFound(String),

    /// Fetched bytes do not match the recorded digest.
    #[error("artifact {version_label} is corrupt: expected {expected}, got {actual}")]
    Corrupt {
        version_label: String,
        expected: String,
        actual: String,
    },

    #[error("invalid version label: {0:?}")]
    InvalidLabel(String),

    #[error("invalid bundle: {0}")]
    InvalidBundle(#[from] BundleError),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unauthorized(_) => "StoreError::Unauthorized",
            StoreError::Conflict { .. } => "StoreError::Conflict",
            StoreError::NetworkError(_) => "StoreError::NetworkError",
            StoreError::NotFound(_) => "StoreError::NotFound",
            StoreError::Corrupt { .. } => "StoreError::Corrupt",
            StoreError::InvalidLabel(_) => "StoreError::InvalidLabel",
            StoreError::InvalidBundle(_) => "StoreError::InvalidBundle",
        }
    }
}

/// Trait for artifact repository backends (raw file storage by coordinates).
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Public URL of a file at the given coordinates.
    fn url_for(&self, coordinates: &ArtifactCoordinates, file: &str) -> String;

    /// Whether a file exists.
    async fn exists(
        &self,
        coordinates: &ArtifactCoordinates,
        file: &str,
    ) -> Result<bool, RepositoryError>;

    /// Read a file; `None` when absent.
    async fn get(
        &self,
        coordinates: &ArtifactCoordinates,
        file: &str,
    ) -> Result<Option<Vec<u8>>, RepositoryError>;

    /// Write a file.
    async fn put(
        &self,
        coordinates: &ArtifactCoordinates,
        file: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_from_object() {
        let json = r#"{
            "name": "release-42",
            "assets": [
                {"id": "abc", "path": "Default/Sales", "type": "MTT"},
                {"id": "def", "include_dependencies": false}
            ]
        }"#;
        let manifest = AssetManifest::from_json(json).unwrap();
        assert_eq!(manifest.name, "release-42");
        assert_eq!(manifest.assets.len(), 2);
        assert_eq!(manifest.assets[0].asset_type.as_deref(), Some("MTT"));
        assert!(manifest.assets[0].include_dependencies);
        assert!(!manifest.assets[1].include_dependencies);
    }

    #[test]
    fn test_manifest_from_bare_array() {
        let manifest = AssetManifest::from_json(r#"[{"id": "abc"}]"#).unwrap();
        assert_eq!(manifest.name, "asset-export");
        assert_eq!(manifest.assets, vec![AssetRef::new("abc")]);
    }

    #[test]
    fn test_manifest_invalid() {
        let err = AssetManifest::from_json(r#"{"assets": "nope"}"#).unwrap_err();
        assert!(matches!(err, BundleError::InvalidManifest(_)));
    }

    #[test]
    fn test_coordinates_layout() {
        let coords = ArtifactCoordinates {
            repository: "informatica-artifacts".to_string(),
            project: "sales-etl".to_string(),
            artifact_name: "informatica_assets".to_string(),
            version_label: "a1b2c3d4".to_string(),
        };
        assert_eq!(
            coords.path(),
            "informatica-artifacts/sales-etl/informatica_assets/a1b2c3d4"
        );
        assert_eq!(coords.bundle_file(), "informatica_assets.bundle");
        assert_eq!(coords.digest_file(), "informatica_assets.bundle.sha256");
    }

    #[test]
    fn test_exported_file_debug_hides_contents() {
        let file = ExportedFile::new("pkg.zip", vec![1, 2, 3]);
        assert_eq!(
            format!("{:?}", file),
            "ExportedFile { path: \"pkg.zip\", size: 3 }"
        );
    }

    #[test]
    fn test_conflict_display() {
        let err = StoreError::Conflict {
            version_label: "v1".to_string(),
            existing_hash: None,
            attempted_hash: "abc".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "version v1 already holds different content (existing unknown, attempted abc)"
        );
        assert_eq!(err.kind(), "StoreError::Conflict");
    }
}
