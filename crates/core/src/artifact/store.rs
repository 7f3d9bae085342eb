//! Artifact store: packages, publishes and fetches content-addressed bundles.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::{EventHandle, PipelineEvent};
use crate::metrics;

use super::bundle::{self, artifact_from_bytes};
use super::{
    Artifact, ArtifactCoordinates, ArtifactRepository, AssetManifest, BundleError,
    ExportedFile, RepositoryError, StoreError, StoredLocation,
};

/// Fixed part of the repository path; the version label completes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryLayout {
    pub repository: String,
    pub project: String,
    pub artifact_name: String,
}

impl RepositoryLayout {
    pub fn coordinates(&self, version_label: &str) -> ArtifactCoordinates {
        ArtifactCoordinates {
            repository: self.repository.clone(),
            project: self.project.clone(),
            artifact_name: self.artifact_name.clone(),
            version_label: version_label.to_string(),
        }
    }
}

/// Packages exported assets and moves bundles in and out of the repository.
pub struct ArtifactStore {
    repository: Arc<dyn ArtifactRepository>,
    layout: RepositoryLayout,
    events: Option<EventHandle>,
}

impl ArtifactStore {
    pub fn new(repository: Arc<dyn ArtifactRepository>, layout: RepositoryLayout) -> Self {
        Self {
            repository,
            layout,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    pub fn layout(&self) -> &RepositoryLayout {
        &self.layout
    }

    /// Package a manifest and exported files into one immutable artifact.
    pub fn package(
        &self,
        manifest: &AssetManifest,
        files: &[ExportedFile],
    ) -> Result<Artifact, BundleError> {
        let artifact = bundle::package(manifest, files)?;

        info!(
            content_hash = %artifact.content_hash,
            size = artifact.size,
            assets = manifest.assets.len(),
            files = files.len(),
            "Artifact packaged"
        );
        if let Some(events) = &self.events {
            events.try_emit(PipelineEvent::ArtifactPackaged {
                content_hash: artifact.content_hash.clone(),
                size: artifact.size,
                asset_count: manifest.assets.len(),
                file_count: files.len(),
            });
        }

        Ok(artifact)
    }

    /// Publish an artifact under a version label.
    ///
    /// Re-publishing the same content under the same label succeeds without
    /// writing anything. Different content under an existing label is a
    /// `Conflict`.
    pub async fn publish(
        &self,
        artifact: &Artifact,
        version_label: &str,
    ) -> Result<StoredLocation, StoreError> {
        validate_label(version_label)?;
        let coords = self.layout.coordinates(version_label);
        let bundle_file = coords.bundle_file();
        let digest_file = coords.digest_file();

        let result = self
            .publish_inner(artifact, &coords, &bundle_file, &digest_file)
            .await;

        let label = match &result {
            Ok(true) => "reused",
            Ok(false) => "created",
            Err(StoreError::Conflict { .. }) => "conflict",
            Err(_) => "error",
        };
        metrics::ARTIFACT_PUBLISHES.with_label_values(&[label]).inc();

        let reused = result?;
        let location = StoredLocation {
            url: self.repository.url_for(&coords, &bundle_file),
            coordinates: coords,
            content_hash: artifact.content_hash.clone(),
            reused,
        };

        info!(
            version_label,
            content_hash = %location.content_hash,
            url = %location.url,
            reused,
            "Artifact published"
        );
        if let Some(events) = &self.events {
            events
                .emit(PipelineEvent::ArtifactPublished {
                    version_label: version_label.to_string(),
                    content_hash: location.content_hash.clone(),
                    url: location.url.clone(),
                    reused,
                })
                .await;
        }

        Ok(location)
    }

    /// Returns whether the content was already present.
    async fn publish_inner(
        &self,
        artifact: &Artifact,
        coords: &ArtifactCoordinates,
        bundle_file: &str,
        digest_file: &str,
    ) -> Result<bool, StoreError> {
        let conflict = |existing_hash: Option<String>| StoreError::Conflict {
            version_label: coords.version_label.clone(),
            existing_hash,
            attempted_hash: artifact.content_hash.clone(),
        };

        if let Some(existing) = self.read_digest(coords, digest_file).await? {
            if existing == artifact.content_hash {
                debug!(version_label = %coords.version_label, "Identical artifact already published");
                return Ok(true);
            }
            return Err(conflict(Some(existing)));
        }

        // A bundle without digest is left over from an interrupted publish.
        if self.call("exists", self.repository.exists(coords, bundle_file)).await? {
            let existing = self
                .call("get", self.repository.get(coords, bundle_file))
                .await?
                .map(|bytes| bundle::content_hash(&bytes));
            if existing.as_deref() != Some(artifact.content_hash.as_str()) {
                return Err(conflict(existing));
            }
            warn!(version_label = %coords.version_label, "Completing interrupted publish");
            self.write_digest(artifact, coords, digest_file).await?;
            return Ok(true);
        }

        match self
            .call(
                "put",
                self.repository
                    .put(coords, bundle_file, artifact.bytes().to_vec()),
            )
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict { .. }) => return Err(conflict(None)),
            Err(e) => return Err(e),
        }
        self.write_digest(artifact, coords, digest_file).await?;

        Ok(false)
    }

    async fn write_digest(
        &self,
        artifact: &Artifact,
        coords: &ArtifactCoordinates,
        digest_file: &str,
    ) -> Result<(), StoreError> {
        let body = format!("{}\n", artifact.content_hash).into_bytes();
        match self
            .call("put", self.repository.put(coords, digest_file, body))
            .await
        {
            Ok(()) => Ok(()),
            // Someone else completed the same label concurrently.
            Err(StoreError::Conflict { .. }) => {
                match self.read_digest(coords, digest_file).await? {
                    Some(existing) if existing == artifact.content_hash => Ok(()),
                    existing => Err(StoreError::Conflict {
                        version_label: coords.version_label.clone(),
                        existing_hash: existing,
                        attempted_hash: artifact.content_hash.clone(),
                    }),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the artifact stored under a version label and verify its digest.
    pub async fn fetch(&self, version_label: &str) -> Result<Artifact, StoreError> {
        validate_label(version_label)?;
        let coords = self.layout.coordinates(version_label);

        let bytes = self
            .call("get", self.repository.get(&coords, &coords.bundle_file()))
            .await?
            .ok_or_else(|| StoreError::NotFound(version_label.to_string()))?;

        let artifact = artifact_from_bytes(bytes)?.labelled(version_label);

        if let Some(recorded) = self.read_digest(&coords, &coords.digest_file()).await? {
            if recorded != artifact.content_hash {
                return Err(StoreError::Corrupt {
                    version_label: version_label.to_string(),
                    expected: recorded,
                    actual: artifact.content_hash.clone(),
                });
            }
        } else {
            warn!(version_label, "Fetched artifact has no digest sidecar");
        }

        info!(
            version_label,
            content_hash = %artifact.content_hash,
            size = artifact.size,
            "Artifact fetched"
        );
        if let Some(events) = &self.events {
            events
                .emit(PipelineEvent::ArtifactFetched {
                    version_label: version_label.to_string(),
                    content_hash: artifact.content_hash.clone(),
                })
                .await;
        }

        Ok(artifact)
    }

    async fn read_digest(
        &self,
        coords: &ArtifactCoordinates,
        digest_file: &str,
    ) -> Result<Option<String>, StoreError> {
        let raw = self
            .call("get", self.repository.get(coords, digest_file))
            .await?;
        Ok(raw.and_then(|bytes| {
            String::from_utf8_lossy(&bytes)
                .split_whitespace()
                .next()
                .map(|s| s.to_ascii_lowercase())
        }))
    }

    async fn call<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T, RepositoryError>>,
    ) -> Result<T, StoreError> {
        let result = fut.await;
        metrics::record_external_call(self.repository.name(), operation, result.is_ok());
        result.map_err(|e| match e {
            RepositoryError::Unauthorized(msg) => StoreError::Unauthorized(msg),
            RepositoryError::Conflict(msg) => StoreError::Conflict {
                version_label: String::new(),
                existing_hash: None,
                attempted_hash: msg,
            },
            RepositoryError::ConnectionFailed(msg) => StoreError::NetworkError(msg),
            RepositoryError::Timeout => StoreError::NetworkError("request timed out".to_string()),
            RepositoryError::Http { status, body } => {
                StoreError::NetworkError(format!("HTTP {}: {}", status, body))
            }
        })
    }
}

/// Labels become a single path segment.
fn validate_label(label: &str) -> Result<(), StoreError> {
    let valid = !label.is_empty()
        && label != "."
        && label != ".."
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidLabel(label.to_string()))
    }
}
