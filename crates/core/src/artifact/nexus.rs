//! Nexus raw-repository backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::config::RepositoryConfig;

use super::{ArtifactCoordinates, ArtifactRepository, RepositoryError};

/// Stores files in a Nexus raw repository with HTTP basic auth.
pub struct NexusRepository {
    client: Client,
    config: RepositoryConfig,
}

impl NexusRepository {
    /// Create a new Nexus client.
    pub fn new(config: RepositoryConfig) -> Result<Self, RepositoryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RepositoryError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.config.username, Some(self.config.password.expose()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RepositoryError> {
        self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                RepositoryError::Timeout
            } else if e.is_connect() {
                RepositoryError::ConnectionFailed(e.to_string())
            } else {
                RepositoryError::Http {
                    status: 0,
                    body: e.to_string(),
                }
            }
        })
    }

    async fn unexpected(response: Response) -> RepositoryError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(200).collect();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                RepositoryError::Unauthorized(format!("HTTP {}", status.as_u16()))
            }
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT => {
                RepositoryError::Conflict(format!("HTTP {}: {}", status.as_u16(), body))
            }
            _ => RepositoryError::Http {
                status: status.as_u16(),
                body,
            },
        }
    }
}

#[async_trait]
impl ArtifactRepository for NexusRepository {
    fn name(&self) -> &str {
        "nexus"
    }

    fn url_for(&self, coordinates: &ArtifactCoordinates, file: &str) -> String {
        format!(
            "{}/repository/{}/{}",
            self.base_url(),
            coordinates.path(),
            urlencoding::encode(file)
        )
    }

    async fn exists(
        &self,
        coordinates: &ArtifactCoordinates,
        file: &str,
    ) -> Result<bool, RepositoryError> {
        let url = self.url_for(coordinates, file);
        let response = self.send(self.client.head(&url)).await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::unexpected(response).await),
        }
    }

    async fn get(
        &self,
        coordinates: &ArtifactCoordinates,
        file: &str,
    ) -> Result<Option<Vec<u8>>, RepositoryError> {
        let url = self.url_for(coordinates, file);
        debug!(url = %url, "Nexus GET");
        let response = self.send(self.client.get(&url)).await?;

        match response.status() {
            s if s.is_success() => {
                let bytes = response.bytes().await.map_err(|e| {
                    if e.is_timeout() {
                        RepositoryError::Timeout
                    } else {
                        RepositoryError::ConnectionFailed(e.to_string())
                    }
                })?;
                Ok(Some(bytes.to_vec()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::unexpected(response).await),
        }
    }

    async fn put(
        &self,
        coordinates: &ArtifactCoordinates,
        file: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RepositoryError> {
        let url = self.url_for(coordinates, file);
        debug!(url = %url, size = bytes.len(), "Nexus PUT");
        let response = self.send(self.client.put(&url).body(bytes)).await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::unexpected(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Secret;

    fn config() -> RepositoryConfig {
        RepositoryConfig {
            url: "https://nexus.example.com/".to_string(),
            repository: "informatica-artifacts".to_string(),
            project: "sales-etl".to_string(),
            artifact_name: "informatica_assets".to_string(),
            username: "ci".to_string(),
            password: Secret::new("pw"),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_url_layout() {
        let repo = NexusRepository::new(config()).unwrap();
        let coords = ArtifactCoordinates {
            repository: "informatica-artifacts".to_string(),
            project: "sales-etl".to_string(),
            artifact_name: "informatica_assets".to_string(),
            version_label: "a1b2c3d".to_string(),
        };

        assert_eq!(
            repo.url_for(&coords, &coords.bundle_file()),
            "https://nexus.example.com/repository/informatica-artifacts/sales-etl/informatica_assets/a1b2c3d/informatica_assets.bundle"
        );
        assert_eq!(repo.name(), "nexus");
    }
}
