//! Informatica Intelligent Cloud Services (IICS) client.
//!
//! Login goes through the v2 user API; export, import and job status use the
//! v3 public core API on the pod returned by login.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::{AssetManifest, ExportedFile};
use crate::config::PlatformConfig;
use crate::job::JobKind;
use crate::session::{Secret, ServiceIdentity, Session};

use super::{AssetPlatform, ImportPackage, LoginGrant, PlatformError, RemoteJobStatus};

const SESSION_HEADER: &str = "INFA-SESSION-ID";
const EXPORT_PACKAGE_FILE: &str = "export_package.zip";

/// IICS REST client.
pub struct IicsClient {
    client: Client,
}

impl IicsClient {
    /// Create a new IICS client.
    pub fn new(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PlatformError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client })
    }

    fn api_url(session: &Session, path: &str) -> String {
        format!(
            "{}/public/core/v3/{}",
            session.api_endpoint.trim_end_matches('/'),
            path
        )
    }

    fn with_session(request: RequestBuilder, session: &Session) -> RequestBuilder {
        request
            .header(SESSION_HEADER, session.credential_token.expose())
            .header("Accept", "application/json")
    }

    async fn send(request: RequestBuilder) -> Result<Response, PlatformError> {
        let response = request.send().await.map_err(map_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body))
    }

    async fn json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, PlatformError> {
        let response = Self::send(request).await?;
        let body = response.text().await.map_err(map_transport)?;
        serde_json::from_str(&body).map_err(|e| {
            PlatformError::InvalidResponse(format!(
                "{}: {}",
                e,
                body.chars().take(100).collect::<String>()
            ))
        })
    }
}

fn map_transport(e: reqwest::Error) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Timeout
    } else {
        PlatformError::ConnectionFailed(e.to_string())
    }
}

/// Classify a non-success HTTP answer.
fn map_status(status: StatusCode, body: &str) -> PlatformError {
    let detail = format!(
        "HTTP {}: {}",
        status.as_u16(),
        body.chars().take(200).collect::<String>()
    );
    match status.as_u16() {
        401 | 403 => PlatformError::Rejected(format!("HTTP {}", status.as_u16())),
        400 | 404 | 422 => PlatformError::InvalidRequest(detail),
        429 | 500..=599 => PlatformError::Unavailable(detail),
        _ => PlatformError::InvalidResponse(detail),
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "@type")]
    kind: &'static str,
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(alias = "sessionId")]
    ic_session_id: String,
    server_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportObject<'a> {
    id: &'a str,
    include_dependencies: bool,
}

#[derive(Serialize)]
struct ExportRequest<'a> {
    name: &'a str,
    objects: Vec<ExportObject<'a>>,
}

#[derive(Deserialize)]
struct JobCreated {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageUploaded {
    job_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportRequest {
    name: String,
    import_specification: ImportSpecification,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportSpecification {
    default_conflict_resolution: &'static str,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    status: JobStatusBody,
}

#[derive(Deserialize)]
struct JobStatusBody {
    state: String,
    #[serde(default)]
    message: Option<String>,
}

impl From<JobStatusResponse> for RemoteJobStatus {
    fn from(response: JobStatusResponse) -> Self {
        RemoteJobStatus {
            state: response.status.state,
            message: response.status.message.filter(|m| !m.is_empty()),
        }
    }
}

#[async_trait]
impl AssetPlatform for IicsClient {
    fn name(&self) -> &str {
        "iics"
    }

    async fn login(
        &self,
        identity: &ServiceIdentity,
        username: &str,
        secret: &Secret,
    ) -> Result<LoginGrant, PlatformError> {
        let body = LoginRequest {
            kind: "login",
            username,
            password: secret.expose(),
        };
        let request = self
            .client
            .post(&identity.login_url)
            .header("Accept", "application/json")
            .json(&body);

        let response: LoginResponse = Self::json(request).await?;
        if response.ic_session_id.is_empty() || response.server_url.is_empty() {
            return Err(PlatformError::InvalidResponse(
                "login response missing session or server url".to_string(),
            ));
        }

        debug!(environment = %identity.environment, server_url = %response.server_url, "IICS login successful");
        Ok(LoginGrant {
            session_token: Secret::new(response.ic_session_id),
            api_endpoint: response.server_url,
            valid_for: None,
        })
    }

    async fn submit_export(
        &self,
        session: &Session,
        manifest: &AssetManifest,
    ) -> Result<String, PlatformError> {
        let body = ExportRequest {
            name: &manifest.name,
            objects: manifest
                .assets
                .iter()
                .map(|asset| ExportObject {
                    id: &asset.id,
                    include_dependencies: asset.include_dependencies,
                })
                .collect(),
        };
        let request = self
            .client
            .post(Self::api_url(session, "export"))
            .json(&body);

        let created: JobCreated = Self::json(Self::with_session(request, session)).await?;
        Ok(created.id)
    }

    async fn submit_import(
        &self,
        session: &Session,
        package: &ImportPackage,
    ) -> Result<String, PlatformError> {
        let file = package.package_file().ok_or_else(|| {
            PlatformError::InvalidRequest("artifact carries no single package file".to_string())
        })?;

        let part = multipart::Part::bytes(file.contents.clone())
            .file_name(file.path.clone())
            .mime_str("application/zip")
            .map_err(|e| PlatformError::InvalidRequest(e.to_string()))?;
        let form = multipart::Form::new().part("package", part);

        let upload = self
            .client
            .post(Self::api_url(session, "import/package"))
            .multipart(form);
        let uploaded: PackageUploaded = Self::json(Self::with_session(upload, session)).await?;

        let start = self
            .client
            .post(Self::api_url(session, &format!("import/{}", uploaded.job_id)))
            .json(&ImportRequest {
                name: format!("import-{}", package.version_label),
                import_specification: ImportSpecification {
                    default_conflict_resolution: "OVERWRITE",
                },
            });
        let started: JobCreated = Self::json(Self::with_session(start, session)).await?;
        Ok(started.id)
    }

    async fn job_status(
        &self,
        session: &Session,
        kind: JobKind,
        job_id: &str,
    ) -> Result<RemoteJobStatus, PlatformError> {
        let path = format!("{}/{}", kind.as_str(), urlencoding::encode(job_id));
        let request = self.client.get(Self::api_url(session, &path));

        let status: JobStatusResponse = Self::json(Self::with_session(request, session)).await?;
        Ok(status.into())
    }

    async fn download_export(
        &self,
        session: &Session,
        job_id: &str,
    ) -> Result<Vec<ExportedFile>, PlatformError> {
        let path = format!("export/{}/package", urlencoding::encode(job_id));
        let request = self.client.get(Self::api_url(session, &path));

        let response = Self::send(Self::with_session(request, session)).await?;
        let bytes = response.bytes().await.map_err(map_transport)?;
        if bytes.is_empty() {
            return Err(PlatformError::InvalidResponse(
                "export package is empty".to_string(),
            ));
        }

        Ok(vec![ExportedFile::new(EXPORT_PACKAGE_FILE, bytes.to_vec())])
    }
}
