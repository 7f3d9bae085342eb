//! Mock asset platform for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::artifact::{AssetManifest, ExportedFile};
use crate::job::JobKind;
use crate::platform::{AssetPlatform, ImportPackage, LoginGrant, PlatformError, RemoteJobStatus};
use crate::session::{Secret, ServiceIdentity, Session};

/// One scripted answer to a status call.
#[derive(Debug, Clone)]
pub enum StatusStep {
    /// The platform reports this state.
    State(RemoteJobStatus),
    /// The status call fails at the transport level.
    TransportError,
}

impl StatusStep {
    pub fn state(state: &str) -> Self {
        StatusStep::State(RemoteJobStatus::new(state))
    }

    pub fn state_with_message(state: &str, message: &str) -> Self {
        StatusStep::State(RemoteJobStatus::new(state).with_message(message))
    }

    pub fn transport_error() -> Self {
        StatusStep::TransportError
    }
}

/// A recorded job submission.
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    pub job_id: String,
    pub kind: JobKind,
    pub environment: String,
    /// Content hash of the imported package (imports only).
    pub content_hash: Option<String>,
}

/// Mock implementation of the AssetPlatform trait.
///
/// Every job copies the status script of its kind at submission time. Each
/// status call consumes one step; the last step repeats forever. The default
/// script is a single `SUCCESSFUL`.
///
/// ```rust,ignore
/// let platform = MockPlatform::new();
/// platform
///     .set_status_script(JobKind::Export, vec![
///         StatusStep::state("IN_PROGRESS"),
///         StatusStep::state("SUCCESSFUL"),
///     ])
///     .await;
/// ```
#[derive(Debug)]
pub struct MockPlatform {
    /// Environments logged into, in order.
    logins: Arc<RwLock<Vec<String>>>,
    session_validity: Arc<RwLock<Option<Duration>>>,
    /// If set, the next login fails with this error.
    login_error: Arc<RwLock<Option<PlatformError>>>,
    /// If set, the next submission fails with this error.
    submit_error: Arc<RwLock<Option<PlatformError>>>,
    /// If set, the next download fails with this error.
    download_error: Arc<RwLock<Option<PlatformError>>>,
    submissions: Arc<RwLock<Vec<RecordedSubmission>>>,
    scripts: Arc<RwLock<HashMap<JobKind, Vec<StatusStep>>>>,
    job_scripts: Arc<RwLock<HashMap<String, VecDeque<StatusStep>>>>,
    status_calls: Arc<RwLock<Vec<String>>>,
    downloads: Arc<RwLock<u32>>,
    export_files: Arc<RwLock<Vec<ExportedFile>>>,
    /// Every trait method invoked, in order.
    call_log: Arc<RwLock<Vec<String>>>,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub const API_ENDPOINT: &'static str = "https://mock.platform/saas";

    pub fn new() -> Self {
        Self {
            logins: Arc::new(RwLock::new(Vec::new())),
            session_validity: Arc::new(RwLock::new(None)),
            login_error: Arc::new(RwLock::new(None)),
            submit_error: Arc::new(RwLock::new(None)),
            download_error: Arc::new(RwLock::new(None)),
            submissions: Arc::new(RwLock::new(Vec::new())),
            scripts: Arc::new(RwLock::new(HashMap::new())),
            job_scripts: Arc::new(RwLock::new(HashMap::new())),
            status_calls: Arc::new(RwLock::new(Vec::new())),
            downloads: Arc::new(RwLock::new(0)),
            export_files: Arc::new(RwLock::new(vec![ExportedFile::new(
                "export_package.zip",
                b"PK\x03\x04mock-export".to_vec(),
            )])),
            call_log: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Validity window reported by login (`None` = not stated).
    pub async fn set_session_validity(&self, validity: Option<Duration>) {
        *self.session_validity.write().await = validity;
    }

    pub async fn set_login_error(&self, error: PlatformError) {
        *self.login_error.write().await = Some(error);
    }

    pub async fn set_submit_error(&self, error: PlatformError) {
        *self.submit_error.write().await = Some(error);
    }

    pub async fn set_download_error(&self, error: PlatformError) {
        *self.download_error.write().await = Some(error);
    }

    /// Status script for jobs of `kind` submitted from now on.
    pub async fn set_status_script(&self, kind: JobKind, steps: Vec<StatusStep>) {
        self.scripts.write().await.insert(kind, steps);
    }

    /// Files returned by `download_export`.
    pub async fn set_export_files(&self, files: Vec<ExportedFile>) {
        *self.export_files.write().await = files;
    }

    pub async fn login_count(&self) -> usize {
        self.logins.read().await.len()
    }

    pub async fn logins(&self) -> Vec<String> {
        self.logins.read().await.clone()
    }

    pub async fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.read().await.clone()
    }

    pub async fn submit_count(&self, kind: JobKind) -> usize {
        self.submissions
            .read()
            .await
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }

    pub async fn status_call_count(&self) -> usize {
        self.status_calls.read().await.len()
    }

    /// Status calls made for one job.
    pub async fn status_calls_for(&self, job_id: &str) -> usize {
        self.status_calls
            .read()
            .await
            .iter()
            .filter(|id| *id == job_id)
            .count()
    }

    pub async fn download_count(&self) -> u32 {
        *self.downloads.read().await
    }

    pub async fn call_log(&self) -> Vec<String> {
        self.call_log.read().await.clone()
    }

    async fn record(&self, call: &str) {
        self.call_log.write().await.push(call.to_string());
    }

    async fn register_job(&self, kind: JobKind, environment: &str, content_hash: Option<String>) -> String {
        let mut submissions = self.submissions.write().await;
        let job_id = format!("{}-job-{}", kind.as_str(), submissions.len() + 1);

        let script = self
            .scripts
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| vec![StatusStep::state("SUCCESSFUL")]);
        self.job_scripts
            .write()
            .await
            .insert(job_id.clone(), script.into());

        submissions.push(RecordedSubmission {
            job_id: job_id.clone(),
            kind,
            environment: environment.to_string(),
            content_hash,
        });
        job_id
    }
}

#[async_trait]
impl AssetPlatform for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    async fn login(
        &self,
        identity: &ServiceIdentity,
        _username: &str,
        _secret: &Secret,
    ) -> Result<LoginGrant, PlatformError> {
        self.record("login").await;
        if let Some(error) = self.login_error.write().await.take() {
            return Err(error);
        }

        self.logins.write().await.push(identity.environment.clone());
        Ok(LoginGrant {
            session_token: Secret::new(format!("mock-token-{}", identity.environment)),
            api_endpoint: Self::API_ENDPOINT.to_string(),
            valid_for: *self.session_validity.read().await,
        })
    }

    async fn submit_export(
        &self,
        session: &Session,
        _manifest: &AssetManifest,
    ) -> Result<String, PlatformError> {
        self.record("submit_export").await;
        if let Some(error) = self.submit_error.write().await.take() {
            return Err(error);
        }
        Ok(self
            .register_job(JobKind::Export, &session.environment, None)
            .await)
    }

    async fn submit_import(
        &self,
        session: &Session,
        package: &ImportPackage,
    ) -> Result<String, PlatformError> {
        self.record("submit_import").await;
        if let Some(error) = self.submit_error.write().await.take() {
            return Err(error);
        }
        Ok(self
            .register_job(
                JobKind::Import,
                &session.environment,
                Some(package.content_hash.clone()),
            )
            .await)
    }

    async fn job_status(
        &self,
        _session: &Session,
        _kind: JobKind,
        job_id: &str,
    ) -> Result<RemoteJobStatus, PlatformError> {
        self.record("job_status").await;
        self.status_calls.write().await.push(job_id.to_string());

        let mut scripts = self.job_scripts.write().await;
        let script = scripts
            .get_mut(job_id)
            .ok_or_else(|| PlatformError::InvalidRequest(format!("unknown job {}", job_id)))?;

        let step = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };

        match step {
            Some(StatusStep::State(status)) => Ok(status),
            Some(StatusStep::TransportError) => Err(PlatformError::ConnectionFailed(
                "mock transport error".to_string(),
            )),
            None => Ok(RemoteJobStatus::new("IN_PROGRESS")),
        }
    }

    async fn download_export(
        &self,
        _session: &Session,
        _job_id: &str,
    ) -> Result<Vec<ExportedFile>, PlatformError> {
        self.record("download_export").await;
        *self.downloads.write().await += 1;
        if let Some(error) = self.download_error.write().await.take() {
            return Err(error);
        }
        Ok(self.export_files.read().await.clone())
    }
}
