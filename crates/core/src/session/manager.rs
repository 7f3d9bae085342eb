//! Session manager: exchanges environment credentials for a platform session.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::events::{EventHandle, PipelineEvent};
use crate::metrics;
use crate::platform::{AssetPlatform, PlatformError};

use super::{AuthError, Credentials, ServiceIdentity, Session};

/// Authenticates against the asset platform and produces time-bounded sessions.
pub struct SessionManager {
    platform: Arc<dyn AssetPlatform>,
    /// Lease applied when the service does not state a validity window.
    default_lease: Duration,
    events: Option<EventHandle>,
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new(platform: Arc<dyn AssetPlatform>, default_lease: Duration) -> Self {
        Self {
            platform,
            default_lease,
            events: None,
        }
    }

    /// Emit `session_opened` events through the given handle.
    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    /// Authenticate with the given credentials.
    ///
    /// Missing credentials are reported before any network call is attempted.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        identity: &ServiceIdentity,
    ) -> Result<Session, AuthError> {
        let (username, secret) = match (&credentials.username, &credentials.secret) {
            (Some(username), Some(secret)) if credentials.missing_fields().is_empty() => {
                (username, secret)
            }
            _ => {
                let missing = credentials.missing_fields();
                warn!(
                    environment = %identity.environment,
                    missing = ?missing,
                    "Refusing to log in with incomplete credentials"
                );
                return Err(AuthError::MissingCredentials {
                    environment: identity.environment.clone(),
                    fields: missing.join(", "),
                });
            }
        };

        debug!(
            environment = %identity.environment,
            backend = self.platform.name(),
            "Logging in to asset platform"
        );

        let grant = self
            .platform
            .login(identity, username, secret)
            .await
            .map_err(|e| {
                metrics::record_external_call(self.platform.name(), "login", false);
                match e {
                    PlatformError::ConnectionFailed(msg) => AuthError::NetworkError(msg),
                    PlatformError::Timeout => {
                        AuthError::NetworkError("login request timed out".to_string())
                    }
                    PlatformError::Rejected(msg)
                    | PlatformError::Unavailable(msg)
                    | PlatformError::InvalidRequest(msg)
                    | PlatformError::InvalidResponse(msg) => AuthError::Rejected(msg),
                }
            })?;
        metrics::record_external_call(self.platform.name(), "login", true);

        let lease = grant.valid_for.unwrap_or(self.default_lease);
        let issued_at = Utc::now();
        let expiry = issued_at
            + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::minutes(30));

        let session = Session {
            credential_token: grant.session_token,
            api_endpoint: grant.api_endpoint,
            environment: identity.environment.clone(),
            issued_at,
            expiry,
        };

        info!(
            environment = %session.environment,
            api_endpoint = %session.api_endpoint,
            expires_at = %session.expiry,
            "Platform session opened"
        );

        if let Some(events) = &self.events {
            events
                .emit(PipelineEvent::SessionOpened {
                    environment: session.environment.clone(),
                    api_endpoint: session.api_endpoint.clone(),
                    expires_at: session.expiry,
                })
                .await;
        }

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPlatform;

    fn identity() -> ServiceIdentity {
        ServiceIdentity {
            environment: "dev".to_string(),
            login_url: "https://login.example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_authenticate_success_uses_default_lease() {
        let platform = Arc::new(MockPlatform::new());
        let manager = SessionManager::new(platform.clone(), Duration::from_secs(600));

        let session = manager
            .authenticate(&Credentials::new("user", "pass"), &identity())
            .await
            .unwrap();

        assert_eq!(session.environment, "dev");
        assert_eq!(session.api_endpoint, "https://mock.platform/saas");
        let lease = session.expiry - session.issued_at;
        assert_eq!(lease.num_seconds(), 600);
        assert_eq!(platform.login_count().await, 1);
    }

    #[tokio::test]
    async fn test_authenticate_honours_stated_validity() {
        let platform = Arc::new(MockPlatform::new());
        platform.set_session_validity(Some(Duration::from_secs(120))).await;
        let manager = SessionManager::new(platform, Duration::from_secs(600));

        let session = manager
            .authenticate(&Credentials::new("user", "pass"), &identity())
            .await
            .unwrap();
        assert_eq!((session.expiry - session.issued_at).num_seconds(), 120);
    }

    #[tokio::test]
    async fn test_missing_credentials_skip_network() {
        let platform = Arc::new(MockPlatform::new());
        let manager = SessionManager::new(platform.clone(), Duration::from_secs(600));

        let creds = Credentials {
            username: Some("user".to_string()),
            secret: None,
        };
        let err = manager.authenticate(&creds, &identity()).await.unwrap_err();

        assert!(matches!(err, AuthError::MissingCredentials { .. }));
        assert_eq!(platform.login_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let platform = Arc::new(MockPlatform::new());
        platform
            .set_login_error(PlatformError::Rejected("HTTP 401".to_string()))
            .await;
        let manager = SessionManager::new(platform, Duration::from_secs(600));

        let err = manager
            .authenticate(&Credentials::new("user", "wrong"), &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_network_error_on_login() {
        let platform = Arc::new(MockPlatform::new());
        platform.set_login_error(PlatformError::Timeout).await;
        let manager = SessionManager::new(platform, Duration::from_secs(600));

        let err = manager
            .authenticate(&Credentials::new("user", "pass"), &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_unavailable_login_is_rejected() {
        let platform = Arc::new(MockPlatform::new());
        platform
            .set_login_error(PlatformError::Unavailable("HTTP 503".to_string()))
            .await;
        let manager = SessionManager::new(platform, Duration::from_secs(600));

        let err = manager
            .authenticate(&Credentials::new("user", "pass"), &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Rejected(ref msg) if msg == "HTTP 503"));
    }
}
