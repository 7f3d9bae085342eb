//! Types for session handling.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// A secret value (password, API token, session token).
///
/// Has no `Display` impl and redacts itself on `Debug`, so it cannot leak into
/// error messages or logs by accident.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Only call this at the wire boundary.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Secret)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret::new(value)
    }
}

/// Username/secret pair supplied from configuration.
///
/// Either half may be absent; `SessionManager` rejects that before any
/// network call is made.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub secret: Option<Secret>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            secret: Some(Secret::new(secret)),
        }
    }

    /// Names of the missing halves, empty when both are present.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.username.as_deref().map_or(true, |u| u.trim().is_empty()) {
            missing.push("username");
        }
        if self.secret.as_ref().map_or(true, Secret::is_empty) {
            missing.push("password");
        }
        missing
    }
}

/// Which platform instance to authenticate against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceIdentity {
    /// Environment name (e.g. "dev", "uat", "prd").
    pub environment: String,
    /// Login endpoint for the environment's region/pod.
    pub login_url: String,
}

/// An authenticated, time-bounded platform session.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    #[serde(skip)]
    pub credential_token: Secret,
    /// Base URL for all subsequent API calls.
    pub api_endpoint: String,
    /// Environment this session belongs to.
    pub environment: String,
    pub issued_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

/// Errors from `SessionManager::authenticate`.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A credential half was not supplied.
    #[error("missing credentials for environment {environment}: {fields}")]
    MissingCredentials { environment: String, fields: String },

    /// The service answered with a non-success authorization response.
    #[error("login rejected: {0}")]
    Rejected(String),

    /// Transport failure talking to the login endpoint.
    #[error("network error during login: {0}")]
    NetworkError(String),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials { .. } => "AuthError::MissingCredentials",
            AuthError::Rejected(_) => "AuthError::Rejected",
            AuthError::NetworkError(_) => "AuthError::NetworkError",
        }
    }
}
