//! Types for the approval gate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What triggered the pipeline; the source of the change ticket reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_request_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Operator-supplied ticket, consulted last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explicit_ticket: Option<String>,
}

impl TriggerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commit_message(mut self, message: impl Into<String>) -> Self {
        self.commit_message = Some(message.into());
        self
    }

    pub fn with_merge_request_title(mut self, title: impl Into<String>) -> Self {
        self.merge_request_title = Some(title.into());
        self
    }

    pub fn with_commit_sha(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_explicit_ticket(mut self, ticket: impl Into<String>) -> Self {
        self.explicit_ticket = Some(ticket.into());
        self
    }

    /// First ticket reference found: commit message, then merge request
    /// title, then the explicit ticket.
    pub fn extract_ticket(&self, pattern: &Regex) -> Option<String> {
        [
            self.commit_message.as_deref(),
            self.merge_request_title.as_deref(),
            self.explicit_ticket.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find_map(|text| pattern.find(text).map(|m| m.as_str().to_string()))
    }

    /// Version label used when none is supplied: the commit SHA, else `local-dev`.
    pub fn default_version_label(&self) -> String {
        self.commit_sha
            .as_deref()
            .map(str::trim)
            .filter(|sha| !sha.is_empty())
            .unwrap_or("local-dev")
            .to_string()
    }
}

/// A ticket's approval as observed at check time. Never cached across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketApproval {
    pub ticket_id: String,
    pub status: String,
    pub checked_at: DateTime<Utc>,
}

/// Gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Ticket statuses that allow promotion (exact match).
    pub required_statuses: Vec<String>,
    /// Ticket identifier pattern (project code + number).
    pub ticket_pattern: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            required_statuses: vec!["Approved".to_string()],
            ticket_pattern: "[A-Z]+-[0-9]+".to_string(),
        }
    }
}

/// Errors from the ticket tracker backend.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("ticket not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors from `PromotionGate::authorize`.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("no ticket reference found in trigger context")]
    NoTicketFound,

    #[error("ticket tracker unavailable: {0}")]
    TrackerUnavailable(String),

    #[error("ticket {0} does not exist")]
    UnknownTicket(String),

    #[error("ticket {ticket_id} is not approved (status: {actual_status})")]
    NotApproved {
        ticket_id: String,
        actual_status: String,
    },

    #[error("invalid ticket pattern: {0}")]
    InvalidPattern(String),
}

impl GateError {
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::NoTicketFound => "GateError::NoTicketFound",
            GateError::TrackerUnavailable(_) => "GateError::TrackerUnavailable",
            GateError::UnknownTicket(_) => "GateError::UnknownTicket",
            GateError::NotApproved { .. } => "GateError::NotApproved",
            GateError::InvalidPattern(_) => "GateError::InvalidPattern",
        }
    }
}

/// Trait for ticket tracker backends.
#[async_trait]
pub trait TicketTracker: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Current status name of a ticket.
    async fn issue_status(&self, ticket_id: &str) -> Result<String, TrackerError>;
}
