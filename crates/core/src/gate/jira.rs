//! Jira ticket tracker backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::config::TrackerConfig;

use super::{TicketTracker, TrackerError};

/// Reads issue status from the Jira REST API (v2).
pub struct JiraClient {
    client: Client,
    config: TrackerConfig,
}

#[derive(Deserialize)]
struct Issue {
    fields: IssueFields,
}

#[derive(Deserialize)]
struct IssueFields {
    status: IssueStatus,
}

#[derive(Deserialize)]
struct IssueStatus {
    name: String,
}

impl JiraClient {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TrackerError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn issue_url(&self, ticket_id: &str) -> String {
        format!(
            "{}/rest/api/2/issue/{}?fields=status",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(ticket_id)
        )
    }
}

fn parse_status(body: &str) -> Result<String, TrackerError> {
    let issue: Issue = serde_json::from_str(body)
        .map_err(|e| TrackerError::InvalidResponse(format!("Failed to parse issue: {}", e)))?;
    Ok(issue.fields.status.name)
}

#[async_trait]
impl TicketTracker for JiraClient {
    fn name(&self) -> &str {
        "jira"
    }

    async fn issue_status(&self, ticket_id: &str) -> Result<String, TrackerError> {
        let url = self.issue_url(ticket_id);
        debug!(ticket_id, "Querying Jira issue status");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.username, Some(self.config.token.expose()))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TrackerError::Timeout
                } else {
                    TrackerError::ConnectionFailed(e.to_string())
                }
            })?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(TrackerError::NotFound(ticket_id.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(TrackerError::Unauthorized(format!(
                    "HTTP {}",
                    response.status().as_u16()
                )))
            }
            s => {
                return Err(TrackerError::InvalidResponse(format!("HTTP {}", s.as_u16())));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| TrackerError::InvalidResponse(e.to_string()))?;
        parse_status(&body)
    }
}
