//! Mock ticket tracker for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::gate::{TicketTracker, TrackerError};

/// Mock implementation of the TicketTracker trait.
///
/// Unknown tickets answer `NotFound`.
#[derive(Debug, Default)]
pub struct MockTracker {
    statuses: Arc<RwLock<HashMap<String, String>>>,
    /// Ticket ids looked up, in order.
    lookups: Arc<RwLock<Vec<String>>>,
    /// If set, the next lookup fails with this error.
    next_error: Arc<RwLock<Option<TrackerError>>>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_status(&self, ticket_id: &str, status: &str) {
        self.statuses
            .write()
            .await
            .insert(ticket_id.to_string(), status.to_string());
    }

    pub async fn set_next_error(&self, error: TrackerError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn lookups(&self) -> Vec<String> {
        self.lookups.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.lookups.read().await.len()
    }
}

#[async_trait]
impl TicketTracker for MockTracker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn issue_status(&self, ticket_id: &str) -> Result<String, TrackerError> {
        self.lookups.write().await.push(ticket_id.to_string());

        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }

        self.statuses
            .read()
            .await
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| TrackerError::NotFound(ticket_id.to_string()))
    }
}
