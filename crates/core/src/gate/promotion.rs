//! The promotion gate.

use std::sync::Arc;

use chrono::Utc;
use regex_lite::Regex;
use tracing::{info, warn};

use crate::events::{EventHandle, PipelineEvent};
use crate::metrics;

use super::{GateConfig, GateError, TicketApproval, TicketTracker, TrackerError, TriggerContext};

/// Checks that a change ticket is approved before a protected promotion.
pub struct PromotionGate {
    tracker: Arc<dyn TicketTracker>,
    required_statuses: Vec<String>,
    pattern: Regex,
    events: Option<EventHandle>,
}

impl PromotionGate {
    pub fn new(tracker: Arc<dyn TicketTracker>, config: &GateConfig) -> Result<Self, GateError> {
        let pattern = Regex::new(&config.ticket_pattern)
            .map_err(|e| GateError::InvalidPattern(e.to_string()))?;

        Ok(Self {
            tracker,
            required_statuses: config.required_statuses.clone(),
            pattern,
            events: None,
        })
    }

    pub fn with_events(mut self, events: EventHandle) -> Self {
        self.events = Some(events);
        self
    }

    /// Authorize promotion of the triggering change into `target_environment`.
    ///
    /// The ticket status is fetched fresh on every call.
    pub async fn authorize(
        &self,
        trigger: &TriggerContext,
        target_environment: &str,
    ) -> Result<TicketApproval, GateError> {
        let result = self.check(trigger).await;

        let label = match &result {
            Ok(_) => "approved",
            Err(GateError::NotApproved { .. }) => "not_approved",
            Err(GateError::NoTicketFound) => "no_ticket",
            Err(_) => "error",
        };
        metrics::GATE_CHECKS.with_label_values(&[label]).inc();

        let (ticket_id, status) = match &result {
            Ok(approval) => {
                info!(
                    target_environment,
                    ticket_id = %approval.ticket_id,
                    status = %approval.status,
                    "Promotion approved"
                );
                (Some(approval.ticket_id.clone()), Some(approval.status.clone()))
            }
            Err(GateError::NotApproved {
                ticket_id,
                actual_status,
            }) => {
                warn!(target_environment, ticket_id = %ticket_id, status = %actual_status, "Promotion not approved");
                (Some(ticket_id.clone()), Some(actual_status.clone()))
            }
            Err(e) => {
                warn!(target_environment, error = %e, "Approval check failed");
                (None, None)
            }
        };

        if let Some(events) = &self.events {
            events
                .emit(PipelineEvent::GateChecked {
                    target_environment: target_environment.to_string(),
                    ticket_id,
                    status,
                    approved: result.is_ok(),
                })
                .await;
        }

        result
    }

    async fn check(&self, trigger: &TriggerContext) -> Result<TicketApproval, GateError> {
        let ticket_id = trigger
            .extract_ticket(&self.pattern)
            .ok_or(GateError::NoTicketFound)?;

        let status = self.tracker.issue_status(&ticket_id).await;
        metrics::record_external_call(self.tracker.name(), "issue_status", status.is_ok());

        let status = status.map_err(|e| match e {
            TrackerError::NotFound(_) => GateError::UnknownTicket(ticket_id.clone()),
            other => GateError::TrackerUnavailable(other.to_string()),
        })?;

        if !self.required_statuses.iter().any(|s| *s == status) {
            return Err(GateError::NotApproved {
                ticket_id,
                actual_status: status,
            });
        }

        Ok(TicketApproval {
            ticket_id,
            status,
            checked_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTracker;

    fn gate(tracker: &Arc<MockTracker>) -> PromotionGate {
        PromotionGate::new(tracker.clone(), &GateConfig::default()).unwrap()
    }

    fn trigger(message: &str) -> TriggerContext {
        TriggerContext::new().with_commit_message(message)
    }

    #[tokio::test]
    async fn test_approved_ticket() {
        let tracker = Arc::new(MockTracker::new());
        tracker.set_status("OPS-7", "Approved").await;

        let approval = gate(&tracker)
            .authorize(&trigger("OPS-7: new mappings"), "prd")
            .await
            .unwrap();
        assert_eq!(approval.ticket_id, "OPS-7");
        assert_eq!(approval.status, "Approved");
        assert_eq!(tracker.lookups().await, vec!["OPS-7".to_string()]);
    }

    #[tokio::test]
    async fn test_not_approved() {
        let tracker = Arc::new(MockTracker::new());
        tracker.set_status("OPS-7", "In Review").await;

        let err = gate(&tracker)
            .authorize(&trigger("OPS-7"), "prd")
            .await
            .unwrap_err();
        match err {
            GateError::NotApproved {
                ticket_id,
                actual_status,
            } => {
                assert_eq!(ticket_id, "OPS-7");
                assert_eq!(actual_status, "In Review");
            }
            other => panic!("expected NotApproved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_match_is_exact() {
        let tracker = Arc::new(MockTracker::new());
        tracker.set_status("OPS-7", "approved").await;

        let err = gate(&tracker)
            .authorize(&trigger("OPS-7"), "prd")
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::NotApproved { .. }));
    }

    #[tokio::test]
    async fn test_any_required_status_passes() {
        let tracker = Arc::new(MockTracker::new());
        tracker.set_status("OPS-7", "Done").await;
        let config = GateConfig {
            required_statuses: vec!["Approved".to_string(), "Done".to_string()],
            ..GateConfig::default()
        };

        let gate = PromotionGate::new(tracker.clone(), &config).unwrap();
        assert!(gate.authorize(&trigger("OPS-7"), "prd").await.is_ok());
    }

    #[tokio::test]
    async fn test_no_ticket_skips_tracker() {
        let tracker = Arc::new(MockTracker::new());

        let err = gate(&tracker)
            .authorize(&trigger("quick fix"), "prd")
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::NoTicketFound));
        assert_eq!(tracker.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_tracker_errors() {
        let tracker = Arc::new(MockTracker::new());
        tracker.set_next_error(TrackerError::Timeout).await;
        let err = gate(&tracker)
            .authorize(&trigger("OPS-7"), "prd")
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::TrackerUnavailable(_)));

        // Unknown tickets are reported as such.
        let err = gate(&tracker)
            .authorize(&trigger("OPS-404"), "prd")
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::UnknownTicket(id) if id == "OPS-404"));
    }

    #[test]
    fn test_invalid_pattern() {
        let tracker = Arc::new(MockTracker::new());
        let config = GateConfig {
            ticket_pattern: "([A-Z".to_string(),
            ..GateConfig::default()
        };
        assert!(matches!(
            PromotionGate::new(tracker, &config),
            Err(GateError::InvalidPattern(_))
        ));
    }
}
