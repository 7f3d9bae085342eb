use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::PipelineEvent;

/// Envelope wrapping a pipeline event with metadata
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    /// Run the emitting component was working for
    pub run_id: Option<String>,
    pub event: PipelineEvent,
}

/// Handle for emitting pipeline events
///
/// Cheaply cloneable. `for_run` yields a handle that stamps every envelope
/// with a run id, so components don't need to know which run they serve.
#[derive(Clone)]
pub struct EventHandle {
    tx: mpsc::Sender<EventEnvelope>,
    run_id: Option<String>,
}

impl EventHandle {
    /// Create a new event handle from a channel sender
    pub fn new(tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { tx, run_id: None }
    }

    /// A handle scoped to one run.
    pub fn for_run(&self, run_id: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            run_id: Some(run_id.into()),
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    fn envelope(&self, event: PipelineEvent) -> EventEnvelope {
        let run_id = self
            .run_id
            .clone()
            .or_else(|| event.run_id().map(String::from));
        EventEnvelope {
            timestamp: Utc::now(),
            run_id,
            event,
        }
    }

    /// Emit an event, waiting for channel capacity
    ///
    /// If the channel is closed the error is logged; the caller is never failed.
    pub async fn emit(&self, event: PipelineEvent) {
        let envelope = self.envelope(event);
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit pipeline event: {}", e);
        }
    }

    /// Try to emit an event without waiting
    ///
    /// Returns true if the event was queued.
    pub fn try_emit(&self, event: PipelineEvent) -> bool {
        let envelope = self.envelope(event);
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit pipeline event: {}", e);
                false
            }
        }
    }
}
