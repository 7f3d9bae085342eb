use std::sync::Arc;

use tokio::sync::mpsc;

use crate::ledger::{EventRecord, LedgerStore};

use super::{EventEnvelope, EventHandle};

/// Background task that receives pipeline events and writes them to the ledger
pub struct EventWriter {
    rx: mpsc::Receiver<EventEnvelope>,
    store: Arc<dyn LedgerStore>,
}

impl EventWriter {
    pub fn new(rx: mpsc::Receiver<EventEnvelope>, store: Arc<dyn LedgerStore>) -> Self {
        Self { rx, store }
    }

    /// Run the writer, consuming events until every handle is dropped
    ///
    /// Spawn this as a background task.
    pub async fn run(mut self) {
        tracing::debug!("Event writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = EventRecord {
                id: 0,
                timestamp: envelope.timestamp,
                run_id: envelope.run_id,
                event_type: envelope.event.event_type().to_string(),
                job_id: envelope.event.job_id().map(String::from),
                data: envelope.event,
            };

            if let Err(e) = self.store.record_event(&record) {
                tracing::error!("Failed to write pipeline event: {}", e);
            }
        }

        tracing::debug!("Event writer shutting down");
    }
}

/// Create the event pipeline
///
/// Returns the `EventHandle` to share with components and the `EventWriter`
/// to spawn with `tokio::spawn(writer.run())`.
pub fn create_event_pipeline(
    store: Arc<dyn LedgerStore>,
    buffer_size: usize,
) -> (EventHandle, EventWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EventHandle::new(tx), EventWriter::new(rx, store))
}
