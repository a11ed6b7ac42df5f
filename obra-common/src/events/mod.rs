//! Event types for the Obra event system
//!
//! Provides shared event definitions and the EventBus used to fan progress out
//! to SSE clients. Producers never depend on a listener being present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Obra event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ObraEvent {
    /// Outbound batch accepted and started
    BatchStarted {
        batch_id: Uuid,
        tenant_id: String,
        record_type: String,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// One record of an outbound batch finished (successfully or not)
    BatchProgress {
        batch_id: Uuid,
        record_id: String,
        /// "success" or "error"
        status: String,
        completed: usize,
        total: usize,
        /// Percentage complete (0.0 - 100.0)
        percentage: f64,
        error_message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Outbound batch finished; summary ledger entry written
    BatchCompleted {
        batch_id: Uuid,
        status: String,
        records_processed: i64,
        records_errored: i64,
        cancelled: bool,
        timestamp: DateTime<Utc>,
    },

    /// Outbound batch could not run at all
    BatchFailed {
        batch_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Inbound import run finished; ledger entry written
    ImportCompleted {
        run_id: Uuid,
        tenant_id: String,
        status: String,
        records_processed: i64,
        records_updated: i64,
        records_errored: i64,
        timestamp: DateTime<Utc>,
    },

    /// Inbound import run could not be recorded
    ImportFailed {
        tenant_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ObraEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            ObraEvent::BatchStarted { .. } => "BatchStarted",
            ObraEvent::BatchProgress { .. } => "BatchProgress",
            ObraEvent::BatchCompleted { .. } => "BatchCompleted",
            ObraEvent::BatchFailed { .. } => "BatchFailed",
            ObraEvent::ImportCompleted { .. } => "ImportCompleted",
            ObraEvent::ImportFailed { .. } => "ImportFailed",
        }
    }
}

/// Broadcast bus for ObraEvent
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ObraEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ObraEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: ObraEvent) -> Result<usize, broadcast::error::SendError<ObraEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ObraEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_event() -> ObraEvent {
        ObraEvent::BatchFailed {
            batch_id: Uuid::new_v4(),
            error: "storage offline".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_error() {
        let bus = EventBus::new(10);
        assert!(bus.emit(failed_event()).is_err());
        // Lossy variant never fails
        bus.emit_lossy(failed_event());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(failed_event()).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "BatchFailed");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(failed_event()).unwrap();
        assert_eq!(json["type"], "BatchFailed");
        assert_eq!(json["error"], "storage offline");
    }
}
