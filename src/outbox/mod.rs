use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Transactional Outbox
// ============================================================================
//
// Recording the fact ("an order was created") is synchronous and
// transactional; telling the outside world is asynchronous, retried, and
// eventually gives up into an operator-visible FAILED state. Status only
// ever moves PENDING -> PROCESSED or PENDING -> FAILED.
//
// ============================================================================

pub mod relay;

pub use relay::{OutboxRelay, RelayConfig};

pub const MAX_RETRY_COUNT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OutboxStatus::Pending),
            "PROCESSED" => Some(OutboxStatus::Processed),
            "FAILED" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    pub fn new(
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        payload: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id: aggregate_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn mark_processed(&mut self) {
        self.status = OutboxStatus::Processed;
        self.processed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: &str, max_retry: u32) {
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
        if self.retry_count >= max_retry {
            self.status = OutboxStatus::Failed;
        }
    }
}

/// Producer seam between the orchestrator and the outbox. The durable
/// variant yields a PENDING row the orchestrator hands to the store inside
/// the same atomic write as the order mutation; the pass-through variant
/// only logs. Orchestrator code is identical either way.
pub trait OutboxEventService: Send + Sync {
    fn save_event(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Option<OutboxEvent>;
}

pub struct DurableOutbox;

impl OutboxEventService for DurableOutbox {
    fn save_event(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Option<OutboxEvent> {
        let event = OutboxEvent::new(aggregate_type, aggregate_id, event_type, payload.to_string());
        tracing::debug!(
            event_type = %event_type,
            aggregate_id = %aggregate_id,
            event_id = %event.id,
            "Recording outbox event"
        );
        Some(event)
    }
}

/// Single-process testing variant: no row is written, nothing is relayed.
pub struct PassthroughOutbox;

impl OutboxEventService for PassthroughOutbox {
    fn save_event(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        _payload: serde_json::Value,
    ) -> Option<OutboxEvent> {
        tracing::debug!(
            event_type = %event_type,
            aggregate_type = %aggregate_type,
            aggregate_id = %aggregate_id,
            "Pass-through outbox, event not recorded"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> OutboxEvent {
        OutboxEvent::new("Order", "some-id", "OrderCreated", "{}".to_string())
    }

    #[test]
    fn test_new_event_is_pending() {
        let ev = event();
        assert_eq!(ev.status, OutboxStatus::Pending);
        assert_eq!(ev.retry_count, 0);
        assert!(ev.processed_at.is_none());
        assert!(ev.last_error.is_none());
    }

    #[test]
    fn test_mark_processed_sets_timestamp() {
        let mut ev = event();
        ev.mark_processed();
        assert_eq!(ev.status, OutboxStatus::Processed);
        assert!(ev.processed_at.is_some());
    }

    #[test]
    fn test_failures_below_cap_stay_pending() {
        let mut ev = event();
        for _ in 0..MAX_RETRY_COUNT - 1 {
            ev.mark_failed("broker down", MAX_RETRY_COUNT);
        }
        assert_eq!(ev.status, OutboxStatus::Pending);
        assert_eq!(ev.retry_count, MAX_RETRY_COUNT - 1);
        assert_eq!(ev.last_error.as_deref(), Some("broker down"));
    }

    #[test]
    fn test_failed_at_retry_cap() {
        let mut ev = event();
        for _ in 0..MAX_RETRY_COUNT {
            ev.mark_failed("broker down", MAX_RETRY_COUNT);
        }
        assert_eq!(ev.status, OutboxStatus::Failed);
    }

    #[test]
    fn test_durable_variant_yields_row() {
        let outbox = DurableOutbox;
        let row = outbox.save_event("Order", "id", "OrderCreated", serde_json::json!({"a": 1}));
        let row = row.unwrap();
        assert_eq!(row.event_type, "OrderCreated");
        assert_eq!(row.payload, r#"{"a":1}"#);
    }

    #[test]
    fn test_passthrough_variant_yields_nothing() {
        let outbox = PassthroughOutbox;
        let row = outbox.save_event("Order", "id", "OrderCreated", serde_json::json!({}));
        assert!(row.is_none());
    }
}
