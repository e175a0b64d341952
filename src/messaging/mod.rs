use anyhow::Result;
use async_trait::async_trait;

pub mod kafka;
pub mod log;

pub use kafka::KafkaPublisher;
pub use log::LogPublisher;

/// Topic for order creation events.
pub const ORDER_CREATED_TOPIC: &str = "order-created";
/// Topic for order status transitions, including cancellation.
pub const ORDER_STATUS_CHANGED_TOPIC: &str = "order-status-changed";
/// Fallback topic for event types without a dedicated route.
pub const OUTBOX_TOPIC: &str = "outbox-events";

/// Broker-facing seam used by the outbox relay. Publish is at-least-once;
/// consumers deduplicate on the event id carried in the payload.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()>;
}
