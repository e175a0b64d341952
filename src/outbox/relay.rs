use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::MAX_RETRY_COUNT;
use crate::domain::order::{EVENT_ORDER_CREATED, EVENT_ORDER_STATUS_CHANGED};
use crate::error::MarketError;
use crate::messaging::{
    EventPublisher, ORDER_CREATED_TOPIC, ORDER_STATUS_CHANGED_TOPIC, OUTBOX_TOPIC,
};
use crate::metrics::Metrics;
use crate::store::OutboxStore;

// ============================================================================
// Outbox Relay
// ============================================================================
//
// Polls PENDING rows oldest-first and pushes them to the broker. A publish
// failure bumps retry_count and leaves the row PENDING; the row parks as
// FAILED once retries run out. Delivery is at-least-once: a crash between
// broker ack and mark_processed re-sends the event on the next pass.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often PENDING rows are drained.
    pub poll_interval: Duration,
    /// How often the retention sweep runs.
    pub cleanup_interval: Duration,
    /// PROCESSED rows older than this are deleted.
    pub retention: Duration,
    /// Publish attempts per event before it parks as FAILED.
    pub max_retry: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(3600),
            retention: Duration::from_secs(7 * 24 * 3600),
            max_retry: MAX_RETRY_COUNT,
        }
    }
}

pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<Metrics>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            metrics,
            config,
        }
    }

    /// Runs the poll and cleanup loops until the process exits.
    pub fn spawn(self: Arc<Self>) {
        let poller = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poller.config.poll_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = poller.drain_once().await {
                    error!(error = %e, "outbox drain pass failed");
                }
            }
        });

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.cleanup_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.cleanup_once().await {
                    error!(error = %e, "outbox retention sweep failed");
                }
            }
        });
    }

    /// One drain pass. Separated from the loop so tests can drive it directly.
    pub async fn drain_once(&self) -> Result<usize, MarketError> {
        let events = self.store.fetch_retryable(self.config.max_retry).await?;
        if events.is_empty() {
            return Ok(0);
        }
        debug!(count = events.len(), "draining outbox events");

        let mut published = 0;
        for event in events {
            let topic = topic_for(&event.event_type);
            match self
                .publisher
                .publish(topic, &event.aggregate_id, &event.payload)
                .await
            {
                Ok(()) => {
                    self.store.mark_processed(event.id).await?;
                    self.metrics
                        .outbox_published
                        .with_label_values(&[&event.event_type])
                        .inc();
                    published += 1;
                }
                Err(e) => {
                    let attempt = event.retry_count + 1;
                    self.metrics.outbox_retries.inc();
                    if attempt >= self.config.max_retry {
                        self.metrics
                            .outbox_exhausted
                            .with_label_values(&[&event.event_type])
                            .inc();
                        error!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            retry_count = attempt,
                            error = %e,
                            "outbox event exhausted retries, parking as FAILED"
                        );
                    } else {
                        warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            retry_count = attempt,
                            error = %e,
                            "outbox publish failed, will retry"
                        );
                    }
                    self.store
                        .mark_failed(event.id, &e.to_string(), self.config.max_retry)
                        .await?;
                }
            }
        }
        Ok(published)
    }

    /// One retention sweep. PROCESSED rows outside the window are dropped.
    pub async fn cleanup_once(&self) -> Result<u64, MarketError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::days(7));
        let deleted = self.store.delete_processed_before(cutoff).await?;
        if deleted > 0 {
            self.metrics.outbox_reclaimed.inc_by(deleted);
            info!(deleted, "outbox retention sweep reclaimed rows");
        }
        Ok(deleted)
    }
}

fn topic_for(event_type: &str) -> &'static str {
    if event_type.contains(EVENT_ORDER_CREATED) {
        ORDER_CREATED_TOPIC
    } else if event_type.contains(EVENT_ORDER_STATUS_CHANGED) {
        ORDER_STATUS_CHANGED_TOPIC
    } else {
        OUTBOX_TOPIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{OutboxEvent, OutboxStatus};
    use crate::store::MemStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Publisher that fails the first `fail_first` calls, then succeeds.
    struct FlakyPublisher {
        fail_first: u32,
        calls: AtomicU32,
    }

    impl FlakyPublisher {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventPublisher for FlakyPublisher {
        async fn publish(&self, _topic: &str, _key: &str, _payload: &str) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("broker unavailable")
            }
            Ok(())
        }
    }

    fn relay_over(
        store: MemStore,
        publisher: Arc<dyn EventPublisher>,
        max_retry: u32,
    ) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(store),
            publisher,
            Arc::new(Metrics::new().unwrap()),
            RelayConfig {
                max_retry,
                ..RelayConfig::default()
            },
        )
    }

    /// Seeds one PENDING event through the store API so state matches
    /// production writes.
    async fn pending_event(store: &MemStore, event_type: &str) -> OutboxEvent {
        use crate::domain::order::{Order, ShippingAddress};
        use crate::store::OrderStore;

        let order = Order::new(
            uuid::Uuid::new_v4(),
            ShippingAddress {
                zip_code: "1".into(),
                address: "a".into(),
                address_detail: None,
                receiver_name: "r".into(),
                receiver_phone: "p".into(),
            },
        );
        let event = OutboxEvent::new("Order", &order.id.to_string(), event_type, "{}".into());
        store
            .insert(&order, std::slice::from_ref(&event))
            .await
            .unwrap();
        event
    }

    #[tokio::test]
    async fn test_pending_event_is_published_exactly_once() {
        let store = MemStore::new();
        let event = pending_event(&store, "OrderCreated").await;
        let publisher = Arc::new(FlakyPublisher::new(0));
        let relay = relay_over(store.clone(), publisher.clone(), 5);

        assert_eq!(relay.drain_once().await.unwrap(), 1);
        // A second pass finds nothing to do.
        assert_eq!(relay.drain_once().await.unwrap(), 0);
        assert_eq!(publisher.call_count(), 1);

        let stored = store
            .outbox_events()
            .into_iter()
            .find(|e| e.id == event.id)
            .unwrap();
        assert_eq!(stored.status, OutboxStatus::Processed);
        assert!(stored.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_publish_is_retried_then_delivered() {
        let store = MemStore::new();
        let event = pending_event(&store, "OrderCreated").await;
        let publisher = Arc::new(FlakyPublisher::new(2));
        let relay = relay_over(store.clone(), publisher.clone(), 5);

        assert_eq!(relay.drain_once().await.unwrap(), 0);
        assert_eq!(relay.drain_once().await.unwrap(), 0);
        assert_eq!(relay.drain_once().await.unwrap(), 1);

        let stored = store
            .outbox_events()
            .into_iter()
            .find(|e| e.id == event.id)
            .unwrap();
        assert_eq!(stored.status, OutboxStatus::Processed);
        assert_eq!(stored.retry_count, 2);
    }

    #[tokio::test]
    async fn test_exhausted_event_parks_failed_and_stays_parked() {
        let store = MemStore::new();
        let event = pending_event(&store, "OrderStatusChanged").await;
        let publisher = Arc::new(FlakyPublisher::new(u32::MAX));
        let relay = relay_over(store.clone(), publisher.clone(), 3);

        for _ in 0..3 {
            assert_eq!(relay.drain_once().await.unwrap(), 0);
        }
        let stored = store
            .outbox_events()
            .into_iter()
            .find(|e| e.id == event.id)
            .unwrap();
        assert_eq!(stored.status, OutboxStatus::Failed);
        assert_eq!(stored.retry_count, 3);
        assert!(stored.last_error.is_some());

        // FAILED is terminal: further passes never touch the event again.
        let calls = publisher.call_count();
        relay.drain_once().await.unwrap();
        assert_eq!(publisher.call_count(), calls);
    }

    #[test]
    fn test_topic_routing() {
        assert_eq!(topic_for("OrderCreated"), ORDER_CREATED_TOPIC);
        assert_eq!(topic_for("OrderStatusChanged"), ORDER_STATUS_CHANGED_TOPIC);
        assert_eq!(topic_for("SomethingElse"), OUTBOX_TOPIC);
    }
}
