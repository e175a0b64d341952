use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::EventPublisher;

/// Publisher for single-process runs: events land in the log instead of a
/// broker. The relay drains the outbox table exactly as it would in
/// production, so the dispatch path stays exercised.
#[derive(Default)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        info!(topic = %topic, key = %key, payload = %payload, "event published (log only)");
        Ok(())
    }
}
