use anyhow::Result;
use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};

use super::EventPublisher;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

pub struct KafkaPublisher {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
}

impl KafkaPublisher {
    pub fn new(brokers: &str) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        // Broker outages stop hammering the producer queue after a few
        // consecutive failures; the relay keeps the events PENDING meanwhile.
        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            open_timeout: std::time::Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(cb_config),
        })
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(topic).key(key).payload(payload);

                self.producer
                    .send(
                        record,
                        rdkafka::util::Timeout::After(std::time::Duration::from_secs(5)),
                    )
                    .await
                    .map_err(|(e, _)| anyhow::anyhow!("Kafka send error: {}", e))?;

                Ok::<(), anyhow::Error>(())
            })
            .await;

        match result {
            Ok(_) => {
                tracing::info!(topic = %topic, key = %key, "Published to Kafka");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic = %topic, "Circuit breaker open - Kafka unavailable");
                Err(anyhow::anyhow!("Circuit breaker open for Kafka"))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %topic, "Failed to publish to Kafka");
                Err(e)
            }
        }
    }
}
