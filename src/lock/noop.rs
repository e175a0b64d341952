use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{LockCoordinator, LockGuard};
use crate::error::MarketError;

/// Single-process/dev mode: never serializes. The atomic stock ledger alone
/// still prevents overselling; only multi-step idempotency is weakened.
pub struct NoopLockCoordinator;

#[async_trait]
impl LockCoordinator for NoopLockCoordinator {
    async fn acquire(
        &self,
        key: &str,
        _wait: Duration,
        _lease: Duration,
    ) -> Result<LockGuard, MarketError> {
        tracing::debug!(key = %key, "No-op lock, proceeding without serialization");
        Ok(LockGuard {
            key: key.to_string(),
            token: Uuid::new_v4(),
        })
    }

    async fn release(&self, _guard: LockGuard) {}
}
