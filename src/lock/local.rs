use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::{LockCoordinator, LockGuard};
use crate::error::MarketError;

// ============================================================================
// In-Process Lock Coordinator
// ============================================================================

const ACQUIRE_BACKOFF: Duration = Duration::from_millis(10);

struct Lease {
    token: Uuid,
    expires_at: Instant,
}

/// Keyed leases held in a single process. Lease expiry is checked lazily on
/// the next acquire attempt, which is enough to satisfy the crash-safety
/// contract: an abandoned lease never blocks past its lease time.
pub struct LocalLockCoordinator {
    leases: Mutex<HashMap<String, Lease>>,
}

impl LocalLockCoordinator {
    pub fn new() -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
        }
    }

    fn try_insert(&self, key: &str, lease: Duration) -> Option<LockGuard> {
        let mut leases = self.leases.lock().expect("lock table poisoned");
        let now = Instant::now();
        match leases.get(key) {
            Some(held) if held.expires_at > now => None,
            _ => {
                let token = Uuid::new_v4();
                leases.insert(
                    key.to_string(),
                    Lease {
                        token,
                        expires_at: now + lease,
                    },
                );
                Some(LockGuard {
                    key: key.to_string(),
                    token,
                })
            }
        }
    }
}

impl Default for LocalLockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockCoordinator for LocalLockCoordinator {
    async fn acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<LockGuard, MarketError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(guard) = self.try_insert(key, lease) {
                tracing::debug!(key = %key, "Acquired local lock");
                return Ok(guard);
            }
            if Instant::now() >= deadline {
                tracing::warn!(key = %key, wait_ms = wait.as_millis(), "Lock wait timed out");
                return Err(MarketError::LockAcquisitionFailed(key.to_string()));
            }
            sleep(ACQUIRE_BACKOFF.min(deadline - Instant::now())).await;
        }
    }

    async fn release(&self, guard: LockGuard) {
        let mut leases = self.leases.lock().expect("lock table poisoned");
        if let Some(held) = leases.get(&guard.key) {
            if held.token == guard.token {
                leases.remove(&guard.key);
                tracing::debug!(key = %guard.key, "Released local lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_second_caller_times_out_with_zero_wait() {
        let locks = Arc::new(LocalLockCoordinator::new());
        let guard = locks
            .acquire("order:create:b1", Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap();

        let second = locks
            .acquire("order:create:b1", Duration::ZERO, Duration::from_secs(30))
            .await;
        assert!(matches!(second, Err(MarketError::LockAcquisitionFailed(_))));

        locks.release(guard).await;
    }

    #[tokio::test]
    async fn test_acquire_after_release() {
        let locks = LocalLockCoordinator::new();
        let guard = locks
            .acquire("k", Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap();
        locks.release(guard).await;

        let again = locks.acquire("k", Duration::ZERO, Duration::from_secs(30)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_stolen() {
        let locks = LocalLockCoordinator::new();
        let _abandoned = locks
            .acquire("k", Duration::ZERO, Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let stolen = locks.acquire("k", Duration::ZERO, Duration::from_secs(30)).await;
        assert!(stolen.is_ok());
    }

    #[tokio::test]
    async fn test_stale_release_does_not_drop_new_lease() {
        let locks = LocalLockCoordinator::new();
        let old = locks
            .acquire("k", Duration::ZERO, Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let _new = locks.acquire("k", Duration::ZERO, Duration::from_secs(30)).await.unwrap();

        // Old holder releasing after expiry must not free the new lease.
        locks.release(old).await;
        let blocked = locks.acquire("k", Duration::ZERO, Duration::from_secs(30)).await;
        assert!(matches!(blocked, Err(MarketError::LockAcquisitionFailed(_))));
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = LocalLockCoordinator::new();
        let a = locks.acquire("a", Duration::ZERO, Duration::from_secs(30)).await;
        let b = locks.acquire("b", Duration::ZERO, Duration::from_secs(30)).await;
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_waiting_caller_gets_lock_when_freed() {
        let locks = Arc::new(LocalLockCoordinator::new());
        let guard = locks
            .acquire("k", Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap();

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            locks2
                .acquire("k", Duration::from_secs(1), Duration::from_secs(30))
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        locks.release(guard).await;

        assert!(waiter.await.unwrap().is_ok());
    }
}
