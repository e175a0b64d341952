use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::{LockCoordinator, LockGuard};
use crate::error::MarketError;

// ============================================================================
// Redis Lock Coordinator - Cluster-Wide Leases
// ============================================================================
//
// SET NX PX gives an exclusive lease that Redis expires on its own, so a
// crashed holder can block others for at most the lease time. Release is a
// compare-and-delete on the fencing token: a holder whose lease already
// expired (and was re-granted to someone else) cannot free the new lease.
//
// ============================================================================

const ACQUIRE_BACKOFF: Duration = Duration::from_millis(50);

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

pub struct RedisLockCoordinator {
    conn: MultiplexedConnection,
}

impl RedisLockCoordinator {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        tracing::info!(url = %url, "Connected to Redis for distributed locking");
        Ok(Self { conn })
    }

    async fn try_set(&self, key: &str, token: Uuid, lease: Duration) -> Result<bool, MarketError> {
        let mut conn = self.conn.clone();
        let granted: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.to_string())
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| MarketError::Internal(e.into()))?;
        Ok(granted.is_some())
    }
}

#[async_trait]
impl LockCoordinator for RedisLockCoordinator {
    async fn acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<LockGuard, MarketError> {
        let token = Uuid::new_v4();
        let deadline = Instant::now() + wait;
        loop {
            if self.try_set(key, token, lease).await? {
                tracing::debug!(key = %key, "Acquired Redis lock");
                return Ok(LockGuard {
                    key: key.to_string(),
                    token,
                });
            }
            if Instant::now() >= deadline {
                tracing::warn!(key = %key, wait_ms = wait.as_millis(), "Redis lock wait timed out");
                return Err(MarketError::LockAcquisitionFailed(key.to_string()));
            }
            sleep(ACQUIRE_BACKOFF.min(deadline - Instant::now())).await;
        }
    }

    async fn release(&self, guard: LockGuard) {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(RELEASE_SCRIPT);
        let released: Result<i64, _> = script
            .key(&guard.key)
            .arg(guard.token.to_string())
            .invoke_async(&mut conn)
            .await;

        match released {
            Ok(1) => tracing::debug!(key = %guard.key, "Released Redis lock"),
            Ok(_) => tracing::debug!(key = %guard.key, "Redis lock already expired or re-granted"),
            // Lease expiry will clean up; the next holder is not blocked forever.
            Err(e) => tracing::warn!(key = %guard.key, error = %e, "Failed to release Redis lock"),
        }
    }
}
