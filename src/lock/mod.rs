use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MarketError;

// ============================================================================
// Lock Coordinator - Named, Leased Mutual Exclusion
// ============================================================================
//
// Serializes conflicting multi-step order operations (per-buyer create,
// per-order cancel). The lease bounds how long a crashed holder can block
// others; the wait bounds how long a caller blocks before giving up with
// LOCK_ACQUISITION_FAILED. This is a coarse safety net layered on top of the
// atomic stock ledger, never a substitute for it.
//
// Variants share one interface so the orchestrator is indifferent to
// deployment topology:
// - LocalLockCoordinator: in-process leases (dev, tests)
// - RedisLockCoordinator: cluster-wide SET NX PX leases
// - NoopLockCoordinator: no serialization at all
//
// ============================================================================

pub mod local;
pub mod noop;
pub mod redis;

pub use local::LocalLockCoordinator;
pub use noop::NoopLockCoordinator;
pub use redis::RedisLockCoordinator;

/// Proof of lock ownership. Release is explicit and idempotent; an expired
/// lease makes release a no-op.
#[derive(Debug)]
pub struct LockGuard {
    pub key: String,
    pub token: Uuid,
}

#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Block up to `wait` for exclusive ownership of `key`; the lease
    /// auto-expires after `lease` even if never released. Never proceeds
    /// without the lock: timing out is `LockAcquisitionFailed`.
    async fn acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<LockGuard, MarketError>;

    /// Idempotent; no-op if the lease expired or is held by someone else.
    async fn release(&self, guard: LockGuard);
}

pub fn create_order_key(buyer_id: Uuid) -> String {
    format!("order:create:{buyer_id}")
}

pub fn cancel_order_key(order_id: Uuid) -> String {
    format!("order:cancel:{order_id}")
}

pub fn status_order_key(order_id: Uuid) -> String {
    format!("order:status:{order_id}")
}
