use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::member::Member;
use crate::domain::order::Order;
use crate::domain::product::Product;
use crate::error::MarketError;
use crate::outbox::OutboxEvent;

// ============================================================================
// Persistence Seams
// ============================================================================
//
// The orchestrator talks to storage only through these traits. Two families
// of implementations exist, selected at startup:
// - store::memory - single-process state behind one mutex (dev, tests)
// - store::postgres - sqlx transactions
//
// Order writes take the outbox rows produced by the same mutation and
// persist both as one atomic unit (transactional outbox): the event record
// exists iff the order mutation does.
//
// ============================================================================

pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order, its items, and the accompanying outbox rows
    /// atomically. If any part fails, none of it is visible.
    async fn insert(&self, order: &Order, outbox: &[OutboxEvent]) -> Result<(), MarketError>;

    /// Persist an order mutation (status change) plus outbox rows atomically.
    async fn update(&self, order: &Order, outbox: &[OutboxEvent]) -> Result<(), MarketError>;

    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>, MarketError>;

    /// Buyer's orders, newest first.
    async fn find_by_buyer(&self, buyer_id: Uuid, page: Page) -> Result<Vec<Order>, MarketError>;

    /// Orders containing at least one line item of the seller, newest first.
    async fn find_by_seller(&self, seller_id: Uuid, page: Page)
        -> Result<Vec<Order>, MarketError>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Read-only snapshot; all stock mutation goes through the StockLedger.
    async fn find_by_id(&self, product_id: Uuid) -> Result<Option<Product>, MarketError>;
}

#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn find_by_id(&self, member_id: Uuid) -> Result<Option<Member>, MarketError>;
}

/// Mutated only by the transactional writer (via OrderStore) and the relay
/// loop; nothing else touches the outbox table.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// PENDING events with retry_count below the cap, in creation order.
    async fn fetch_retryable(&self, max_retry: u32) -> Result<Vec<OutboxEvent>, MarketError>;

    async fn mark_processed(&self, event_id: Uuid) -> Result<(), MarketError>;

    /// Record a publish failure: bump retry_count, keep the last error, and
    /// move to FAILED once the cap is reached. FAILED is terminal.
    async fn mark_failed(
        &self,
        event_id: Uuid,
        error: &str,
        max_retry: u32,
    ) -> Result<(), MarketError>;

    /// Retention sweep; returns the number of PROCESSED rows deleted.
    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MarketError>;
}
