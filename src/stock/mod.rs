use async_trait::async_trait;
use uuid::Uuid;

use crate::error::MarketError;

// ============================================================================
// Stock Ledger - Atomic Check-and-Update on the Stock Counter
// ============================================================================
//
// The sole admission-control point for overselling. Every implementation
// performs the quantity check and the write in one indivisible step against
// its storage, so no two callers can both observe sufficient stock and both
// succeed when only one could be honestly satisfied.
//
// ============================================================================

pub mod memory;
pub mod postgres;

pub use memory::MemStockLedger;
pub use postgres::PgStockLedger;

#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Atomically reduce quantity by `qty` and bump sales_count iff the
    /// product is on sale with quantity >= qty, flipping to SOLD_OUT when the
    /// counter reaches zero. Returns the number of rows updated: 0 means the
    /// precondition failed and nothing changed. `ProductNotFound` if the
    /// product does not exist.
    async fn try_decrement(&self, product_id: Uuid, qty: u32) -> Result<u64, MarketError>;

    /// Atomically increase quantity by `qty`, floor sales_count at zero, and
    /// flip SOLD_OUT back to ON_SALE. Returns 0 when the product is absent;
    /// compensation callers treat that as a tolerated no-op.
    async fn restore(&self, product_id: Uuid, qty: u32) -> Result<u64, MarketError>;
}
