// ============================================================================
// Domain Layer - Entities and the Order Aggregate
// ============================================================================
//
// Pure business rules, no storage or transport concerns:
// - Member (buyer/seller identity)
// - Product (the stock counter rules)
// - Order aggregate (status machine, total computation, item snapshots)
//
// ============================================================================

pub mod member;
pub mod order;
pub mod product;

pub use member::*;
pub use product::*;
