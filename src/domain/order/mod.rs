// ============================================================================
// Order Domain - Aggregate and Event Payloads
// ============================================================================
//
// - Aggregate (Order, OrderItem, ShippingAddress, status machine)
// - Events (payloads written to the outbox)
//
// ============================================================================

pub mod aggregate;
pub mod events;

pub use aggregate::*;
pub use events::*;
