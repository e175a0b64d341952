pub mod orders;
pub mod resilient;

pub use orders::{CreateOrderRequest, OrderLine, OrderService};
pub use resilient::{ResilienceConfig, ResilientOrderService};
