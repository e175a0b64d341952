pub mod bulkhead;
pub mod circuit_breaker;
pub mod retry;

pub use bulkhead::Bulkhead;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use retry::{retry_on_transient, IsTransient, RetryConfig, RetryResult};
