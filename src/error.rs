use crate::utils::IsTransient;

// ============================================================================
// Business Error Taxonomy
// ============================================================================
//
// Every error carries a stable machine-readable code so callers can branch
// without parsing messages. Validation and authorization errors are never
// retried; lock and stock conflicts are retryable by the caller.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("Member not found")]
    MemberNotFound,

    #[error("Product not found")]
    ProductNotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Insufficient stock for product {0}")]
    InsufficientStock(uuid::Uuid),

    #[error("Failed to update stock. Please try again")]
    StockUpdateConflict,

    #[error("Failed to acquire lock '{0}'. Please try again")]
    LockAcquisitionFailed(String),

    #[error("You don't own this order")]
    OrderNotOwned,

    #[error("Order items cannot be empty")]
    EmptyOrderItems,

    #[error("Invalid order status: {0}")]
    InvalidOrderStatus(String),

    #[error("Cannot cancel order in current status")]
    CannotCancelOrder,

    #[error("Business number is required for seller")]
    BusinessNumberRequired,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Service temporarily unavailable")]
    ServiceUnavailable,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MarketError {
    /// Stable identifier exposed to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::MemberNotFound => "MEMBER_NOT_FOUND",
            MarketError::ProductNotFound => "PRODUCT_NOT_FOUND",
            MarketError::OrderNotFound => "ORDER_NOT_FOUND",
            MarketError::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            MarketError::StockUpdateConflict => "STOCK_UPDATE_FAILED",
            MarketError::LockAcquisitionFailed(_) => "LOCK_ACQUISITION_FAILED",
            MarketError::OrderNotOwned => "ORDER_NOT_OWNED",
            MarketError::EmptyOrderItems => "EMPTY_ORDER_ITEMS",
            MarketError::InvalidOrderStatus(_) => "INVALID_ORDER_STATUS",
            MarketError::CannotCancelOrder => "CANNOT_CANCEL_ORDER",
            MarketError::BusinessNumberRequired => "BUSINESS_NUMBER_REQUIRED",
            MarketError::InvalidInput(_) => "INVALID_INPUT",
            MarketError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            MarketError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error should count against a circuit breaker's failure
    /// threshold. Deterministic business outcomes (insufficient stock,
    /// validation, ownership) say nothing about dependency health.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            MarketError::StockUpdateConflict
                | MarketError::LockAcquisitionFailed(_)
                | MarketError::Internal(_)
        )
    }
}

impl IsTransient for MarketError {
    fn is_transient(&self) -> bool {
        // Both fire before any order state is committed (stock conflicts are
        // compensated before propagating), so a bounded retry is safe.
        matches!(
            self,
            MarketError::LockAcquisitionFailed(_) | MarketError::StockUpdateConflict
        )
    }
}

impl From<sqlx::Error> for MarketError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            // Serialization failure: concurrent writers touched the same row.
            sqlx::Error::Database(db) if db.code().as_deref() == Some("40001") => {
                MarketError::StockUpdateConflict
            }
            _ => MarketError::Internal(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(MarketError::MemberNotFound.code(), "MEMBER_NOT_FOUND");
        assert_eq!(
            MarketError::InsufficientStock(uuid::Uuid::new_v4()).code(),
            "INSUFFICIENT_STOCK"
        );
        assert_eq!(
            MarketError::LockAcquisitionFailed("order:create:1".into()).code(),
            "LOCK_ACQUISITION_FAILED"
        );
        assert_eq!(MarketError::ServiceUnavailable.code(), "SERVICE_UNAVAILABLE");
    }

    #[test]
    fn test_business_outcomes_are_not_transient() {
        assert!(!MarketError::InsufficientStock(uuid::Uuid::new_v4()).is_transient());
        assert!(!MarketError::EmptyOrderItems.is_transient());
        assert!(!MarketError::OrderNotOwned.is_transient());
        assert!(!MarketError::CannotCancelOrder.is_transient());
    }

    #[test]
    fn test_conflicts_are_transient() {
        assert!(MarketError::LockAcquisitionFailed("k".into()).is_transient());
        assert!(MarketError::StockUpdateConflict.is_transient());
    }
}
