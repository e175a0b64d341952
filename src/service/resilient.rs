use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::{CreateOrderRequest, OrderService};
use crate::domain::order::Order;
use crate::error::MarketError;
use crate::metrics::Metrics;
use crate::store::Page;
use crate::utils::{
    retry_on_transient, Bulkhead, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    CircuitState, RetryConfig,
};

// ============================================================================
// Resilient Order Service - Bulkhead, Breaker, Bounded Retry
// ============================================================================
//
// Layered outermost-in: the bulkhead caps concurrent order work, the breaker
// sheds load when infrastructure keeps failing, and the retry loop re-runs
// transient failures. Deterministic business outcomes (insufficient stock,
// ownership, validation) pass straight through: they never trip the breaker
// and are never retried.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct ResilienceConfig {
    pub bulkhead_permits: usize,
    pub breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            bulkhead_permits: 64,
            breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                open_timeout: Duration::from_secs(30),
                success_threshold: 2,
            },
            retry: RetryConfig::default(),
        }
    }
}

pub struct ResilientOrderService {
    inner: Arc<OrderService>,
    bulkhead: Bulkhead,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl ResilientOrderService {
    pub fn new(inner: Arc<OrderService>, config: ResilienceConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            inner,
            bulkhead: Bulkhead::new("orders", config.bulkhead_permits),
            breaker: CircuitBreaker::new(config.breaker),
            retry: config.retry,
            metrics,
        }
    }

    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, MarketError> {
        self.execute(|| {
            let request = request.clone();
            async move { self.inner.create_order(request).await }
        })
        .await
    }

    pub async fn cancel_order(&self, order_id: Uuid, buyer_id: Uuid) -> Result<Order, MarketError> {
        self.execute(|| async move { self.inner.cancel_order(order_id, buyer_id).await })
            .await
    }

    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        status: &str,
    ) -> Result<Order, MarketError> {
        self.execute(|| async move {
            self.inner.update_order_status(order_id, seller_id, status).await
        })
        .await
    }

    pub async fn get_order(&self, order_id: Uuid, requester_id: Uuid) -> Result<Order, MarketError> {
        self.execute(|| async move { self.inner.get_order(order_id, requester_id).await })
            .await
    }

    pub async fn get_my_orders(
        &self,
        buyer_id: Uuid,
        page: Page,
    ) -> Result<Vec<Order>, MarketError> {
        self.execute(|| async move { self.inner.get_my_orders(buyer_id, page).await })
            .await
    }

    pub async fn get_seller_orders(
        &self,
        seller_id: Uuid,
        page: Page,
    ) -> Result<Vec<Order>, MarketError> {
        self.execute(|| async move { self.inner.get_seller_orders(seller_id, page).await })
            .await
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    /// Runs one operation through the full shell. The breaker only records
    /// infrastructure failures: business errors travel inside the Ok branch
    /// of the breaker call so they count as successes.
    async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, MarketError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, MarketError>>,
    {
        let _permit = match self.bulkhead.try_acquire() {
            Some(permit) => permit,
            None => {
                self.metrics.bulkhead_rejections.inc();
                return Err(MarketError::ServiceUnavailable);
            }
        };

        let result = retry_on_transient(self.retry.clone(), |_attempt| {
            let call = operation();
            async {
                let outcome = self
                    .breaker
                    .call(async {
                        match call.await {
                            Err(e) if e.counts_as_breaker_failure() => Err(e),
                            other => Ok(other),
                        }
                    })
                    .await;

                match outcome {
                    Ok(result) => result,
                    Err(CircuitBreakerError::CircuitOpen) => Err(MarketError::ServiceUnavailable),
                    Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
                }
            }
        })
        .await
        .into_result();

        self.metrics
            .update_circuit_breaker_state(match self.breaker.state().await {
                CircuitState::Closed => 0,
                CircuitState::Open => 1,
                CircuitState::HalfOpen => 2,
            });

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::member::Member;
    use crate::domain::order::ShippingAddress;
    use crate::domain::product::{Product, ProductStatus};
    use crate::lock::LocalLockCoordinator;
    use crate::outbox::{DurableOutbox, OutboxEvent};
    use crate::service::OrderLine;
    use crate::stock::MemStockLedger;
    use crate::store::{MemStore, OrderStore};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Order store whose writes can be switched to fail, standing in for a
    /// database outage.
    struct FaultyOrderStore {
        inner: MemStore,
        failing: AtomicBool,
    }

    impl FaultyOrderStore {
        fn new(inner: MemStore) -> Self {
            Self {
                inner,
                failing: AtomicBool::new(false),
            }
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), MarketError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(MarketError::Internal(anyhow::anyhow!("connection refused")))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl OrderStore for FaultyOrderStore {
        async fn insert(&self, order: &Order, outbox: &[OutboxEvent]) -> Result<(), MarketError> {
            self.check()?;
            self.inner.insert(order, outbox).await
        }

        async fn update(&self, order: &Order, outbox: &[OutboxEvent]) -> Result<(), MarketError> {
            self.check()?;
            self.inner.update(order, outbox).await
        }

        async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>, MarketError> {
            self.check()?;
            self.inner.find_by_id(order_id).await
        }

        async fn find_by_buyer(
            &self,
            buyer_id: Uuid,
            page: Page,
        ) -> Result<Vec<Order>, MarketError> {
            self.check()?;
            self.inner.find_by_buyer(buyer_id, page).await
        }

        async fn find_by_seller(
            &self,
            seller_id: Uuid,
            page: Page,
        ) -> Result<Vec<Order>, MarketError> {
            self.check()?;
            self.inner.find_by_seller(seller_id, page).await
        }
    }

    struct Fixture {
        store: MemStore,
        faulty: Arc<FaultyOrderStore>,
        service: ResilientOrderService,
    }

    fn fixture(config: ResilienceConfig) -> Fixture {
        let store = MemStore::new();
        let faulty = Arc::new(FaultyOrderStore::new(store.clone()));
        let metrics = Arc::new(Metrics::new().unwrap());
        let inner = OrderService::new(
            faulty.clone(),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(MemStockLedger::new(store.clone())),
            Arc::new(LocalLockCoordinator::new()),
            Arc::new(DurableOutbox),
            metrics.clone(),
        );
        Fixture {
            store,
            faulty,
            service: ResilientOrderService::new(Arc::new(inner), config, metrics),
        }
    }

    fn quick_config() -> ResilienceConfig {
        ResilienceConfig {
            bulkhead_permits: 4,
            breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                open_timeout: Duration::from_millis(100),
                success_threshold: 1,
            },
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            },
        }
    }

    fn seed(store: &MemStore, stock: u32) -> (Uuid, Product) {
        let buyer_id = Uuid::new_v4();
        store.seed_member(Member::buyer(buyer_id, format!("{buyer_id}@example.com")));
        let product = Product::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Widget",
            Decimal::new(100, 0),
            stock,
            ProductStatus::OnSale,
        );
        store.seed_product(product.clone());
        (buyer_id, product)
    }

    fn request(buyer_id: Uuid, product_id: Uuid, quantity: u32) -> CreateOrderRequest {
        CreateOrderRequest {
            buyer_id,
            items: vec![OrderLine {
                product_id,
                quantity,
            }],
            shipping_address: ShippingAddress {
                zip_code: "1".into(),
                address: "a".into(),
                address_detail: None,
                receiver_name: "r".into(),
                receiver_phone: "p".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_happy_path_passes_through() {
        let f = fixture(quick_config());
        let (buyer_id, product) = seed(&f.store, 10);

        let order = f
            .service
            .create_order(request(buyer_id, product.id, 2))
            .await
            .unwrap();
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(f.service.circuit_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_business_errors_do_not_trip_the_breaker() {
        let f = fixture(quick_config());
        let (buyer_id, product) = seed(&f.store, 1);

        for _ in 0..10 {
            let result = f
                .service
                .create_order(request(buyer_id, product.id, 5))
                .await;
            assert!(matches!(result, Err(MarketError::InsufficientStock(_))));
        }
        assert_eq!(f.service.circuit_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_repeated_infrastructure_failures_open_the_circuit() {
        let f = fixture(quick_config());
        let (buyer_id, product) = seed(&f.store, 100);
        f.faulty.set_failing(true);

        for _ in 0..3 {
            let result = f
                .service
                .create_order(request(buyer_id, product.id, 1))
                .await;
            assert!(result.is_err());
        }
        assert_eq!(f.service.circuit_state().await, CircuitState::Open);

        // While open, calls shed immediately as unavailable.
        let result = f
            .service
            .create_order(request(buyer_id, product.id, 1))
            .await;
        assert!(matches!(result, Err(MarketError::ServiceUnavailable)));
    }

    #[tokio::test]
    async fn test_circuit_recovers_after_cooldown() {
        let f = fixture(quick_config());
        let (buyer_id, product) = seed(&f.store, 100);

        f.faulty.set_failing(true);
        for _ in 0..3 {
            let _ = f
                .service
                .create_order(request(buyer_id, product.id, 1))
                .await;
        }
        assert_eq!(f.service.circuit_state().await, CircuitState::Open);

        f.faulty.set_failing(false);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let order = f
            .service
            .create_order(request(buyer_id, product.id, 1))
            .await
            .unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(f.service.circuit_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_never_retried() {
        // A retried rejection would double-count the stock_rejections
        // counter; one call must record exactly one rejection.
        let f = fixture(quick_config());
        let (buyer_id, product) = seed(&f.store, 1);

        let result = f
            .service
            .create_order(request(buyer_id, product.id, 2))
            .await;
        assert!(matches!(result, Err(MarketError::InsufficientStock(_))));

        let gathered = f.service.metrics.registry().gather();
        let rejections = gathered
            .iter()
            .find(|m| m.name() == "stock_rejections_total")
            .unwrap();
        assert_eq!(rejections.metric[0].counter.value, Some(1.0));
    }
}
