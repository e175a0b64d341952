use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::order::{
    Order, OrderCreatedPayload, OrderItem, OrderStatus, OrderStatusChangedPayload,
    ShippingAddress, AGGREGATE_TYPE_ORDER, EVENT_ORDER_CREATED, EVENT_ORDER_STATUS_CHANGED,
};
use crate::error::MarketError;
use crate::lock::{cancel_order_key, create_order_key, status_order_key, LockCoordinator};
use crate::metrics::Metrics;
use crate::outbox::{OutboxEvent, OutboxEventService};
use crate::stock::StockLedger;
use crate::store::{MemberStore, OrderStore, Page, ProductStore};

// ============================================================================
// Order Service - Checkout Orchestration
// ============================================================================
//
// create_order admits stock through the ledger one line at a time and undoes
// every admitted line if anything later in the flow fails. The per-buyer
// lock serializes a buyer's own concurrent checkouts; correctness against
// other buyers comes from the ledger alone.
//
// ============================================================================

/// Lock timing for the multi-step order flows.
const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_LEASE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub buyer_id: Uuid,
    pub items: Vec<OrderLine>,
    pub shipping_address: ShippingAddress,
}

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn ProductStore>,
    members: Arc<dyn MemberStore>,
    stock: Arc<dyn StockLedger>,
    locks: Arc<dyn LockCoordinator>,
    outbox: Arc<dyn OutboxEventService>,
    metrics: Arc<Metrics>,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        products: Arc<dyn ProductStore>,
        members: Arc<dyn MemberStore>,
        stock: Arc<dyn StockLedger>,
        locks: Arc<dyn LockCoordinator>,
        outbox: Arc<dyn OutboxEventService>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            orders,
            products,
            members,
            stock,
            locks,
            outbox,
            metrics,
        }
    }

    /// Create an order: admit stock per line, snapshot product data into
    /// line items, and persist order plus outbox event atomically. Any
    /// failure after a successful decrement restores what was taken.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order, MarketError> {
        if request.items.is_empty() {
            return Err(MarketError::EmptyOrderItems);
        }

        let key = create_order_key(request.buyer_id);
        let guard = match self.locks.acquire(&key, LOCK_WAIT, LOCK_LEASE).await {
            Ok(guard) => {
                self.metrics
                    .lock_acquired
                    .with_label_values(&["create_order"])
                    .inc();
                guard
            }
            Err(e) => {
                self.metrics
                    .lock_timeouts
                    .with_label_values(&["create_order"])
                    .inc();
                return Err(e);
            }
        };

        let started = std::time::Instant::now();
        let result = self.create_order_locked(&request).await;
        self.locks.release(guard).await;
        self.metrics
            .record_operation_duration("create_order", started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                self.metrics.orders_created.inc();
                info!(
                    order_id = %order.id,
                    order_number = %order.order_number,
                    buyer_id = %order.buyer_id,
                    total = %order.total_amount,
                    "order created"
                );
            }
            Err(e) => {
                self.metrics.record_operation_failure("create_order", e.code());
            }
        }
        result
    }

    async fn create_order_locked(&self, request: &CreateOrderRequest) -> Result<Order, MarketError> {
        self.members
            .find_by_id(request.buyer_id)
            .await?
            .ok_or(MarketError::MemberNotFound)?;

        let mut order = Order::new(request.buyer_id, request.shipping_address.clone());
        // Lines admitted so far; unwound in reverse if the flow fails.
        let mut admitted: Vec<(Uuid, u32)> = Vec::new();

        for line in &request.items {
            let product = match self.products.find_by_id(line.product_id).await {
                Ok(Some(product)) => product,
                Ok(None) => {
                    self.compensate(&admitted).await;
                    return Err(MarketError::ProductNotFound);
                }
                Err(e) => {
                    self.compensate(&admitted).await;
                    return Err(e);
                }
            };

            let item = match OrderItem::snapshot(&product, line.quantity) {
                Ok(item) => item,
                Err(e) => {
                    self.compensate(&admitted).await;
                    return Err(e);
                }
            };

            match self.stock.try_decrement(line.product_id, line.quantity).await {
                Ok(n) if n > 0 => admitted.push((line.product_id, line.quantity)),
                Ok(_) => {
                    self.metrics.stock_rejections.inc();
                    self.compensate(&admitted).await;
                    return Err(MarketError::InsufficientStock(line.product_id));
                }
                Err(e) => {
                    self.compensate(&admitted).await;
                    return Err(e);
                }
            }

            order.add_item(item);
        }

        let payload = serde_json::to_value(OrderCreatedPayload::from_order(&order))
            .map_err(|e| MarketError::Internal(e.into()))?;
        let events = self.record_event(&order, EVENT_ORDER_CREATED, payload);

        if let Err(e) = self.orders.insert(&order, &events).await {
            self.compensate(&admitted).await;
            return Err(e);
        }

        Ok(order)
    }

    /// Cancel an order the buyer owns. Restores stock for every line, then
    /// persists the Cancelled state with its status event.
    pub async fn cancel_order(&self, order_id: Uuid, buyer_id: Uuid) -> Result<Order, MarketError> {
        let key = cancel_order_key(order_id);
        let guard = match self.locks.acquire(&key, LOCK_WAIT, LOCK_LEASE).await {
            Ok(guard) => {
                self.metrics
                    .lock_acquired
                    .with_label_values(&["cancel_order"])
                    .inc();
                guard
            }
            Err(e) => {
                self.metrics
                    .lock_timeouts
                    .with_label_values(&["cancel_order"])
                    .inc();
                return Err(e);
            }
        };

        let started = std::time::Instant::now();
        let result = self.cancel_order_locked(order_id, buyer_id).await;
        self.locks.release(guard).await;
        self.metrics
            .record_operation_duration("cancel_order", started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                self.metrics.orders_cancelled.inc();
                info!(order_id = %order.id, buyer_id = %buyer_id, "order cancelled");
            }
            Err(e) => {
                self.metrics.record_operation_failure("cancel_order", e.code());
            }
        }
        result
    }

    async fn cancel_order_locked(
        &self,
        order_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<Order, MarketError> {
        let mut order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(MarketError::OrderNotFound)?;

        if order.buyer_id != buyer_id {
            return Err(MarketError::OrderNotOwned);
        }
        if !order.can_be_cancelled() {
            return Err(MarketError::CannotCancelOrder);
        }

        // Restore before persisting Cancelled: a crash in between re-runs
        // the cancellation, and restore tolerates vanished products.
        for item in &order.items {
            if let Err(e) = self.stock.restore(item.product_id, item.quantity).await {
                warn!(
                    order_id = %order.id,
                    product_id = %item.product_id,
                    error = %e,
                    "stock restore failed during cancellation"
                );
            } else {
                self.metrics.stock_compensations.inc();
            }
        }

        order.cancel()?;

        let payload = serde_json::to_value(OrderStatusChangedPayload::from_order(&order))
            .map_err(|e| MarketError::Internal(e.into()))?;
        let events = self.record_event(&order, EVENT_ORDER_STATUS_CHANGED, payload);
        self.orders.update(&order, &events).await?;

        Ok(order)
    }

    /// Seller-side fulfilment progression. Read-modify-write on the order
    /// row, so it runs under the per-order status lock; otherwise two
    /// concurrent updates could persist a backward transition.
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        status: &str,
    ) -> Result<Order, MarketError> {
        let next = OrderStatus::parse(status)
            .ok_or_else(|| MarketError::InvalidOrderStatus(status.to_string()))?;

        let key = status_order_key(order_id);
        let guard = match self.locks.acquire(&key, LOCK_WAIT, LOCK_LEASE).await {
            Ok(guard) => {
                self.metrics
                    .lock_acquired
                    .with_label_values(&["update_status"])
                    .inc();
                guard
            }
            Err(e) => {
                self.metrics
                    .lock_timeouts
                    .with_label_values(&["update_status"])
                    .inc();
                return Err(e);
            }
        };

        let result = self.update_status_locked(order_id, seller_id, next).await;
        self.locks.release(guard).await;

        if let Err(e) = &result {
            self.metrics
                .record_operation_failure("update_status", e.code());
        }
        result
    }

    async fn update_status_locked(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        next: OrderStatus,
    ) -> Result<Order, MarketError> {
        let mut order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(MarketError::OrderNotFound)?;

        if !order.has_seller(seller_id) {
            return Err(MarketError::OrderNotOwned);
        }

        order.update_status(next)?;

        let payload = serde_json::to_value(OrderStatusChangedPayload::from_order(&order))
            .map_err(|e| MarketError::Internal(e.into()))?;
        let events = self.record_event(&order, EVENT_ORDER_STATUS_CHANGED, payload);
        self.orders.update(&order, &events).await?;

        info!(
            order_id = %order.id,
            status = %order.status.as_str(),
            "order status updated"
        );
        Ok(order)
    }

    /// Fetch one order, visible to its buyer and to any seller with a line
    /// item in it.
    pub async fn get_order(&self, order_id: Uuid, requester_id: Uuid) -> Result<Order, MarketError> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or(MarketError::OrderNotFound)?;

        if order.buyer_id != requester_id && !order.has_seller(requester_id) {
            return Err(MarketError::OrderNotOwned);
        }
        Ok(order)
    }

    pub async fn get_my_orders(&self, buyer_id: Uuid, page: Page) -> Result<Vec<Order>, MarketError> {
        self.orders.find_by_buyer(buyer_id, page).await
    }

    pub async fn get_seller_orders(
        &self,
        seller_id: Uuid,
        page: Page,
    ) -> Result<Vec<Order>, MarketError> {
        self.orders.find_by_seller(seller_id, page).await
    }

    fn record_event(
        &self,
        order: &Order,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Vec<OutboxEvent> {
        self.outbox
            .save_event(
                AGGREGATE_TYPE_ORDER,
                &order.id.to_string(),
                event_type,
                payload,
            )
            .into_iter()
            .collect()
    }

    /// Undo every decrement admitted so far. Restore failures are logged
    /// and swallowed; they cannot be allowed to mask the original error.
    async fn compensate(&self, admitted: &[(Uuid, u32)]) {
        for (product_id, quantity) in admitted.iter().rev() {
            match self.stock.restore(*product_id, *quantity).await {
                Ok(_) => self.metrics.stock_compensations.inc(),
                Err(e) => warn!(
                    product_id = %product_id,
                    quantity,
                    error = %e,
                    "stock compensation failed"
                ),
            }
        }
    }
}
