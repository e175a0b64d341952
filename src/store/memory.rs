use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{MemberStore, OrderStore, OutboxStore, Page, ProductStore};
use crate::domain::member::Member;
use crate::domain::order::Order;
use crate::domain::product::Product;
use crate::error::MarketError;
use crate::outbox::{OutboxEvent, OutboxStatus};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// All state sits behind one mutex, so an order insert and its outbox rows
// become visible together - the same atomicity the Postgres variant gets
// from a transaction. The in-memory stock ledger shares this state, which
// keeps product snapshots and counter mutations consistent in dev mode.
//
// ============================================================================

#[derive(Default)]
struct MemState {
    members: HashMap<Uuid, Member>,
    products: HashMap<Uuid, Product>,
    orders: HashMap<Uuid, Order>,
    outbox: HashMap<Uuid, OutboxEvent>,
}

#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Seeding helpers for dev mode and tests.

    pub fn seed_member(&self, member: Member) {
        self.state
            .lock()
            .expect("store poisoned")
            .members
            .insert(member.id, member);
    }

    pub fn seed_product(&self, product: Product) {
        self.state
            .lock()
            .expect("store poisoned")
            .products
            .insert(product.id, product);
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().expect("store poisoned").orders.len()
    }

    pub fn outbox_events(&self) -> Vec<OutboxEvent> {
        let mut events: Vec<OutboxEvent> = self
            .state
            .lock()
            .expect("store poisoned")
            .outbox
            .values()
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        events
    }

    /// Single entry point for the in-memory stock ledger: the closure runs
    /// with the mutex held, making check-and-update indivisible.
    pub(crate) fn with_product_mut<R>(
        &self,
        product_id: Uuid,
        f: impl FnOnce(&mut Product) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock().expect("store poisoned");
        state.products.get_mut(&product_id).map(f)
    }
}

#[async_trait]
impl OrderStore for MemStore {
    async fn insert(&self, order: &Order, outbox: &[OutboxEvent]) -> Result<(), MarketError> {
        let mut state = self.state.lock().expect("store poisoned");
        state.orders.insert(order.id, order.clone());
        for event in outbox {
            state.outbox.insert(event.id, event.clone());
        }
        Ok(())
    }

    async fn update(&self, order: &Order, outbox: &[OutboxEvent]) -> Result<(), MarketError> {
        let mut state = self.state.lock().expect("store poisoned");
        if !state.orders.contains_key(&order.id) {
            return Err(MarketError::OrderNotFound);
        }
        state.orders.insert(order.id, order.clone());
        for event in outbox {
            state.outbox.insert(event.id, event.clone());
        }
        Ok(())
    }

    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>, MarketError> {
        let state = self.state.lock().expect("store poisoned");
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn find_by_buyer(&self, buyer_id: Uuid, page: Page) -> Result<Vec<Order>, MarketError> {
        let state = self.state.lock().expect("store poisoned");
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.buyer_id == buyer_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(orders, page))
    }

    async fn find_by_seller(
        &self,
        seller_id: Uuid,
        page: Page,
    ) -> Result<Vec<Order>, MarketError> {
        let state = self.state.lock().expect("store poisoned");
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.has_seller(seller_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(orders, page))
    }
}

fn paginate(orders: Vec<Order>, page: Page) -> Vec<Order> {
    orders
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

#[async_trait]
impl ProductStore for MemStore {
    async fn find_by_id(&self, product_id: Uuid) -> Result<Option<Product>, MarketError> {
        let state = self.state.lock().expect("store poisoned");
        Ok(state.products.get(&product_id).cloned())
    }
}

#[async_trait]
impl MemberStore for MemStore {
    async fn find_by_id(&self, member_id: Uuid) -> Result<Option<Member>, MarketError> {
        let state = self.state.lock().expect("store poisoned");
        Ok(state.members.get(&member_id).cloned())
    }
}

#[async_trait]
impl OutboxStore for MemStore {
    async fn fetch_retryable(&self, max_retry: u32) -> Result<Vec<OutboxEvent>, MarketError> {
        let state = self.state.lock().expect("store poisoned");
        let mut events: Vec<OutboxEvent> = state
            .outbox
            .values()
            .filter(|e| e.status == OutboxStatus::Pending && e.retry_count < max_retry)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn mark_processed(&self, event_id: Uuid) -> Result<(), MarketError> {
        let mut state = self.state.lock().expect("store poisoned");
        if let Some(event) = state.outbox.get_mut(&event_id) {
            if event.status == OutboxStatus::Pending {
                event.mark_processed();
            }
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        error: &str,
        max_retry: u32,
    ) -> Result<(), MarketError> {
        let mut state = self.state.lock().expect("store poisoned");
        if let Some(event) = state.outbox.get_mut(&event_id) {
            if event.status == OutboxStatus::Pending {
                event.mark_failed(error, max_retry);
            }
        }
        Ok(())
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MarketError> {
        let mut state = self.state.lock().expect("store poisoned");
        let before = state.outbox.len();
        state.outbox.retain(|_, e| {
            !(e.status == OutboxStatus::Processed
                && e.processed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        Ok((before - state.outbox.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::ShippingAddress;
    use crate::domain::product::ProductStatus;
    use rust_decimal::Decimal;

    fn address() -> ShippingAddress {
        ShippingAddress {
            zip_code: "12345".into(),
            address: "addr".into(),
            address_detail: None,
            receiver_name: "r".into(),
            receiver_phone: "p".into(),
        }
    }

    #[tokio::test]
    async fn test_insert_persists_order_and_outbox_together() {
        let store = MemStore::new();
        let order = Order::new(Uuid::new_v4(), address());
        let event = OutboxEvent::new("Order", &order.id.to_string(), "OrderCreated", "{}".into());

        store.insert(&order, std::slice::from_ref(&event)).await.unwrap();

        assert!(store.find_by_id(order.id).await.unwrap().is_some());
        let events = store.outbox_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event.id);
    }

    #[tokio::test]
    async fn test_update_missing_order_fails() {
        let store = MemStore::new();
        let order = Order::new(Uuid::new_v4(), address());
        let result = store.update(&order, &[]).await;
        assert!(matches!(result, Err(MarketError::OrderNotFound)));
    }

    #[tokio::test]
    async fn test_find_by_buyer_newest_first() {
        let store = MemStore::new();
        let buyer = Uuid::new_v4();
        let mut first = Order::new(buyer, address());
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = Order::new(buyer, address());

        store.insert(&first, &[]).await.unwrap();
        store.insert(&second, &[]).await.unwrap();

        let orders = store.find_by_buyer(buyer, Page::default()).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, second.id);
    }

    #[tokio::test]
    async fn test_find_by_seller_matches_line_items() {
        use crate::domain::order::OrderItem;

        let store = MemStore::new();
        let seller = Uuid::new_v4();
        let product = Product::new(
            Uuid::new_v4(),
            seller,
            "P",
            Decimal::new(100, 0),
            5,
            ProductStatus::OnSale,
        );
        let mut order = Order::new(Uuid::new_v4(), address());
        order.add_item(OrderItem::snapshot(&product, 1).unwrap());
        store.insert(&order, &[]).await.unwrap();

        let found = store.find_by_seller(seller, Page::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        let none = store
            .find_by_seller(Uuid::new_v4(), Page::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_retryable_skips_exhausted_and_processed() {
        let store = MemStore::new();
        let order = Order::new(Uuid::new_v4(), address());

        let pending = OutboxEvent::new("Order", "a", "OrderCreated", "{}".into());
        let mut processed = OutboxEvent::new("Order", "b", "OrderCreated", "{}".into());
        processed.mark_processed();
        let mut exhausted = OutboxEvent::new("Order", "c", "OrderCreated", "{}".into());
        for _ in 0..5 {
            exhausted.mark_failed("boom", 5);
        }

        store
            .insert(&order, &[pending.clone(), processed, exhausted])
            .await
            .unwrap();

        let retryable = store.fetch_retryable(5).await.unwrap();
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].id, pending.id);
    }

    #[tokio::test]
    async fn test_retention_sweep_only_removes_old_processed() {
        let store = MemStore::new();
        let order = Order::new(Uuid::new_v4(), address());

        let mut old = OutboxEvent::new("Order", "a", "OrderCreated", "{}".into());
        old.mark_processed();
        old.processed_at = Some(Utc::now() - chrono::Duration::days(10));
        let mut fresh = OutboxEvent::new("Order", "b", "OrderCreated", "{}".into());
        fresh.mark_processed();
        let pending = OutboxEvent::new("Order", "c", "OrderCreated", "{}".into());

        store.insert(&order, &[old, fresh, pending]).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let deleted = store.delete_processed_before(cutoff).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.outbox_events().len(), 2);
    }
}
