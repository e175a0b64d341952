use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::product::Product;
use crate::error::MarketError;

// ============================================================================
// Order Aggregate - Status Machine and Total Computation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderStatus::Pending),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "SHIPPED" => Some(OrderStatus::Shipped),
            "DELIVERED" => Some(OrderStatus::Delivered),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Position along the fulfilment progression. Cancelled sits outside the
    /// progression and is only reachable through `Order::cancel`.
    fn rank(&self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Confirmed => Some(1),
            OrderStatus::Shipped => Some(2),
            OrderStatus::Delivered => Some(3),
            OrderStatus::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub zip_code: String,
    pub address: String,
    pub address_detail: Option<String>,
    pub receiver_name: String,
    pub receiver_phone: String,
}

/// Line item with name and price snapshotted at order time. The snapshot is
/// the historical record: later product edits never touch it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub seller_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub subtotal: Decimal,
}

impl OrderItem {
    pub fn snapshot(product: &Product, quantity: u32) -> Result<Self, MarketError> {
        if quantity == 0 {
            return Err(MarketError::InvalidInput(
                "order item quantity must be positive".into(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            product_id: product.id,
            seller_id: product.seller_id,
            product_name: product.name.clone(),
            unit_price: product.price,
            quantity,
            subtotal: product.price * Decimal::from(quantity),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(buyer_id: Uuid, shipping_address: ShippingAddress) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            buyer_id,
            order_number: generate_order_number(),
            status: OrderStatus::Pending,
            total_amount: Decimal::ZERO,
            shipping_address,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a line item and recompute the total. Must be called for every
    /// item before the order is persisted; partially-built orders never
    /// leave the orchestrator.
    pub fn add_item(&mut self, item: OrderItem) {
        self.items.push(item);
        self.total_amount = self.items.iter().map(|i| i.subtotal).sum();
    }

    pub fn can_be_cancelled(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// Legal only from Pending or Confirmed. Stock for a cancelled order has
    /// been restored; the status is terminal for stock purposes.
    pub fn cancel(&mut self) -> Result<(), MarketError> {
        if !self.can_be_cancelled() {
            return Err(MarketError::CannotCancelOrder);
        }
        self.status = OrderStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move forward along Pending -> Confirmed -> Shipped -> Delivered.
    /// Backward moves, no-op moves, and anything involving Cancelled are
    /// rejected; cancellation only happens through `cancel`.
    pub fn update_status(&mut self, new_status: OrderStatus) -> Result<(), MarketError> {
        let (Some(current), Some(next)) = (self.status.rank(), new_status.rank()) else {
            return Err(MarketError::InvalidOrderStatus(
                new_status.as_str().to_string(),
            ));
        };
        if next <= current {
            return Err(MarketError::InvalidOrderStatus(
                new_status.as_str().to_string(),
            ));
        }
        self.status = new_status;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn seller_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.items.iter().map(|i| i.seller_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn has_seller(&self, seller_id: Uuid) -> bool {
        self.items.iter().any(|i| i.seller_id == seller_id)
    }
}

/// 16-character uppercase hex token, unique per order.
fn generate_order_number() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_uppercase()
}
