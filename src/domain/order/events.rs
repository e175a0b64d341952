use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregate::Order;

// ============================================================================
// Order Event Payloads
// ============================================================================
//
// These are the payloads recorded in the outbox and relayed to the bus.
// Field names are camelCase on the wire to match the existing consumers.
//
// ============================================================================

pub const EVENT_ORDER_CREATED: &str = "OrderCreated";
pub const EVENT_ORDER_STATUS_CHANGED: &str = "OrderStatusChanged";
pub const AGGREGATE_TYPE_ORDER: &str = "Order";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedPayload {
    pub order_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_ids: Vec<Uuid>,
    pub total_amount: Decimal,
    pub order_number: String,
}

impl OrderCreatedPayload {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            buyer_id: order.buyer_id,
            seller_ids: order.seller_ids(),
            total_amount: order.total_amount,
            order_number: order.order_number.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChangedPayload {
    pub order_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_ids: Vec<Uuid>,
    pub status: String,
    pub order_number: String,
}

impl OrderStatusChangedPayload {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            buyer_id: order.buyer_id,
            seller_ids: order.seller_ids(),
            status: order.status.as_str().to_string(),
            order_number: order.order_number.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderItem, ShippingAddress};
    use crate::domain::product::{Product, ProductStatus};

    #[test]
    fn test_created_payload_wire_format() {
        let product = Product::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "P",
            Decimal::new(500, 0),
            10,
            ProductStatus::OnSale,
        );
        let mut order = Order::new(
            Uuid::new_v4(),
            ShippingAddress {
                zip_code: "1".into(),
                address: "a".into(),
                address_detail: None,
                receiver_name: "r".into(),
                receiver_phone: "p".into(),
            },
        );
        order.add_item(OrderItem::snapshot(&product, 2).unwrap());

        let payload =
            serde_json::to_value(OrderCreatedPayload::from_order(&order)).unwrap();
        assert!(payload.get("orderId").is_some());
        assert!(payload.get("buyerId").is_some());
        assert!(payload.get("sellerIds").is_some());
        assert!(payload.get("totalAmount").is_some());
        assert!(payload.get("orderNumber").is_some());
    }
}
