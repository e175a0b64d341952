use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Product - The Stock Counter
// ============================================================================
//
// Stock invariants live here; every ledger implementation applies these same
// rules inside its own atomic step:
// - quantity never goes below zero
// - SoldOut exactly when an on-sale product's quantity hits zero
// - restore flips SoldOut back to OnSale and floors sales_count at zero
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductStatus {
    Draft,
    OnSale,
    SoldOut,
    Deleted,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Draft => "DRAFT",
            ProductStatus::OnSale => "ON_SALE",
            ProductStatus::SoldOut => "SOLD_OUT",
            ProductStatus::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(ProductStatus::Draft),
            "ON_SALE" => Some(ProductStatus::OnSale),
            "SOLD_OUT" => Some(ProductStatus::SoldOut),
            "DELETED" => Some(ProductStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub stock_quantity: u32,
    pub status: ProductStatus,
    pub sales_count: u32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(
        id: Uuid,
        seller_id: Uuid,
        name: impl Into<String>,
        price: Decimal,
        stock_quantity: u32,
        status: ProductStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            seller_id,
            name: name.into(),
            price,
            stock_quantity,
            status,
            sales_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check-and-decrement in one call. Returns false (and leaves the counter
    /// untouched) unless the product is on sale with enough stock. Callers
    /// must hold whatever guard makes this call exclusive per product.
    pub fn try_decrease_stock(&mut self, quantity: u32) -> bool {
        if self.status != ProductStatus::OnSale || self.stock_quantity < quantity {
            return false;
        }
        self.stock_quantity -= quantity;
        self.sales_count += quantity;
        if self.stock_quantity == 0 {
            self.status = ProductStatus::SoldOut;
        }
        self.version += 1;
        self.updated_at = Utc::now();
        true
    }

    /// Compensation path; always succeeds for an existing product.
    pub fn restore_stock(&mut self, quantity: u32) {
        self.stock_quantity += quantity;
        self.sales_count = self.sales_count.saturating_sub(quantity);
        if self.status == ProductStatus::SoldOut && self.stock_quantity > 0 {
            self.status = ProductStatus::OnSale;
        }
        self.version += 1;
        self.updated_at = Utc::now();
    }
}
