use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::StockLedger;
use crate::error::MarketError;
use crate::store::MemStore;

/// Stock ledger over the shared in-memory store. The store mutex makes each
/// check-and-decrement exclusive per product, mirroring the single conditional
/// UPDATE the Postgres ledger issues.
#[derive(Clone)]
pub struct MemStockLedger {
    store: MemStore,
}

impl MemStockLedger {
    pub fn new(store: MemStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StockLedger for MemStockLedger {
    async fn try_decrement(&self, product_id: Uuid, quantity: u32) -> Result<u64, MarketError> {
        let decremented = self
            .store
            .with_product_mut(product_id, |product| product.try_decrease_stock(quantity))
            .ok_or(MarketError::ProductNotFound)?;

        if decremented {
            debug!(%product_id, quantity, "stock decremented");
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn restore(&self, product_id: Uuid, quantity: u32) -> Result<u64, MarketError> {
        match self
            .store
            .with_product_mut(product_id, |product| product.restore_stock(quantity))
        {
            Some(()) => {
                debug!(%product_id, quantity, "stock restored");
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::{Product, ProductStatus};
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn seeded(stock: u32) -> (MemStore, Uuid) {
        let store = MemStore::new();
        let product = Product::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Test Product",
            Decimal::new(1_000, 0),
            stock,
            ProductStatus::OnSale,
        );
        let id = product.id;
        store.seed_product(product);
        (store, id)
    }

    #[tokio::test]
    async fn test_decrement_then_restore_round_trip() {
        let (store, product_id) = seeded(10);
        let ledger = MemStockLedger::new(store.clone());

        assert_eq!(ledger.try_decrement(product_id, 4).await.unwrap(), 1);
        assert_eq!(ledger.restore(product_id, 4).await.unwrap(), 1);

        let product = store
            .with_product_mut(product_id, |p| p.clone())
            .unwrap();
        assert_eq!(product.stock_quantity, 10);
        assert_eq!(product.sales_count, 0);
    }

    #[tokio::test]
    async fn test_decrement_rejected_without_stock() {
        let (store, product_id) = seeded(3);
        let ledger = MemStockLedger::new(store);

        assert_eq!(ledger.try_decrement(product_id, 5).await.unwrap(), 0);
        assert_eq!(ledger.try_decrement(product_id, 3).await.unwrap(), 1);
        assert_eq!(ledger.try_decrement(product_id, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_product_is_an_error() {
        let ledger = MemStockLedger::new(MemStore::new());
        let result = ledger.try_decrement(Uuid::new_v4(), 1).await;
        assert!(matches!(result, Err(MarketError::ProductNotFound)));
    }

    #[tokio::test]
    async fn test_restore_tolerates_missing_product() {
        let ledger = MemStockLedger::new(MemStore::new());
        assert_eq!(ledger.restore(Uuid::new_v4(), 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_decrements_never_oversell() {
        let (store, product_id) = seeded(30);
        let ledger = Arc::new(MemStockLedger::new(store.clone()));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.try_decrement(product_id, 1).await.unwrap()
            }));
        }

        let mut admitted = 0u64;
        for handle in handles {
            admitted += handle.await.unwrap();
        }

        assert_eq!(admitted, 30);
        let remaining = store
            .with_product_mut(product_id, |p| (p.stock_quantity, p.status))
            .unwrap();
        assert_eq!(remaining.0, 0);
        assert_eq!(remaining.1, ProductStatus::SoldOut);
    }
}
