use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::StockLedger;
use crate::error::MarketError;

// ============================================================================
// Postgres Stock Ledger
// ============================================================================
//
// Admission control is a single conditional UPDATE. The WHERE clause carries
// the stock check, so two concurrent buyers racing for the last unit resolve
// inside the database: exactly one statement reports an affected row. No
// row lock is held across application code.
//
// ============================================================================

#[derive(Clone)]
pub struct PgStockLedger {
    pool: PgPool,
}

impl PgStockLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockLedger for PgStockLedger {
    async fn try_decrement(&self, product_id: Uuid, quantity: u32) -> Result<u64, MarketError> {
        let quantity = quantity as i64;
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2,
                sales_count = sales_count + $2,
                status = CASE WHEN stock_quantity - $2 = 0 THEN 'SOLD_OUT' ELSE status END,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'ON_SALE'
              AND stock_quantity >= $2
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        let affected = result.rows_affected();
        if affected == 0 {
            // Distinguish a missing product from a legitimate rejection.
            let exists: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM products WHERE id = $1")
                    .bind(product_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                return Err(MarketError::ProductNotFound);
            }
        } else {
            debug!(%product_id, quantity, "stock decremented");
        }
        Ok(affected)
    }

    async fn restore(&self, product_id: Uuid, quantity: u32) -> Result<u64, MarketError> {
        let quantity = quantity as i64;
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2,
                sales_count = GREATEST(sales_count - $2, 0),
                status = CASE WHEN status = 'SOLD_OUT' THEN 'ON_SALE' ELSE status END,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(%product_id, quantity, "stock restored");
        }
        Ok(result.rows_affected())
    }
}
