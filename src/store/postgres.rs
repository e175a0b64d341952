use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use super::{MemberStore, OrderStore, OutboxStore, Page, ProductStore};
use crate::domain::member::{Member, Role};
use crate::domain::order::{Order, OrderItem, OrderStatus, ShippingAddress};
use crate::domain::product::{Product, ProductStatus};
use crate::error::MarketError;
use crate::outbox::{OutboxEvent, OutboxStatus};

// ============================================================================
// Postgres Store
// ============================================================================
//
// An order mutation and its outbox rows commit in one transaction. The relay
// only ever sees events whose business change is already durable, which is
// the whole point of routing events through the outbox table.
//
// ============================================================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the tables on startup when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), MarketError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS members (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                role TEXT NOT NULL,
                business_number TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id UUID PRIMARY KEY,
                seller_id UUID NOT NULL,
                name TEXT NOT NULL,
                price NUMERIC(19, 2) NOT NULL,
                stock_quantity BIGINT NOT NULL,
                status TEXT NOT NULL,
                sales_count BIGINT NOT NULL DEFAULT 0,
                version BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id UUID PRIMARY KEY,
                buyer_id UUID NOT NULL,
                order_number TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                total_amount NUMERIC(19, 2) NOT NULL,
                zip_code TEXT NOT NULL,
                address TEXT NOT NULL,
                address_detail TEXT,
                receiver_name TEXT NOT NULL,
                receiver_phone TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_items (
                id UUID PRIMARY KEY,
                order_id UUID NOT NULL REFERENCES orders(id),
                product_id UUID NOT NULL,
                seller_id UUID NOT NULL,
                product_name TEXT NOT NULL,
                unit_price NUMERIC(19, 2) NOT NULL,
                quantity BIGINT NOT NULL,
                subtotal NUMERIC(19, 2) NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_events (
                id UUID PRIMARY KEY,
                aggregate_type TEXT NOT NULL,
                aggregate_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                processed_at TIMESTAMPTZ,
                retry_count BIGINT NOT NULL DEFAULT 0,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outbox_pending \
             ON outbox_events (created_at) WHERE status = 'PENDING'",
        )
        .execute(&self.pool)
        .await?;

        info!("database schema ready");
        Ok(())
    }

    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>, MarketError> {
        let rows = sqlx::query(
            "SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY product_name",
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let order_id: Uuid = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(item_from_row(&row)?);
        }
        Ok(items)
    }

    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Order>, MarketError> {
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            orders.push(order_from_row(row)?);
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items = self.load_items(&ids).await?;
        for order in &mut orders {
            order.items = items.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }
}

fn order_from_row(row: &PgRow) -> Result<Order, MarketError> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        buyer_id: row.try_get("buyer_id")?,
        order_number: row.try_get("order_number")?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| MarketError::InvalidOrderStatus(status))?,
        total_amount: row.try_get("total_amount")?,
        shipping_address: ShippingAddress {
            zip_code: row.try_get("zip_code")?,
            address: row.try_get("address")?,
            address_detail: row.try_get("address_detail")?,
            receiver_name: row.try_get("receiver_name")?,
            receiver_phone: row.try_get("receiver_phone")?,
        },
        items: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<OrderItem, MarketError> {
    let quantity: i64 = row.try_get("quantity")?;
    Ok(OrderItem {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        seller_id: row.try_get("seller_id")?,
        product_name: row.try_get("product_name")?,
        unit_price: row.try_get::<Decimal, _>("unit_price")?,
        quantity: quantity as u32,
        subtotal: row.try_get("subtotal")?,
    })
}

async fn insert_outbox_rows(
    tx: &mut Transaction<'_, Postgres>,
    outbox: &[OutboxEvent],
) -> Result<(), sqlx::Error> {
    for event in outbox {
        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, aggregate_type, aggregate_id, event_type, payload,
                 status, created_at, retry_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.created_at)
        .bind(event.retry_count as i64)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert(&self, order: &Order, outbox: &[OutboxEvent]) -> Result<(), MarketError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders
                (id, buyer_id, order_number, status, total_amount,
                 zip_code, address, address_detail, receiver_name, receiver_phone,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id)
        .bind(order.buyer_id)
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(order.total_amount)
        .bind(&order.shipping_address.zip_code)
        .bind(&order.shipping_address.address)
        .bind(&order.shipping_address.address_detail)
        .bind(&order.shipping_address.receiver_name)
        .bind(&order.shipping_address.receiver_phone)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items
                    (id, order_id, product_id, seller_id, product_name,
                     unit_price, quantity, subtotal)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id)
            .bind(order.id)
            .bind(item.product_id)
            .bind(item.seller_id)
            .bind(&item.product_name)
            .bind(item.unit_price)
            .bind(item.quantity as i64)
            .bind(item.subtotal)
            .execute(&mut *tx)
            .await?;
        }

        insert_outbox_rows(&mut tx, outbox).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, order: &Order, outbox: &[OutboxEvent]) -> Result<(), MarketError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MarketError::OrderNotFound);
        }

        insert_outbox_rows(&mut tx, outbox).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, order_id: Uuid) -> Result<Option<Order>, MarketError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_by_buyer(&self, buyer_id: Uuid, page: Page) -> Result<Vec<Order>, MarketError> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE buyer_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(buyer_id)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn find_by_seller(
        &self,
        seller_id: Uuid,
        page: Page,
    ) -> Result<Vec<Order>, MarketError> {
        let rows = sqlx::query(
            r#"
            SELECT o.* FROM orders o
            WHERE EXISTS (
                SELECT 1 FROM order_items i
                WHERE i.order_id = o.id AND i.seller_id = $1
            )
            ORDER BY o.created_at DESC LIMIT $2 OFFSET $3
            "#,
        )
        .bind(seller_id)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn find_by_id(&self, product_id: Uuid) -> Result<Option<Product>, MarketError> {
        let row = sqlx::query("SELECT * FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let status: String = row.try_get("status")?;
            let stock_quantity: i64 = row.try_get("stock_quantity")?;
            let sales_count: i64 = row.try_get("sales_count")?;
            Ok(Product {
                id: row.try_get("id")?,
                seller_id: row.try_get("seller_id")?,
                name: row.try_get("name")?,
                price: row.try_get("price")?,
                stock_quantity: stock_quantity as u32,
                status: ProductStatus::parse(&status)
                    .ok_or_else(|| MarketError::InvalidInput(format!("product status {status}")))?,
                sales_count: sales_count as u32,
                version: row.try_get("version")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl MemberStore for PgStore {
    async fn find_by_id(&self, member_id: Uuid) -> Result<Option<Member>, MarketError> {
        let row = sqlx::query("SELECT * FROM members WHERE id = $1")
            .bind(member_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let role: String = row.try_get("role")?;
            Ok(Member {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                role: Role::parse(&role)
                    .ok_or_else(|| MarketError::InvalidInput(format!("member role {role}")))?,
                business_number: row.try_get("business_number")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn fetch_retryable(&self, max_retry: u32) -> Result<Vec<OutboxEvent>, MarketError> {
        let rows = sqlx::query(
            "SELECT * FROM outbox_events \
             WHERE status = 'PENDING' AND retry_count < $1 \
             ORDER BY created_at",
        )
        .bind(max_retry as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(outbox_from_row).collect()
    }

    async fn mark_processed(&self, event_id: Uuid) -> Result<(), MarketError> {
        sqlx::query(
            "UPDATE outbox_events SET status = 'PROCESSED', processed_at = NOW() \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        event_id: Uuid,
        error: &str,
        max_retry: u32,
    ) -> Result<(), MarketError> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1,
                last_error = $2,
                status = CASE WHEN retry_count + 1 >= $3 THEN 'FAILED' ELSE status END
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(event_id)
        .bind(error)
        .bind(max_retry as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MarketError> {
        let result = sqlx::query(
            "DELETE FROM outbox_events WHERE status = 'PROCESSED' AND processed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxEvent, MarketError> {
    let status: String = row.try_get("status")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    Ok(OutboxEvent {
        id: row.try_get("id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        status: OutboxStatus::parse(&status)
            .ok_or_else(|| MarketError::InvalidInput(format!("outbox status {status}")))?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
        retry_count: retry_count as u32,
        last_error: row.try_get("last_error")?,
    })
}
