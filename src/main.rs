use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod domain;
mod error;
mod lock;
mod messaging;
mod metrics;
mod outbox;
mod service;
mod stock;
mod store;
mod utils;

use config::{AppConfig, LockMode, OutboxMode, Profile};
use domain::member::Member;
use domain::order::ShippingAddress;
use domain::product::{Product, ProductStatus};
use lock::{LocalLockCoordinator, LockCoordinator, NoopLockCoordinator, RedisLockCoordinator};
use messaging::{EventPublisher, KafkaPublisher, LogPublisher};
use outbox::{DurableOutbox, OutboxEventService, OutboxRelay, PassthroughOutbox, RelayConfig};
use service::{CreateOrderRequest, OrderLine, OrderService, ResilienceConfig, ResilientOrderService};
use stock::{MemStockLedger, PgStockLedger, StockLedger};
use store::{MemStore, MemberStore, OrderStore, OutboxStore, PgStore, ProductStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,marketplace_core=debug")),
        )
        .init();

    let config = AppConfig::from_env();
    tracing::info!(profile = ?config.profile, "Starting marketplace core");

    // === 1. Initialize Prometheus metrics ===
    let metrics = Arc::new(metrics::Metrics::new()?);

    // Start metrics HTTP server in background thread
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("metrics runtime");
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 2. Wire stores and messaging for the active profile ===
    let (orders, products, members, stock, outbox_store, publisher): (
        Arc<dyn OrderStore>,
        Arc<dyn ProductStore>,
        Arc<dyn MemberStore>,
        Arc<dyn StockLedger>,
        Arc<dyn OutboxStore>,
        Arc<dyn EventPublisher>,
    ) = match config.profile {
        Profile::Prod => {
            tracing::info!("Connecting to Postgres...");
            let pool = PgPoolOptions::new()
                .max_connections(16)
                .connect(&config.database_url)
                .await?;
            let store = PgStore::new(pool.clone());
            store.ensure_schema().await?;
            let store = Arc::new(store);

            let publisher = Arc::new(KafkaPublisher::new(&config.kafka_brokers)?);

            (
                store.clone(),
                store.clone(),
                store.clone(),
                Arc::new(PgStockLedger::new(pool)),
                store,
                publisher,
            )
        }
        Profile::Local => {
            tracing::info!("Using in-memory stores");
            let store = Arc::new(MemStore::new());
            seed_demo_data(&store);
            (
                store.clone(),
                store.clone(),
                store.clone(),
                Arc::new(MemStockLedger::new((*store).clone())),
                store,
                Arc::new(LogPublisher::new()),
            )
        }
    };

    let locks: Arc<dyn LockCoordinator> = match config.lock_mode {
        LockMode::Redis => {
            tracing::info!("Connecting to Redis...");
            Arc::new(RedisLockCoordinator::connect(&config.redis_url).await?)
        }
        LockMode::InProcess => Arc::new(LocalLockCoordinator::new()),
        LockMode::Disabled => {
            tracing::warn!("Lock coordination disabled");
            Arc::new(NoopLockCoordinator)
        }
    };

    let outbox: Arc<dyn OutboxEventService> = match config.outbox_mode {
        OutboxMode::Durable => Arc::new(DurableOutbox),
        OutboxMode::Passthrough => {
            tracing::warn!("Pass-through outbox, events will not be relayed");
            Arc::new(PassthroughOutbox)
        }
    };

    // === 3. Start the outbox relay ===
    let relay = Arc::new(OutboxRelay::new(
        outbox_store,
        publisher,
        metrics.clone(),
        RelayConfig {
            poll_interval: config.relay_poll_interval,
            cleanup_interval: config.relay_cleanup_interval,
            retention: config.outbox_retention,
            ..RelayConfig::default()
        },
    ));
    relay.spawn();

    // === 4. Assemble the order service behind its resilience shell ===
    let order_service = Arc::new(OrderService::new(
        orders,
        products,
        members,
        stock,
        locks,
        outbox,
        metrics.clone(),
    ));
    let service = Arc::new(ResilientOrderService::new(
        order_service,
        ResilienceConfig {
            bulkhead_permits: config.bulkhead_permits,
            ..ResilienceConfig::default()
        },
        metrics,
    ));

    if config.profile == Profile::Local {
        run_demo(&service).await;
    }

    tracing::info!("Marketplace core running; press Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}

const DEMO_BUYER: uuid::Uuid = uuid::Uuid::from_u128(0x01);
const DEMO_PRODUCT: uuid::Uuid = uuid::Uuid::from_u128(0x02);
const DEMO_SELLER: uuid::Uuid = uuid::Uuid::from_u128(0x03);

fn seed_demo_data(store: &MemStore) {
    store.seed_member(Member::buyer(DEMO_BUYER, "buyer@example.com"));
    store.seed_product(Product::new(
        DEMO_PRODUCT,
        DEMO_SELLER,
        "Demo Widget",
        rust_decimal::Decimal::new(12_500, 0),
        30,
        ProductStatus::OnSale,
    ));
}

/// Walks one order through create, confirm, and cancel so a local run shows
/// the full flow, including relay output in the log.
async fn run_demo(service: &ResilientOrderService) {
    let request = CreateOrderRequest {
        buyer_id: DEMO_BUYER,
        items: vec![OrderLine {
            product_id: DEMO_PRODUCT,
            quantity: 2,
        }],
        shipping_address: ShippingAddress {
            zip_code: "04524".into(),
            address: "123 Demo Street".into(),
            address_detail: None,
            receiver_name: "Demo Buyer".into(),
            receiver_phone: "010-0000-0000".into(),
        },
    };

    match service.create_order(request).await {
        Ok(order) => {
            tracing::info!(order_id = %order.id, order_number = %order.order_number, "demo order created");

            if let Err(e) = service
                .update_order_status(order.id, DEMO_SELLER, "CONFIRMED")
                .await
            {
                tracing::error!(error = %e, "demo status update failed");
            }

            match service.cancel_order(order.id, DEMO_BUYER).await {
                Ok(order) => {
                    tracing::info!(order_id = %order.id, "demo order cancelled, stock restored")
                }
                Err(e) => tracing::error!(error = %e, "demo cancel failed"),
            }

            match service.get_my_orders(DEMO_BUYER, store::Page::default()).await {
                Ok(orders) => tracing::info!(count = orders.len(), "demo buyer order history"),
                Err(e) => tracing::error!(error = %e, "demo listing failed"),
            }
        }
        Err(e) => tracing::error!(error = %e, "demo order failed"),
    }
}
