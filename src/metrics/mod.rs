// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Order operations (throughput, latency, rejections)
// - Stock admission outcomes
// - Outbox relay progress (published, retried, exhausted, reclaimed)
// - Distributed lock contention
// - Circuit breaker and bulkhead state
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Order Metrics
    pub orders_created: IntCounter,
    pub orders_cancelled: IntCounter,
    pub order_operations_failed: IntCounterVec,
    pub order_processing_duration: HistogramVec,

    // Stock Metrics
    pub stock_rejections: IntCounter,
    pub stock_compensations: IntCounter,

    // Outbox Metrics
    pub outbox_published: IntCounterVec,
    pub outbox_retries: IntCounter,
    pub outbox_exhausted: IntCounterVec,
    pub outbox_reclaimed: IntCounter,

    // Lock Metrics
    pub lock_acquired: IntCounterVec,
    pub lock_timeouts: IntCounterVec,

    // Resilience Metrics
    pub circuit_breaker_state: IntGauge,
    pub bulkhead_rejections: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Order Metrics
        let orders_created = IntCounter::new("orders_created_total", "Total orders created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let orders_cancelled =
            IntCounter::new("orders_cancelled_total", "Total orders cancelled")?;
        registry.register(Box::new(orders_cancelled.clone()))?;

        let order_operations_failed = IntCounterVec::new(
            Opts::new("order_operations_failed_total", "Order operations that returned an error"),
            &["operation", "code"],
        )?;
        registry.register(Box::new(order_operations_failed.clone()))?;

        let order_processing_duration = HistogramVec::new(
            HistogramOpts::new("order_processing_duration_seconds", "Order operation duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(order_processing_duration.clone()))?;

        // Stock Metrics
        let stock_rejections = IntCounter::new(
            "stock_rejections_total",
            "Decrement attempts rejected for insufficient stock",
        )?;
        registry.register(Box::new(stock_rejections.clone()))?;

        let stock_compensations = IntCounter::new(
            "stock_compensations_total",
            "Stock restorations issued to undo partial orders",
        )?;
        registry.register(Box::new(stock_compensations.clone()))?;

        // Outbox Metrics
        let outbox_published = IntCounterVec::new(
            Opts::new("outbox_published_total", "Outbox events published to the broker"),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_published.clone()))?;

        let outbox_retries =
            IntCounter::new("outbox_retries_total", "Outbox publish attempts that failed")?;
        registry.register(Box::new(outbox_retries.clone()))?;

        let outbox_exhausted = IntCounterVec::new(
            Opts::new("outbox_exhausted_total", "Outbox events parked FAILED after max retries"),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_exhausted.clone()))?;

        let outbox_reclaimed = IntCounter::new(
            "outbox_reclaimed_total",
            "Processed outbox rows removed by the retention sweep",
        )?;
        registry.register(Box::new(outbox_reclaimed.clone()))?;

        // Lock Metrics
        let lock_acquired = IntCounterVec::new(
            Opts::new("lock_acquired_total", "Distributed locks acquired"),
            &["operation"],
        )?;
        registry.register(Box::new(lock_acquired.clone()))?;

        let lock_timeouts = IntCounterVec::new(
            Opts::new("lock_timeouts_total", "Lock acquisitions that timed out waiting"),
            &["operation"],
        )?;
        registry.register(Box::new(lock_timeouts.clone()))?;

        // Resilience Metrics
        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        let bulkhead_rejections = IntCounter::new(
            "bulkhead_rejections_total",
            "Calls rejected because all bulkhead permits were in use",
        )?;
        registry.register(Box::new(bulkhead_rejections.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            orders_cancelled,
            order_operations_failed,
            order_processing_duration,
            stock_rejections,
            stock_compensations,
            outbox_published,
            outbox_retries,
            outbox_exhausted,
            outbox_reclaimed,
            lock_acquired,
            lock_timeouts,
            circuit_breaker_state,
            bulkhead_rejections,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_operation_failure(&self, operation: &str, code: &str) {
        self.order_operations_failed
            .with_label_values(&[operation, code])
            .inc();
    }

    pub fn record_operation_duration(&self, operation: &str, duration_secs: f64) {
        self.order_processing_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    pub fn update_circuit_breaker_state(&self, state: u8) {
        self.circuit_breaker_state.set(state as i64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
