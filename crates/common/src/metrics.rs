use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_gauge,
    CounterVec, Encoder, Histogram, HistogramVec, IntGauge, TextEncoder,
};

lazy_static! {
    // Ingestion metrics
    pub static ref INGEST_COUNTER: CounterVec = register_counter_vec!(
        "orders_ingested_total",
        "Total number of stream messages handled, by outcome",
        &["status"]
    )
    .expect("metric cannot be created");

    pub static ref INGEST_DURATION: Histogram = register_histogram!(
        "order_ingest_duration_seconds",
        "Time spent handling one stream message in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("metric cannot be created");

    // Cache metrics
    pub static ref CACHE_REQUEST_COUNTER: CounterVec = register_counter_vec!(
        "order_cache_requests_total",
        "Total number of cache lookups",
        &["status"]
    )
    .expect("metric cannot be created");

    pub static ref CACHE_ENTRIES: IntGauge = register_int_gauge!(
        "order_cache_entries",
        "Number of orders held in the in-memory cache"
    )
    .expect("metric cannot be created");

    // Store metrics
    pub static ref STORE_OPERATIONS: CounterVec = register_counter_vec!(
        "order_store_operations_total",
        "Total number of durable store operations",
        &["operation", "status"]
    )
    .expect("metric cannot be created");

    pub static ref STORE_DURATION: HistogramVec = register_histogram_vec!(
        "order_store_duration_seconds",
        "Durable store operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
    )
    .expect("metric cannot be created");

    // HTTP lookup metrics
    pub static ref LOOKUP_COUNTER: CounterVec = register_counter_vec!(
        "order_lookups_total",
        "Total number of order lookups served over HTTP",
        &["status"]
    )
    .expect("metric cannot be created");
}

/// Get all metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the outcome of one ingested message
pub fn record_ingest(status: &str, duration_secs: f64) {
    INGEST_COUNTER.with_label_values(&[status]).inc();
    INGEST_DURATION.observe(duration_secs);
}

pub fn record_cache_request(hit: bool) {
    let status = if hit { "hit" } else { "miss" };
    CACHE_REQUEST_COUNTER.with_label_values(&[status]).inc();
}

pub fn set_cache_entries(entries: usize) {
    CACHE_ENTRIES.set(entries as i64);
}

/// Record a durable store operation
pub fn record_store_operation(operation: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "error" };
    STORE_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
    STORE_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

pub fn record_lookup(status: &str) {
    LOOKUP_COUNTER.with_label_values(&[status]).inc();
}
