//! Prometheus metrics for the publish path.
//!
//! All metrics live in a custom registry with the `tidemq` prefix so they do
//! not collide with metrics of embedding applications. A metric that fails to
//! register is still usable; it is just absent from the registry.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder, opts,
};
use tracing::warn;

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("tidemq".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

macro_rules! define_gauge {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntGauge> =
            Lazy::new(|| register_int_gauge_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Connection metrics
// =============================================================================

define_gauge!(
    ACTIVE_CONNECTIONS,
    "active_connections",
    "Number of open publish connections"
);
define_counter_vec!(
    TOTAL_CONNECTIONS,
    "total_connections",
    "Publish connections seen, by accepted or rejected",
    ["status"]
);

// =============================================================================
// Partition metrics
// =============================================================================

define_gauge!(
    LOCAL_PARTITIONS,
    "local_partitions",
    "Partitions currently active on this broker"
);
define_counter_vec!(
    PARTITION_ACTIVATIONS,
    "partition_activations_total",
    "Slow-path partition activations by result",
    ["result"]
);
define_histogram_vec!(
    ACTIVATION_DURATION,
    "partition_activation_duration_seconds",
    "Time spent reading assignments and opening logs",
    ["result"],
    [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
);
define_counter!(
    PARTITION_SHUTDOWNS,
    "partition_shutdowns_total",
    "Partitions torn down after their last dependent left"
);

// =============================================================================
// Publish session metrics
// =============================================================================

define_gauge!(
    ACTIVE_PUBLISHERS,
    "active_publishers",
    "Registered publisher sessions"
);
define_counter_vec!(
    MESSAGES_PUBLISHED,
    "messages_published_total",
    "Messages appended to partition logs",
    ["topic"]
);
define_counter_vec!(
    BYTES_PUBLISHED,
    "bytes_published_total",
    "Key and value bytes appended to partition logs",
    ["topic"]
);
define_counter!(ACKS_SENT, "acks_sent_total", "Ack responses enqueued");
define_counter!(
    HEARTBEATS_SENT,
    "heartbeats_sent_total",
    "Heartbeat responses sent on idle streams"
);
define_counter!(
    RESPONSE_SEND_FAILURES,
    "response_send_failures_total",
    "Responses that could not be written to the client"
);
define_histogram_vec!(
    SESSION_DURATION,
    "publish_session_duration_seconds",
    "Lifetime of publish sessions by outcome",
    ["outcome"],
    [0.01, 0.1, 1.0, 10.0, 60.0, 600.0, 3600.0]
);

// =============================================================================
// Recording helpers
// =============================================================================

pub fn record_activation(result: &str, duration_secs: f64) {
    PARTITION_ACTIVATIONS.with_label_values(&[result]).inc();
    ACTIVATION_DURATION
        .with_label_values(&[result])
        .observe(duration_secs);
}

pub fn record_publish(topic: &str, bytes: usize) {
    MESSAGES_PUBLISHED.with_label_values(&[topic]).inc();
    BYTES_PUBLISHED
        .with_label_values(&[topic])
        .inc_by(bytes as u64);
}

pub fn record_session_end(outcome: &str, duration_secs: f64) {
    SESSION_DURATION
        .with_label_values(&[outcome])
        .observe(duration_secs);
}

// =============================================================================
// Safe registration
// =============================================================================

fn register_int_gauge_safe(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric name/help should be valid");
    if let Err(e) = registry.register(Box::new(gauge.clone())) {
        warn!(name, error = %e, "Failed to register IntGauge metric, using unregistered fallback");
    }
    gauge
}

fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(name, error = %e, "Failed to register IntCounter metric, using unregistered fallback");
    }
    counter
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
    }
    counter
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    if let Err(e) = registry.register(Box::new(histogram.clone())) {
        warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
    }
    histogram
}

/// Force registration so every metric shows up in the first scrape.
pub fn init_metrics() {
    let _ = &*ACTIVE_CONNECTIONS;
    let _ = &*TOTAL_CONNECTIONS;
    let _ = &*LOCAL_PARTITIONS;
    let _ = &*PARTITION_ACTIVATIONS;
    let _ = &*ACTIVATION_DURATION;
    let _ = &*PARTITION_SHUTDOWNS;
    let _ = &*ACTIVE_PUBLISHERS;
    let _ = &*MESSAGES_PUBLISHED;
    let _ = &*BYTES_PUBLISHED;
    let _ = &*ACKS_SENT;
    let _ = &*HEARTBEATS_SENT;
    let _ = &*RESPONSE_SEND_FAILURES;
    let _ = &*SESSION_DURATION;
}

/// Render the registry in the Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn gather_metrics() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_use_custom_prefix() {
        init_metrics();
        ACKS_SENT.inc();
        let names: Vec<String> = gather_metrics()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.iter().all(|n| n.starts_with("tidemq_")));
        assert!(names.contains(&"tidemq_acks_sent_total".to_string()));
    }

    #[test]
    fn test_record_publish_counts_messages_and_bytes() {
        let before = MESSAGES_PUBLISHED.with_label_values(&["metrics.test"]).get();
        record_publish("metrics.test", 12);
        record_publish("metrics.test", 3);
        assert_eq!(
            MESSAGES_PUBLISHED.with_label_values(&["metrics.test"]).get(),
            before + 2
        );
        assert!(BYTES_PUBLISHED.with_label_values(&["metrics.test"]).get() >= 15);
    }

    #[test]
    fn test_encode_metrics_text_format() {
        record_activation("ok", 0.002);
        let text = encode_metrics().unwrap();
        assert!(text.contains("tidemq_partition_activations_total"));
        assert!(text.contains("result=\"ok\""));
    }

    #[test]
    fn test_double_registration_falls_back() {
        let registry = Registry::new();
        let first = register_int_gauge_safe(&registry, "dup_gauge", "first");
        let gauge = register_int_gauge_safe(&registry, "dup_gauge", "second");
        first.set(1);
        gauge.set(3);
        assert_eq!(registry.gather().len(), 1);
        assert_eq!(gauge.get(), 3);
    }
}
