//! Prometheus metrics exposed on `/metrics`.

use prometheus::{Counter, Gauge, Registry};
use std::sync::LazyLock;

/// Global metrics registry.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Live connection gauge, incremented on ADMITTED and decremented on CLOSED.
pub static CONNECTIONS_TOTAL: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new("gateway_connections_total", "Live WebSocket connections").unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Messages successfully handed to the backbone bridge.
pub static MESSAGES_PUBLISHED_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    let counter = Counter::new(
        "gateway_messages_published_total",
        "Messages published to the backbone",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Quota admission denials.
pub static QUOTA_REJECTIONS_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    let counter = Counter::new(
        "gateway_quota_rejections_total",
        "Admission or per-message quota rejections",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Stale connections evicted by the Heartbeat Monitor.
pub static HEARTBEAT_EVICTIONS_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    let counter = Counter::new(
        "gateway_heartbeat_evictions_total",
        "Connections evicted for missing heartbeats",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_metrics_include_registered_families() {
        CONNECTIONS_TOTAL.set(3.0);
        MESSAGES_PUBLISHED_TOTAL.inc();
        let text = encode_metrics();
        assert!(text.contains("gateway_connections_total"));
        assert!(text.contains("gateway_messages_published_total"));
    }
}
