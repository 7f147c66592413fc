//! Gateway Telemetry
//!
//! Unified observability layer providing:
//! - Structured JSON logging
//! - OpenTelemetry tracing
//! - Prometheus metrics

pub mod logging;
pub mod metrics;
pub mod tracing_setup;

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize telemetry with default configuration.
pub fn init() {
    init_with_level(Level::INFO);
}

/// Initialize telemetry with a specific log level and a structured JSON
/// layer. `pretty` switches to a human-readable layer for sandbox runs.
pub fn init_with_level(level: Level) {
    init_with(level, false);
}

pub fn init_with(level: Level, pretty: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("gateway_core={level},gateway_registry={level}"))
    });

    if pretty {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }

    tracing::info!("gateway telemetry initialized");
}
