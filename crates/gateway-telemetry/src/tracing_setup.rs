//! OpenTelemetry tracing setup.

/// OpenTelemetry configuration.
pub struct OtelConfig {
    pub service_name: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            service_name: "gateway-core".into(),
            otlp_endpoint: None,
        }
    }
}

/// Initialize the OpenTelemetry tracer (optional, only if an OTLP endpoint
/// is configured).
pub fn init_tracer(config: &OtelConfig) -> Option<opentelemetry::global::BoxedTracer> {
    config.otlp_endpoint.as_ref().map(|_endpoint| {
        // TODO: wire the OTLP exporter once a collector endpoint is deployed.
        opentelemetry::global::tracer("gateway")
    })
}
