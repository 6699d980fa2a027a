// Telemetry: structured JSON logging, optional OTLP trace export, and
// Prometheus metrics for tick outcomes and notification fan-out.

use crate::models::TickState;
use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting. When an OTLP
/// endpoint is configured, spans are exported there as well.
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_target(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", "apartment-watch"),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer("apartment-watch");

    tracing::info!(endpoint = endpoint, "OTLP trace exporter initialized");
    Ok(tracer)
}

/// Flush remaining spans on graceful shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the watcher's metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "watch_ticks_total",
        "Scheduled ticks by terminal state (succeeded, expired, exhausted)"
    );
    describe_counter!(
        "watch_attempts_total",
        "Invocation attempts across all ticks"
    );
    describe_histogram!(
        "watch_check_duration_seconds",
        "Duration of compute function invocations in seconds"
    );
    describe_counter!(
        "watch_notifications_published_total",
        "Messages durably accepted by the notification channel"
    );
    describe_counter!(
        "watch_delivery_failures_total",
        "Per-subscriber delivery failures during fan-out"
    );

    tracing::info!(metrics_port = metrics_port, "Prometheus metrics exporter initialized");
    Ok(())
}

#[inline]
pub fn record_tick(state: TickState) {
    counter!("watch_ticks_total", "state" => state.as_str()).increment(1);
}

#[inline]
pub fn record_attempt() {
    counter!("watch_attempts_total").increment(1);
}

#[inline]
pub fn record_check_duration(duration_seconds: f64) {
    histogram!("watch_check_duration_seconds").record(duration_seconds);
}

#[inline]
pub fn record_notification_published(channel: &str) {
    counter!("watch_notifications_published_total", "channel" => channel.to_string()).increment(1);
}

#[inline]
pub fn record_delivery_failure(channel: &str, endpoint: &str) {
    counter!(
        "watch_delivery_failures_total",
        "channel" => channel.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}
