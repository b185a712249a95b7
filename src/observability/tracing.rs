//! `tracing` subscriber setup.
//!
//! Configures structured logging with:
//! - Environment-based filter (RUST_LOG wins over the configured level)
//! - JSON or human-readable output
//! - Optional OpenTelemetry layer so `tracing` spans join exported traces

use opentelemetry_sdk::trace::Tracer as SdkTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LoggingConfig, DEFAULT_LOG_LEVEL};
use crate::error::{Result, TelemetryError};

/// Install the process-wide subscriber.
///
/// When `tracer` is given, `tracing` spans are bridged into it.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_subscriber(config: &LoggingConfig, tracer: Option<SdkTracer>) -> Result<()> {
    let filter = env_filter(&config.level);

    let (json, text) = if config.is_json() {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true);
        (Some(layer), None)
    } else {
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true);
        (None, Some(layer))
    };

    let bridged = tracer.is_some();
    let otel = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .with(otel)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::debug!(
        level = %config.level,
        format = %config.format,
        bridged,
        "Log subscriber installed"
    );
    Ok(())
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

/// Initialize logging for tests (only logs errors).
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}
