//! Error types for telemetry setup and teardown.
//!
//! Operational errors from instrumented calls never pass through here; the
//! traced wrappers hand those back to the caller untouched.

use opentelemetry::metrics::MetricsError;
use opentelemetry::trace::TraceError;
use thiserror::Error;

/// Errors raised while building, installing or shutting down telemetry.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("sample rate must be between 0.0 and 1.0, got {0}")]
    InvalidSampleRate(f64),

    #[error("failed to initialize tracer: {0}")]
    TracerInit(#[from] TraceError),

    #[error("failed to initialize metrics: {0}")]
    MetricsInit(#[from] MetricsError),

    #[error("{backend} shutdown failed: {message}")]
    Shutdown {
        backend: &'static str,
        message: String,
    },

    #[error("failed to install log subscriber: {0}")]
    Subscriber(String),
}

impl TelemetryError {
    /// Wrap a backend teardown failure.
    pub fn shutdown(backend: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Shutdown {
            backend,
            message: err.to_string(),
        }
    }
}

/// Result alias for telemetry setup.
pub type Result<T> = std::result::Result<T, TelemetryError>;
