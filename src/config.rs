//! Telemetry configuration.
//!
//! Supports:
//! - Zero-value structs that an outer loader (file, env, CLI) fills in
//! - Defaulting that only touches fields left at their zero value
//! - Development and production presets

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, TelemetryError};

pub const DEFAULT_SERVICE_NAME: &str = "agent";
pub const DEFAULT_SERVICE_VERSION: &str = "0.1.0";
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4317";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "json";
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(15);

/// Top-level telemetry configuration.
///
/// `Enabled = false` turns every signal into a no-op regardless of the
/// per-signal flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enabled: bool,
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub tracing: TracingConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Span export settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    /// OTLP/gRPC collector endpoint
    pub endpoint: String,
    /// Plaintext transport to the collector
    pub insecure: bool,
    /// Fraction of traces to sample, in [0, 1]
    pub sample_rate: f64,
    /// Per-export timeout
    pub timeout: Duration,
}

/// Metric export settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub insecure: bool,
    /// Period between metric exports
    pub interval: Duration,
}

/// Log output settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level directive (trace, debug, info, warn, error)
    pub level: String,
    /// `json` or `text`
    pub format: String,
    /// Attach trace_id/span_id to context-derived loggers
    pub include_trace_id: bool,
}

impl Config {
    /// Fill every zero-valued field from the default set.
    ///
    /// Caller-supplied values are never overwritten. The sample rate and the
    /// boolean flags are left alone because their zero values are meaningful.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        fill(&mut self.service_name, DEFAULT_SERVICE_NAME);
        fill(&mut self.service_version, DEFAULT_SERVICE_VERSION);
        fill(&mut self.environment, DEFAULT_ENVIRONMENT);

        fill(&mut self.tracing.endpoint, DEFAULT_ENDPOINT);
        if self.tracing.timeout.is_zero() {
            self.tracing.timeout = DEFAULT_EXPORT_TIMEOUT;
        }

        fill(&mut self.metrics.endpoint, DEFAULT_ENDPOINT);
        if self.metrics.interval.is_zero() {
            self.metrics.interval = DEFAULT_EXPORT_INTERVAL;
        }

        fill(&mut self.logging.level, DEFAULT_LOG_LEVEL);
        fill(&mut self.logging.format, DEFAULT_LOG_FORMAT);
        self
    }

    /// Check the configuration before a provider is built.
    pub fn validate(&self) -> Result<()> {
        let rate = self.tracing.sample_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(TelemetryError::InvalidSampleRate(rate));
        }
        Ok(())
    }

    /// Every signal on, every trace sampled, human-readable logs.
    pub fn development() -> Self {
        Self {
            enabled: true,
            environment: "development".into(),
            tracing: TracingConfig {
                enabled: true,
                insecure: true,
                sample_rate: 1.0,
                ..TracingConfig::default()
            },
            metrics: MetricsConfig {
                enabled: true,
                insecure: true,
                ..MetricsConfig::default()
            },
            logging: LoggingConfig {
                level: "debug".into(),
                format: "text".into(),
                include_trace_id: true,
            },
            ..Self::default()
        }
        .with_defaults()
    }

    /// Every signal on, a tenth of traces sampled, JSON logs.
    pub fn production() -> Self {
        Self {
            enabled: true,
            environment: "production".into(),
            tracing: TracingConfig {
                enabled: true,
                sample_rate: 0.1,
                ..TracingConfig::default()
            },
            metrics: MetricsConfig {
                enabled: true,
                ..MetricsConfig::default()
            },
            logging: LoggingConfig {
                level: "info".into(),
                format: "json".into(),
                include_trace_id: true,
            },
            ..Self::default()
        }
        .with_defaults()
    }
}

impl LoggingConfig {
    /// Whether records should be rendered as JSON.
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

fn fill(field: &mut String, default: &str) {
    if field.is_empty() {
        *field = default.to_string();
    }
}
