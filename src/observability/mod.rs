//! OpenTelemetry observability infrastructure.
//!
//! Provides:
//! - Span/tracer abstraction with OpenTelemetry and no-op variants
//! - Name-keyed metrics over OpenTelemetry, in memory, or discarded
//! - Loggers that carry trace and span ids from a context
//! - `tracing` subscriber setup

pub mod logging;
pub mod memory;
pub mod metrics;
pub mod trace;
pub mod tracing;

pub use logging::{Fields, Logger, NoopLogger, TracingLogger};
pub use memory::InMemoryMetrics;
pub use metrics::{Counter, Gauge, Histogram, Metrics, NoopMetrics, OtelMetrics};
pub use trace::{
    span_from_context, NoopTracer, OtelTracer, Span, SpanContext, SpanHandle, SpanKind,
    SpanOptions, StatusCode, Tracer,
};
