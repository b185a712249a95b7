//! Loggers that correlate records with the active trace.
//!
//! [`TracingLogger`] emits through the `tracing` macros, so records go
//! wherever the installed subscriber sends them. Derived loggers are new
//! values; the logger they were derived from is never modified.

use opentelemetry::Context;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::Level;

use super::trace::span_from_context;

/// Fixed fields attached to every record of a logger.
pub type Fields = BTreeMap<String, Value>;

pub const TRACE_ID_FIELD: &str = "trace_id";
pub const SPAN_ID_FIELD: &str = "span_id";

/// Structured logger with trace correlation.
pub trait Logger: Send + Sync + fmt::Debug {
    fn log(&self, level: Level, message: &str);

    /// Fields carried by this logger, correlation ids included.
    fn fields(&self) -> Fields;

    /// Logger carrying the trace and span ids active in `cx`.
    ///
    /// Returns the receiver itself when there is nothing to correlate.
    fn with_context(self: Arc<Self>, cx: &Context) -> Arc<dyn Logger>;

    /// Logger carrying `fields` on top of the receiver's own.
    fn with_fields(self: Arc<Self>, fields: Fields) -> Arc<dyn Logger>;

    fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }

    fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }
}

/// Logger that forwards to `tracing` events.
///
/// Correlation ids become dedicated `trace_id`/`span_id` event fields; other
/// fixed fields are rendered as one JSON object in `fields`.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    include_trace_id: bool,
    trace_id: Option<String>,
    span_id: Option<String>,
    fields: Fields,
    rendered: Option<String>,
}

impl TracingLogger {
    pub fn new(include_trace_id: bool) -> Self {
        Self {
            include_trace_id,
            ..Self::default()
        }
    }

    fn derive(&self, fields: Fields) -> Self {
        let rendered = if fields.is_empty() {
            None
        } else {
            serde_json::to_string(&fields).ok()
        };
        Self {
            include_trace_id: self.include_trace_id,
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            fields,
            rendered,
        }
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str) {
        let trace_id = self.trace_id.as_deref();
        let span_id = self.span_id.as_deref();
        let fields = self.rendered.as_deref();
        match level {
            Level::ERROR => tracing::error!(trace_id, span_id, fields, "{message}"),
            Level::WARN => tracing::warn!(trace_id, span_id, fields, "{message}"),
            Level::INFO => tracing::info!(trace_id, span_id, fields, "{message}"),
            Level::DEBUG => tracing::debug!(trace_id, span_id, fields, "{message}"),
            _ => tracing::trace!(trace_id, span_id, fields, "{message}"),
        }
    }

    fn fields(&self) -> Fields {
        let mut fields = self.fields.clone();
        if let (Some(trace_id), Some(span_id)) = (&self.trace_id, &self.span_id) {
            fields.insert(TRACE_ID_FIELD.to_string(), Value::from(trace_id.as_str()));
            fields.insert(SPAN_ID_FIELD.to_string(), Value::from(span_id.as_str()));
        }
        fields
    }

    fn with_context(self: Arc<Self>, cx: &Context) -> Arc<dyn Logger> {
        if !self.include_trace_id {
            return self;
        }
        let sc = span_from_context(cx).span_context();
        if !sc.is_valid() {
            return self;
        }
        let mut derived = self.derive(self.fields.clone());
        derived.trace_id = Some(sc.trace_id);
        derived.span_id = Some(sc.span_id);
        Arc::new(derived)
    }

    fn with_fields(self: Arc<Self>, fields: Fields) -> Arc<dyn Logger> {
        let mut merged = self.fields.clone();
        merged.extend(fields);
        Arc::new(self.derive(merged))
    }
}

/// Logger that drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl NoopLogger {
    pub fn new() -> Self {
        Self
    }

    /// Shared instance.
    pub fn shared() -> Arc<dyn Logger> {
        static NOOP: OnceLock<Arc<dyn Logger>> = OnceLock::new();
        NOOP.get_or_init(|| Arc::new(NoopLogger) as Arc<dyn Logger>)
            .clone()
    }
}

impl Logger for NoopLogger {
    fn log(&self, _level: Level, _message: &str) {}

    fn fields(&self) -> Fields {
        Fields::new()
    }

    fn with_context(self: Arc<Self>, _cx: &Context) -> Arc<dyn Logger> {
        self
    }

    fn with_fields(self: Arc<Self>, _fields: Fields) -> Arc<dyn Logger> {
        self
    }
}

/// Build a field map from key/value pairs.
pub fn fields<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Fields
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::same_instance;
    use crate::observability::trace::{NoopTracer, OtelTracer, SpanOptions, Tracer};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::TracerProvider;

    #[test]
    fn test_with_context_without_span_returns_receiver() {
        let logger: Arc<TracingLogger> = Arc::new(TracingLogger::new(true));
        let derived = logger.clone().with_context(&Context::new());
        let original: Arc<dyn Logger> = logger;
        assert!(same_instance(&original, &derived));
    }

    #[test]
    fn test_with_context_noop_span_returns_receiver() {
        let (cx, _span) = NoopTracer::new().start(&Context::new(), "op", SpanOptions::internal());
        let logger = Arc::new(TracingLogger::new(true));
        let derived = logger.with_context(&cx);
        assert!(derived.fields().is_empty());
    }

    #[test]
    fn test_with_context_adds_correlation_ids() {
        let provider = TracerProvider::builder().build();
        let tracer = OtelTracer::new(provider.tracer("test"));
        let (cx, span) = tracer.start(&Context::new(), "op", SpanOptions::internal());

        let logger = Arc::new(TracingLogger::new(true));
        let derived = logger.clone().with_context(&cx);
        let fields = derived.fields();
        let sc = span.span_context();
        assert_eq!(fields[TRACE_ID_FIELD], Value::from(sc.trace_id.as_str()));
        assert_eq!(fields[SPAN_ID_FIELD], Value::from(sc.span_id.as_str()));
        // Original is untouched
        assert!(logger.fields().is_empty());
        derived.info("correlated");
        span.end();
    }

    #[test]
    fn test_with_context_respects_include_flag() {
        let provider = TracerProvider::builder().build();
        let tracer = OtelTracer::new(provider.tracer("test"));
        let (cx, span) = tracer.start(&Context::new(), "op", SpanOptions::internal());

        let logger = Arc::new(TracingLogger::new(false));
        assert!(logger.with_context(&cx).fields().is_empty());
        span.end();
    }

    #[test]
    fn test_with_fields_chains_without_mutation() {
        let base = Arc::new(TracingLogger::new(true));
        let first = base.clone().with_fields(fields([("agent", "planner")]));
        let second = first.clone().with_fields(fields([("iteration", 2)]));

        assert!(base.fields().is_empty());
        assert_eq!(first.fields().len(), 1);
        assert_eq!(second.fields()["agent"], Value::from("planner"));
        assert_eq!(second.fields()["iteration"], Value::from(2));
        second.warn("chained");
    }

    #[test]
    fn test_noop_logger() {
        let logger = NoopLogger::shared();
        let derived = logger
            .clone()
            .with_fields(fields([("k", "v")]))
            .with_context(&Context::new());
        assert!(derived.fields().is_empty());
        derived.error("dropped");
    }
}
