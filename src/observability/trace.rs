//! Span and tracer abstraction.
//!
//! Two tracer variants share one interface:
//! - [`OtelTracer`]: forwards to an OpenTelemetry SDK tracer (sampling, export)
//! - [`NoopTracer`]: every operation is a no-op, span contexts are empty
//!
//! The active span travels in an [`opentelemetry::Context`], so nested calls
//! find their parent with [`span_from_context`] without a tracer at hand.

use opentelemetry::trace::{self as otel, Status, TraceContextExt, Tracer as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{Sampler, Tracer as SdkTracer};
use std::error::Error;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Identifiers of a started span.
///
/// Both fields are empty when there is no active, valid span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
}

impl SpanContext {
    /// True when the span carries real identifiers.
    pub fn is_valid(&self) -> bool {
        !self.trace_id.is_empty()
    }
}

/// Terminal outcome of a span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

/// Role of a span in a trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl From<SpanKind> for otel::SpanKind {
    fn from(kind: SpanKind) -> Self {
        match kind {
            SpanKind::Internal => otel::SpanKind::Internal,
            SpanKind::Server => otel::SpanKind::Server,
            SpanKind::Client => otel::SpanKind::Client,
            SpanKind::Producer => otel::SpanKind::Producer,
            SpanKind::Consumer => otel::SpanKind::Consumer,
        }
    }
}

/// Creation-time settings for a span. Consumed by [`Tracer::start`].
#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    pub kind: SpanKind,
    pub attributes: Vec<KeyValue>,
}

impl SpanOptions {
    pub fn new(kind: SpanKind) -> Self {
        Self {
            kind,
            attributes: Vec::new(),
        }
    }

    pub fn internal() -> Self {
        Self::new(SpanKind::Internal)
    }

    pub fn client() -> Self {
        Self::new(SpanKind::Client)
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = KeyValue>) -> Self {
        self.attributes.extend(attributes);
        self
    }
}

/// A unit of work in a trace.
///
/// The code path that received the span from [`Tracer::start`] owns it and
/// must call [`Span::end`] once on every exit path. Methods never fail;
/// calls after `end` are ignored by the no-op variant and left to the
/// backend otherwise.
pub trait Span: Send + Sync + fmt::Debug {
    fn set_attributes(&self, attributes: Vec<KeyValue>);

    fn add_event(&self, name: &str, attributes: Vec<KeyValue>);

    fn record_error(&self, err: &dyn Error);

    fn set_status(&self, code: StatusCode, description: &str);

    fn end(&self);

    fn span_context(&self) -> SpanContext;
}

/// Shared handle to a span.
pub type SpanHandle = Arc<dyn Span>;

/// Creates spans.
pub trait Tracer: Send + Sync + fmt::Debug {
    /// Start a span as a child of whatever span `cx` carries.
    ///
    /// Returns a context carrying the new span alongside the span itself.
    fn start(&self, cx: &Context, name: &str, options: SpanOptions) -> (Context, SpanHandle);
}

#[derive(Clone)]
struct ActiveSpan(SpanHandle);

/// Context carrying `span` as the active span.
///
/// For [`Tracer`] implementations outside this crate; the returned context
/// is what [`span_from_context`] reads.
pub fn context_with_span(cx: &Context, span: SpanHandle) -> Context {
    cx.with_value(ActiveSpan(span))
}

/// The span active in `cx`, or a no-op span when there is none.
pub fn span_from_context(cx: &Context) -> SpanHandle {
    cx.get::<ActiveSpan>()
        .map(|active| active.0.clone())
        .unwrap_or_else(noop_span)
}

/// Shared no-op span instance.
pub fn noop_span() -> SpanHandle {
    static NOOP: OnceLock<SpanHandle> = OnceLock::new();
    NOOP.get_or_init(|| Arc::new(NoopSpan) as SpanHandle).clone()
}

/// Span that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSpan;

impl Span for NoopSpan {
    fn set_attributes(&self, _attributes: Vec<KeyValue>) {}

    fn add_event(&self, _name: &str, _attributes: Vec<KeyValue>) {}

    fn record_error(&self, _err: &dyn Error) {}

    fn set_status(&self, _code: StatusCode, _description: &str) {}

    fn end(&self) {}

    fn span_context(&self) -> SpanContext {
        SpanContext::default()
    }
}

/// Tracer used when tracing is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl NoopTracer {
    pub fn new() -> Self {
        Self
    }
}

impl Tracer for NoopTracer {
    fn start(&self, cx: &Context, _name: &str, _options: SpanOptions) -> (Context, SpanHandle) {
        (cx.clone(), noop_span())
    }
}

/// Tracer backed by the OpenTelemetry SDK.
#[derive(Debug, Clone)]
pub struct OtelTracer {
    tracer: SdkTracer,
}

impl OtelTracer {
    pub fn new(tracer: SdkTracer) -> Self {
        Self { tracer }
    }

    /// The underlying SDK tracer, for bridging `tracing` spans.
    pub fn sdk_tracer(&self) -> &SdkTracer {
        &self.tracer
    }
}

impl Tracer for OtelTracer {
    fn start(&self, cx: &Context, name: &str, options: SpanOptions) -> (Context, SpanHandle) {
        let span = self
            .tracer
            .span_builder(name.to_string())
            .with_kind(options.kind.into())
            .with_attributes(options.attributes)
            .start_with_context(&self.tracer, cx);

        let span_cx = cx.with_span(span);
        let handle: SpanHandle = Arc::new(OtelSpan {
            cx: span_cx.clone(),
        });
        (context_with_span(&span_cx, handle.clone()), handle)
    }
}

/// Span living inside an OpenTelemetry context.
struct OtelSpan {
    cx: Context,
}

impl fmt::Debug for OtelSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelSpan")
            .field("context", &self.span_context())
            .finish()
    }
}

impl Span for OtelSpan {
    fn set_attributes(&self, attributes: Vec<KeyValue>) {
        self.cx.span().set_attributes(attributes);
    }

    fn add_event(&self, name: &str, attributes: Vec<KeyValue>) {
        self.cx.span().add_event(name.to_string(), attributes);
    }

    fn record_error(&self, err: &dyn Error) {
        self.cx.span().record_error(err);
    }

    fn set_status(&self, code: StatusCode, description: &str) {
        let status = match code {
            StatusCode::Unset => Status::Unset,
            StatusCode::Ok => Status::Ok,
            StatusCode::Error => Status::error(description.to_string()),
        };
        self.cx.span().set_status(status);
    }

    fn end(&self) {
        self.cx.span().end();
    }

    fn span_context(&self) -> SpanContext {
        let span = self.cx.span();
        let sc = span.span_context();
        if !sc.is_valid() {
            return SpanContext::default();
        }
        SpanContext {
            trace_id: sc.trace_id().to_string(),
            span_id: sc.span_id().to_string(),
        }
    }
}

/// Sampler for a configured ratio.
///
/// Ratios in between are keyed on the trace id and respect the parent's
/// decision, so every span of a trace shares one outcome.
pub fn sampler_for(rate: f64) -> Sampler {
    if rate >= 1.0 {
        Sampler::AlwaysOn
    } else if rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(rate)))
    }
}
