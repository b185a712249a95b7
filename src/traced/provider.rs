//! Instrumented LLM provider.

use async_trait::async_trait;
use opentelemetry::{Context, KeyValue};
use std::time::Instant;

use super::stream::{self, StreamRecorder};
use super::{delta, elapsed_ms, SpanGuard};
use crate::catalog::attributes as attr;
use crate::catalog::instruments;
use crate::llm::{ChunkStream, LlmProvider, Request, Response, Usage};
use crate::observability::metrics::Metrics;
use crate::observability::trace::{SpanHandle, SpanOptions, StatusCode};
use crate::provider::Telemetry;

pub const GENERATE_SPAN: &str = "llm.generate";
pub const GENERATE_STREAM_SPAN: &str = "llm.generate_stream";
pub const EMBED_SPAN: &str = "llm.embed";

const OP_GENERATE: &str = "generate";
const OP_GENERATE_STREAM: &str = "generate_stream";
const OP_EMBED: &str = "embed";

/// Wraps an [`LlmProvider`] so every call produces a span and metrics.
///
/// Errors from the wrapped provider are returned unchanged.
#[derive(Debug)]
pub struct TracedProvider<P> {
    inner: P,
    telemetry: Telemetry,
    stream_buffer: usize,
}

impl<P: LlmProvider> TracedProvider<P> {
    pub fn new(inner: P, telemetry: Telemetry) -> Self {
        Self {
            inner,
            telemetry,
            stream_buffer: stream::DEFAULT_BUFFER,
        }
    }

    /// Capacity of the chunk channel handed back by `generate_stream`.
    #[must_use]
    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer.max(1);
        self
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    /// Attributes shared by the span and every metric of one call.
    fn call_attributes(&self, operation: &'static str) -> Vec<KeyValue> {
        vec![
            attr::llm_provider(self.inner.name().to_string()),
            attr::llm_model(self.inner.model().to_string()),
            attr::llm_operation(operation),
        ]
    }

    fn span_options(&self, operation: &'static str, request: &Request, streaming: bool) -> SpanOptions {
        let mut attributes = self.call_attributes(operation);
        attributes.push(attr::llm_streaming(streaming));
        attributes.push(attr::llm_message_count(request.messages.len()));
        if let Some(max) = request.max_tokens {
            attributes.push(attr::llm_max_tokens(max));
        }
        if let Some(temperature) = request.temperature {
            attributes.push(attr::llm_temperature(temperature));
        }
        SpanOptions::client().with_attributes(attributes)
    }

    fn metrics(&self) -> &dyn Metrics {
        self.telemetry.metrics.as_ref()
    }

    fn record_failure(
        &self,
        cx: &Context,
        span: &SpanHandle,
        err: &P::Error,
        attributes: &[KeyValue],
    ) {
        span.record_error(err);
        span.set_status(StatusCode::Error, &err.to_string());

        let mut error_attributes = attributes.to_vec();
        error_attributes.push(attr::error_type(attr::error_kind(err)));
        self.metrics()
            .counter(instruments::LLM_ERRORS.name)
            .add(cx, 1, &error_attributes);

        tracing::debug!(
            provider = self.inner.name(),
            model = self.inner.model(),
            error = %err,
            "LLM call failed"
        );
    }

    fn record_response(&self, cx: &Context, span: &SpanHandle, response: &Response, attributes: &[KeyValue]) {
        let mut span_attributes = usage_attributes(&response.usage);
        span_attributes.push(attr::llm_finish_reason(response.finish_reason.clone()));
        span.set_attributes(span_attributes);
        span.add_event(
            "llm.response",
            vec![
                attr::llm_finish_reason(response.finish_reason.clone()),
                attr::llm_total_tokens(response.usage.total_tokens),
            ],
        );
        span.set_status(StatusCode::Ok, "");

        let mut success = attributes.to_vec();
        success.push(attr::status_success());
        self.metrics()
            .counter(instruments::LLM_REQUESTS.name)
            .add(cx, 1, &success);
        record_usage(self.metrics(), cx, &response.usage, attributes);
    }
}

/// Span attributes describing token usage.
pub(crate) fn usage_attributes(usage: &Usage) -> Vec<KeyValue> {
    vec![
        attr::llm_prompt_tokens(usage.prompt_tokens),
        attr::llm_completion_tokens(usage.completion_tokens),
        attr::llm_total_tokens(usage.total_tokens),
    ]
}

/// Increment the token counters once for one request.
pub(crate) fn record_usage(metrics: &dyn Metrics, cx: &Context, usage: &Usage, attributes: &[KeyValue]) {
    metrics
        .counter(instruments::LLM_PROMPT_TOKENS.name)
        .add(cx, delta(usage.prompt_tokens), attributes);
    metrics
        .counter(instruments::LLM_COMPLETION_TOKENS.name)
        .add(cx, delta(usage.completion_tokens), attributes);
    metrics
        .counter(instruments::LLM_TOTAL_TOKENS.name)
        .add(cx, delta(usage.total_tokens), attributes);
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for TracedProvider<P> {
    type Error = P::Error;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate(&self, cx: &Context, request: Request) -> Result<Response, Self::Error> {
        let attributes = self.call_attributes(OP_GENERATE);
        let (cx, span) = self.telemetry.tracer.start(
            cx,
            GENERATE_SPAN,
            self.span_options(OP_GENERATE, &request, false),
        );
        let guard = SpanGuard::new(span);
        let started = Instant::now();

        let result = self.inner.generate(&cx, request).await;

        self.metrics()
            .histogram(instruments::LLM_REQUEST_DURATION.name)
            .record(&cx, elapsed_ms(started), &attributes);
        match &result {
            Ok(response) => self.record_response(&cx, guard.span(), response, &attributes),
            Err(err) => self.record_failure(&cx, guard.span(), err, &attributes),
        }
        result
    }

    async fn generate_stream(&self, cx: &Context, request: Request) -> ChunkStream<Self::Error> {
        let attributes = self.call_attributes(OP_GENERATE_STREAM);
        let (cx, span) = self.telemetry.tracer.start(
            cx,
            GENERATE_STREAM_SPAN,
            self.span_options(OP_GENERATE_STREAM, &request, true),
        );
        // Created before delegating so a dropped call still ends the span.
        let recorder = StreamRecorder::new(
            cx.clone(),
            SpanGuard::new(span),
            self.telemetry.metrics.clone(),
            attributes,
        );

        let upstream = self.inner.generate_stream(&cx, request).await;
        stream::spawn_drain(upstream, recorder, self.stream_buffer)
    }

    async fn embed(&self, cx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>, Self::Error> {
        let attributes = self.call_attributes(OP_EMBED);
        let options = SpanOptions::client().with_attributes(
            attributes
                .iter()
                .cloned()
                .chain([attr::llm_embedding_inputs(texts.len())]),
        );
        let (cx, span) = self.telemetry.tracer.start(cx, EMBED_SPAN, options);
        let guard = SpanGuard::new(span);
        let started = Instant::now();

        let result = self.inner.embed(&cx, texts).await;

        // Recorded on the error path too.
        self.metrics()
            .histogram(instruments::LLM_REQUEST_DURATION.name)
            .record(&cx, elapsed_ms(started), &attributes);
        match &result {
            Ok(vectors) => {
                let dimensions = vectors.first().map_or(0, Vec::len);
                guard
                    .span()
                    .set_attributes(vec![attr::llm_embedding_dimensions(dimensions)]);
                guard.span().set_status(StatusCode::Ok, "");
                self.metrics()
                    .counter(instruments::LLM_EMBEDDINGS.name)
                    .add(&cx, delta(texts.len() as u64), &attributes);
            }
            Err(err) => self.record_failure(&cx, guard.span(), err, &attributes),
        }
        result
    }

    fn close(&self) -> Result<(), Self::Error> {
        self.inner.close()
    }
}
