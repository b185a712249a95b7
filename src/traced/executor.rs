//! Instrumented tool executor.

use async_trait::async_trait;
use opentelemetry::Context;
use serde_json::Value;
use std::time::Instant;

use super::{elapsed_ms, SpanGuard};
use crate::catalog::attributes as attr;
use crate::catalog::instruments;
use crate::observability::trace::{SpanOptions, StatusCode};
use crate::provider::Telemetry;
use crate::tool::{ToolExecutor, ToolResult};

pub const EXECUTE_SPAN: &str = "tool.execute";

/// Wraps a [`ToolExecutor`] so every invocation produces a span and metrics.
///
/// The result is returned exactly as the wrapped executor produced it.
#[derive(Debug)]
pub struct TracedExecutor<E> {
    inner: E,
    telemetry: Telemetry,
}

impl<E: ToolExecutor> TracedExecutor<E> {
    pub fn new(inner: E, telemetry: Telemetry) -> Self {
        Self { inner, telemetry }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: ToolExecutor> ToolExecutor for TracedExecutor<E> {
    type Output = E::Output;

    async fn execute(&self, cx: &Context, name: &str, args: Value) -> Self::Output {
        let attributes = vec![attr::tool_name(name.to_string())];
        let (cx, span) = self.telemetry.tracer.start(
            cx,
            EXECUTE_SPAN,
            SpanOptions::internal().with_attributes(attributes.clone()),
        );
        let guard = SpanGuard::new(span);
        let started = Instant::now();

        let result = self.inner.execute(&cx, name, args).await;

        let duration_ms = elapsed_ms(started);
        let success = result.is_success();
        let span = guard.span();
        span.set_attributes(vec![
            attr::tool_duration_ms(duration_ms),
            attr::tool_success(success),
            attr::tool_output_size(result.output().len()),
        ]);

        let metrics = &self.telemetry.metrics;
        metrics
            .histogram(instruments::TOOL_DURATION.name)
            .record(&cx, duration_ms, &attributes);

        let mut call_attributes = attributes.clone();
        if success {
            span.set_status(StatusCode::Ok, "");
            call_attributes.push(attr::status_success());
        } else {
            let description = match result.error() {
                Some(err) => {
                    span.record_error(err);
                    err.to_string()
                }
                None => "tool reported failure".to_string(),
            };
            span.set_status(StatusCode::Error, &description);
            call_attributes.push(attr::status_error());
            metrics
                .counter(instruments::TOOL_ERRORS.name)
                .add(&cx, 1, &attributes);
            tracing::debug!(tool = name, error = %description, "Tool call failed");
        }
        metrics
            .counter(instruments::TOOL_CALLS.name)
            .add(&cx, 1, &call_attributes);

        result
    }
}
