//! Wrappers that instrument the calls they delegate.
//!
//! - [`TracedProvider`]: LLM completions, streams and embeddings
//! - [`TracedExecutor`]: tool invocations
//! - [`AgentTracer`]: one span per agent run, events for what happens inside
//!
//! Every wrapper opens its span before delegating, records its duration on
//! every exit path and ends the span exactly once through [`SpanGuard`].

pub mod agent;
pub mod executor;
pub mod provider;
pub mod stream;

pub use agent::{AgentRun, AgentTracer, MemoryOperation, Retrieval, RunInfo};
pub use executor::TracedExecutor;
pub use provider::TracedProvider;

use std::time::{Duration, Instant};

use crate::observability::trace::SpanHandle;

/// Ends its span when dropped.
///
/// Covers early returns and futures dropped mid-call alike.
#[derive(Debug)]
pub struct SpanGuard {
    span: SpanHandle,
}

impl SpanGuard {
    pub fn new(span: SpanHandle) -> Self {
        Self { span }
    }

    pub fn span(&self) -> &SpanHandle {
        &self.span
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.span.end();
    }
}

/// Fractional milliseconds.
pub(crate) fn duration_ms(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    duration_ms(started.elapsed())
}

/// Counter delta for an unsigned quantity.
pub(crate) fn delta(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
