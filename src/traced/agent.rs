//! Agent-run tracing.
//!
//! One span covers a whole run. Iterations, tool calls, token usage, memory
//! operations and retrievals become events on that span rather than spans of
//! their own, so span count stays at one per run.

use opentelemetry::{Context, KeyValue};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{delta, duration_ms, elapsed_ms, SpanGuard};
use crate::catalog::attributes as attr;
use crate::catalog::instruments;
use crate::generate_run_id;
use crate::llm::Usage;
use crate::observability::metrics::Gauge;
use crate::observability::trace::{span_from_context, SpanContext, SpanOptions, StatusCode};
use crate::provider::Telemetry;

pub const RUN_SPAN: &str = "agent.run";

/// Identity of the run a context belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub agent_name: String,
    pub run_id: String,
}

impl RunInfo {
    /// Run carried by `cx`, if any.
    pub fn from_context(cx: &Context) -> Option<&RunInfo> {
        cx.get::<RunInfo>()
    }
}

/// A run in progress. Hand it back to [`AgentTracer::finish_run`].
///
/// Dropping it without finishing still ends the span, with no status, and
/// takes the run off `agent.active_runs`.
#[must_use = "finish the run with AgentTracer::finish_run"]
pub struct AgentRun {
    info: RunInfo,
    cx: Context,
    guard: SpanGuard,
    slot: ActiveSlot,
    started: Instant,
}

/// One place in the shared count of runs in flight.
///
/// Released on drop, after whatever else the run records.
struct ActiveSlot {
    count: Arc<AtomicI64>,
    gauge: Arc<dyn Gauge>,
    cx: Context,
}

impl ActiveSlot {
    fn take(count: Arc<AtomicI64>, gauge: Arc<dyn Gauge>, cx: Context) -> Self {
        let active = count.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.set(&cx, active as f64, &[]);
        Self { count, gauge, cx }
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let active = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        self.gauge.set(&self.cx, active as f64, &[]);
    }
}

impl AgentRun {
    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub fn span_context(&self) -> SpanContext {
        self.guard.span().span_context()
    }
}

impl fmt::Debug for AgentRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRun")
            .field("info", &self.info)
            .field("span", &self.span_context())
            .finish()
    }
}

/// Memory store access to record on a run.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryOperation<'a> {
    /// e.g. "get", "put", "search"
    pub operation: &'a str,
    pub store: &'a str,
    pub duration: Duration,
    pub success: bool,
    pub hit: Option<bool>,
    /// Store size after the operation, when known
    pub size_bytes: Option<u64>,
}

/// Retrieval query to record on a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval<'a> {
    pub source: &'a str,
    pub top_k: usize,
    pub results: usize,
    pub duration: Duration,
}

/// Records agent runs.
///
/// Tracers built from clones of one [`Telemetry`] share the
/// `agent.active_runs` count.
#[derive(Debug, Clone)]
pub struct AgentTracer {
    telemetry: Telemetry,
}

impl AgentTracer {
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }

    /// Open the run span.
    ///
    /// The returned context carries the span and the run identity; pass it
    /// to the `record_*` helpers and to nested calls.
    pub fn start_run(&self, cx: &Context, agent_name: &str) -> (Context, AgentRun) {
        let info = RunInfo {
            agent_name: agent_name.to_string(),
            run_id: generate_run_id(),
        };
        let options = SpanOptions::internal().with_attributes([
            attr::agent_name(info.agent_name.clone()),
            attr::agent_run_id(info.run_id.clone()),
        ]);
        let (cx, span) = self.telemetry.tracer.start(cx, RUN_SPAN, options);
        let cx = cx.with_value(info.clone());

        let slot = ActiveSlot::take(
            self.telemetry.run_counter().clone(),
            self.telemetry.metrics.gauge(instruments::AGENT_ACTIVE_RUNS.name),
            cx.clone(),
        );

        tracing::debug!(agent = agent_name, run_id = %info.run_id, "Agent run started");
        let run = AgentRun {
            info,
            cx: cx.clone(),
            guard: SpanGuard::new(span),
            slot,
            started: Instant::now(),
        };
        (cx, run)
    }

    pub fn record_iteration(&self, cx: &Context, iteration: u32) {
        span_from_context(cx).add_event("agent.iteration", vec![attr::agent_iteration(iteration)]);
        self.telemetry
            .metrics
            .counter(instruments::AGENT_ITERATIONS.name)
            .add(cx, 1, &run_attributes(cx));
    }

    /// Marker for a tool call made during the run. Tool metrics themselves
    /// come from [`TracedExecutor`](super::TracedExecutor).
    pub fn record_tool_call(&self, cx: &Context, tool_name: &str, success: bool, duration: Duration) {
        span_from_context(cx).add_event(
            "agent.tool_call",
            vec![
                attr::tool_name(tool_name.to_string()),
                attr::tool_success(success),
                attr::tool_duration_ms(duration_ms(duration)),
            ],
        );
    }

    pub fn record_token_usage(&self, cx: &Context, usage: &Usage) {
        span_from_context(cx).add_event(
            "agent.token_usage",
            vec![
                attr::llm_prompt_tokens(usage.prompt_tokens),
                attr::llm_completion_tokens(usage.completion_tokens),
                attr::llm_total_tokens(usage.total_tokens),
            ],
        );

        let tokens = self.telemetry.metrics.counter(instruments::AGENT_TOKENS.name);
        let mut attributes = run_attributes(cx);
        attributes.push(attr::llm_token_type("prompt"));
        tokens.add(cx, delta(usage.prompt_tokens), &attributes);
        attributes.pop();
        attributes.push(attr::llm_token_type("completion"));
        tokens.add(cx, delta(usage.completion_tokens), &attributes);
    }

    pub fn record_memory_operation(&self, cx: &Context, op: &MemoryOperation<'_>) {
        let mut event = vec![
            attr::memory_operation(op.operation.to_string()),
            attr::memory_store(op.store.to_string()),
            attr::status(op.success),
        ];
        if let Some(hit) = op.hit {
            event.push(attr::memory_hit(hit));
        }
        span_from_context(cx).add_event("agent.memory", event);

        let metrics = &self.telemetry.metrics;
        let attributes = [
            attr::memory_operation(op.operation.to_string()),
            attr::memory_store(op.store.to_string()),
        ];
        let mut with_status = attributes.to_vec();
        with_status.push(attr::status(op.success));
        metrics
            .counter(instruments::MEMORY_OPERATIONS.name)
            .add(cx, 1, &with_status);
        metrics
            .histogram(instruments::MEMORY_DURATION.name)
            .record(cx, duration_ms(op.duration), &attributes);
        if let Some(size) = op.size_bytes {
            metrics
                .gauge(instruments::MEMORY_SIZE.name)
                .set(cx, size as f64, &[attr::memory_store(op.store.to_string())]);
        }
    }

    pub fn record_retrieval(&self, cx: &Context, retrieval: &Retrieval<'_>) {
        span_from_context(cx).add_event(
            "agent.retrieval",
            vec![
                attr::rag_source(retrieval.source.to_string()),
                attr::rag_top_k(retrieval.top_k),
                attr::rag_results(retrieval.results),
            ],
        );

        let metrics = &self.telemetry.metrics;
        let attributes = [attr::rag_source(retrieval.source.to_string())];
        metrics
            .counter(instruments::RAG_RETRIEVALS.name)
            .add(cx, 1, &attributes);
        metrics
            .histogram(instruments::RAG_RETRIEVAL_DURATION.name)
            .record(cx, duration_ms(retrieval.duration), &attributes);
        metrics
            .histogram(instruments::RAG_DOCUMENTS.name)
            .record(cx, retrieval.results as f64, &attributes);
    }

    /// Close the run: duration, outcome counters, status, span end.
    pub fn finish_run(&self, run: AgentRun, error: Option<&(dyn Error + 'static)>) {
        let AgentRun {
            info,
            cx,
            guard,
            slot,
            started,
        } = run;
        let span = guard.span();
        let metrics = &self.telemetry.metrics;
        let attributes = [attr::agent_name(info.agent_name.clone())];

        metrics
            .histogram(instruments::AGENT_RUN_DURATION.name)
            .record(&cx, elapsed_ms(started), &attributes);

        let mut run_attributes = attributes.to_vec();
        match error {
            Some(err) => {
                span.record_error(err);
                span.set_status(StatusCode::Error, &err.to_string());
                span.set_attributes(vec![attr::agent_status(attr::STATUS_ERROR)]);
                metrics
                    .counter(instruments::AGENT_ERRORS.name)
                    .add(&cx, 1, &attributes);
                run_attributes.push(attr::status_error());
                tracing::debug!(run_id = %info.run_id, error = %err, "Agent run failed");
            }
            None => {
                span.set_status(StatusCode::Ok, "");
                span.set_attributes(vec![attr::agent_status(attr::STATUS_SUCCESS)]);
                run_attributes.push(attr::status_success());
                tracing::debug!(run_id = %info.run_id, "Agent run finished");
            }
        }
        metrics
            .counter(instruments::AGENT_RUNS.name)
            .add(&cx, 1, &run_attributes);

        drop(slot);
    }
}

/// Metric attributes naming the run's agent, if `cx` belongs to a run.
fn run_attributes(cx: &Context) -> Vec<KeyValue> {
    RunInfo::from_context(cx)
        .map(|info| vec![attr::agent_name(info.agent_name.clone())])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::memory::InMemoryMetrics;
    use crate::observability::metrics::Metrics;
    use crate::observability::trace::{NoopTracer, Tracer};
    use crate::observability::NoopLogger;

    fn agent_tracer() -> (AgentTracer, Arc<InMemoryMetrics>) {
        let metrics = Arc::new(InMemoryMetrics::new());
        let telemetry = Telemetry::new(
            Arc::new(NoopTracer::new()) as Arc<dyn Tracer>,
            metrics.clone() as Arc<dyn Metrics>,
            NoopLogger::shared(),
        );
        (AgentTracer::new(telemetry), metrics)
    }

    #[test]
    fn test_run_info_travels_in_context() {
        let (tracer, _metrics) = agent_tracer();
        let (cx, run) = tracer.start_run(&Context::new(), "planner");
        let info = RunInfo::from_context(&cx).expect("run info");
        assert_eq!(info.agent_name, "planner");
        assert_eq!(info.run_id, run.run_id());
        assert_eq!(run.run_id().len(), 36);
        tracer.finish_run(run, None);
    }

    #[test]
    fn test_active_runs_gauge_tracks_open_runs() {
        let (tracer, metrics) = agent_tracer();
        let (_, first) = tracer.start_run(&Context::new(), "a");
        let (_, second) = tracer.start_run(&Context::new(), "b");
        assert_eq!(metrics.gauge_value(instruments::AGENT_ACTIVE_RUNS.name), Some(2.0));
        tracer.finish_run(first, None);
        tracer.finish_run(second, Some(&std::fmt::Error));
        assert_eq!(metrics.gauge_value(instruments::AGENT_ACTIVE_RUNS.name), Some(0.0));
        assert_eq!(metrics.counter_value(instruments::AGENT_ERRORS.name), 1);
        assert_eq!(metrics.histogram_values(instruments::AGENT_RUN_DURATION.name).len(), 2);
    }

    #[test]
    fn test_tracers_from_one_bundle_share_active_runs() {
        let (first, metrics) = agent_tracer();
        let second = AgentTracer::new(first.telemetry.clone());

        let (_, a) = first.start_run(&Context::new(), "planner");
        let (_, b) = second.start_run(&Context::new(), "executor");
        assert_eq!(metrics.gauge_value(instruments::AGENT_ACTIVE_RUNS.name), Some(2.0));
        assert_eq!(first.telemetry.active_runs(), 2);

        second.finish_run(a, None);
        assert_eq!(metrics.gauge_value(instruments::AGENT_ACTIVE_RUNS.name), Some(1.0));
        first.finish_run(b, None);
        assert_eq!(metrics.gauge_value(instruments::AGENT_ACTIVE_RUNS.name), Some(0.0));
    }

    #[test]
    fn test_dropped_run_leaves_active_runs() {
        let (tracer, metrics) = agent_tracer();
        let (_, kept) = tracer.start_run(&Context::new(), "planner");
        let (_, dropped) = tracer.start_run(&Context::new(), "planner");

        drop(dropped);
        assert_eq!(metrics.gauge_value(instruments::AGENT_ACTIVE_RUNS.name), Some(1.0));
        // Not a finished run: no outcome recorded
        assert_eq!(metrics.counter_calls(instruments::AGENT_RUNS.name), 0);

        tracer.finish_run(kept, None);
        assert_eq!(metrics.gauge_value(instruments::AGENT_ACTIVE_RUNS.name), Some(0.0));
    }

    #[test]
    fn test_token_usage_split_by_type() {
        let (tracer, metrics) = agent_tracer();
        let (cx, run) = tracer.start_run(&Context::new(), "planner");
        tracer.record_token_usage(&cx, &Usage::new(10, 5));
        tracer.record_token_usage(&cx, &Usage::new(1, 1));

        let prompt = attr::llm_token_type("prompt");
        let completion = attr::llm_token_type("completion");
        assert_eq!(metrics.counter_value_with(instruments::AGENT_TOKENS.name, &prompt), 11);
        assert_eq!(metrics.counter_value_with(instruments::AGENT_TOKENS.name, &completion), 6);
        assert_eq!(
            metrics.counter_value_with(instruments::AGENT_TOKENS.name, &attr::agent_name("planner")),
            17
        );
        tracer.finish_run(run, None);
    }

    #[test]
    fn test_memory_and_retrieval_metrics() {
        let (tracer, metrics) = agent_tracer();
        let (cx, run) = tracer.start_run(&Context::new(), "planner");
        tracer.record_memory_operation(
            &cx,
            &MemoryOperation {
                operation: "get",
                store: "redis",
                duration: Duration::from_millis(3),
                success: true,
                hit: Some(false),
                size_bytes: Some(2048),
            },
        );
        tracer.record_retrieval(
            &cx,
            &Retrieval {
                source: "docs",
                top_k: 5,
                results: 3,
                duration: Duration::from_millis(20),
            },
        );

        assert_eq!(metrics.counter_value(instruments::MEMORY_OPERATIONS.name), 1);
        assert_eq!(metrics.histogram_values(instruments::MEMORY_DURATION.name), vec![3.0]);
        assert_eq!(metrics.gauge_value(instruments::MEMORY_SIZE.name), Some(2048.0));
        assert_eq!(metrics.counter_value(instruments::RAG_RETRIEVALS.name), 1);
        assert_eq!(metrics.histogram_values(instruments::RAG_DOCUMENTS.name), vec![3.0]);
        tracer.finish_run(run, None);
    }
}
