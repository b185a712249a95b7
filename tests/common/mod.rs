//! Test utilities for agent-telemetry integration tests.
//!
//! Provides:
//! - A recording tracer that keeps every span it starts
//! - Scripted LLM provider and tool executor
//! - Telemetry bundles wired to in-memory metrics

#![allow(dead_code)]

use agent_telemetry::llm::{Chunk, ChunkStream, LlmProvider, Request, Response, Usage};
use agent_telemetry::observability::trace::{
    context_with_span, span_from_context, Span, SpanContext, SpanHandle, SpanKind, SpanOptions,
    StatusCode, Tracer,
};
use agent_telemetry::observability::{InMemoryMetrics, Metrics, NoopLogger};
use agent_telemetry::tool::{ToolExecutor, ToolOutput};
use agent_telemetry::Telemetry;
use async_trait::async_trait;
use opentelemetry::{Context, KeyValue, Value};
use std::error::Error;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A span event as recorded.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub name: String,
    pub attributes: Vec<KeyValue>,
}

/// Span that keeps everything done to it.
#[derive(Debug)]
pub struct RecordedSpan {
    pub name: String,
    pub kind: SpanKind,
    pub context: SpanContext,
    pub parent_span_id: Option<String>,
    attributes: Mutex<Vec<KeyValue>>,
    events: Mutex<Vec<RecordedEvent>>,
    errors: Mutex<Vec<String>>,
    status: Mutex<(StatusCode, String)>,
    ends: AtomicUsize,
}

impl RecordedSpan {
    /// Last value set for `key`, creation attributes included.
    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.clone())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.name).collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn status(&self) -> StatusCode {
        self.status.lock().unwrap().0
    }

    pub fn status_description(&self) -> String {
        self.status.lock().unwrap().1.clone()
    }

    pub fn end_count(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }
}

impl Span for RecordedSpan {
    fn set_attributes(&self, attributes: Vec<KeyValue>) {
        self.attributes.lock().unwrap().extend(attributes);
    }

    fn add_event(&self, name: &str, attributes: Vec<KeyValue>) {
        self.events.lock().unwrap().push(RecordedEvent {
            name: name.to_string(),
            attributes,
        });
    }

    fn record_error(&self, err: &dyn Error) {
        self.errors.lock().unwrap().push(err.to_string());
    }

    fn set_status(&self, code: StatusCode, description: &str) {
        *self.status.lock().unwrap() = (code, description.to_string());
    }

    fn end(&self) {
        self.ends.fetch_add(1, Ordering::SeqCst);
    }

    fn span_context(&self) -> SpanContext {
        self.context.clone()
    }
}

/// Tracer that keeps every span it starts, in start order.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    spans: Mutex<Vec<Arc<RecordedSpan>>>,
    next_id: AtomicU64,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<Arc<RecordedSpan>> {
        self.spans.lock().unwrap().clone()
    }

    pub fn spans_named(&self, name: &str) -> Vec<Arc<RecordedSpan>> {
        self.spans()
            .into_iter()
            .filter(|s| s.name == name)
            .collect()
    }

    /// The only span called `name`; panics if there is not exactly one.
    pub fn span(&self, name: &str) -> Arc<RecordedSpan> {
        let mut spans = self.spans_named(name);
        assert_eq!(spans.len(), 1, "expected one `{name}` span");
        spans.remove(0)
    }
}

impl Tracer for RecordingTracer {
    fn start(&self, cx: &Context, name: &str, options: SpanOptions) -> (Context, SpanHandle) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let parent = span_from_context(cx).span_context();
        let (trace_id, parent_span_id) = if parent.is_valid() {
            (parent.trace_id, Some(parent.span_id))
        } else {
            (format!("{id:032x}"), None)
        };

        let span = Arc::new(RecordedSpan {
            name: name.to_string(),
            kind: options.kind,
            context: SpanContext {
                trace_id,
                span_id: format!("{id:016x}"),
            },
            parent_span_id,
            attributes: Mutex::new(options.attributes),
            events: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            status: Mutex::new((StatusCode::Unset, String::new())),
            ends: AtomicUsize::new(0),
        });
        self.spans.lock().unwrap().push(span.clone());

        let handle: SpanHandle = span;
        (context_with_span(cx, handle.clone()), handle)
    }
}

/// Telemetry recording spans and metrics in memory.
pub struct Harness {
    pub telemetry: Telemetry,
    pub tracer: Arc<RecordingTracer>,
    pub metrics: Arc<InMemoryMetrics>,
}

impl Harness {
    pub fn new() -> Self {
        let tracer = Arc::new(RecordingTracer::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let telemetry = Telemetry::new(
            tracer.clone() as Arc<dyn Tracer>,
            metrics.clone() as Arc<dyn Metrics>,
            NoopLogger::shared(),
        );
        Self {
            telemetry,
            tracer,
            metrics,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("scripted failure: {0}")]
pub struct ScriptedError(pub String);

/// What a scripted stream produces.
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Send every chunk, then close.
    Complete(Vec<Chunk>),
    /// Send every chunk, then the error.
    FailAfter(Vec<Chunk>, ScriptedError),
}

/// LLM provider replaying fixed results.
#[derive(Debug)]
pub struct ScriptedProvider {
    pub response: Result<Response, ScriptedError>,
    pub stream: StreamScript,
    pub embeddings: Result<Vec<Vec<f32>>, ScriptedError>,
    /// Context span seen by the last call
    pub seen: Mutex<Option<SpanContext>>,
    pub calls: AtomicUsize,
    /// Pause before `generate` and `embed` answer
    pub delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            response: Ok(Response {
                content: "hello".into(),
                usage: Usage::new(10, 20),
                finish_reason: "stop".into(),
            }),
            stream: StreamScript::Complete(words(&["a", "b", "c"], Some(Usage::new(5, 3)))),
            embeddings: Ok(vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]]),
            seen: Mutex::new(None),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        let err = ScriptedError(message.to_string());
        Self {
            response: Err(err.clone()),
            stream: StreamScript::FailAfter(Vec::new(), err.clone()),
            embeddings: Err(err),
            ..Self::new()
        }
    }

    pub fn with_stream(mut self, stream: StreamScript) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn observe(&self, cx: &Context) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen.lock().unwrap() = Some(span_from_context(cx).span_context());
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunks for `words`, usage on the last one.
pub fn words(words: &[&str], usage: Option<Usage>) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = words.iter().map(|w| Chunk::text(*w)).collect();
    if let (Some(last), Some(usage)) = (chunks.last_mut(), usage) {
        last.usage = Some(usage);
        last.finish_reason = Some("stop".into());
    }
    chunks
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    type Error = ScriptedError;

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn generate(&self, cx: &Context, _request: Request) -> Result<Response, ScriptedError> {
        self.observe(cx);
        self.pause().await;
        self.response.clone()
    }

    async fn generate_stream(&self, cx: &Context, _request: Request) -> ChunkStream<ScriptedError> {
        self.observe(cx);
        let (sink, stream) = ChunkStream::channel(1);
        let script = self.stream.clone();
        tokio::spawn(async move {
            let (chunks, error) = match script {
                StreamScript::Complete(chunks) => (chunks, None),
                StreamScript::FailAfter(chunks, err) => (chunks, Some(err)),
            };
            for chunk in chunks {
                if sink.chunks.send(chunk).await.is_err() {
                    return;
                }
            }
            if let Some(err) = error {
                let _ = sink.errors.send(err).await;
            }
        });
        stream
    }

    async fn embed(&self, cx: &Context, _texts: &[String]) -> Result<Vec<Vec<f32>>, ScriptedError> {
        self.observe(cx);
        self.pause().await;
        self.embeddings.clone()
    }

    fn close(&self) -> Result<(), ScriptedError> {
        Ok(())
    }
}

/// Tool executor: `ok` succeeds, `slow` succeeds after a pause, anything
/// else fails.
#[derive(Debug, Default)]
pub struct ScriptedExecutor;

#[async_trait]
impl ToolExecutor for ScriptedExecutor {
    type Output = ToolOutput;

    async fn execute(&self, _cx: &Context, name: &str, args: serde_json::Value) -> ToolOutput {
        match name {
            "ok" => ToolOutput::success(name, args.to_string()),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ToolOutput::success(name, "done")
            }
            _ => ToolOutput::failure(name, format!("no tool named {name}")),
        }
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
