//! Span and metric bookkeeping for streamed completions.
//!
//! A spawned task drains the producer's channels and forwards chunks to
//! fresh outbound channels, keeping the span open for the life of the
//! stream. The drain loop is a three-state machine:
//!
//! ```text
//! Draining --chunk channel closed, no error queued--> Done(Completed)
//! Draining --error received-----------------------> Done(Failed)
//! ```
//!
//! [`StreamRecorder::finish`] is the only terminal path and only accepts a
//! [`StreamOutcome`]. It consumes the recorder, so duration, counters, status and span end happen once per
//! stream however many chunks arrived.

use opentelemetry::{Context, KeyValue};
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use super::provider::{record_usage, usage_attributes};
use super::{elapsed_ms, SpanGuard};
use crate::catalog::attributes as attr;
use crate::catalog::instruments;
use crate::llm::{Chunk, ChunkStream, Usage};
use crate::observability::metrics::Metrics;
use crate::observability::trace::StatusCode;

/// Default capacity of the outbound chunk channel.
pub const DEFAULT_BUFFER: usize = 16;

/// Where the drain loop stands after one receive.
#[derive(Debug)]
pub enum DrainState<E> {
    Draining,
    Done(StreamOutcome<E>),
}

/// How a stream ended.
#[derive(Debug)]
pub enum StreamOutcome<E> {
    Completed,
    Failed(E),
}

/// What the stream carried so far.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamProgress {
    pub chunks: u64,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

impl StreamProgress {
    fn observe(&mut self, chunk: &Chunk) {
        self.chunks += 1;
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        if let Some(reason) = &chunk.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
    }
}

/// Everything needed to close out one stream.
pub(crate) struct StreamRecorder {
    cx: Context,
    guard: SpanGuard,
    metrics: Arc<dyn Metrics>,
    attributes: Vec<KeyValue>,
    started: Instant,
}

impl StreamRecorder {
    pub(crate) fn new(
        cx: Context,
        guard: SpanGuard,
        metrics: Arc<dyn Metrics>,
        attributes: Vec<KeyValue>,
    ) -> Self {
        Self {
            cx,
            guard,
            metrics,
            attributes,
            started: Instant::now(),
        }
    }

    /// Terminal bookkeeping. Hands a failure back so it can be forwarded.
    fn finish<E: Error>(self, outcome: StreamOutcome<E>, progress: &StreamProgress) -> Option<E> {
        let span = self.guard.span();
        self.metrics
            .histogram(instruments::LLM_REQUEST_DURATION.name)
            .record(&self.cx, elapsed_ms(self.started), &self.attributes);
        span.set_attributes(vec![attr::llm_chunk_count(progress.chunks)]);

        let mut request_attributes = self.attributes.clone();
        match outcome {
            StreamOutcome::Completed => {
                if let Some(usage) = &progress.usage {
                    span.set_attributes(usage_attributes(usage));
                    record_usage(self.metrics.as_ref(), &self.cx, usage, &self.attributes);
                }
                if let Some(reason) = &progress.finish_reason {
                    span.set_attributes(vec![attr::llm_finish_reason(reason.clone())]);
                }
                span.add_event("llm.stream.completed", vec![attr::llm_chunk_count(progress.chunks)]);
                span.set_status(StatusCode::Ok, "");

                request_attributes.push(attr::status_success());
                self.metrics
                    .counter(instruments::LLM_REQUESTS.name)
                    .add(&self.cx, 1, &request_attributes);
                None
            }
            StreamOutcome::Failed(err) => {
                span.record_error(&err);
                span.set_status(StatusCode::Error, &err.to_string());

                request_attributes.push(attr::status_error());
                self.metrics
                    .counter(instruments::LLM_REQUESTS.name)
                    .add(&self.cx, 1, &request_attributes);
                let mut error_attributes = self.attributes.clone();
                error_attributes.push(attr::error_type(attr::error_kind(&err)));
                self.metrics
                    .counter(instruments::LLM_ERRORS.name)
                    .add(&self.cx, 1, &error_attributes);

                tracing::debug!(
                    chunks = progress.chunks,
                    error = %err,
                    "LLM stream failed"
                );
                Some(err)
            }
        }
        // guard drops here and ends the span
    }
}

/// Spawn the drain task and return the caller's side of the stream.
pub(crate) fn spawn_drain<E>(
    upstream: ChunkStream<E>,
    recorder: StreamRecorder,
    buffer: usize,
) -> ChunkStream<E>
where
    E: Error + Send + Sync + 'static,
{
    let (sink, outbound) = ChunkStream::channel(buffer);
    tokio::spawn(drain(upstream, sink.chunks, sink.errors, recorder));
    outbound
}

async fn drain<E>(
    mut upstream: ChunkStream<E>,
    chunk_tx: mpsc::Sender<Chunk>,
    error_tx: mpsc::Sender<E>,
    recorder: StreamRecorder,
) where
    E: Error + Send + Sync + 'static,
{
    let mut progress = StreamProgress::default();
    let mut forwarding = true;
    let mut errors_open = true;
    let outcome = loop {
        let state = tokio::select! {
            biased;

            chunk = upstream.chunks.recv() => match chunk {
                Some(chunk) => {
                    progress.observe(&chunk);
                    if forwarding && chunk_tx.send(chunk).await.is_err() {
                        // Caller dropped the stream; keep draining so the span closes.
                        forwarding = false;
                    }
                    DrainState::Draining
                }
                // An error queued alongside the close wins.
                None => match upstream.errors.try_recv() {
                    Ok(err) => DrainState::Done(StreamOutcome::Failed(err)),
                    Err(_) => DrainState::Done(StreamOutcome::Completed),
                },
            },

            err = upstream.errors.recv(), if errors_open => match err {
                Some(err) => DrainState::Done(StreamOutcome::Failed(err)),
                None => {
                    errors_open = false;
                    DrainState::Draining
                }
            },
        };
        if let DrainState::Done(outcome) = state {
            break outcome;
        }
    };

    if let Some(err) = recorder.finish(outcome, &progress) {
        let _ = error_tx.send(err).await;
    }
    // chunk_tx and error_tx drop here, closing the caller's channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::memory::InMemoryMetrics;
    use crate::observability::trace::noop_span;

    #[derive(Debug, thiserror::Error)]
    #[error("upstream broke")]
    struct Broken;

    fn recorder(metrics: &Arc<InMemoryMetrics>) -> StreamRecorder {
        StreamRecorder::new(
            Context::new(),
            SpanGuard::new(noop_span()),
            metrics.clone(),
            vec![attr::llm_provider("fake")],
        )
    }

    #[test]
    fn test_progress_keeps_last_usage() {
        let mut progress = StreamProgress::default();
        progress.observe(&Chunk::text("a"));
        progress.observe(&Chunk::last("b", Usage::new(3, 4), "stop"));
        assert_eq!(progress.chunks, 2);
        assert_eq!(progress.usage, Some(Usage::new(3, 4)));
        assert_eq!(progress.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_finish_records_each_outcome_once() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let progress = StreamProgress {
            chunks: 2,
            usage: Some(Usage::new(3, 4)),
            finish_reason: Some("stop".into()),
        };

        assert!(recorder(&metrics)
            .finish(StreamOutcome::<Broken>::Completed, &progress)
            .is_none());
        assert_eq!(metrics.counter_value(instruments::LLM_TOTAL_TOKENS.name), 7);

        let handed_back = recorder(&metrics).finish(StreamOutcome::Failed(Broken), &progress);
        assert!(handed_back.is_some());
        assert_eq!(metrics.counter_value(instruments::LLM_ERRORS.name), 1);
        assert_eq!(metrics.counter_calls(instruments::LLM_REQUESTS.name), 2);
        assert_eq!(
            metrics.histogram_values(instruments::LLM_REQUEST_DURATION.name).len(),
            2
        );
        // Usage belongs to completed streams only
        assert_eq!(metrics.counter_calls(instruments::LLM_TOTAL_TOKENS.name), 1);
    }

    #[tokio::test]
    async fn test_error_queued_with_close_wins() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let (sink, upstream) = ChunkStream::<Broken>::channel(4);
        sink.chunks.send(Chunk::text("a")).await.unwrap();
        sink.errors.send(Broken).await.unwrap();
        drop(sink);

        let outbound = spawn_drain(upstream, recorder(&metrics), 4);
        assert!(outbound.collect().await.is_err());
        assert_eq!(metrics.counter_value(instruments::LLM_ERRORS.name), 1);
        assert_eq!(
            metrics.counter_value_with(instruments::LLM_REQUESTS.name, &attr::status_error()),
            1
        );
    }

    #[tokio::test]
    async fn test_dropped_receiver_still_finishes() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let (sink, upstream) = ChunkStream::<Broken>::channel(1);
        let outbound = spawn_drain(upstream, recorder(&metrics), 1);
        drop(outbound);

        for i in 0..5 {
            sink.chunks.send(Chunk::text(i.to_string())).await.unwrap();
        }
        drop(sink);

        let done = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while metrics.histogram_values(instruments::LLM_REQUEST_DURATION.name).is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(done.is_ok());
        assert_eq!(
            metrics.counter_value_with(instruments::LLM_REQUESTS.name, &attr::status_success()),
            1
        );
    }
}
