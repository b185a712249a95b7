//! Language-model client contract.
//!
//! The telemetry layer never talks to a model itself; it instruments
//! whatever implements [`LlmProvider`].

use async_trait::async_trait;
use opentelemetry::Context;
use serde::{Deserialize, Serialize};
use std::error::Error;
use tokio::sync::mpsc;

/// Speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Completion request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Request {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Token accounting for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Usage with the total derived from its parts.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Completion result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    pub usage: Usage,
    pub finish_reason: String,
}

/// One element of a streamed completion.
///
/// Usage and finish reason are typically only set on the last chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl Chunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Terminal chunk carrying usage and finish reason.
    pub fn last(content: impl Into<String>, usage: Usage, finish_reason: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: Some(usage),
            finish_reason: Some(finish_reason.into()),
        }
    }
}

/// Receiving half of a streamed completion.
///
/// The producer closes `chunks` when the stream completes, or sends one
/// error on `errors` and stops. Both channels are closed once the producer
/// is done.
#[derive(Debug)]
pub struct ChunkStream<E> {
    pub chunks: mpsc::Receiver<Chunk>,
    pub errors: mpsc::Receiver<E>,
}

/// Sending half handed to a stream producer.
#[derive(Debug)]
pub struct ChunkSink<E> {
    pub chunks: mpsc::Sender<Chunk>,
    pub errors: mpsc::Sender<E>,
}

impl<E> ChunkStream<E> {
    /// Connected sink and stream. `buffer` bounds the chunk channel and is
    /// at least 1; the error channel holds a single error.
    pub fn channel(buffer: usize) -> (ChunkSink<E>, Self) {
        let (chunk_tx, chunk_rx) = mpsc::channel(buffer.max(1));
        let (error_tx, error_rx) = mpsc::channel(1);
        (
            ChunkSink {
                chunks: chunk_tx,
                errors: error_tx,
            },
            Self {
                chunks: chunk_rx,
                errors: error_rx,
            },
        )
    }

    /// Read the stream to the end.
    ///
    /// Returns every chunk in order, or the error if one was sent.
    pub async fn collect(mut self) -> Result<Vec<Chunk>, E> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.chunks.recv().await {
            chunks.push(chunk);
        }
        match self.errors.recv().await {
            Some(err) => Err(err),
            None => Ok(chunks),
        }
    }
}

/// A language-model client.
///
/// Every call receives the caller's [`Context`] so implementations can
/// propagate the active trace.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    type Error: Error + Send + Sync + 'static;

    /// Provider name (e.g. "openai").
    fn name(&self) -> &str;

    /// Model identifier.
    fn model(&self) -> &str;

    async fn generate(&self, cx: &Context, request: Request) -> Result<Response, Self::Error>;

    /// Start a streamed completion. Failures, including failure to start,
    /// are reported on the stream's error channel.
    async fn generate_stream(&self, cx: &Context, request: Request) -> ChunkStream<Self::Error>;

    /// One embedding vector per input text.
    async fn embed(&self, cx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>, Self::Error>;

    /// Release client resources.
    fn close(&self) -> Result<(), Self::Error>;
}
