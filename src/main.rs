//! Agent Telemetry demo: runs a scripted agent through the traced wrappers.
//!
//! # Usage
//!
//! ```bash
//! agent-telemetry --enabled --tracing --endpoint http://localhost:4317
//! ```
//!
//! Environment variables can also be used:
//! - `OTEL_SERVICE_NAME`: Service name reported on the resource
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint for spans and metrics
//! - `OTEL_TRACES_SAMPLER_ARG`: Sample rate in [0, 1]
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use agent_telemetry::config::{Config, LoggingConfig, MetricsConfig, TracingConfig};
use agent_telemetry::llm::{Chunk, ChunkStream, LlmProvider, Message, Request, Response, Usage};
use agent_telemetry::observability::logging::{fields, Logger};
use agent_telemetry::tool::{ToolExecutor, ToolOutput, ToolResult};
use agent_telemetry::traced::{AgentTracer, MemoryOperation, TracedExecutor, TracedProvider};
use agent_telemetry::{global, Provider};
use anyhow::Context as _;
use async_trait::async_trait;
use clap::Parser;
use opentelemetry::Context;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Agent Telemetry: scripted agent run with spans, metrics and correlated logs.
#[derive(Parser, Debug, Clone)]
#[command(name = "agent-telemetry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable telemetry export
    #[arg(long, env = "AGENT_TELEMETRY_ENABLED")]
    enabled: bool,

    /// Export spans
    #[arg(long, env = "AGENT_TELEMETRY_TRACING")]
    tracing: bool,

    /// Export metrics
    #[arg(long, env = "AGENT_TELEMETRY_METRICS")]
    metrics: bool,

    /// Service name reported on the resource
    #[arg(long, env = "OTEL_SERVICE_NAME", default_value = "agent")]
    service_name: String,

    /// Deployment environment
    #[arg(long, env = "AGENT_TELEMETRY_ENVIRONMENT", default_value = "development")]
    environment: String,

    /// OTLP/gRPC collector endpoint
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", default_value = "http://localhost:4317")]
    endpoint: String,

    /// Use plaintext to reach the collector
    #[arg(long, env = "OTEL_EXPORTER_OTLP_INSECURE", default_value_t = true, action = clap::ArgAction::Set)]
    insecure: bool,

    /// Fraction of traces to sample
    #[arg(long, env = "OTEL_TRACES_SAMPLER_ARG", default_value_t = 1.0)]
    sample_rate: f64,

    /// Metric export interval in seconds
    #[arg(long, env = "OTEL_METRIC_EXPORT_INTERVAL_SECS", default_value_t = 15)]
    metric_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "AGENT_TELEMETRY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (json, text)
    #[arg(long, env = "AGENT_TELEMETRY_LOG_FORMAT", default_value = "text")]
    log_format: String,

    /// Agent iterations to run
    #[arg(long, default_value_t = 3)]
    iterations: u32,
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            enabled: self.enabled,
            service_name: self.service_name,
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: self.environment,
            tracing: TracingConfig {
                enabled: self.tracing,
                endpoint: self.endpoint.clone(),
                insecure: self.insecure,
                sample_rate: self.sample_rate,
                timeout: Duration::ZERO,
            },
            metrics: MetricsConfig {
                enabled: self.metrics,
                endpoint: self.endpoint,
                insecure: self.insecure,
                interval: Duration::from_secs(self.metric_interval_secs),
            },
            logging: LoggingConfig {
                level: self.log_level,
                format: self.log_format,
                include_trace_id: true,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum EchoError {
    #[error("empty prompt")]
    EmptyPrompt,
}

/// Model stand-in that echoes the last user message word by word.
#[derive(Debug)]
struct EchoModel;

fn last_prompt(request: &Request) -> Option<&str> {
    request
        .messages
        .iter()
        .rev()
        .map(|m| m.content.as_str())
        .find(|c| !c.is_empty())
}

#[async_trait]
impl LlmProvider for EchoModel {
    type Error = EchoError;

    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo-1"
    }

    async fn generate(&self, _cx: &Context, request: Request) -> Result<Response, EchoError> {
        let prompt = last_prompt(&request).ok_or(EchoError::EmptyPrompt)?;
        let words = prompt.split_whitespace().count() as u64;
        Ok(Response {
            content: prompt.to_string(),
            usage: Usage::new(words, words),
            finish_reason: "stop".to_string(),
        })
    }

    async fn generate_stream(&self, _cx: &Context, request: Request) -> ChunkStream<EchoError> {
        let (sink, stream) = ChunkStream::channel(4);
        let prompt = last_prompt(&request).map(str::to_string);
        tokio::spawn(async move {
            let Some(prompt) = prompt else {
                let _ = sink.errors.send(EchoError::EmptyPrompt).await;
                return;
            };
            let words: Vec<&str> = prompt.split_whitespace().collect();
            let total = words.len() as u64;
            for (i, word) in words.iter().enumerate() {
                let chunk = if i + 1 == words.len() {
                    Chunk::last(*word, Usage::new(total, total), "stop")
                } else {
                    Chunk::text(*word)
                };
                if sink.chunks.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        stream
    }

    async fn embed(&self, _cx: &Context, texts: &[String]) -> Result<Vec<Vec<f32>>, EchoError> {
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }

    fn close(&self) -> Result<(), EchoError> {
        Ok(())
    }
}

/// Tool stand-in: `upper` succeeds, everything else fails.
#[derive(Debug)]
struct DemoTools;

#[async_trait]
impl ToolExecutor for DemoTools {
    type Output = ToolOutput;

    async fn execute(&self, _cx: &Context, name: &str, args: serde_json::Value) -> ToolOutput {
        match (name, args.get("text").and_then(|v| v.as_str())) {
            ("upper", Some(text)) => ToolOutput::success(name, text.to_uppercase()),
            ("upper", None) => ToolOutput::failure(name, "missing `text` argument"),
            _ => ToolOutput::failure(name, format!("unknown tool `{name}`")),
        }
    }
}

async fn run_agent(provider: &Provider, iterations: u32) -> anyhow::Result<()> {
    let telemetry = provider.telemetry();
    let model = TracedProvider::new(EchoModel, telemetry.clone());
    let tools = TracedExecutor::new(DemoTools, telemetry.clone());
    let agent = AgentTracer::new(telemetry.clone());

    let (cx, run) = agent.start_run(&Context::new(), "demo");
    let logger = telemetry
        .logger
        .clone()
        .with_context(&cx)
        .with_fields(fields([("run_id", run.run_id())]));
    logger.info("Agent run started");

    let mut failure = None;
    for iteration in 1..=iterations {
        agent.record_iteration(&cx, iteration);

        let request = Request::new(vec![
            Message::system("Echo the user."),
            Message::user(format!("iteration {iteration} of the demo")),
        ]);
        match model.generate(&cx, request.clone()).await {
            Ok(response) => agent.record_token_usage(&cx, &response.usage),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }

        let streamed = model.generate_stream(&cx, request).await.collect().await;
        match streamed {
            Ok(chunks) => logger.debug(&format!("Streamed {} chunks", chunks.len())),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }

        let tool = if iteration % 2 == 0 { "lower" } else { "upper" };
        let started = Instant::now();
        let output = tools
            .execute(&cx, tool, serde_json::json!({ "text": "hello" }))
            .await;
        agent.record_tool_call(&cx, tool, output.is_success(), started.elapsed());

        let started = Instant::now();
        let embeddings = model.embed(&cx, &[output.output().to_string()]).await;
        agent.record_memory_operation(
            &cx,
            &MemoryOperation {
                operation: "put",
                store: "in-process",
                duration: started.elapsed(),
                success: embeddings.is_ok(),
                hit: None,
                size_bytes: None,
            },
        );
    }

    agent.finish_run(run, failure.as_ref().map(|e| e as &(dyn std::error::Error + 'static)));
    model.close()?;
    match failure {
        Some(e) => Err(e.into()),
        None => {
            logger.info("Agent run finished");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let cli = Cli::parse();
    let iterations = cli.iterations;
    let config = cli.into_config();

    let provider = Arc::new(Provider::new(config).context("failed to build telemetry provider")?);
    provider.init_subscriber()?;
    global::install(&provider);

    tracing::info!(
        enabled = provider.is_enabled(),
        service = %provider.config().service_name,
        "Telemetry initialized"
    );

    let result = run_agent(&provider, iterations).await;

    // Exporter teardown blocks on flushing
    let teardown = provider.clone();
    tokio::task::spawn_blocking(move || teardown.shutdown())
        .await
        .context("shutdown task panicked")??;
    global::reset();

    tracing::info!("Agent telemetry demo complete");
    result
}
