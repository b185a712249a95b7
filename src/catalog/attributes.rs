//! Attribute keys and typed constructors.
//!
//! Keys are namespaced by the subsystem that emits them. Exporters and
//! dashboards match on these exact strings.

use opentelemetry::KeyValue;

// Agent
pub const AGENT_NAME: &str = "agent.name";
pub const AGENT_RUN_ID: &str = "agent.run_id";
pub const AGENT_ITERATION: &str = "agent.iteration";
pub const AGENT_MAX_ITERATIONS: &str = "agent.max_iterations";
pub const AGENT_STATUS: &str = "agent.status";

// LLM
pub const LLM_PROVIDER: &str = "llm.provider";
pub const LLM_MODEL: &str = "llm.model";
pub const LLM_OPERATION: &str = "llm.operation";
pub const LLM_STREAMING: &str = "llm.streaming";
pub const LLM_MAX_TOKENS: &str = "llm.request.max_tokens";
pub const LLM_TEMPERATURE: &str = "llm.request.temperature";
pub const LLM_MESSAGE_COUNT: &str = "llm.request.message_count";
pub const LLM_FINISH_REASON: &str = "llm.response.finish_reason";
pub const LLM_PROMPT_TOKENS: &str = "llm.usage.prompt_tokens";
pub const LLM_COMPLETION_TOKENS: &str = "llm.usage.completion_tokens";
pub const LLM_TOTAL_TOKENS: &str = "llm.usage.total_tokens";
pub const LLM_TOKEN_TYPE: &str = "llm.token_type";
pub const LLM_CHUNK_COUNT: &str = "llm.stream.chunk_count";
pub const LLM_EMBEDDING_INPUTS: &str = "llm.embedding.input_count";
pub const LLM_EMBEDDING_DIMENSIONS: &str = "llm.embedding.dimensions";

// Tool
pub const TOOL_NAME: &str = "tool.name";
pub const TOOL_SUCCESS: &str = "tool.success";
pub const TOOL_DURATION_MS: &str = "tool.duration_ms";
pub const TOOL_OUTPUT_SIZE: &str = "tool.output_size";

// Memory
pub const MEMORY_OPERATION: &str = "memory.operation";
pub const MEMORY_STORE: &str = "memory.store";
pub const MEMORY_HIT: &str = "memory.hit";
pub const MEMORY_SIZE_BYTES: &str = "memory.size_bytes";

// Retrieval
pub const RAG_TOP_K: &str = "rag.top_k";
pub const RAG_RESULTS: &str = "rag.results_count";
pub const RAG_SOURCE: &str = "rag.source";

// Errors and outcome
pub const ERROR_TYPE: &str = "error.type";
pub const ERROR_MESSAGE: &str = "error.message";
pub const STATUS: &str = "status";

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";

pub fn agent_name(name: impl Into<String>) -> KeyValue {
    KeyValue::new(AGENT_NAME, name.into())
}

pub fn agent_run_id(id: impl Into<String>) -> KeyValue {
    KeyValue::new(AGENT_RUN_ID, id.into())
}

pub fn agent_iteration(iteration: u32) -> KeyValue {
    KeyValue::new(AGENT_ITERATION, i64::from(iteration))
}

pub fn agent_max_iterations(max: u32) -> KeyValue {
    KeyValue::new(AGENT_MAX_ITERATIONS, i64::from(max))
}

pub fn agent_status(status: &'static str) -> KeyValue {
    KeyValue::new(AGENT_STATUS, status)
}

pub fn llm_provider(provider: impl Into<String>) -> KeyValue {
    KeyValue::new(LLM_PROVIDER, provider.into())
}

pub fn llm_model(model: impl Into<String>) -> KeyValue {
    KeyValue::new(LLM_MODEL, model.into())
}

pub fn llm_operation(operation: &'static str) -> KeyValue {
    KeyValue::new(LLM_OPERATION, operation)
}

pub fn llm_streaming(streaming: bool) -> KeyValue {
    KeyValue::new(LLM_STREAMING, streaming)
}

pub fn llm_max_tokens(max: u32) -> KeyValue {
    KeyValue::new(LLM_MAX_TOKENS, i64::from(max))
}

pub fn llm_temperature(temperature: f32) -> KeyValue {
    KeyValue::new(LLM_TEMPERATURE, f64::from(temperature))
}

pub fn llm_message_count(count: usize) -> KeyValue {
    KeyValue::new(LLM_MESSAGE_COUNT, saturating_i64(count))
}

pub fn llm_finish_reason(reason: impl Into<String>) -> KeyValue {
    KeyValue::new(LLM_FINISH_REASON, reason.into())
}

pub fn llm_prompt_tokens(tokens: u64) -> KeyValue {
    KeyValue::new(LLM_PROMPT_TOKENS, saturating_i64(tokens))
}

pub fn llm_completion_tokens(tokens: u64) -> KeyValue {
    KeyValue::new(LLM_COMPLETION_TOKENS, saturating_i64(tokens))
}

pub fn llm_total_tokens(tokens: u64) -> KeyValue {
    KeyValue::new(LLM_TOTAL_TOKENS, saturating_i64(tokens))
}

/// Distinguishes prompt from completion on the shared agent token counter.
pub fn llm_token_type(kind: &'static str) -> KeyValue {
    KeyValue::new(LLM_TOKEN_TYPE, kind)
}

pub fn llm_chunk_count(count: u64) -> KeyValue {
    KeyValue::new(LLM_CHUNK_COUNT, saturating_i64(count))
}

pub fn llm_embedding_inputs(count: usize) -> KeyValue {
    KeyValue::new(LLM_EMBEDDING_INPUTS, saturating_i64(count))
}

pub fn llm_embedding_dimensions(dimensions: usize) -> KeyValue {
    KeyValue::new(LLM_EMBEDDING_DIMENSIONS, saturating_i64(dimensions))
}

pub fn tool_name(name: impl Into<String>) -> KeyValue {
    KeyValue::new(TOOL_NAME, name.into())
}

pub fn tool_success(success: bool) -> KeyValue {
    KeyValue::new(TOOL_SUCCESS, success)
}

pub fn tool_duration_ms(ms: f64) -> KeyValue {
    KeyValue::new(TOOL_DURATION_MS, ms)
}

pub fn tool_output_size(bytes: usize) -> KeyValue {
    KeyValue::new(TOOL_OUTPUT_SIZE, saturating_i64(bytes))
}

pub fn memory_operation(operation: impl Into<String>) -> KeyValue {
    KeyValue::new(MEMORY_OPERATION, operation.into())
}

pub fn memory_store(store: impl Into<String>) -> KeyValue {
    KeyValue::new(MEMORY_STORE, store.into())
}

pub fn memory_hit(hit: bool) -> KeyValue {
    KeyValue::new(MEMORY_HIT, hit)
}

pub fn memory_size_bytes(bytes: u64) -> KeyValue {
    KeyValue::new(MEMORY_SIZE_BYTES, saturating_i64(bytes))
}

pub fn rag_top_k(k: usize) -> KeyValue {
    KeyValue::new(RAG_TOP_K, saturating_i64(k))
}

pub fn rag_results(count: usize) -> KeyValue {
    KeyValue::new(RAG_RESULTS, saturating_i64(count))
}

pub fn rag_source(source: impl Into<String>) -> KeyValue {
    KeyValue::new(RAG_SOURCE, source.into())
}

/// Error classification; the concrete type name of the error is a good fit.
pub fn error_type(kind: impl Into<String>) -> KeyValue {
    KeyValue::new(ERROR_TYPE, kind.into())
}

pub fn error_message(message: impl Into<String>) -> KeyValue {
    KeyValue::new(ERROR_MESSAGE, message.into())
}

pub fn status_success() -> KeyValue {
    KeyValue::new(STATUS, STATUS_SUCCESS)
}

pub fn status_error() -> KeyValue {
    KeyValue::new(STATUS, STATUS_ERROR)
}

/// Outcome attribute for metric recordings.
pub fn status(success: bool) -> KeyValue {
    if success {
        status_success()
    } else {
        status_error()
    }
}

/// Unsigned counts clamp to `i64::MAX`.
fn saturating_i64<T: TryInto<i64>>(n: T) -> i64 {
    n.try_into().unwrap_or(i64::MAX)
}

/// Short type name of an error value, used for `error.type`.
pub fn error_kind<E: ?Sized>(_: &E) -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
