//! Metric names, units and kinds.
//!
//! Every instrument the traced wrappers record is declared here. The metrics
//! backends look definitions up by name to attach unit and description.

/// Measurement unit of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    Milliseconds,
    Seconds,
    Bytes,
    Count,
}

impl Unit {
    /// UCUM-style unit string understood by OTLP consumers.
    pub fn as_str(self) -> &'static str {
        match self {
            Unit::None => "1",
            Unit::Milliseconds => "ms",
            Unit::Seconds => "s",
            Unit::Bytes => "By",
            Unit::Count => "{count}",
        }
    }
}

/// Instrument shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Counter,
    Histogram,
    Gauge,
}

/// A named instrument declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: Unit,
    pub kind: InstrumentKind,
}

const fn def(
    name: &'static str,
    kind: InstrumentKind,
    unit: Unit,
    description: &'static str,
) -> MetricDef {
    MetricDef {
        name,
        description,
        unit,
        kind,
    }
}

use InstrumentKind::{Counter, Gauge, Histogram};

pub const AGENT_RUNS: MetricDef = def("agent.runs", Counter, Unit::Count, "Agent runs finished");
pub const AGENT_RUN_DURATION: MetricDef = def(
    "agent.run.duration",
    Histogram,
    Unit::Milliseconds,
    "Wall-clock duration of an agent run",
);
pub const AGENT_ITERATIONS: MetricDef = def(
    "agent.iterations",
    Counter,
    Unit::Count,
    "Reasoning iterations across all runs",
);
pub const AGENT_ERRORS: MetricDef =
    def("agent.errors", Counter, Unit::Count, "Agent runs that ended in error");
pub const AGENT_ACTIVE_RUNS: MetricDef =
    def("agent.active_runs", Gauge, Unit::Count, "Agent runs currently in flight");
pub const AGENT_TOKENS: MetricDef = def(
    "agent.tokens",
    Counter,
    Unit::Count,
    "Tokens attributed to agent runs, split by llm.token_type",
);

pub const LLM_REQUESTS: MetricDef =
    def("llm.requests", Counter, Unit::Count, "Completed LLM requests by status");
pub const LLM_REQUEST_DURATION: MetricDef = def(
    "llm.request.duration",
    Histogram,
    Unit::Milliseconds,
    "End-to-end LLM request latency",
);
pub const LLM_PROMPT_TOKENS: MetricDef =
    def("llm.tokens.prompt", Counter, Unit::Count, "Prompt tokens consumed");
pub const LLM_COMPLETION_TOKENS: MetricDef =
    def("llm.tokens.completion", Counter, Unit::Count, "Completion tokens produced");
pub const LLM_TOTAL_TOKENS: MetricDef =
    def("llm.tokens.total", Counter, Unit::Count, "Prompt plus completion tokens");
pub const LLM_ERRORS: MetricDef = def("llm.errors", Counter, Unit::Count, "Failed LLM requests");
pub const LLM_RETRIES: MetricDef = def(
    "llm.retries",
    Counter,
    Unit::Count,
    "Retries performed by LLM clients",
);
pub const LLM_EMBEDDINGS: MetricDef =
    def("llm.embeddings", Counter, Unit::Count, "Texts embedded");

pub const TOOL_CALLS: MetricDef =
    def("tool.calls", Counter, Unit::Count, "Tool invocations by status");
pub const TOOL_DURATION: MetricDef = def(
    "tool.duration",
    Histogram,
    Unit::Milliseconds,
    "Tool execution latency",
);
pub const TOOL_ERRORS: MetricDef =
    def("tool.errors", Counter, Unit::Count, "Failed tool invocations");

pub const MEMORY_OPERATIONS: MetricDef = def(
    "memory.operations",
    Counter,
    Unit::Count,
    "Memory store operations by operation and status",
);
pub const MEMORY_DURATION: MetricDef = def(
    "memory.operation.duration",
    Histogram,
    Unit::Milliseconds,
    "Memory store operation latency",
);
pub const MEMORY_SIZE: MetricDef =
    def("memory.size", Gauge, Unit::Bytes, "Last observed memory store size");

pub const RAG_RETRIEVALS: MetricDef =
    def("rag.retrievals", Counter, Unit::Count, "Retrieval queries issued");
pub const RAG_RETRIEVAL_DURATION: MetricDef = def(
    "rag.retrieval.duration",
    Histogram,
    Unit::Milliseconds,
    "Retrieval query latency",
);
pub const RAG_DOCUMENTS: MetricDef = def(
    "rag.documents.retrieved",
    Histogram,
    Unit::Count,
    "Documents returned per retrieval",
);

/// Every declared instrument.
pub const ALL: &[MetricDef] = &[
    AGENT_RUNS,
    AGENT_RUN_DURATION,
    AGENT_ITERATIONS,
    AGENT_ERRORS,
    AGENT_ACTIVE_RUNS,
    AGENT_TOKENS,
    LLM_REQUESTS,
    LLM_REQUEST_DURATION,
    LLM_PROMPT_TOKENS,
    LLM_COMPLETION_TOKENS,
    LLM_TOTAL_TOKENS,
    LLM_ERRORS,
    LLM_RETRIES,
    LLM_EMBEDDINGS,
    TOOL_CALLS,
    TOOL_DURATION,
    TOOL_ERRORS,
    MEMORY_OPERATIONS,
    MEMORY_DURATION,
    MEMORY_SIZE,
    RAG_RETRIEVALS,
    RAG_RETRIEVAL_DURATION,
    RAG_DOCUMENTS,
];

/// Find the declaration for an instrument name.
pub fn lookup(name: &str) -> Option<&'static MetricDef> {
    ALL.iter().find(|d| d.name == name)
}
