//! Agent Telemetry: tracing, metrics and log correlation for agent runtimes.
//!
//! Every LLM call, tool invocation and agent run produces one span, a fixed
//! set of metrics and trace-correlated logs, whether telemetry is enabled,
//! disabled or only partly configured.
//!
//! # Architecture
//!
//! - **Two variants per signal**: OpenTelemetry-backed and no-op, behind one
//!   trait, so callers never branch on "is telemetry on"
//! - **Explicit context**: wrappers take a [`Telemetry`] bundle; the global
//!   accessors are only for the outermost layer
//! - **Exactly-once bookkeeping**: each wrapped call records its duration and
//!   counters once and ends its span once, streams included
//!
//! # Modules
//!
//! - [`catalog`]: attribute keys and metric declarations
//! - [`config`]: telemetry configuration with defaulting and validation
//! - [`error`]: setup and teardown errors
//! - [`global`]: process-wide provider with no-op fallbacks
//! - [`llm`]: language-model client contract
//! - [`observability`]: span, metrics and logger abstractions
//! - [`provider`]: backend lifecycle and shutdown
//! - [`tool`]: tool execution contract
//! - [`traced`]: instrumented wrappers

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // traced::provider::TracedProvider is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::cast_precision_loss,        // Counts and sizes become f64 metric values
    clippy::cast_possible_truncation,   // Millisecond durations fit in u64
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod global;
pub mod llm;
pub mod observability;
pub mod provider;
pub mod tool;
pub mod traced;

pub use config::Config;
pub use error::{Result, TelemetryError};
pub use provider::{Provider, Telemetry};

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) run ID.
///
/// # Example
///
/// ```
/// let id = agent_telemetry::generate_run_id();
/// assert!(id.len() == 36); // UUID string format
/// ```
#[must_use]
pub fn generate_run_id() -> String {
    Uuid::now_v7().to_string()
}
