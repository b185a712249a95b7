//! Tool execution contract.

use async_trait::async_trait;
use opentelemetry::Context;
use serde_json::Value;
use std::error::Error;

/// Boxed error carried by a failed tool result.
pub type ToolError = Box<dyn Error + Send + Sync + 'static>;

/// Outcome of one tool invocation.
///
/// Failure is a value, not an `Err`: [`ToolResult::is_success`] decides the
/// branch, and [`ToolResult::error`] says why when it can.
pub trait ToolResult: Send + Sync {
    fn name(&self) -> &str;

    fn is_success(&self) -> bool;

    fn output(&self) -> &str;

    fn error(&self) -> Option<&(dyn Error + Send + Sync + 'static)>;
}

/// Runs tools by name.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    type Output: ToolResult;

    async fn execute(&self, cx: &Context, name: &str, args: Value) -> Self::Output;
}

/// Plain tool result.
#[derive(Debug)]
pub struct ToolOutput {
    name: String,
    output: String,
    error: Option<ToolError>,
}

impl ToolOutput {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<ToolError>) -> Self {
        Self {
            name: name.into(),
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

impl ToolResult for ToolOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn output(&self) -> &str {
        &self.output
    }

    fn error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.error.as_deref()
    }
}
