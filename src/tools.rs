//! The tool registry (spec §4.2): a name → implementation map consulted by
//! the effect executor when dispatching `ToolCall` effects.
//!
//! An `FxHashMap<String, Arc<dyn Tool>>` behind a small struct; registering a
//! name a second time replaces the earlier tool rather than erroring.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

/// Context passed to a tool alongside its input — currently just the
/// invoking node's name, room to grow without breaking the trait.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub node: crate::types::NodeName,
}

/// A registered tool: `(input, context) -> result`.
///
/// A tool implementation may do real async I/O (hence `Send + Sync` +
/// `async_trait`) and returns structured data directly; requesting a deferred external
/// response is a `ModelClient` concern (§4.3), not a `Tool` one.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn invoke(&self, input: Value, context: ToolContext) -> Result<Value, ToolError>;
}

#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    #[diagnostic(
        code(dygram::tool::not_found),
        help("register the tool before referencing it from a `uses` attribute")
    )]
    NotFound(String),

    #[error("tool '{name}' failed: {reason}")]
    #[diagnostic(code(dygram::tool::execution_failed))]
    ExecutionFailed { name: String, reason: String },
}

/// Maps tool names to implementations. Immutable during a `step` (spec
/// §4.2: "the registry itself is immutable during a step").
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: FxHashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool` under `name`, overwriting any existing registration.
    pub fn register(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools.insert(name.into(), tool);
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    #[must_use]
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub async fn invoke(
        &self,
        name: &str,
        input: Value,
        context: ToolContext,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.invoke(input, context).await.map_err(|e| match e {
            ToolError::ExecutionFailed { name, reason } => ToolError::ExecutionFailed { name, reason },
            other => other,
        })
    }
}
