//! Effects: the only communication out of the pure runtime core (spec §3),
//! and the executor that fulfills them (spec §4.3).
//!
//! [`EffectExecutor`] holds its out-of-band collaborators
//! (`Arc<ToolRegistry>`, `Arc<dyn ModelClient>`, `Option<Arc<dyn Vfs>>`)
//! resolved once at facade construction, and fulfills a path's effects in
//! emission order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::message::Message;
use crate::model::{ContentBlock, ModelClient, ModelOutcome, PendingModelRequest, ToolSpec};
use crate::state::{AgentResult, LogLevel};
use crate::tools::{ToolContext, ToolError, ToolRegistry};
use crate::types::NodeName;
use crate::vfs::{Vfs, VfsError};

/// A declarative request emitted by one runtime step, for out-of-band
/// fulfillment by [`EffectExecutor`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    ToolCall {
        tool_name: String,
        input: Value,
        bind_to_node: NodeName,
    },
    ModelCall {
        messages: Vec<Message>,
        tools: Vec<ToolSpec>,
        model_id: Option<String>,
        bind_to_node: NodeName,
    },
    VfsWrite {
        path: String,
        content: String,
    },
    VfsRead {
        path: String,
        bind_to_attribute: String,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

/// A structured log record (spec §6 produced surface:
/// `{level, message, timestamp, pathId?, node?}`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub path_id: Option<Uuid>,
    pub node: Option<NodeName>,
}

/// Everything needed for an external caller to answer a deferred `ModelCall`
/// (spec §4.3/§6): `{requestId, node, messages, tools, modelId?}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub request_id: Uuid,
    pub node: NodeName,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub model_id: Option<String>,
}

impl PendingRequest {
    fn from_model_request(node: NodeName, req: PendingModelRequest) -> Self {
        Self {
            request_id: req.request_id,
            node,
            messages: req.messages,
            tools: req.tools,
            model_id: req.model_id,
        }
    }
}

/// Result of fulfilling one step's worth of effects.
///
/// `Pending` is "not an error in the state sense" (spec §4.3/§9) — a control
/// signal, not a failure — so it is a variant here, not an `Err`.
#[derive(Clone, Debug, PartialEq)]
pub enum FulfillOutcome {
    Settled(AgentResult),
    Pending(PendingRequest),
}

#[derive(Debug, Error, Diagnostic)]
pub enum EffectError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Vfs(#[from] VfsError),
}

/// Interprets the effects emitted by one runtime step.
pub struct EffectExecutor {
    tools: Arc<ToolRegistry>,
    model: Arc<dyn ModelClient>,
    vfs: Option<Arc<dyn Vfs>>,
}

impl EffectExecutor {
    #[must_use]
    pub fn new(tools: Arc<ToolRegistry>, model: Arc<dyn ModelClient>, vfs: Option<Arc<dyn Vfs>>) -> Self {
        Self { tools, model, vfs }
    }

    /// Fulfills `effects` sequentially in emission order (spec §4.3:
    /// "effects from a single step are processed sequentially in emission
    /// order"). Stops early and returns [`FulfillOutcome::Pending`] the
    /// moment a deferred model call is hit; otherwise accumulates one
    /// [`AgentResult`] via field-wise override merge across every effect
    /// that produced one.
    pub async fn fulfill(&self, path_id: Uuid, effects: &[Effect]) -> FulfillOutcome {
        let mut accumulated = AgentResult::default();

        for effect in effects {
            match effect {
                Effect::ToolCall {
                    tool_name,
                    input,
                    bind_to_node,
                } => {
                    let result = self
                        .tools
                        .invoke(
                            tool_name,
                            input.clone(),
                            ToolContext {
                                node: bind_to_node.clone(),
                            },
                        )
                        .await;
                    accumulated = accumulated.merge(match result {
                        Ok(output) => bound_output(bind_to_node, output),
                        Err(e) => AgentResult {
                            error: Some(e.to_string()),
                            ..Default::default()
                        },
                    });
                }
                Effect::ModelCall {
                    messages,
                    tools,
                    model_id,
                    bind_to_node,
                } => {
                    match self
                        .model
                        .invoke_with_tools(messages.clone(), tools.clone(), model_id.clone())
                        .await
                    {
                        ModelOutcome::Ready(response) => {
                            accumulated = accumulated.merge(model_response_result(bind_to_node, &response));
                        }
                        ModelOutcome::Pending(req) => {
                            return FulfillOutcome::Pending(PendingRequest::from_model_request(
                                bind_to_node.clone(),
                                req,
                            ));
                        }
                    }
                }
                Effect::VfsWrite { path, content } => {
                    let outcome = match &self.vfs {
                        None => Err(VfsError::Unavailable),
                        Some(vfs) => vfs.write_file(path, content).await,
                    };
                    if let Err(e) = outcome {
                        accumulated = accumulated.merge(AgentResult {
                            error: Some(e.to_string()),
                            ..Default::default()
                        });
                    }
                }
                Effect::VfsRead {
                    path,
                    bind_to_attribute,
                } => {
                    let outcome = match &self.vfs {
                        None => Err(VfsError::Unavailable),
                        Some(vfs) => vfs.read_file(path).await,
                    };
                    accumulated = accumulated.merge(match outcome {
                        Ok(content) => {
                            let mut updates = FxHashMap::default();
                            updates.insert(bind_to_attribute.clone(), Value::String(content));
                            AgentResult {
                                attribute_updates: Some(updates),
                                ..Default::default()
                            }
                        }
                        Err(e) => AgentResult {
                            error: Some(e.to_string()),
                            ..Default::default()
                        },
                    });
                }
                Effect::Log { level, message } => {
                    emit_log(*level, message, path_id);
                }
            }
        }

        FulfillOutcome::Settled(accumulated)
    }
}

fn bound_output(bind_to_node: &NodeName, output: Value) -> AgentResult {
    let mut updates = FxHashMap::default();
    updates.insert(format!("{bind_to_node}.output"), output.clone());
    AgentResult {
        attribute_updates: Some(updates),
        output: Some(output),
        ..Default::default()
    }
}

fn model_response_result(bind_to_node: &NodeName, response: &crate::model::ModelResponse) -> AgentResult {
    let text = response.text();
    let has_tool_use = response
        .content
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
    if has_tool_use {
        debug!(node = %bind_to_node, "model response included tool_use blocks not dispatched by this executor");
    }
    bound_output(bind_to_node, Value::String(text))
}

fn emit_log(level: LogLevel, message: &str, path_id: Uuid) {
    match level {
        LogLevel::Debug => debug!(%path_id, message),
        LogLevel::Info => info!(%path_id, message),
        LogLevel::Warn => warn!(%path_id, message),
        LogLevel::Error => error!(%path_id, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl crate::tools::Tool for EchoTool {
        async fn invoke(&self, input: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
            Ok(input)
        }
    }

    struct StubModel;

    #[async_trait]
    impl ModelClient for StubModel {
        async fn invoke_with_tools(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolSpec>,
            _model_id: Option<String>,
        ) -> ModelOutcome {
            ModelOutcome::Ready(crate::model::ModelResponse {
                content: vec![ContentBlock::Text {
                    text: "42".to_string(),
                }],
            })
        }
    }

    fn executor() -> EffectExecutor {
        let mut registry = ToolRegistry::new();
        registry.register("echo", Arc::new(EchoTool));
        EffectExecutor::new(Arc::new(registry), Arc::new(StubModel), None)
    }

    #[tokio::test]
    async fn tool_call_binds_output_to_node_attribute() {
        let outcome = executor()
            .fulfill(
                Uuid::new_v4(),
                &[Effect::ToolCall {
                    tool_name: "echo".into(),
                    input: Value::from(7),
                    bind_to_node: NodeName::from("n"),
                }],
            )
            .await;
        match outcome {
            FulfillOutcome::Settled(result) => {
                let updates = result.attribute_updates.unwrap();
                assert_eq!(updates.get("n.output"), Some(&Value::from(7)));
            }
            FulfillOutcome::Pending(_) => panic!("expected settled outcome"),
        }
    }

    #[tokio::test]
    async fn model_call_ready_binds_text_output() {
        let outcome = executor()
            .fulfill(
                Uuid::new_v4(),
                &[Effect::ModelCall {
                    messages: vec![Message::user("hi")],
                    tools: vec![],
                    model_id: None,
                    bind_to_node: NodeName::from("n"),
                }],
            )
            .await;
        match outcome {
            FulfillOutcome::Settled(result) => {
                assert_eq!(result.output, Some(Value::String("42".into())));
            }
            FulfillOutcome::Pending(_) => panic!("expected settled outcome"),
        }
    }

    #[tokio::test]
    async fn vfs_effect_without_vfs_configured_reports_unavailable() {
        let outcome = executor()
            .fulfill(
                Uuid::new_v4(),
                &[Effect::VfsRead {
                    path: "/a".into(),
                    bind_to_attribute: "a.content".into(),
                }],
            )
            .await;
        match outcome {
            FulfillOutcome::Settled(result) => {
                assert!(result.error.unwrap().contains("no virtual filesystem"));
            }
            FulfillOutcome::Pending(_) => panic!("expected settled outcome"),
        }
    }

    #[tokio::test]
    async fn later_tool_call_overrides_earlier_on_merge() {
        let outcome = executor()
            .fulfill(
                Uuid::new_v4(),
                &[
                    Effect::ToolCall {
                        tool_name: "echo".into(),
                        input: Value::from(1),
                        bind_to_node: NodeName::from("n"),
                    },
                    Effect::ToolCall {
                        tool_name: "echo".into(),
                        input: Value::from(2),
                        bind_to_node: NodeName::from("n"),
                    },
                ],
            )
            .await;
        match outcome {
            FulfillOutcome::Settled(result) => {
                assert_eq!(result.output, Some(Value::from(2)));
            }
            FulfillOutcome::Pending(_) => panic!("expected settled outcome"),
        }
    }
}
