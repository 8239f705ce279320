//! The abstract model-client interface consumed by `ModelCall` effects
//! (spec §6): `invokeWithTools(messages, tools, modelId?) -> ModelResponse`.
//!
//! Concrete providers are explicitly out of scope (spec §1); this module
//! only defines the trait boundary, consumed as an `async_trait` interface
//! rather than bundling a concrete implementation into the core crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::Message;

/// One block of a [`ModelResponse`]: either plain text or a request to
/// invoke a tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
}

impl ModelResponse {
    /// Concatenation of all `text` blocks, the form used to populate a
    /// result node's resolved output (spec §8 scenario 4).
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolUse { .. } => None,
            })
            .collect()
    }
}

/// A tool advertised to the model alongside a prompt, by name and a JSON
/// schema for its input — deliberately minimal, since the core runtime never
/// inspects this beyond passing it through to the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub input_schema: serde_json::Value,
}

/// Describes a response that has not arrived yet: the effect executor
/// serializes this to hand back to an external caller (spec §4.3/§6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingModelRequest {
    pub request_id: uuid::Uuid,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub model_id: Option<String>,
}

/// Outcome of a model invocation attempt: either an answer is available now
/// ("immediate" mode, spec §4.3) or it must be supplied later out-of-band
/// ("deferred" mode).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ModelOutcome {
    Ready(ModelResponse),
    Pending(PendingModelRequest),
}

/// Consumed abstract model interface. `Send + Sync` and used behind
/// `Arc<dyn ModelClient>`.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke_with_tools(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolSpec>,
        model_id: Option<String>,
    ) -> ModelOutcome;
}
