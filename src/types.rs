//! Core identifying types shared across the runtime.
//!
//! These are the fundamental vocabulary of a DyGram machine: node names and
//! the coarse type tag attached to a node. Richer structural types
//! (`MachineDefinition`, `Node`, `Edge`) live in [`crate::machine`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a node within a machine. Unique within a [`crate::machine::MachineDefinition`].
///
/// `NodeName` is a thin newtype over `String` rather than a closed enum: unlike
/// a fixed Start/End pair, DyGram node names are entirely parser-supplied and
/// the runtime never needs to special-case a particular spelling except for
/// the conventional `start` entry point (see
/// [`crate::machine::MachineDefinition::start_node`]). It keeps the
/// `encode`/`decode` persistence idiom used elsewhere in this codebase so
/// checkpoints stay forward-compatible with unrecognized names.
///
/// # Examples
///
/// ```rust
/// use dygram_runtime::types::NodeName;
///
/// let n = NodeName::new("fetch_weather");
/// assert_eq!(n.encode(), "fetch_weather");
/// assert_eq!(NodeName::decode(&n.encode()), n);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeName(pub String);

impl NodeName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive match against the conventional entry-point name `"start"`.
    #[must_use]
    pub fn is_conventional_start(&self) -> bool {
        self.0.eq_ignore_ascii_case("start")
    }

    /// Encode for persistence. Currently identity; kept distinct from `as_str`
    /// so future encodings (e.g. namespacing) don't ripple through callers.
    #[must_use]
    pub fn encode(&self) -> String {
        self.0.clone()
    }

    #[must_use]
    pub fn decode(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Coarse category of a node, driving dispatch in [`crate::runtime`].
///
/// Unrecognized type strings from the parser fall back to [`NodeType::Unknown`]
/// rather than failing validation — `state` and unrecognized node types are
/// treated identically (pass-through), so an unfamiliar tag is never fatal
/// on its own.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Task,
    Input,
    Context,
    Result,
    State,
    Unknown(String),
}

impl NodeType {
    #[must_use]
    pub fn is_result(&self) -> bool {
        matches!(self, NodeType::Result)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Task => write!(f, "task"),
            NodeType::Input => write!(f, "input"),
            NodeType::Context => write!(f, "context"),
            NodeType::Result => write!(f, "result"),
            NodeType::State => write!(f, "state"),
            NodeType::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "task" => NodeType::Task,
            "input" => NodeType::Input,
            "context" => NodeType::Context,
            "result" | "output" => NodeType::Result,
            "state" => NodeType::State,
            other => NodeType::Unknown(other.to_string()),
        }
    }
}
