//! The parsed, immutable input to the runtime: a machine's nodes and edges.
//!
//! A [`MachineDefinition`] is produced by the (out-of-scope) DyGram parser and
//! consumed read-only for the lifetime of an execution. A machine is pure
//! data with no attached behavior: node dispatch is by
//! [`crate::types::NodeType`] inside [`crate::runtime`], not by a registered
//! closure or handler per node.
//!
//! # Examples
//!
//! ```rust
//! use dygram_runtime::machine::{MachineBuilder, Node, Edge};
//!
//! let machine = MachineBuilder::new("greeting")
//!     .node(Node::new("start"))
//!     .node(Node::new("a"))
//!     .node(Node::new("end"))
//!     .edge(Edge::new("start", "a"))
//!     .edge(Edge::new("a", "end"))
//!     .build()
//!     .expect("valid machine");
//!
//! assert_eq!(machine.start_node().as_str(), "start");
//! ```

use std::collections::HashSet;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{NodeName, NodeType};

/// A single declared attribute on a node, as the parser emits it: typed but
/// not yet parsed into a runtime value (see [`crate::attributes::parse_attribute_value`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeAttribute {
    pub name: String,
    /// Declared type tag (`"number"`, `"boolean"`, `"string"`, or absent/other for structured).
    pub attr_type: Option<String>,
    pub raw_value: String,
}

impl NodeAttribute {
    #[must_use]
    pub fn new(name: impl Into<String>, raw_value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attr_type: None,
            raw_value: raw_value.into(),
        }
    }

    #[must_use]
    pub fn with_type(mut self, attr_type: impl Into<String>) -> Self {
        self.attr_type = Some(attr_type.into());
        self
    }
}

/// A node declaration: a name, an optional type tag, and declared attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: NodeName,
    pub node_type: Option<NodeType>,
    pub attributes: Vec<NodeAttribute>,
}

impl Node {
    #[must_use]
    pub fn new(name: impl Into<NodeName>) -> Self {
        Self {
            name: name.into(),
            node_type: None,
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_type(mut self, node_type: impl Into<NodeType>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attr: NodeAttribute) -> Self {
        self.attributes.push(attr);
        self
    }

    /// The node's effective type, defaulting to [`NodeType::Unknown`] of the
    /// empty string when undeclared — treated as pass-through by the runtime.
    #[must_use]
    pub fn effective_type(&self) -> NodeType {
        self.node_type
            .clone()
            .unwrap_or_else(|| NodeType::Unknown(String::new()))
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&NodeAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A directed edge between two declared nodes, optionally labeled and guarded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeName,
    pub target: NodeName,
    pub label: Option<String>,
    pub guard: Option<String>,
}

impl Edge {
    #[must_use]
    pub fn new(source: impl Into<NodeName>, target: impl Into<NodeName>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            label: None,
            guard: None,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }
}

/// The immutable, parsed input to an execution: all nodes and edges of one machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachineDefinition {
    pub title: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Errors that can prevent a [`MachineDefinition`] from being treated as valid.
///
/// Surfaced only from [`crate::runtime::initialize`] (or [`MachineBuilder::build`]):
/// fatal, no state produced.
#[derive(Debug, Error, Diagnostic)]
pub enum MachineValidationError {
    #[error("machine has no nodes")]
    #[diagnostic(
        code(dygram::machine::empty),
        help("a machine must declare at least one node")
    )]
    Empty,

    #[error("duplicate node name: {0}")]
    #[diagnostic(
        code(dygram::machine::duplicate_node),
        help("node names must be unique within a machine")
    )]
    DuplicateNode(String),

    #[error("edge references unknown node: {0}")]
    #[diagnostic(
        code(dygram::machine::dangling_edge),
        help("every edge endpoint must reference a declared node")
    )]
    DanglingEdge(String),
}

impl MachineDefinition {
    /// Validates node-name uniqueness and edge-endpoint references.
    ///
    /// This mirrors `GraphBuilder::compile`'s validation pass, but stays a
    /// standalone function since `MachineDefinition` carries no executable
    /// node registry to compile against.
    pub fn validate(&self) -> Result<(), MachineValidationError> {
        if self.nodes.is_empty() {
            return Err(MachineValidationError::Empty);
        }

        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(node.name.clone()) {
                return Err(MachineValidationError::DuplicateNode(
                    node.name.as_str().to_string(),
                ));
            }
        }

        for edge in &self.edges {
            if !seen.contains(&edge.source) {
                return Err(MachineValidationError::DanglingEdge(
                    edge.source.as_str().to_string(),
                ));
            }
            if !seen.contains(&edge.target) {
                return Err(MachineValidationError::DanglingEdge(
                    edge.target.as_str().to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The designated entry point: the node named `start` (case-insensitive)
    /// if one exists, otherwise the first declared node.
    ///
    /// Callers must validate the machine first; an empty machine has no
    /// start node to return.
    #[must_use]
    pub fn start_node(&self) -> NodeName {
        self.nodes
            .iter()
            .find(|n| n.name.is_conventional_start())
            .or_else(|| self.nodes.first())
            .map(|n| n.name.clone())
            .expect("validate() must be called before start_node()")
    }

    #[must_use]
    pub fn node(&self, name: &NodeName) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.name == name)
    }

    /// Outgoing edges from `name`, in declaration order.
    #[must_use]
    pub fn outgoing_edges(&self, name: &NodeName) -> Vec<&Edge> {
        self.edges.iter().filter(|e| &e.source == name).collect()
    }
}

/// Fluent chainable-method construction of a [`MachineDefinition`].
#[derive(Debug, Default)]
pub struct MachineBuilder {
    title: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl MachineBuilder {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    #[must_use]
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Validates and produces the finished [`MachineDefinition`].
    pub fn build(self) -> Result<MachineDefinition, MachineValidationError> {
        let machine = MachineDefinition {
            title: self.title,
            nodes: self.nodes,
            edges: self.edges,
        };
        machine.validate()?;
        Ok(machine)
    }
}
