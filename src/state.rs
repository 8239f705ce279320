//! Mutable execution state, always treated copy-on-write between steps.
//!
//! DyGram has no per-channel versioning, so [`ExecutionState`] carries both
//! the immutable machine snapshot and the mutable per-path progress at once.
//! Clone-on-write sharing (spec §9: "paths share `machineSnapshot` by
//! reference, diverge lazily on attribute writes") is expressed with `Arc`
//! rather than a persistent-data-structure crate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::machine::MachineDefinition;
use crate::types::NodeName;

/// Minimum granularity of emitted `tracing` events and the `Log` effect
/// (spec §6.2/§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// Runtime limits (spec §6, "Configuration"), each with its documented default.
///
/// `cycle_threshold` is a field this crate adds beyond the literal `limits`
/// list, but §4.4's cycle-detection rule ("recurs more than a configured
/// threshold, default 3") names a threshold with no declared home for it;
/// added here rather than hardcoded so it can vary per execution like the
/// window it is checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_steps: u32,
    pub max_node_invocations: u32,
    pub timeout_ms: u64,
    pub cycle_detection_window: usize,
    cycle_threshold: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_node_invocations: 10,
            timeout_ms: 10_000,
            cycle_detection_window: 16,
            cycle_threshold: 3,
        }
    }
}

impl Limits {
    #[must_use]
    pub fn cycle_threshold(&self) -> u32 {
        self.cycle_threshold
    }

    pub fn set_cycle_threshold(&mut self, threshold: u32) {
        self.cycle_threshold = threshold;
    }
}

/// Status of one [`ExecutionPath`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStatus {
    Active,
    Waiting,
    Terminal,
    Failed,
}

/// Aggregate status returned by one call to [`crate::runtime::step`] (spec §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Continue,
    Waiting,
    Terminal,
    Failed,
}

/// One concurrent trace through the machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPath {
    pub id: Uuid,
    pub current_node: NodeName,
    /// Ordered multiset, not a set: cycle detection and invocation counts
    /// depend on repetition (spec §9, Open Question ii).
    pub visited_nodes: Vec<NodeName>,
    pub status: PathStatus,
    pub local_attributes: Option<FxHashMap<String, Value>>,
}

impl ExecutionPath {
    #[must_use]
    pub fn new_at(start: NodeName) -> Self {
        Self {
            id: Uuid::new_v4(),
            visited_nodes: vec![start.clone()],
            current_node: start,
            status: PathStatus::Active,
            local_attributes: None,
        }
    }
}

/// An immutable, append-only history entry.
///
/// `path_id` is a field this crate adds beyond the literal `Transition`
/// field list, required to satisfy §8's invariant that each path's
/// `currentNode` is recoverable as "the `to` of its last history entry" —
/// without a path discriminant, a shared global history could not be
/// attributed back to individual paths once more than one exists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub path_id: Uuid,
    pub from: NodeName,
    pub to: NodeName,
    pub edge_label: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub output: Option<Value>,
    /// Set when this transition represents a handler/limit/cycle failure
    /// rather than ordinary progress.
    pub error: Option<String>,
}

/// Structured reply from an external effect (spec §3/§4.3), folded back into
/// state by [`crate::runtime::apply_agent_result`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub next_node: Option<NodeName>,
    pub attribute_updates: Option<FxHashMap<String, Value>>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl AgentResult {
    /// Field-wise override merge used when a single step's effects produce
    /// more than one `AgentResult` (spec §4.3: "only one AgentResult is
    /// produced per step ... earlier AgentResults are merged by field-wise
    /// override"). Last-writer-wins on `next_node`/`output`/`error`;
    /// `attribute_updates` maps are merged key-wise, later keys winning.
    #[must_use]
    pub fn merge(mut self, other: AgentResult) -> AgentResult {
        if other.next_node.is_some() {
            self.next_node = other.next_node;
        }
        if let Some(updates) = other.attribute_updates {
            self.attribute_updates
                .get_or_insert_with(FxHashMap::default)
                .extend(updates);
        }
        if other.output.is_some() {
            self.output = other.output;
        }
        if other.error.is_some() {
            self.error = other.error;
        }
        self
    }
}

/// The mutable (but copy-on-write) state of one execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub machine_snapshot: Arc<MachineDefinition>,
    pub paths: Vec<ExecutionPath>,
    /// Keyed by `"nodeName.attrName"`.
    pub attributes: Arc<FxHashMap<String, Value>>,
    pub history: Vec<Transition>,
    pub node_invocation_counts: Arc<FxHashMap<NodeName, u32>>,
    pub step_count: u32,
    pub limits: Limits,
    pub log_level: LogLevel,
    pub pending_effect_id: Option<Uuid>,
}

impl ExecutionState {
    /// Mutable access to the attribute map, cloning it only if another
    /// `Arc` handle (e.g. a forked sibling path, or a checkpoint) is alive.
    pub fn attributes_mut(&mut self) -> &mut FxHashMap<String, Value> {
        Arc::make_mut(&mut self.attributes)
    }

    pub fn node_invocation_counts_mut(&mut self) -> &mut FxHashMap<NodeName, u32> {
        Arc::make_mut(&mut self.node_invocation_counts)
    }

    #[must_use]
    pub fn path(&self, id: Uuid) -> Option<&ExecutionPath> {
        self.paths.iter().find(|p| p.id == id)
    }

    pub fn path_mut(&mut self, id: Uuid) -> Option<&mut ExecutionPath> {
        self.paths.iter_mut().find(|p| p.id == id)
    }

    /// True once every path has left [`PathStatus::Active`]/[`PathStatus::Waiting`].
    #[must_use]
    pub fn all_paths_settled(&self) -> bool {
        self.paths
            .iter()
            .all(|p| matches!(p.status, PathStatus::Terminal | PathStatus::Failed))
    }

    #[must_use]
    pub fn any_path_failed(&self) -> bool {
        self.paths.iter().any(|p| p.status == PathStatus::Failed)
    }
}

/// A read-only projection of [`ExecutionState`] for UI/diagnostic consumers
/// (spec §4.4: `getVisualizationState`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VisualizationState {
    pub current_nodes: Vec<NodeName>,
    pub completed_nodes: Vec<NodeName>,
    pub failed_nodes: Vec<NodeName>,
    pub active_paths: usize,
}

impl From<&ExecutionState> for VisualizationState {
    fn from(state: &ExecutionState) -> Self {
        let mut current_nodes = Vec::new();
        let mut completed_nodes = Vec::new();
        let mut failed_nodes = Vec::new();
        let mut active_paths = 0;

        for path in &state.paths {
            match path.status {
                PathStatus::Active | PathStatus::Waiting => {
                    active_paths += 1;
                    current_nodes.push(path.current_node.clone());
                }
                PathStatus::Terminal => completed_nodes.push(path.current_node.clone()),
                PathStatus::Failed => failed_nodes.push(path.current_node.clone()),
            }
        }

        Self {
            current_nodes,
            completed_nodes,
            failed_nodes,
            active_paths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_result_merge_is_last_writer_wins_on_scalars() {
        let a = AgentResult {
            next_node: Some(NodeName::from("a")),
            output: Some(Value::from(1)),
            ..Default::default()
        };
        let b = AgentResult {
            next_node: Some(NodeName::from("b")),
            error: Some("boom".to_string()),
            ..Default::default()
        };
        let merged = a.merge(b);
        assert_eq!(merged.next_node, Some(NodeName::from("b")));
        assert_eq!(merged.output, Some(Value::from(1)));
        assert_eq!(merged.error, Some("boom".to_string()));
    }

    #[test]
    fn agent_result_merge_unions_attribute_updates() {
        let mut first = FxHashMap::default();
        first.insert("x".to_string(), Value::from(1));
        let mut second = FxHashMap::default();
        second.insert("y".to_string(), Value::from(2));

        let a = AgentResult {
            attribute_updates: Some(first),
            ..Default::default()
        };
        let b = AgentResult {
            attribute_updates: Some(second),
            ..Default::default()
        };
        let merged = a.merge(b);
        let updates = merged.attribute_updates.unwrap();
        assert_eq!(updates.get("x"), Some(&Value::from(1)));
        assert_eq!(updates.get("y"), Some(&Value::from(2)));
    }

    #[test]
    fn visualization_state_partitions_paths_by_status() {
        let machine = crate::machine::MachineBuilder::new("t")
            .node(crate::machine::Node::new("start"))
            .build()
            .unwrap();
        let mut state = ExecutionState {
            machine_snapshot: Arc::new(machine),
            paths: vec![ExecutionPath::new_at(NodeName::from("start"))],
            attributes: Arc::new(FxHashMap::default()),
            history: Vec::new(),
            node_invocation_counts: Arc::new(FxHashMap::default()),
            step_count: 0,
            limits: Limits::default(),
            log_level: LogLevel::default(),
            pending_effect_id: None,
        };
        state.paths[0].status = PathStatus::Terminal;
        let viz = VisualizationState::from(&state);
        assert_eq!(viz.completed_nodes, vec![NodeName::from("start")]);
        assert_eq!(viz.active_paths, 0);
    }
}
