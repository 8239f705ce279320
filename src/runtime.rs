//! The pure execution core (spec §4.4): `initialize`, `step`, and
//! `apply_agent_result`. No I/O, no async — effects are returned as data for
//! [`crate::facade`] to dispatch. Paths are looped in path-id order, each
//! applying its own "resolve node, then pick next edge" two-phase step;
//! there is no concurrent barrier/reducer merge across paths.

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::attributes::parse_attribute_value;
use crate::config::RuntimeConfig;
use crate::effects::Effect;
use crate::expr::{self, Env};
use crate::machine::{MachineDefinition, MachineValidationError};
use crate::message::Message;
use crate::state::{AgentResult, ExecutionPath, ExecutionState, PathStatus, StepStatus, Transition};
use crate::types::{NodeName, NodeType};

#[derive(Debug, Error, Diagnostic)]
pub enum RuntimeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] MachineValidationError),

    #[error("node not found: {0}")]
    #[diagnostic(code(dygram::runtime::node_not_found))]
    NodeNotFound(String),

    #[error("serialization failed: {0}")]
    #[diagnostic(code(dygram::runtime::serialization))]
    Serialization(#[from] serde_json::Error),
}

/// Result of one call to [`step`]: the successor state, the effects emitted
/// during this step (each tagged with the path that emitted it so the
/// facade can route a resulting [`AgentResult`] back to the right path), and
/// the aggregate status.
pub struct StepOutcome {
    pub next_state: ExecutionState,
    pub effects: Vec<(Uuid, Effect)>,
    pub status: StepStatus,
}

/// Validates `machine`, picks the start node, and constructs the single
/// initial active path (spec §4.4).
pub fn initialize(machine: MachineDefinition, config: &RuntimeConfig) -> Result<ExecutionState, RuntimeError> {
    machine.validate()?;
    let start = machine.start_node();

    let mut node_invocation_counts = FxHashMap::default();
    node_invocation_counts.insert(start.clone(), 1);

    Ok(ExecutionState {
        machine_snapshot: std::sync::Arc::new(machine),
        paths: vec![ExecutionPath::new_at(start)],
        attributes: std::sync::Arc::new(FxHashMap::default()),
        history: Vec::new(),
        node_invocation_counts: std::sync::Arc::new(node_invocation_counts),
        step_count: 0,
        limits: config.limits,
        log_level: config.log_level,
        pending_effect_id: None,
    })
}

/// Performs exactly one atomic progression over every active path, in path
/// id order (spec §4.4 step algorithm).
pub fn step(state: &ExecutionState, config: &RuntimeConfig) -> StepOutcome {
    let mut next = state.clone();
    let mut effects = Vec::new();

    if next.step_count >= next.limits.max_steps {
        for path in &mut next.paths {
            if path.status == PathStatus::Active {
                path.status = PathStatus::Terminal;
            }
        }
        return StepOutcome {
            next_state: next,
            effects,
            status: StepStatus::Terminal,
        };
    }

    let path_ids: Vec<Uuid> = next.paths.iter().map(|p| p.id).collect();
    let mut any_waiting = false;

    for path_id in path_ids {
        let Some(path_index) = next.paths.iter().position(|p| p.id == path_id) else {
            continue;
        };
        if next.paths[path_index].status != PathStatus::Active {
            continue;
        }

        let current_node = next.paths[path_index].current_node.clone();
        let invocation_count = *next
            .node_invocation_counts
            .get(&current_node)
            .unwrap_or(&0);
        if invocation_count >= next.limits.max_node_invocations {
            next.paths[path_index].status = PathStatus::Failed;
            effects.push((
                path_id,
                Effect::Log {
                    level: crate::state::LogLevel::Warn,
                    message: format!(
                        "node '{current_node}' exceeded max invocation count ({})",
                        next.limits.max_node_invocations
                    ),
                },
            ));
            continue;
        }

        let Some(node) = next.machine_snapshot.node(&current_node).cloned() else {
            next.paths[path_index].status = PathStatus::Failed;
            continue;
        };

        let (node_effects, deferred) = dispatch_node(&node, path_id, &current_node, &mut next);
        effects.extend(node_effects);

        if next.paths[path_index].status != PathStatus::Active {
            continue;
        }

        // A task node that emitted a ToolCall/ModelCall has not finished:
        // its output is not yet bound, so outgoing guards can't be evaluated
        // meaningfully. Suspend here; `apply_agent_result` resumes this exact
        // path (steps 4-7) once the effect executor settles the effect.
        if deferred {
            next.paths[path_index].status = PathStatus::Waiting;
            any_waiting = true;
            continue;
        }

        evaluate_and_advance(&mut next, config, path_index);
    }

    let any_active = next.paths.iter().any(|p| p.status == PathStatus::Active);
    let any_failed = next.paths.iter().any(|p| p.status == PathStatus::Failed);

    let status = if any_waiting {
        StepStatus::Waiting
    } else if any_active {
        StepStatus::Continue
    } else if !any_failed {
        StepStatus::Terminal
    } else {
        StepStatus::Failed
    };

    StepOutcome {
        next_state: next,
        effects,
        status,
    }
}

/// Dispatches one node's type-specific behavior (spec §4.4 step 3),
/// returning any effects it emits plus whether the node's completion must
/// now wait on an out-of-band effect (a `task` node's `ToolCall`/`ModelCall`).
fn dispatch_node(
    node: &crate::machine::Node,
    path_id: Uuid,
    current_node: &NodeName,
    state: &mut ExecutionState,
) -> (Vec<(Uuid, Effect)>, bool) {
    let mut effects = Vec::new();
    let mut deferred = false;
    let env = build_env(state, current_node);

    match node.effective_type() {
        NodeType::Input | NodeType::Context => {
            for attr in &node.attributes {
                let value = parse_attribute_value(attr);
                state
                    .attributes_mut()
                    .insert(format!("{current_node}.{}", attr.name), value);
            }
            effects.push((
                path_id,
                Effect::Log {
                    level: crate::state::LogLevel::Debug,
                    message: format!("committed attributes for '{current_node}'"),
                },
            ));
        }
        NodeType::Task => {
            let uses = node.attribute("uses");
            let prompt = node.attribute("prompt").or_else(|| node.attribute("messages"));

            if let Some(uses_attr) = uses {
                let tool_name = parse_attribute_value(uses_attr);
                let tool_name = tool_name.as_str().unwrap_or(&uses_attr.raw_value).to_string();
                let input = Value::Object(
                    node.attributes
                        .iter()
                        .filter(|a| a.name != "uses" && a.name != "prompt" && a.name != "messages")
                        .map(|a| (a.name.clone(), parse_attribute_value(a)))
                        .collect(),
                );
                effects.push((
                    path_id,
                    Effect::ToolCall {
                        tool_name,
                        input,
                        bind_to_node: current_node.clone(),
                    },
                ));
                deferred = true;
            }

            if let Some(prompt_attr) = prompt {
                let resolved = expr::resolve_template(&prompt_attr.raw_value, &env);
                effects.push((
                    path_id,
                    Effect::ModelCall {
                        messages: vec![Message::user(&resolved)],
                        tools: Vec::new(),
                        model_id: None,
                        bind_to_node: current_node.clone(),
                    },
                ));
                deferred = true;
            }
        }
        NodeType::Result => {
            let mut output = serde_json::Map::new();
            for attr in &node.attributes {
                let raw = parse_attribute_value(attr);
                let resolved = match raw {
                    Value::String(s) if s.contains("{{") => Value::String(expr::resolve_template(&s, &env)),
                    other => other,
                };
                state
                    .attributes_mut()
                    .insert(format!("{current_node}.{}", attr.name), resolved.clone());
                output.insert(attr.name.clone(), resolved);
            }
            if let Some(Transition { output: out, .. }) =
                state.history.iter_mut().rev().find(|t| t.path_id == path_id)
            {
                if out.is_none() {
                    *out = Some(Value::Object(output));
                }
            }
        }
        NodeType::State | NodeType::Unknown(_) => {}
    }

    (effects, deferred)
}

/// Evaluates `current_node`'s outgoing guards, advances `path_index` along
/// the first enabled edge, and forks a sibling path per additional enabled
/// edge when `config.fork_on_multiple_edges` (spec §4.4 steps 4-6).
fn evaluate_and_advance(state: &mut ExecutionState, config: &RuntimeConfig, path_index: usize) {
    let current_node = state.paths[path_index].current_node.clone();
    let env = build_env(state, &current_node);
    let enabled: Vec<crate::machine::Edge> = state
        .machine_snapshot
        .outgoing_edges(&current_node)
        .into_iter()
        .filter(|edge| match &edge.guard {
            None => true,
            Some(guard) => expr::evaluate_guard(guard, &env),
        })
        .cloned()
        .collect();

    if enabled.is_empty() {
        state.paths[path_index].status = PathStatus::Terminal;
        return;
    }

    let targets: Vec<crate::machine::Edge> = if enabled.len() == 1 || !config.fork_on_multiple_edges {
        vec![enabled[0].clone()]
    } else {
        enabled
    };

    let pristine = state.paths[path_index].clone();
    advance_path(state, path_index, &targets[0]);

    for extra in &targets[1..] {
        let mut forked = pristine.clone();
        forked.id = Uuid::new_v4();
        state.paths.push(forked);
        let new_index = state.paths.len() - 1;
        advance_path(state, new_index, extra);
    }
}

/// Builds the flat binding environment for guard/template evaluation at
/// `current_node`: declared attributes, plus the reserved
/// `errorCount`/`errors`/`activeState` bindings (spec §4.1).
fn build_env(state: &ExecutionState, current_node: &NodeName) -> Env {
    let mut env: Env = state
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let error_count = state
        .history
        .iter()
        .filter(|t| t.error.is_some())
        .count();
    env.insert("errorCount".to_string(), Value::from(error_count));
    env.insert("errors".to_string(), Value::from(error_count));
    env.insert("activeState".to_string(), Value::String(current_node.to_string()));
    env
}

/// Appends a transition for `path_index` along `edge`, updates its position
/// and counters, then runs cycle detection (spec §4.4 steps 6-7).
fn advance_path(state: &mut ExecutionState, path_index: usize, edge: &crate::machine::Edge) -> bool {
    let path_id = state.paths[path_index].id;
    let from = state.paths[path_index].current_node.clone();
    let to = edge.target.clone();

    let transition = Transition {
        path_id,
        from: from.clone(),
        to: to.clone(),
        edge_label: edge.label.clone(),
        timestamp: Utc::now(),
        output: None,
        error: None,
    };
    state.history.push(transition);
    state.step_count += 1;

    *state.node_invocation_counts_mut().entry(to.clone()).or_insert(0) += 1;

    state.paths[path_index].current_node = to.clone();
    state.paths[path_index].visited_nodes.push(to.clone());

    if cycle_detected(state, path_id, &from, &to) {
        state.paths[path_index].status = PathStatus::Failed;
        if let Some(last) = state.history.last_mut() {
            last.error = Some("CycleDetected".to_string());
        }
        return true;
    }

    false
}

/// Sliding-window multiset check (spec §4.4 step 7 / §9).
fn cycle_detected(state: &ExecutionState, path_id: Uuid, from: &NodeName, to: &NodeName) -> bool {
    let window = state.limits.cycle_detection_window;
    let threshold = state.limits.cycle_threshold();

    let path_history: Vec<&Transition> = state
        .history
        .iter()
        .filter(|t| t.path_id == path_id)
        .collect();
    let windowed = if path_history.len() > window {
        &path_history[path_history.len() - window..]
    } else {
        &path_history[..]
    };

    let occurrences = windowed
        .iter()
        .filter(|t| &t.from == from && &t.to == to)
        .count();

    occurrences >= threshold as usize
}

/// Merges an out-of-band [`AgentResult`] into `state` for `path_id` (spec
/// §4.4/§9): attribute updates are unioned into the shared map; a present
/// `error` fails the path; otherwise the path — previously left `Waiting` by
/// [`step`] — resumes edge evaluation from its current node now that the
/// effect's output is bound. A present `next_node` is honored as the
/// effect's own routing opinion (Open Question i) and taken directly,
/// bypassing guard evaluation.
pub fn apply_agent_result(
    mut state: ExecutionState,
    config: &RuntimeConfig,
    path_id: Uuid,
    result: AgentResult,
) -> ExecutionState {
    if let Some(updates) = result.attribute_updates {
        state.attributes_mut().extend(updates);
    }

    if let Some(error) = &result.error {
        if let Some(path) = state.path_mut(path_id) {
            path.status = PathStatus::Failed;
        }
        if let Some(last) = state.history.iter_mut().rev().find(|t| t.path_id == path_id) {
            last.error = Some(error.clone());
        }
        return state;
    }

    let Some(path_index) = state.paths.iter().position(|p| p.id == path_id) else {
        return state;
    };
    state.paths[path_index].status = PathStatus::Active;

    if let Some(next_node) = result.next_node {
        let edge = crate::machine::Edge::new(
            state.paths[path_index].current_node.clone(),
            next_node,
        );
        advance_path(&mut state, path_index, &edge);
    } else {
        evaluate_and_advance(&mut state, config, path_index);
    }

    state
}

pub fn serialize_state(state: &ExecutionState) -> Result<String, RuntimeError> {
    Ok(serde_json::to_string(state)?)
}

pub fn deserialize_state(json: &str) -> Result<ExecutionState, RuntimeError> {
    Ok(serde_json::from_str(json)?)
}

/// A read-only view derived from `state` (spec §4.4 `getVisualizationState`).
#[must_use]
pub fn visualization_state(state: &ExecutionState) -> crate::state::VisualizationState {
    crate::state::VisualizationState::from(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Edge, MachineBuilder, Node};

    fn config() -> RuntimeConfig {
        RuntimeConfig::builder().build()
    }

    #[test]
    fn linear_machine_runs_to_terminal() {
        let machine = MachineBuilder::new("linear")
            .node(Node::new("start"))
            .node(Node::new("a"))
            .node(Node::new("end"))
            .edge(Edge::new("start", "a"))
            .edge(Edge::new("a", "end"))
            .build()
            .unwrap();
        let cfg = config();
        let mut state = initialize(machine, &cfg).unwrap();

        // start->a
        let outcome1 = step(&state, &cfg);
        assert_eq!(outcome1.status, StepStatus::Continue);
        state = outcome1.next_state;

        // a->end
        let outcome2 = step(&state, &cfg);
        assert_eq!(outcome2.status, StepStatus::Continue);
        state = outcome2.next_state;

        // 'end' has no outgoing edges: this step terminates without a new transition.
        let outcome3 = step(&state, &cfg);
        assert_eq!(outcome3.status, StepStatus::Terminal);
        state = outcome3.next_state;

        assert_eq!(state.step_count, 2);
        assert_eq!(state.history[0].from.as_str(), "start");
        assert_eq!(state.history[0].to.as_str(), "a");
        assert_eq!(state.history[1].to.as_str(), "end");
        assert_eq!(state.paths[0].status, PathStatus::Terminal);
    }

    #[test]
    fn guarded_branch_takes_enabled_edge() {
        let machine = MachineBuilder::new("branch")
            .node(Node::new("start"))
            .node(Node::new("a"))
            .node(Node::new("b"))
            .edge(Edge::new("start", "a").with_guard("errorCount == 0"))
            .edge(Edge::new("start", "b").with_guard("errorCount > 0"))
            .build()
            .unwrap();
        let cfg = config();
        let state = initialize(machine, &cfg).unwrap();
        let outcome = step(&state, &cfg);
        assert_eq!(outcome.next_state.paths[0].current_node.as_str(), "a");
    }

    #[test]
    fn cycle_detection_fails_path_after_threshold() {
        let machine = MachineBuilder::new("cycle")
            .node(Node::new("start"))
            .node(Node::new("a"))
            .edge(Edge::new("start", "a"))
            .edge(Edge::new("a", "start"))
            .build()
            .unwrap();
        let cfg = RuntimeConfig::builder()
            .cycle_detection_window(4)
            .max_steps(100)
            .build();
        let mut cfg = cfg;
        cfg.limits.set_cycle_threshold(2);
        let mut state = initialize(machine, &cfg).unwrap();

        for _ in 0..4 {
            let outcome = step(&state, &cfg);
            state = outcome.next_state;
        }

        assert_eq!(state.paths[0].status, PathStatus::Failed);
        assert_eq!(state.history.last().unwrap().error.as_deref(), Some("CycleDetected"));
    }

    #[test]
    fn fork_on_multiple_enabled_edges_creates_two_terminal_paths() {
        let machine = MachineBuilder::new("fork")
            .node(Node::new("start"))
            .node(Node::new("a"))
            .node(Node::new("b"))
            .edge(Edge::new("start", "a"))
            .edge(Edge::new("start", "b"))
            .build()
            .unwrap();
        let cfg = config();
        let state = initialize(machine, &cfg).unwrap();
        let outcome = step(&state, &cfg);
        assert_eq!(outcome.next_state.paths.len(), 2);
        let outcome2 = step(&outcome.next_state, &cfg);
        assert!(outcome2
            .next_state
            .paths
            .iter()
            .all(|p| p.status == PathStatus::Terminal));
    }

    #[test]
    fn task_node_with_uses_waits_then_resumes_on_agent_result() {
        let machine = MachineBuilder::new("tool-task")
            .node(Node::new("start"))
            .node(
                Node::new("call")
                    .with_type("task")
                    .with_attribute(crate::machine::NodeAttribute::new("uses", "\"echo\"")),
            )
            .node(Node::new("end"))
            .edge(Edge::new("start", "call"))
            .edge(Edge::new("call", "end"))
            .build()
            .unwrap();
        let cfg = config();
        let mut state = initialize(machine, &cfg).unwrap();

        // start->call
        let outcome1 = step(&state, &cfg);
        assert_eq!(outcome1.status, StepStatus::Continue);
        state = outcome1.next_state;

        // dispatch 'call': emits a ToolCall and suspends the path.
        let outcome2 = step(&state, &cfg);
        assert_eq!(outcome2.status, StepStatus::Waiting);
        state = outcome2.next_state;
        assert_eq!(state.paths[0].status, PathStatus::Waiting);
        assert_eq!(state.paths[0].current_node.as_str(), "call");

        let path_id = state.paths[0].id;
        let result = AgentResult {
            output: Some(Value::from(1)),
            ..Default::default()
        };
        state = apply_agent_result(state, &cfg, path_id, result);

        assert_eq!(state.paths[0].current_node.as_str(), "end");
        assert_eq!(state.paths[0].status, PathStatus::Active);
    }

    #[test]
    fn template_resolution_in_result_node() {
        let machine = MachineBuilder::new("template")
            .node(Node::new("start"))
            .node(
                Node::new("a")
                    .with_type("input")
                    .with_attribute(crate::machine::NodeAttribute::new("x", "42").with_type("number")),
            )
            .node(
                Node::new("r")
                    .with_type("result")
                    .with_attribute(crate::machine::NodeAttribute::new("msg", "x is {{ a.x }}")),
            )
            .edge(Edge::new("start", "a"))
            .edge(Edge::new("a", "r"))
            .build()
            .unwrap();
        let cfg = config();
        let mut state = initialize(machine, &cfg).unwrap();
        // start->a, dispatch a (commit x) + a->r, dispatch r (template) + terminal.
        for _ in 0..3 {
            let outcome = step(&state, &cfg);
            state = outcome.next_state;
        }
        assert_eq!(
            state.attributes.get("r.msg"),
            Some(&Value::String("x is 42".to_string()))
        );
    }
}
