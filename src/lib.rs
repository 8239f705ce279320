//! # DyGram: a declarative graph/state-machine execution runtime
//!
//! DyGram machines are directed graphs of typed nodes (`input`, `context`,
//! `task`, `result`, `state`) connected by labeled, optionally-guarded
//! edges. This crate implements the execution runtime only: a pure `step`
//! function over an immutable [`machine::MachineDefinition`] and a
//! copy-on-write [`state::ExecutionState`], a sandboxed expression language
//! for guards and `{{ }}` templates, and a stateful [`facade::MachineExecutor`]
//! that dispatches the effects a step emits (tool calls, model calls, virtual
//! filesystem reads/writes, log records) out-of-band. Parsing DyGram source
//! text into a [`machine::MachineDefinition`] is out of scope; build one with
//! [`machine::MachineBuilder`].
//!
//! ## Core concepts
//!
//! - **Nodes and edges**: [`machine::Node`]/[`machine::Edge`], assembled into
//!   an immutable [`machine::MachineDefinition`].
//! - **Execution state**: [`state::ExecutionState`] holds one or more
//!   concurrent [`state::ExecutionPath`]s, the flat attribute environment,
//!   and an append-only transition [`state::Transition`] history.
//! - **Expressions**: [`expr`] evaluates guard expressions and resolves
//!   `{{ }}` templates over a flat, fail-closed sandbox.
//! - **Effects**: [`effects::Effect`] is the only way the pure core talks to
//!   the outside world; [`effects::EffectExecutor`] fulfills them against a
//!   [`tools::ToolRegistry`] and a [`model::ModelClient`].
//! - **Facade**: [`facade::MachineExecutor`] drives [`runtime::step`] and
//!   [`runtime::apply_agent_result`] to completion, exposing
//!   checkpoint/restore/serialize.
//!
//! ## Quick start
//!
//! ```
//! use dygram_runtime::config::RuntimeConfig;
//! use dygram_runtime::machine::{Edge, MachineBuilder, Node, NodeAttribute};
//! use dygram_runtime::runtime::{initialize, step};
//! use dygram_runtime::state::StepStatus;
//!
//! let machine = MachineBuilder::new("greeting")
//!     .node(Node::new("start"))
//!     .node(
//!         Node::new("name")
//!             .with_type("input")
//!             .with_attribute(NodeAttribute::new("value", "\"world\"")),
//!     )
//!     .node(
//!         Node::new("greet")
//!             .with_type("result")
//!             .with_attribute(NodeAttribute::new("message", "Hello, {{ name.value }}!")),
//!     )
//!     .edge(Edge::new("start", "name"))
//!     .edge(Edge::new("name", "greet"))
//!     .build()
//!     .expect("machine definition validates");
//!
//! let config = RuntimeConfig::builder().build();
//! let mut state = initialize(machine, &config).expect("start node exists");
//!
//! loop {
//!     let outcome = step(&state, &config);
//!     state = outcome.next_state;
//!     if outcome.status == StepStatus::Terminal {
//!         break;
//!     }
//! }
//!
//! assert_eq!(
//!     state.attributes.get("greet.message"),
//!     Some(&serde_json::Value::String("Hello, world!".to_string()))
//! );
//! ```
//!
//! Driving tool/model effects, forking, cycle limits, and checkpointing goes
//! through [`facade::MachineExecutor`] instead of calling [`runtime::step`]
//! directly — see its doc comment for the waiting/resume protocol.

pub mod attributes;
pub mod checkpoint;
pub mod config;
pub mod effects;
pub mod expr;
pub mod facade;
pub mod machine;
pub mod message;
pub mod model;
pub mod runtime;
pub mod state;
pub mod telemetry;
pub mod tools;
pub mod types;
pub mod vfs;
