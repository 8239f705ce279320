//! Scenario 5: a node with more than one simultaneously-enabled outgoing
//! edge forks a sibling path per extra edge rather than picking just one
//! (SPEC_FULL §8, §4.4 steps 4-6).

use std::sync::Arc;

use async_trait::async_trait;
use dygram_runtime::config::RuntimeConfig;
use dygram_runtime::facade::MachineExecutor;
use dygram_runtime::machine::{Edge, MachineBuilder, Node};
use dygram_runtime::message::Message;
use dygram_runtime::model::{ModelClient, ModelOutcome, ModelResponse, ToolSpec};
use dygram_runtime::state::PathStatus;
use dygram_runtime::tools::ToolRegistry;

struct UnusedModel;

#[async_trait]
impl ModelClient for UnusedModel {
    async fn invoke_with_tools(&self, _m: Vec<Message>, _t: Vec<ToolSpec>, _id: Option<String>) -> ModelOutcome {
        ModelOutcome::Ready(ModelResponse::default())
    }
}

#[tokio::test]
async fn two_unconditionally_enabled_edges_fork_two_paths() {
    let machine = MachineBuilder::new("fork")
        .node(Node::new("start"))
        .node(Node::new("left"))
        .node(Node::new("right"))
        .edge(Edge::new("start", "left"))
        .edge(Edge::new("start", "right"))
        .build()
        .unwrap();

    let mut executor = MachineExecutor::new(
        machine,
        RuntimeConfig::builder().build(),
        Arc::new(ToolRegistry::new()),
        Arc::new(UnusedModel),
        None,
    )
    .unwrap();

    executor.execute().await.unwrap();

    assert!(executor.is_settled());
    let mut ending = executor
        .state()
        .paths
        .iter()
        .map(|p| p.current_node.as_str())
        .collect::<Vec<_>>();
    ending.sort_unstable();
    assert_eq!(ending, vec!["left", "right"]);
    assert!(executor.state().paths.iter().all(|p| p.status == PathStatus::Terminal));
}

#[tokio::test]
async fn forking_is_disabled_when_configured_off() {
    let machine = MachineBuilder::new("fork")
        .node(Node::new("start"))
        .node(Node::new("left"))
        .node(Node::new("right"))
        .edge(Edge::new("start", "left"))
        .edge(Edge::new("start", "right"))
        .build()
        .unwrap();

    let mut executor = MachineExecutor::new(
        machine,
        RuntimeConfig::builder().fork_on_multiple_edges(false).build(),
        Arc::new(ToolRegistry::new()),
        Arc::new(UnusedModel),
        None,
    )
    .unwrap();

    executor.execute().await.unwrap();

    assert_eq!(executor.state().paths.len(), 1);
    assert_eq!(executor.state().paths[0].current_node.as_str(), "left");
}
