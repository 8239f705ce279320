//! Checkpoint/restore (spec §4.4 `createCheckpoint`/`restoreCheckpoint`).
//!
//! A `Checkpointer` trait (`save`/`load`/`list`) backed by an
//! `InMemoryCheckpointer` (`RwLock<FxHashMap<..>>>`), keyed by checkpoint id
//! rather than session id since one `MachineExecutor` owns exactly one
//! execution's checkpoint history and `restoreCheckpoint` can target any
//! prior checkpoint, not just the latest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::state::ExecutionState;

/// A durable snapshot of one execution at a point in time.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub description: Option<String>,
    pub state_snapshot: ExecutionState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(state_snapshot: ExecutionState, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description,
            state_snapshot,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    #[diagnostic(code(dygram::checkpoint::not_found))]
    NotFound(Uuid),

    #[error("checkpoint backend error: {0}")]
    #[diagnostic(code(dygram::checkpoint::backend))]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Durable storage for checkpoints, implementations supplied by the
/// embedding application (spec §6: checkpoint storage is out of scope).
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;
    async fn load(&self, id: Uuid) -> Result<Option<Checkpoint>>;
    async fn list(&self) -> Result<Vec<Uuid>>;
}

/// Volatile, process-local checkpointer: every checkpoint is kept, not just
/// the latest, since DyGram's `restoreCheckpoint` can target any prior point.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    inner: RwLock<FxHashMap<Uuid, Checkpoint>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(FxHashMap::default()),
        }
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|e| CheckpointError::Backend(format!("lock poisoned: {e}")))?;
        map.insert(checkpoint.id, checkpoint);
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Option<Checkpoint>> {
        let map = self
            .inner
            .read()
            .map_err(|e| CheckpointError::Backend(format!("lock poisoned: {e}")))?;
        Ok(map.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Uuid>> {
        let map = self
            .inner
            .read()
            .map_err(|e| CheckpointError::Backend(format!("lock poisoned: {e}")))?;
        Ok(map.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{MachineBuilder, Node};
    use crate::runtime::initialize;
    use crate::config::RuntimeConfig;

    fn state() -> ExecutionState {
        let machine = MachineBuilder::new("t")
            .node(Node::new("start"))
            .build()
            .unwrap();
        initialize(machine, &RuntimeConfig::builder().build()).unwrap()
    }

    #[tokio::test]
    async fn round_trips_a_saved_checkpoint() {
        let checkpointer = InMemoryCheckpointer::new();
        let checkpoint = Checkpoint::new(state(), Some("before retry".to_string()));
        let id = checkpoint.id;
        checkpointer.save(checkpoint).await.unwrap();

        let loaded = checkpointer.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.description.as_deref(), Some("before retry"));
    }

    #[tokio::test]
    async fn missing_checkpoint_loads_as_none() {
        let checkpointer = InMemoryCheckpointer::new();
        assert!(checkpointer.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_reports_every_saved_checkpoint() {
        let checkpointer = InMemoryCheckpointer::new();
        checkpointer.save(Checkpoint::new(state(), None)).await.unwrap();
        checkpointer.save(Checkpoint::new(state(), None)).await.unwrap();
        assert_eq!(checkpointer.list().await.unwrap().len(), 2);
    }
}
