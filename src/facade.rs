//! [`MachineExecutor`]: the stateful facade around the pure core (spec §4.4
//! `step`/`execute`/`checkpoint`/`restore`/`serialize`).
//!
//! `MachineExecutor` owns the mutable [`ExecutionState`] plus its
//! out-of-band collaborators (tools, model client, checkpointer), driving
//! [`crate::runtime`]'s pure `step`/`apply_agent_result` and dispatching the
//! effects they emit through an [`EffectExecutor`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointError, Checkpointer};
use crate::config::RuntimeConfig;
use crate::effects::{EffectExecutor, FulfillOutcome};
use crate::machine::MachineDefinition;
use crate::model::{ModelClient, PendingModelRequest};
use crate::runtime::{self, RuntimeError};
use crate::state::{ExecutionState, VisualizationState};
use crate::tools::ToolRegistry;

#[derive(Debug, Error, Diagnostic)]
pub enum FacadeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("no checkpointer configured")]
    #[diagnostic(
        code(dygram::facade::no_checkpointer),
        help("pass Some(checkpointer) to MachineExecutor::new/from_state")
    )]
    NoCheckpointer,

    #[error("execution exceeded its configured timeout ({0:?})")]
    #[diagnostic(code(dygram::facade::timeout))]
    Timeout(Duration),

    #[error("a model response is still pending for request {0}; supply it before calling step() again")]
    #[diagnostic(
        code(dygram::facade::response_required),
        help("call supply_model_response(request_id, response) before the next step()/execute()")
    )]
    ResponseRequired(Uuid),
}

pub type Result<T> = std::result::Result<T, FacadeError>;

/// Binds a model response's text to `{node}.output`, mirroring
/// [`crate::effects::EffectExecutor`]'s own immediate-mode binding, for the
/// deferred-mode resume path ([`MachineExecutor::supply_model_response`]).
fn model_response_result(
    bind_to_node: &crate::types::NodeName,
    response: &crate::model::ModelResponse,
) -> crate::state::AgentResult {
    let text = response.text();
    let mut updates = rustc_hash::FxHashMap::default();
    updates.insert(format!("{bind_to_node}.output"), serde_json::Value::String(text.clone()));
    crate::state::AgentResult {
        attribute_updates: Some(updates),
        output: Some(serde_json::Value::String(text)),
        ..Default::default()
    }
}

/// Stateful wrapper driving one execution to completion, fulfilling effects
/// through its configured collaborators (spec §4.3/§4.4).
///
/// When [`FulfillOutcome::Pending`] is returned for a deferred `ModelCall`
/// (spec §4.3: "deferred mode"), `step()` records the pending request and
/// returns `true` without resuming that path; the caller must supply the
/// answer via [`MachineExecutor::supply_model_response`] before the next
/// `step()`/`execute()` call, which then attempts to fulfill the pending
/// effect using the newly-supplied response.
pub struct MachineExecutor {
    state: ExecutionState,
    config: RuntimeConfig,
    effects: EffectExecutor,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    /// Deferred model requests awaiting a response, one per waiting path —
    /// a plain `Option` would silently drop all but the last when more than
    /// one forked path suspends on a model call within the same step.
    pending: Vec<(Uuid, PendingModelRequest)>,
}

impl MachineExecutor {
    /// Initializes a fresh execution over `machine` (spec §4.4 `initialize`).
    pub fn new(
        machine: MachineDefinition,
        config: RuntimeConfig,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn ModelClient>,
        checkpointer: Option<Arc<dyn Checkpointer>>,
    ) -> Result<Self> {
        let vfs = config.vfs.clone();
        let state = runtime::initialize(machine, &config)?;
        Ok(Self {
            state,
            config,
            effects: EffectExecutor::new(tools, model, vfs),
            checkpointer,
            pending: Vec::new(),
        })
    }

    /// Restores a previously-serialized or checkpointed state, keeping the
    /// same collaborators (spec §4.4 `restore`).
    pub fn from_state(
        state: ExecutionState,
        config: RuntimeConfig,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn ModelClient>,
        checkpointer: Option<Arc<dyn Checkpointer>>,
    ) -> Self {
        let vfs = config.vfs.clone();
        Self {
            state,
            config,
            effects: EffectExecutor::new(tools, model, vfs),
            checkpointer,
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    #[must_use]
    pub fn machine_definition(&self) -> &MachineDefinition {
        &self.state.machine_snapshot
    }

    #[must_use]
    pub fn visualization_state(&self) -> VisualizationState {
        runtime::visualization_state(&self.state)
    }

    /// True once the execution has nothing left to resolve: every path is
    /// `terminal`/`failed` and no effect is waiting on external input.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty() && self.state.all_paths_settled()
    }

    /// Every deferred model request awaiting [`Self::supply_model_response`],
    /// one per path suspended on a model call (spec §4.3/§6).
    #[must_use]
    pub fn pending_requests(&self) -> Vec<&PendingModelRequest> {
        self.pending.iter().map(|(_, req)| req).collect()
    }

    /// Supplies the externally-obtained answer to one pending model request
    /// by id, so the next `step()` can resume that path.
    pub fn supply_model_response(&mut self, request_id: Uuid, response: crate::model::ModelResponse) {
        let Some(index) = self.pending.iter().position(|(_, req)| req.request_id == request_id) else {
            return;
        };
        let (path_id, _) = self.pending.remove(index);
        let Some(bind_to_node) = self.state.path(path_id).map(|p| p.current_node.clone()) else {
            return;
        };
        let result = model_response_result(&bind_to_node, &response);
        self.state = runtime::apply_agent_result(self.state.clone(), &self.config, path_id, result);
    }

    /// Advances the execution by one logical tick: a pure [`runtime::step`]
    /// call followed by dispatching whatever effects it emitted, resuming
    /// any path whose effect settled synchronously. Returns `true` if
    /// further progress is possible (not yet settled), `false` once every
    /// path is terminal/failed.
    ///
    /// Returns [`FacadeError::ResponseRequired`] if a previous call left a
    /// deferred model request unanswered.
    pub async fn step(&mut self) -> Result<bool> {
        if let Some((_, req)) = self.pending.first() {
            return Err(FacadeError::ResponseRequired(req.request_id));
        }

        if self.is_settled() {
            return Ok(false);
        }

        let outcome = runtime::step(&self.state, &self.config);
        self.state = outcome.next_state;

        // Effects are grouped by originating path and fulfilled in emission
        // order (spec §4.3), since more than one path may have dispatched
        // effects within the same step.
        let mut by_path: Vec<(Uuid, Vec<crate::effects::Effect>)> = Vec::new();
        for (path_id, effect) in outcome.effects {
            match by_path.iter_mut().find(|(id, _)| *id == path_id) {
                Some((_, list)) => list.push(effect),
                None => by_path.push((path_id, vec![effect])),
            }
        }

        for (path_id, effect_list) in by_path {
            match self.effects.fulfill(path_id, &effect_list).await {
                FulfillOutcome::Settled(result) => {
                    if self
                        .state
                        .path(path_id)
                        .is_some_and(|p| p.status == crate::state::PathStatus::Waiting)
                    {
                        self.state =
                            runtime::apply_agent_result(self.state.clone(), &self.config, path_id, result);
                    }
                }
                FulfillOutcome::Pending(req) => {
                    self.pending.push((path_id, req));
                }
            }
        }

        Ok(!self.is_settled())
    }

    /// Runs [`Self::step`] until the execution settles or `timeout_ms`
    /// elapses (spec §6 `limits.timeoutMs`; not enforced inside the pure
    /// core since it has no notion of wall-clock time).
    pub async fn execute(&mut self) -> Result<&ExecutionState> {
        let deadline = Instant::now() + Duration::from_millis(self.config.limits.timeout_ms);
        loop {
            if !self.step().await? {
                return Ok(&self.state);
            }
            if !self.pending.is_empty() {
                // Waiting on external input: nothing more this executor can
                // do on its own until supply_model_response is called.
                return Ok(&self.state);
            }
            if Instant::now() >= deadline {
                return Err(FacadeError::Timeout(Duration::from_millis(self.config.limits.timeout_ms)));
            }
        }
    }

    /// Snapshots the current state and, if a checkpointer is configured,
    /// persists it (spec §4.4 `createCheckpoint`).
    pub async fn create_checkpoint(&self, description: Option<String>) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::new(self.state.clone(), description);
        if let Some(checkpointer) = &self.checkpointer {
            checkpointer.save(checkpoint.clone()).await?;
        }
        Ok(checkpoint)
    }

    /// Replaces the live state with `checkpoint`'s snapshot (spec §4.4
    /// `restoreCheckpoint`). Any unresolved pending request is discarded:
    /// the restored state reflects an earlier point where it did not exist.
    pub fn restore_checkpoint(&mut self, checkpoint: &Checkpoint) {
        self.state = checkpoint.state_snapshot.clone();
        self.pending.clear();
    }

    /// Loads and restores a checkpoint by id from the configured
    /// checkpointer.
    pub async fn restore_checkpoint_by_id(&mut self, id: Uuid) -> Result<()> {
        let checkpointer = self.checkpointer.as_ref().ok_or(FacadeError::NoCheckpointer)?;
        let checkpoint = checkpointer.load(id).await?.ok_or(CheckpointError::NotFound(id))?;
        self.restore_checkpoint(&checkpoint);
        Ok(())
    }

    pub fn serialize_state(&self) -> Result<String> {
        Ok(runtime::serialize_state(&self.state)?)
    }

    pub fn deserialize_state(json: &str) -> Result<ExecutionState> {
        Ok(runtime::deserialize_state(json)?)
    }
}
