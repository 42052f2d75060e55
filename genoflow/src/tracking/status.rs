//! Per-run status tracking and point-in-time snapshots.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::{FailureDetail, PipelineRun, RunId, RunStatus, StageState, TaskState};
use crate::errors::OrchestratorError;
use crate::registry::RunRegistry;
use crate::utils::Timestamp;

/// A stage as seen by a poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSnapshot {
    /// The stage record.
    #[serde(flatten)]
    pub state: StageState,
    /// Fraction of the stage's tasks that succeeded.
    pub progress: f64,
}

/// A consistent deep copy of a run's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    /// Run id.
    pub run_id: RunId,
    /// Pipeline name.
    pub pipeline: String,
    /// Overall status.
    pub status: RunStatus,
    /// Completed stages / total stages.
    pub progress: f64,
    /// Ordinal of the running stage, if any.
    pub current_stage: Option<usize>,
    /// Stage snapshots in ordinal order.
    pub stages: Vec<StageSnapshot>,
    /// Submission time.
    pub created_at: Timestamp,
    /// When orchestration began.
    pub started_at: Option<Timestamp>,
    /// When the run became terminal.
    pub ended_at: Option<Timestamp>,
    /// Whether cancellation has been requested.
    pub cancel_requested: bool,
    /// Failure detail for failed runs.
    pub failure: Option<FailureDetail>,
}

impl RunSnapshot {
    /// Builds a snapshot from a run record.
    #[must_use]
    pub fn from_run(run: &PipelineRun) -> Self {
        Self {
            run_id: run.id,
            pipeline: run.pipeline.clone(),
            status: run.status,
            progress: run.progress(),
            current_stage: run.current_stage(),
            stages: run
                .stages
                .iter()
                .map(|s| StageSnapshot {
                    progress: s.progress(),
                    state: s.clone(),
                })
                .collect(),
            created_at: run.created_at,
            started_at: run.started_at,
            ended_at: run.ended_at,
            cancel_requested: run.cancel_requested,
            failure: run.failure.clone(),
        }
    }

    /// Looks up a stage snapshot by ordinal.
    #[must_use]
    pub fn stage(&self, ordinal: usize) -> Option<&StageSnapshot> {
        self.stages.get(ordinal)
    }
}

/// Holds the current state of every stage and task for each run.
///
/// Writers are serialized per run by the run's lock; readers receive deep
/// copies and never observe a half-applied update.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    registry: Arc<RunRegistry>,
}

impl StatusTracker {
    /// Creates a tracker over the registry's run records.
    #[must_use]
    pub fn new(registry: Arc<RunRegistry>) -> Self {
        Self { registry }
    }

    /// Replaces the record of one stage.
    ///
    /// A stage that reached a terminal status cannot be moved back.
    pub fn update(
        &self,
        run_id: RunId,
        ordinal: usize,
        mut state: StageState,
    ) -> Result<(), OrchestratorError> {
        self.transition(run_id, |run| {
            let current = stage_mut(run, ordinal)?;
            if current.status.is_terminal() && current.status != state.status {
                return Err(OrchestratorError::Internal(format!(
                    "stage {ordinal} is already {} and cannot become {}",
                    current.status, state.status
                )));
            }
            state.attempts = state.tasks.iter().map(|t| t.attempts).sum();
            *current = state;
            Ok(())
        })
    }

    /// Replaces the record of one task within a stage.
    pub fn update_task(
        &self,
        run_id: RunId,
        ordinal: usize,
        index: usize,
        task: TaskState,
    ) -> Result<(), OrchestratorError> {
        self.transition(run_id, |run| {
            let stage = stage_mut(run, ordinal)?;
            let slot = stage.tasks.get_mut(index).ok_or_else(|| {
                OrchestratorError::Internal(format!("stage {ordinal} has no task {index}"))
            })?;
            *slot = task;
            stage.attempts = stage.tasks.iter().map(|t| t.attempts).sum();
            Ok(())
        })
    }

    /// Applies a run-level mutation under the run's write lock.
    pub fn transition<T>(
        &self,
        run_id: RunId,
        apply: impl FnOnce(&mut PipelineRun) -> Result<T, OrchestratorError>,
    ) -> Result<T, OrchestratorError> {
        let entry = self.registry.entry(run_id)?;
        let mut run = entry.run.write();
        apply(&mut run)
    }

    /// Returns a deep copy of one stage record.
    pub fn stage(&self, run_id: RunId, ordinal: usize) -> Result<StageState, OrchestratorError> {
        let entry = self.registry.entry(run_id)?;
        let run = entry.run.read();
        run.stages.get(ordinal).cloned().ok_or_else(|| {
            OrchestratorError::Internal(format!("run {run_id} has no stage {ordinal}"))
        })
    }

    /// Returns a consistent point-in-time view of the run.
    pub fn snapshot(&self, run_id: RunId) -> Result<RunSnapshot, OrchestratorError> {
        let entry = self.registry.entry(run_id)?;
        let run = entry.run.read();
        Ok(RunSnapshot::from_run(&run))
    }
}

fn stage_mut(run: &mut PipelineRun, ordinal: usize) -> Result<&mut StageState, OrchestratorError> {
    let run_id = run.id;
    run.stages
        .get_mut(ordinal)
        .ok_or_else(|| OrchestratorError::Internal(format!("run {run_id} has no stage {ordinal}")))
}
