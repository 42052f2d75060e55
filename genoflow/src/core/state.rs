//! Mutable per-run state records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    JobInputs, PipelineDefinition, ResultBundle, RunId, RunStatus, StageDefinition, StageStatus,
    TaskStatus,
};
use crate::utils::{now_utc, Timestamp};

/// Outputs returned by an adapter on success.
///
/// Artifacts are durable handles (paths or URIs); `summary` carries small
/// structured facts such as counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutput {
    /// Artifact key -> handle.
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    /// Free-form summary values.
    #[serde(default)]
    pub summary: serde_json::Value,
}

impl TaskOutput {
    /// Creates an empty output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an artifact handle.
    #[must_use]
    pub fn with_artifact(mut self, key: impl Into<String>, handle: impl Into<String>) -> Self {
        self.artifacts.insert(key.into(), handle.into());
        self
    }

    /// Sets the summary.
    #[must_use]
    pub fn with_summary(mut self, summary: serde_json::Value) -> Self {
        self.summary = summary;
        self
    }
}

/// Per-run record of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskState {
    /// Task name.
    pub name: String,
    /// Current status.
    pub status: TaskStatus,
    /// Attempts made so far.
    pub attempts: usize,
    /// Output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    /// Last captured error detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the first attempt started.
    pub started_at: Option<Timestamp>,
    /// When the task reached a terminal state.
    pub ended_at: Option<Timestamp>,
}

impl TaskState {
    /// Creates a pending task record.
    #[must_use]
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            output: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Records the start of a new attempt.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.status = TaskStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(now_utc());
        }
    }

    /// Records success.
    pub fn succeed(&mut self, output: TaskOutput) {
        self.status = TaskStatus::Succeeded;
        self.output = Some(output);
        self.error = None;
        self.ended_at = Some(now_utc());
    }

    /// Records a transient failure with another attempt pending.
    pub fn retrying(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Retrying;
        self.error = Some(error.into());
    }

    /// Records a terminal failure.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.ended_at = Some(now_utc());
    }

    /// Marks the task as short-circuited.
    pub fn skip(&mut self) {
        self.status = TaskStatus::Skipped;
        self.ended_at = Some(now_utc());
    }
}

/// Per-run record of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    /// Stage ordinal.
    pub ordinal: usize,
    /// Stage name.
    pub name: String,
    /// Advisory duration copied from the definition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
    /// Current status.
    pub status: StageStatus,
    /// Task records in declared order.
    pub tasks: Vec<TaskState>,
    /// When the stage started.
    pub started_at: Option<Timestamp>,
    /// When the stage reached a terminal state.
    pub ended_at: Option<Timestamp>,
    /// Total task attempts made in this stage.
    pub attempts: usize,
}

impl StageState {
    /// Creates a pending record mirroring a definition.
    #[must_use]
    pub fn from_definition(definition: &StageDefinition) -> Self {
        Self {
            ordinal: definition.ordinal,
            name: definition.name.clone(),
            estimated_duration: definition.estimated_duration.clone(),
            status: StageStatus::Pending,
            tasks: definition
                .tasks
                .iter()
                .map(|t| TaskState::pending(&t.name))
                .collect(),
            started_at: None,
            ended_at: None,
            attempts: 0,
        }
    }

    /// Fraction of tasks that succeeded.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let done = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Succeeded)
            .count();
        done as f64 / self.tasks.len() as f64
    }

    /// Looks up a task record by name.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&TaskState> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Marks the stage and every non-terminal task as skipped.
    pub fn skip(&mut self) {
        for task in &mut self.tasks {
            if !task.status.is_terminal() {
                task.skip();
            }
        }
        self.status = StageStatus::Skipped;
        self.ended_at = Some(now_utc());
    }
}

/// Where and why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureDetail {
    /// Ordinal of the failing stage.
    pub stage_ordinal: usize,
    /// Name of the failing task, when the failure is task-level.
    pub task: Option<String>,
    /// Last captured error detail.
    pub error: String,
}

/// One execution of the staged workflow for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    /// Run id.
    pub id: RunId,
    /// Name of the pipeline definition.
    pub pipeline: String,
    /// Submitted inputs.
    pub inputs: JobInputs,
    /// Overall status.
    pub status: RunStatus,
    /// Stage records in ordinal order.
    pub stages: Vec<StageState>,
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
    /// Result manifest for completed runs.
    pub result: Option<ResultBundle>,
}

impl PipelineRun {
    /// Creates a pending run for a definition.
    #[must_use]
    pub fn new(id: RunId, definition: &PipelineDefinition, inputs: JobInputs) -> Self {
        Self {
            id,
            pipeline: definition.name.clone(),
            inputs,
            status: RunStatus::Pending,
            stages: definition
                .stages
                .iter()
                .map(StageState::from_definition)
                .collect(),
            created_at: now_utc(),
            started_at: None,
            ended_at: None,
            cancel_requested: false,
            failure: None,
            result: None,
        }
    }

    /// Number of stages that completed.
    #[must_use]
    pub fn completed_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
            .count()
    }

    /// Fraction of stages that completed.
    ///
    /// Reaches 1.0 only once the run itself is `Completed`; until then the
    /// last stage counts as outstanding.
    #[must_use]
    pub fn progress(&self) -> f64 {
        let total = self.stages.len();
        if total == 0 {
            return 0.0;
        }
        let mut completed = self.completed_stages();
        if completed == total && self.status != RunStatus::Completed {
            completed -= 1;
        }
        completed as f64 / total as f64
    }

    /// Ordinal of the stage currently running, if any.
    #[must_use]
    pub fn current_stage(&self) -> Option<usize> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Running)
            .map(|s| s.ordinal)
    }

    /// Marks every stage from `ordinal` onwards as skipped.
    pub fn skip_from(&mut self, ordinal: usize) {
        for stage in self.stages.iter_mut().skip(ordinal) {
            if !stage.status.is_terminal() {
                stage.skip();
            }
        }
    }

    /// Moves the run into a terminal status.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(now_utc());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskDefinition;

    fn definition() -> PipelineDefinition {
        PipelineDefinition::new(
            "test",
            vec![
                StageDefinition::new(0, "a")
                    .with_task(TaskDefinition::new("a1", "x"))
                    .with_task(TaskDefinition::new("a2", "x")),
                StageDefinition::new(1, "b").with_task(TaskDefinition::new("b1", "x")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_new_run_is_pending() {
        let run = PipelineRun::new(RunId::new(), &definition(), JobInputs::new());
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.stages.len(), 2);
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(run.progress(), 0.0);
    }

    #[test]
    fn test_task_state_lifecycle() {
        let mut task = TaskState::pending("t");
        task.begin_attempt();
        assert_eq!(task.status, TaskStatus::Running);
        task.retrying("busy");
        task.begin_attempt();
        task.succeed(TaskOutput::new().with_artifact("out", "/tmp/out"));

        assert_eq!(task.attempts, 2);
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert!(task.error.is_none());
        assert!(task.ended_at.is_some());
    }

    #[test]
    fn test_stage_progress() {
        let mut stage = StageState::from_definition(&definition().stages[0]);
        stage.tasks[0].succeed(TaskOutput::new());
        assert!((stage.progress() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_skip_from_leaves_terminal_stages() {
        let mut run = PipelineRun::new(RunId::new(), &definition(), JobInputs::new());
        run.stages[0].status = StageStatus::Completed;
        run.skip_from(0);

        assert_eq!(run.stages[0].status, StageStatus::Completed);
        assert_eq!(run.stages[1].status, StageStatus::Skipped);
        assert_eq!(run.stages[1].tasks[0].status, TaskStatus::Skipped);
    }
}
