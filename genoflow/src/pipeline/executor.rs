//! Stage execution: ordered tasks, bounded-parallel batches, retry and timeouts.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use super::retry::RetryDecision;
use crate::adapters::{AdapterRegistry, TaskLogger, TaskRequest};
use crate::cancellation::CancellationToken;
use crate::core::{
    LogLine, RunId, StageDefinition, StageStatus, TaskDefinition, TaskOutput, TaskState,
    TaskStatus,
};
use crate::errors::{OrchestratorError, ToolError};
use crate::events::{EventSink, RunEvent};
use crate::observability::{task_span, SpanTimer};
use crate::tracking::{LogCollector, StatusTracker};
use crate::utils::now_utc;

/// Artifact key -> handle, accumulated over a run.
///
/// Seeded with the submitted job files and extended with every task output.
pub type ArtifactPool = BTreeMap<String, String>;

/// Terminal result of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Every task succeeded.
    Completed,
    /// A task failed fatally or exhausted its retries.
    Failed {
        /// The failing task.
        task: String,
        /// Last captured error.
        error: String,
    },
    /// Cancellation stopped the stage before all tasks ran.
    Cancelled,
}

#[derive(Debug)]
enum TaskResult {
    Succeeded(TaskOutput),
    Failed(String),
    Cancelled,
}

/// Contiguous run of tasks executed together.
#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Single(usize),
    Batch(Vec<usize>),
}

fn segments(stage: &StageDefinition) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut batch = Vec::new();
    for (index, task) in stage.tasks.iter().enumerate() {
        if task.independent {
            batch.push(index);
            continue;
        }
        flush(&mut out, &mut batch);
        out.push(Segment::Single(index));
    }
    flush(&mut out, &mut batch);
    out
}

fn flush(out: &mut Vec<Segment>, batch: &mut Vec<usize>) {
    match batch.len() {
        0 => {}
        1 => out.push(Segment::Single(batch[0])),
        _ => out.push(Segment::Batch(std::mem::take(batch))),
    }
    batch.clear();
}

/// Runs the tasks of one stage against their adapters.
#[derive(Clone)]
pub struct StageExecutor {
    adapters: Arc<AdapterRegistry>,
    tracker: StatusTracker,
    logs: LogCollector,
    events: Arc<dyn EventSink>,
    default_parallelism: usize,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("adapters", &self.adapters)
            .field("default_parallelism", &self.default_parallelism)
            .finish_non_exhaustive()
    }
}

impl StageExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        adapters: Arc<AdapterRegistry>,
        tracker: StatusTracker,
        logs: LogCollector,
        events: Arc<dyn EventSink>,
        default_parallelism: usize,
    ) -> Self {
        Self {
            adapters,
            tracker,
            logs,
            events,
            default_parallelism: default_parallelism.max(1),
        }
    }

    /// Runs every task of `stage` and records the stage's terminal state.
    ///
    /// Succeeded task outputs are added to `pool`. An `Err` means the run's
    /// records could not be written (for example, the run was deleted).
    pub async fn run(
        &self,
        run_id: RunId,
        stage: &StageDefinition,
        pool: &mut ArtifactPool,
        cancel: &Arc<CancellationToken>,
    ) -> Result<StageOutcome, OrchestratorError> {
        let ordinal = stage.ordinal;

        let mut state = self.tracker.stage(run_id, ordinal)?;
        state.status = StageStatus::Running;
        state.started_at = Some(now_utc());
        self.tracker.update(run_id, ordinal, state)?;
        self.logs
            .info(run_id, Some(ordinal), format!("Starting: {}", stage.name))?;
        self.emit_stage(run_id, ordinal, StageStatus::Running).await;

        let mut outcome = StageOutcome::Completed;

        for segment in segments(stage) {
            if cancel.is_cancelled() {
                outcome = StageOutcome::Cancelled;
                break;
            }

            let results = match segment {
                Segment::Single(index) => {
                    vec![(index, self.run_task(run_id, stage, index, pool, cancel).await?)]
                }
                Segment::Batch(indices) => {
                    self.run_batch(run_id, stage, &indices, pool, cancel).await?
                }
            };

            for (index, result) in results {
                match result {
                    TaskResult::Succeeded(output) => {
                        pool.extend(output.artifacts);
                    }
                    TaskResult::Failed(error) => {
                        if !matches!(outcome, StageOutcome::Failed { .. }) {
                            outcome = StageOutcome::Failed {
                                task: stage.tasks[index].name.clone(),
                                error,
                            };
                        }
                    }
                    TaskResult::Cancelled => {
                        if outcome == StageOutcome::Completed {
                            outcome = StageOutcome::Cancelled;
                        }
                    }
                }
            }

            if outcome != StageOutcome::Completed {
                break;
            }
        }

        self.finish(run_id, stage, &outcome).await?;
        Ok(outcome)
    }

    async fn finish(
        &self,
        run_id: RunId,
        stage: &StageDefinition,
        outcome: &StageOutcome,
    ) -> Result<(), OrchestratorError> {
        let ordinal = stage.ordinal;
        let mut state = self.tracker.stage(run_id, ordinal)?;

        let (status, line) = match outcome {
            StageOutcome::Completed => {
                state.status = StageStatus::Completed;
                state.ended_at = Some(now_utc());
                (
                    StageStatus::Completed,
                    LogLine::info(format!("Completed: {}", stage.name)),
                )
            }
            StageOutcome::Failed { task, error } => {
                for task_state in &mut state.tasks {
                    if !task_state.status.is_terminal() {
                        task_state.skip();
                    }
                }
                state.status = StageStatus::Failed;
                state.ended_at = Some(now_utc());
                (
                    StageStatus::Failed,
                    LogLine::error(format!("Failed: {} ({task}: {error})", stage.name)),
                )
            }
            StageOutcome::Cancelled => {
                state.skip();
                (
                    StageStatus::Skipped,
                    LogLine::warn(format!("Cancelled: {}", stage.name)),
                )
            }
        };

        self.tracker.update(run_id, ordinal, state)?;
        self.logs.append(run_id, Some(ordinal), line)?;
        self.emit_stage(run_id, ordinal, status).await;
        Ok(())
    }

    async fn run_batch(
        &self,
        run_id: RunId,
        stage: &StageDefinition,
        indices: &[usize],
        pool: &ArtifactPool,
        cancel: &Arc<CancellationToken>,
    ) -> Result<Vec<(usize, TaskResult)>, OrchestratorError> {
        let limit = stage.max_parallel.unwrap_or(self.default_parallelism).max(1);
        debug!(run_id = %run_id, stage = stage.ordinal, tasks = indices.len(), limit, "Running independent batch");

        let mut pending = indices.iter().copied();
        let mut in_flight = FuturesUnordered::new();
        let mut results = Vec::with_capacity(indices.len());
        let mut stop = false;

        for index in pending.by_ref().take(limit) {
            in_flight.push(self.indexed_task(run_id, stage, index, pool, cancel));
        }

        while let Some(done) = in_flight.next().await {
            let (index, result) = done?;
            if !matches!(result, TaskResult::Succeeded(_)) {
                stop = true;
            }
            results.push((index, result));

            if !stop && !cancel.is_cancelled() {
                if let Some(next) = pending.next() {
                    in_flight.push(self.indexed_task(run_id, stage, next, pool, cancel));
                }
            }
        }

        if !stop {
            results.extend(pending.map(|index| (index, TaskResult::Cancelled)));
        }

        results.sort_by_key(|(index, _)| *index);
        Ok(results)
    }

    async fn indexed_task(
        &self,
        run_id: RunId,
        stage: &StageDefinition,
        index: usize,
        pool: &ArtifactPool,
        cancel: &Arc<CancellationToken>,
    ) -> Result<(usize, TaskResult), OrchestratorError> {
        let result = self.run_task(run_id, stage, index, pool, cancel).await?;
        Ok((index, result))
    }

    async fn run_task(
        &self,
        run_id: RunId,
        stage: &StageDefinition,
        index: usize,
        pool: &ArtifactPool,
        cancel: &Arc<CancellationToken>,
    ) -> Result<TaskResult, OrchestratorError> {
        let ordinal = stage.ordinal;
        let task = &stage.tasks[index];
        let mut state = TaskState::pending(&task.name);

        if cancel.is_cancelled() {
            return Ok(TaskResult::Cancelled);
        }

        let inputs = match resolve_inputs(task, pool) {
            Ok(inputs) => inputs,
            Err(error) => {
                state.fail(error.clone());
                self.tracker.update_task(run_id, ordinal, index, state)?;
                self.logs.append(
                    run_id,
                    Some(ordinal),
                    LogLine::error(format!("✗ {}: {error}", task.display_name())),
                )?;
                return Ok(TaskResult::Failed(error));
            }
        };

        let runner = match self.adapters.get(&task.adapter) {
            Ok(runner) => runner,
            Err(e) => {
                let error = e.to_string();
                state.fail(error.clone());
                self.tracker.update_task(run_id, ordinal, index, state)?;
                return Ok(TaskResult::Failed(error));
            }
        };

        let max_attempts = stage.retry.max_attempts;
        loop {
            state.begin_attempt();
            let attempt = state.attempts;
            self.tracker.update_task(run_id, ordinal, index, state.clone())?;
            self.logs.append(
                run_id,
                Some(ordinal),
                LogLine::debug(format!(
                    "{} attempt {attempt}/{max_attempts} started",
                    task.name
                )),
            )?;

            let request = TaskRequest {
                run_id,
                stage_ordinal: ordinal,
                stage_name: stage.name.clone(),
                task: task.name.clone(),
                inputs: inputs.clone(),
                params: task.params.clone(),
                expected_outputs: task.outputs.clone(),
                attempt,
                cancel: cancel.clone(),
            };
            let logger = TaskLogger::new(self.logs.clone(), run_id, ordinal, &task.name);

            let timeout = task.timeout();
            let timer = SpanTimer::start(&task.name);
            let invocation = runner
                .run(request, logger)
                .instrument(task_span(&task.name, &task.adapter, attempt));
            let result = match tokio::time::timeout(timeout, invocation).await {
                Ok(result) => result.and_then(|output| check_outputs(task, output)),
                Err(_) => Err(ToolError::Timeout { timeout }),
            };
            debug!(
                run_id = %run_id,
                stage = ordinal,
                task = %task.name,
                attempt,
                duration_ms = timer.elapsed_ms(),
                ok = result.is_ok(),
                "Task attempt finished"
            );

            match result {
                Ok(output) => {
                    state.succeed(output.clone());
                    self.tracker.update_task(run_id, ordinal, index, state)?;
                    self.logs
                        .info(run_id, Some(ordinal), format!("✓ {}", task.display_name()))?;
                    self.emit_attempt(run_id, ordinal, task, attempt, TaskStatus::Succeeded)
                        .await;
                    return Ok(TaskResult::Succeeded(output));
                }
                Err(error) if error.is_retryable() => match stage.retry.decide(attempt) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            run_id = %run_id,
                            stage = ordinal,
                            task = %task.name,
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            error = %error,
                            "Task attempt failed, retrying"
                        );
                        state.retrying(error.to_string());
                        self.tracker.update_task(run_id, ordinal, index, state.clone())?;
                        self.logs.append(
                            run_id,
                            Some(ordinal),
                            LogLine::warn(format!(
                                "{} attempt {attempt}/{max_attempts} failed: {error}; retrying in {}ms",
                                task.name,
                                delay.as_millis()
                            )),
                        )?;
                        self.emit_attempt(run_id, ordinal, task, attempt, TaskStatus::Retrying)
                            .await;

                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = cancel.cancelled() => {
                                state.fail(format!("retry abandoned: run cancelled ({error})"));
                                self.tracker.update_task(run_id, ordinal, index, state)?;
                                self.logs.append(
                                    run_id,
                                    Some(ordinal),
                                    LogLine::warn(format!("{} retry abandoned: run cancelled", task.name)),
                                )?;
                                return Ok(TaskResult::Cancelled);
                            }
                        }
                    }
                    RetryDecision::GiveUp => {
                        let detail = format!("{error} (after {attempt} attempts)");
                        return self
                            .fail_task(run_id, ordinal, index, task, state, detail)
                            .await;
                    }
                },
                Err(error) => {
                    let detail = error.to_string();
                    return self
                        .fail_task(run_id, ordinal, index, task, state, detail)
                        .await;
                }
            }
        }
    }

    async fn fail_task(
        &self,
        run_id: RunId,
        ordinal: usize,
        index: usize,
        task: &TaskDefinition,
        mut state: TaskState,
        detail: String,
    ) -> Result<TaskResult, OrchestratorError> {
        let attempt = state.attempts;
        state.fail(detail.clone());
        self.tracker.update_task(run_id, ordinal, index, state)?;
        self.logs.append(
            run_id,
            Some(ordinal),
            LogLine::error(format!("✗ {}: {detail}", task.display_name())),
        )?;
        info!(run_id = %run_id, stage = ordinal, task = %task.name, attempt, "Task failed");
        self.emit_attempt(run_id, ordinal, task, attempt, TaskStatus::Failed)
            .await;
        Ok(TaskResult::Failed(detail))
    }

    async fn emit_stage(&self, run_id: RunId, ordinal: usize, status: StageStatus) {
        self.events
            .emit(&RunEvent::StageTransition {
                run_id,
                ordinal,
                status,
            })
            .await;
    }

    async fn emit_attempt(
        &self,
        run_id: RunId,
        ordinal: usize,
        task: &TaskDefinition,
        attempt: usize,
        status: TaskStatus,
    ) {
        self.events
            .emit(&RunEvent::TaskAttempt {
                run_id,
                ordinal,
                task: task.name.clone(),
                attempt,
                status,
            })
            .await;
    }
}

fn resolve_inputs(
    task: &TaskDefinition,
    pool: &ArtifactPool,
) -> Result<BTreeMap<String, String>, String> {
    let mut inputs = BTreeMap::new();
    for spec in &task.inputs {
        match pool.get(&spec.key) {
            Some(handle) => {
                inputs.insert(spec.key.clone(), handle.clone());
            }
            None if spec.optional => {}
            None => return Err(format!("missing required input '{}'", spec.key)),
        }
    }
    Ok(inputs)
}

fn check_outputs(task: &TaskDefinition, output: TaskOutput) -> Result<TaskOutput, ToolError> {
    match task
        .outputs
        .iter()
        .find(|key| !output.artifacts.contains_key(*key))
    {
        Some(key) => Err(ToolError::fatal(format!(
            "adapter did not produce declared output '{key}'"
        ))),
        None => Ok(output),
    }
}
