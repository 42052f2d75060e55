//! Run lifecycle: submission, sequencing of stages, cancellation and results.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::catalog::{default_adapters, load_pipeline};
use super::executor::{ArtifactPool, StageExecutor, StageOutcome};
use crate::adapters::AdapterRegistry;
use crate::config::OrchestratorConfig;
use crate::core::{
    FailureDetail, JobInputs, LogEntry, LogLine, PipelineDefinition, ResultBundle, RunId,
    RunStatus, StageStatus,
};
use crate::errors::OrchestratorError;
use crate::events::{EventSink, LoggingEventSink, RunEvent};
use crate::observability::{run_span, stage_span};
use crate::registry::RunRegistry;
use crate::tracking::{LogCollector, RunSnapshot, StatusTracker};
use crate::utils::now_utc;

/// Drives pipeline runs from submission to a terminal status.
///
/// Cloning is cheap; every clone shares the same registry and adapters.
#[derive(Clone)]
pub struct Orchestrator {
    definition: Arc<PipelineDefinition>,
    registry: Arc<RunRegistry>,
    tracker: StatusTracker,
    logs: LogCollector,
    adapters: Arc<AdapterRegistry>,
    events: Arc<dyn EventSink>,
    config: Arc<OrchestratorConfig>,
    start_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.definition.name)
            .field("runs", &self.registry.len())
            .field("adapters", &self.adapters)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator for a pipeline.
    ///
    /// Fails if the definition is malformed or references an unregistered
    /// adapter.
    pub fn new(
        definition: PipelineDefinition,
        adapters: AdapterRegistry,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        definition.validate()?;
        config.validate()?;
        adapters.ensure_resolves(&definition)?;

        let registry = Arc::new(RunRegistry::new());
        Ok(Self {
            definition: Arc::new(definition),
            tracker: StatusTracker::new(registry.clone()),
            logs: LogCollector::new(registry.clone()),
            registry,
            adapters: Arc::new(adapters),
            events: Arc::new(LoggingEventSink::default()),
            config: Arc::new(config),
            start_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Builds the configured pipeline and adapters.
    pub fn from_config(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let definition = load_pipeline(&config)?;
        let adapters = default_adapters(&definition, &config);
        Self::new(definition, adapters, config)
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The pipeline every run executes.
    #[must_use]
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// The run registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Creates a pending run for validated inputs.
    pub fn submit(&self, inputs: JobInputs) -> Result<RunId, OrchestratorError> {
        self.definition.validate()?;
        let files = inputs.len();
        let run_id = self.registry.create(&self.definition, inputs);
        self.logs.info(
            run_id,
            None,
            format!("Job submitted with {files} input file(s)"),
        )?;
        info!(run_id = %run_id, pipeline = %self.definition.name, files, "Run submitted");
        Ok(run_id)
    }

    /// Moves a pending run to `Running` and executes it on its own task.
    ///
    /// The returned handle completes when the run is terminal.
    pub fn start(&self, run_id: RunId) -> Result<JoinHandle<()>, OrchestratorError> {
        {
            let _guard = self.start_lock.lock();

            if let Some(limit) = self.config.max_active_runs {
                let active = self.registry.active_count();
                if active >= limit {
                    warn!(run_id = %run_id, active, limit, "Active run limit reached");
                    return Err(OrchestratorError::CapacityExceeded { limit });
                }
            }

            self.tracker.transition(run_id, |run| {
                if run.status != RunStatus::Pending || run.cancel_requested {
                    return Err(OrchestratorError::InvalidTransition {
                        run_id,
                        action: "start",
                        status: run.status.to_string(),
                    });
                }
                run.status = RunStatus::Running;
                run.started_at = Some(now_utc());
                Ok(())
            })?;
        }

        self.events.try_emit(&RunEvent::RunStarted {
            run_id,
            pipeline: self.definition.name.clone(),
        });

        let this = self.clone();
        let span = run_span(run_id, &self.definition.name);
        Ok(tokio::spawn(
            async move { this.drive(run_id).await }.instrument(span),
        ))
    }

    /// Submits and immediately starts a run.
    pub fn launch(&self, inputs: JobInputs) -> Result<(RunId, JoinHandle<()>), OrchestratorError> {
        let run_id = self.submit(inputs)?;
        let handle = self.start(run_id)?;
        Ok((run_id, handle))
    }

    /// Requests cooperative cancellation.
    ///
    /// A pending run is cancelled at once. A running run stops after its
    /// in-flight task; terminal runs are left unchanged.
    pub fn cancel(&self, run_id: RunId) -> Result<(), OrchestratorError> {
        let entry = self.registry.entry(run_id)?;

        let cancelled_pending = self.tracker.transition(run_id, |run| {
            if run.status.is_terminal() {
                return Ok(false);
            }
            run.cancel_requested = true;
            if run.status == RunStatus::Pending {
                run.skip_from(0);
                run.finish(RunStatus::Cancelled);
                return Ok(true);
            }
            Ok(false)
        })?;

        if entry.cancel_token().cancel("cancellation requested") {
            self.logs
                .append(run_id, None, LogLine::warn("Cancellation requested"))?;
            info!(run_id = %run_id, "Cancellation requested");
        }
        if cancelled_pending {
            self.events.try_emit(&RunEvent::RunFinished {
                run_id,
                status: RunStatus::Cancelled,
            });
        }
        Ok(())
    }

    /// Returns a consistent view of the run.
    pub fn snapshot(&self, run_id: RunId) -> Result<RunSnapshot, OrchestratorError> {
        self.tracker.snapshot(run_id)
    }

    /// Returns log entries with sequence >= `since`.
    pub fn logs(&self, run_id: RunId, since: u64) -> Result<Vec<LogEntry>, OrchestratorError> {
        self.logs.tail(run_id, since)
    }

    /// Returns the result bundle of a completed run.
    pub fn result(&self, run_id: RunId) -> Result<ResultBundle, OrchestratorError> {
        let run = self.registry.get(run_id)?;
        match (run.status, run.result) {
            (RunStatus::Completed, Some(bundle)) => Ok(bundle),
            (status, _) => Err(OrchestratorError::NotCompleted {
                run_id,
                status: status.to_string(),
            }),
        }
    }

    /// Cancels and removes a run with all of its state.
    pub fn delete(&self, run_id: RunId) -> Result<(), OrchestratorError> {
        self.registry.delete(run_id)
    }

    /// Removes terminal and never-started runs idle for longer than the configured TTL.
    pub fn evict_expired(&self) -> Vec<RunId> {
        self.registry.evict_expired(self.config.run_ttl())
    }

    /// Spawns a task evicting expired runs every reaper interval.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.reaper_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = this.evict_expired();
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "Reaper pass");
                }
            }
        })
    }

    fn executor(&self) -> StageExecutor {
        StageExecutor::new(
            self.adapters.clone(),
            self.tracker.clone(),
            self.logs.clone(),
            self.events.clone(),
            self.config.default_parallelism,
        )
    }

    async fn drive(self, run_id: RunId) {
        match self.execute(run_id).await {
            Ok(status) => {
                info!(run_id = %run_id, status = %status, "Run finished");
                self.events
                    .emit(&RunEvent::RunFinished { run_id, status })
                    .await;
            }
            Err(e) if e.is_not_found() => {
                debug!(run_id = %run_id, "Run removed during execution");
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run aborted by internal error");
                if self.abort(run_id, &e).is_ok() {
                    self.events
                        .emit(&RunEvent::RunFinished {
                            run_id,
                            status: RunStatus::Failed,
                        })
                        .await;
                }
            }
        }
    }

    async fn execute(&self, run_id: RunId) -> Result<RunStatus, OrchestratorError> {
        let entry = self.registry.entry(run_id)?;
        let cancel = entry.cancel_token();
        let executor = self.executor();

        let mut pool: ArtifactPool = entry
            .run()
            .inputs
            .iter()
            .map(|(kind, file)| (kind.field_name().to_string(), file.location.clone()))
            .collect();

        self.logs.info(
            run_id,
            None,
            format!(
                "Pipeline '{}' started with {} stages",
                self.definition.name,
                self.definition.stage_count()
            ),
        )?;

        for stage in &self.definition.stages {
            if cancel.is_cancelled() {
                return self.finish_cancelled(run_id, stage.ordinal);
            }

            let outcome = executor
                .run(run_id, stage, &mut pool, &cancel)
                .instrument(stage_span(stage.ordinal, &stage.name))
                .await?;
            match outcome {
                StageOutcome::Completed => {}
                StageOutcome::Failed { task, error } => {
                    return self.finish_failed(run_id, stage.ordinal, task, error);
                }
                StageOutcome::Cancelled => {
                    return self.finish_cancelled(run_id, stage.ordinal + 1);
                }
            }
        }

        self.tracker.transition(run_id, |run| {
            let bundle = ResultBundle::assemble(run).map_err(OrchestratorError::Internal)?;
            run.result = Some(bundle);
            run.finish(RunStatus::Completed);
            Ok(())
        })?;
        self.logs
            .info(run_id, None, "Analysis completed successfully!")?;
        Ok(RunStatus::Completed)
    }

    fn finish_failed(
        &self,
        run_id: RunId,
        ordinal: usize,
        task: String,
        error: String,
    ) -> Result<RunStatus, OrchestratorError> {
        self.tracker.transition(run_id, |run| {
            run.skip_from(ordinal + 1);
            run.failure = Some(FailureDetail {
                stage_ordinal: ordinal,
                task: Some(task.clone()),
                error: error.clone(),
            });
            run.finish(RunStatus::Failed);
            Ok(())
        })?;
        self.logs.append(
            run_id,
            None,
            LogLine::error(format!("Pipeline halted at stage {ordinal} ({task}): {error}")),
        )?;
        Ok(RunStatus::Failed)
    }

    fn finish_cancelled(&self, run_id: RunId, from: usize) -> Result<RunStatus, OrchestratorError> {
        self.tracker.transition(run_id, |run| {
            run.skip_from(from);
            run.finish(RunStatus::Cancelled);
            Ok(())
        })?;
        self.logs
            .append(run_id, None, LogLine::warn("Pipeline cancelled"))?;
        Ok(RunStatus::Cancelled)
    }

    fn abort(&self, run_id: RunId, cause: &OrchestratorError) -> Result<(), OrchestratorError> {
        self.tracker.transition(run_id, |run| {
            if run.status.is_terminal() {
                return Ok(());
            }
            let ordinal = run
                .stages
                .iter()
                .position(|s| s.status == StageStatus::Running)
                .or_else(|| run.stages.iter().position(|s| !s.status.is_terminal()))
                .unwrap_or(0);
            if let Some(stage) = run.stages.get_mut(ordinal) {
                if stage.status == StageStatus::Running {
                    stage.status = StageStatus::Failed;
                    stage.ended_at = Some(now_utc());
                }
            }
            run.skip_from(ordinal);
            run.failure = Some(FailureDetail {
                stage_ordinal: ordinal,
                task: None,
                error: cause.to_string(),
            });
            run.finish(RunStatus::Failed);
            Ok(())
        })?;
        self.logs.append(
            run_id,
            None,
            LogLine::error(format!("Internal error: {cause}")),
        )?;
        Ok(())
    }
}
