//! Fixtures for orchestrator tests.

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{AdapterRegistry, TaskRunner};
use crate::config::OrchestratorConfig;
use crate::core::{
    InputFile, InputKind, JobInputs, PipelineDefinition, RunId, StageDefinition, TaskDefinition,
};
use crate::errors::OrchestratorError;
use crate::events::CollectingEventSink;
use crate::pipeline::{genomics_pipeline, Orchestrator, RetryPolicy};
use crate::tracking::RunSnapshot;

/// A retry policy with millisecond delays.
#[must_use]
pub fn fast_retry(max_attempts: usize) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .with_base_delay_ms(5)
        .with_max_delay_ms(50)
}

/// All four job files with plausible upload locations.
#[must_use]
pub fn sample_inputs() -> JobInputs {
    InputKind::ALL.iter().fold(JobInputs::new(), |inputs, kind| {
        let file_name = match kind {
            InputKind::HostGenome => "host.fasta",
            InputKind::ParasiteGenome => "parasite.fa",
            InputKind::HostTranscriptome => "host_rnaseq.fastq",
            InputKind::ParasiteTranscriptome => "parasite_counts.csv",
        };
        inputs.with_file(
            *kind,
            InputFile::new(file_name, format!("/uploads/{file_name}"), 4096),
        )
    })
}

/// A pipeline of `stages` single-task stages chained through their outputs.
///
/// Every task uses the adapter `adapter`; task `i` is named `task-i`.
#[must_use]
pub fn linear_pipeline(stages: usize, adapter: &str, retry: &RetryPolicy) -> PipelineDefinition {
    let stages = (0..stages)
        .map(|i| {
            let mut task = TaskDefinition::new(format!("task-{i}"), adapter)
                .with_output(format!("out-{i}"));
            if i > 0 {
                task = task.with_input(format!("out-{}", i - 1));
            }
            StageDefinition::new(i, format!("stage-{i}"))
                .with_retry(retry.clone())
                .with_task(task)
        })
        .collect();
    PipelineDefinition {
        name: "linear".to_string(),
        stages,
    }
}

/// An orchestrator with a collecting event sink.
#[derive(Debug, Clone)]
pub struct TestOrchestrator {
    /// The orchestrator under test.
    pub orchestrator: Orchestrator,
    /// Every event emitted by it.
    pub events: Arc<CollectingEventSink>,
}

impl TestOrchestrator {
    /// Wires `definition` to `adapters` with test-friendly configuration.
    pub fn new(
        definition: PipelineDefinition,
        adapters: AdapterRegistry,
    ) -> Result<Self, OrchestratorError> {
        let events = Arc::new(CollectingEventSink::new());
        let orchestrator = Orchestrator::new(definition, adapters, OrchestratorConfig::default())?
            .with_event_sink(events.clone());
        Ok(Self {
            orchestrator,
            events,
        })
    }

    /// The built-in genomics workflow with one runner behind every adapter.
    pub fn genomics(runner: Arc<dyn TaskRunner>) -> Result<Self, OrchestratorError> {
        let definition = genomics_pipeline(&fast_retry(3))?;
        let adapters = AdapterRegistry::uniform(&definition, runner);
        Self::new(definition, adapters)
    }

    /// Polls until the run is terminal or `limit` elapses.
    pub async fn wait_terminal(
        &self,
        run_id: RunId,
        limit: Duration,
    ) -> Result<RunSnapshot, OrchestratorError> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let snapshot = self.orchestrator.snapshot(run_id)?;
            if snapshot.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
