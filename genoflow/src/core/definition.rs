//! Immutable stage and task definitions.
//!
//! A [`PipelineDefinition`] is the configuration table that drives the
//! orchestrator: an ordered list of stages, each an ordered list of tasks that
//! reference adapters by name.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::errors::DefinitionError;
use crate::pipeline::RetryPolicy;

fn default_timeout_ms() -> u64 {
    60 * 60 * 1000
}

/// A named input a task requires (or may use) when invoked.
///
/// Keys resolve against the submitted job files (e.g. `hostGenome`) and
/// against artifacts produced by earlier tasks of the same run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    /// The input key.
    pub key: String,
    /// Whether the task may run without it.
    #[serde(default)]
    pub optional: bool,
}

/// Definition of one tool invocation within a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Task name, unique within its stage.
    pub name: String,
    /// Name of the adapter in the adapter registry.
    pub adapter: String,
    /// Human-readable label used in progress logs.
    #[serde(default)]
    pub label: Option<String>,
    /// Input schema.
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    /// Artifact keys the adapter must produce.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Per-attempt deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether the task may run in parallel with adjacent independent tasks.
    #[serde(default)]
    pub independent: bool,
    /// Adapter-specific parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl TaskDefinition {
    /// Creates a task bound to the named adapter.
    #[must_use]
    pub fn new(name: impl Into<String>, adapter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter: adapter.into(),
            label: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            timeout_ms: default_timeout_ms(),
            independent: false,
            params: serde_json::Value::Null,
        }
    }

    /// Sets the progress label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label for progress logs, falling back to the task name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Adds a required input.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(InputSpec {
            key: key.into(),
            optional: false,
        });
        self
    }

    /// Adds an optional input.
    #[must_use]
    pub fn with_optional_input(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(InputSpec {
            key: key.into(),
            optional: true,
        });
        self
    }

    /// Declares an output artifact.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.outputs.push(key.into());
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Marks the task as independent of its neighbours.
    #[must_use]
    pub fn independent(mut self) -> Self {
        self.independent = true;
        self
    }

    /// Sets adapter parameters.
    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Returns the per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Definition of one ordered stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Position in the pipeline, contiguous from zero.
    pub ordinal: usize,
    /// Display name.
    pub name: String,
    /// What the stage does.
    #[serde(default)]
    pub description: String,
    /// Ordered tasks.
    pub tasks: Vec<TaskDefinition>,
    /// Advisory duration shown to clients (e.g. "5-10 minutes").
    #[serde(default)]
    pub estimated_duration: Option<String>,
    /// Retry policy applied to every task of the stage.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Parallelism cap for independent tasks; falls back to the orchestrator default.
    #[serde(default)]
    pub max_parallel: Option<usize>,
}

impl StageDefinition {
    /// Creates an empty stage definition.
    #[must_use]
    pub fn new(ordinal: usize, name: impl Into<String>) -> Self {
        Self {
            ordinal,
            name: name.into(),
            description: String::new(),
            tasks: Vec::new(),
            estimated_duration: None,
            retry: RetryPolicy::default(),
            max_parallel: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends a task.
    #[must_use]
    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    /// Sets the advisory duration.
    #[must_use]
    pub fn with_estimated_duration(mut self, estimate: impl Into<String>) -> Self {
        self.estimated_duration = Some(estimate.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the parallelism cap for independent tasks.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    /// Returns every artifact key declared by the stage's tasks.
    pub fn declared_outputs(&self) -> impl Iterator<Item = (&TaskDefinition, &str)> {
        self.tasks
            .iter()
            .flat_map(|task| task.outputs.iter().map(move |key| (task, key.as_str())))
    }
}

/// The ordered stage table for a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name.
    pub name: String,
    /// Ordered stages.
    pub stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    /// Creates and validates a pipeline definition.
    pub fn new(
        name: impl Into<String>,
        stages: Vec<StageDefinition>,
    ) -> Result<Self, DefinitionError> {
        let definition = Self {
            name: name.into(),
            stages,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Parses and validates a definition from JSON.
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        let definition: Self =
            serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Reads a JSON definition from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DefinitionError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    /// Checks the structural invariants of the stage table.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.stages.is_empty() {
            return Err(DefinitionError::Empty);
        }

        for (expected, stage) in self.stages.iter().enumerate() {
            if stage.ordinal != expected {
                return Err(DefinitionError::NonContiguousOrdinal {
                    stage: stage.name.clone(),
                    found: stage.ordinal,
                    expected,
                });
            }
            if stage.tasks.is_empty() {
                return Err(DefinitionError::EmptyStage(stage.name.clone()));
            }
            if stage.retry.max_attempts == 0 {
                return Err(DefinitionError::ZeroAttempts(stage.name.clone()));
            }

            let mut seen = HashSet::new();
            for task in &stage.tasks {
                if !seen.insert(task.name.as_str()) {
                    return Err(DefinitionError::DuplicateTask {
                        stage: stage.name.clone(),
                        task: task.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the set of adapter names referenced by any task.
    #[must_use]
    pub fn adapter_names(&self) -> HashSet<&str> {
        self.stages
            .iter()
            .flat_map(|s| s.tasks.iter().map(|t| t.adapter.as_str()))
            .collect()
    }
}
