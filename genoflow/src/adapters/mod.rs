//! Task runner adapters.
//!
//! An adapter is the boundary between the orchestrator and one external tool.
//! It receives resolved inputs, produces artifact handles or a classified
//! [`ToolError`], and reports progress through a [`TaskLogger`].

mod command;
mod registry;
mod simulated;

pub use command::CommandAdapter;
pub use registry::AdapterRegistry;
pub use simulated::SimulatedAdapter;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::cancellation::CancellationToken;
use crate::core::{LogLine, RunId, TaskOutput};
use crate::errors::ToolError;
use crate::tracking::LogCollector;

/// Everything an adapter needs for one attempt of one task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Owning run.
    pub run_id: RunId,
    /// Stage ordinal.
    pub stage_ordinal: usize,
    /// Stage name.
    pub stage_name: String,
    /// Task name.
    pub task: String,
    /// Resolved inputs: key -> location or artifact handle.
    pub inputs: BTreeMap<String, String>,
    /// Adapter parameters from the task definition.
    pub params: serde_json::Value,
    /// Artifact keys the adapter must return.
    pub expected_outputs: Vec<String>,
    /// Attempt number, from one.
    pub attempt: usize,
    /// The run's cancellation signal.
    pub cancel: Arc<CancellationToken>,
}

impl TaskRequest {
    /// Returns the resolved location of an input.
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).map(String::as_str)
    }
}

/// Writes adapter progress lines into the run log, scoped to one task.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    logs: LogCollector,
    run_id: RunId,
    stage: usize,
    task: String,
}

impl TaskLogger {
    /// Creates a logger for one task of a stage.
    #[must_use]
    pub fn new(logs: LogCollector, run_id: RunId, stage: usize, task: impl Into<String>) -> Self {
        Self {
            logs,
            run_id,
            stage,
            task: task.into(),
        }
    }

    /// Appends a line prefixed with the task name.
    pub fn log(&self, line: LogLine) {
        let line = LogLine {
            message: format!("[{}] {}", self.task, line.message),
            ..line
        };
        if let Err(e) = self.logs.append(self.run_id, Some(self.stage), line) {
            debug!(run_id = %self.run_id, error = %e, "Dropped adapter log line");
        }
    }

    /// Appends an info line.
    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLine::info(message));
    }

    /// Appends a warning line.
    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLine::warn(message));
    }
}

/// Uniform interface to one external tool step.
///
/// Implementations classify failures: [`ToolError::Transient`] is retried by
/// the stage's policy, [`ToolError::Fatal`] fails the task immediately. The
/// executor enforces the task timeout by dropping the returned future, so
/// adapters must release their resources on drop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Runs one attempt of a task.
    async fn run(&self, request: TaskRequest, log: TaskLogger) -> Result<TaskOutput, ToolError>;
}
