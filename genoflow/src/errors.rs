//! Error types for the genoflow orchestrator.
//!
//! The taxonomy separates submission problems (surfaced synchronously to the
//! submitter), tool failures (classified as transient or fatal by the adapter)
//! and orchestrator-internal faults.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::core::RunId;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The job submission was rejected.
    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    /// The pipeline definition is malformed.
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    /// The run id is not (or no longer) known to the registry.
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// The run is not in a state that permits the requested transition.
    #[error("Run {run_id} cannot {action}: current status is {status}")]
    InvalidTransition {
        /// The run id.
        run_id: RunId,
        /// The attempted action.
        action: &'static str,
        /// The status the run was in.
        status: String,
    },

    /// The result bundle was requested before the run completed.
    #[error("Run {run_id} has not completed (status: {status})")]
    NotCompleted {
        /// The run id.
        run_id: RunId,
        /// The status the run was in.
        status: String,
    },

    /// Starting the run would exceed the active-run cap.
    #[error("Active run limit reached ({limit})")]
    CapacityExceeded {
        /// The configured limit.
        limit: usize,
    },

    /// An adapter reference could not be resolved.
    #[error("Adapter not registered: {0}")]
    AdapterNotFound(String),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Returns true if the error means the run no longer exists.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RunNotFound(_))
    }
}

/// A single rejected field of a job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// The multipart field name.
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl FieldError {
    /// Creates a new field error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a job submission fails validation.
///
/// Carries every rejected field so the submitter can fix them in one pass.
#[derive(Debug, Clone, Default, Error, Serialize, Deserialize)]
#[error("Invalid submission: {}", summarize(.errors))]
pub struct ValidationErrors {
    /// The rejected fields.
    pub errors: Vec<FieldError>,
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    /// Creates an empty error list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a rejected field.
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Returns true if nothing was rejected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns true if the given field was rejected.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Converts into a `Result`, failing if any field was rejected.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Error raised when a pipeline definition is malformed.
#[derive(Debug, Clone, Error)]
pub enum DefinitionError {
    /// No stages were declared.
    #[error("Pipeline must declare at least one stage")]
    Empty,

    /// Stage ordinals are not contiguous from zero.
    #[error("Stage '{stage}' has ordinal {found}, expected {expected}")]
    NonContiguousOrdinal {
        /// The stage name.
        stage: String,
        /// The ordinal the stage declared.
        found: usize,
        /// The ordinal it should have.
        expected: usize,
    },

    /// A stage declares no tasks.
    #[error("Stage '{0}' must declare at least one task")]
    EmptyStage(String),

    /// Two tasks in a stage share a name.
    #[error("Stage '{stage}' declares task '{task}' more than once")]
    DuplicateTask {
        /// The stage name.
        stage: String,
        /// The duplicated task name.
        task: String,
    },

    /// A retry policy allows zero attempts.
    #[error("Stage '{0}' must allow at least one attempt")]
    ZeroAttempts(String),

    /// The definition file could not be parsed.
    #[error("Pipeline definition parse error: {0}")]
    Parse(String),
}

/// Error raised when configuration cannot be loaded.
#[derive(Debug, Clone, Error)]
#[error("Invalid configuration value for {key}: {message}")]
pub struct ConfigError {
    /// The configuration key.
    pub key: String,
    /// What was wrong with it.
    pub message: String,
}

impl ConfigError {
    /// Creates a new config error.
    #[must_use]
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Classified failure reported by a task runner adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// A retryable failure (resource contention, transient I/O).
    #[error("Transient tool error: {message}")]
    Transient {
        /// The failure detail.
        message: String,
    },

    /// A non-retryable failure.
    #[error("Fatal tool error: {message}")]
    Fatal {
        /// The failure detail.
        message: String,
    },

    /// The task exceeded its deadline.
    #[error("Task timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },
}

impl ToolError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Returns true if the stage retry policy applies to this error.
    ///
    /// Timeouts are retried exactly like adapter-reported transient errors.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }
}
