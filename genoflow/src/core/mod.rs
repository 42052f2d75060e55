//! Core domain model types for genoflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Run, stage and task status enums
//! - Immutable stage and task definitions
//! - Per-run mutable state records
//! - Log entries, artifact references and the result bundle

mod artifact;
mod definition;
mod inputs;
mod log;
mod state;
mod status;

pub use artifact::{ArtifactRef, ResultBundle, StageArtifacts};
pub use definition::{InputSpec, PipelineDefinition, StageDefinition, TaskDefinition};
pub use inputs::{file_extension, InputCategory, InputFile, InputKind, JobInputs, RunId};
pub use log::{LogEntry, LogLine, Severity};
pub use state::{FailureDetail, PipelineRun, StageState, TaskOutput, TaskState};
pub use status::{RunStatus, StageStatus, TaskStatus};
