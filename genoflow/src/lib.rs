//! # Genoflow
//!
//! A stage-sequenced orchestrator for host/parasite genome and transcriptome
//! analysis pipelines.
//!
//! Genoflow provides:
//!
//! - **Stages as data**: ordered stage and task definitions, loadable from JSON
//! - **Pluggable task runners**: external tools sit behind the `TaskRunner` trait
//! - **Retry and timeouts**: per-stage backoff policy, per-task deadlines
//! - **Cooperative cancellation**: honoured at stage boundaries and during backoff
//! - **Live tracking**: consistent run snapshots and an ordered, tailable log
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use genoflow::prelude::*;
//!
//! let orchestrator = Orchestrator::from_config(OrchestratorConfig::from_env()?)?;
//! let (run_id, handle) = orchestrator.launch(inputs)?;
//! handle.await?;
//!
//! let snapshot = orchestrator.snapshot(run_id)?;
//! let bundle = orchestrator.result(run_id)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss
)]

pub mod adapters;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod submission;
pub mod testing;
pub mod tracking;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapters::{
        AdapterRegistry, CommandAdapter, SimulatedAdapter, TaskLogger, TaskRequest, TaskRunner,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{AdapterMode, OrchestratorConfig};
    pub use crate::core::{
        InputFile, InputKind, JobInputs, LogEntry, PipelineDefinition, ResultBundle, RunId,
        RunStatus, StageDefinition, StageStatus, TaskDefinition, TaskOutput, TaskStatus,
    };
    pub use crate::errors::{OrchestratorError, ToolError, ValidationErrors};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, RunEvent};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{genomics_pipeline, Orchestrator, RetryPolicy};
    pub use crate::submission::{qc_report, validate_parts, QcReport, SubmissionValidator};
    pub use crate::tracking::RunSnapshot;
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
