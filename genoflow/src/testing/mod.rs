//! Testing utilities for genoflow pipelines.
//!
//! This module provides:
//! - Scripted fake adapters and a gate for holding tasks in flight
//! - Input and pipeline fixtures
//! - Assertions over run snapshots

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_completed_prefix, assert_no_stage_running, assert_run_status, assert_stage_statuses,
    stage_statuses,
};
pub use fixtures::{fast_retry, linear_pipeline, sample_inputs, TestOrchestrator};
pub use mocks::{Gate, RecordedCall, ScriptedRunner, Step};
