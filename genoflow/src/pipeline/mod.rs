//! Pipeline execution.
//!
//! This module provides:
//! - Retry policy with backoff and jitter
//! - The stage executor
//! - The orchestrator sequencing stages for each run
//! - The built-in genomics stage catalog

pub mod catalog;
mod executor;
mod orchestrator;
mod retry;

#[cfg(test)]
mod integration_tests;

pub use catalog::{default_adapters, genomics_pipeline, load_pipeline, GENOMICS_PIPELINE};
pub use executor::{ArtifactPool, StageExecutor, StageOutcome};
pub use orchestrator::Orchestrator;
pub use retry::{BackoffStrategy, JitterStrategy, RetryDecision, RetryPolicy};
