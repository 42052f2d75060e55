//! Observability utilities.
//!
//! This module provides:
//! - Subscriber setup honouring `RUST_LOG`, with pretty or JSON output
//! - Span constructors carrying run, stage and task identifiers
//! - A small timer for attempt durations

mod spans;
mod subscriber;

pub use spans::{run_span, stage_span, task_span, SpanTimer};
pub use subscriber::{init_tracing, LogFormat};
