//! Live run state for pollers.
//!
//! This module provides:
//! - The status tracker (stage/task records and snapshots)
//! - The log collector (sequenced, append-only progress lines)

mod logs;
mod status;

pub use logs::LogCollector;
pub use status::{RunSnapshot, StageSnapshot, StatusTracker};
