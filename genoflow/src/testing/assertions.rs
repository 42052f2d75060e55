//! Assertions over run snapshots.

use crate::core::{RunStatus, StageStatus};
use crate::tracking::RunSnapshot;

/// Asserts the overall run status.
pub fn assert_run_status(snapshot: &RunSnapshot, expected: RunStatus) {
    assert_eq!(
        snapshot.status, expected,
        "Expected run status {expected}, got {} (stages: {:?})",
        snapshot.status,
        stage_statuses(snapshot)
    );
}

/// Asserts the status of every stage, in ordinal order.
pub fn assert_stage_statuses(snapshot: &RunSnapshot, expected: &[StageStatus]) {
    assert_eq!(stage_statuses(snapshot), expected);
}

/// Asserts that the completed stages form a prefix of the ordinal sequence.
pub fn assert_completed_prefix(snapshot: &RunSnapshot) {
    let statuses = stage_statuses(snapshot);
    let prefix = statuses
        .iter()
        .take_while(|s| **s == StageStatus::Completed)
        .count();
    assert!(
        statuses[prefix..]
            .iter()
            .all(|s| *s != StageStatus::Completed),
        "Completed stages are not a prefix: {statuses:?}"
    );
}

/// Asserts that no stage is running.
pub fn assert_no_stage_running(snapshot: &RunSnapshot) {
    assert!(
        snapshot.current_stage.is_none(),
        "Stage {:?} is still running",
        snapshot.current_stage
    );
}

/// Stage statuses in ordinal order.
#[must_use]
pub fn stage_statuses(snapshot: &RunSnapshot) -> Vec<StageStatus> {
    snapshot.stages.iter().map(|s| s.state.status).collect()
}
