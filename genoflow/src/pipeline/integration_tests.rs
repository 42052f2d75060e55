//! End-to-end tests of the orchestrator against scripted adapters.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use crate::adapters::AdapterRegistry;
use crate::core::{RunStatus, StageStatus, TaskStatus};
use crate::events::RunEvent;
use crate::pipeline::{genomics_pipeline, RetryPolicy};
use crate::testing::{
    assert_completed_prefix, assert_no_stage_running, assert_run_status, assert_stage_statuses,
    fast_retry, linear_pipeline, sample_inputs, Gate, ScriptedRunner, Step, TestOrchestrator,
};

const WAIT: Duration = Duration::from_secs(600);

fn genomics_with(overrides: &[(&str, Arc<ScriptedRunner>)]) -> TestOrchestrator {
    let definition = genomics_pipeline(&fast_retry(3)).unwrap();
    let adapters = AdapterRegistry::uniform(&definition, Arc::new(ScriptedRunner::new()));
    for (name, runner) in overrides {
        adapters.register(*name, runner.clone());
    }
    TestOrchestrator::new(definition, adapters).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_full_run_completes_with_result_bundle() {
    let t = TestOrchestrator::genomics(Arc::new(ScriptedRunner::new())).unwrap();
    let orch = &t.orchestrator;

    let run_id = orch.submit(sample_inputs()).unwrap();
    orch.start(run_id).unwrap().await.unwrap();

    let snap = orch.snapshot(run_id).unwrap();
    assert_run_status(&snap, RunStatus::Completed);
    assert_stage_statuses(&snap, &[StageStatus::Completed; 6]);
    assert!((snap.progress - 1.0).abs() < f64::EPSILON);

    let bundle = orch.result(run_id).unwrap();
    assert_eq!(bundle.stages.len(), 6);
    assert_eq!(bundle.artifact_count(), 24);
    assert!(bundle.find("report").is_some());

    let logs = orch.logs(run_id, 0).unwrap();
    assert_eq!(
        logs.last().map(|e| e.message.as_str()),
        Some("Analysis completed successfully!")
    );
    assert!(logs.iter().any(|e| e.message == "✓ Salmon quantification"));
}

#[tokio::test(start_paused = true)]
async fn test_quantification_failure_halts_pipeline() {
    let salmon = Arc::new(ScriptedRunner::new().always(Step::Transient("index locked".into())));
    let t = genomics_with(&[("salmon", salmon.clone())]);
    let orch = &t.orchestrator;

    let (run_id, handle) = orch.launch(sample_inputs()).unwrap();
    handle.await.unwrap();

    let snap = orch.snapshot(run_id).unwrap();
    assert_run_status(&snap, RunStatus::Failed);
    assert_stage_statuses(
        &snap,
        &[
            StageStatus::Completed,
            StageStatus::Completed,
            StageStatus::Failed,
            StageStatus::Skipped,
            StageStatus::Skipped,
            StageStatus::Skipped,
        ],
    );

    assert_eq!(salmon.attempts_for("salmon_quant"), 3);
    let quant = snap.stages[2].state.task("salmon_quant").unwrap();
    assert_eq!(quant.status, TaskStatus::Failed);
    assert_eq!(quant.attempts, 3);
    assert_eq!(
        snap.stages[2].state.task("deseq2").unwrap().status,
        TaskStatus::Skipped
    );

    let failure = snap.failure.unwrap();
    assert_eq!(failure.stage_ordinal, 2);
    assert_eq!(failure.task.as_deref(), Some("salmon_quant"));
    assert!(failure.error.contains("index locked"));

    assert!(orch.result(run_id).is_err());
    assert!(t
        .events
        .stage_transitions(run_id)
        .iter()
        .all(|(ordinal, _)| *ordinal <= 2));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_stage_four() {
    let gate = Gate::new();
    let vienna = Arc::new(ScriptedRunner::new().with_gate(gate.clone()));
    let t = genomics_with(&[("viennarna", vienna.clone())]);
    let orch = &t.orchestrator;

    let (run_id, handle) = orch.launch(sample_inputs()).unwrap();

    gate.wait_arrival().await;
    assert_eq!(orch.snapshot(run_id).unwrap().current_stage, Some(4));
    orch.cancel(run_id).unwrap();
    assert_eq!(orch.snapshot(run_id).unwrap().status, RunStatus::Running);
    gate.release(1);
    handle.await.unwrap();

    let snap = orch.snapshot(run_id).unwrap();
    assert_run_status(&snap, RunStatus::Cancelled);
    assert_no_stage_running(&snap);
    assert_stage_statuses(
        &snap,
        &[
            StageStatus::Completed,
            StageStatus::Completed,
            StageStatus::Completed,
            StageStatus::Completed,
            StageStatus::Skipped,
            StageStatus::Skipped,
        ],
    );
    assert_eq!(
        snap.stages[4].state.task("structure_prediction").unwrap().status,
        TaskStatus::Succeeded
    );
    assert_eq!(vienna.call_count(), 1);
    assert!(!t
        .events
        .stage_transitions(run_id)
        .contains(&(5, StageStatus::Running)));
    assert!(t.events.events().contains(&RunEvent::RunFinished {
        run_id,
        status: RunStatus::Cancelled,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_up_to_max_attempts_still_complete() {
    for max_attempts in 1..=4 {
        let runner = Arc::new(ScriptedRunner::new().then_transient(max_attempts - 1, "busy"));
        let definition = linear_pipeline(1, "tool", &fast_retry(max_attempts));
        let t = TestOrchestrator::new(
            definition,
            AdapterRegistry::new().with("tool", runner.clone()),
        )
        .unwrap();

        let (run_id, handle) = t.orchestrator.launch(sample_inputs()).unwrap();
        handle.await.unwrap();

        let snap = t.orchestrator.snapshot(run_id).unwrap();
        assert_run_status(&snap, RunStatus::Completed);
        assert_eq!(snap.stages[0].state.status, StageStatus::Completed);
        assert_eq!(snap.stages[0].state.tasks[0].attempts, max_attempts);
        assert_eq!(runner.call_count(), max_attempts);
    }
}

#[tokio::test(start_paused = true)]
async fn test_attempts_never_exceed_policy() {
    let runner = Arc::new(ScriptedRunner::new().always(Step::Hang));
    let mut definition = linear_pipeline(2, "tool", &fast_retry(2));
    definition.stages[0].tasks[0] = definition.stages[0].tasks[0]
        .clone()
        .with_timeout(Duration::from_secs(1));
    let t = TestOrchestrator::new(
        definition,
        AdapterRegistry::new().with("tool", runner.clone()),
    )
    .unwrap();

    let (run_id, handle) = t.orchestrator.launch(sample_inputs()).unwrap();
    handle.await.unwrap();

    let snap = t.orchestrator.snapshot(run_id).unwrap();
    assert_run_status(&snap, RunStatus::Failed);
    assert_eq!(snap.stages[0].state.tasks[0].attempts, 2);
    assert!(snap.failure.unwrap().error.contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_are_monotonic_while_running() {
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(20)));
    let t = TestOrchestrator::new(
        linear_pipeline(5, "tool", &RetryPolicy::no_retry()),
        AdapterRegistry::new().with("tool", runner),
    )
    .unwrap();
    let orch = t.orchestrator.clone();

    let (run_id, handle) = orch.launch(sample_inputs()).unwrap();

    let mut last_progress = 0.0;
    let mut last_completed = 0;
    loop {
        let snap = orch.snapshot(run_id).unwrap();
        assert_completed_prefix(&snap);
        assert!(snap.progress >= last_progress);
        let completed = snap
            .stages
            .iter()
            .filter(|s| s.state.status == StageStatus::Completed)
            .count();
        assert!(completed >= last_completed);
        assert_eq!(
            (snap.progress - 1.0).abs() < f64::EPSILON,
            snap.status == RunStatus::Completed
        );
        last_progress = snap.progress;
        last_completed = completed;

        if snap.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    handle.await.unwrap();
    assert_eq!(last_completed, 5);
}

#[tokio::test(start_paused = true)]
async fn test_stage_never_starts_before_previous_is_terminal() {
    let t = TestOrchestrator::genomics(Arc::new(
        ScriptedRunner::new().with_delay(Duration::from_millis(5)),
    ))
    .unwrap();

    let (run_id, handle) = t.orchestrator.launch(sample_inputs()).unwrap();
    handle.await.unwrap();

    let transitions = t.events.stage_transitions(run_id);
    let mut terminal = vec![false; 6];
    for (ordinal, status) in transitions {
        if status == StageStatus::Running && ordinal > 0 {
            assert!(terminal[ordinal - 1], "stage {ordinal} started early");
        }
        if status.is_terminal() {
            terminal[ordinal] = true;
        }
    }
    assert!(terminal.iter().all(|t| *t));
}

#[tokio::test(start_paused = true)]
async fn test_log_tail_is_idempotent_and_ordered() {
    let t = TestOrchestrator::genomics(Arc::new(ScriptedRunner::new())).unwrap();
    let (run_id, handle) = t.orchestrator.launch(sample_inputs()).unwrap();
    handle.await.unwrap();

    let all = t.orchestrator.logs(run_id, 0).unwrap();
    assert_eq!(all, t.orchestrator.logs(run_id, 0).unwrap());
    assert!(all
        .iter()
        .enumerate()
        .all(|(i, e)| e.sequence == i as u64));

    let tail = t.orchestrator.logs(run_id, 10).unwrap();
    assert_eq!(tail.as_slice(), &all[10..]);

    for stage in 0..6 {
        let stamps: Vec<_> = all
            .iter()
            .filter(|e| e.stage == Some(stage))
            .map(|e| e.timestamp)
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[tokio::test(start_paused = true)]
async fn test_wait_terminal_helper_observes_completion() {
    let t = TestOrchestrator::genomics(Arc::new(
        ScriptedRunner::new().with_delay(Duration::from_millis(1)),
    ))
    .unwrap();
    let run_id = t.orchestrator.submit(sample_inputs()).unwrap();
    let _handle = t.orchestrator.start(run_id).unwrap();

    let snap = t.wait_terminal(run_id, WAIT).await.unwrap();
    assert_run_status(&snap, RunStatus::Completed);
}
