//! Process-wide registry of pipeline runs.
//!
//! The run is the unit of ownership: its state, its log and its cancellation
//! token live in one [`RunEntry`] and are released together when the entry is
//! deleted or evicted.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cancellation::CancellationToken;
use crate::core::{JobInputs, LogEntry, PipelineDefinition, PipelineRun, RunId, RunStatus};
use crate::errors::OrchestratorError;
use crate::utils::{now_utc, Timestamp};

/// Append-only log buffer of one run.
#[derive(Debug, Default)]
pub(crate) struct RunLog {
    pub(crate) entries: Vec<LogEntry>,
    pub(crate) last_timestamp: Option<Timestamp>,
}

/// Everything the registry holds for one run.
#[derive(Debug)]
pub struct RunEntry {
    pub(crate) run: RwLock<PipelineRun>,
    pub(crate) log: RwLock<RunLog>,
    cancel: Arc<CancellationToken>,
}

impl RunEntry {
    fn new(run: PipelineRun) -> Self {
        Self {
            run: RwLock::new(run),
            log: RwLock::new(RunLog::default()),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Returns the run's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> Arc<CancellationToken> {
        self.cancel.clone()
    }

    /// Returns a deep copy of the run record.
    #[must_use]
    pub fn run(&self) -> PipelineRun {
        self.run.read().clone()
    }

    /// Returns the current run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.run.read().status
    }
}

/// Thread-safe map from run id to run state.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: DashMap<RunId, Arc<RunEntry>>,
}

impl RunRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pending run and returns its id.
    pub fn create(&self, definition: &PipelineDefinition, inputs: JobInputs) -> RunId {
        loop {
            let id = RunId::new();
            if let Entry::Vacant(slot) = self.runs.entry(id) {
                slot.insert(Arc::new(RunEntry::new(PipelineRun::new(
                    id,
                    definition,
                    inputs,
                ))));
                debug!(run_id = %id, "Run created");
                return id;
            }
        }
    }

    /// Returns a deep copy of the run record.
    pub fn get(&self, run_id: RunId) -> Result<PipelineRun, OrchestratorError> {
        self.entry(run_id).map(|entry| entry.run())
    }

    /// Returns a handle to the run entry.
    pub fn entry(&self, run_id: RunId) -> Result<Arc<RunEntry>, OrchestratorError> {
        self.runs
            .get(&run_id)
            .map(|e| e.value().clone())
            .ok_or(OrchestratorError::RunNotFound(run_id))
    }

    /// Returns true if the run exists.
    #[must_use]
    pub fn contains(&self, run_id: RunId) -> bool {
        self.runs.contains_key(&run_id)
    }

    /// Removes a run and all of its state.
    ///
    /// Any execution still in flight is cancelled and will observe
    /// `RunNotFound` on its next write.
    pub fn delete(&self, run_id: RunId) -> Result<(), OrchestratorError> {
        let (_, entry) = self
            .runs
            .remove(&run_id)
            .ok_or(OrchestratorError::RunNotFound(run_id))?;
        entry.cancel.cancel("run deleted");
        info!(run_id = %run_id, "Run deleted");
        Ok(())
    }

    /// Removes runs that have been idle for more than `ttl`.
    ///
    /// Terminal runs expire `ttl` after they ended. Pending runs that were
    /// never started expire `ttl` after submission. Running runs never expire.
    pub fn evict_expired(&self, ttl: Duration) -> Vec<RunId> {
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let Some(cutoff) = now_utc().checked_sub_signed(ttl) else {
            return Vec::new();
        };

        let candidates: Vec<RunId> = self
            .runs
            .iter()
            .filter(|e| is_expired(&e.value().run.read(), cutoff))
            .map(|e| *e.key())
            .collect();

        let mut expired = Vec::with_capacity(candidates.len());
        for id in candidates {
            let removed = self
                .runs
                .remove_if(&id, |_, entry| is_expired(&entry.run.read(), cutoff));
            if let Some((_, entry)) = removed {
                entry.cancel.cancel("run expired");
                expired.push(id);
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Evicted expired runs");
        }
        expired
    }

    /// Number of runs currently executing.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.runs
            .iter()
            .filter(|e| e.value().status() == RunStatus::Running)
            .count()
    }

    /// Ids of every registered run.
    #[must_use]
    pub fn ids(&self) -> Vec<RunId> {
        self.runs.iter().map(|e| *e.key()).collect()
    }

    /// Number of registered runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Returns true if no runs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

fn is_expired(run: &PipelineRun, cutoff: Timestamp) -> bool {
    match run.status {
        RunStatus::Pending => run.created_at <= cutoff,
        status if status.is_terminal() => run.ended_at.is_some_and(|ended| ended <= cutoff),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StageDefinition, TaskDefinition};

    fn definition() -> PipelineDefinition {
        PipelineDefinition::new(
            "test",
            vec![StageDefinition::new(0, "a").with_task(TaskDefinition::new("t", "x"))],
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let registry = RunRegistry::new();
        let id = registry.create(&definition(), JobInputs::new());

        let run = registry.get(id).unwrap();
        assert_eq!(run.id, id);
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = RunRegistry::new();
        let a = registry.create(&definition(), JobInputs::new());
        let b = registry.create(&definition(), JobInputs::new());
        assert_ne!(a, b);
    }

    #[test]
    fn test_get_unknown_run() {
        let registry = RunRegistry::new();
        let err = registry.get(RunId::new()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_cancels_and_removes() {
        let registry = RunRegistry::new();
        let id = registry.create(&definition(), JobInputs::new());
        let entry = registry.entry(id).unwrap();

        registry.delete(id).unwrap();

        assert!(!registry.contains(id));
        assert!(entry.cancel_token().is_cancelled());
        assert!(registry.delete(id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_evict_expired_only_terminal_runs() {
        let registry = RunRegistry::new();
        let done = registry.create(&definition(), JobInputs::new());
        let pending = registry.create(&definition(), JobInputs::new());

        {
            let entry = registry.entry(done).unwrap();
            let mut run = entry.run.write();
            run.finish(RunStatus::Completed);
            run.ended_at = Some(now_utc() - chrono::Duration::hours(2));
        }

        let evicted = registry.evict_expired(Duration::from_secs(3600));
        assert_eq!(evicted, vec![done]);
        assert!(registry.contains(pending));
        assert!(!registry.contains(done));
    }

    #[test]
    fn test_evict_expired_abandoned_pending_run() {
        let registry = RunRegistry::new();
        let abandoned = registry.create(&definition(), JobInputs::new());
        let fresh = registry.create(&definition(), JobInputs::new());
        let running = registry.create(&definition(), JobInputs::new());

        let entry = registry.entry(abandoned).unwrap();
        entry.run.write().created_at = now_utc() - chrono::Duration::days(365);
        {
            let running = registry.entry(running).unwrap();
            let mut run = running.run.write();
            run.status = RunStatus::Running;
            run.created_at = now_utc() - chrono::Duration::days(365);
        }

        let evicted = registry.evict_expired(Duration::from_secs(3600));
        assert_eq!(evicted, vec![abandoned]);
        assert!(!registry.contains(abandoned));
        assert!(registry.contains(fresh));
        assert!(registry.contains(running));
        assert!(entry.cancel_token().is_cancelled());
    }

    #[test]
    fn test_active_count() {
        let registry = RunRegistry::new();
        let id = registry.create(&definition(), JobInputs::new());
        assert_eq!(registry.active_count(), 0);

        registry.entry(id).unwrap().run.write().status = RunStatus::Running;
        assert_eq!(registry.active_count(), 1);
    }
}
