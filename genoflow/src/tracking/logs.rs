//! Append-only per-run progress log.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::{LogEntry, LogLine, RunId, Severity};
use crate::errors::OrchestratorError;
use crate::registry::RunRegistry;
use crate::utils::monotonic_now;

/// Ordered sink for human-readable progress lines.
///
/// Sequence numbers start at 0 and increase by one per appended entry of a
/// run. Entries are never reordered or removed while the run exists.
#[derive(Debug, Clone)]
pub struct LogCollector {
    registry: Arc<RunRegistry>,
}

impl LogCollector {
    /// Creates a collector backed by the registry's per-run buffers.
    #[must_use]
    pub fn new(registry: Arc<RunRegistry>) -> Self {
        Self { registry }
    }

    /// Appends a line and returns its sequence number.
    pub fn append(
        &self,
        run_id: RunId,
        stage: Option<usize>,
        line: LogLine,
    ) -> Result<u64, OrchestratorError> {
        let entry = self.registry.entry(run_id)?;
        let mut log = entry.log.write();

        let timestamp = monotonic_now(log.last_timestamp);
        let sequence = log.entries.len() as u64;
        log.last_timestamp = Some(timestamp);

        mirror_to_tracing(run_id, stage, &line);

        log.entries.push(LogEntry {
            sequence,
            run_id,
            stage,
            timestamp,
            severity: line.severity,
            message: line.message,
        });
        Ok(sequence)
    }

    /// Appends an info line for a stage.
    pub fn info(
        &self,
        run_id: RunId,
        stage: Option<usize>,
        message: impl Into<String>,
    ) -> Result<u64, OrchestratorError> {
        self.append(run_id, stage, LogLine::info(message))
    }

    /// Returns entries with sequence >= `since`, in order.
    pub fn tail(&self, run_id: RunId, since: u64) -> Result<Vec<LogEntry>, OrchestratorError> {
        let entry = self.registry.entry(run_id)?;
        let log = entry.log.read();
        let start = usize::try_from(since).unwrap_or(usize::MAX).min(log.entries.len());
        Ok(log.entries[start..].to_vec())
    }

    /// Number of entries recorded for a run.
    pub fn len(&self, run_id: RunId) -> Result<usize, OrchestratorError> {
        Ok(self.registry.entry(run_id)?.log.read().entries.len())
    }
}

fn mirror_to_tracing(run_id: RunId, stage: Option<usize>, line: &LogLine) {
    match line.severity {
        Severity::Debug => debug!(run_id = %run_id, stage = ?stage, "{}", line.message),
        Severity::Info => info!(run_id = %run_id, stage = ?stage, "{}", line.message),
        Severity::Warn => warn!(run_id = %run_id, stage = ?stage, "{}", line.message),
        Severity::Error => error!(run_id = %run_id, stage = ?stage, "{}", line.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JobInputs, PipelineDefinition, StageDefinition, TaskDefinition};
    use pretty_assertions::assert_eq;

    fn setup() -> (LogCollector, Arc<RunRegistry>, RunId) {
        let registry = Arc::new(RunRegistry::new());
        let def = PipelineDefinition::new(
            "test",
            vec![StageDefinition::new(0, "a").with_task(TaskDefinition::new("t", "x"))],
        )
        .unwrap();
        let id = registry.create(&def, JobInputs::new());
        (LogCollector::new(registry.clone()), registry, id)
    }

    #[test]
    fn test_sequence_numbers_are_contiguous() {
        let (logs, _, id) = setup();
        assert_eq!(logs.info(id, Some(0), "Starting").unwrap(), 0);
        assert_eq!(logs.info(id, Some(0), "Step").unwrap(), 1);
        assert_eq!(logs.append(id, None, LogLine::warn("Careful")).unwrap(), 2);
        assert_eq!(logs.len(id).unwrap(), 3);
    }

    #[test]
    fn test_tail_since() {
        let (logs, _, id) = setup();
        for i in 0..5 {
            logs.info(id, Some(0), format!("line {i}")).unwrap();
        }

        let tail = logs.tail(id, 3).unwrap();
        let messages: Vec<_> = tail.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["line 3", "line 4"]);

        assert!(logs.tail(id, 5).unwrap().is_empty());
        assert!(logs.tail(id, 100).unwrap().is_empty());
    }

    #[test]
    fn test_tail_is_idempotent() {
        let (logs, _, id) = setup();
        logs.info(id, Some(0), "a").unwrap();
        logs.info(id, Some(0), "b").unwrap();

        let first = logs.tail(id, 0).unwrap();
        let second = logs.tail(id, 0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let (logs, _, id) = setup();
        for i in 0..20 {
            logs.info(id, Some(0), format!("{i}")).unwrap();
        }
        let entries = logs.tail(id, 0).unwrap();
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_append_to_deleted_run_fails() {
        let (logs, registry, id) = setup();
        registry.delete(id).unwrap();
        assert!(logs.info(id, None, "late").unwrap_err().is_not_found());
        assert!(logs.tail(id, 0).unwrap_err().is_not_found());
    }
}
