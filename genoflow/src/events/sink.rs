//! Event sink trait and implementations.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, Level};

use crate::core::{RunId, RunStatus, StageStatus, TaskStatus};

/// A lifecycle event emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run began executing.
    RunStarted {
        /// Run id.
        run_id: RunId,
        /// Pipeline name.
        pipeline: String,
    },
    /// A stage changed status.
    StageTransition {
        /// Run id.
        run_id: RunId,
        /// Stage ordinal.
        ordinal: usize,
        /// New status.
        status: StageStatus,
    },
    /// A task attempt finished.
    TaskAttempt {
        /// Run id.
        run_id: RunId,
        /// Stage ordinal.
        ordinal: usize,
        /// Task name.
        task: String,
        /// Attempt number, from one.
        attempt: usize,
        /// Status after the attempt.
        status: TaskStatus,
    },
    /// A run reached a terminal status.
    RunFinished {
        /// Run id.
        run_id: RunId,
        /// Terminal status.
        status: RunStatus,
    },
}

impl RunEvent {
    /// Dotted event type, e.g. `stage.transition`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::StageTransition { .. } => "stage.transition",
            Self::TaskAttempt { .. } => "task.attempt",
            Self::RunFinished { .. } => "run.finished",
        }
    }

    /// The run the event belongs to.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::StageTransition { run_id, .. }
            | Self::TaskAttempt { run_id, .. }
            | Self::RunFinished { run_id, .. } => *run_id,
        }
    }

    /// JSON payload of the event.
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "type": self.event_type() }))
    }
}

/// Receives orchestrator lifecycle events.
///
/// Implementations must not block the executor; failures are swallowed.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &RunEvent);

    /// Emits an event without awaiting.
    fn try_emit(&self, event: &RunEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &RunEvent) {}

    fn try_emit(&self, _event: &RunEvent) {}
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &RunEvent) {
        let run_id = event.run_id();
        let payload = event.payload();
        if self.level == Level::DEBUG {
            debug!(run_id = %run_id, event_type = event.event_type(), event_data = %payload, "Event");
        } else {
            info!(run_id = %run_id, event_type = event.event_type(), event_data = %payload, "Event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &RunEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &RunEvent) {
        self.log_event(event);
    }
}

/// Keeps every event in memory. Used by tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose type starts with the prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the stage transitions seen for one run, in order.
    #[must_use]
    pub fn stage_transitions(&self, run_id: RunId) -> Vec<(usize, StageStatus)> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                RunEvent::StageTransition {
                    run_id: id,
                    ordinal,
                    status,
                } if *id == run_id => Some((*ordinal, *status)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }
}
