//! Lifecycle event emission.
//!
//! The orchestrator reports run, stage and task transitions to an
//! [`EventSink`]. The default sink writes them to `tracing`.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RunEvent};
