//! Span constructors and timing.

use std::time::Instant;
use tracing::{info_span, Span};

use crate::core::RunId;

/// Span wrapping the whole execution of a run.
#[must_use]
pub fn run_span(run_id: RunId, pipeline: &str) -> Span {
    info_span!("run", run_id = %run_id, pipeline = %pipeline)
}

/// Span wrapping one stage.
#[must_use]
pub fn stage_span(ordinal: usize, name: &str) -> Span {
    info_span!("stage", stage = ordinal, stage_name = %name)
}

/// Span wrapping one task attempt.
#[must_use]
pub fn task_span(task: &str, adapter: &str, attempt: usize) -> Span {
    info_span!("task", task = %task, adapter = %adapter, attempt)
}

/// Measures the wall time of an operation.
#[derive(Debug)]
pub struct SpanTimer {
    name: String,
    start: Instant,
}

impl SpanTimer {
    /// Starts timing.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
        }
    }

    /// Milliseconds since start.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// The timed operation.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_measures_elapsed() {
        let timer = SpanTimer::start("salmon_quant");
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(timer.elapsed_ms() >= 2.0);
        assert_eq!(timer.name(), "salmon_quant");
    }

    #[test]
    fn test_spans_construct_without_subscriber() {
        let span = stage_span(2, "Transcriptome Processing");
        let _entered = span.enter();
        let _task = task_span("salmon_quant", "salmon", 1);
        let _run = run_span(RunId::new(), "genomics");
    }
}
