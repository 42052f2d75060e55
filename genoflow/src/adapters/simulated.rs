//! Timed simulation of a tool step.

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::ops::RangeInclusive;
use std::time::Duration;

use super::{TaskLogger, TaskRequest, TaskRunner};
use crate::core::TaskOutput;
use crate::errors::ToolError;

/// Stands in for a real tool: waits a random delay, then returns synthetic
/// `sim://` handles for every expected output.
///
/// Useful for development deployments where the bioinformatics tools are not
/// installed.
#[derive(Debug, Clone)]
pub struct SimulatedAdapter {
    delay_ms: RangeInclusive<u64>,
    transient_failure_rate: f64,
}

impl Default for SimulatedAdapter {
    fn default() -> Self {
        Self::new(1000..=3000)
    }
}

impl SimulatedAdapter {
    /// Creates an adapter that sleeps for a random delay in the range.
    #[must_use]
    pub fn new(delay_ms: RangeInclusive<u64>) -> Self {
        Self {
            delay_ms,
            transient_failure_rate: 0.0,
        }
    }

    /// Creates an adapter that returns immediately.
    #[must_use]
    pub fn instant() -> Self {
        Self::new(0..=0)
    }

    /// Makes a fraction of attempts fail transiently.
    #[must_use]
    pub fn with_transient_failure_rate(mut self, rate: f64) -> Self {
        self.transient_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    fn pick_delay(&self) -> Duration {
        let (low, high) = (*self.delay_ms.start(), *self.delay_ms.end());
        if high <= low {
            return Duration::from_millis(low);
        }
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }

    fn should_fail(&self) -> bool {
        self.transient_failure_rate > 0.0 && rand::thread_rng().gen_bool(self.transient_failure_rate)
    }
}

#[async_trait]
impl TaskRunner for SimulatedAdapter {
    async fn run(&self, request: TaskRequest, log: TaskLogger) -> Result<TaskOutput, ToolError> {
        let delay = self.pick_delay();
        log.info(format!(
            "Simulating {} (attempt {}, {} inputs)",
            request.task,
            request.attempt,
            request.inputs.len()
        ));

        tokio::time::sleep(delay).await;

        if self.should_fail() {
            return Err(ToolError::transient("simulated resource contention"));
        }

        let output = request.expected_outputs.iter().fold(
            TaskOutput::new().with_summary(json!({
                "simulated": true,
                "durationMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            })),
            |output, key| {
                output.with_artifact(
                    key.clone(),
                    format!(
                        "sim://{}/{}/{}/{}",
                        request.run_id, request.stage_ordinal, request.task, key
                    ),
                )
            },
        );
        Ok(output)
    }
}
