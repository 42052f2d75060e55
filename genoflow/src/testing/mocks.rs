//! Deterministic fake adapters.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::adapters::{TaskLogger, TaskRequest, TaskRunner};
use crate::core::TaskOutput;
use crate::errors::ToolError;

/// One scripted response of a [`ScriptedRunner`].
#[derive(Debug, Clone)]
pub enum Step {
    /// Succeed with a handle for every expected output.
    Succeed,
    /// Succeed but omit the named output.
    SucceedWithout(String),
    /// Fail transiently.
    Transient(String),
    /// Fail fatally.
    Fatal(String),
    /// Never return; relies on the task timeout.
    Hang,
}

/// A call observed by a [`ScriptedRunner`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Task name.
    pub task: String,
    /// Stage ordinal.
    pub stage_ordinal: usize,
    /// Attempt number.
    pub attempt: usize,
    /// Inputs the task received.
    pub inputs: BTreeMap<String, String>,
}

/// Holds task attempts until a test releases them.
///
/// Every attempt passing through the gate registers its arrival first, so a
/// test can wait until a task is in flight, act, then let it finish.
#[derive(Debug)]
pub struct Gate {
    arrived: Semaphore,
    released: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            arrived: Semaphore::new(0),
            released: Semaphore::new(0),
        }
    }
}

impl Gate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Waits until an attempt arrives at the gate.
    pub async fn wait_arrival(&self) {
        if let Ok(permit) = self.arrived.acquire().await {
            permit.forget();
        }
    }

    /// Lets `n` held attempts continue.
    pub fn release(&self, n: usize) {
        self.released.add_permits(n);
    }

    async fn pass(&self) {
        self.arrived.add_permits(1);
        if let Ok(permit) = self.released.acquire().await {
            permit.forget();
        }
    }
}

/// A runner replaying a fixed script of outcomes, then a fallback.
#[derive(Debug)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Duration,
    gate: Option<Arc<Gate>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Step::Succeed,
            delay: Duration::ZERO,
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedRunner {
    /// Creates a runner that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step to the script.
    #[must_use]
    pub fn then(self, step: Step) -> Self {
        self.script.lock().push_back(step);
        self
    }

    /// Appends `times` transient failures.
    #[must_use]
    pub fn then_transient(self, times: usize, message: &str) -> Self {
        {
            let mut script = self.script.lock();
            for _ in 0..times {
                script.push_back(Step::Transient(message.to_string()));
            }
        }
        self
    }

    /// Sets the response once the script is exhausted.
    #[must_use]
    pub fn always(mut self, step: Step) -> Self {
        self.fallback = step;
        self
    }

    /// Sleeps before every response.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Holds every attempt at the gate before responding.
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Returns the calls observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Number of attempts observed so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of attempts observed for one task.
    #[must_use]
    pub fn attempts_for(&self, task: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.task == task).count()
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn output_for(request: &TaskRequest, omit: Option<&str>) -> TaskOutput {
    request
        .expected_outputs
        .iter()
        .filter(|key| Some(key.as_str()) != omit)
        .fold(TaskOutput::new(), |output, key| {
            output.with_artifact(
                key.clone(),
                format!("mem://{}/{}/{key}", request.run_id, request.task),
            )
        })
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn run(&self, request: TaskRequest, log: TaskLogger) -> Result<TaskOutput, ToolError> {
        self.calls.lock().push(RecordedCall {
            task: request.task.clone(),
            stage_ordinal: request.stage_ordinal,
            attempt: request.attempt,
            inputs: request.inputs.clone(),
        });
        let step = self.next_step();

        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match step {
            Step::Succeed => {
                log.info("done");
                Ok(output_for(&request, None))
            }
            Step::SucceedWithout(key) => Ok(output_for(&request, Some(&key))),
            Step::Transient(message) => Err(ToolError::transient(message)),
            Step::Fatal(message) => Err(ToolError::fatal(message)),
            Step::Hang => {
                std::future::pending::<()>().await;
                Err(ToolError::fatal("unreachable"))
            }
        }
    }
}
