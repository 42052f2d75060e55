//! Child-process adapter for command-line tools.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{TaskLogger, TaskRequest, TaskRunner};
use crate::core::TaskOutput;
use crate::errors::ToolError;

const STDERR_TAIL_LINES: usize = 20;

/// EX_TEMPFAIL from sysexits.h.
const EX_TEMPFAIL: i32 = 75;

fn default_retry_exit_codes() -> Vec<i32> {
    vec![EX_TEMPFAIL]
}

/// Command description read from a task's `params`.
///
/// ```json
/// {
///   "program": "salmon",
///   "args": ["quant", "-r", "{input:hostTranscriptome}", "-o", "{output_dir}"],
///   "outputs": {"quant": "{output_dir}/quant.sf"},
///   "retryExitCodes": [75]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandSpec {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
    #[serde(default = "default_retry_exit_codes")]
    retry_exit_codes: Vec<i32>,
}

fn placeholder_pattern() -> Result<&'static Regex, ToolError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{(input:)?([A-Za-z_][A-Za-z0-9_]*)\}"))
        .as_ref()
        .map_err(|e| ToolError::fatal(format!("placeholder pattern: {e}")))
}

/// Runs a task as a child process.
///
/// Arguments and output paths may reference `{input:<key>}`, `{output_dir}`,
/// `{run_id}`, `{task}` and `{attempt}`. Exit code 0 is success; codes listed
/// in `retryExitCodes` and termination by signal are transient; anything else
/// is fatal. The child is killed if the attempt is dropped.
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    work_dir: PathBuf,
}

impl CommandAdapter {
    /// Creates an adapter writing task outputs under `work_dir`.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    fn output_dir(&self, request: &TaskRequest) -> PathBuf {
        let task: String = request
            .task
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.work_dir
            .join(request.run_id.to_string())
            .join(format!("{:02}-{task}", request.stage_ordinal))
    }
}

struct Placeholders<'a> {
    request: &'a TaskRequest,
    output_dir: String,
}

impl Placeholders<'_> {
    fn substitute(&self, template: &str) -> Result<String, ToolError> {
        let pattern = placeholder_pattern()?;
        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in pattern.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&template[last..whole.start()]);

            let name = &caps[2];
            if caps.get(1).is_some() {
                let value = self.request.input(name).ok_or_else(|| {
                    ToolError::fatal(format!("no input '{name}' for placeholder in '{template}'"))
                })?;
                out.push_str(value);
            } else {
                match name {
                    "output_dir" => out.push_str(&self.output_dir),
                    "run_id" => out.push_str(&self.request.run_id.to_string()),
                    "task" => out.push_str(&self.request.task),
                    "attempt" => out.push_str(&self.request.attempt.to_string()),
                    other => {
                        return Err(ToolError::fatal(format!("unknown placeholder '{{{other}}}'")))
                    }
                }
            }
            last = whole.end();
        }

        out.push_str(&template[last..]);
        Ok(out)
    }
}

#[async_trait]
impl TaskRunner for CommandAdapter {
    async fn run(&self, request: TaskRequest, log: TaskLogger) -> Result<TaskOutput, ToolError> {
        let spec: CommandSpec = serde_json::from_value(request.params.clone())
            .map_err(|e| ToolError::fatal(format!("invalid command parameters: {e}")))?;

        let output_dir = self.output_dir(&request);
        tokio::fs::create_dir_all(&output_dir).await.map_err(|e| {
            ToolError::transient(format!("cannot create {}: {e}", output_dir.display()))
        })?;

        let vars = Placeholders {
            request: &request,
            output_dir: output_dir.display().to_string(),
        };
        let args = spec
            .args
            .iter()
            .map(|arg| vars.substitute(arg))
            .collect::<Result<Vec<_>, _>>()?;

        log.info(format!("$ {} {}", spec.program, args.join(" ")));

        let mut child = Command::new(&spec.program)
            .args(&args)
            .current_dir(&output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    ToolError::fatal(format!("cannot launch {}: {e}", spec.program))
                }
                _ => ToolError::transient(format!("cannot launch {}: {e}", spec.program)),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_log = log.clone();
        let forward_stdout = async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    stdout_log.info(line);
                }
            }
        };
        let collect_stderr = async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        };

        let (status, (), stderr_tail) = tokio::join!(child.wait(), forward_stdout, collect_stderr);
        let status = status.map_err(|e| {
            ToolError::transient(format!("failed waiting for {}: {e}", spec.program))
        })?;

        match status.code() {
            Some(0) => {}
            Some(code) if spec.retry_exit_codes.contains(&code) => {
                return Err(ToolError::transient(format!(
                    "{} exited with {code}: {stderr_tail}",
                    spec.program
                )));
            }
            Some(code) => {
                return Err(ToolError::fatal(format!(
                    "{} exited with {code}: {stderr_tail}",
                    spec.program
                )));
            }
            None => {
                return Err(ToolError::transient(format!(
                    "{} was terminated by a signal",
                    spec.program
                )));
            }
        }

        let mut output = TaskOutput::new().with_summary(json!({
            "program": spec.program,
            "exitCode": 0,
        }));

        for (key, template) in &spec.outputs {
            let path = vars.substitute(template)?;
            if tokio::fs::metadata(&path).await.is_err() {
                return Err(ToolError::fatal(format!(
                    "declared output '{key}' was not written to {path}"
                )));
            }
            output = output.with_artifact(key.clone(), path);
        }

        for key in &request.expected_outputs {
            if output.artifacts.contains_key(key) {
                continue;
            }
            let candidate = output_dir.join(key);
            if tokio::fs::metadata(&candidate).await.is_ok() {
                output = output.with_artifact(key.clone(), candidate.display().to_string());
            }
        }

        Ok(output)
    }
}
