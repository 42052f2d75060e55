//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::pipeline::RetryPolicy;

fn default_run_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_reaper_interval_secs() -> u64 {
    60
}

fn default_parallelism() -> usize {
    2
}

fn default_simulated_min_delay_ms() -> u64 {
    1000
}

fn default_simulated_max_delay_ms() -> u64 {
    3000
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("genoflow-work")
}

/// Which runner backs the pipeline's adapter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterMode {
    /// Timed simulation with synthetic outputs.
    #[default]
    Simulated,
    /// External programs described in task parameters.
    Command,
}

impl FromStr for AdapterMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(Self::Simulated),
            "command" => Ok(Self::Command),
            other => Err(ConfigError::new(
                "GENOFLOW_ADAPTER_MODE",
                format!("expected 'simulated' or 'command', got '{other}'"),
            )),
        }
    }
}

/// Runtime policy of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How long finished or never-started runs are retained.
    #[serde(default = "default_run_ttl_secs")]
    pub run_ttl_secs: u64,
    /// How often the reaper evicts expired runs.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    /// Cap on concurrently running runs; `None` is unlimited.
    #[serde(default)]
    pub max_active_runs: Option<usize>,
    /// Parallelism for independent tasks when a stage sets none.
    #[serde(default = "default_parallelism")]
    pub default_parallelism: usize,
    /// Retry policy for stages of the built-in catalog.
    #[serde(default)]
    pub default_retry: RetryPolicy,
    /// Lower bound of the simulated tool delay.
    #[serde(default = "default_simulated_min_delay_ms")]
    pub simulated_min_delay_ms: u64,
    /// Upper bound of the simulated tool delay.
    #[serde(default = "default_simulated_max_delay_ms")]
    pub simulated_max_delay_ms: u64,
    /// Adapter backing.
    #[serde(default)]
    pub adapter_mode: AdapterMode,
    /// Pipeline definition file; the built-in catalog is used when unset.
    #[serde(default)]
    pub pipeline_file: Option<PathBuf>,
    /// Root directory for command adapter outputs.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_ttl_secs: default_run_ttl_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            max_active_runs: None,
            default_parallelism: default_parallelism(),
            default_retry: RetryPolicy::default(),
            simulated_min_delay_ms: default_simulated_min_delay_ms(),
            simulated_max_delay_ms: default_simulated_max_delay_ms(),
            adapter_mode: AdapterMode::default(),
            pipeline_file: None,
            work_dir: default_work_dir(),
        }
    }
}

impl OrchestratorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from `GENOFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("GENOFLOW_RUN_TTL_SECS") {
            config.run_ttl_secs = parse("GENOFLOW_RUN_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("GENOFLOW_REAPER_INTERVAL_SECS") {
            config.reaper_interval_secs = parse("GENOFLOW_REAPER_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("GENOFLOW_MAX_ACTIVE_RUNS") {
            let limit: usize = parse("GENOFLOW_MAX_ACTIVE_RUNS", &v)?;
            config.max_active_runs = (limit > 0).then_some(limit);
        }
        if let Some(v) = lookup("GENOFLOW_DEFAULT_PARALLELISM") {
            config.default_parallelism = parse("GENOFLOW_DEFAULT_PARALLELISM", &v)?;
        }
        if let Some(v) = lookup("GENOFLOW_MAX_ATTEMPTS") {
            config.default_retry.max_attempts = parse("GENOFLOW_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("GENOFLOW_RETRY_BASE_DELAY_MS") {
            config.default_retry.base_delay_ms = parse("GENOFLOW_RETRY_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("GENOFLOW_RETRY_MAX_DELAY_MS") {
            config.default_retry.max_delay_ms = parse("GENOFLOW_RETRY_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("GENOFLOW_SIMULATED_MIN_DELAY_MS") {
            config.simulated_min_delay_ms = parse("GENOFLOW_SIMULATED_MIN_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("GENOFLOW_SIMULATED_MAX_DELAY_MS") {
            config.simulated_max_delay_ms = parse("GENOFLOW_SIMULATED_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("GENOFLOW_ADAPTER_MODE") {
            config.adapter_mode = v.parse()?;
        }
        if let Some(v) = lookup("GENOFLOW_PIPELINE_FILE") {
            config.pipeline_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("GENOFLOW_WORK_DIR") {
            config.work_dir = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_parallelism == 0 {
            return Err(ConfigError::new(
                "default_parallelism",
                "must be at least 1",
            ));
        }
        if self.default_retry.max_attempts == 0 {
            return Err(ConfigError::new("default_retry.max_attempts", "must be at least 1"));
        }
        if self.simulated_min_delay_ms > self.simulated_max_delay_ms {
            return Err(ConfigError::new(
                "simulated_min_delay_ms",
                "must not exceed simulated_max_delay_ms",
            ));
        }
        if self.adapter_mode == AdapterMode::Command && self.pipeline_file.is_none() {
            return Err(ConfigError::new(
                "pipeline_file",
                "command adapters need a pipeline file describing each tool invocation",
            ));
        }
        Ok(())
    }

    /// Sets the retention period of idle runs.
    #[must_use]
    pub fn with_run_ttl(mut self, ttl: Duration) -> Self {
        self.run_ttl_secs = ttl.as_secs();
        self
    }

    /// Caps the number of concurrently running runs.
    #[must_use]
    pub fn with_max_active_runs(mut self, limit: usize) -> Self {
        self.max_active_runs = Some(limit);
        self
    }

    /// Sets the default parallelism for independent tasks.
    #[must_use]
    pub fn with_default_parallelism(mut self, parallelism: usize) -> Self {
        self.default_parallelism = parallelism;
        self
    }

    /// Sets the retry policy of catalog stages.
    #[must_use]
    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }

    /// Sets the simulated delay range in milliseconds.
    #[must_use]
    pub fn with_simulated_delay_ms(mut self, min: u64, max: u64) -> Self {
        self.simulated_min_delay_ms = min;
        self.simulated_max_delay_ms = max;
        self
    }

    /// Sets the adapter mode.
    #[must_use]
    pub fn with_adapter_mode(mut self, mode: AdapterMode) -> Self {
        self.adapter_mode = mode;
        self
    }

    /// Sets the pipeline definition file.
    #[must_use]
    pub fn with_pipeline_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline_file = Some(path.into());
        self
    }

    /// Retention period of finished or never-started runs.
    #[must_use]
    pub fn run_ttl(&self) -> Duration {
        Duration::from_secs(self.run_ttl_secs)
    }

    /// Reaper interval, at least one second.
    #[must_use]
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::new(key, format!("'{value}': {e}")))
}
