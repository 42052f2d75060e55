//! Server settings layered over the orchestrator configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use genoflow::config::OrchestratorConfig;
use genoflow::errors::ConfigError;
use genoflow::observability::LogFormat;

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024 * 1024;

/// Everything the HTTP service needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Where submitted files are stored.
    pub upload_dir: PathBuf,
    /// Where tool outputs are written.
    pub results_dir: PathBuf,
    /// Request body limit for submissions.
    pub max_upload_bytes: usize,
    /// Process log format.
    pub log_format: LogFormat,
    /// Orchestrator policy.
    pub orchestrator: OrchestratorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            upload_dir: PathBuf::from("uploads"),
            results_dir: PathBuf::from("results"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            log_format: LogFormat::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reads `GENOFLOW_*` variables; `PORT` sets the port when no bind
    /// address is given. Command adapter outputs go to the results directory
    /// unless `GENOFLOW_WORK_DIR` says otherwise.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self {
            orchestrator: OrchestratorConfig::from_lookup(&lookup)?,
            ..Self::default()
        };

        if let Some(addr) = lookup("GENOFLOW_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|e| ConfigError::new("GENOFLOW_BIND_ADDR", format!("{e}")))?;
        } else if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|e| ConfigError::new("PORT", format!("{e}")))?;
            config.bind_addr.set_port(port);
        }
        if let Some(dir) = lookup("GENOFLOW_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("GENOFLOW_RESULTS_DIR") {
            config.results_dir = PathBuf::from(dir);
        }
        if lookup("GENOFLOW_WORK_DIR").is_none() {
            config.orchestrator.work_dir = config.results_dir.clone();
        }
        if let Some(limit) = lookup("GENOFLOW_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = limit
                .parse()
                .map_err(|e| ConfigError::new("GENOFLOW_MAX_UPLOAD_BYTES", format!("{e}")))?;
        }
        if let Some(format) = lookup("GENOFLOW_LOG_FORMAT") {
            config.log_format = format.parse()?;
        }
        Ok(config)
    }
}
