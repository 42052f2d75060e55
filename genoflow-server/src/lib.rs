//! HTTP service for the genoflow orchestrator.
//!
//! Exposes job submission, start, status polling, log tailing, cancellation,
//! result retrieval and deletion over JSON, and runs the TTL reaper.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

pub mod config;
pub mod error;
pub mod http;
pub mod uploads;

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use genoflow::pipeline::Orchestrator;

pub use config::ServerConfig;
pub use error::ApiError;
pub use http::app_router;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The orchestrator owning all runs.
    pub orchestrator: Orchestrator,
    /// Server settings.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Bundles an orchestrator with its server settings.
    pub fn new(orchestrator: Orchestrator, config: ServerConfig) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
        }
    }
}

/// Runs the service until Ctrl-C.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("creating upload dir {}", config.upload_dir.display()))?;
    tokio::fs::create_dir_all(&config.results_dir)
        .await
        .with_context(|| format!("creating results dir {}", config.results_dir.display()))?;

    let orchestrator = Orchestrator::from_config(config.orchestrator.clone())
        .context("building orchestrator")?;
    info!(
        pipeline = %orchestrator.definition().name,
        stages = orchestrator.definition().stage_count(),
        adapters = ?config.orchestrator.adapter_mode,
        "Orchestrator ready"
    );
    let reaper = orchestrator.spawn_reaper();

    let addr = config.bind_addr;
    let app = app_router(AppState::new(orchestrator, config));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await;
    reaper.abort();
    result?;
    info!("Server stopped");
    Ok(())
}
