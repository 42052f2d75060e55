use anyhow::Context;

use genoflow::observability::init_tracing;
use genoflow_server::{serve, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_format)?;
    serve(config).await
}
