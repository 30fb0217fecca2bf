//! tgdigest worker entry point.

use std::sync::Arc;
use tgdigest_llm::HttpModelClient;
use tgdigest_worker::{telemetry, WorkerConfig, WorkerError};

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    telemetry::init_tracing()?;
    let config = WorkerConfig::load()?;
    let http = config.model.http_config();
    tracing::info!(model = ?http, "model client configured");
    let client = HttpModelClient::new(http)?;

    let summary = tgdigest_worker::run(&config, Arc::new(client)).await?;
    tracing::info!(
        windows = summary.windows,
        malformed_lines = summary.malformed_lines,
        pending = summary.pending,
        blocked = summary.blocked,
        "worker finished"
    );
    Ok(())
}
