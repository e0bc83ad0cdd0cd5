//! Sensor Hub - Main Entry Point

use anyhow::Context;
use api::{build_coordinator, create_router, describe_metrics, init_logging, serve, spawn_reconciler, AppState, Settings};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading configuration")?;
    init_logging(&settings.server.log_level, settings.server.log_json)
        .context("installing tracing subscriber")?;

    info!("=== Sensor Hub v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;
    describe_metrics();

    let coordinator = build_coordinator(&settings)
        .await
        .context("connecting stores")?;

    let _sweep = spawn_reconciler(&coordinator, &settings);

    let state = Arc::new(AppState::new(coordinator).with_metrics(metrics));
    let app = create_router(state, Some(&settings.rate_limit));

    serve(&settings.server.addr, app).await.context("serving HTTP")?;

    Ok(())
}
