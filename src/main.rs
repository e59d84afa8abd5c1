//! Race telemetry pipeline process entry point.
//!
//! # Usage
//!
//! ```bash
//! # Run with built-in defaults
//! cargo run --release
//!
//! # Point at a config file and bind address
//! RACE_PIPELINE_CONFIG=pipeline_config.toml cargo run --release -- --addr 0.0.0.0:9000
//! ```
//!
//! # Environment Variables
//!
//! - `RACE_PIPELINE_CONFIG`: path to a TOML config file, searched before
//!   `./pipeline_config.toml` and the built-in defaults.
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use race_telemetry_pipeline::config::PipelineConfig;
use race_telemetry_pipeline::pipeline::RacePipeline;
use race_telemetry_pipeline::wsm::ws_upgrade;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "race-telemetry-pipeline")]
#[command(about = "Real-time race telemetry pipeline")]
#[command(version)]
struct CliArgs {
    /// Path to a pipeline config TOML file (overrides RACE_PIPELINE_CONFIG).
    #[arg(long, env = "RACE_PIPELINE_CONFIG")]
    config: Option<String>,

    /// Address WSM's WebSocket endpoint binds to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// Race identifier stamped on every published tactical event.
    #[arg(long, default_value = "race-1")]
    race_id: String,

    /// Detection tick cadence, milliseconds.
    #[arg(long, default_value_t = 1_000)]
    detection_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = CliArgs::parse();

    if let Some(path) = &args.config {
        std::env::set_var("RACE_PIPELINE_CONFIG", path);
    }
    let config = PipelineConfig::load();

    info!(addr = %args.addr, race_id = %args.race_id, "starting race telemetry pipeline");

    let pipeline = RacePipeline::new(config, args.race_id.clone());
    let cancellation = CancellationToken::new();
    let detection_interval = std::time::Duration::from_millis(args.detection_interval_ms);
    let handles = pipeline.spawn(detection_interval, cancellation.clone());

    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(pipeline.wsm.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&args.addr).await.context("failed to bind WSM listener")?;
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(cancellation.clone()));

    if let Err(e) = server.await {
        tracing::error!(error = %e, "wsm http server exited with error");
    }

    cancellation.cancel();
    for handle in handles {
        let _ = handle.await;
    }

    info!("race telemetry pipeline shut down cleanly");
    Ok(())
}

async fn shutdown_signal(cancellation: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    cancellation.cancel();
}
