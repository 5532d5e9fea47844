//! AegisGuard - Real-time transaction risk monitor
//!
//! Runs the event feed, the risk pipeline, the automation dispatcher and the
//! HTTP/WebSocket API in one process.
//!
//! Usage:
//!   cargo run --release
//!
//! Environment:
//!   AEGIS_PORT / PORT  - Server port (default: 8000)
//!   AEGIS_HOST         - Server host (default: 0.0.0.0)
//!   AEGIS_FEED_URL     - Upstream WebSocket feed (synthetic feed when unset)
//!   N8N_WEBHOOK_URL    - Automation webhook endpoint
//!   GROQ_API_KEY       - Enables LLM explanations
//!   RUST_LOG           - Log filter (default: info)

use aegis_guard::api::{create_router, start_cleanup_task, AppState};
use aegis_guard::core::AegisEngine;
use aegis_guard::models::AegisConfig;
use aegis_guard::providers::{
    inference, spawn_feed, HttpWebhook, InferenceClient, NoopWebhook, WebhookClient,
};
use aegis_guard::utils::constants::{APP_VERSION, FEED_CHANNEL_CAPACITY};
use aegis_guard::TelemetryCollector;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    print_banner();

    let config = AegisConfig::from_env();
    config.log_summary();

    let telemetry = Arc::new(TelemetryCollector::new(&config.telemetry));
    let explainer: Arc<dyn InferenceClient> = inference::from_config(&config.inference);
    let inference_name = explainer.name();

    let webhook: Arc<dyn WebhookClient> = match HttpWebhook::new(config.dispatch.timeout) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!(error = %e, "⚠️ Webhook client init failed, automation deliveries are simulated");
            Arc::new(NoopWebhook::default())
        }
    };

    let engine = Arc::new(AegisEngine::new(
        &config,
        explainer,
        webhook,
        telemetry.clone(),
    ));

    // Feed -> producer
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
    let feed_handle = spawn_feed(&config.feed, event_tx, shutdown_rx.clone());
    let producer_handle = tokio::spawn(engine.clone().run(event_rx, shutdown_rx));

    let cleanup_handle = start_cleanup_task();
    info!("🧹 Background cleanup task started");

    let state = Arc::new(AppState::new(
        engine.clone(),
        inference_name,
        config.dispatch.webhook_url.is_some(),
    ));
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind_addr().parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("🚀 AEGIS API listening on http://{}", addr);
    info!("");
    info!("Endpoints:");
    info!("  GET  /api/health              - Health check");
    info!("  GET  /api/defcon-status       - Current threat level");
    info!("  GET  /api/predict             - EMA risk forecast");
    info!("  POST /api/simulate            - Attack scenario simulation");
    info!("  POST /api/trigger-automation  - Manual workflow trigger");
    info!("  GET  /api/market-intel/overview");
    info!("  WS   /ws/monitor              - Live enriched transactions");
    info!("");
    info!("Press Ctrl+C for graceful shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine.clone()))
        .await?;

    info!("🛑 Shutdown signal received, cleaning up...");

    shutdown_tx.send_replace(true);
    if let Err(e) = producer_handle.await {
        warn!(error = %e, "⚠️ Pipeline producer task failed");
    }
    if let Err(e) = feed_handle.await {
        warn!(error = %e, "⚠️ Feed task failed");
    }
    cleanup_handle.abort();

    engine.shutdown().await;

    info!("📊 Exporting final telemetry...");
    println!("{}", telemetry.summary_report());
    match telemetry.export_stats_json() {
        Ok(path) => info!("   ✅ Stats exported to: {}", path.display()),
        Err(e) => warn!("   ⚠️ Failed to export stats: {}", e),
    }
    match telemetry.export_stats_csv() {
        Ok(path) => info!("   ✅ CSV appended to: {}", path.display()),
        Err(e) => warn!("   ⚠️ Failed to export CSV: {}", e),
    }

    info!("👋 AEGIS shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C; live monitor sockets are closed first so the server can drain
async fn shutdown_signal(engine: Arc<AegisEngine>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "❌ Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    engine.hub().close_all();
}

fn print_banner() {
    println!(
        r#"
    ╔══════════════════════════════════════════════════════════════╗
    ║                                                              ║
    ║        █████╗ ███████╗ ██████╗ ██╗███████╗                   ║
    ║       ██╔══██╗██╔════╝██╔════╝ ██║██╔════╝                   ║
    ║       ███████║█████╗  ██║  ███╗██║███████╗                   ║
    ║       ██╔══██║██╔══╝  ██║   ██║██║╚════██║                   ║
    ║       ██║  ██║███████╗╚██████╔╝██║███████║                   ║
    ║       ╚═╝  ╚═╝╚══════╝ ╚═════╝ ╚═╝╚══════╝                   ║
    ║                                                              ║
    ║          T R A N S A C T I O N   R I S K   G U A R D         ║
    ║                                                              ║
    ╚══════════════════════════════════════════════════════════════╝
    v{}
"#,
        APP_VERSION
    );
}
