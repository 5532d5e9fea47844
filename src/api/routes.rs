//! API Route Configuration

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    middleware,
    routing::{get, post},
    BoxError, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{self, AppState};
use super::middleware::{logging_middleware, rate_limit_middleware};
use super::ws;

/// In-flight HTTP requests before new ones queue
const MAX_CONCURRENT_REQUESTS: usize = 256;
const REQUEST_TIMEOUT_SECS: u64 = 30;

async fn handle_overload(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, format!("service overloaded: {}", err))
    }
}

/// Create the API router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Health & Status
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats))
        // Threat level & forecast
        .route("/defcon-status", get(handlers::defcon_status))
        .route("/predict", get(handlers::predict))
        // Simulation & automation
        .route("/simulate", post(handlers::simulate))
        .route("/scenarios", get(handlers::list_scenarios))
        .route("/trigger-automation", post(handlers::trigger_automation))
        // Market intelligence
        .route("/market-intel/overview", get(handlers::market_overview))
        .route("/tokens/:symbol", get(handlers::token_detail))
        .route("/signals", get(handlers::signals))
        .route("/network-emotion", get(handlers::network_emotion))
        // Wallet graph
        .route("/wallet-graph", get(handlers::wallet_graph))
        .route("/wallet/:wallet_id", get(handlers::wallet_detail))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_overload))
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .concurrency_limit(MAX_CONCURRENT_REQUESTS),
        );

    Router::new()
        .nest("/api", api)
        .route("/ws/monitor", get(ws::ws_handler))
        .with_state(state)
        // Middleware (order matters - bottom runs first)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn(rate_limit_middleware))
}
