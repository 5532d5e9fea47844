//! API Request Handlers

use axum::{
    extract::{rejection::JsonRejection, Json, Path, Query, State},
    http::StatusCode,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use super::types::*;
use crate::core::automation::{DispatchOutcome, ManualPreset};
use crate::core::forecast::ForecastResult;
use crate::core::market_intel::{MarketOverview, TokenSignal, TokenStats};
use crate::core::pipeline::{AegisEngine, EngineStats, TriggerRequest};
use crate::core::simulator::{ScenarioKind, SimulationResult};
use crate::core::threat_level::ThreatState;
use crate::core::wallet_graph::{WalletGraphView, WalletProfile};
use crate::models::{AppError, AppResult, ErrorCategory, SentimentAnalysis};
use crate::utils::constants::{APP_VERSION, MAX_TOKEN_SIGNALS, WALLET_GRAPH_MAX_NODES};

/// Shared application state
pub struct AppState {
    pub engine: Arc<AegisEngine>,
    pub start_time: Instant,
    pub inference: &'static str,
    pub automation_endpoint: bool,
}

impl AppState {
    pub fn new(engine: Arc<AegisEngine>, inference: &'static str, automation_endpoint: bool) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
            inference,
            automation_endpoint,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

type Rejection = (StatusCode, Json<ApiResponse<()>>);
pub type HandlerResult<T> = Result<Json<ApiResponse<T>>, Rejection>;

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn reject(err: AppError, start: Instant) -> Rejection {
    match err.category() {
        ErrorCategory::Internal | ErrorCategory::InternalInvariantViolation => {
            error!(code = err.code_str(), error = %err, "❌ Request failed")
        }
        ErrorCategory::UpstreamUnavailable | ErrorCategory::Overloaded => {
            warn!(code = err.code_str(), error = %err, "⚠️ Request failed")
        }
        ErrorCategory::InvalidInput => debug!(code = err.code_str(), error = %err, "Rejected request"),
    }
    let status =
        StatusCode::from_u16(err.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ApiResponse::error(ApiError::from(&err), elapsed_ms(start))),
    )
}

fn respond<T: serde::Serialize>(result: AppResult<T>, start: Instant) -> HandlerResult<T> {
    match result {
        Ok(data) => Ok(Json(ApiResponse::success(data, elapsed_ms(start)))),
        Err(err) => Err(reject(err, start)),
    }
}

/// Malformed JSON bodies get the regular error envelope
fn body<T>(payload: Result<Json<T>, JsonRejection>, start: Instant) -> Result<T, Rejection> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| reject(AppError::bad_request(e.body_text()), start))
}

// ============================================
// Health & Stats
// ============================================

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthData>> {
    let start = Instant::now();

    let data = HealthData {
        status: "healthy".to_string(),
        version: APP_VERSION.to_string(),
        uptime_seconds: state.uptime_seconds(),
        subscribers: state.engine.hub().subscriber_count(),
        inference: state.inference.to_string(),
        automation_endpoint: state.automation_endpoint,
    };

    Json(ApiResponse::success(data, elapsed_ms(start)))
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<EngineStats>> {
    let start = Instant::now();
    Json(ApiResponse::success(state.engine.stats(), elapsed_ms(start)))
}

// ============================================
// Threat level & forecast
// ============================================

pub async fn defcon_status(State(state): State<Arc<AppState>>) -> HandlerResult<ThreatState> {
    let start = Instant::now();
    respond(state.engine.threat_status(), start)
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PredictQuery>,
) -> HandlerResult<ForecastResult> {
    let start = Instant::now();
    respond(
        state.engine.forecast(&query.horizon, query.wallet_id.as_deref()),
        start,
    )
}

// ============================================
// Simulation
// ============================================

pub async fn simulate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SimulateRequest>, JsonRejection>,
) -> HandlerResult<SimulationResult> {
    let start = Instant::now();
    let req = body(payload, start)?;
    respond(
        state.engine.simulate(&req.scenario_type, &req.parameters).await,
        start,
    )
}

pub async fn list_scenarios() -> Json<ApiResponse<ScenarioList>> {
    let start = Instant::now();
    let scenarios = ScenarioKind::ALL
        .iter()
        .map(|kind| ScenarioInfo {
            scenario_type: kind.as_str(),
            description: kind.description(),
        })
        .collect();
    let presets: HashMap<&'static str, &'static str> = [
        ("WHALE", ManualPreset::Whale),
        ("RUG", ManualPreset::Rug),
        ("FLASH", ManualPreset::Flash),
    ]
    .into_iter()
    .map(|(name, preset)| (name, preset.title()))
    .collect();

    Json(ApiResponse::success(
        ScenarioList { scenarios, presets },
        elapsed_ms(start),
    ))
}

// ============================================
// Automation
// ============================================

pub async fn trigger_automation(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TriggerRequest>, JsonRejection>,
) -> HandlerResult<DispatchOutcome> {
    let start = Instant::now();
    let req = body(payload, start)?;
    respond(state.engine.trigger_automation(req).await, start)
}

// ============================================
// Market intelligence
// ============================================

pub async fn market_overview(State(state): State<Arc<AppState>>) -> Json<ApiResponse<MarketOverview>> {
    let start = Instant::now();
    Json(ApiResponse::success(
        state.engine.market().overview(),
        elapsed_ms(start),
    ))
}

pub async fn token_detail(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> HandlerResult<TokenStats> {
    let start = Instant::now();
    let stats = state
        .engine
        .market()
        .token(&symbol)
        .ok_or_else(|| AppError::not_found(format!("Token {} is not tracked", symbol)));
    respond(stats, start)
}

pub async fn signals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignalsQuery>,
) -> Json<ApiResponse<Vec<TokenSignal>>> {
    let start = Instant::now();
    let limit = query.limit.clamp(1, MAX_TOKEN_SIGNALS);
    Json(ApiResponse::success(
        state.engine.market().recent_signals(limit),
        elapsed_ms(start),
    ))
}

pub async fn network_emotion(State(state): State<Arc<AppState>>) -> HandlerResult<SentimentAnalysis> {
    let start = Instant::now();
    respond(state.engine.network_emotion(), start)
}

// ============================================
// Wallet graph
// ============================================

pub async fn wallet_graph(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WalletGraphQuery>,
) -> Json<ApiResponse<WalletGraphView>> {
    let start = Instant::now();
    let max_nodes = query.max_nodes.clamp(1, WALLET_GRAPH_MAX_NODES);
    Json(ApiResponse::success(
        state.engine.wallet_graph(max_nodes),
        elapsed_ms(start),
    ))
}

pub async fn wallet_detail(
    State(state): State<Arc<AppState>>,
    Path(wallet_id): Path<String>,
) -> HandlerResult<WalletProfile> {
    let start = Instant::now();
    respond(state.engine.wallet_profile(&wallet_id), start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forecast::ForecastStatus;
    use crate::models::{AegisConfig, Transaction};
    use crate::providers::{NoopInference, NoopWebhook};
    use crate::utils::constants::WALLET_GRAPH_DEFAULT_NODES;
    use crate::utils::telemetry::TelemetryCollector;
    use axum::http::Uri;

    fn state() -> Arc<AppState> {
        let dir = std::env::temp_dir().join(format!("aegis_handlers_{}", uuid::Uuid::new_v4()));
        let engine = AegisEngine::new(
            &AegisConfig::default(),
            Arc::new(NoopInference),
            Arc::new(NoopWebhook::default()),
            Arc::new(TelemetryCollector::with_config(dir, 100)),
        );
        Arc::new(AppState::new(Arc::new(engine), "noop", false))
    }

    fn predict_query(uri: &str) -> PredictQuery {
        let uri: Uri = uri.parse().unwrap();
        Query::<PredictQuery>::try_from_uri(&uri).unwrap().0
    }

    #[test]
    fn test_predict_query_reads_wallet_id() {
        let query = predict_query("/api/predict?horizon=medium_term&wallet_id=W1");
        assert_eq!(query.horizon, "medium_term");
        assert_eq!(query.wallet_id.as_deref(), Some("W1"));

        let query = predict_query("/api/predict");
        assert_eq!(query.horizon, "short_term");
        assert!(query.wallet_id.is_none());
    }

    #[tokio::test]
    async fn test_predict_returns_wallet_forecast() {
        let state = state();
        state
            .engine
            .process(Transaction::transfer("W1", "W2", 1_000_000.0))
            .await
            .unwrap();

        let query = predict_query("/api/predict?horizon=short_term&wallet_id=W1");
        let Json(body) = predict(State(state.clone()), Query(query)).await.unwrap();
        let forecast = body.data.unwrap();
        assert_eq!(forecast.key, "W1");
        assert_eq!(forecast.status, ForecastStatus::Ok);

        let query = predict_query("/api/predict?wallet_id=NOBODY");
        let Json(body) = predict(State(state.clone()), Query(query)).await.unwrap();
        assert_eq!(body.data.unwrap().status, ForecastStatus::InsufficientData);
    }

    #[tokio::test]
    async fn test_wallet_graph_clamps_node_count() {
        let state = state();
        for i in 0..3 {
            state
                .engine
                .process(Transaction::transfer(format!("SRC{}", i), "SINK", 1_000.0 * (i + 1) as f64))
                .await
                .unwrap();
        }

        let uri: Uri = "/api/wallet-graph?max_nodes=0".parse().unwrap();
        let query = Query::<WalletGraphQuery>::try_from_uri(&uri).unwrap();
        let Json(body) = wallet_graph(State(state.clone()), query).await;
        let view = body.data.unwrap();
        assert_eq!(view.nodes.len(), 1);
        assert_eq!(view.nodes[0].id, "SRC2");
        assert_eq!(view.tracked_wallets, 4);

        let uri: Uri = "/api/wallet-graph".parse().unwrap();
        let query = Query::<WalletGraphQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(query.max_nodes, WALLET_GRAPH_DEFAULT_NODES);
        let Json(body) = wallet_graph(State(state), query).await;
        let view = body.data.unwrap();
        assert_eq!(view.nodes.len(), 4);
        assert_eq!(view.links.len(), 3);
    }

    #[tokio::test]
    async fn test_wallet_detail_known_and_unknown() {
        let state = state();
        state
            .engine
            .process(Transaction::transfer("ALICE", "BOB", 500.0))
            .await
            .unwrap();

        let Json(body) = wallet_detail(State(state.clone()), Path("ALICE".to_string()))
            .await
            .unwrap();
        let profile = body.data.unwrap();
        assert_eq!(profile.wallet_id, "ALICE");
        assert_eq!(profile.transaction_count, 1);
        assert_eq!(profile.counterparties, vec!["BOB"]);

        let (status, Json(body)) = wallet_detail(State(state), Path("MALLORY".to_string()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error.unwrap().code, "API_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unknown_horizon_is_bad_request() {
        let query = predict_query("/api/predict?horizon=next_decade");
        let (status, Json(body)) = predict(State(state()), Query(query)).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error.unwrap().code, "FCST_INVALID_HORIZON");
    }
}
