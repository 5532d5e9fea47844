//! API Request/Response Types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::simulator::SimulationParams;
use crate::models::AppError;
use crate::utils::constants::WALLET_GRAPH_DEFAULT_NODES;

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub latency_ms: f64,
    pub timestamp: i64,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, latency_ms: f64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            latency_ms,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

impl ApiResponse<()> {
    pub fn error(error: ApiError, latency_ms: f64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            latency_ms,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// API Error
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    /// INVALID_INPUT | UPSTREAM_UNAVAILABLE | OVERLOADED | INTERNAL_INVARIANT_VIOLATION | INTERNAL
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn rate_limited(retry_after: u64) -> Self {
        let err = AppError::new(
            crate::models::ErrorCode::ApiRateLimited,
            format!("Rate limit exceeded. Retry after {} seconds", retry_after),
        );
        let mut api = Self::from(&err);
        api.details = Some(format!("retry_after: {}", retry_after));
        api
    }
}

impl From<&AppError> for ApiError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code_str().to_string(),
            category: err.category().as_str().to_string(),
            message: err.message.clone(),
            details: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

// ============================================
// Requests
// ============================================

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    pub scenario_type: String,
    #[serde(default)]
    pub parameters: SimulationParams,
}

#[derive(Debug, Deserialize)]
pub struct PredictQuery {
    #[serde(default = "default_horizon")]
    pub horizon: String,
    /// Global forecast when absent
    #[serde(default, alias = "wallet")]
    pub wallet_id: Option<String>,
}

fn default_horizon() -> String {
    "short_term".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SignalsQuery {
    #[serde(default = "default_signal_limit")]
    pub limit: usize,
}

fn default_signal_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct WalletGraphQuery {
    #[serde(default = "default_graph_nodes")]
    pub max_nodes: usize,
}

fn default_graph_nodes() -> usize {
    WALLET_GRAPH_DEFAULT_NODES
}

// ============================================
// Responses
// ============================================

#[derive(Debug, Serialize)]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub subscribers: usize,
    pub inference: String,
    pub automation_endpoint: bool,
}

#[derive(Debug, Serialize)]
pub struct ScenarioInfo {
    pub scenario_type: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ScenarioList {
    pub scenarios: Vec<ScenarioInfo>,
    pub presets: HashMap<&'static str, &'static str>,
}
