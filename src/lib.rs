//! AegisGuard Library
//!
//! Real-time blockchain transaction risk pipeline:
//! - Rule-based risk scoring classified against an adaptive alert threshold
//! - DEFCON threat level over a trailing one-minute attack window
//! - EMA risk forecasts per wallet and network-wide
//! - Deterministic attack scenario simulation
//! - Cool-down limited workflow automation (webhooks)
//! - Non-blocking fan-out of enriched records to WebSocket subscribers

pub mod api;
pub mod core;
pub mod models;
pub mod providers;
pub mod utils;

pub use crate::core::{
    AegisEngine, DefconLevel, FanoutHub, ForecastResult, OverflowPolicy, RiskScorer,
    ScenarioKind, SimulationParams, SimulationResult, ThreatState, TriggerRequest,
};
pub use models::{
    AegisConfig, AppError, AppResult, EnrichedRecord, ErrorCategory, ErrorCode, RiskLevel,
    RiskVerdict, StreamMessage, Transaction,
};
pub use utils::telemetry::{TelemetryCollector, TelemetryStats};
