//! Core Module - Risk pipeline components
//!
//! Scoring, threat level, forecasting, simulation, automation, fan-out and
//! the pipeline that wires them together.

pub mod activity;
pub mod automation;
pub mod fanout;
pub mod forecast;
pub mod market_intel;
pub mod pipeline;
pub mod risk_score;
pub mod simulator;
pub mod threat_level;
pub mod wallet_graph;

pub use automation::{AutomationDispatcher, DispatchOutcome, ManualPreset};
pub use fanout::{FanoutHub, OverflowPolicy, SubscriberHandle};
pub use forecast::{ForecastEngine, ForecastResult, Horizon};
pub use pipeline::{AegisEngine, TriggerRequest};
pub use risk_score::{RiskScoreBuilder, RiskScorer, WalletContext};
pub use simulator::{ScenarioKind, SimulationParams, SimulationResult};
pub use threat_level::{DefconLevel, ThreatLevelEngine, ThreatState};
pub use wallet_graph::{WalletGraph, WalletGraphView, WalletProfile};
