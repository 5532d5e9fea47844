//! Scenario Simulator
//!
//! Deterministic synthetic attack walkthroughs. Each scenario produces a
//! fixed number of ordered steps whose risk never decreases and ends at a
//! scenario-specific peak. Live threat / forecast state is never touched.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{AppError, AppResult};
use crate::utils::constants::{impact_band, DEFAULT_TOKEN, SYNTHETIC_START_TICK};

/// Steps per simulation
pub const SIMULATION_STEPS: usize = 6;

/// Ramp of the peak score across steps
const RAMP: [f64; SIMULATION_STEPS] = [0.15, 0.3, 0.5, 0.7, 0.9, 1.0];

const MAX_WALLETS: usize = 50;

/// Closed set of scenario kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    WhaleDump,
    WashTrade,
    FlashAttack,
    WalletDrain,
    SpamAttack,
    LiquidityManipulation,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 6] = [
        ScenarioKind::WhaleDump,
        ScenarioKind::WashTrade,
        ScenarioKind::FlashAttack,
        ScenarioKind::WalletDrain,
        ScenarioKind::SpamAttack,
        ScenarioKind::LiquidityManipulation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::WhaleDump => "whale_dump",
            ScenarioKind::WashTrade => "wash_trade",
            ScenarioKind::FlashAttack => "flash_attack",
            ScenarioKind::WalletDrain => "wallet_drain",
            ScenarioKind::SpamAttack => "spam_attack",
            ScenarioKind::LiquidityManipulation => "liquidity_manipulation",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioKind::WhaleDump => "Large holder dumps a position through split sell orders",
            ScenarioKind::WashTrade => "Colluding wallets trade back and forth to fake volume",
            ScenarioKind::FlashAttack => "Same-tick borrow, manipulate and repay sequence",
            ScenarioKind::WalletDrain => "Compromised wallet is emptied into fresh addresses",
            ScenarioKind::SpamAttack => "Flood of dust transactions congests the network",
            ScenarioKind::LiquidityManipulation => "Liquidity is pulled and re-added to move price",
        }
    }

    fn default_amount(&self) -> f64 {
        match self {
            ScenarioKind::WhaleDump => 500_000.0,
            ScenarioKind::WashTrade => 50_000.0,
            ScenarioKind::FlashAttack => 250_000.0,
            ScenarioKind::WalletDrain => 100_000.0,
            ScenarioKind::SpamAttack => 0.05,
            ScenarioKind::LiquidityManipulation => 300_000.0,
        }
    }

    fn default_wallets(&self) -> usize {
        match self {
            ScenarioKind::WhaleDump => 3,
            ScenarioKind::WashTrade => 4,
            ScenarioKind::FlashAttack => 2,
            ScenarioKind::WalletDrain => 5,
            ScenarioKind::SpamAttack => 8,
            ScenarioKind::LiquidityManipulation => 3,
        }
    }

    /// Ticks between consecutive steps
    fn tick_spacing(&self) -> u64 {
        match self {
            ScenarioKind::FlashAttack => 0,
            ScenarioKind::SpamAttack => 1,
            _ => 5,
        }
    }

    /// Scenario-specific peak risk for the given parameters
    fn peak(&self, amount: f64, wallets: usize) -> u8 {
        let scaled = |floor: f64, reference: f64| {
            floor + 10.0 * (amount / reference).log10().max(0.0)
        };
        let raw = match self {
            ScenarioKind::WhaleDump => scaled(85.0, 100_000.0),
            ScenarioKind::WashTrade => 70.0 + (wallets as f64 * 2.0).min(20.0),
            ScenarioKind::FlashAttack => scaled(80.0, 50_000.0),
            ScenarioKind::WalletDrain => scaled(75.0, 10_000.0),
            ScenarioKind::SpamAttack => 55.0 + (wallets as f64 * 3.0).min(30.0),
            ScenarioKind::LiquidityManipulation => scaled(80.0, 250_000.0),
        };
        raw.clamp(0.0, 100.0).round() as u8
    }

    fn step_templates(&self) -> [&'static str; SIMULATION_STEPS] {
        match self {
            ScenarioKind::WhaleDump => [
                "Whale wallet accumulates position quietly",
                "Position split across helper wallets",
                "First sell orders hit the order book",
                "Sell wall builds, price slips",
                "Cascade of stop losses triggered",
                "Full position dumped, liquidity exhausted",
            ],
            ScenarioKind::WashTrade => [
                "Colluding wallets funded from a common source",
                "Circular transfers begin between the ring",
                "Volume spikes without net position change",
                "Fake volume attracts outside traders",
                "Ring unwinds into organic buy pressure",
                "Inflated volume collapses, victims exposed",
            ],
            ScenarioKind::FlashAttack => [
                "Attacker contract deployed",
                "Large borrow opened inside one tick",
                "Pool price skewed by the borrowed funds",
                "Arbitrage drains the skewed pool",
                "Borrow repaid within the same tick",
                "Profit extracted to fresh wallet",
            ],
            ScenarioKind::WalletDrain => [
                "Credentials for target wallet compromised",
                "Small trial transfer succeeds",
                "Assets moved to first hop wallets",
                "Funds fan out across fresh addresses",
                "Remaining balance swept",
                "Target wallet fully drained",
            ],
            ScenarioKind::SpamAttack => [
                "Bot wallets funded with dust",
                "Dust transactions start flooding",
                "Tick capacity fills with spam",
                "Legitimate transactions delayed",
                "Spam rate peaks, fees spike",
                "Network throughput degraded",
            ],
            ScenarioKind::LiquidityManipulation => [
                "Manipulator provides liquidity to thin pool",
                "Buy pressure pumps the price",
                "Liquidity pulled at the top",
                "Price gaps down on thin book",
                "Liquidity re-added at a lower price",
                "Holders left with a repriced asset",
            ],
        }
    }

    fn recommendation(&self) -> &'static str {
        match self {
            ScenarioKind::WhaleDump => "Set per-wallet sell velocity limits and alert on whale exits",
            ScenarioKind::WashTrade => "Flag circular transfers and discount self-referential volume",
            ScenarioKind::FlashAttack => "Use time-weighted prices and reject same-tick round trips",
            ScenarioKind::WalletDrain => "Freeze outbound transfers on anomalous fan-out and rotate keys",
            ScenarioKind::SpamAttack => "Rate-limit low-value senders and raise the dust floor",
            ScenarioKind::LiquidityManipulation => "Lock liquidity for a minimum period and monitor withdrawals",
        }
    }
}

impl FromStr for ScenarioKind {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        ScenarioKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| AppError::invalid_scenario(s))
    }
}

/// Optional knobs; every field has a scenario default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationParams {
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub wallet_count: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub start_tick: Option<u64>,
}

impl SimulationParams {
    pub fn with_amount(amount: f64) -> Self {
        Self {
            amount: Some(amount),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStep {
    pub step: usize,
    pub tick: u64,
    pub description: String,
    pub affected_wallets: Vec<String>,
    pub risk_score: u8,
}

/// Where the recommendation text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Template,
    Inference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub simulation_id: Uuid,
    pub scenario: ScenarioKind,
    pub token: String,
    pub amount: f64,
    pub steps: Vec<SimulationStep>,
    pub peak_risk: u8,
    pub estimated_impact: String,
    pub estimated_loss: f64,
    pub success_probability: u8,
    pub recommendation: String,
    pub recommendation_source: RecommendationSource,
}

/// Loss fraction of the simulated amount by impact band
fn loss_fraction(impact: &str) -> f64 {
    match impact {
        "Low" => 0.01,
        "Medium" => 0.05,
        "High" => 0.2,
        _ => 0.5,
    }
}

/// Deterministic hex wallet id
fn synthetic_wallet(rng: &mut StdRng) -> String {
    let bytes: [u8; 20] = rng.gen();
    format!("0x{}", hex::encode(bytes))
}

/// Validate inputs and run a scenario
pub fn simulate(scenario_type: &str, params: &SimulationParams) -> AppResult<SimulationResult> {
    let kind: ScenarioKind = scenario_type.parse()?;
    simulate_kind(kind, params)
}

pub fn simulate_kind(kind: ScenarioKind, params: &SimulationParams) -> AppResult<SimulationResult> {
    let amount = params.amount.unwrap_or_else(|| kind.default_amount());
    if !amount.is_finite() || amount < 0.0 {
        return Err(AppError::bad_request(format!(
            "parameters.amount must be a non-negative number, got {}",
            amount
        )));
    }
    let wallet_count = params
        .wallet_count
        .unwrap_or_else(|| kind.default_wallets())
        .clamp(1, MAX_WALLETS);
    let token = params
        .token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TOKEN.to_string());
    let start_tick = params.start_tick.unwrap_or(SYNTHETIC_START_TICK);

    // Same inputs, same wallets
    let seed = params
        .seed
        .unwrap_or_else(|| ((kind as u64) << 56) ^ amount.to_bits() ^ wallet_count as u64);
    let mut rng = StdRng::seed_from_u64(seed);
    let wallets: Vec<String> = (0..wallet_count).map(|_| synthetic_wallet(&mut rng)).collect();

    let peak = kind.peak(amount, wallet_count);
    let templates = kind.step_templates();
    let mut running = 0u8;
    let steps = RAMP
        .iter()
        .enumerate()
        .map(|(i, fraction)| {
            let raw = (f64::from(peak) * fraction).round() as u8;
            running = running.max(raw).min(peak);
            let affected = ((i + 1) * wallet_count).div_ceil(SIMULATION_STEPS).max(1);
            SimulationStep {
                step: i + 1,
                tick: start_tick.saturating_add((i as u64).saturating_mul(kind.tick_spacing())),
                description: templates[i].to_string(),
                affected_wallets: wallets[..affected].to_vec(),
                risk_score: running,
            }
        })
        .collect::<Vec<_>>();

    let peak_risk = steps.last().map(|s| s.risk_score).unwrap_or(0);
    let estimated_impact = impact_band(peak_risk).to_string();
    let estimated_loss = (amount * loss_fraction(&estimated_impact) * 100.0).round() / 100.0;

    Ok(SimulationResult {
        simulation_id: Uuid::new_v4(),
        scenario: kind,
        recommendation: template_recommendation(kind, &estimated_impact),
        recommendation_source: RecommendationSource::Template,
        token,
        amount,
        steps,
        peak_risk,
        estimated_impact,
        estimated_loss,
        success_probability: (f64::from(peak_risk) * 0.95).round() as u8,
    })
}

pub fn template_recommendation(kind: ScenarioKind, impact: &str) -> String {
    format!("{} impact {}: {}.", impact, kind.as_str(), kind.recommendation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorCategory;

    #[test]
    fn test_whale_dump_million() {
        let result = simulate("whale_dump", &SimulationParams::with_amount(1_000_000.0)).unwrap();
        assert_eq!(result.steps.len(), SIMULATION_STEPS);
        assert!(result.steps.windows(2).all(|w| w[0].risk_score <= w[1].risk_score));
        assert!(result.peak_risk >= 90);
        assert_eq!(result.estimated_impact, "Critical");
    }

    #[test]
    fn test_unknown_scenario() {
        let err = simulate("unknown_scenario", &SimulationParams::default()).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
        assert_eq!(err.code_str(), "SIM_INVALID_SCENARIO");
    }

    #[test]
    fn test_ticks_saturate_near_max() {
        let params = SimulationParams {
            start_tick: Some(u64::MAX - 1),
            ..SimulationParams::with_amount(1_000_000.0)
        };
        let result = simulate("whale_dump", &params).unwrap();
        assert_eq!(result.steps[0].tick, u64::MAX - 1);
        assert!(result.steps[1..].iter().all(|s| s.tick == u64::MAX));
        assert!(result.steps.windows(2).all(|w| w[0].tick <= w[1].tick));
    }

    #[test]
    fn test_every_scenario_is_monotonic() {
        for kind in ScenarioKind::ALL {
            let result = simulate_kind(kind, &SimulationParams::default()).unwrap();
            assert!(
                result.steps.windows(2).all(|w| w[0].risk_score <= w[1].risk_score),
                "{} not monotonic",
                kind.as_str()
            );
            assert_eq!(result.peak_risk, result.steps[SIMULATION_STEPS - 1].risk_score);
            assert!(result.steps.iter().all(|s| !s.affected_wallets.is_empty()));
        }
    }

    #[test]
    fn test_deterministic_wallets() {
        let params = SimulationParams {
            seed: Some(7),
            ..SimulationParams::default()
        };
        let a = simulate("wallet_drain", &params).unwrap();
        let b = simulate("wallet_drain", &params).unwrap();
        assert_eq!(a.steps, b.steps);
        assert_ne!(a.simulation_id, b.simulation_id);
    }

    #[test]
    fn test_rejects_negative_amount() {
        let err = simulate("flash_attack", &SimulationParams::with_amount(-1.0)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
    }

    #[test]
    fn test_case_insensitive_kind() {
        assert_eq!(
            " Whale_Dump ".parse::<ScenarioKind>().unwrap(),
            ScenarioKind::WhaleDump
        );
    }
}
