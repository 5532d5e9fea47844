//! Risk Scoring Module
//! Turns one transaction plus its rolling wallet context into a 0-100 verdict
//!
//! Scoring is pure and local: no network call is needed to produce a verdict.
//! The HIGH boundary is the live DEFCON alert threshold carried in the context.

use crate::models::{
    AttackType, ResponseProtocol, RiskFactor, RiskLevel, RiskVerdict, ScorerConfig, Severity,
    Transaction, TxKind,
};
use crate::utils::constants::{DUST_MAX_AMOUNT, DUST_MIN_AMOUNT};

/// Rolling context for the source wallet at scoring time
#[derive(Debug, Clone, PartialEq)]
pub struct WalletContext {
    /// Smoothed typical amount for this wallet+token
    pub baseline_amount: f64,
    pub has_history: bool,
    /// Same-source transactions inside the activity window, excluding this one
    pub recent_tx_count: usize,
    /// Distinct destinations inside the window, including this one
    pub distinct_counterparties: usize,
    /// Current dynamic HIGH boundary
    pub alert_threshold: f64,
}

impl WalletContext {
    /// Context for a wallet never seen before
    pub fn fresh(config: &ScorerConfig, alert_threshold: f64) -> Self {
        Self {
            baseline_amount: config.baseline_amount,
            has_history: false,
            recent_tx_count: 0,
            distinct_counterparties: 1,
            alert_threshold,
        }
    }
}

/// Builder that accumulates weighted factors for one transaction
pub struct RiskScoreBuilder<'a> {
    config: &'a ScorerConfig,
    tx: &'a Transaction,
    ctx: &'a WalletContext,
    factors: Vec<RiskFactor>,
    total: u32,
    whale: bool,
    wash: bool,
    dust: bool,
    bot: bool,
    unusual_call: bool,
    oversized: bool,
}

impl<'a> RiskScoreBuilder<'a> {
    pub fn new(config: &'a ScorerConfig, tx: &'a Transaction, ctx: &'a WalletContext) -> Self {
        Self {
            config,
            tx,
            ctx,
            factors: Vec::new(),
            total: 0,
            whale: false,
            wash: false,
            dust: false,
            bot: false,
            unusual_call: false,
            oversized: false,
        }
    }

    fn push(&mut self, name: &str, points: u8, severity: Severity, detail: String) {
        self.total += u32::from(points);
        self.factors.push(RiskFactor {
            name: name.to_string(),
            severity,
            weight: points,
            detail: Some(detail),
        });
    }

    /// Amount relative to the wallet's rolling baseline
    pub fn with_amount_deviation(mut self) -> Self {
        let baseline = self.ctx.baseline_amount.max(f64::EPSILON);
        let ratio = self.tx.amount / baseline;
        if ratio.is_finite() && ratio > 1.5 {
            let points = ((ratio - 1.0) * 8.0).clamp(0.0, 35.0).round() as u8;
            let severity = match points {
                25..=u8::MAX => Severity::High,
                12..=24 => Severity::Medium,
                _ => Severity::Low,
            };
            self.oversized = true;
            self.push(
                "Amount deviation",
                points,
                severity,
                format!(
                    "{:.2} {} is {:.1}x the wallet baseline ({:.2})",
                    self.tx.amount, self.tx.token, ratio, baseline
                ),
            );
        }
        self
    }

    /// Crossing the whale threshold
    pub fn with_whale_threshold(mut self) -> Self {
        let threshold = self.config.whale_threshold;
        if self.tx.amount >= threshold {
            let multiple = self.tx.amount / threshold;
            let points = (30.0 * multiple).min(45.0).round() as u8;
            let severity = if multiple >= 10.0 {
                Severity::Critical
            } else {
                Severity::High
            };
            self.whale = true;
            self.push(
                "Whale transfer",
                points,
                severity,
                format!(
                    "{:.0} {} crosses the whale threshold of {:.0}",
                    self.tx.amount, self.tx.token, threshold
                ),
            );
        }
        self
    }

    /// Burst of transactions from the same source inside the activity window
    pub fn with_velocity(mut self) -> Self {
        let threshold = self.config.velocity_threshold.max(1);
        let count = self.ctx.recent_tx_count + 1;
        let window_secs = self.config.activity_window.as_secs();
        if count >= threshold {
            self.bot = true;
            self.push(
                "High velocity",
                25,
                Severity::High,
                format!("{} transactions from source in {}s", count, window_secs),
            );
        } else if threshold > 1 && count >= threshold.div_ceil(2) {
            self.push(
                "Elevated velocity",
                10,
                Severity::Medium,
                format!("{} transactions from source in {}s", count, window_secs),
            );
        }
        self
    }

    /// Source and destination are the same wallet
    pub fn with_wash_trading(mut self) -> Self {
        if self.tx.is_self_transfer() {
            self.wash = true;
            self.push(
                "Self transfer",
                40,
                Severity::High,
                "Source and destination are identical (wash trading pattern)".to_string(),
            );
        }
        self
    }

    /// Micro-amount dusting band
    pub fn with_dusting(mut self) -> Self {
        let amount = self.tx.amount;
        if (DUST_MIN_AMOUNT..=DUST_MAX_AMOUNT).contains(&amount) {
            self.dust = true;
            self.push(
                "Dusting",
                20,
                Severity::Low,
                format!("Micro amount {} {} used to tag wallets", amount, self.tx.token),
            );
        }
        self
    }

    /// Anything that is not a plain transfer
    pub fn with_call_kind(mut self) -> Self {
        if self.tx.kind != TxKind::Transfer {
            self.unusual_call = true;
            self.push(
                "Non-transfer operation",
                15,
                Severity::Medium,
                format!("Transaction kind is {}", self.tx.kind.as_str()),
            );
        }
        self
    }

    /// Fan-out to many distinct counterparties (anomaly / cluster signal)
    pub fn with_cluster(mut self) -> Self {
        let distinct = self.ctx.distinct_counterparties;
        if distinct >= self.config.cluster_threshold.max(2) {
            self.bot = true;
            self.push(
                "Counterparty cluster",
                15,
                Severity::Medium,
                format!("{} distinct destinations inside the activity window", distinct),
            );
        }
        self
    }

    /// Every factor the scorer knows about
    pub fn with_all_factors(self) -> Self {
        self.with_amount_deviation()
            .with_whale_threshold()
            .with_velocity()
            .with_wash_trading()
            .with_dusting()
            .with_call_kind()
            .with_cluster()
    }

    fn attack_type(&self, score: u8) -> AttackType {
        if self.wash {
            AttackType::WashTrading
        } else if self.whale {
            if score >= 70 || self.bot {
                AttackType::WhaleDump
            } else {
                AttackType::LargeTransfer
            }
        } else if self.bot {
            AttackType::BotActivity
        } else if self.dust {
            AttackType::DustNoise
        } else if self.unusual_call {
            AttackType::UnusualCall
        } else if self.oversized {
            AttackType::LargeTransfer
        } else {
            AttackType::Normal
        }
    }

    /// Build final verdict, classified against the context's alert threshold
    pub fn build(self) -> RiskVerdict {
        let score = self.total.min(100) as u8;
        let level = RiskLevel::classify(score, self.ctx.alert_threshold);
        let attack_type = self.attack_type(score);
        let explanation = template_explanation(score, level, &self.factors);

        RiskVerdict {
            score,
            level,
            explanation,
            factors: self.factors,
            attack_type,
            action: ResponseProtocol::for_level(level),
            alert_threshold: self.ctx.alert_threshold,
        }
    }
}

/// Rule-based explanation used whenever inference is skipped or fails
pub fn template_explanation(score: u8, level: RiskLevel, factors: &[RiskFactor]) -> String {
    let mut out = format!("Risk Level: {} (Score: {}/100)", level.as_str(), score);
    if factors.is_empty() {
        out.push_str("\nTransaction appears normal. No anomalies detected.");
        return out;
    }
    for (i, factor) in factors.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, factor.name));
        if let Some(detail) = &factor.detail {
            out.push_str(": ");
            out.push_str(detail);
        }
    }
    out
}

/// Stateless scorer
#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    config: ScorerConfig,
}

impl RiskScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Pure given `ctx`
    pub fn score(&self, tx: &Transaction, ctx: &WalletContext) -> RiskVerdict {
        RiskScoreBuilder::new(&self.config, tx, ctx)
            .with_all_factors()
            .build()
    }
}
