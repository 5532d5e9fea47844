//! Type definitions for AegisGuard
//! Canonical transaction events, verdicts and the real-time wire envelopes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::forecast::ForecastResult;
use crate::core::threat_level::ThreatState;
use crate::utils::constants::{CRITICAL_SCORE_FLOOR, DEFAULT_TOKEN, MEDIUM_SCORE_FLOOR};

// ============================================
// TRANSACTIONS
// ============================================

/// Kind of on-chain operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    #[default]
    Transfer,
    ContractCall,
    ContractDeploy,
    #[serde(other)]
    Other,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Transfer => "transfer",
            TxKind::ContractCall => "contract_call",
            TxKind::ContractDeploy => "contract_deploy",
            TxKind::Other => "other",
        }
    }
}

fn default_token() -> String {
    DEFAULT_TOKEN.to_string()
}

/// Canonical transaction event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub source_wallet: String,
    pub dest_wallet: String,
    pub amount: f64,
    #[serde(default = "default_token")]
    pub token: String,
    #[serde(default)]
    pub tick: u64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub kind: TxKind,
}

impl Transaction {
    /// Plain native-token transfer stamped now
    pub fn transfer(source: impl Into<String>, dest: impl Into<String>, amount: f64) -> Self {
        Self {
            source_wallet: source.into(),
            dest_wallet: dest.into(),
            amount,
            token: default_token(),
            tick: 0,
            timestamp: Utc::now(),
            kind: TxKind::Transfer,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_kind(mut self, kind: TxKind) -> Self {
        self.kind = kind;
        self
    }

    #[inline]
    pub fn is_self_transfer(&self) -> bool {
        self.source_wallet == self.dest_wallet
    }
}

// ============================================
// VERDICTS
// ============================================

/// Risk level classification for transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify a score against the current dynamic alert threshold.
    /// CRITICAL and MEDIUM floors are fixed; HIGH moves with the threat level.
    pub fn classify(score: u8, alert_threshold: f64) -> Self {
        if score >= CRITICAL_SCORE_FLOOR {
            RiskLevel::Critical
        } else if f64::from(score) >= alert_threshold {
            RiskLevel::High
        } else if score >= MEDIUM_SCORE_FLOOR {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// HIGH and CRITICAL verdicts count as attacks for the threat level
    #[inline]
    pub fn is_attack(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Low => "🟢",
            RiskLevel::Medium => "🟠",
            RiskLevel::High => "🔴",
            RiskLevel::Critical => "💀",
        }
    }
}

/// Severity of a single contributing factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One contributing factor of a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub severity: Severity,
    /// Points this factor added to the base score
    pub weight: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Attack pattern a verdict was attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttackType {
    Normal,
    LargeTransfer,
    WhaleDump,
    WashTrading,
    DustNoise,
    BotActivity,
    UnusualCall,
}

impl AttackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::Normal => "NORMAL",
            AttackType::LargeTransfer => "LARGE_TRANSFER",
            AttackType::WhaleDump => "WHALE_DUMP",
            AttackType::WashTrading => "WASH_TRADING",
            AttackType::DustNoise => "DUST_NOISE",
            AttackType::BotActivity => "BOT_ACTIVITY",
            AttackType::UnusualCall => "UNUSUAL_CALL",
        }
    }
}

/// Response protocol attached to a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseProtocol {
    LogOnly,
    NotifyCommunity,
    NotifyAdminUrgent,
    TriggerCircuitBreaker,
}

impl ResponseProtocol {
    pub fn for_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low => ResponseProtocol::LogOnly,
            RiskLevel::Medium => ResponseProtocol::NotifyCommunity,
            RiskLevel::High => ResponseProtocol::NotifyAdminUrgent,
            RiskLevel::Critical => ResponseProtocol::TriggerCircuitBreaker,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseProtocol::LogOnly => "LOG_ONLY",
            ResponseProtocol::NotifyCommunity => "NOTIFY_COMMUNITY",
            ResponseProtocol::NotifyAdminUrgent => "NOTIFY_ADMIN_URGENT",
            ResponseProtocol::TriggerCircuitBreaker => "TRIGGER_CIRCUIT_BREAKER",
        }
    }
}

/// Scored, classified output for one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub score: u8,
    pub level: RiskLevel,
    pub explanation: String,
    pub factors: Vec<RiskFactor>,
    pub attack_type: AttackType,
    pub action: ResponseProtocol,
    /// Threshold the level was classified against
    pub alert_threshold: f64,
}

// ============================================
// ENRICHED RECORD
// ============================================

/// Network mood derived from the global forecast and threat level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mood {
    Calm,
    Nervous,
    Fearful,
    Panic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    pub mood: Mood,
    /// Fear index in 0..=100
    pub score: u8,
    pub description: String,
}

/// What, if anything, the pipeline did automatically for a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDefense {
    pub protocol: ResponseProtocol,
    /// Trigger condition that was evaluated
    pub condition: String,
    /// queued | suppressed | queue_full | disabled
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_id: Option<uuid::Uuid>,
}

/// Record broadcast to subscribers for every processed transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub transaction: Transaction,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub threat_type: AttackType,
    pub action: ResponseProtocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub risk_factors: Vec<RiskFactor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<ForecastResult>,
    pub defcon_status: ThreatState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_analysis: Option<SentimentAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_defense: Option<ActiveDefense>,
}

/// Server-to-client envelope on the real-time channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Connection { message: String },
    TransactionAnalysis { data: Box<EnrichedRecord> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_moves_with_threshold() {
        // Same raw score classifies differently as the threshold moves
        assert_eq!(RiskLevel::classify(72, 80.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::classify(72, 70.0), RiskLevel::High);
        assert_eq!(RiskLevel::classify(90, 80.0), RiskLevel::Critical);
        assert_eq!(RiskLevel::classify(39, 50.0), RiskLevel::Low);
        assert_eq!(RiskLevel::classify(40, 50.0), RiskLevel::Medium);
    }

    #[test]
    fn test_transaction_defaults() {
        let tx: Transaction = serde_json::from_str(
            r#"{"source_wallet":"A","dest_wallet":"B","amount":12.5}"#,
        )
        .unwrap();
        assert_eq!(tx.token, DEFAULT_TOKEN);
        assert_eq!(tx.kind, TxKind::Transfer);

        let tx: Transaction = serde_json::from_str(
            r#"{"source_wallet":"A","dest_wallet":"B","amount":1,"kind":"mint_nft"}"#,
        )
        .unwrap();
        assert_eq!(tx.kind, TxKind::Other);
    }

    #[test]
    fn test_connection_envelope() {
        let msg = StreamMessage::Connection {
            message: "hi".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "connection");
        assert_eq!(json["message"], "hi");
    }

    #[test]
    fn test_protocol_for_level() {
        assert_eq!(
            ResponseProtocol::for_level(RiskLevel::Critical),
            ResponseProtocol::TriggerCircuitBreaker
        );
        assert_eq!(
            ResponseProtocol::for_level(RiskLevel::Low).as_str(),
            "LOG_ONLY"
        );
    }
}
