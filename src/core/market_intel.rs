//! Market Intelligence - per-token risk rollups, trading signals and network mood

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::core::forecast::Trend;
use crate::core::threat_level::DefconLevel;
use crate::models::{AttackType, EnrichedRecord, Mood, RiskLevel, SentimentAnalysis};
use crate::utils::constants::{
    clamp_score, risk_label, MAX_TOKEN_SIGNALS, MAX_TRACKED_TOKENS, TOKEN_HISTORY_CAP,
    TOKEN_IDLE_HOURS, TOKEN_TREND_DELTA,
};

const TREND_BUCKET: usize = 5;
const HIGH_LIQUIDITY_TOKENS: [&str; 3] = ["QX", "QUBIC", "QU"];

#[derive(Debug, Clone, Serialize)]
pub struct TokenStats {
    pub symbol: String,
    pub last_updated: DateTime<Utc>,
    pub latest_risk_score: u8,
    pub average_risk_24h: f64,
    pub alerts_24h: usize,
    pub trend: Trend,
    pub liquidity_tag: &'static str,
    pub risk_label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenSignal {
    pub id: Uuid,
    pub token_symbol: String,
    pub timestamp: DateTime<Utc>,
    pub signal_type: AttackType,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xai_summary: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketOverview {
    pub tokens: Vec<TokenStats>,
    pub tracked_tokens: usize,
    pub total_alerts_24h: usize,
    pub recent_signals: usize,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    score: u8,
    alert: bool,
}

#[derive(Debug)]
struct TokenState {
    history: VecDeque<Sample>,
    stats: TokenStats,
}

fn token_trend(history: &VecDeque<Sample>) -> Trend {
    let len = history.len();
    if len < TREND_BUCKET {
        return Trend::Stable;
    }
    let avg = |it: &mut dyn Iterator<Item = &Sample>| {
        let (sum, n) = it.fold((0.0, 0usize), |(s, n), x| (s + f64::from(x.score), n + 1));
        if n == 0 { 0.0 } else { sum / n as f64 }
    };
    let recent = avg(&mut history.iter().skip(len - TREND_BUCKET));
    // Fewer than ten samples: compare against the first bucket
    let previous = if len >= 2 * TREND_BUCKET {
        avg(&mut history.iter().skip(len - 2 * TREND_BUCKET).take(TREND_BUCKET))
    } else {
        avg(&mut history.iter().take(TREND_BUCKET))
    };

    let diff = recent - previous;
    if diff > TOKEN_TREND_DELTA {
        Trend::Up
    } else if diff < -TOKEN_TREND_DELTA {
        Trend::Down
    } else {
        Trend::Stable
    }
}

fn liquidity_tag(symbol: &str, alerts: usize) -> &'static str {
    if HIGH_LIQUIDITY_TOKENS.contains(&symbol.to_ascii_uppercase().as_str()) || alerts > 10 {
        "high_liquidity"
    } else {
        "normal_liquidity"
    }
}

/// Token-level intelligence fed from processed records
pub struct MarketIntel {
    tokens: DashMap<String, TokenState>,
    signals: Mutex<VecDeque<TokenSignal>>,
    max_signals: usize,
    max_tokens: usize,
}

impl Default for MarketIntel {
    fn default() -> Self {
        Self::new(MAX_TOKEN_SIGNALS)
    }
}

impl MarketIntel {
    pub fn new(max_signals: usize) -> Self {
        Self::with_limits(max_signals, MAX_TRACKED_TOKENS)
    }

    pub fn with_limits(max_signals: usize, max_tokens: usize) -> Self {
        Self {
            tokens: DashMap::new(),
            signals: Mutex::new(VecDeque::with_capacity(max_signals.min(256))),
            max_signals: max_signals.max(1),
            max_tokens: max_tokens.max(1),
        }
    }

    /// Drop tokens with no activity inside the idle window
    pub fn cleanup_stale(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - ChronoDuration::hours(TOKEN_IDLE_HOURS);
        let before = self.tokens.len();
        self.tokens.retain(|_, state| state.stats.last_updated >= cutoff);
        before.saturating_sub(self.tokens.len())
    }

    /// Make room for a new symbol: stale tokens first, then the least recently updated
    fn make_room(&self, now: DateTime<Utc>) {
        if self.tokens.len() < self.max_tokens {
            return;
        }
        self.cleanup_stale(now);
        while self.tokens.len() >= self.max_tokens {
            let oldest = self
                .tokens
                .iter()
                .min_by_key(|e| e.stats.last_updated)
                .map(|e| e.key().clone());
            match oldest {
                Some(symbol) => {
                    self.tokens.remove(&symbol);
                    debug!(token = %symbol, "🧹 Evicted idle token");
                }
                None => break,
            }
        }
    }

    /// Fold one record into its token; HIGH and CRITICAL verdicts also emit a signal
    pub fn ingest(&self, record: &EnrichedRecord, now: DateTime<Utc>) -> TokenStats {
        let symbol = record.transaction.token.to_ascii_uppercase();
        let alert = record.risk_level >= RiskLevel::High;
        let sample = Sample {
            at: now,
            score: record.risk_score,
            alert,
        };

        if !self.tokens.contains_key(&symbol) {
            self.make_room(now);
        }

        let stats = {
            let mut state = self.tokens.entry(symbol.clone()).or_insert_with(|| TokenState {
                history: VecDeque::with_capacity(TOKEN_HISTORY_CAP),
                stats: TokenStats {
                    symbol: symbol.clone(),
                    last_updated: now,
                    latest_risk_score: record.risk_score,
                    average_risk_24h: f64::from(record.risk_score),
                    alerts_24h: 0,
                    trend: Trend::Stable,
                    liquidity_tag: liquidity_tag(&symbol, 0),
                    risk_label: risk_label(f64::from(record.risk_score)),
                },
            });

            if state.history.len() >= TOKEN_HISTORY_CAP {
                state.history.pop_front();
            }
            state.history.push_back(sample);

            let cutoff = now - ChronoDuration::hours(24);
            let (sum, count, alerts) = state
                .history
                .iter()
                .filter(|s| s.at >= cutoff)
                .fold((0.0, 0usize, 0usize), |(sum, n, a), s| {
                    (sum + f64::from(s.score), n + 1, a + usize::from(s.alert))
                });

            let trend = token_trend(&state.history);
            let stats = &mut state.stats;
            stats.last_updated = now;
            stats.latest_risk_score = record.risk_score;
            stats.average_risk_24h = if count > 0 {
                sum / count as f64
            } else {
                f64::from(record.risk_score)
            };
            stats.alerts_24h = alerts;
            stats.trend = trend;
            stats.liquidity_tag = liquidity_tag(&symbol, alerts);
            stats.risk_label = risk_label(f64::from(record.risk_score));
            stats.clone()
        };

        if alert {
            self.push_signal(TokenSignal {
                id: Uuid::new_v4(),
                token_symbol: symbol,
                timestamp: now,
                signal_type: record.threat_type,
                risk_score: record.risk_score,
                risk_level: record.risk_level,
                message: format!(
                    "{} {} on {} (score {})",
                    record.risk_level.emoji(),
                    record.threat_type.as_str(),
                    stats.symbol,
                    record.risk_score
                ),
                xai_summary: record.explanation.clone(),
            });
        }
        stats
    }

    fn push_signal(&self, signal: TokenSignal) {
        let mut signals = self.signals.lock().unwrap_or_else(|p| p.into_inner());
        if signals.len() >= self.max_signals {
            signals.pop_back();
        }
        signals.push_front(signal);
    }

    /// Newest first
    pub fn recent_signals(&self, limit: usize) -> Vec<TokenSignal> {
        let signals = self.signals.lock().unwrap_or_else(|p| p.into_inner());
        signals.iter().take(limit).cloned().collect()
    }

    pub fn token(&self, symbol: &str) -> Option<TokenStats> {
        self.tokens
            .get(&symbol.to_ascii_uppercase())
            .map(|state| state.stats.clone())
    }

    pub fn overview(&self) -> MarketOverview {
        let mut tokens: Vec<TokenStats> = self.tokens.iter().map(|e| e.stats.clone()).collect();
        tokens.sort_by(|a, b| {
            b.latest_risk_score
                .cmp(&a.latest_risk_score)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        let total_alerts_24h = tokens.iter().map(|t| t.alerts_24h).sum();
        let recent_signals = self.signals.lock().unwrap_or_else(|p| p.into_inner()).len();
        MarketOverview {
            tracked_tokens: tokens.len(),
            tokens,
            total_alerts_24h,
            recent_signals,
        }
    }
}

/// Network mood from the global EMA and the current threat level
pub fn network_sentiment(global_ema: f64, level: DefconLevel) -> SentimentAnalysis {
    // Level 5 adds no pressure, level 1 adds the maximum
    let level_pressure = f64::from(5 - level.as_u8()) * 25.0;
    let fear = clamp_score(0.6 * clamp_score(global_ema) + 0.4 * level_pressure);
    let score = fear.round() as u8;

    let (mood, description) = match score {
        0..=29 => (Mood::Calm, "Network activity is within normal bounds"),
        30..=54 => (Mood::Nervous, "Elevated risk scores observed, stay alert"),
        55..=74 => (Mood::Fearful, "Sustained high-risk activity across the network"),
        _ => (Mood::Panic, "Coordinated attack pattern suspected, defensive posture advised"),
    };

    SentimentAnalysis {
        mood,
        score,
        description: description.to_string(),
    }
}
