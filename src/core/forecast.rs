//! Forecast Engine
//!
//! Exponentially smoothed risk per wallet and for the whole network ("global").
//! `ema_new = alpha * score + (1 - alpha) * ema_old`, seeded by the first score.
//! Projections extrapolate the latest EMA delta with damping and are clamped
//! to 0..=100.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Instant;

use crate::models::{AppError, AppResult, ForecastConfig};
use crate::utils::cache::{CacheStats, TtlCache};
use crate::utils::constants::{clamp_score, FORECAST_FULL_VOLUME, GLOBAL_KEY};

/// Per-step damping of the extrapolated delta
const PROJECTION_DAMPING: f64 = 0.8;
/// Idle seconds at which recency halves confidence
const RECENCY_HALF_LIFE_SECS: f64 = 300.0;

/// Forecast horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    ShortTerm,
    MediumTerm,
    LongTerm,
}

impl Horizon {
    /// Projection steps
    pub fn steps(&self) -> usize {
        match self {
            Horizon::ShortTerm => 1,
            Horizon::MediumTerm => 6,
            Horizon::LongTerm => 24,
        }
    }

    fn base_confidence(&self) -> f64 {
        match self {
            Horizon::ShortTerm => 0.9,
            Horizon::MediumTerm => 0.7,
            Horizon::LongTerm => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::ShortTerm => "short_term",
            Horizon::MediumTerm => "medium_term",
            Horizon::LongTerm => "long_term",
        }
    }
}

impl FromStr for Horizon {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short_term" => Ok(Horizon::ShortTerm),
            "medium_term" => Ok(Horizon::MediumTerm),
            "long_term" => Ok(Horizon::LongTerm),
            _ => Err(AppError::invalid_horizon(s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForecastStatus {
    Ok,
    InsufficientData,
}

/// Projection for one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    /// Wallet id or "global"
    pub key: String,
    pub horizon: Horizon,
    pub status: ForecastStatus,
    pub predicted_risk: f64,
    pub confidence: f64,
    pub trend: Trend,
    /// Projected path, one point per step
    pub series: Vec<f64>,
    pub observations: u64,
}

impl ForecastResult {
    fn insufficient(key: &str, horizon: Horizon) -> Self {
        Self {
            key: key.to_string(),
            horizon,
            status: ForecastStatus::InsufficientData,
            predicted_risk: 0.0,
            confidence: 0.0,
            trend: Trend::Stable,
            series: Vec::new(),
            observations: 0,
        }
    }
}

/// EMA state for one key
#[derive(Debug, Clone)]
pub struct ForecastSeries {
    ema: f64,
    last_update: Instant,
    /// EMA after each observation, oldest first
    history: VecDeque<f64>,
    observations: u64,
}

impl ForecastSeries {
    pub fn new(now: Instant) -> Self {
        Self {
            ema: 0.0,
            last_update: now,
            history: VecDeque::new(),
            observations: 0,
        }
    }

    pub fn ema(&self) -> f64 {
        self.ema
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn observe(&mut self, score: f64, alpha: f64, history_cap: usize, now: Instant) {
        let score = clamp_score(score);
        self.ema = if self.observations == 0 {
            score
        } else {
            clamp_score(alpha * score + (1.0 - alpha) * self.ema)
        };
        self.observations += 1;
        self.last_update = now;
        self.history.push_back(self.ema);
        while self.history.len() > history_cap.max(2) {
            self.history.pop_front();
        }
    }

    /// UP / DOWN when the EMA moved more than `delta` over the last `window` steps
    pub fn trend(&self, window: usize, delta: f64) -> Trend {
        let len = self.history.len();
        if len < 2 {
            return Trend::Stable;
        }
        let back = window.max(1).min(len - 1);
        let then = self.history[len - 1 - back];
        let moved = self.ema - then;
        if moved > delta {
            Trend::Up
        } else if moved < -delta {
            Trend::Down
        } else {
            Trend::Stable
        }
    }

    /// Most recent EMA step
    fn last_delta(&self) -> f64 {
        let len = self.history.len();
        if len < 2 {
            0.0
        } else {
            self.history[len - 1] - self.history[len - 2]
        }
    }

    fn project(&self, key: &str, horizon: Horizon, config: &ForecastConfig, now: Instant) -> ForecastResult {
        if self.observations == 0 {
            return ForecastResult::insufficient(key, horizon);
        }

        let delta = self.last_delta();
        let mut series = Vec::with_capacity(horizon.steps());
        let mut point = self.ema;
        let mut step_delta = delta;
        for _ in 0..horizon.steps() {
            step_delta *= PROJECTION_DAMPING;
            point = clamp_score(point + step_delta);
            series.push(round2(point));
        }
        let predicted_risk = series.last().copied().unwrap_or(self.ema);

        let volume = (self.observations as f64 / FORECAST_FULL_VOLUME as f64).min(1.0);
        let idle = now.saturating_duration_since(self.last_update).as_secs_f64();
        let recency = 1.0 / (1.0 + idle / RECENCY_HALF_LIFE_SECS);
        let confidence = horizon.base_confidence() * (0.3 + 0.7 * volume) * recency;

        ForecastResult {
            key: key.to_string(),
            horizon,
            status: ForecastStatus::Ok,
            predicted_risk,
            confidence: (confidence * 1000.0).round() / 1000.0,
            trend: self.trend(config.trend_window, config.trend_delta),
            series,
            observations: self.observations,
        }
    }
}

#[inline]
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Per-wallet and global EMA forecasts
pub struct ForecastEngine {
    config: ForecastConfig,
    global: Mutex<ForecastSeries>,
    wallets: TtlCache<ForecastSeries>,
}

impl ForecastEngine {
    pub fn new(config: ForecastConfig) -> Self {
        Self {
            global: Mutex::new(ForecastSeries::new(Instant::now())),
            wallets: TtlCache::new(config.key_ttl, config.max_keys),
            config,
        }
    }

    /// Fold one verdict score into the wallet key and the global key
    pub fn observe(&self, wallet: &str, score: u8, now: Instant) -> AppResult<()> {
        let (alpha, cap) = (self.config.alpha, self.config.history_cap);
        let score = f64::from(score);

        self.wallets.update(
            wallet,
            now,
            || ForecastSeries::new(now),
            |series| series.observe(score, alpha, cap, now),
        );

        let mut global = self
            .global
            .lock()
            .map_err(|_| AppError::torn_snapshot("forecast global lock poisoned"))?;
        global.observe(score, alpha, cap, now);
        Ok(())
    }

    /// Forecast for a wallet, or the global key when `wallet` is None
    pub fn forecast(&self, horizon: Horizon, wallet: Option<&str>, now: Instant) -> AppResult<ForecastResult> {
        match wallet {
            Some(id) if id != GLOBAL_KEY => Ok(self
                .wallets
                .read(id, now, |series| series.project(id, horizon, &self.config, now))
                .unwrap_or_else(|| ForecastResult::insufficient(id, horizon))),
            _ => {
                let global = self
                    .global
                    .lock()
                    .map_err(|_| AppError::torn_snapshot("forecast global lock poisoned"))?;
                Ok(global.project(GLOBAL_KEY, horizon, &self.config, now))
            }
        }
    }

    /// Current global EMA (0 before any observation)
    pub fn global_ema(&self) -> AppResult<f64> {
        let global = self
            .global
            .lock()
            .map_err(|_| AppError::torn_snapshot("forecast global lock poisoned"))?;
        Ok(global.ema())
    }

    pub fn cleanup_expired(&self, now: Instant) -> usize {
        self.wallets.cleanup_expired(now)
    }

    pub fn tracked_wallets(&self) -> usize {
        self.wallets.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.wallets.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn engine() -> ForecastEngine {
        ForecastEngine::new(ForecastConfig::default())
    }

    #[test]
    fn test_horizon_parsing() {
        assert_eq!("short_term".parse::<Horizon>().unwrap(), Horizon::ShortTerm);
        assert_eq!("LONG_TERM".parse::<Horizon>().unwrap(), Horizon::LongTerm);
        let err = "next_week".parse::<Horizon>().unwrap_err();
        assert_eq!(err.code_str(), "FCST_INVALID_HORIZON");
    }

    #[test]
    fn test_first_observation_seeds_ema() {
        let e = engine();
        let now = Instant::now();
        e.observe("W", 60, now).unwrap();
        assert_eq!(e.global_ema().unwrap(), 60.0);

        e.observe("W", 0, now).unwrap();
        // 0.3 * 0 + 0.7 * 60
        assert!((e.global_ema().unwrap() - 42.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_wallet_is_insufficient() {
        let e = engine();
        let result = e
            .forecast(Horizon::ShortTerm, Some("nobody"), Instant::now())
            .unwrap();
        assert_eq!(result.status, ForecastStatus::InsufficientData);
        assert!(result.series.is_empty());
    }

    #[test]
    fn test_confidence_decreases_with_horizon() {
        let e = engine();
        let now = Instant::now();
        for _ in 0..12 {
            e.observe("W", 50, now).unwrap();
        }
        let short = e.forecast(Horizon::ShortTerm, Some("W"), now).unwrap();
        let medium = e.forecast(Horizon::MediumTerm, Some("W"), now).unwrap();
        let long = e.forecast(Horizon::LongTerm, Some("W"), now).unwrap();
        assert!(short.confidence > medium.confidence);
        assert!(medium.confidence > long.confidence);
        assert_eq!(long.series.len(), 24);
    }

    #[test]
    fn test_confidence_drops_with_staleness_and_low_volume() {
        let e = engine();
        let now = Instant::now();
        e.observe("W", 50, now).unwrap();
        let sparse = e.forecast(Horizon::ShortTerm, Some("W"), now).unwrap();
        for _ in 0..12 {
            e.observe("W", 50, now).unwrap();
        }
        let dense = e.forecast(Horizon::ShortTerm, Some("W"), now).unwrap();
        let stale = e
            .forecast(Horizon::ShortTerm, Some("W"), now + Duration::from_secs(600))
            .unwrap();
        assert!(dense.confidence > sparse.confidence);
        assert!(dense.confidence > stale.confidence);
    }

    #[test]
    fn test_trend_detection() {
        let e = engine();
        let now = Instant::now();
        for _ in 0..5 {
            e.observe("W", 10, now).unwrap();
        }
        for _ in 0..5 {
            e.observe("W", 90, now).unwrap();
        }
        let up = e.forecast(Horizon::ShortTerm, Some("W"), now).unwrap();
        assert_eq!(up.trend, Trend::Up);
        assert!(up.predicted_risk <= 100.0);

        for _ in 0..10 {
            e.observe("W2", 50, now).unwrap();
        }
        let flat = e.forecast(Horizon::ShortTerm, Some("W2"), now).unwrap();
        assert_eq!(flat.trend, Trend::Stable);
    }

    #[test]
    fn test_wallet_keys_expire() {
        let e = ForecastEngine::new(ForecastConfig {
            key_ttl: Duration::from_secs(10),
            ..ForecastConfig::default()
        });
        let now = Instant::now();
        e.observe("W", 50, now).unwrap();
        let later = now + Duration::from_secs(11);
        let result = e.forecast(Horizon::ShortTerm, Some("W"), later).unwrap();
        assert_eq!(result.status, ForecastStatus::InsufficientData);
    }
}
