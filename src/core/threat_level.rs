//! Threat-Level (DEFCON) Engine
//!
//! Sliding 60s window of HIGH/CRITICAL verdict timestamps mapped onto five
//! discrete levels. The level is recomputed on every evaluation; there is no
//! timer, so de-escalation happens as attacks age out of the window.
//!
//! | attacks in window | level | alert threshold | status        |
//! |-------------------|-------|-----------------|---------------|
//! | >= 10             | 1     | 50              | MAXIMUM ALERT |
//! | >= 5              | 2     | 60              | HIGH ALERT    |
//! | >= 3              | 3     | 70              | ELEVATED      |
//! | >= 1              | 4     | 75              | GUARDED       |
//! | 0                 | 5     | 80              | NORMAL        |

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::models::{AppError, AppResult, RiskLevel};
use crate::utils::constants::*;

/// Discrete threat level, `One` is the most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DefconLevel {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
}

impl DefconLevel {
    /// Fixed ascending table: more attacks, lower number
    pub fn from_attack_count(count: usize) -> Self {
        if count >= DEFCON_1_ATTACKS {
            DefconLevel::One
        } else if count >= DEFCON_2_ATTACKS {
            DefconLevel::Two
        } else if count >= DEFCON_3_ATTACKS {
            DefconLevel::Three
        } else if count >= DEFCON_4_ATTACKS {
            DefconLevel::Four
        } else {
            DefconLevel::Five
        }
    }

    pub fn alert_threshold(&self) -> f64 {
        match self {
            DefconLevel::One => DEFCON_1_THRESHOLD,
            DefconLevel::Two => DEFCON_2_THRESHOLD,
            DefconLevel::Three => DEFCON_3_THRESHOLD,
            DefconLevel::Four => DEFCON_4_THRESHOLD,
            DefconLevel::Five => DEFCON_5_THRESHOLD,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            DefconLevel::One => "MAXIMUM ALERT",
            DefconLevel::Two => "HIGH ALERT",
            DefconLevel::Three => "ELEVATED",
            DefconLevel::Four => "GUARDED",
            DefconLevel::Five => "NORMAL",
        }
    }

    /// Levels 1 and 2 trigger automatic escalation notices
    #[inline]
    pub fn is_severe(&self) -> bool {
        matches!(self, DefconLevel::One | DefconLevel::Two)
    }

    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for DefconLevel {
    type Error = AppError;

    fn try_from(value: u8) -> AppResult<Self> {
        match value {
            1 => Ok(DefconLevel::One),
            2 => Ok(DefconLevel::Two),
            3 => Ok(DefconLevel::Three),
            4 => Ok(DefconLevel::Four),
            5 => Ok(DefconLevel::Five),
            other => Err(AppError::threat_level_out_of_range(other)),
        }
    }
}

impl Serialize for DefconLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for DefconLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        DefconLevel::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Read-only snapshot of the threat state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatState {
    pub defcon_level: DefconLevel,
    pub alert_threshold: f64,
    pub attacks_last_minute: usize,
    pub status: String,
}

impl ThreatState {
    fn for_level(level: DefconLevel, attacks: usize) -> Self {
        Self {
            defcon_level: level,
            alert_threshold: level.alert_threshold(),
            attacks_last_minute: attacks,
            status: level.status_label().to_string(),
        }
    }

    /// Internal consistency check: level, threshold and count must agree
    pub fn validate(&self) -> AppResult<()> {
        let level = self.defcon_level;
        if (self.alert_threshold - level.alert_threshold()).abs() > f64::EPSILON {
            return Err(AppError::torn_snapshot(format!(
                "threshold {} does not match level {}",
                self.alert_threshold,
                level.as_u8()
            )));
        }
        if DefconLevel::from_attack_count(self.attacks_last_minute) != level {
            return Err(AppError::torn_snapshot(format!(
                "{} attacks does not map to level {}",
                self.attacks_last_minute,
                level.as_u8()
            )));
        }
        Ok(())
    }
}

impl Default for ThreatState {
    fn default() -> Self {
        Self::for_level(DefconLevel::Five, 0)
    }
}

/// Level change produced by an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelTransition {
    pub from: DefconLevel,
    pub to: DefconLevel,
}

impl LevelTransition {
    #[inline]
    pub fn is_escalation(&self) -> bool {
        self.to < self.from
    }
}

/// Sliding-window state machine. Owned by the pipeline behind a single mutex.
#[derive(Debug)]
pub struct ThreatLevelEngine {
    window: Duration,
    attacks: VecDeque<Instant>,
    level: DefconLevel,
}

impl Default for ThreatLevelEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreatLevelEngine {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(THREAT_WINDOW_SECS))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            attacks: VecDeque::new(),
            level: DefconLevel::Five,
        }
    }

    pub fn level(&self) -> DefconLevel {
        self.level
    }

    /// Drop every attack not strictly inside the trailing window
    fn prune(&mut self, now: Instant) {
        while let Some(at) = self.attacks.front() {
            if now.saturating_duration_since(*at) >= self.window {
                self.attacks.pop_front();
            } else {
                break;
            }
        }
    }

    /// Prune and recompute the level at `now`
    pub fn evaluate(&mut self, now: Instant) -> Option<LevelTransition> {
        self.prune(now);
        self.apply(DefconLevel::from_attack_count(self.attacks.len()))
    }

    /// Record a verdict and recompute. Only HIGH/CRITICAL count as attacks.
    pub fn observe(&mut self, level: RiskLevel, now: Instant) -> Option<LevelTransition> {
        if level.is_attack() {
            self.attacks.push_back(now);
        }
        self.evaluate(now)
    }

    fn apply(&mut self, next: DefconLevel) -> Option<LevelTransition> {
        if next == self.level {
            return None;
        }
        let transition = LevelTransition {
            from: self.level,
            to: next,
        };
        self.level = next;
        Some(transition)
    }

    /// Non-mutating view: counts only attacks inside the window at `now`
    pub fn snapshot_at(&self, now: Instant) -> ThreatState {
        let live = self
            .attacks
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < self.window)
            .count();
        ThreatState::for_level(DefconLevel::from_attack_count(live), live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let engine = ThreatLevelEngine::new();
        let state = engine.snapshot_at(Instant::now());
        assert_eq!(state.defcon_level, DefconLevel::Five);
        assert_eq!(state.alert_threshold, 80.0);
        assert_eq!(state.status, "NORMAL");
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_table() {
        assert_eq!(DefconLevel::from_attack_count(0), DefconLevel::Five);
        assert_eq!(DefconLevel::from_attack_count(1), DefconLevel::Four);
        assert_eq!(DefconLevel::from_attack_count(2), DefconLevel::Four);
        assert_eq!(DefconLevel::from_attack_count(3), DefconLevel::Three);
        assert_eq!(DefconLevel::from_attack_count(5), DefconLevel::Two);
        assert_eq!(DefconLevel::from_attack_count(10), DefconLevel::One);
        assert_eq!(DefconLevel::from_attack_count(1000), DefconLevel::One);
    }

    #[test]
    fn test_low_verdicts_do_not_escalate() {
        let mut engine = ThreatLevelEngine::new();
        let now = Instant::now();
        for _ in 0..20 {
            assert!(engine.observe(RiskLevel::Medium, now).is_none());
        }
        assert_eq!(engine.level(), DefconLevel::Five);
    }

    #[test]
    fn test_escalation_transitions() {
        let mut engine = ThreatLevelEngine::new();
        let t0 = Instant::now();
        let first = engine.observe(RiskLevel::High, t0);
        assert_eq!(
            first,
            Some(LevelTransition {
                from: DefconLevel::Five,
                to: DefconLevel::Four
            })
        );
        assert!(first.map(|t| t.is_escalation()).unwrap_or(false));
        assert!(engine.observe(RiskLevel::Critical, t0).is_none());
    }

    #[test]
    fn test_window_is_strict() {
        let mut engine = ThreatLevelEngine::new();
        let t0 = Instant::now();
        engine.observe(RiskLevel::High, t0);

        // Exactly 60s later the attack is outside the trailing window
        assert_eq!(engine.snapshot_at(t0 + Duration::from_secs(59)).attacks_last_minute, 1);
        assert_eq!(engine.snapshot_at(t0 + Duration::from_secs(60)).attacks_last_minute, 0);

        let transition = engine.evaluate(t0 + Duration::from_secs(60));
        assert_eq!(transition.map(|t| t.to), Some(DefconLevel::Five));
    }

    #[test]
    fn test_try_from_rejects_out_of_range() {
        assert!(DefconLevel::try_from(3).is_ok());
        let err = DefconLevel::try_from(0).unwrap_err();
        assert_eq!(
            err.category(),
            crate::models::ErrorCategory::InternalInvariantViolation
        );
        assert!(DefconLevel::try_from(6).is_err());
    }

    #[test]
    fn test_validate_detects_torn_state() {
        let torn = ThreatState {
            defcon_level: DefconLevel::One,
            alert_threshold: 80.0,
            attacks_last_minute: 0,
            status: "NORMAL".to_string(),
        };
        assert!(torn.validate().is_err());
    }

    #[test]
    fn test_serializes_level_as_number() {
        let json = serde_json::to_value(ThreatState::default()).unwrap();
        assert_eq!(json["defcon_level"], 5);
        assert_eq!(json["attacks_last_minute"], 0);
    }
}
