//! Telemetry Module for AegisGuard
//!
//! Collects verdict statistics for:
//! - Operator reports on shutdown
//! - `GET /api/stats`
//! - Offline analysis (JSONL threat events, JSON snapshots)
//!
//! Wallet identifiers are never written out; events carry only the token,
//! attack type and a rounded amount.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::models::{AttackType, EnrichedRecord, RiskLevel, TelemetryConfig};

/// Single telemetry event (anonymized)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Unix timestamp
    pub timestamp: u64,
    pub threat_type: AttackType,
    pub risk_level: RiskLevel,
    pub risk_score: u8,
    pub token: String,
    /// Amount rounded to whole units
    pub amount: f64,
    pub latency_us: u64,
}

impl TelemetryEvent {
    pub fn from_record(record: &EnrichedRecord, latency_us: u64) -> Self {
        Self {
            timestamp: current_timestamp(),
            threat_type: record.threat_type,
            risk_level: record.risk_level,
            risk_score: record.risk_score,
            token: record.transaction.token.clone(),
            amount: record.transaction.amount.round(),
            latency_us,
        }
    }
}

/// Aggregated statistics for reporting
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryStats {
    pub total_analyzed: u64,
    /// HIGH and CRITICAL verdicts
    pub total_threats: u64,
    pub critical: u64,
    pub by_level: HashMap<String, u64>,
    pub threats_by_type: HashMap<String, u64>,
    /// Sum of amounts carried by threat verdicts
    pub value_at_risk: f64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    pub broadcasts: u64,
    pub dispatches_queued: u64,
    pub period_start: u64,
    pub period_end: u64,
}

impl TelemetryStats {
    /// Shutdown report for the operator console
    pub fn summary_report(&self) -> String {
        let period_mins = self.period_end.saturating_sub(self.period_start) / 60;

        format!(
            r#"
╔══════════════════════════════════════════════════════════════════╗
║           🛡️ AEGIS GUARD - SESSION REPORT                        ║
╠══════════════════════════════════════════════════════════════════╣
║   📊 Period: {} minutes
║   🔍 Transactions Analyzed:    {:>10}
║   🚨 Threats Detected:         {:>10}
║   💀 Critical Verdicts:        {:>10}
║   💰 Value At Risk:            {:>10.2}
║   📡 Records Broadcast:        {:>10}
║   🤖 Automations Queued:       {:>10}
║   ⚡ Avg Scoring Latency:      {:>10.3}ms
╚══════════════════════════════════════════════════════════════════╝
"#,
            period_mins,
            self.total_analyzed,
            self.total_threats,
            self.critical,
            self.value_at_risk,
            self.broadcasts,
            self.dispatches_queued,
            self.avg_latency_ms,
        )
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{:.2},{:.3}\n",
            self.period_start,
            self.period_end,
            self.total_analyzed,
            self.total_threats,
            self.critical,
            self.value_at_risk,
            self.avg_latency_ms,
        )
    }
}

/// Main telemetry collector
pub struct TelemetryCollector {
    events: RwLock<Vec<TelemetryEvent>>,
    total_analyzed: AtomicU64,
    total_threats: AtomicU64,
    critical: AtomicU64,
    total_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
    broadcasts: AtomicU64,
    dispatches_queued: AtomicU64,
    level_counts: [AtomicU64; 4],
    value_at_risk: RwLock<f64>,
    threat_counts: RwLock<HashMap<AttackType, u64>>,
    session_start: u64,
    export_dir: PathBuf,
    max_buffer_size: usize,
}

fn level_index(level: RiskLevel) -> usize {
    match level {
        RiskLevel::Low => 0,
        RiskLevel::Medium => 1,
        RiskLevel::High => 2,
        RiskLevel::Critical => 3,
    }
}

const LEVELS: [RiskLevel; 4] = [
    RiskLevel::Low,
    RiskLevel::Medium,
    RiskLevel::High,
    RiskLevel::Critical,
];

impl TelemetryCollector {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self::with_config(config.export_dir.clone(), config.buffer_size)
    }

    /// The export directory is created lazily on the first write
    pub fn with_config(export_dir: PathBuf, max_buffer_size: usize) -> Self {
        Self {
            events: RwLock::new(Vec::with_capacity(max_buffer_size.min(1024))),
            total_analyzed: AtomicU64::new(0),
            total_threats: AtomicU64::new(0),
            critical: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            max_latency_us: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            dispatches_queued: AtomicU64::new(0),
            level_counts: Default::default(),
            value_at_risk: RwLock::new(0.0),
            threat_counts: RwLock::new(HashMap::new()),
            session_start: current_timestamp(),
            export_dir,
            max_buffer_size: max_buffer_size.max(1),
        }
    }

    /// Record one processed record
    pub fn record_verdict(&self, record: &EnrichedRecord, latency_us: u64) {
        self.total_analyzed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.max_latency_us.fetch_max(latency_us, Ordering::Relaxed);
        self.level_counts[level_index(record.risk_level)].fetch_add(1, Ordering::Relaxed);

        if record.active_defense.as_ref().and_then(|d| d.dispatch_id).is_some() {
            self.dispatches_queued.fetch_add(1, Ordering::Relaxed);
        }

        if !record.risk_level.is_attack() {
            return;
        }

        self.total_threats.fetch_add(1, Ordering::Relaxed);
        if record.risk_level == RiskLevel::Critical {
            self.critical.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut value) = self.value_at_risk.write() {
            *value += record.transaction.amount.max(0.0);
        }
        if let Ok(mut counts) = self.threat_counts.write() {
            *counts.entry(record.threat_type).or_insert(0) += 1;
        }

        if let Ok(mut events) = self.events.write() {
            events.push(TelemetryEvent::from_record(record, latency_us));

            if events.len() >= self.max_buffer_size {
                let events_to_flush = std::mem::take(&mut *events);
                drop(events); // Release lock before I/O
                self.flush_in_background(events_to_flush);
            }
        }
    }

    pub fn record_broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> TelemetryStats {
        let total_analyzed = self.total_analyzed.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);

        let avg_latency_ms = if total_analyzed > 0 {
            total_latency as f64 / total_analyzed as f64 / 1000.0
        } else {
            0.0
        };

        let by_level = LEVELS
            .iter()
            .map(|level| {
                (
                    level.as_str().to_string(),
                    self.level_counts[level_index(*level)].load(Ordering::Relaxed),
                )
            })
            .collect();

        let threats_by_type = self
            .threat_counts
            .read()
            .map(|counts| {
                counts
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), *v))
                    .collect()
            })
            .unwrap_or_default();

        TelemetryStats {
            total_analyzed,
            total_threats: self.total_threats.load(Ordering::Relaxed),
            critical: self.critical.load(Ordering::Relaxed),
            by_level,
            threats_by_type,
            value_at_risk: self.value_at_risk.read().map(|v| *v).unwrap_or(0.0),
            avg_latency_ms,
            max_latency_ms: self.max_latency_us.load(Ordering::Relaxed) as f64 / 1000.0,
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            dispatches_queued: self.dispatches_queued.load(Ordering::Relaxed),
            period_start: self.session_start,
            period_end: current_timestamp(),
        }
    }

    /// Flush buffered events and write a stats snapshot
    pub fn export_stats_json(&self) -> Result<PathBuf, std::io::Error> {
        let pending = self
            .events
            .write()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default();
        self.flush_events(&pending)?;

        fs::create_dir_all(&self.export_dir)?;
        let stats = self.get_stats();
        let path = self
            .export_dir
            .join(format!("stats_{}.json", current_timestamp()));
        fs::write(&path, serde_json::to_string_pretty(&stats)?)?;
        Ok(path)
    }

    /// Append the current stats to the CSV history
    pub fn export_stats_csv(&self) -> Result<PathBuf, std::io::Error> {
        fs::create_dir_all(&self.export_dir)?;
        let stats = self.get_stats();
        let path = self.export_dir.join("telemetry_history.csv");

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            writeln!(
                file,
                "period_start,period_end,total_analyzed,total_threats,critical,value_at_risk,avg_latency_ms"
            )?;
        }
        write!(file, "{}", stats.to_csv_row())?;
        Ok(path)
    }

    /// Disk writes run on the blocking pool when a runtime is available
    fn flush_in_background(&self, events: Vec<TelemetryEvent>) {
        let dir = self.export_dir.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    if let Err(e) = write_events(&dir, &events) {
                        warn!(error = %e, "⚠️ Telemetry flush failed");
                    }
                });
            }
            Err(_) => {
                if let Err(e) = write_events(&dir, &events) {
                    warn!(error = %e, "⚠️ Telemetry flush failed");
                }
            }
        }
    }

    fn flush_events(&self, events: &[TelemetryEvent]) -> Result<(), std::io::Error> {
        write_events(&self.export_dir, events)
    }

    pub fn summary_report(&self) -> String {
        self.get_stats().summary_report()
    }
}

/// Append events as JSON lines to a per-second file under `dir`
fn write_events(dir: &Path, events: &[TelemetryEvent]) -> Result<(), std::io::Error> {
    if events.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("events_{}.jsonl", current_timestamp()));
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

    for event in events {
        if let Ok(json) = serde_json::to_string(event) {
            writeln!(file, "{}", json)?;
        }
    }
    Ok(())
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::threat_level::ThreatState;
    use crate::models::{ResponseProtocol, Transaction};

    fn record(amount: f64, level: RiskLevel, kind: AttackType) -> EnrichedRecord {
        EnrichedRecord {
            transaction: Transaction::transfer("A", "B", amount),
            risk_score: 50,
            risk_level: level,
            threat_type: kind,
            action: ResponseProtocol::for_level(level),
            explanation: None,
            risk_factors: Vec::new(),
            prediction: None,
            defcon_status: ThreatState::default(),
            sentiment_analysis: None,
            active_defense: None,
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("aegis_telemetry_{}_{}", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_collector_counts() {
        let collector = TelemetryCollector::with_config(temp_dir("counts"), 100);
        collector.record_verdict(&record(10.0, RiskLevel::Low, AttackType::Normal), 1000);
        collector.record_verdict(&record(1e6, RiskLevel::Critical, AttackType::WhaleDump), 3000);
        collector.record_broadcast();

        let stats = collector.get_stats();
        assert_eq!(stats.total_analyzed, 2);
        assert_eq!(stats.total_threats, 1);
        assert_eq!(stats.critical, 1);
        assert_eq!(stats.by_level["LOW"], 1);
        assert_eq!(stats.threats_by_type["WHALE_DUMP"], 1);
        assert_eq!(stats.value_at_risk, 1e6);
        assert!((stats.avg_latency_ms - 2.0).abs() < 1e-9);
        assert_eq!(stats.broadcasts, 1);
    }

    #[test]
    fn test_json_export_writes_file() {
        let dir = temp_dir("export");
        let collector = TelemetryCollector::with_config(dir.clone(), 100);
        collector.record_verdict(&record(5.0, RiskLevel::High, AttackType::LargeTransfer), 10);

        let path = collector.export_stats_json().unwrap();
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains("total_analyzed"));
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_full_buffer_flushes_off_the_caller() {
        let dir = temp_dir("flush");
        let collector = TelemetryCollector::with_config(dir.clone(), 2);
        collector.record_verdict(&record(1e6, RiskLevel::Critical, AttackType::WhaleDump), 10);
        collector.record_verdict(&record(2e6, RiskLevel::High, AttackType::WhaleDump), 10);

        // The write lands on the blocking pool; wait for the file
        let mut lines = 0;
        for _ in 0..100 {
            if let Ok(entries) = fs::read_dir(&dir) {
                lines = entries
                    .filter_map(Result::ok)
                    .filter_map(|e| fs::read_to_string(e.path()).ok())
                    .map(|body| body.lines().count())
                    .sum();
            }
            if lines == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(lines, 2);
        assert!(collector.events.read().unwrap().is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_full_buffer_flushes_inline_without_runtime() {
        let dir = temp_dir("inline");
        let collector = TelemetryCollector::with_config(dir.clone(), 1);
        collector.record_verdict(&record(1e6, RiskLevel::Critical, AttackType::WhaleDump), 10);

        let files = fs::read_dir(&dir).unwrap().count();
        assert_eq!(files, 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_summary_report() {
        let stats = TelemetryStats {
            total_analyzed: 500,
            total_threats: 25,
            critical: 4,
            value_at_risk: 1250.5,
            ..Default::default()
        };
        let report = stats.summary_report();
        assert!(report.contains("500"));
        assert!(report.contains("1250.50"));
    }
}
