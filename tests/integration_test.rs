//! Integration tests for AegisGuard

use aegis_guard::core::automation::{AutoDispatch, AutomationDispatcher, ManualPreset, TriggerCondition};
use aegis_guard::core::forecast::{ForecastEngine, ForecastStatus, Horizon};
use aegis_guard::core::simulator::simulate;
use aegis_guard::core::threat_level::ThreatLevelEngine;
use aegis_guard::models::{
    AttackType, DispatchConfig, ForecastConfig, HubConfig, StreamMessage, TxKind,
};
use aegis_guard::providers::{NoopInference, NoopWebhook};
use aegis_guard::{
    AegisConfig, AegisEngine, DefconLevel, ErrorCategory, FanoutHub, OverflowPolicy, RiskLevel,
    SimulationParams, TelemetryCollector, Transaction,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn engine() -> AegisEngine {
    let mut config = AegisConfig::default();
    config.inference.timeout = Duration::from_millis(50);
    let dir = std::env::temp_dir().join(format!("aegis_it_{}", uuid::Uuid::new_v4()));
    AegisEngine::new(
        &config,
        Arc::new(NoopInference),
        Arc::new(NoopWebhook::default()),
        Arc::new(TelemetryCollector::with_config(dir, 100)),
    )
}

fn decode(raw: &str) -> StreamMessage {
    serde_json::from_str(raw).expect("stream message")
}

#[tokio::test]
async fn test_end_to_end_record_reaches_subscriber() {
    let engine = engine();
    let sub = engine.hub().subscribe().unwrap();

    match decode(&sub.recv().await.unwrap()) {
        StreamMessage::Connection { .. } => {}
        other => panic!("expected greeting, got {:?}", other),
    }

    let mut small = Transaction::transfer("ALICE", "BOB", 500.0);
    small.token = "qubic".to_string();
    let record = engine.process(small).await.unwrap();
    assert_eq!(record.risk_level, RiskLevel::Low);

    match decode(&sub.recv().await.unwrap()) {
        StreamMessage::TransactionAnalysis { data } => {
            assert_eq!(data.risk_score, record.risk_score);
            assert!(data.risk_score <= 100);
        }
        other => panic!("expected record, got {:?}", other),
    }

    // Token symbols are tracked upper-cased
    assert!(engine.market().token("QUBIC").is_some());
    assert_eq!(engine.pipeline_stats().processed, 1);
}

#[tokio::test]
async fn test_threat_level_only_escalates_under_attack() {
    let engine = engine();
    let mut last = DefconLevel::Five;
    for i in 0..12 {
        engine
            .process(Transaction::transfer(format!("WHALE{}", i), "POOL", 1_000_000.0))
            .await
            .unwrap();
        let level = engine.threat_status().unwrap().defcon_level;
        // Lower number is more severe
        assert!(level <= last, "level went from {:?} to {:?}", last, level);
        last = level;
    }
    let state = engine.threat_status().unwrap();
    assert_eq!(state.defcon_level, DefconLevel::One);
    assert_eq!(state.alert_threshold, 50.0);
    assert!(state.validate().is_ok());
}

#[test]
fn test_threat_window_decays() {
    let mut threat = ThreatLevelEngine::new();
    let t0 = Instant::now();
    for i in 0..5 {
        threat.observe(RiskLevel::High, t0 + Duration::from_millis(i * 10));
    }
    assert_eq!(threat.level(), DefconLevel::Two);

    // Medium and Low verdicts never count as attacks
    threat.observe(RiskLevel::Medium, t0 + Duration::from_secs(1));
    assert_eq!(threat.snapshot_at(t0 + Duration::from_secs(1)).attacks_last_minute, 5);

    let transition = threat.evaluate(t0 + Duration::from_secs(61)).unwrap();
    assert_eq!(transition.from, DefconLevel::Two);
    assert_eq!(transition.to, DefconLevel::Five);
    assert!(!transition.is_escalation());
}

#[test]
fn test_ema_converges_and_stays_bounded() {
    let forecast = ForecastEngine::new(ForecastConfig::default());
    let now = Instant::now();

    let empty = forecast.forecast(Horizon::ShortTerm, Some("NOBODY"), now).unwrap();
    assert_eq!(empty.status, ForecastStatus::InsufficientData);

    for _ in 0..40 {
        forecast.observe("W", 90, now).unwrap();
    }
    let result = forecast.forecast(Horizon::MediumTerm, Some("W"), now).unwrap();
    assert_eq!(result.status, ForecastStatus::Ok);
    assert!((result.predicted_risk - 90.0).abs() < 0.5);
    assert!(result.confidence > 0.0 && result.confidence <= 1.0);

    for _ in 0..40 {
        forecast.observe("W", 0, now).unwrap();
    }
    let result = forecast.forecast(Horizon::LongTerm, Some("W"), now).unwrap();
    assert!(result.series.iter().all(|p| (0.0..=100.0).contains(p)));
    assert!(forecast.global_ema().unwrap() < 1.0);
}

#[test]
fn test_whale_dump_simulation() {
    let result = simulate("whale_dump", &SimulationParams::with_amount(1_000_000.0)).unwrap();
    assert_eq!(result.estimated_impact, "Critical");
    assert!(!result.steps.is_empty());
    assert!(result.peak_risk <= 100);

    // Same inputs, same outcome
    let again = simulate("whale_dump", &SimulationParams::with_amount(1_000_000.0)).unwrap();
    assert_eq!(result.peak_risk, again.peak_risk);
    assert_eq!(result.steps.len(), again.steps.len());

    let err = simulate("alien_invasion", &SimulationParams::default()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::InvalidInput);
}

#[tokio::test]
async fn test_late_subscriber_gets_no_replay() {
    let engine = engine();
    let missed = engine
        .process(Transaction::transfer("EARLY", "EARLY", 1_000_000.0).with_kind(TxKind::ContractCall))
        .await
        .unwrap();
    assert_eq!(missed.risk_level, RiskLevel::Critical);

    let late = engine.hub().subscribe().unwrap();
    assert!(matches!(
        decode(&late.recv().await.unwrap()),
        StreamMessage::Connection { .. }
    ));
    // The CRITICAL record went out before the subscriber existed
    assert!(late.try_recv().is_none());
    assert_eq!(engine.hub().stats().subscribers, 1);
}

#[tokio::test]
async fn test_saturated_subscriber_never_blocks_others() {
    let hub = FanoutHub::new(HubConfig {
        subscriber_queue: 4,
        max_subscribers: 8,
        overflow: OverflowPolicy::DropSubscriber,
    });
    let stalled = hub.subscribe().unwrap();
    let healthy = hub.subscribe().unwrap();

    let engine = engine();
    let record = engine
        .process(Transaction::transfer("A", "B", 1_000.0))
        .await
        .unwrap();

    let started = Instant::now();
    for _ in 0..50 {
        hub.broadcast_record(record.clone()).unwrap();
        while healthy.try_recv().is_some() {}
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    assert!(stalled.is_closed());
    assert!(!healthy.is_closed());
    assert_eq!(hub.subscriber_count(), 1);
}

#[tokio::test]
async fn test_cooldown_suppresses_burst() {
    let dispatcher = AutomationDispatcher::start(
        DispatchConfig {
            webhook_url: Some("http://localhost:5678/webhook/aegis".to_string()),
            shutdown_grace: Duration::from_millis(100),
            ..DispatchConfig::default()
        },
        Arc::new(NoopWebhook::default()),
    );
    let condition = TriggerCondition::CriticalVerdict(AttackType::WhaleDump);
    let now = Instant::now();

    let mut queued = 0;
    for i in 0..25 {
        let at = now + Duration::from_millis(i * 100);
        if let AutoDispatch::Queued(_) = dispatcher.notify_auto(condition, ManualPreset::Whale.event(), at) {
            queued += 1;
        }
    }
    assert_eq!(queued, 1);
    assert_eq!(dispatcher.stats().suppressed, 24);
    dispatcher.shutdown().await;
}
