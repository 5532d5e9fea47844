//! Event pipeline
//!
//! Single producer loop: every transaction is scored, folded into the threat
//! level and forecast, explained, optionally dispatched and then broadcast.
//! Records are broadcast in processing order.
//!
//! ```text
//! feed ─► [threat lock: evaluate → context → score → observe → snapshot]
//!       ─► activity / wallet graph / forecast ─► explanation ─► automation ─► sentiment
//!       ─► market intel ─► fan-out ─► telemetry
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::core::activity::WalletActivity;
use crate::core::automation::{
    AutomationDispatcher, AutomationEvent, DispatchOutcome, DispatchStatsSnapshot, ManualPreset,
    TriggerCondition,
};
use crate::core::fanout::{FanoutHub, HubStats};
use crate::core::forecast::{ForecastEngine, ForecastResult, Horizon};
use crate::core::market_intel::{network_sentiment, MarketIntel};
use crate::core::risk_score::RiskScorer;
use crate::core::simulator::{self, RecommendationSource, SimulationParams, SimulationResult};
use crate::core::threat_level::{LevelTransition, ThreatLevelEngine, ThreatState};
use crate::core::wallet_graph::{WalletGraph, WalletGraphView, WalletProfile};
use crate::models::{
    ActiveDefense, AegisConfig, AppError, AppResult, EnrichedRecord, ResponseProtocol, RiskLevel,
    RiskVerdict, SentimentAnalysis, Transaction,
};
use crate::providers::inference::{explain_or_fallback, ExplainContext, InferenceClient};
use crate::providers::webhook::WebhookClient;
use crate::utils::cache::CacheStats;
use crate::utils::constants::STATS_LOG_INTERVAL_SECS;
use crate::utils::telemetry::{TelemetryCollector, TelemetryStats};

/// Body of a manual automation trigger
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerRequest {
    /// Falls back to the configured endpoint
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// WHALE | RUG | FLASH
    #[serde(default)]
    pub scenario_type: Option<String>,
    /// Free-form alert text, used when no preset is given
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub risk_score: Option<u8>,
}

#[derive(Debug, Default)]
struct PipelineCounters {
    received: AtomicU64,
    processed: AtomicU64,
    rejected: AtomicU64,
    broadcast_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub received: u64,
    pub processed: u64,
    pub rejected: u64,
    pub broadcast_failures: u64,
}

/// Everything `GET /api/stats` reports
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub uptime_secs: u64,
    pub pipeline: PipelineStats,
    pub telemetry: TelemetryStats,
    pub subscribers: HubStats,
    pub automation: DispatchStatsSnapshot,
    pub forecast_keys: CacheStats,
    pub wallet_activity: CacheStats,
    pub wallet_graph: CacheStats,
}

/// Owns every stateful component of the risk pipeline
pub struct AegisEngine {
    scorer: RiskScorer,
    activity: WalletActivity,
    threat: Mutex<ThreatLevelEngine>,
    forecast: ForecastEngine,
    dispatcher: AutomationDispatcher,
    hub: FanoutHub,
    market: MarketIntel,
    graph: WalletGraph,
    inference: Arc<dyn InferenceClient>,
    inference_timeout: Duration,
    telemetry: Arc<TelemetryCollector>,
    counters: PipelineCounters,
    started_at: Instant,
}

impl AegisEngine {
    /// Must be called inside a tokio runtime (spawns the dispatcher workers)
    pub fn new(
        config: &AegisConfig,
        inference: Arc<dyn InferenceClient>,
        webhook: Arc<dyn WebhookClient>,
        telemetry: Arc<TelemetryCollector>,
    ) -> Self {
        info!(
            inference = inference.name(),
            webhook = webhook.name(),
            "🛡️ Initializing AEGIS engine"
        );
        Self {
            scorer: RiskScorer::new(config.scorer.clone()),
            activity: WalletActivity::new(config.scorer.clone()),
            threat: Mutex::new(ThreatLevelEngine::new()),
            forecast: ForecastEngine::new(config.forecast.clone()),
            dispatcher: AutomationDispatcher::start(config.dispatch.clone(), webhook),
            hub: FanoutHub::new(config.hub.clone()),
            market: MarketIntel::default(),
            graph: WalletGraph::default(),
            inference,
            inference_timeout: config.inference.timeout,
            telemetry,
            counters: PipelineCounters::default(),
            started_at: Instant::now(),
        }
    }

    fn lock_threat(&self) -> AppResult<MutexGuard<'_, ThreatLevelEngine>> {
        self.threat
            .lock()
            .map_err(|_| AppError::torn_snapshot("threat level lock poisoned"))
    }

    pub fn hub(&self) -> &FanoutHub {
        &self.hub
    }

    pub fn market(&self) -> &MarketIntel {
        &self.market
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Process one transaction end to end and return the broadcast record
    pub async fn process(&self, tx: Transaction) -> AppResult<EnrichedRecord> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = validate_transaction(&tx) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        let started = Instant::now();
        let now = started;

        // Scoring reads the threshold and the verdict feeds the level in one critical section
        let (verdict, decay, escalation, defcon) = {
            let mut threat = self.lock_threat()?;
            let decay = threat.evaluate(now);
            let threshold = threat.level().alert_threshold();
            let ctx = self.activity.context_for(&tx, now, threshold);
            let verdict = self.scorer.score(&tx, &ctx);
            let escalation = threat.observe(verdict.level, now);
            (verdict, decay, escalation, threat.snapshot_at(now))
        };
        defcon.validate()?;
        log_transition(decay);
        log_transition(escalation);

        self.activity.record(&tx, now);
        self.graph.record(&tx, verdict.score, now);
        self.forecast.observe(&tx.source_wallet, verdict.score, now)?;
        let prediction = self.forecast.forecast(Horizon::ShortTerm, None, now)?;

        let explanation = self.explain_verdict(&tx, &verdict).await;
        let active_defense = self.auto_dispatch(&verdict, &explanation, escalation, now);
        let sentiment = self.sentiment_for(&defcon)?;

        let record = EnrichedRecord {
            risk_score: verdict.score,
            risk_level: verdict.level,
            threat_type: verdict.attack_type,
            action: verdict.action,
            explanation: Some(explanation),
            risk_factors: verdict.factors,
            prediction: Some(prediction),
            defcon_status: defcon,
            sentiment_analysis: Some(sentiment),
            active_defense,
            transaction: tx,
        };

        self.market.ingest(&record, Utc::now());

        match self.hub.broadcast_record(record.clone()) {
            Ok(report) => {
                self.telemetry.record_broadcast();
                debug!(
                    delivered = report.delivered,
                    evicted = report.evicted,
                    "📡 Record broadcast"
                );
            }
            Err(e) => {
                self.counters.broadcast_failures.fetch_add(1, Ordering::Relaxed);
                warn!(code = e.code_str(), error = %e, "⚠️ Broadcast failed");
            }
        }

        let latency_us = started.elapsed().as_micros() as u64;
        self.telemetry.record_verdict(&record, latency_us);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        if record.risk_level.is_attack() {
            info!(
                level = record.risk_level.as_str(),
                score = record.risk_score,
                attack = record.threat_type.as_str(),
                token = %record.transaction.token,
                defcon = record.defcon_status.defcon_level.as_u8(),
                "{} Threat detected",
                record.risk_level.emoji()
            );
        }

        Ok(record)
    }

    /// Inference only for MEDIUM and above; the templated text otherwise or on failure
    async fn explain_verdict(&self, tx: &Transaction, verdict: &RiskVerdict) -> String {
        if verdict.level < RiskLevel::Medium {
            return verdict.explanation.clone();
        }
        let factors = verdict
            .factors
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let context = ExplainContext {
            subject: "transaction",
            facts: format!(
                "score={} level={} attack={} amount={} token={} kind={} factors=[{}]",
                verdict.score,
                verdict.level.as_str(),
                verdict.attack_type.as_str(),
                tx.amount,
                tx.token,
                tx.kind.as_str(),
                factors
            ),
        };
        let (text, _) = explain_or_fallback(
            self.inference.as_ref(),
            &context,
            self.inference_timeout,
            verdict.explanation.clone(),
        )
        .await;
        text
    }

    fn auto_dispatch(
        &self,
        verdict: &RiskVerdict,
        explanation: &str,
        escalation: Option<LevelTransition>,
        now: Instant,
    ) -> Option<ActiveDefense> {
        let mut defense = None;

        if verdict.level == RiskLevel::Critical {
            let condition = TriggerCondition::CriticalVerdict(verdict.attack_type);
            let event = AutomationEvent {
                risk_score: verdict.score,
                risk_level: verdict.level,
                explanation: explanation.to_string(),
                action: verdict.action,
                title: format!("{} Detected", verdict.attack_type.as_str()),
            };
            let outcome = self.dispatcher.notify_auto(condition, event, now);
            defense = Some(ActiveDefense {
                protocol: verdict.action,
                condition: condition.to_string(),
                status: outcome.as_str().to_string(),
                dispatch_id: outcome.dispatch_id(),
            });
        }

        if let Some(transition) = escalation.filter(|t| t.is_escalation() && t.to.is_severe()) {
            let level = transition.to;
            let condition = TriggerCondition::DefconEscalation(level);
            let event = AutomationEvent {
                risk_score: verdict.score,
                risk_level: verdict.level,
                explanation: format!(
                    "Threat level escalated from DEFCON {} to DEFCON {} ({})",
                    transition.from.as_u8(),
                    level.as_u8(),
                    level.status_label()
                ),
                action: ResponseProtocol::TriggerCircuitBreaker,
                title: format!("DEFCON {} {}", level.as_u8(), level.status_label()),
            };
            let outcome = self.dispatcher.notify_auto(condition, event, now);
            if defense.is_none() {
                defense = Some(ActiveDefense {
                    protocol: ResponseProtocol::TriggerCircuitBreaker,
                    condition: condition.to_string(),
                    status: outcome.as_str().to_string(),
                    dispatch_id: outcome.dispatch_id(),
                });
            }
        }

        defense
    }

    fn sentiment_for(&self, defcon: &ThreatState) -> AppResult<SentimentAnalysis> {
        Ok(network_sentiment(self.forecast.global_ema()?, defcon.defcon_level))
    }

    /// Consume transactions until the channel closes or shutdown is signalled
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Transaction>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("🚀 Pipeline producer started");
        let mut maintenance = tokio::time::interval(Duration::from_secs(STATS_LOG_INTERVAL_SECS));
        maintenance.tick().await;

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("🛑 Pipeline producer stopping");
                        break;
                    }
                }
                maybe_tx = rx.recv() => {
                    let Some(tx) = maybe_tx else {
                        info!("📭 Event feed closed");
                        break;
                    };
                    if let Err(e) = self.process(tx).await {
                        warn!(code = e.code_str(), error = %e, "⚠️ Transaction not processed");
                    }
                }
                _ = maintenance.tick() => self.maintenance(Instant::now()),
            }
        }
    }

    /// Expire idle per-wallet state and log a stats line
    pub fn maintenance(&self, now: Instant) {
        let activity = self.activity.cleanup_expired(now);
        let forecast = self.forecast.cleanup_expired(now);
        let graph = self.graph.cleanup_expired(now);
        let tokens = self.market.cleanup_stale(Utc::now());
        if let Ok(mut threat) = self.lock_threat() {
            log_transition(threat.evaluate(now));
        }

        let p = self.pipeline_stats();
        let t = self.telemetry.get_stats();
        info!(
            processed = p.processed,
            rejected = p.rejected,
            threats = t.total_threats,
            subscribers = self.hub.subscriber_count(),
            expired = activity + forecast + graph + tokens,
            avg_latency_ms = format!("{:.3}", t.avg_latency_ms),
            "📊 Stats"
        );
    }

    // ============================================
    // QUERY / COMMAND SURFACE
    // ============================================

    /// Current threat state, decayed to now
    pub fn threat_status(&self) -> AppResult<ThreatState> {
        let now = Instant::now();
        let state = {
            let mut threat = self.lock_threat()?;
            log_transition(threat.evaluate(now));
            threat.snapshot_at(now)
        };
        state.validate()?;
        Ok(state)
    }

    pub fn forecast(&self, horizon: &str, wallet: Option<&str>) -> AppResult<ForecastResult> {
        let horizon: Horizon = horizon.parse()?;
        self.forecast.forecast(horizon, wallet, Instant::now())
    }

    pub fn network_emotion(&self) -> AppResult<SentimentAnalysis> {
        let state = self.threat_status()?;
        self.sentiment_for(&state)
    }

    /// Run a scenario; the recommendation is upgraded by inference when available
    pub async fn simulate(
        &self,
        scenario_type: &str,
        params: &SimulationParams,
    ) -> AppResult<SimulationResult> {
        let mut result = simulator::simulate(scenario_type, params)?;

        let context = ExplainContext {
            subject: "simulation",
            facts: format!(
                "scenario={} token={} amount={} peak_risk={} impact={} estimated_loss={}",
                result.scenario.as_str(),
                result.token,
                result.amount,
                result.peak_risk,
                result.estimated_impact,
                result.estimated_loss
            ),
        };
        let (text, used) = explain_or_fallback(
            self.inference.as_ref(),
            &context,
            self.inference_timeout,
            result.recommendation.clone(),
        )
        .await;
        if used {
            result.recommendation = text;
            result.recommendation_source = RecommendationSource::Inference;
        }

        info!(
            simulation_id = %result.simulation_id,
            scenario = result.scenario.as_str(),
            peak = result.peak_risk,
            impact = %result.estimated_impact,
            "🧪 Simulation complete"
        );
        Ok(result)
    }

    /// Manual trigger: preset or free message, bypasses the cool-down
    pub async fn trigger_automation(&self, request: TriggerRequest) -> AppResult<DispatchOutcome> {
        let event = match request.scenario_type.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(preset) => preset.parse::<ManualPreset>()?.event(),
            None => {
                let message = request
                    .message
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .ok_or_else(|| {
                        AppError::bad_request("either scenario_type or message is required")
                    })?;
                let score = request.risk_score.unwrap_or(90).min(100);
                let level = RiskLevel::classify(score, self.threat_status()?.alert_threshold);
                AutomationEvent {
                    risk_score: score,
                    risk_level: level,
                    explanation: message.to_string(),
                    action: ResponseProtocol::for_level(level),
                    title: "Manual Alert".to_string(),
                }
            }
        };

        let url = match request.webhook_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => url,
            None => self
                .dispatcher
                .endpoint()
                .map(str::to_string)
                .ok_or_else(|| AppError::bad_request("webhook_url is required"))?,
        };

        self.dispatcher.trigger_manual(&url, event).await
    }

    pub fn wallet_graph(&self, max_nodes: usize) -> WalletGraphView {
        self.graph.graph(max_nodes, Instant::now())
    }

    pub fn wallet_profile(&self, wallet_id: &str) -> AppResult<WalletProfile> {
        self.graph
            .wallet(wallet_id, Instant::now())
            .ok_or_else(|| AppError::not_found(format!("Wallet {} has no recorded activity", wallet_id)))
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        PipelineStats {
            received: self.counters.received.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            broadcast_failures: self.counters.broadcast_failures.load(Ordering::Relaxed),
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            uptime_secs: self.uptime().as_secs(),
            pipeline: self.pipeline_stats(),
            telemetry: self.telemetry.get_stats(),
            subscribers: self.hub.stats(),
            automation: self.dispatcher.stats(),
            forecast_keys: self.forecast.stats(),
            wallet_activity: self.activity.stats(),
            wallet_graph: self.graph.stats(),
        }
    }

    /// Drain the dispatcher and disconnect subscribers
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        self.hub.close_all();
        info!("✅ Engine stopped");
    }
}

fn validate_transaction(tx: &Transaction) -> AppResult<()> {
    if tx.source_wallet.trim().is_empty() || tx.dest_wallet.trim().is_empty() {
        return Err(AppError::bad_request("transaction wallets must not be empty"));
    }
    if !tx.amount.is_finite() || tx.amount < 0.0 {
        return Err(AppError::bad_request(format!(
            "transaction amount must be a non-negative number, got {}",
            tx.amount
        )));
    }
    Ok(())
}

fn log_transition(transition: Option<LevelTransition>) {
    let Some(t) = transition else { return };
    if t.is_escalation() {
        warn!(
            from = t.from.as_u8(),
            to = t.to.as_u8(),
            status = t.to.status_label(),
            "🚨 DEFCON escalated"
        );
    } else {
        info!(
            from = t.from.as_u8(),
            to = t.to.as_u8(),
            status = t.to.status_label(),
            "🟢 DEFCON relaxed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::threat_level::DefconLevel;
    use crate::core::automation::WebhookPayload;
    use crate::models::{AttackType, ErrorCategory, StreamMessage, TxKind};
    use crate::providers::inference::NoopInference;
    use crate::providers::webhook::NoopWebhook;
    use async_trait::async_trait;

    const HOOK: &str = "http://localhost:5678/webhook/aegis";

    /// Remembers the trigger of every delivered payload
    #[derive(Default)]
    struct CountingWebhook {
        triggers: Mutex<Vec<String>>,
    }

    impl CountingWebhook {
        fn triggers(&self) -> Vec<String> {
            self.triggers.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WebhookClient for CountingWebhook {
        async fn deliver(&self, payload: &WebhookPayload, _url: &str) -> AppResult<u16> {
            self.triggers.lock().unwrap().push(payload.trigger.clone());
            Ok(200)
        }
    }

    fn engine_with(webhook_url: Option<&str>, webhook: Arc<dyn WebhookClient>) -> AegisEngine {
        let mut config = AegisConfig::default();
        config.dispatch.webhook_url = webhook_url.map(str::to_string);
        config.inference.timeout = Duration::from_millis(50);
        let dir = std::env::temp_dir().join(format!("aegis_pipeline_{}", uuid::Uuid::new_v4()));
        AegisEngine::new(
            &config,
            Arc::new(NoopInference),
            webhook,
            Arc::new(TelemetryCollector::with_config(dir, 1000)),
        )
    }

    fn engine(webhook_url: Option<&str>) -> AegisEngine {
        engine_with(webhook_url, Arc::new(NoopWebhook::default()))
    }

    /// Self-transfer contract call of a whale amount: always CRITICAL wash trading
    fn critical_tx(wallet: &str) -> Transaction {
        Transaction::transfer(wallet, wallet, 1_000_000.0).with_kind(TxKind::ContractCall)
    }

    async fn wait_for_deliveries(webhook: &CountingWebhook, expected: usize) -> Vec<String> {
        for _ in 0..200 {
            let triggers = webhook.triggers();
            if triggers.len() >= expected {
                return triggers;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        webhook.triggers()
    }

    #[tokio::test]
    async fn test_whale_record_is_broadcast() {
        let engine = engine(None);
        let sub = engine.hub().subscribe().unwrap();
        let _greeting = sub.recv().await.unwrap();

        let record = engine
            .process(Transaction::transfer("W1", "W2", 1_000_000.0))
            .await
            .unwrap();
        assert_eq!(record.risk_level, RiskLevel::High);
        assert_eq!(record.threat_type, AttackType::WhaleDump);
        assert!(record.prediction.is_some());
        assert!(record.sentiment_analysis.is_some());

        let raw = sub.recv().await.unwrap();
        let msg: StreamMessage = serde_json::from_str(&raw).unwrap();
        match msg {
            StreamMessage::TransactionAnalysis { data } => assert_eq!(data.risk_score, record.risk_score),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attacks_escalate_threat_level() {
        let engine = engine(None);
        for i in 0..5 {
            engine
                .process(Transaction::transfer(format!("W{}", i), "X", 1_000_000.0))
                .await
                .unwrap();
        }
        let state = engine.threat_status().unwrap();
        assert_eq!(state.defcon_level, DefconLevel::Two);
        assert_eq!(state.alert_threshold, 60.0);
    }

    #[tokio::test]
    async fn test_critical_verdict_queues_notification() {
        let webhook = Arc::new(CountingWebhook::default());
        let engine = engine_with(Some(HOOK), webhook.clone());

        let record = engine.process(critical_tx("W")).await.unwrap();
        assert_eq!(record.risk_level, RiskLevel::Critical);
        assert_eq!(record.threat_type, AttackType::WashTrading);
        let defense = record.active_defense.unwrap();
        assert_eq!(defense.status, "queued");
        assert_eq!(defense.condition, "critical_verdict:WASH_TRADING");
        assert!(defense.dispatch_id.is_some());

        let triggers = wait_for_deliveries(&webhook, 1).await;
        assert_eq!(triggers, vec!["critical_verdict:WASH_TRADING"]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_severe_escalations_queue_notifications() {
        let webhook = Arc::new(CountingWebhook::default());
        let engine = engine_with(Some(HOOK), webhook.clone());

        let mut records = Vec::new();
        for i in 0..10 {
            let record = engine
                .process(Transaction::transfer(format!("W{}", i), format!("X{}", i), 1_000_000.0))
                .await
                .unwrap();
            assert_eq!(record.risk_level, RiskLevel::High);
            records.push(record);
        }

        // Fifth attack reaches DEFCON 2, tenth reaches DEFCON 1
        let defense = records[4].active_defense.as_ref().unwrap();
        assert_eq!(defense.condition, "defcon_escalation:2");
        assert_eq!(defense.status, "queued");
        let defense = records[9].active_defense.as_ref().unwrap();
        assert_eq!(defense.condition, "defcon_escalation:1");
        assert_eq!(defense.status, "queued");

        // Escalations to DEFCON 4 and 3 are not severe enough to notify
        let notified = records.iter().filter(|r| r.active_defense.is_some()).count();
        assert_eq!(notified, 2);
        assert_eq!(engine.dispatcher.stats().queued, 2);

        let mut triggers = wait_for_deliveries(&webhook, 2).await;
        triggers.sort();
        assert_eq!(triggers, vec!["defcon_escalation:1", "defcon_escalation:2"]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_critical_burst_is_suppressed_by_cooldown() {
        let webhook = Arc::new(CountingWebhook::default());
        let engine = engine_with(Some(HOOK), webhook.clone());

        let mut statuses = Vec::new();
        for _ in 0..8 {
            let record = engine.process(critical_tx("W")).await.unwrap();
            assert_eq!(record.risk_level, RiskLevel::Critical);
            statuses.push(record.active_defense.unwrap().status);
        }
        assert_eq!(statuses[0], "queued");
        assert!(statuses[1..].iter().all(|s| s == "suppressed"));
        assert_eq!(engine.dispatcher.stats().suppressed, 7);

        // One verdict notification plus the DEFCON 2 escalation on the fifth attack
        let mut triggers = wait_for_deliveries(&webhook, 2).await;
        triggers.sort();
        assert_eq!(
            triggers,
            vec!["critical_verdict:WASH_TRADING", "defcon_escalation:2"]
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_wallet_graph_follows_processed_records() {
        let engine = engine(None);
        engine
            .process(Transaction::transfer("WHALE", "POOL", 1_000_000.0))
            .await
            .unwrap();
        engine
            .process(Transaction::transfer("SMALL", "POOL", 10.0))
            .await
            .unwrap();

        let view = engine.wallet_graph(50);
        assert_eq!(view.tracked_wallets, 3);
        assert_eq!(view.nodes[0].id, "WHALE");
        assert_eq!(view.links.len(), 2);

        let whale = engine.wallet_profile("WHALE").unwrap();
        assert_eq!(whale.risk_score, 80);
        assert_eq!(whale.counterparties, vec!["POOL"]);
        let err = engine.wallet_profile("NOBODY").unwrap_err();
        assert_eq!(err.code.http_status(), 404);
        assert_eq!(engine.stats().wallet_graph.entries, 3);
    }

    #[tokio::test]
    async fn test_rejects_bad_transaction() {
        let engine = engine(None);
        let err = engine
            .process(Transaction::transfer("A", "B", f64::NAN))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
        assert_eq!(engine.pipeline_stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_trigger_requires_preset_or_message() {
        let engine = engine(Some("http://localhost:5678/webhook/aegis"));
        let err = engine
            .trigger_automation(TriggerRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);

        let err = engine
            .trigger_automation(TriggerRequest {
                scenario_type: Some("METEOR".to_string()),
                ..TriggerRequest::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
    }

    #[tokio::test]
    async fn test_trigger_preset_delivers() {
        let engine = engine(Some("http://localhost:5678/webhook/aegis"));
        let outcome = engine
            .trigger_automation(TriggerRequest {
                scenario_type: Some("rug".to_string()),
                ..TriggerRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.http_status, Some(202));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_simulate_falls_back_to_template() {
        let engine = engine(None);
        let result = engine
            .simulate("whale_dump", &SimulationParams::with_amount(1_000_000.0))
            .await
            .unwrap();
        assert_eq!(result.recommendation_source, RecommendationSource::Template);
        assert_eq!(result.estimated_impact, "Critical");

        let err = engine
            .simulate("unknown_scenario", &SimulationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "SIM_INVALID_SCENARIO");
    }
}
