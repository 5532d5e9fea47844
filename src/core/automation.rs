//! Automation Dispatcher
//!
//! Fire-and-forget outbound notifications. The hot path only performs a
//! non-blocking `try_send` into a bounded queue; a worker loop drains it with
//! at most `workers` deliveries in flight. Automatic notifications are
//! rate-limited by a per-condition cool-down; manual triggers bypass it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::threat_level::DefconLevel;
use crate::models::{
    AppError, AppResult, AttackType, DispatchConfig, ErrorCode, ResponseProtocol, RiskLevel,
};
use crate::providers::webhook::WebhookClient;
use crate::utils::constants::DISPATCH_RETRY_BASE_MS;

/// Condition an automatic notification is keyed on for cool-down purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerCondition {
    /// A verdict reached CRITICAL
    CriticalVerdict(AttackType),
    /// The threat level entered one of its two most severe states
    DefconEscalation(DefconLevel),
}

impl fmt::Display for TriggerCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerCondition::CriticalVerdict(kind) => write!(f, "critical_verdict:{}", kind.as_str()),
            TriggerCondition::DefconEscalation(level) => write!(f, "defcon_escalation:{}", level.as_u8()),
        }
    }
}

/// What gets notified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationEvent {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub explanation: String,
    pub action: ResponseProtocol,
    /// Short headline, e.g. "Whale Dump Detected"
    pub title: String,
}

/// Body posted to the workflow endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub dispatch_id: Uuid,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    #[serde(rename = "type")]
    pub event_type: String,
    pub analysis: String,
    pub protocol: ResponseProtocol,
    pub trigger: String,
    pub timestamp: DateTime<Utc>,
}

impl WebhookPayload {
    fn new(id: Uuid, event: AutomationEvent, trigger: String) -> Self {
        Self {
            dispatch_id: id,
            risk_score: event.risk_score,
            risk_level: event.risk_level,
            event_type: event.title,
            analysis: event.explanation,
            protocol: event.action,
            trigger,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Delivered,
    Failed,
    TimedOut,
}

/// Result of one delivery, never an error for the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub dispatch_id: Uuid,
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub attempts: u32,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

/// What an automatic notify request turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoDispatch {
    Queued(Uuid),
    /// Same condition fired inside the cool-down window
    Suppressed,
    /// Dispatch queue full, notification dropped
    QueueFull,
    /// No endpoint configured
    Disabled,
    /// Dispatcher is shutting down
    Closed,
}

impl AutoDispatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoDispatch::Queued(_) => "queued",
            AutoDispatch::Suppressed => "suppressed",
            AutoDispatch::QueueFull => "queue_full",
            AutoDispatch::Disabled => "disabled",
            AutoDispatch::Closed => "closed",
        }
    }

    pub fn dispatch_id(&self) -> Option<Uuid> {
        match self {
            AutoDispatch::Queued(id) => Some(*id),
            _ => None,
        }
    }
}

/// Fixed manual-trigger presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualPreset {
    Whale,
    Rug,
    Flash,
}

impl ManualPreset {
    pub fn title(&self) -> &'static str {
        match self {
            ManualPreset::Whale => "Whale Dump Detected",
            ManualPreset::Rug => "Rug Pull Initiated",
            ManualPreset::Flash => "Flash Loan Exploit",
        }
    }

    pub fn event(&self) -> AutomationEvent {
        let (score, message) = match self {
            ManualPreset::Whale => (
                92,
                "Massive sell wall detected. Single wallet dumping a large position.",
            ),
            ManualPreset::Rug => (
                99,
                "CRITICAL: Deployer wallet removing 100% liquidity via unauthorized function call.",
            ),
            ManualPreset::Flash => (
                95,
                "Abnormal liquidity withdrawal detected. Re-entrancy pattern identified.",
            ),
        };
        AutomationEvent {
            risk_score: score,
            risk_level: RiskLevel::Critical,
            explanation: message.to_string(),
            action: ResponseProtocol::TriggerCircuitBreaker,
            title: self.title().to_string(),
        }
    }
}

impl FromStr for ManualPreset {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WHALE" => Ok(ManualPreset::Whale),
            "RUG" => Ok(ManualPreset::Rug),
            "FLASH" => Ok(ManualPreset::Flash),
            _ => Err(AppError::bad_request(format!(
                "Unknown scenario_type preset: {} (expected WHALE, RUG or FLASH)",
                s
            ))),
        }
    }
}

/// Only absolute http(s) URLs are accepted
pub fn validate_webhook_url(url: &str) -> AppResult<reqwest::Url> {
    let parsed = reqwest::Url::parse(url.trim()).map_err(|_| AppError::invalid_webhook_url(url))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(AppError::invalid_webhook_url(url)),
    }
}

/// Dispatcher counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub queued: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    pub suppressed: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchStatsSnapshot {
    pub queued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub suppressed: u64,
    pub dropped: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct DispatchJob {
    payload: WebhookPayload,
    url: String,
    reply: Option<oneshot::Sender<DispatchOutcome>>,
}

pub struct AutomationDispatcher {
    config: DispatchConfig,
    queue: mpsc::Sender<DispatchJob>,
    cooldowns: Mutex<HashMap<TriggerCondition, Instant>>,
    stats: Arc<DispatchStats>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AutomationDispatcher {
    /// Spawn the worker loop. Must be called inside a tokio runtime.
    pub fn start(config: DispatchConfig, webhook: Arc<dyn WebhookClient>) -> Self {
        let (queue, rx) = mpsc::channel(config.queue_size.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(DispatchStats::default());

        let worker = tokio::spawn(run_workers(
            rx,
            webhook,
            config.clone(),
            stats.clone(),
            shutdown_rx,
        ));

        info!(
            workers = config.workers,
            queue = config.queue_size,
            cooldown_secs = config.cooldown.as_secs(),
            retries = config.retries,
            "🤖 Automation dispatcher started"
        );

        Self {
            config,
            queue,
            cooldowns: Mutex::new(HashMap::new()),
            stats,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn has_endpoint(&self) -> bool {
        self.config.webhook_url.is_some()
    }

    /// Configured endpoint for automatic notifications
    pub fn endpoint(&self) -> Option<&str> {
        self.config.webhook_url.as_deref()
    }

    /// Claim the cool-down slot for `condition`. False when still cooling down.
    fn check_cooldown(&self, condition: TriggerCondition, now: Instant) -> bool {
        // A poisoned map only loses cool-down bookkeeping
        let mut map = self.cooldowns.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(prev) = map.get(&condition) {
            if now.saturating_duration_since(*prev) < self.config.cooldown {
                return false;
            }
        }
        map.insert(condition, now);
        true
    }

    fn release_cooldown(&self, condition: TriggerCondition, claimed_at: Instant) {
        let mut map = self.cooldowns.lock().unwrap_or_else(|p| p.into_inner());
        if map.get(&condition) == Some(&claimed_at) {
            map.remove(&condition);
        }
    }

    /// Automatic notification. Never blocks and never fails the caller.
    pub fn notify_auto(
        &self,
        condition: TriggerCondition,
        event: AutomationEvent,
        now: Instant,
    ) -> AutoDispatch {
        let Some(url) = self.config.webhook_url.clone() else {
            return AutoDispatch::Disabled;
        };
        if *self.shutdown_tx.borrow() {
            return AutoDispatch::Closed;
        }
        if !self.check_cooldown(condition, now) {
            self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            debug!(%condition, "⏳ Automation suppressed (cool-down)");
            return AutoDispatch::Suppressed;
        }

        let id = Uuid::new_v4();
        let job = DispatchJob {
            payload: WebhookPayload::new(id, event, condition.to_string()),
            url,
            reply: None,
        };
        match self.queue.try_send(job) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                info!(%condition, dispatch_id = %id, "🚨 Automation queued");
                AutoDispatch::Queued(id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.release_cooldown(condition, now);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%condition, "⚠️ Automation queue full, notification dropped");
                AutoDispatch::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => AutoDispatch::Closed,
        }
    }

    /// Explicit trigger: validates the URL, bypasses cool-down and waits for the outcome
    pub async fn trigger_manual(&self, webhook_url: &str, event: AutomationEvent) -> AppResult<DispatchOutcome> {
        let url = validate_webhook_url(webhook_url)?;
        if *self.shutdown_tx.borrow() {
            return Err(AppError::shutting_down("automation dispatcher"));
        }

        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = DispatchJob {
            payload: WebhookPayload::new(id, event, "manual".to_string()),
            url: url.to_string(),
            reply: Some(reply_tx),
        };
        self.queue.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                AppError::new(ErrorCode::DispatchQueueFull, "Automation queue is full")
            }
            mpsc::error::TrySendError::Closed(_) => AppError::shutting_down("automation dispatcher"),
        })?;
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        info!(dispatch_id = %id, endpoint = %url, "🖐️ Manual automation queued");

        reply_rx
            .await
            .map_err(|_| AppError::shutting_down("automation dispatcher"))
    }

    /// Stop accepting work, give in-flight deliveries the configured grace, then cancel them
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "❌ Automation worker ended abnormally");
            }
        }
    }
}

/// Worker loop: bounded in-flight deliveries, exits on the shutdown signal
async fn run_workers(
    mut rx: mpsc::Receiver<DispatchJob>,
    webhook: Arc<dyn WebhookClient>,
    config: DispatchConfig,
    stats: Arc<DispatchStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let workers = config.workers.max(1);
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("❌ Automation delivery panicked");
                    }
                }
            }
            job = rx.recv(), if in_flight.len() < workers => {
                let Some(job) = job else { break };
                let webhook = webhook.clone();
                let stats = stats.clone();
                let timeout = config.timeout;
                let retries = config.retries;
                in_flight.spawn(async move {
                    let DispatchJob { payload, url, reply } = job;
                    let outcome = execute(webhook.as_ref(), &payload, &url, timeout, retries).await;
                    record_outcome(&stats, &outcome);
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                });
            }
        }
    }

    // Queued but unstarted jobs are dropped with the receiver
    rx.close();
    let pending = in_flight.len();
    if pending > 0 {
        info!(pending, grace_ms = config.shutdown_grace.as_millis() as u64, "⏳ Draining in-flight automation");
        let drain = async { while in_flight.join_next().await.is_some() {} };
        if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
            warn!(remaining = in_flight.len(), "⚠️ Grace period elapsed, cancelling automation calls");
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    }
    info!("🛑 Automation dispatcher stopped");
}

fn record_outcome(stats: &DispatchStats, outcome: &DispatchOutcome) {
    let counter = match outcome.status {
        DispatchStatus::Delivered => &stats.delivered,
        DispatchStatus::Failed => &stats.failed,
        DispatchStatus::TimedOut => &stats.timed_out,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// One delivery with a bounded timeout and optional retries of retryable failures
async fn execute(
    webhook: &dyn WebhookClient,
    payload: &WebhookPayload,
    url: &str,
    timeout: Duration,
    retries: u32,
) -> DispatchOutcome {
    let start = Instant::now();
    let mut attempts = 0u32;

    let (status, http_status, detail) = loop {
        attempts += 1;
        let err = match tokio::time::timeout(timeout, webhook.deliver(payload, url)).await {
            Ok(Ok(code)) if (200..300).contains(&code) => {
                break (DispatchStatus::Delivered, Some(code), None);
            }
            Ok(Ok(code)) => {
                break (
                    DispatchStatus::Failed,
                    Some(code),
                    Some(format!("endpoint returned HTTP {}", code)),
                );
            }
            Ok(Err(e)) => e,
            Err(_) => AppError::webhook_timeout(timeout.as_millis() as u64),
        };

        if attempts <= retries && err.code.is_retryable() {
            let backoff = DISPATCH_RETRY_BASE_MS.saturating_mul(1u64 << (attempts - 1).min(6));
            debug!(attempts, backoff_ms = backoff, code = err.code_str(), "🔄 Retrying automation");
            tokio::time::sleep(Duration::from_millis(backoff)).await;
            continue;
        }

        let status = if matches!(err.code, ErrorCode::WebhookTimeout) {
            DispatchStatus::TimedOut
        } else {
            DispatchStatus::Failed
        };
        break (status, None, Some(err.to_string()));
    };

    let latency_ms = start.elapsed().as_millis() as u64;
    match status {
        DispatchStatus::Delivered => {
            info!(dispatch_id = %payload.dispatch_id, latency_ms, "✅ Automation delivered")
        }
        _ => warn!(
            dispatch_id = %payload.dispatch_id,
            status = ?status,
            detail = detail.as_deref().unwrap_or(""),
            "⚠️ Automation not delivered"
        ),
    }

    DispatchOutcome {
        dispatch_id: payload.dispatch_id,
        status,
        http_status,
        endpoint: url.to_string(),
        detail,
        attempts,
        latency_ms,
        event_type: Some(payload.event_type.clone()),
    }
}
