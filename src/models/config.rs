//! Configuration module for AegisGuard
//!
//! Every default comes from utils/constants.rs; the environment overrides.
//! Secrets (GROQ_API_KEY) are never logged.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::fanout::OverflowPolicy;
use crate::utils::constants::*;

/// Read an env var and parse it, falling back to `default` when unset or invalid
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, fallback = %default, "⚠️ Invalid config value, using default");
                default
            }
        },
        _ => default,
    }
}

/// Non-empty string env var
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// HTTP bind address
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port = env_opt("AEGIS_PORT")
            .map(|_| env_or("AEGIS_PORT", DEFAULT_PORT))
            .unwrap_or_else(|| env_or("PORT", DEFAULT_PORT));
        Self {
            host: env_opt("AEGIS_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Risk scorer tuning
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Baseline used for wallets without history
    pub baseline_amount: f64,
    pub whale_threshold: f64,
    /// Window for velocity and cluster signals
    pub activity_window: Duration,
    pub velocity_threshold: usize,
    pub cluster_threshold: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            baseline_amount: DEFAULT_BASELINE_AMOUNT,
            whale_threshold: DEFAULT_WHALE_THRESHOLD,
            activity_window: Duration::from_secs(DEFAULT_ACTIVITY_WINDOW_SECS),
            velocity_threshold: DEFAULT_VELOCITY_THRESHOLD,
            cluster_threshold: DEFAULT_CLUSTER_THRESHOLD,
        }
    }
}

impl ScorerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self {
            baseline_amount: env_or("AEGIS_BASELINE_AMOUNT", DEFAULT_BASELINE_AMOUNT),
            whale_threshold: env_or("AEGIS_WHALE_THRESHOLD", DEFAULT_WHALE_THRESHOLD),
            activity_window: Duration::from_secs(env_or(
                "AEGIS_ACTIVITY_WINDOW_SECS",
                DEFAULT_ACTIVITY_WINDOW_SECS,
            )),
            velocity_threshold: env_or("AEGIS_VELOCITY_THRESHOLD", DEFAULT_VELOCITY_THRESHOLD),
            cluster_threshold: env_or("AEGIS_CLUSTER_THRESHOLD", DEFAULT_CLUSTER_THRESHOLD),
        };
        if cfg.baseline_amount <= 0.0 {
            warn!("⚠️ AEGIS_BASELINE_AMOUNT must be positive, using default");
            cfg.baseline_amount = DEFAULT_BASELINE_AMOUNT;
        }
        if cfg.whale_threshold <= 0.0 {
            warn!("⚠️ AEGIS_WHALE_THRESHOLD must be positive, using default");
            cfg.whale_threshold = DEFAULT_WHALE_THRESHOLD;
        }
        cfg
    }
}

/// Forecast engine tuning
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    pub alpha: f64,
    pub trend_delta: f64,
    pub trend_window: usize,
    pub history_cap: usize,
    pub key_ttl: Duration,
    pub max_keys: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            alpha: FORECAST_ALPHA,
            trend_delta: FORECAST_TREND_DELTA,
            trend_window: FORECAST_TREND_WINDOW,
            history_cap: FORECAST_HISTORY_CAP,
            key_ttl: Duration::from_secs(FORECAST_KEY_TTL_SECS),
            max_keys: FORECAST_MAX_KEYS,
        }
    }
}

impl ForecastConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self {
            alpha: env_or("AEGIS_FORECAST_ALPHA", FORECAST_ALPHA),
            key_ttl: Duration::from_secs(env_or("AEGIS_FORECAST_TTL_SECS", FORECAST_KEY_TTL_SECS)),
            max_keys: env_or("AEGIS_FORECAST_MAX_KEYS", FORECAST_MAX_KEYS),
            ..Self::default()
        };
        if !(cfg.alpha > 0.0 && cfg.alpha <= 1.0) {
            warn!(alpha = cfg.alpha, "⚠️ AEGIS_FORECAST_ALPHA must be in (0, 1], using default");
            cfg.alpha = FORECAST_ALPHA;
        }
        cfg
    }
}

/// Automation dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Endpoint for automatic notifications; manual triggers bring their own
    pub webhook_url: Option<String>,
    pub workers: usize,
    pub queue_size: usize,
    pub cooldown: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub shutdown_grace: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            workers: DEFAULT_DISPATCH_WORKERS,
            queue_size: DEFAULT_DISPATCH_QUEUE,
            cooldown: Duration::from_secs(DEFAULT_DISPATCH_COOLDOWN_SECS),
            timeout: Duration::from_millis(DEFAULT_WEBHOOK_TIMEOUT_MS),
            retries: DEFAULT_DISPATCH_RETRIES,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        Self {
            webhook_url: env_opt("N8N_WEBHOOK_URL"),
            workers: env_or("AEGIS_DISPATCH_WORKERS", DEFAULT_DISPATCH_WORKERS).max(1),
            queue_size: env_or("AEGIS_DISPATCH_QUEUE", DEFAULT_DISPATCH_QUEUE).max(1),
            cooldown: Duration::from_secs(env_or(
                "AEGIS_DISPATCH_COOLDOWN_SECS",
                DEFAULT_DISPATCH_COOLDOWN_SECS,
            )),
            timeout: Duration::from_millis(env_or(
                "AEGIS_WEBHOOK_TIMEOUT_MS",
                DEFAULT_WEBHOOK_TIMEOUT_MS,
            )),
            retries: env_or("AEGIS_DISPATCH_RETRIES", DEFAULT_DISPATCH_RETRIES),
            shutdown_grace: Duration::from_millis(env_or(
                "AEGIS_SHUTDOWN_GRACE_MS",
                DEFAULT_SHUTDOWN_GRACE_MS,
            )),
        }
    }
}

/// Fan-out hub tuning
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub subscriber_queue: usize,
    pub max_subscribers: usize,
    pub overflow: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_queue: DEFAULT_SUBSCRIBER_QUEUE,
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        let overflow = match env_opt("AEGIS_OVERFLOW_POLICY") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "⚠️ Unknown AEGIS_OVERFLOW_POLICY, using drop_oldest");
                OverflowPolicy::DropOldest
            }),
            None => OverflowPolicy::DropOldest,
        };
        Self {
            subscriber_queue: env_or("AEGIS_SUBSCRIBER_QUEUE", DEFAULT_SUBSCRIBER_QUEUE).max(1),
            max_subscribers: env_or("AEGIS_MAX_SUBSCRIBERS", DEFAULT_MAX_SUBSCRIBERS).max(1),
            overflow,
        }
    }
}

/// Inference collaborator settings
#[derive(Clone)]
pub struct InferenceConfig {
    /// Inference is disabled when no key is configured
    pub api_key: Option<String>,
    pub url: String,
    pub model: String,
    pub timeout: Duration,
}

impl fmt::Debug for InferenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<hidden>"))
            .field("url", &self.url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: DEFAULT_INFERENCE_URL.to_string(),
            model: DEFAULT_INFERENCE_MODEL.to_string(),
            timeout: Duration::from_millis(DEFAULT_INFERENCE_TIMEOUT_MS),
        }
    }
}

impl InferenceConfig {
    pub fn from_env() -> Self {
        let api_key = env_opt("GROQ_API_KEY").filter(|k| k != "YOUR_API_KEY");
        if api_key.is_some() {
            info!("🔑 GROQ_API_KEY configured (key hidden for security)");
        }
        Self {
            api_key,
            url: env_opt("AEGIS_INFERENCE_URL").unwrap_or_else(|| DEFAULT_INFERENCE_URL.to_string()),
            model: env_opt("GROQ_MODEL").unwrap_or_else(|| DEFAULT_INFERENCE_MODEL.to_string()),
            timeout: Duration::from_millis(env_or(
                "AEGIS_INFERENCE_TIMEOUT_MS",
                DEFAULT_INFERENCE_TIMEOUT_MS,
            )),
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Event adapter settings
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Upstream WebSocket feed; the synthetic feed runs when unset
    pub upstream_url: Option<String>,
    pub interval: Duration,
    pub seed: Option<u64>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            upstream_url: None,
            interval: Duration::from_millis(DEFAULT_FEED_INTERVAL_MS),
            seed: None,
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        Self {
            upstream_url: env_opt("AEGIS_FEED_URL"),
            interval: Duration::from_millis(
                env_or("AEGIS_FEED_INTERVAL_MS", DEFAULT_FEED_INTERVAL_MS).max(10),
            ),
            seed: env_opt("AEGIS_FEED_SEED").and_then(|s| s.parse().ok()),
        }
    }
}

/// Telemetry export settings
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub export_dir: PathBuf,
    /// Buffered threat events before a flush to disk
    pub buffer_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from(DEFAULT_TELEMETRY_DIR),
            buffer_size: TELEMETRY_BUFFER_SIZE,
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self {
            export_dir: env_opt("AEGIS_TELEMETRY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TELEMETRY_DIR)),
            buffer_size: env_or("AEGIS_TELEMETRY_BUFFER", TELEMETRY_BUFFER_SIZE).max(1),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default)]
pub struct AegisConfig {
    pub server: ServerConfig,
    pub scorer: ScorerConfig,
    pub forecast: ForecastConfig,
    pub dispatch: DispatchConfig,
    pub hub: HubConfig,
    pub inference: InferenceConfig,
    pub feed: FeedConfig,
    pub telemetry: TelemetryConfig,
}

impl AegisConfig {
    /// Build from environment variables with documented defaults
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            scorer: ScorerConfig::from_env(),
            forecast: ForecastConfig::from_env(),
            dispatch: DispatchConfig::from_env(),
            hub: HubConfig::from_env(),
            inference: InferenceConfig::from_env(),
            feed: FeedConfig::from_env(),
            telemetry: TelemetryConfig::from_env(),
        }
    }

    /// One-line summary for startup logs (no secrets)
    pub fn log_summary(&self) {
        info!(
            bind = %self.server.bind_addr(),
            whale_threshold = self.scorer.whale_threshold,
            dispatch_workers = self.dispatch.workers,
            cooldown_secs = self.dispatch.cooldown.as_secs(),
            webhook = self.dispatch.webhook_url.is_some(),
            inference = self.inference.enabled(),
            feed = self.feed.upstream_url.as_deref().unwrap_or("synthetic"),
            "⚙️ Configuration loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AegisConfig::default();
        assert_eq!(cfg.server.port, DEFAULT_PORT);
        assert_eq!(cfg.dispatch.retries, 0);
        assert_eq!(cfg.hub.overflow, OverflowPolicy::DropOldest);
        assert!(!cfg.inference.enabled());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("AEGIS_TEST_ENV_OR", "not-a-number");
        assert_eq!(env_or("AEGIS_TEST_ENV_OR", 42u64), 42);
        std::env::set_var("AEGIS_TEST_ENV_OR", " 7 ");
        assert_eq!(env_or("AEGIS_TEST_ENV_OR", 42u64), 7);
        std::env::remove_var("AEGIS_TEST_ENV_OR");
    }

    #[test]
    fn test_inference_debug_hides_key() {
        let cfg = InferenceConfig {
            api_key: Some("gsk_secret".to_string()),
            ..InferenceConfig::default()
        };
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("gsk_secret"));
        assert!(dbg.contains("<hidden>"));
    }
}
