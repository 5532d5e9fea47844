//! Constants Module - Single Source of Truth
//!
//! Every default threshold, window, timeout and queue size used by the
//! pipeline is defined here. Other modules read these through
//! `models::config` so an operator can override them from the environment.

// ============================================
// APPLICATION CONSTANTS
// ============================================

/// Application name
pub const APP_NAME: &str = "AegisGuard";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent for outbound HTTP requests
pub const USER_AGENT: &str = concat!("AegisGuard/", env!("CARGO_PKG_VERSION"));

/// Default bind host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port
pub const DEFAULT_PORT: u16 = 8000;

/// Default native token symbol when a transaction carries none
pub const DEFAULT_TOKEN: &str = "QUBIC";

// ============================================
// RISK SCORER
// ============================================

/// Fallback per-wallet baseline amount when no history exists yet
pub const DEFAULT_BASELINE_AMOUNT: f64 = 10_000.0;

/// Amount at which a transfer counts as a whale move
pub const DEFAULT_WHALE_THRESHOLD: f64 = 50_000.0;

/// Window for velocity / cluster signals (seconds)
pub const DEFAULT_ACTIVITY_WINDOW_SECS: u64 = 600;

/// Same-source transactions inside the activity window that count as high velocity
pub const DEFAULT_VELOCITY_THRESHOLD: usize = 10;

/// Distinct counterparties inside the activity window that count as a fan-out cluster
pub const DEFAULT_CLUSTER_THRESHOLD: usize = 8;

/// Dusting band (inclusive)
pub const DUST_MIN_AMOUNT: f64 = 0.01;
pub const DUST_MAX_AMOUNT: f64 = 0.1;

/// Classification bands independent of the threat level
pub const MEDIUM_SCORE_FLOOR: u8 = 40;
pub const CRITICAL_SCORE_FLOOR: u8 = 90;

/// Smoothing factor for the per-wallet rolling amount baseline
pub const BASELINE_SMOOTHING: f64 = 0.2;

// ============================================
// THREAT LEVEL (DEFCON)
// ============================================

/// Trailing window for attack frequency (seconds)
pub const THREAT_WINDOW_SECS: u64 = 60;

/// Attack counts at which the level escalates to 4, 3, 2, 1
pub const DEFCON_4_ATTACKS: usize = 1;
pub const DEFCON_3_ATTACKS: usize = 3;
pub const DEFCON_2_ATTACKS: usize = 5;
pub const DEFCON_1_ATTACKS: usize = 10;

/// Alert thresholds per level
pub const DEFCON_1_THRESHOLD: f64 = 50.0;
pub const DEFCON_2_THRESHOLD: f64 = 60.0;
pub const DEFCON_3_THRESHOLD: f64 = 70.0;
pub const DEFCON_4_THRESHOLD: f64 = 75.0;
pub const DEFCON_5_THRESHOLD: f64 = 80.0;

// ============================================
// FORECAST
// ============================================

/// EMA smoothing factor
pub const FORECAST_ALPHA: f64 = 0.3;

/// EMA movement over the trend window that counts as UP / DOWN
pub const FORECAST_TREND_DELTA: f64 = 5.0;

/// Number of EMA steps the trend compares against
pub const FORECAST_TREND_WINDOW: usize = 5;

/// Per-key history length
pub const FORECAST_HISTORY_CAP: usize = 20;

/// Idle wallet keys expire after this many seconds
pub const FORECAST_KEY_TTL_SECS: u64 = 900;

/// Hard bound on tracked wallet keys
pub const FORECAST_MAX_KEYS: usize = 50_000;

/// Observations needed before confidence stops growing with volume
pub const FORECAST_FULL_VOLUME: u64 = 10;

/// Global forecast key
pub const GLOBAL_KEY: &str = "global";

// ============================================
// AUTOMATION DISPATCH
// ============================================

/// Worker pool size
pub const DEFAULT_DISPATCH_WORKERS: usize = 4;

/// Pending job queue size
pub const DEFAULT_DISPATCH_QUEUE: usize = 64;

/// Per-condition cool-down (seconds)
pub const DEFAULT_DISPATCH_COOLDOWN_SECS: u64 = 60;

/// Webhook call timeout (milliseconds)
pub const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 5_000;

/// Retries for retryable webhook failures
pub const DEFAULT_DISPATCH_RETRIES: u32 = 0;

/// Base backoff between retries (milliseconds)
pub const DISPATCH_RETRY_BASE_MS: u64 = 250;

/// Grace period for in-flight dispatches at shutdown (milliseconds)
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

// ============================================
// INFERENCE COLLABORATOR
// ============================================

/// Inference call timeout (milliseconds)
pub const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 1_500;

/// OpenAI-compatible chat completions endpoint (Groq)
pub const DEFAULT_INFERENCE_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Default model
pub const DEFAULT_INFERENCE_MODEL: &str = "llama-3.3-70b-versatile";

// ============================================
// FAN-OUT
// ============================================

/// Per-subscriber outbound queue
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 256;

/// Maximum concurrent subscribers
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 512;

/// Greeting sent once on connect
pub const CONNECTION_GREETING: &str = "Connected to AEGIS real-time monitor";

// ============================================
// FEED
// ============================================

/// Synthetic feed cadence (milliseconds)
pub const DEFAULT_FEED_INTERVAL_MS: u64 = 2_000;

/// Channel between the feed adapter and the producer loop
pub const FEED_CHANNEL_CAPACITY: usize = 1_024;

/// Upstream WebSocket reconnect backoff
pub const FEED_RECONNECT_BASE_MS: u64 = 1_000;
pub const FEED_RECONNECT_MAX_MS: u64 = 30_000;
pub const FEED_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Synthetic wallet pool
pub const SYNTHETIC_WALLET_POOL: usize = 100;
pub const SYNTHETIC_WHALE_COUNT: usize = 5;

/// First synthetic tick
pub const SYNTHETIC_START_TICK: u64 = 8_923_456;

// ============================================
// MARKET INTEL
// ============================================

/// Recent token signals kept in memory
pub const MAX_TOKEN_SIGNALS: usize = 200;

/// Distinct token symbols tracked at once
pub const MAX_TRACKED_TOKENS: usize = 1_000;

/// Tokens idle this long are dropped
pub const TOKEN_IDLE_HOURS: i64 = 24;

/// Per-token risk history length
pub const TOKEN_HISTORY_CAP: usize = 100;

/// Average movement between the last two 5-sample buckets that counts as a trend
pub const TOKEN_TREND_DELTA: f64 = 10.0;

// ============================================
// WALLET GRAPH
// ============================================

/// Idle wallets leave the graph after this long
pub const WALLET_GRAPH_TTL_SECS: u64 = 3_600;

/// Wallet nodes kept in memory
pub const WALLET_GRAPH_MAX_WALLETS: usize = 50_000;

/// Counterparties remembered per source wallet
pub const MAX_WALLET_CONNECTIONS: usize = 256;

/// Nodes returned by `GET /api/wallet-graph` by default and at most
pub const WALLET_GRAPH_DEFAULT_NODES: usize = 50;
pub const WALLET_GRAPH_MAX_NODES: usize = 500;

/// Worst score above which a wallet is drawn as flagged
pub const GRAPH_FLAG_SCORE: u8 = 80;

// ============================================
// TELEMETRY
// ============================================

pub const DEFAULT_TELEMETRY_DIR: &str = "./telemetry";

/// Threat events buffered in memory before a flush
pub const TELEMETRY_BUFFER_SIZE: usize = 1_000;

/// Interval of the periodic stats line and state cleanup
pub const STATS_LOG_INTERVAL_SECS: u64 = 30;

// ============================================
// SCORE BANDS
// ============================================

/// Impact band for a peak / final score
pub fn impact_band(score: u8) -> &'static str {
    match score {
        0..=39 => "Low",
        40..=69 => "Medium",
        70..=89 => "High",
        _ => "Critical",
    }
}

/// Human-readable token risk label
pub fn risk_label(score: f64) -> &'static str {
    if score < 30.0 {
        "SAFE"
    } else if score < 50.0 {
        "LOW_RISK"
    } else if score < 70.0 {
        "WATCHLIST"
    } else if score < 90.0 {
        "HIGH_RISK"
    } else {
        "CRITICAL"
    }
}

/// Clamp any score into 0..=100
#[inline]
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
