//! Centralized Error Handling Module
//!
//! Every failure carries a unique error code so logs and API responses can be
//! correlated. Codes follow the pattern CATEGORY_SPECIFIC_ERROR:
//! - SIM_xxx: Scenario simulation
//! - FCST_xxx: Forecast queries
//! - API_xxx: Request validation
//! - UPSTREAM_xxx: Inference / webhook collaborators
//! - HUB_xxx: Fan-out
//! - STATE_xxx: Shared-state invariants
//! - CFG_xxx / FEED_xxx: Configuration and event adapters
//!
//! Each code maps onto one [`ErrorCategory`], which is what callers use to
//! tell input errors from transient upstream errors.

use serde::Serialize;
use std::fmt;

/// Application-wide error type
#[derive(Debug)]
pub struct AppError {
    /// Unique error code for logging/monitoring
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Optional underlying error
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new AppError
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create AppError with source error
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get error code as string (for logging)
    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    /// Taxonomy bucket of this error
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error taxonomy exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Rejected synchronously, caller must fix the request
    InvalidInput,
    /// Collaborator unreachable or timed out, local fallback applies
    UpstreamUnavailable,
    /// A bounded queue overflowed
    Overloaded,
    /// Correctness bug, the affected subsystem halts
    InternalInvariantViolation,
    /// Anything else
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::Overloaded => "OVERLOADED",
            Self::InternalInvariantViolation => "INTERNAL_INVARIANT_VIOLATION",
            Self::Internal => "INTERNAL",
        }
    }
}

/// Unique error codes for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // ============================================
    // Input Errors
    // ============================================
    /// Unknown scenario type
    InvalidScenario,
    /// Unknown forecast horizon
    InvalidHorizon,
    /// Malformed webhook URL
    InvalidWebhookUrl,
    /// Invalid request format
    ApiBadRequest,
    /// Rate limit exceeded
    ApiRateLimited,
    /// Resource not found
    ApiNotFound,

    // ============================================
    // Upstream Errors
    // ============================================
    /// Inference collaborator timed out
    InferenceTimeout,
    /// Inference collaborator failed or is disabled
    InferenceUnavailable,
    /// Webhook call timed out
    WebhookTimeout,
    /// Webhook endpoint returned an error
    WebhookFailed,
    /// Webhook endpoint refused the connection
    WebhookUnreachable,
    /// Upstream returned something we cannot parse
    UpstreamInvalidResponse,

    // ============================================
    // Overload Errors
    // ============================================
    /// Subscriber queue full
    SubscriberOverloaded,
    /// Subscriber limit reached
    SubscriberLimit,
    /// Dispatch queue full
    DispatchQueueFull,

    // ============================================
    // Invariant Violations
    // ============================================
    /// Threat level outside 1..=5
    ThreatLevelOutOfRange,
    /// Snapshot failed validation or its lock was poisoned
    TornSnapshot,

    // ============================================
    // Configuration / Feed Errors
    // ============================================
    /// Invalid configuration value
    ConfigInvalidValue,
    /// Feed connection failed
    FeedConnectionFailed,
    /// Feed message could not be decoded
    FeedDecodeFailed,
    /// Component already shut down
    ShuttingDown,

    // ============================================
    // Generic Errors
    // ============================================
    /// Unknown error
    Unknown,
}

impl ErrorCode {
    /// Get string representation of error code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidScenario => "SIM_INVALID_SCENARIO",
            Self::InvalidHorizon => "FCST_INVALID_HORIZON",
            Self::InvalidWebhookUrl => "API_INVALID_WEBHOOK_URL",
            Self::ApiBadRequest => "API_BAD_REQUEST",
            Self::ApiRateLimited => "API_RATE_LIMITED",
            Self::ApiNotFound => "API_NOT_FOUND",

            Self::InferenceTimeout => "UPSTREAM_INFERENCE_TIMEOUT",
            Self::InferenceUnavailable => "UPSTREAM_INFERENCE_UNAVAILABLE",
            Self::WebhookTimeout => "UPSTREAM_WEBHOOK_TIMEOUT",
            Self::WebhookFailed => "UPSTREAM_WEBHOOK_FAILED",
            Self::WebhookUnreachable => "UPSTREAM_WEBHOOK_UNREACHABLE",
            Self::UpstreamInvalidResponse => "UPSTREAM_INVALID_RESPONSE",

            Self::SubscriberOverloaded => "HUB_SUBSCRIBER_OVERLOADED",
            Self::SubscriberLimit => "HUB_SUBSCRIBER_LIMIT",
            Self::DispatchQueueFull => "DISPATCH_QUEUE_FULL",

            Self::ThreatLevelOutOfRange => "STATE_THREAT_LEVEL_OUT_OF_RANGE",
            Self::TornSnapshot => "STATE_TORN_SNAPSHOT",

            Self::ConfigInvalidValue => "CFG_INVALID_VALUE",
            Self::FeedConnectionFailed => "FEED_CONNECTION_FAILED",
            Self::FeedDecodeFailed => "FEED_DECODE_FAILED",
            Self::ShuttingDown => "SHUTTING_DOWN",

            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Taxonomy bucket
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidScenario
            | Self::InvalidHorizon
            | Self::InvalidWebhookUrl
            | Self::ApiBadRequest
            | Self::ApiRateLimited
            | Self::ApiNotFound
            | Self::ConfigInvalidValue => ErrorCategory::InvalidInput,

            Self::InferenceTimeout
            | Self::InferenceUnavailable
            | Self::WebhookTimeout
            | Self::WebhookFailed
            | Self::WebhookUnreachable
            | Self::UpstreamInvalidResponse
            | Self::FeedConnectionFailed
            | Self::FeedDecodeFailed => ErrorCategory::UpstreamUnavailable,

            Self::SubscriberOverloaded | Self::SubscriberLimit | Self::DispatchQueueFull => {
                ErrorCategory::Overloaded
            }

            Self::ThreatLevelOutOfRange | Self::TornSnapshot => {
                ErrorCategory::InternalInvariantViolation
            }

            Self::ShuttingDown | Self::Unknown => ErrorCategory::Internal,
        }
    }

    /// Get HTTP status code for API responses
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ApiNotFound => 404,
            Self::ApiRateLimited => 429,
            _ => match self.category() {
                ErrorCategory::InvalidInput => 400,
                ErrorCategory::UpstreamUnavailable => 502,
                ErrorCategory::Overloaded => 503,
                ErrorCategory::InternalInvariantViolation | ErrorCategory::Internal => 500,
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InferenceTimeout
                | Self::WebhookTimeout
                | Self::WebhookUnreachable
                | Self::FeedConnectionFailed
        )
    }
}

// ============================================
// Convenience constructors
// ============================================

impl AppError {
    /// Unknown scenario type
    pub fn invalid_scenario(scenario: &str) -> Self {
        Self::new(
            ErrorCode::InvalidScenario,
            format!("Unknown scenario_type: {}", scenario),
        )
    }

    /// Unknown horizon
    pub fn invalid_horizon(horizon: &str) -> Self {
        Self::new(
            ErrorCode::InvalidHorizon,
            format!(
                "Unknown horizon: {} (expected short_term, medium_term or long_term)",
                horizon
            ),
        )
    }

    /// Webhook URL rejected
    pub fn invalid_webhook_url(url: &str) -> Self {
        Self::new(
            ErrorCode::InvalidWebhookUrl,
            format!("Invalid webhook_url: {}", url),
        )
    }

    /// API bad request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiBadRequest, msg)
    }

    /// Resource not found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ApiNotFound, msg)
    }

    /// Inference collaborator unavailable
    pub fn inference_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InferenceUnavailable, msg)
    }

    /// Inference collaborator timed out
    pub fn inference_timeout(timeout_ms: u64) -> Self {
        Self::new(
            ErrorCode::InferenceTimeout,
            format!("Inference call exceeded {}ms", timeout_ms),
        )
    }

    /// Webhook failed
    pub fn webhook_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::WebhookFailed, msg)
    }

    /// Webhook timed out
    pub fn webhook_timeout(timeout_ms: u64) -> Self {
        Self::new(
            ErrorCode::WebhookTimeout,
            format!("Webhook call exceeded {}ms", timeout_ms),
        )
    }

    /// Subscriber queue overflow
    pub fn subscriber_overloaded(subscriber: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::SubscriberOverloaded,
            format!("Subscriber {} outbound queue full", subscriber),
        )
    }

    /// Threat level invariant broken
    pub fn threat_level_out_of_range(level: u8) -> Self {
        Self::new(
            ErrorCode::ThreatLevelOutOfRange,
            format!("Threat level {} outside 1..=5", level),
        )
    }

    /// Snapshot invariant broken
    pub fn torn_snapshot(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::TornSnapshot, msg)
    }

    /// Invalid configuration value
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalidValue, msg)
    }

    /// Component is shutting down
    pub fn shutting_down(component: &str) -> Self {
        Self::new(ErrorCode::ShuttingDown, format!("{} is shutting down", component))
    }
}

// ============================================
// Result type alias
// ============================================

/// Application Result type
pub type AppResult<T> = Result<T, AppError>;

// ============================================
// Conversion from common error types
// ============================================

impl From<eyre::Report> for AppError {
    fn from(err: eyre::Report) -> Self {
        Self::new(ErrorCode::Unknown, err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorCode::Unknown, "IO error", err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(ErrorCode::WebhookTimeout, "Request timeout")
        } else if err.is_connect() {
            Self::new(ErrorCode::WebhookUnreachable, "Connection failed")
        } else if err.is_decode() {
            Self::new(ErrorCode::UpstreamInvalidResponse, err.to_string())
        } else {
            Self::new(ErrorCode::WebhookFailed, err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorCode::UpstreamInvalidResponse, "JSON parse error", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = AppError::invalid_scenario("meteor_strike");
        assert_eq!(err.code, ErrorCode::InvalidScenario);
        assert_eq!(err.code_str(), "SIM_INVALID_SCENARIO");
        assert!(err.to_string().contains("meteor_strike"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(ErrorCode::InvalidHorizon.category(), ErrorCategory::InvalidInput);
        assert_eq!(
            ErrorCode::WebhookTimeout.category(),
            ErrorCategory::UpstreamUnavailable
        );
        assert_eq!(
            ErrorCode::SubscriberOverloaded.category(),
            ErrorCategory::Overloaded
        );
        assert_eq!(
            ErrorCode::TornSnapshot.category(),
            ErrorCategory::InternalInvariantViolation
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorCode::WebhookTimeout.is_retryable());
        assert!(!ErrorCode::WebhookFailed.is_retryable());
        assert!(!ErrorCode::InvalidScenario.is_retryable());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(ErrorCode::InvalidScenario.http_status(), 400);
        assert_eq!(ErrorCode::ApiRateLimited.http_status(), 429);
        assert_eq!(ErrorCode::InferenceTimeout.http_status(), 502);
        assert_eq!(ErrorCode::ThreatLevelOutOfRange.http_status(), 500);
    }
}
