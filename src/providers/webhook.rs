//! Webhook Collaborator - outbound workflow-automation calls (n8n style)
//!
//! `deliver` returns the HTTP status of any response; transport failures and
//! timeouts come back as UpstreamUnavailable errors. The dispatcher decides
//! what counts as delivered.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use crate::core::automation::WebhookPayload;
use crate::models::{AppError, AppResult, ErrorCode};
use crate::utils::constants::USER_AGENT;

/// Capability interface for the webhook collaborator
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn deliver(&self, payload: &WebhookPayload, url: &str) -> AppResult<u16>;

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// reqwest-backed client
pub struct HttpWebhook {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpWebhook {
    pub fn new(timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl WebhookClient for HttpWebhook {
    async fn deliver(&self, payload: &WebhookPayload, url: &str) -> AppResult<u16> {
        // n8n webhook nodes expose the request under `body`
        let response = self
            .client
            .post(url)
            .json(&json!({ "body": payload }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::webhook_timeout(self.timeout.as_millis() as u64)
                } else if e.is_connect() {
                    AppError::with_source(ErrorCode::WebhookUnreachable, "webhook connection failed", e)
                } else {
                    AppError::webhook_failed(format!("webhook request failed: {}", e))
                }
            })?;
        Ok(response.status().as_u16())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Local fallback: accepts everything and only logs
#[derive(Debug, Default)]
pub struct NoopWebhook {
    delivered: AtomicU64,
}

impl NoopWebhook {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WebhookClient for NoopWebhook {
    async fn deliver(&self, payload: &WebhookPayload, url: &str) -> AppResult<u16> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        info!(
            url,
            event = %payload.event_type,
            score = payload.risk_score,
            "📭 Webhook (local only)"
        );
        Ok(202)
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
