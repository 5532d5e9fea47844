//! Inference Collaborator - natural-language explanations
//!
//! Optional. Verdicts and simulations never depend on it: every call is
//! bounded by a timeout and callers keep their templated text on failure.
//!
//! API: OpenAI-compatible chat completions (Groq by default)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::{AppError, AppResult, InferenceConfig};
use crate::utils::constants::USER_AGENT;

/// What the collaborator is asked to explain
#[derive(Debug, Clone, Serialize)]
pub struct ExplainContext {
    /// "transaction" | "simulation"
    pub subject: &'static str,
    /// Pre-rendered facts (score, level, factors...)
    pub facts: String,
}

/// Capability interface for the inference collaborator
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn explain(&self, context: &ExplainContext) -> AppResult<String>;

    fn name(&self) -> &'static str {
        "inference"
    }
}

/// Local fallback: always unavailable, callers keep their template
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInference;

#[async_trait]
impl InferenceClient for NoopInference {
    async fn explain(&self, _context: &ExplainContext) -> AppResult<String> {
        Err(AppError::inference_unavailable("inference disabled"))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = "You are AEGIS, a blockchain security analyst. \
Explain the risk assessment you are given in at most three short sentences of \
professional security language. Do not change the score or level.";

/// Groq / OpenAI-compatible chat client
pub struct GroqInference {
    client: reqwest::Client,
    config: InferenceConfig,
}

impl GroqInference {
    pub fn new(config: InferenceConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl InferenceClient for GroqInference {
    async fn explain(&self, context: &ExplainContext) -> AppResult<String> {
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::inference_unavailable("GROQ_API_KEY not set"))?;

        let user = format!("Subject: {}\n{}", context.subject, context.facts);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.1,
            max_tokens: 200,
        };

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::inference_timeout(self.config.timeout.as_millis() as u64)
                } else {
                    AppError::inference_unavailable(format!("inference request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            return Err(AppError::inference_unavailable(format!(
                "inference API error: {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AppError::inference_unavailable("inference returned no content"))
    }

    fn name(&self) -> &'static str {
        "groq"
    }
}

/// Build the configured collaborator, falling back to the no-op one
pub fn from_config(config: &InferenceConfig) -> Arc<dyn InferenceClient> {
    if !config.enabled() {
        return Arc::new(NoopInference);
    }
    match GroqInference::new(config.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!(error = %e, "⚠️ Inference client init failed, using templates only");
            Arc::new(NoopInference)
        }
    }
}

/// Timeout-bounded call. Any failure comes back as an UpstreamUnavailable error.
pub async fn explain_with_timeout(
    client: &dyn InferenceClient,
    context: &ExplainContext,
    timeout: Duration,
) -> AppResult<String> {
    match tokio::time::timeout(timeout, client.explain(context)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::inference_timeout(timeout.as_millis() as u64)),
    }
}

/// Inference text when available, `fallback` otherwise. Returns whether inference was used.
pub async fn explain_or_fallback(
    client: &dyn InferenceClient,
    context: &ExplainContext,
    timeout: Duration,
    fallback: String,
) -> (String, bool) {
    match explain_with_timeout(client, context, timeout).await {
        Ok(text) => (text, true),
        Err(e) => {
            debug!(client = client.name(), code = e.code_str(), "Inference fallback to template");
            (fallback, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorCategory;

    struct SlowInference;

    #[async_trait]
    impl InferenceClient for SlowInference {
        async fn explain(&self, _context: &ExplainContext) -> AppResult<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    struct FixedInference;

    #[async_trait]
    impl InferenceClient for FixedInference {
        async fn explain(&self, _context: &ExplainContext) -> AppResult<String> {
            Ok("model says hi".to_string())
        }
    }

    fn ctx() -> ExplainContext {
        ExplainContext {
            subject: "transaction",
            facts: "score 80".to_string(),
        }
    }

    #[tokio::test]
    async fn test_noop_falls_back() {
        let (text, used) =
            explain_or_fallback(&NoopInference, &ctx(), Duration::from_millis(50), "template".into())
                .await;
        assert_eq!(text, "template");
        assert!(!used);
    }

    #[tokio::test]
    async fn test_timeout_is_upstream_unavailable() {
        let err = explain_with_timeout(&SlowInference, &ctx(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::UpstreamUnavailable);
        assert!(err.code.is_retryable());
    }

    #[tokio::test]
    async fn test_success_is_used() {
        let (text, used) =
            explain_or_fallback(&FixedInference, &ctx(), Duration::from_millis(100), "t".into())
                .await;
        assert_eq!(text, "model says hi");
        assert!(used);
    }

    #[test]
    fn test_disabled_config_builds_noop() {
        let client = from_config(&InferenceConfig::default());
        assert_eq!(client.name(), "noop");
    }
}
