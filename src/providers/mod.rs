//! Providers Module - External collaborators and event sources
//!
//! Inference (explanations), webhook (automation) and feed adapters.

pub mod feed;
pub mod inference;
pub mod webhook;

pub use feed::{spawn_feed, SyntheticFeed, WsFeed};
pub use inference::{GroqInference, InferenceClient, NoopInference};
pub use webhook::{HttpWebhook, NoopWebhook, WebhookClient};
