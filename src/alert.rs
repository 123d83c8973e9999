//! Alerting channel
//!
//! Fire-and-forget webhook delivery. This path must never fail the caller:
//! a missing webhook or delivery error is logged and swallowed.

use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

pub struct AlertChannel {
    http: reqwest::Client,
    webhook_url: Option<String>,
}

impl AlertChannel {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url,
        }
    }

    /// Deliver a formatted text alert. Infallible by contract.
    pub async fn send(&self, text: &str) {
        let Some(url) = &self.webhook_url else {
            info!("Alert (no webhook configured): {}", text);
            return;
        };

        let result = self
            .http
            .post(url)
            .timeout(Duration::from_secs(5))
            .json(&json!({ "text": text }))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        if let Err(e) = result {
            warn!("Alert delivery failed (non-fatal): {}", e);
        }
    }
}
