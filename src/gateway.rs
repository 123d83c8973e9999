//! Execution gateway client
//!
//! Dispatches a validated plan to the downstream execution service. The
//! payload carries a tamper-evident signature computed over the plan hash
//! and authorization context with the shared gateway secret; the gateway
//! recomputes and compares. Transient failures are retried with capped
//! exponential backoff.

use crate::architect::Plan;
use crate::error::AppError;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 5_000;

/// Compute the execution signature for a plan dispatch.
///
/// Covers the canonical plan hash, schema version and authorization
/// timestamp, keyed by the shared secret; any mutation of those inputs
/// changes the signature.
pub fn execution_signature(
    secret: &str,
    plan_hash: &str,
    schema_version: &str,
    authorized_at: &str,
) -> String {
    let material = format!(
        "{}|{}|{}|{}",
        secret, plan_hash, schema_version, authorized_at
    );
    format!("{:x}", Sha256::digest(material.as_bytes()))
}

/// Backoff delay before retry `attempt` (1-based), jittered
fn backoff_delay(attempt: u32, jitter_ms: u64) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(6));
    Duration::from_millis(exp.min(BACKOFF_CAP_MS) + jitter_ms)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayPayload<'a> {
    correlation_id: Uuid,
    plan: &'a Plan,
    plan_hash: &'a str,
    schema_version: &'a str,
    authorized_at: String,
    execution_signature: String,
}

/// Acknowledged dispatch
pub struct GatewayAck {
    pub signature: String,
}

pub struct GatewayClient {
    http: reqwest::Client,
    url: String,
    secret: String,
    timeout: Duration,
    max_attempts: u32,
}

impl GatewayClient {
    pub fn new(url: String, secret: String, timeout_secs: u64, max_attempts: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            secret,
            timeout: Duration::from_secs(timeout_secs),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Post the signed plan to the gateway, retrying transient failures.
    /// Exhausted attempts surface as GatewayDispatch.
    pub async fn dispatch(
        &self,
        job_id: Uuid,
        plan: &Plan,
        plan_hash: &str,
        schema_version: &str,
    ) -> Result<GatewayAck, AppError> {
        let authorized_at = Utc::now().to_rfc3339();
        let signature =
            execution_signature(&self.secret, plan_hash, schema_version, &authorized_at);
        let payload = GatewayPayload {
            correlation_id: job_id,
            plan,
            plan_hash,
            schema_version,
            authorized_at,
            execution_signature: signature.clone(),
        };

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            let result = self
                .http
                .post(&self.url)
                .timeout(self.timeout)
                .header("x-execution-signature", &signature)
                .json(&payload)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match result {
                Ok(_) => return Ok(GatewayAck { signature }),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        "Gateway dispatch attempt {}/{} failed for job {}: {}",
                        attempt, self.max_attempts, job_id, last_error
                    );
                    if attempt < self.max_attempts {
                        let jitter = rand::thread_rng().gen_range(0..250);
                        tokio::time::sleep(backoff_delay(attempt, jitter)).await;
                    }
                }
            }
        }

        Err(AppError::GatewayDispatch(format!(
            "{} attempts exhausted: {}",
            self.max_attempts, last_error
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn signature_is_deterministic() {
        let a = execution_signature("secret", "abc", "1.0.0", "2026-08-30T12:00:00Z");
        let b = execution_signature("secret", "abc", "1.0.0", "2026-08-30T12:00:00Z");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn signature_changes_with_any_input() {
        let base = execution_signature("secret", "abc", "1.0.0", "t");
        assert_ne!(base, execution_signature("other", "abc", "1.0.0", "t"));
        assert_ne!(base, execution_signature("secret", "abd", "1.0.0", "t"));
        assert_ne!(base, execution_signature("secret", "abc", "1.0.1", "t"));
        assert_ne!(base, execution_signature("secret", "abc", "1.0.0", "u"));
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2, 0), Duration::from_millis(2000));
        assert_eq!(backoff_delay(10, 0), Duration::from_millis(BACKOFF_CAP_MS));
    }
}
