//! Plan Generator ("Architect") client
//!
//! Calls the external plan-generation agent with a bounded timeout and
//! returns the raw response for schema validation by the pipeline.

mod budget;
mod plan;

pub use budget::{AgentProfile, AgentRegistry, AgentRole, BudgetTier};
pub use plan::{canonical_plan_hash, validate_raw_plan, Plan, PlanEnvelope, PlanStep, RollbackSpec, ValidatedPlan};

use crate::error::AppError;
use chrono::Utc;
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ArchitectRequest<'a> {
    prompt: &'a str,
    historical_memory: &'a str,
    budget: &'a BudgetTier,
    correlation_id: Uuid,
    timestamp: String,
}

/// Raw architect response plus wall time
pub struct ArchitectResponse {
    pub raw: String,
    pub elapsed_ms: u64,
}

pub struct ArchitectClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl ArchitectClient {
    pub fn new(url: String, timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Invoke the plan-generation agent. Timeouts map to ArchitectTimeout,
    /// everything else to ExternalAgent.
    pub async fn generate(
        &self,
        prompt: &str,
        tier: &BudgetTier,
        advisory: &str,
        correlation_id: Uuid,
    ) -> Result<ArchitectResponse, AppError> {
        let body = ArchitectRequest {
            prompt,
            historical_memory: advisory,
            budget: tier,
            correlation_id,
            timestamp: Utc::now().to_rfc3339(),
        };

        let started = Instant::now();
        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ArchitectTimeout(self.timeout.as_millis() as u64)
                } else {
                    AppError::ExternalAgent(format!("Architect unreachable: {}", e))
                }
            })?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| AppError::ExternalAgent(format!("Architect response read failed: {}", e)))?;

        if !status.is_success() {
            return Err(AppError::ExternalAgent(format!(
                "Architect returned {}: {}",
                status,
                raw.chars().take(200).collect::<String>()
            )));
        }

        Ok(ArchitectResponse {
            raw,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}
