//! Audit stage
//!
//! Calls the external auditor agent to score a plan/outcome, derives the
//! recommendation from a versioned threshold policy, and records an
//! immutable AuditResult. Version stamps (pipeline, embedding model,
//! auditor, threshold policy) keep historical audits interpretable after
//! any of those change.

use crate::architect::Plan;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const PIPELINE_VERSION: &str = "v1.0";
pub const EMBEDDING_MODEL_VERSION: &str = "local-hash-64";
pub const AUDITOR_VERSION: &str = "v1.0";

/// Audit recommendation derived from the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Accept,
    Retry,
    Block,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Accept => "ACCEPT",
            Recommendation::Retry => "RETRY",
            Recommendation::Block => "BLOCK",
        }
    }
}

/// Versioned score-to-recommendation mapping.
///
/// The version travels with every AuditResult so old rows stay meaningful
/// if the cutoffs are recalibrated later.
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    pub version: &'static str,
    pub accept_floor: i64,
    pub retry_floor: i64,
}

impl ThresholdPolicy {
    pub const V1: ThresholdPolicy = ThresholdPolicy {
        version: "v1.0.0",
        accept_floor: 80,
        retry_floor: 50,
    };

    pub fn recommend(&self, score: i64) -> Recommendation {
        if score >= self.accept_floor {
            Recommendation::Accept
        } else if score >= self.retry_floor {
            Recommendation::Retry
        } else {
            Recommendation::Block
        }
    }
}

/// What the external auditor reports for one plan
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuditOutcome {
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub missed_requirements: Vec<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub reasoning_summary: String,
}

/// Immutable record of one completed audit
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub correlation_id: Uuid,
    pub score: i64,
    pub recommendation: Recommendation,
    pub missed_requirements: Vec<String>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub pipeline_version: String,
    pub embedding_model_version: String,
    pub auditor_version: String,
    pub threshold_policy_version: String,
    pub created_at: DateTime<Utc>,
}

impl AuditResult {
    pub fn from_outcome(
        job_id: Uuid,
        correlation_id: Uuid,
        outcome: &AuditOutcome,
        policy: &ThresholdPolicy,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            correlation_id,
            score: outcome.score.clamp(0, 100),
            recommendation: policy.recommend(outcome.score.clamp(0, 100)),
            missed_requirements: outcome.missed_requirements.clone(),
            tokens_used: outcome.tokens_used,
            cost_usd: outcome.cost_usd,
            pipeline_version: PIPELINE_VERSION.to_string(),
            embedding_model_version: EMBEDDING_MODEL_VERSION.to_string(),
            auditor_version: AUDITOR_VERSION.to_string(),
            threshold_policy_version: policy.version.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Append-only audit result store
pub struct AuditStore {
    results: Arc<RwLock<Vec<AuditResult>>>,
}

impl AuditStore {
    pub fn new() -> Self {
        Self {
            results: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn append(&self, result: AuditResult) {
        let mut results = self.results.write().await;
        results.push(result);
    }

    pub async fn for_job(&self, job_id: Uuid) -> Vec<AuditResult> {
        let results = self.results.read().await;
        results.iter().filter(|r| r.job_id == job_id).cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.results.read().await.len()
    }
}

impl Default for AuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditRequest<'a> {
    prompt: &'a str,
    plan: &'a Plan,
    correlation_id: Uuid,
}

/// Client for the external auditor agent
pub struct AuditorClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl AuditorClient {
    pub fn new(url: String, timeout_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn audit(
        &self,
        prompt: &str,
        plan: &Plan,
        correlation_id: Uuid,
    ) -> Result<AuditOutcome, AppError> {
        let body = AuditRequest {
            prompt,
            plan,
            correlation_id,
        };

        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalAgent(format!("Auditor unreachable: {}", e)))?
            .error_for_status()
            .map_err(|e| AppError::ExternalAgent(format!("Auditor rejected call: {}", e)))?;

        response
            .json::<AuditOutcome>()
            .await
            .map_err(|e| AppError::ExternalAgent(format!("Auditor response unparseable: {}", e)))
    }
}
