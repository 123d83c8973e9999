//! Plan schema and validation
//!
//! The plan contract is strict: unknown fields anywhere in the envelope are
//! rejected, and the architect's self-declared plan_hash is checked against
//! a canonical sha256 recomputed over the sorted-key JSON form.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Wire envelope the architect returns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanEnvelope {
    pub plan: Plan,
}

/// Structured output describing the steps an execution agent should perform
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub id: String,
    pub schema_version: String,
    pub summary: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub steps: Vec<PlanStep>,
    pub rollback: RollbackSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanStep {
    pub step_id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub action: String,
    pub params: serde_json::Value,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollbackSpec {
    pub on_failure: Vec<String>,
    pub snapshot_required: bool,
}

/// Outcome of validating a raw architect response
#[derive(Debug)]
pub struct ValidatedPlan {
    pub plan: Plan,
    /// Canonical sha256 over the plan without its plan_hash field
    pub canonical_hash: String,
    /// False when the architect's self-declared hash disagrees
    pub hash_matches: bool,
}

/// Canonical sha256 of a plan, excluding the plan_hash field itself.
///
/// serde_json maps are key-sorted, so round-tripping through Value
/// normalizes key order at every level.
pub fn canonical_plan_hash(plan: &Plan) -> Result<String, AppError> {
    let mut stripped = plan.clone();
    stripped.plan_hash = None;
    let value = serde_json::to_value(&stripped)
        .map_err(|e| AppError::Internal(format!("Plan serialization failed: {}", e)))?;
    let normalized = serde_json::to_string(&value)
        .map_err(|e| AppError::Internal(format!("Plan serialization failed: {}", e)))?;
    let digest = Sha256::digest(normalized.as_bytes());
    Ok(format!("{:x}", digest))
}

/// Parse and validate a raw architect response against the plan schema.
///
/// The response must be a single strict JSON document (no surrounding
/// prose) and must not carry unknown fields at any level.
pub fn validate_raw_plan(raw: &str) -> Result<ValidatedPlan, AppError> {
    let trimmed = raw.trim();
    let looks_like_json = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if !looks_like_json {
        return Err(AppError::SchemaValidation(
            "Response contains extra text or is not a JSON document".to_string(),
        ));
    }

    let envelope: PlanEnvelope = serde_json::from_str(trimmed)
        .map_err(|e| AppError::SchemaValidation(e.to_string()))?;

    if envelope.plan.steps.is_empty() {
        return Err(AppError::SchemaValidation(
            "Plan must contain at least one step".to_string(),
        ));
    }

    let canonical_hash = canonical_plan_hash(&envelope.plan)?;
    let hash_matches = envelope
        .plan
        .plan_hash
        .as_deref()
        .map_or(false, |h| h == canonical_hash);

    Ok(ValidatedPlan {
        plan: envelope.plan,
        canonical_hash,
        hash_matches,
    })
}

#[cfg(test)]
pub(crate) fn sample_plan_json(plan_hash: Option<&str>) -> serde_json::Value {
    let mut plan = serde_json::json!({
        "id": "plan_20260830_0001",
        "schema_version": "1.0.0",
        "summary": "Atomic plan",
        "created_at": "2026-08-30T12:00:00Z",
        "steps": [{
            "step_id": "s1",
            "type": "file_write",
            "action": "write_test",
            "params": {"filename": "canary_test.txt", "content": "CANARY OK"},
            "inputs": [],
            "outputs": ["canary_test.txt"]
        }],
        "rollback": {"on_failure": ["s1"], "snapshot_required": true}
    });
    if let Some(hash) = plan_hash {
        plan["plan_hash"] = serde_json::Value::String(hash.to_string());
    }
    serde_json::json!({ "plan": plan })
}
