//! Job data models and status state machine
//!
//! A Job tracks one feature request through the pipeline: intake, plan
//! generation, schema validation, gateway dispatch and audit. Statuses move
//! monotonically through the state graph; the only backward edge is the
//! architect timeout retry.

mod store;

pub use store::JobStore;

use crate::architect::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job status in the pipeline workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, not yet dispatched to the architect
    Intake,
    /// Architect call in flight
    ArchitectPending,
    /// Plan received and schema-valid
    ArchitectSuccess,
    /// Architect call timed out; retryable until attempts run out
    ArchitectTimeout,
    /// Architect call failed (non-timeout)
    ArchitectError,
    /// Plan validated, waiting for an execution trigger
    ReadyForExecution,
    /// Plan response violated the schema; raw response retained
    RejectedSchema,
    /// Gateway acknowledged the dispatch
    ExecutionAccepted,
    /// Gateway retries exhausted
    ExecutionFailed,
    /// Audit recommendation: accept
    AuditAccept,
    /// Audit recommendation: retry (submit a new job)
    AuditRetry,
    /// Audit recommendation: block
    AuditBlock,
}

impl JobStatus {
    /// Whether `to` is a legal next status after `self`.
    ///
    /// `ArchitectTimeout -> ArchitectPending` is the single retry edge;
    /// everything else only moves forward.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Intake, ArchitectPending)
                | (ArchitectPending, ArchitectSuccess)
                | (ArchitectPending, ArchitectTimeout)
                | (ArchitectPending, ArchitectError)
                | (ArchitectPending, RejectedSchema)
                | (ArchitectTimeout, ArchitectPending)
                | (ArchitectSuccess, ReadyForExecution)
                | (ArchitectSuccess, RejectedSchema)
                | (ReadyForExecution, ExecutionAccepted)
                | (ReadyForExecution, ExecutionFailed)
                | (ExecutionAccepted, AuditAccept)
                | (ExecutionAccepted, AuditRetry)
                | (ExecutionAccepted, AuditBlock)
        )
    }

    /// Terminal statuses for the current attempt. A caller retries by
    /// submitting a new job, never by mutating a terminal one.
    pub fn is_terminal(self) -> bool {
        use JobStatus::*;
        matches!(
            self,
            RejectedSchema | ArchitectError | ExecutionFailed | AuditAccept | AuditRetry | AuditBlock
        )
    }

    pub fn as_str(self) -> &'static str {
        use JobStatus::*;
        match self {
            Intake => "INTAKE",
            ArchitectPending => "ARCHITECT_PENDING",
            ArchitectSuccess => "ARCHITECT_SUCCESS",
            ArchitectTimeout => "ARCHITECT_TIMEOUT",
            ArchitectError => "ARCHITECT_ERROR",
            ReadyForExecution => "READY_FOR_EXECUTION",
            RejectedSchema => "REJECTED_SCHEMA",
            ExecutionAccepted => "EXECUTION_ACCEPTED",
            ExecutionFailed => "EXECUTION_FAILED",
            AuditAccept => "AUDIT_ACCEPT",
            AuditRetry => "AUDIT_RETRY",
            AuditBlock => "AUDIT_BLOCK",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use JobStatus::*;
        match s {
            "INTAKE" => Ok(Intake),
            "ARCHITECT_PENDING" => Ok(ArchitectPending),
            "ARCHITECT_SUCCESS" => Ok(ArchitectSuccess),
            "ARCHITECT_TIMEOUT" => Ok(ArchitectTimeout),
            "ARCHITECT_ERROR" => Ok(ArchitectError),
            "READY_FOR_EXECUTION" => Ok(ReadyForExecution),
            "REJECTED_SCHEMA" => Ok(RejectedSchema),
            "EXECUTION_ACCEPTED" => Ok(ExecutionAccepted),
            "EXECUTION_FAILED" => Ok(ExecutionFailed),
            "AUDIT_ACCEPT" => Ok(AuditAccept),
            "AUDIT_RETRY" => Ok(AuditRetry),
            "AUDIT_BLOCK" => Ok(AuditBlock),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

/// Marker for the audit side-channel; auditor failure never rewrites the
/// job's execution status, it lands here instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMarker {
    Pending,
    Completed,
    Failed,
}

/// One tracked feature request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub prompt: String,
    pub status: JobStatus,
    /// Validated plan, present from ARCHITECT_SUCCESS onward
    pub plan: Option<Plan>,
    /// Raw architect response, retained for forensic inspection
    pub raw_agent_response: Option<String>,
    /// Canonical sha256 of the plan
    pub plan_hash: Option<String>,
    /// Execution signature recorded at dispatch time
    pub execution_signature: Option<String>,
    /// Architect attempts consumed so far
    pub attempts: u32,
    /// Wall time of the successful architect call
    pub execution_time_ms: Option<u64>,
    pub schema_version: String,
    pub audit_marker: Option<AuditMarker>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(prompt: String, schema_version: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            prompt,
            status: JobStatus::Intake,
            plan: None,
            raw_agent_response: None,
            plan_hash: None,
            execution_signature: None,
            attempts: 0,
            execution_time_ms: None,
            schema_version,
            audit_marker: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields a transition may write alongside the status change
#[derive(Debug, Clone, Default)]
pub struct TransitionPayload {
    pub plan: Option<Plan>,
    pub raw_agent_response: Option<String>,
    pub plan_hash: Option<String>,
    pub execution_signature: Option<String>,
    pub execution_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub increment_attempts: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn intake_is_never_revisited() {
        use JobStatus::*;
        for status in [
            ArchitectPending,
            ArchitectSuccess,
            ArchitectTimeout,
            ArchitectError,
            ReadyForExecution,
            RejectedSchema,
            ExecutionAccepted,
            ExecutionFailed,
            AuditAccept,
            AuditRetry,
            AuditBlock,
        ] {
            assert!(!status.can_transition(Intake), "{:?} -> INTAKE", status);
        }
    }

    #[test]
    fn happy_path_is_valid() {
        use JobStatus::*;
        let path = [
            Intake,
            ArchitectPending,
            ArchitectSuccess,
            ReadyForExecution,
            ExecutionAccepted,
            AuditAccept,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn timeout_retry_edge_is_the_only_backward_edge() {
        use JobStatus::*;
        assert!(ArchitectTimeout.can_transition(ArchitectPending));
        assert!(!ArchitectError.can_transition(ArchitectPending));
        assert!(!RejectedSchema.can_transition(ArchitectPending));
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        use JobStatus::*;
        let all = [
            Intake,
            ArchitectPending,
            ArchitectSuccess,
            ArchitectTimeout,
            ArchitectError,
            ReadyForExecution,
            RejectedSchema,
            ExecutionAccepted,
            ExecutionFailed,
            AuditAccept,
            AuditRetry,
            AuditBlock,
        ];
        for status in all {
            if status.is_terminal() {
                for next in all {
                    assert!(!status.can_transition(next), "{:?} -> {:?}", status, next);
                }
            }
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        let status: JobStatus = "READY_FOR_EXECUTION".parse().unwrap();
        assert_eq!(status, JobStatus::ReadyForExecution);
        assert_eq!(status.as_str(), "READY_FOR_EXECUTION");
    }
}
