//! Job storage
//!
//! Thread-safe store with optimistic per-job concurrency: every status
//! change states the status it expects to replace, and loses with a
//! STALE_TRANSITION conflict if another writer got there first. Unrelated
//! jobs never contend beyond the map lock.

use crate::error::AppError;
use crate::job::{Job, JobStatus, TransitionPayload};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Thread-safe job store
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a new job in INTAKE
    pub async fn create(&self, prompt: String, schema_version: String) -> Job {
        let job = Job::new(prompt, schema_version);
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job.clone());
        job
    }

    /// Get a job by ID
    pub async fn get(&self, id: Uuid) -> Result<Job, AppError> {
        let jobs = self.jobs.read().await;
        jobs.get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
    }

    /// List jobs, optionally filtered by status, newest first
    pub async fn list(&self, status: Option<JobStatus>) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    /// Move a job from `from` to `to`, writing the payload fields.
    ///
    /// Fails with StaleTransition when the current status is not `from`,
    /// and with InvalidTransition when the edge is not in the state graph.
    pub async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        payload: TransitionPayload,
    ) -> Result<Job, AppError> {
        if !from.can_transition(to) {
            return Err(AppError::InvalidTransition(format!(
                "{} -> {} is not a legal edge",
                from.as_str(),
                to.as_str()
            )));
        }

        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;

        if job.status != from {
            return Err(AppError::StaleTransition {
                job_id: id.to_string(),
                expected: from.as_str().to_string(),
                actual: job.status.as_str().to_string(),
            });
        }

        job.status = to;
        if let Some(plan) = payload.plan {
            job.plan = Some(plan);
        }
        if let Some(raw) = payload.raw_agent_response {
            job.raw_agent_response = Some(raw);
        }
        if let Some(hash) = payload.plan_hash {
            job.plan_hash = Some(hash);
        }
        if let Some(sig) = payload.execution_signature {
            job.execution_signature = Some(sig);
        }
        if let Some(ms) = payload.execution_time_ms {
            job.execution_time_ms = Some(ms);
        }
        if let Some(err) = payload.error_message {
            job.error_message = Some(err);
        }
        if payload.increment_attempts {
            job.attempts += 1;
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    /// Set the audit marker without touching the status machine
    pub async fn set_audit_marker(
        &self,
        id: Uuid,
        marker: crate::job::AuditMarker,
    ) -> Result<(), AppError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
        job.audit_marker = Some(marker);
        job.updated_at = Utc::now();
        Ok(())
    }

    /// Per-status job counts for telemetry
    pub async fn counts_by_status(&self) -> HashMap<String, usize> {
        let jobs = self.jobs.read().await;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for job in jobs.values() {
            *counts.entry(job.status.as_str().to_string()).or_default() += 1;
        }
        counts
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn create_and_get() {
        let store = JobStore::new();
        let job = store.create("add a login page".to_string(), "1.0.0".to_string()).await;
        let fetched = store.get(job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Intake);
        assert_eq!(fetched.prompt, "add a login page");
    }

    #[tokio::test]
    async fn transition_enforces_expected_status() {
        let store = JobStore::new();
        let job = store.create("p".to_string(), "1.0.0".to_string()).await;

        store
            .transition(
                job.id,
                JobStatus::Intake,
                JobStatus::ArchitectPending,
                TransitionPayload::default(),
            )
            .await
            .unwrap();

        // A second writer still expecting INTAKE must lose.
        let err = store
            .transition(
                job.id,
                JobStatus::Intake,
                JobStatus::ArchitectPending,
                TransitionPayload::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StaleTransition { .. }));
    }

    #[tokio::test]
    async fn transition_rejects_illegal_edges() {
        let store = JobStore::new();
        let job = store.create("p".to_string(), "1.0.0".to_string()).await;
        let err = store
            .transition(
                job.id,
                JobStatus::Intake,
                JobStatus::ExecutionAccepted,
                TransitionPayload::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let store = JobStore::new();
        let a = store.create("a".to_string(), "1.0.0".to_string()).await;
        let _b = store.create("b".to_string(), "1.0.0".to_string()).await;
        store
            .transition(
                a.id,
                JobStatus::Intake,
                JobStatus::ArchitectPending,
                TransitionPayload::default(),
            )
            .await
            .unwrap();

        let pending = store.list(Some(JobStatus::ArchitectPending)).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);
        assert_eq!(store.list(None).await.len(), 2);
    }
}
