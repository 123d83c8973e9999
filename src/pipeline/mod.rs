//! Pipeline orchestration
//!
//! Drives a job through its stages: governance gate, memory advisory, plan
//! generation with schema validation, gateway dispatch, and the audit stage
//! with its memory/drift side effects. Each stage owns the transitions for
//! the statuses it is responsible for; everything else it leaves alone.

use crate::architect::{validate_raw_plan, AgentRegistry, AgentRole, BudgetTier};
use crate::audit::{AuditResult, ThresholdPolicy};
use crate::drift::DriftVerdict;
use crate::error::AppError;
use crate::governance::PipelinePermit;
use crate::job::{AuditMarker, Job, JobStatus, TransitionPayload};
use crate::memory::{embed, MemoryEntry, MemoryPayload};
use crate::state::SharedState;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

/// Rough token estimate for cost booking: ~4 bytes per token
fn estimate_cost_usd(request_bytes: usize, response_bytes: usize) -> (u64, f64) {
    let tokens = ((request_bytes + response_bytes) / 4) as u64;
    (tokens, (tokens as f64 / 1000.0) * 0.0015)
}

/// Synchronous intake: size ceiling, rate guard, governance gate, advisory
/// retrieval and job creation. Returns the job (already ARCHITECT_PENDING)
/// plus what the spawned architect stage needs.
#[derive(Debug)]
pub struct IntakeOutcome {
    pub job: Job,
    pub advisory: String,
    pub tier: BudgetTier,
    pub permit: PipelinePermit,
}

pub async fn intake(state: &SharedState, prompt: String) -> Result<IntakeOutcome, AppError> {
    let limit = state.settings.pipeline.max_prompt_bytes;
    if prompt.len() > limit {
        return Err(AppError::PayloadTooLarge {
            size: prompt.len(),
            limit,
        });
    }

    let permit = state.rate.acquire().await?;

    let job = state
        .jobs
        .create(prompt.clone(), state.settings.pipeline.schema_version.clone())
        .await;
    let job = state
        .jobs
        .transition(
            job.id,
            JobStatus::Intake,
            JobStatus::ArchitectPending,
            TransitionPayload::default(),
        )
        .await?;

    // Advisory memory is free and feeds tier selection; failure here only
    // degrades advice, never the request.
    let advisory = state.memory.retrieve_advisory(&prompt).await;
    let profile = AgentRegistry::profile(AgentRole::Architect);
    let tier = profile.select_tier(&prompt, !advisory.is_empty());

    if let Err(blocked) = state.ledger.check(tier.estimated_cost_usd()).await {
        // The paid call never happens; park the job in a terminal state
        // so it does not sit in ARCHITECT_PENDING forever.
        let _ = state
            .jobs
            .transition(
                job.id,
                JobStatus::ArchitectPending,
                JobStatus::ArchitectError,
                TransitionPayload {
                    error_message: Some(blocked.to_string()),
                    ..Default::default()
                },
            )
            .await;
        return Err(blocked);
    }

    Ok(IntakeOutcome {
        job,
        advisory,
        tier,
        permit,
    })
}

/// Architect stage: bounded-timeout call, retry on timeout up to the
/// configured attempts, schema validation, and the SUCCESS -> READY hop.
pub async fn run_architect_stage(
    state: SharedState,
    job_id: Uuid,
    prompt: String,
    advisory: String,
    tier: BudgetTier,
    permit: PipelinePermit,
) {
    // Held for the duration of the stage so the concurrency ceiling sees
    // this pipeline as in flight.
    let _permit = permit;
    let max_attempts = state.settings.pipeline.architect_max_attempts;
    let correlation_id = Uuid::new_v4();

    for attempt in 1..=max_attempts {
        match state
            .architect
            .generate(&prompt, &tier, &advisory, correlation_id)
            .await
        {
            Ok(response) => {
                let (tokens, cost) = estimate_cost_usd(prompt.len(), response.raw.len());
                state.ledger.book(cost).await;
                info!(
                    "Architect responded for job {} ({} est tokens, ${:.4})",
                    job_id, tokens, cost
                );
                handle_architect_response(&state, job_id, response.raw, response.elapsed_ms).await;
                return;
            }
            Err(AppError::ArchitectTimeout(ms)) => {
                warn!(
                    "Architect timeout for job {} (attempt {}/{})",
                    job_id, attempt, max_attempts
                );
                let timed_out = state
                    .jobs
                    .transition(
                        job_id,
                        JobStatus::ArchitectPending,
                        JobStatus::ArchitectTimeout,
                        TransitionPayload {
                            error_message: Some(format!("Timed out after {}ms", ms)),
                            increment_attempts: true,
                            ..Default::default()
                        },
                    )
                    .await;
                if timed_out.is_err() {
                    return;
                }
                if attempt == max_attempts {
                    // Attempts exhausted; ARCHITECT_TIMEOUT is final for
                    // this job.
                    return;
                }
                if state
                    .jobs
                    .transition(
                        job_id,
                        JobStatus::ArchitectTimeout,
                        JobStatus::ArchitectPending,
                        TransitionPayload::default(),
                    )
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(e) => {
                let _ = state
                    .jobs
                    .transition(
                        job_id,
                        JobStatus::ArchitectPending,
                        JobStatus::ArchitectError,
                        TransitionPayload {
                            error_message: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                return;
            }
        }
    }
}

async fn handle_architect_response(
    state: &SharedState,
    job_id: Uuid,
    raw: String,
    elapsed_ms: u64,
) {
    match validate_raw_plan(&raw) {
        Ok(validated) => {
            if !validated.hash_matches {
                warn!(
                    "Plan hash mismatch for job {} (declared {:?}, canonical {})",
                    job_id, validated.plan.plan_hash, validated.canonical_hash
                );
            }
            let success = state
                .jobs
                .transition(
                    job_id,
                    JobStatus::ArchitectPending,
                    JobStatus::ArchitectSuccess,
                    TransitionPayload {
                        plan: Some(validated.plan),
                        raw_agent_response: Some(raw),
                        plan_hash: Some(validated.canonical_hash),
                        execution_time_ms: Some(elapsed_ms),
                        ..Default::default()
                    },
                )
                .await;
            if success.is_ok() {
                let _ = state
                    .jobs
                    .transition(
                        job_id,
                        JobStatus::ArchitectSuccess,
                        JobStatus::ReadyForExecution,
                        TransitionPayload::default(),
                    )
                    .await;
            }
        }
        Err(e) => {
            // Keep the raw response around for forensic inspection.
            let _ = state
                .jobs
                .transition(
                    job_id,
                    JobStatus::ArchitectPending,
                    JobStatus::RejectedSchema,
                    TransitionPayload {
                        raw_agent_response: Some(raw),
                        error_message: Some(e.to_string()),
                        ..Default::default()
                    },
                )
                .await;
        }
    }
}

/// Dispatch a READY_FOR_EXECUTION job to the gateway. Returns the recorded
/// signature; the audit stage is spawned after acceptance.
pub async fn run_execution(state: &SharedState, job_id: Uuid) -> Result<Job, AppError> {
    let job = state.jobs.get(job_id).await?;
    if job.status != JobStatus::ReadyForExecution {
        return Err(AppError::InvalidTransition(format!(
            "Job must be READY_FOR_EXECUTION to execute, found {}",
            job.status.as_str()
        )));
    }
    let plan = job
        .plan
        .clone()
        .ok_or_else(|| AppError::Internal("READY job is missing its plan".to_string()))?;
    let plan_hash = job
        .plan_hash
        .clone()
        .ok_or_else(|| AppError::Internal("READY job is missing its plan hash".to_string()))?;

    match state
        .gateway
        .dispatch(job.id, &plan, &plan_hash, &job.schema_version)
        .await
    {
        Ok(ack) => {
            let accepted = state
                .jobs
                .transition(
                    job.id,
                    JobStatus::ReadyForExecution,
                    JobStatus::ExecutionAccepted,
                    TransitionPayload {
                        execution_signature: Some(ack.signature),
                        ..Default::default()
                    },
                )
                .await?;

            let audit_state = state.clone();
            tokio::spawn(async move {
                run_audit_stage(audit_state, job_id).await;
            });
            Ok(accepted)
        }
        Err(e) => {
            let _ = state
                .jobs
                .transition(
                    job.id,
                    JobStatus::ReadyForExecution,
                    JobStatus::ExecutionFailed,
                    TransitionPayload {
                        error_message: Some(e.to_string()),
                        ..Default::default()
                    },
                )
                .await;
            Err(e)
        }
    }
}

/// Audit stage: score the accepted execution, persist the result, book the
/// actual cost, feed memory and the drift detector. A failed auditor call
/// only marks the audit as failed; the execution status stands.
pub async fn run_audit_stage(state: SharedState, job_id: Uuid) {
    let Ok(job) = state.jobs.get(job_id).await else {
        return;
    };
    let Some(plan) = job.plan.clone() else {
        return;
    };
    let _ = state.jobs.set_audit_marker(job_id, AuditMarker::Pending).await;

    let profile = AgentRegistry::profile(AgentRole::Auditor);
    let tier = profile.select_tier(&job.prompt, false);
    if let Err(blocked) = state.ledger.check(tier.estimated_cost_usd()).await {
        warn!("Audit skipped for job {}: {}", job_id, blocked);
        let _ = state.jobs.set_audit_marker(job_id, AuditMarker::Failed).await;
        return;
    }

    let correlation_id = Uuid::new_v4();
    let outcome = match state.auditor.audit(&job.prompt, &plan, correlation_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Auditor call failed for job {}: {}", job_id, e);
            let _ = state.jobs.set_audit_marker(job_id, AuditMarker::Failed).await;
            return;
        }
    };

    let policy = ThresholdPolicy::V1;
    let result = AuditResult::from_outcome(job_id, correlation_id, &outcome, &policy);
    let recommendation = result.recommendation;
    let score = result.score;

    state.ledger.book(result.cost_usd).await;
    state.audits.append(result).await;

    let reason = if outcome.reasoning_summary.is_empty() {
        outcome
            .missed_requirements
            .first()
            .cloned()
            .unwrap_or_else(|| "No findings reported".to_string())
    } else {
        outcome.reasoning_summary.clone()
    };
    let entry = MemoryEntry {
        id: Uuid::new_v4(),
        vector: embed(&job.prompt),
        payload: MemoryPayload {
            prompt: job.prompt.clone(),
            score,
            recommendation: recommendation.as_str().to_string(),
            reason,
            timestamp: Utc::now(),
        },
    };
    if let Err(e) = state.memory.upsert(entry).await {
        warn!("Memory upsert failed for job {}: {}", job_id, e);
    }

    if let DriftVerdict::Drifting(reason) = state.drift.observe(score).await {
        state
            .alerts
            .send(&format!("MODEL DRIFT DETECTED: {}", reason))
            .await;
    }

    let to = match recommendation {
        crate::audit::Recommendation::Accept => JobStatus::AuditAccept,
        crate::audit::Recommendation::Retry => JobStatus::AuditRetry,
        crate::audit::Recommendation::Block => JobStatus::AuditBlock,
    };
    let _ = state
        .jobs
        .transition(
            job_id,
            JobStatus::ExecutionAccepted,
            to,
            TransitionPayload::default(),
        )
        .await;
    let _ = state.jobs.set_audit_marker(job_id, AuditMarker::Completed).await;
    info!("Audit completed for job {}: score {} -> {:?}", job_id, score, recommendation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::state::AppState;
    use axum::routing::post;
    use axum::{Json as AxumJson, Router};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn cost_estimate_scales_with_payload() {
        let (tokens, cost) = estimate_cost_usd(4000, 4000);
        assert_eq!(tokens, 2000);
        assert!((cost - 0.003).abs() < 1e-9);
    }

    async fn spawn_mock(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn plan_doc(summary: &str) -> Value {
        json!({
            "plan": {
                "id": "plan_test_0001",
                "schema_version": "1.0.0",
                "summary": summary,
                "created_at": "2026-08-30T12:00:00Z",
                "steps": [{
                    "step_id": "s1",
                    "type": "file_write",
                    "action": "write_test",
                    "params": {"filename": "canary_test.txt"},
                    "inputs": [],
                    "outputs": ["canary_test.txt"]
                }],
                "rollback": {"on_failure": ["s1"], "snapshot_required": true}
            }
        })
    }

    /// Architect mock: counts hits and echoes the prompt into the summary
    fn architect_mock(hits: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/analyze",
            post(move |AxumJson(body): AxumJson<Value>| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let prompt = body["prompt"].as_str().unwrap_or("").to_string();
                    AxumJson(plan_doc(&prompt))
                }
            }),
        )
    }

    fn test_settings(architect_base: &str) -> Settings {
        let mut settings = Settings::default();
        settings.agents.architect_url = format!("{}/analyze", architect_base);
        // Nothing listens here: advisory memory degrades to empty.
        settings.agents.memory_url = "http://127.0.0.1:1".to_string();
        settings
    }

    #[tokio::test]
    async fn submission_flows_to_ready_for_execution() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(architect_mock(hits.clone())).await;
        let state = Arc::new(AppState::new(test_settings(&base)));

        let outcome = intake(&state, "add a login page".to_string()).await.unwrap();
        let job_id = outcome.job.id;
        run_architect_stage(
            state.clone(),
            job_id,
            outcome.job.prompt,
            outcome.advisory,
            outcome.tier,
            outcome.permit,
        )
        .await;

        let job = state.jobs.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::ReadyForExecution);
        assert_eq!(job.plan.as_ref().unwrap().summary, "add a login page");
        assert!(job.plan_hash.is_some());
        assert!(job.raw_agent_response.is_some());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn governance_block_means_zero_agent_calls() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(architect_mock(hits.clone())).await;
        let mut settings = test_settings(&base);
        settings.governance.daily_limit_usd = 0.0000001;
        let state = Arc::new(AppState::new(settings));

        let err = intake(&state, "expensive request".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GovernanceBlocked(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // The blocked job landed in a terminal state instead of hanging.
        let jobs = state.jobs.list(Some(JobStatus::ArchitectError)).await;
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn oversized_prompt_is_rejected_before_any_call() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(architect_mock(hits.clone())).await;
        let state = Arc::new(AppState::new(test_settings(&base)));

        let prompt = "x".repeat(state.settings.pipeline.max_prompt_bytes + 1);
        let err = intake(&state, prompt).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(state.jobs.list(None).await.is_empty());
    }

    #[tokio::test]
    async fn schema_violation_lands_in_rejected_with_raw_retained() {
        let router = Router::new().route(
            "/analyze",
            post(|| async {
                let mut doc = plan_doc("sneaky");
                doc["plan"]["injected_field"] = json!("not in the schema");
                AxumJson(doc)
            }),
        );
        let base = spawn_mock(router).await;
        let state = Arc::new(AppState::new(test_settings(&base)));

        let outcome = intake(&state, "do something".to_string()).await.unwrap();
        let job_id = outcome.job.id;
        run_architect_stage(
            state.clone(),
            job_id,
            outcome.job.prompt,
            outcome.advisory,
            outcome.tier,
            outcome.permit,
        )
        .await;

        let job = state.jobs.get(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::RejectedSchema);
        assert!(job
            .raw_agent_response
            .as_ref()
            .unwrap()
            .contains("injected_field"));
        assert!(job.plan.is_none());
    }

    #[tokio::test]
    async fn concurrent_submissions_do_not_cross_contaminate() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(architect_mock(hits.clone())).await;
        let state = Arc::new(AppState::new(test_settings(&base)));

        let mut handles = Vec::new();
        for i in 0..5 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                let prompt = format!("request number {}", i);
                let outcome = intake(&state, prompt.clone()).await.unwrap();
                let job_id = outcome.job.id;
                run_architect_stage(
                    state.clone(),
                    job_id,
                    outcome.job.prompt,
                    outcome.advisory,
                    outcome.tier,
                    outcome.permit,
                )
                .await;
                (job_id, prompt)
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            let (job_id, prompt) = handle.await.unwrap();
            assert!(seen.insert(job_id));
            let job = state.jobs.get(job_id).await.unwrap();
            assert_eq!(job.status, JobStatus::ReadyForExecution);
            // Each job carries the plan built for its own prompt.
            assert_eq!(job.plan.as_ref().unwrap().summary, prompt);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn execution_and_audit_complete_the_job() {
        let hits = Arc::new(AtomicUsize::new(0));
        let architect = spawn_mock(architect_mock(hits.clone())).await;
        let gateway = spawn_mock(Router::new().route(
            "/gateway",
            post(|| async { AxumJson(json!({"accepted": true})) }),
        ))
        .await;
        let auditor = spawn_mock(Router::new().route(
            "/audit",
            post(|| async {
                AxumJson(json!({
                    "score": 92,
                    "missed_requirements": [],
                    "tokens_used": 800,
                    "cost_usd": 0.0012,
                    "reasoning_summary": "plan covers the request"
                }))
            }),
        ))
        .await;

        let mut settings = test_settings(&architect);
        settings.agents.gateway_url = format!("{}/gateway", gateway);
        settings.agents.auditor_url = format!("{}/audit", auditor);
        let state = Arc::new(AppState::new(settings));

        let outcome = intake(&state, "ship the feature".to_string()).await.unwrap();
        let job_id = outcome.job.id;
        run_architect_stage(
            state.clone(),
            job_id,
            outcome.job.prompt,
            outcome.advisory,
            outcome.tier,
            outcome.permit,
        )
        .await;

        let accepted = run_execution(&state, job_id).await.unwrap();
        assert_eq!(accepted.status, JobStatus::ExecutionAccepted);
        assert!(accepted.execution_signature.is_some());

        // The audit stage runs on a spawned task; poll for its outcome.
        let mut status = accepted.status;
        for _ in 0..50 {
            status = state.jobs.get(job_id).await.unwrap().status;
            if status == JobStatus::AuditAccept {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(status, JobStatus::AuditAccept);

        let audits = state.audits.for_job(job_id).await;
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].score, 92);
        let job = state.jobs.get(job_id).await.unwrap();
        assert_eq!(job.audit_marker, Some(AuditMarker::Completed));
        // Audit cost was booked against the daily ledger.
        assert!(state.ledger.today().await.total_cost_usd > 0.0);
    }

    #[tokio::test]
    async fn executing_a_non_ready_job_conflicts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_mock(architect_mock(hits)).await;
        let state = Arc::new(AppState::new(test_settings(&base)));

        let outcome = intake(&state, "not ready yet".to_string()).await.unwrap();
        let err = run_execution(&state, outcome.job.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }
}
