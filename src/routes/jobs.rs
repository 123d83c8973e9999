//! Job route handlers
//!
//! Submission, status polling, listing and execution triggering. Submission
//! is asynchronous: the caller gets a job ID back immediately and polls
//! /status/{jobId} while the pipeline runs on a spawned task.

use crate::error::{ApiResult, AppError};
use crate::job::{Job, JobStatus};
use crate::pipeline;
use crate::state::SharedState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Submit a feature request. Returns 202 with the job ID; the pipeline
/// continues on a background task.
pub async fn submit_request(
    State(state): State<SharedState>,
    Json(payload): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    if payload.prompt.trim().is_empty() {
        return Err(AppError::BadRequest("Prompt must not be empty".to_string()));
    }

    let outcome = pipeline::intake(&state, payload.prompt.clone()).await?;
    let response = SubmitResponse {
        job_id: outcome.job.id,
        status: outcome.job.status,
    };

    let task_state = state.clone();
    tokio::spawn(async move {
        pipeline::run_architect_stage(
            task_state,
            outcome.job.id,
            outcome.job.prompt,
            outcome.advisory,
            outcome.tier,
            outcome.permit,
        )
        .await;
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Get the full record of one job
pub async fn job_status(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    let job = state.jobs.get(job_id).await?;
    Ok(Json(job))
}

#[derive(Deserialize)]
pub struct JobsQuery {
    pub status: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub count: usize,
    pub jobs: Vec<Job>,
}

/// List jobs, optionally filtered by status
pub async fn list_jobs(
    State(state): State<SharedState>,
    Query(query): Query<JobsQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let status = match query.status {
        Some(raw) => Some(
            raw.parse::<JobStatus>()
                .map_err(AppError::BadRequest)?,
        ),
        None => None,
    };

    let jobs = state.jobs.list(status).await;
    Ok(Json(JobListResponse {
        count: jobs.len(),
        jobs,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub execution_signature: String,
}

/// Dispatch a READY_FOR_EXECUTION job to the execution gateway
pub async fn execute_job(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<ExecuteResponse>> {
    let job = pipeline::run_execution(&state, job_id).await?;
    let signature = job
        .execution_signature
        .clone()
        .ok_or_else(|| AppError::Internal("Accepted job is missing its signature".to_string()))?;
    Ok(Json(ExecuteResponse {
        job_id: job.id,
        status: job.status,
        execution_signature: signature,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditListResponse {
    pub count: usize,
    pub audits: Vec<crate::audit::AuditResult>,
}

/// Audit results recorded for one job
pub async fn job_audits(
    State(state): State<SharedState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<AuditListResponse>> {
    // 404 for unknown jobs rather than an empty list.
    state.jobs.get(job_id).await?;
    let audits = state.audits.for_job(job_id).await;
    Ok(Json(AuditListResponse {
        count: audits.len(),
        audits,
    }))
}
