//! Telemetry route handler

use crate::state::SharedState;
use axum::extract::State;
use axum::Json;
use serde_json::json;

/// Operational snapshot: job counts, spend, drift statistics and load
pub async fn telemetry(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let counts = state.jobs.counts_by_status().await;
    let cost = state.ledger.today().await;
    let drift = state.drift.stats().await;
    let in_flight = state.rate.in_flight().await;
    let audits = state.audits.count().await;

    Json(json!({
        "jobsByStatus": counts,
        "costGovernance": cost,
        "drift": drift,
        "pipelinesInFlight": in_flight,
        "auditCount": audits,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
