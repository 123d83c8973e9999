//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::alert::AlertChannel;
use crate::architect::ArchitectClient;
use crate::audit::{AuditStore, AuditorClient};
use crate::config::Settings;
use crate::drift::DriftDetector;
use crate::gateway::GatewayClient;
use crate::governance::{CostLedger, RateGuard};
use crate::job::JobStore;
use crate::memory::MemoryClient;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Settings,

    /// Job records with their status machine
    pub jobs: JobStore,

    /// Append-only audit results
    pub audits: AuditStore,

    /// Daily spend ledger with the kill switch
    pub ledger: CostLedger,

    /// Concurrency and request-rate ceilings
    pub rate: RateGuard,

    /// Rolling audit-score statistics
    pub drift: DriftDetector,

    /// Vector similarity store for prior failures
    pub memory: MemoryClient,

    /// Plan-generation agent client
    pub architect: ArchitectClient,

    /// Scoring agent client
    pub auditor: AuditorClient,

    /// Downstream execution gateway client
    pub gateway: GatewayClient,

    /// Fire-and-forget webhook alerts
    pub alerts: AlertChannel,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let ledger = CostLedger::new(settings.governance.daily_limit_usd);
        let rate = RateGuard::new(
            settings.governance.max_concurrent_pipelines,
            settings.governance.requests_per_minute,
        );
        let drift = DriftDetector::new(settings.drift.clone());
        let memory = MemoryClient::new(
            settings.agents.memory_url.clone(),
            settings.agents.memory_collection.clone(),
            settings.agents.memory_api_key.clone(),
            settings.memory.clone(),
        );
        let architect = ArchitectClient::new(
            settings.agents.architect_url.clone(),
            settings.pipeline.architect_timeout_secs,
        );
        let auditor = AuditorClient::new(
            settings.agents.auditor_url.clone(),
            settings.pipeline.auditor_timeout_secs,
        );
        let gateway = GatewayClient::new(
            settings.agents.gateway_url.clone(),
            settings.agents.gateway_secret.clone(),
            settings.pipeline.gateway_timeout_secs,
            settings.pipeline.gateway_max_attempts,
        );
        let alerts = AlertChannel::new(settings.agents.alert_webhook_url.clone());

        Self {
            settings,
            jobs: JobStore::new(),
            audits: AuditStore::new(),
            ledger,
            rate,
            drift,
            memory,
            architect,
            auditor,
            gateway,
            alerts,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
