//! Cost & rate governance
//!
//! Every paid external call is gated twice: the cost ledger enforces the
//! daily spend ceiling with a latching kill switch, and the rate guard caps
//! concurrent pipelines and requests per minute. Neither ever queues work;
//! a blocked caller gets a distinguishable error immediately.

mod rate;

pub use rate::{PipelinePermit, RateGuard};

use crate::error::AppError;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One row per calendar day
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostGovernanceRecord {
    pub date: NaiveDate,
    pub daily_limit_usd: f64,
    pub total_cost_usd: f64,
    pub kill_switch_active: bool,
}

impl CostGovernanceRecord {
    fn new(date: NaiveDate, daily_limit_usd: f64) -> Self {
        Self {
            date,
            daily_limit_usd,
            total_cost_usd: 0.0,
            kill_switch_active: false,
        }
    }
}

/// Daily spend ledger with a latching kill switch.
///
/// total_cost_usd only grows within a day; once the kill switch trips it
/// stays tripped until the date rolls over.
pub struct CostLedger {
    default_limit_usd: f64,
    record: Arc<Mutex<CostGovernanceRecord>>,
}

impl CostLedger {
    pub fn new(default_limit_usd: f64) -> Self {
        let today = Utc::now().date_naive();
        Self {
            default_limit_usd,
            record: Arc::new(Mutex::new(CostGovernanceRecord::new(
                today,
                default_limit_usd,
            ))),
        }
    }

    /// Roll the record over lazily on the first touch of a new day
    fn roll_if_needed(&self, record: &mut CostGovernanceRecord) {
        let today = Utc::now().date_naive();
        if record.date != today {
            *record = CostGovernanceRecord::new(today, self.default_limit_usd);
        }
    }

    /// Pre-call gate. Returns GovernanceBlocked when the kill switch is
    /// active or the estimate would push today's total past the limit; the
    /// overrun case latches the switch as a side effect.
    pub async fn check(&self, estimated_cost_usd: f64) -> Result<(), AppError> {
        let mut record = self.record.lock().await;
        self.roll_if_needed(&mut record);

        if record.kill_switch_active {
            return Err(AppError::GovernanceBlocked(
                "Kill switch active for today".to_string(),
            ));
        }
        if record.total_cost_usd + estimated_cost_usd > record.daily_limit_usd {
            record.kill_switch_active = true;
            return Err(AppError::GovernanceBlocked(format!(
                "Estimated ${:.4} would exceed daily limit ${:.2} (spent ${:.4})",
                estimated_cost_usd, record.daily_limit_usd, record.total_cost_usd
            )));
        }
        Ok(())
    }

    /// Book the actual (not estimated) cost of a completed paid call.
    /// Crossing the limit here also latches the kill switch.
    pub async fn book(&self, actual_cost_usd: f64) {
        let mut record = self.record.lock().await;
        self.roll_if_needed(&mut record);

        record.total_cost_usd += actual_cost_usd.max(0.0);
        if record.total_cost_usd >= record.daily_limit_usd {
            record.kill_switch_active = true;
        }
    }

    /// Snapshot of today's record for telemetry
    pub async fn today(&self) -> CostGovernanceRecord {
        let mut record = self.record.lock().await;
        self.roll_if_needed(&mut record);
        record.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_under_limit() {
        let ledger = CostLedger::new(5.0);
        assert!(ledger.check(1.0).await.is_ok());
    }

    #[tokio::test]
    async fn blocks_and_latches_on_overrun() {
        let ledger = CostLedger::new(1.0);
        ledger.book(0.9).await;

        let err = ledger.check(0.5).await.unwrap_err();
        assert!(matches!(err, AppError::GovernanceBlocked(_)));

        // Latched: even a tiny estimate is now refused.
        assert!(ledger.check(0.0001).await.is_err());
        assert!(ledger.today().await.kill_switch_active);
    }

    #[tokio::test]
    async fn booking_past_limit_latches() {
        let ledger = CostLedger::new(1.0);
        assert!(ledger.check(0.2).await.is_ok());
        ledger.book(1.5).await;
        assert!(ledger.today().await.kill_switch_active);
        assert!(ledger.check(0.01).await.is_err());
    }

    #[tokio::test]
    async fn total_cost_never_decreases() {
        let ledger = CostLedger::new(10.0);
        ledger.book(1.0).await;
        ledger.book(-5.0).await;
        assert!((ledger.today().await.total_cost_usd - 1.0).abs() < f64::EPSILON);
    }
}
