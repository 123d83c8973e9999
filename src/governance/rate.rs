//! Rate guard
//!
//! Two ceilings: concurrent pipeline executions (RAII permits) and requests
//! per rolling minute. Excess requests fail with RATE_LIMITED right away
//! instead of queueing.

use crate::error::AppError;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug)]
struct RateState {
    in_flight: usize,
    /// Timestamps of accepted requests within the last window
    recent: VecDeque<Instant>,
}

pub struct RateGuard {
    max_concurrent: usize,
    requests_per_minute: usize,
    window: Duration,
    state: Arc<Mutex<RateState>>,
}

/// RAII permit for one pipeline execution; dropping it frees the slot
#[derive(Debug)]
pub struct PipelinePermit {
    state: Arc<Mutex<RateState>>,
}

impl Drop for PipelinePermit {
    fn drop(&mut self) {
        let state = self.state.clone();
        tokio::spawn(async move {
            let mut guard = state.lock().await;
            guard.in_flight = guard.in_flight.saturating_sub(1);
        });
    }
}

impl RateGuard {
    pub fn new(max_concurrent: usize, requests_per_minute: usize) -> Self {
        Self {
            max_concurrent,
            requests_per_minute,
            window: Duration::from_secs(60),
            state: Arc::new(Mutex::new(RateState {
                in_flight: 0,
                recent: VecDeque::new(),
            })),
        }
    }

    #[cfg(test)]
    fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Try to admit one pipeline execution
    pub async fn acquire(&self) -> Result<PipelinePermit, AppError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        while let Some(front) = state.recent.front() {
            if now.duration_since(*front) >= self.window {
                state.recent.pop_front();
            } else {
                break;
            }
        }

        if state.recent.len() >= self.requests_per_minute {
            return Err(AppError::RateLimited(format!(
                "Request ceiling of {}/min reached",
                self.requests_per_minute
            )));
        }
        if state.in_flight >= self.max_concurrent {
            return Err(AppError::RateLimited(format!(
                "Concurrency ceiling of {} pipelines reached",
                self.max_concurrent
            )));
        }

        state.recent.push_back(now);
        state.in_flight += 1;
        Ok(PipelinePermit {
            state: self.state.clone(),
        })
    }

    /// Current in-flight count for telemetry
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrency_ceiling_rejects_excess() {
        let guard = RateGuard::new(2, 100);
        let _a = guard.acquire().await.unwrap();
        let _b = guard.acquire().await.unwrap();
        let err = guard.acquire().await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited(_)));
    }

    #[tokio::test]
    async fn dropping_permit_frees_a_slot() {
        let guard = RateGuard::new(1, 100);
        let permit = guard.acquire().await.unwrap();
        drop(permit);
        // Permit release runs on a spawned task.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(guard.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn per_minute_ceiling_rejects_excess() {
        let guard = RateGuard::new(100, 2);
        let _a = guard.acquire().await.unwrap();
        let _b = guard.acquire().await.unwrap();
        assert!(guard.acquire().await.is_err());
    }

    #[tokio::test]
    async fn window_expiry_readmits() {
        let guard = RateGuard::new(100, 1).with_window(Duration::from_millis(20));
        let _a = guard.acquire().await.unwrap();
        assert!(guard.acquire().await.is_err());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(guard.acquire().await.is_ok());
    }
}
