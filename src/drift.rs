//! Drift detector
//!
//! Rolling statistics over recent audit scores. Purely observational: a
//! breach of the configured bounds sends one advisory alert (cooldown
//! limited) and never blocks or mutates a job.

use crate::config::DriftConfig;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Snapshot of the current window statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftStats {
    pub sample_count: usize,
    pub mean_score: f64,
    pub std_dev_score: f64,
}

/// What the detector concluded after an observation
#[derive(Debug, Clone, PartialEq)]
pub enum DriftVerdict {
    Stable,
    /// Bounds breached, alert due
    Drifting(String),
    /// Bounds breached but still inside the alert cooldown
    DriftingCoolingDown,
}

struct DriftState {
    scores: VecDeque<i64>,
    last_alert: Option<Instant>,
}

pub struct DriftDetector {
    config: DriftConfig,
    state: Arc<Mutex<DriftState>>,
}

impl DriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(DriftState {
                scores: VecDeque::new(),
                last_alert: None,
            })),
        }
    }

    /// Record one audit score and evaluate the window.
    pub async fn observe(&self, score: i64) -> DriftVerdict {
        let mut state = self.state.lock().await;
        state.scores.push_back(score);
        while state.scores.len() > self.config.window {
            state.scores.pop_front();
        }

        // A couple of samples say nothing about drift.
        if state.scores.len() < 3 {
            return DriftVerdict::Stable;
        }

        let stats = compute_stats(state.scores.iter().copied());
        let breached_mean = stats.mean_score < self.config.min_mean;
        let breached_spread = stats.std_dev_score > self.config.max_std_dev;
        if !breached_mean && !breached_spread {
            return DriftVerdict::Stable;
        }

        let cooldown = Duration::from_secs(self.config.alert_cooldown_secs);
        if let Some(last) = state.last_alert {
            if last.elapsed() < cooldown {
                return DriftVerdict::DriftingCoolingDown;
            }
        }
        state.last_alert = Some(Instant::now());

        let reason = if breached_mean {
            format!(
                "mean score {:.1} fell below {:.1} over the last {} audits",
                stats.mean_score, self.config.min_mean, stats.sample_count
            )
        } else {
            format!(
                "score std-dev {:.1} exceeded {:.1} over the last {} audits",
                stats.std_dev_score, self.config.max_std_dev, stats.sample_count
            )
        };
        DriftVerdict::Drifting(reason)
    }

    pub async fn stats(&self) -> DriftStats {
        let state = self.state.lock().await;
        if state.scores.is_empty() {
            return DriftStats {
                sample_count: 0,
                mean_score: 0.0,
                std_dev_score: 0.0,
            };
        }
        compute_stats(state.scores.iter().copied())
    }
}

fn compute_stats(scores: impl Iterator<Item = i64>) -> DriftStats {
    let values: Vec<f64> = scores.map(|s| s as f64).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    // Population std-dev, matching the persisted std_dev_score metric.
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    DriftStats {
        sample_count: values.len(),
        mean_score: mean,
        std_dev_score: variance.sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window: usize, min_mean: f64, max_std_dev: f64) -> DriftConfig {
        DriftConfig {
            window,
            min_mean,
            max_std_dev,
            alert_cooldown_secs: 3600,
        }
    }

    #[tokio::test]
    async fn stable_scores_stay_stable() {
        let detector = DriftDetector::new(config(20, 70.0, 15.0));
        for _ in 0..10 {
            assert_eq!(detector.observe(85).await, DriftVerdict::Stable);
        }
        let stats = detector.stats().await;
        assert!((stats.mean_score - 85.0).abs() < f64::EPSILON);
        assert!(stats.std_dev_score < f64::EPSILON);
    }

    #[tokio::test]
    async fn low_mean_triggers_once_then_cools_down() {
        let detector = DriftDetector::new(config(20, 70.0, 50.0));
        detector.observe(40).await;
        detector.observe(42).await;
        let third = detector.observe(41).await;
        assert!(matches!(third, DriftVerdict::Drifting(_)));
        // Same breach inside the cooldown must not re-alert.
        assert_eq!(detector.observe(40).await, DriftVerdict::DriftingCoolingDown);
    }

    #[tokio::test]
    async fn window_evicts_old_scores() {
        let detector = DriftDetector::new(config(3, 70.0, 100.0));
        detector.observe(10).await;
        detector.observe(90).await;
        detector.observe(90).await;
        detector.observe(90).await;
        let stats = detector.stats().await;
        assert_eq!(stats.sample_count, 3);
        assert!((stats.mean_score - 90.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn spread_breach_reports_std_dev() {
        let detector = DriftDetector::new(config(20, 0.0, 5.0));
        detector.observe(10).await;
        detector.observe(90).await;
        let verdict = detector.observe(50).await;
        match verdict {
            DriftVerdict::Drifting(reason) => assert!(reason.contains("std-dev")),
            other => panic!("expected drift, got {:?}", other),
        }
    }
}
