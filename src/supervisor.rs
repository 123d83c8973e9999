//! Supervisor
//!
//! Runs the pipeline service as a single child process, restarting it on
//! crash. Crash-loop policy lives in a pure decision function so it can be
//! tested without timers or real processes: exits landing within the rapid
//! window of the previous restart accumulate; hitting the ceiling produces
//! a fail-stop (one final alert, no further restarts) instead of an alert
//! storm.

use crate::alert::AlertChannel;
use crate::config::SupervisorConfig;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{error, info, warn};

/// Exits within this long after the previous restart count as a crash loop
pub const RAPID_CRASH_WINDOW: Duration = Duration::from_secs(10);

/// What to do after a child exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Respawn after the fixed delay
    Restart { delay: Duration },
    /// Crash loop: alert once and stop supervising
    FailStop,
}

/// Crash-loop policy. Pure: feed it the exit time, the previous restart
/// time and the running count, get back the new count and the action.
pub fn decide(
    now: Instant,
    last_restart: Instant,
    restart_count: u32,
    config: &SupervisorConfig,
) -> (u32, SupervisorAction) {
    let new_count = if now.duration_since(last_restart) < RAPID_CRASH_WINDOW {
        restart_count + 1
    } else {
        0
    };

    if new_count >= config.max_restarts {
        (new_count, SupervisorAction::FailStop)
    } else {
        (
            new_count,
            SupervisorAction::Restart {
                delay: Duration::from_secs(config.restart_delay_secs),
            },
        )
    }
}

fn describe_exit(status: &ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }
    match status.code() {
        Some(code) => format!("exited with code {}", code),
        None => "exited without a code".to_string(),
    }
}

/// Supervise the pipeline binary until shutdown or fail-stop.
///
/// SIGINT/SIGTERM to the supervisor itself tears the child down without
/// restarting or alerting.
pub async fn run(config: SupervisorConfig, alerts: AlertChannel) -> anyhow::Result<()> {
    let exe = std::env::current_exe()?;
    let mut restart_count: u32 = 0;

    info!(
        "Supervisor starting: max_restarts={}, restart_delay={}s",
        config.max_restarts, config.restart_delay_secs
    );

    loop {
        let mut child = Command::new(&exe).kill_on_drop(true).spawn()?;
        let last_restart = Instant::now();
        info!("Pipeline child spawned (pid {:?})", child.id());

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                let reason = describe_exit(&status);
                let (new_count, action) = decide(Instant::now(), last_restart, restart_count, &config);
                restart_count = new_count;

                match action {
                    SupervisorAction::FailStop => {
                        error!("Crash loop: {} rapid restarts, stopping supervisor", restart_count);
                        alerts
                            .send(&format!(
                                "CRASH LOOP: pipeline {} after {} rapid restarts; supervisor is stopping",
                                reason, restart_count
                            ))
                            .await;
                        return Ok(());
                    }
                    SupervisorAction::Restart { delay } => {
                        warn!("Pipeline child {}; restarting in {:?} (count {})", reason, delay, restart_count);
                        alerts
                            .send(&format!("Pipeline {}; restart {} scheduled in {:?}", reason, restart_count, delay))
                            .await;
                        tokio::time::sleep(delay).await;
                    }
                }
            }
            _ = shutdown_signal() => {
                info!("Supervisor received shutdown signal, stopping child");
                let _ = child.kill().await;
                return Ok(());
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            max_restarts: 10,
            restart_delay_secs: 3,
        }
    }

    #[test]
    fn slow_crash_resets_the_counter() {
        let config = config();
        let last = Instant::now() - Duration::from_secs(60);
        let (count, action) = decide(Instant::now(), last, 7, &config);
        assert_eq!(count, 0);
        assert_eq!(
            action,
            SupervisorAction::Restart {
                delay: Duration::from_secs(3)
            }
        );
    }

    #[test]
    fn two_rapid_exits_count_to_two() {
        let config = config();
        let now = Instant::now();
        let (count, _) = decide(now, now - Duration::from_secs(2), 0, &config);
        assert_eq!(count, 1);
        let (count, _) = decide(now, now - Duration::from_secs(2), count, &config);
        assert_eq!(count, 2);
    }

    #[test]
    fn ten_rapid_crashes_fail_stop_exactly_once() {
        let config = config();
        let now = Instant::now();
        let mut count = 0;
        let mut fail_stops = 0;

        for _ in 0..10 {
            let (new_count, action) = decide(now, now - Duration::from_secs(1), count, &config);
            count = new_count;
            if action == SupervisorAction::FailStop {
                fail_stops += 1;
                break;
            }
        }

        assert_eq!(count, 10);
        assert_eq!(fail_stops, 1);
    }

    #[test]
    fn boundary_exit_just_past_window_resets() {
        let config = config();
        let now = Instant::now();
        let (count, _) = decide(now, now - RAPID_CRASH_WINDOW, 5, &config);
        assert_eq!(count, 0);
    }
}
