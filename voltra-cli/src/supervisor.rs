//! Supervising parent process: spawn the worker child, restart it with
//! exponential backoff, gate it on trading sessions and shut it down
//! cleanly on signals.
//!
//! Restart policy: delays 5s, 10s, 20s, ... capped at 300s, at most 10
//! consecutive restarts; the counter resets after the child has stayed up
//! for an hour. Outside trading sessions the child is stopped and the
//! counter cleared. SIGHUP restarts the child to pick up new configuration.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};

use voltra_config::{AppConfig, RuntimeConfig, SessionWindow};

/// Exit code the worker uses for unrecoverable state corruption; the
/// supervisor refuses to restart into it.
pub const CORRUPTION_EXIT_CODE: i32 = 3;

/// Backoff delay before restart attempt `restart_count` (1-based).
#[must_use]
pub fn restart_delay(runtime: &RuntimeConfig, restart_count: u32) -> Duration {
    if restart_count == 0 {
        return Duration::ZERO;
    }
    let factor = 2_f64.powi(restart_count.saturating_sub(1) as i32);
    let seconds =
        (runtime.restart_base_delay_seconds * factor).min(runtime.restart_max_delay_seconds);
    Duration::from_secs_f64(seconds)
}

/// Is `now` inside any configured session window? Overnight windows
/// (`start > end`) wrap midnight. No windows means always-on.
#[must_use]
pub fn in_trading_session(sessions: &[SessionWindow], now: NaiveTime) -> bool {
    if sessions.is_empty() {
        return true;
    }
    sessions.iter().any(|window| {
        let (Ok(start), Ok(end)) = (
            NaiveTime::parse_from_str(&window.start, "%H:%M"),
            NaiveTime::parse_from_str(&window.end, "%H:%M"),
        ) else {
            tracing::warn!(?window, "unparsable session window ignored");
            return false;
        };
        if start <= end {
            now >= start && now <= end
        } else {
            now >= start || now <= end
        }
    })
}

struct WorkerHandle {
    child: Child,
    started_at: Instant,
}

fn spawn_worker(env: &Option<String>) -> Result<WorkerHandle> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let mut command = Command::new(exe);
    command.arg("worker");
    if let Some(name) = env {
        command.arg("--env").arg(name);
    }
    // Worker logs inherit the parent's stdio.
    command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    let child = command.spawn().context("failed to spawn worker")?;
    tracing::info!(pid = child.id(), "worker started");
    Ok(WorkerHandle {
        child,
        started_at: Instant::now(),
    })
}

async fn stop_worker(handle: &mut WorkerHandle) {
    // Give the child a grace period to save state, then make it final.
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    tokio::select! {
        status = handle.child.wait() => {
            tracing::info!(?status, "worker exited on its own");
            return;
        }
        () = &mut deadline => {}
    }
    tracing::warn!("worker unresponsive; killing");
    let _ = handle.child.kill().await;
}

pub async fn run(config: AppConfig, env: Option<String>) -> Result<()> {
    let runtime = config.runtime.clone();
    let mut sigterm = signal(SignalKind::terminate()).context("sigterm handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("sigint handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("sighup handler")?;

    let mut worker: Option<WorkerHandle> = None;
    let mut restart_count: u32 = 0;
    tracing::info!("supervisor started");

    loop {
        let in_session = in_trading_session(&runtime.trading_sessions, Local::now().time());

        if !in_session {
            if let Some(mut handle) = worker.take() {
                tracing::info!("leaving trading session; stopping worker");
                stop_worker(&mut handle).await;
                restart_count = 0;
            }
            tokio::select! {
                _ = sigterm.recv() => break,
                _ = sigint.recv() => break,
                _ = tokio::time::sleep(Duration::from_secs(30)) => continue,
            }
        }

        if worker.is_none() {
            if restart_count >= runtime.max_restart_count {
                tracing::error!(
                    restarts = restart_count,
                    "restart limit reached; supervisor giving up"
                );
                break;
            }
            let delay = restart_delay(&runtime, restart_count);
            if !delay.is_zero() {
                tracing::info!(delay_secs = delay.as_secs_f64(), "waiting before restart");
                tokio::time::sleep(delay).await;
            }
            restart_count += 1;
            worker = Some(spawn_worker(&env)?);
        }

        enum Outcome {
            Exited { code: Option<i32>, uptime: Duration },
            Reload,
            Shutdown,
        }

        let outcome = {
            let handle = worker.as_mut().expect("worker running");
            tokio::select! {
                status = handle.child.wait() => Outcome::Exited {
                    code: status.ok().and_then(|s| s.code()),
                    uptime: handle.started_at.elapsed(),
                },
                _ = sighup.recv() => Outcome::Reload,
                _ = sigterm.recv() => Outcome::Shutdown,
                _ = sigint.recv() => Outcome::Shutdown,
            }
        };

        match outcome {
            Outcome::Exited { code, uptime } => {
                worker = None;
                if code == Some(0) {
                    tracing::info!("worker exited cleanly; supervisor done");
                    break;
                }
                if code == Some(CORRUPTION_EXIT_CODE) {
                    tracing::error!(
                        "worker reports corrupted state; manual intervention required"
                    );
                    break;
                }
                if uptime >= Duration::from_secs_f64(runtime.restart_reset_hours * 3600.0) {
                    tracing::info!("worker was stable; resetting restart counter");
                    restart_count = 0;
                }
                tracing::warn!(?code, uptime_secs = uptime.as_secs(), "worker died");
            }
            Outcome::Reload => {
                tracing::info!("reload requested; restarting worker");
                if let Some(mut handle) = worker.take() {
                    stop_worker(&mut handle).await;
                }
                restart_count = 0;
            }
            Outcome::Shutdown => {
                tracing::info!("shutdown signal received");
                if let Some(mut handle) = worker.take() {
                    stop_worker(&mut handle).await;
                }
                break;
            }
        }
    }

    tracing::info!("supervisor stopped");
    Ok(())
}
