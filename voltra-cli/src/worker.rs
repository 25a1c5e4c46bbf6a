//! Worker process: bootstrap the engine (env validation, database,
//! gateway, state recovery) and drive the single-threaded event loop.
//!
//! Loop cadence: gateway events are drained every 200 ms; the executor
//! timeout sweep and scheduler dispatch run at 1 Hz; hedging runs on its
//! own slower cadence.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use tokio::signal::unix::{signal, SignalKind};

use voltra_config::AppConfig;
use voltra_engine::{BarPipeline, EngineDeps, StrategyEngine};
use voltra_gateway::{SimGateway, TradingGateway};
use voltra_persistence::{DatabaseFactory, MonitorWriter, PersistenceError, StateRepository};
use voltra_services::ServiceBundle;

use crate::supervisor::CORRUPTION_EXIT_CODE;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const TIMER_INTERVAL: Duration = Duration::from_secs(1);
const HEDGE_INTERVAL: Duration = Duration::from_secs(60);

fn build_gateway(config: &AppConfig) -> Result<Box<dyn TradingGateway>> {
    match config.gateway_driver.as_str() {
        "sim" | "paper" => Ok(Box::new(SimGateway::new())),
        other => bail!(
            "unknown gateway driver '{other}'; broker connectors are wired in externally"
        ),
    }
}

pub async fn run(config: AppConfig) -> Result<()> {
    tracing::info!(
        strategy = %config.strategy_name,
        variant = %config.variant,
        "worker starting"
    );

    // Fail fast: the database must be reachable before anything trades.
    let factory = DatabaseFactory::global(config.runtime.database_connect_timeout_seconds)
        .context("database startup validation failed")?;
    let repository = StateRepository::new(factory.connection())?;
    if let Err(err) = repository.cleanup(
        &config.strategy_name,
        config.persistence.keep_days,
        Local::now(),
    ) {
        tracing::warn!(error = %err, "snapshot cleanup failed");
    }
    let monitor = MonitorWriter::new(
        factory.connection(),
        config.variant.clone(),
        config.instance_id.clone(),
    )?;

    // Broker session next, inside its own overall budget.
    let mut gateway = build_gateway(&config)?;
    let connect_budget = config.runtime.gateway_connect_timeout_seconds;
    gateway
        .connect(connect_budget)
        .with_context(|| format!("gateway connect failed within {connect_budget} seconds"))?;

    let services = ServiceBundle::reference(config.sizing, config.option_selector);
    let mut engine = StrategyEngine::new(
        config.clone(),
        gateway,
        services,
        EngineDeps {
            repository: Some(repository),
            monitor: Some(monitor),
        },
    );

    // Recover or start empty. Corruption is the one error the supervisor
    // must not retry into: exit with its dedicated code.
    match engine.restore_state() {
        Ok(recovered) => {
            tracing::info!(recovered, "engine state initialized");
        }
        Err(voltra_engine::EngineError::Persistence(PersistenceError::Corruption {
            strategy_name,
            detail,
        })) => {
            tracing::error!(%strategy_name, %detail, "state archive corrupted; aborting");
            std::process::exit(CORRUPTION_EXIT_CODE);
        }
        Err(err) => return Err(err.into()),
    }

    let mut pipeline = BarPipeline::new(config.bar_window, config.max_buffered_bars);
    let mut poll_timer = tokio::time::interval(POLL_INTERVAL);
    let mut second_timer = tokio::time::interval(TIMER_INTERVAL);
    let mut hedge_timer = tokio::time::interval(HEDGE_INTERVAL);
    let mut sigterm = signal(SignalKind::terminate()).context("sigterm handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("sigint handler")?;

    tracing::info!("worker event loop running");
    loop {
        tokio::select! {
            _ = poll_timer.tick() => {
                engine.process_gateway_events(&mut pipeline);
            }
            _ = second_timer.tick() => {
                engine.on_timer(Local::now());
            }
            _ = hedge_timer.tick() => {
                engine.run_hedging_cycle();
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM: shutting down");
                break;
            }
            _ = sigint.recv() => {
                tracing::info!("SIGINT: shutting down");
                break;
            }
        }
    }

    // Last consistent snapshot before the process dies.
    engine.force_save();
    tracing::info!("worker stopped");
    Ok(())
}
