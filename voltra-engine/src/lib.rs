//! The orchestration layer: the bar pipeline and the strategy engine that
//! wires aggregates, services, selectors, risk, execution, hedging,
//! persistence and the event bus into the per-bar trading flow.

mod engine;
mod pipeline;

pub use engine::{trading_date, EngineDeps, StrategyEngine};
pub use pipeline::BarPipeline;

use thiserror::Error;

/// Failures that abort engine construction or recovery.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Persistence(#[from] voltra_persistence::PersistenceError),
    #[error("snapshot decode failed: {0}")]
    SnapshotDecode(String),
}
