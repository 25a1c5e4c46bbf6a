//! Domain aggregates: per-symbol market state and the strategy's position
//! book. Both are exclusively owned by the strategy engine; external callers
//! only see clones returned by query methods.

mod instrument;
mod position;

pub use instrument::{Instrument, InstrumentAggregate, InstrumentSnapshot};
pub use position::{
    DailyLimits, Position, PositionAggregate, PositionSnapshot, TrackedOrder,
};

use thiserror::Error;

/// Failures surfaced by aggregate mutations.
#[derive(Debug, Error, PartialEq)]
pub enum DomainError {
    /// A bar arrived at or before the last accepted bar for the symbol.
    #[error("non-monotonic bar for {vt_symbol}: {incoming} <= {last}")]
    NonMonotonicBar {
        vt_symbol: String,
        last: String,
        incoming: String,
    },
    #[error("unknown position: {0}")]
    UnknownPosition(String),
    /// A mutation targeted an order in a terminal state.
    #[error("order {0} already finished")]
    OrderFinished(String),
}
