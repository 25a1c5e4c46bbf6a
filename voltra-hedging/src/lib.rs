//! Hedging services: delta hedging back to a target exposure and gamma
//! scalping rebalances while long gamma.

mod delta;
mod gamma;

pub use delta::{DeltaHedgingEngine, HedgeResult, HedgingConfig};
pub use gamma::{GammaScalpConfig, GammaScalpingEngine, ScalpResult};
