//! Order execution: the smart single-order executor and the advanced order
//! scheduler that splits parent orders into child orders across time and
//! volume.

pub mod algorithm;
mod executor;
mod scheduler;

pub use executor::{ExecutionConfig, ManagedOrder, RetryOutcome, SmartOrderExecutor};
pub use scheduler::{
    AdvancedOrder, AdvancedOrderRequest, AdvancedOrderScheduler, AdvancedOrderStatus,
    AdvancedOrderType, CancelOutcome, ChildOrder, SchedulerSnapshot,
};

use thiserror::Error;

/// Failures surfaced by the execution layer.
#[derive(Debug, Error, PartialEq)]
pub enum ExecutionError {
    /// Parameter validation failed; nothing was scheduled.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("unknown order: {0}")]
    UnknownOrder(String),
}
