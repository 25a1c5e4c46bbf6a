//! The uniform broker port consumed by the strategy engine, plus the
//! simulated gateway used in tests.
//!
//! Query methods degrade gracefully: when the broker session is down they
//! log a warning and return empty values instead of raising. Only `connect`
//! returns an error, because startup is the one place failure must be loud.

mod sim;

pub use sim::SimGateway;

use chrono::{DateTime, Local};
use thiserror::Error;

use voltra_core::{
    AccountData, BarData, ContractData, Direction, Interval, OrderData, OrderInstruction,
    PositionData, QuoteRequest, TickData, TradeData, VtOrderId, VtSymbol,
};

/// Failures surfaced by gateway session management.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connect timed out after {0} seconds")]
    ConnectTimeout(f64),
    #[error("broker session error: {0}")]
    Session(String),
}

/// Everything the broker pushes at the worker, drained via
/// [`TradingGateway::poll_events`].
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayEvent {
    Tick(TickData),
    /// One-minute bars for all subscribed symbols at one timestamp.
    Bars(Vec<BarData>),
    Order(OrderData),
    Trade(TradeData),
    Position(PositionData),
    Account(AccountData),
}

/// Uniform port to the broker session.
///
/// The engine is the only component holding one of these; all methods are
/// synchronous and may block at the transport boundary.
pub trait TradingGateway {
    /// Establish the broker session. The deadline is enforced by the caller
    /// handing in an absolute budget in seconds.
    fn connect(&mut self, timeout_seconds: f64) -> Result<(), GatewayError>;

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, vt_symbol: &str);
    fn unsubscribe(&mut self, vt_symbol: &str);

    /// Send one order; may fan out into several broker orders (close-today
    /// splits). Empty when the session is down or the order was refused.
    fn send_order(&mut self, instruction: &OrderInstruction) -> Vec<VtOrderId>;

    fn cancel_order(&mut self, vt_orderid: &str);
    fn cancel_all_orders(&mut self);

    /// Exchange-specific close-today/close-yesterday splitting.
    fn convert_order_request(
        &self,
        instruction: &OrderInstruction,
        lock: bool,
        net: bool,
    ) -> Vec<OrderInstruction>;

    fn send_quote(&mut self, quote: &QuoteRequest) -> Option<String>;
    fn cancel_quote(&mut self, vt_quoteid: &str);

    fn get_tick(&self, vt_symbol: &str) -> Option<TickData>;
    fn get_contract(&self, vt_symbol: &str) -> Option<ContractData>;
    fn get_all_contracts(&self) -> Vec<ContractData>;
    fn get_contracts_by_product(&self, product: &str) -> Vec<ContractData>;
    fn get_contracts_by_exchange(&self, exchange: &str) -> Vec<ContractData>;

    fn get_balance(&self) -> Option<AccountData>;
    fn get_position(&self, vt_symbol: &str, direction: Direction) -> Option<PositionData>;
    fn get_all_positions(&self) -> Vec<PositionData>;

    fn query_history(
        &self,
        vt_symbol: &str,
        interval: Interval,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> Vec<BarData>;

    /// Drain queued broker events in arrival order.
    fn poll_events(&mut self) -> Vec<GatewayEvent>;
}

/// Shared helper for implementations: log the degradation once per call
/// site and fall through to the empty value.
pub(crate) fn warn_disconnected(operation: &str) {
    tracing::warn!(operation, "broker session down; returning empty result");
}

/// Symbols an engine is currently interested in (used by tests and the sim).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionSet {
    symbols: Vec<VtSymbol>,
}

impl SubscriptionSet {
    pub fn add(&mut self, vt_symbol: &str) {
        if !self.symbols.iter().any(|s| s == vt_symbol) {
            self.symbols.push(vt_symbol.to_string());
        }
    }

    pub fn remove(&mut self, vt_symbol: &str) {
        self.symbols.retain(|s| s != vt_symbol);
    }

    #[must_use]
    pub fn contains(&self, vt_symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == vt_symbol)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[VtSymbol] {
        &self.symbols
    }
}
