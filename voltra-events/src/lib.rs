//! Typed domain events and the synchronous in-process event bus.
//!
//! Events decouple domain decisions from their side effects (alerting,
//! monitoring, logging). Handlers are invoked on the publisher's stack; the
//! core runs single-threaded, so there is no cross-thread queuing here.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Every fact the domain layer publishes.
///
/// Variants carry only the data a subscriber needs to act; the engine
/// attaches symbols and timestamps at the emission site.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Broker-reported position shrank without a matching strategy order.
    ManualCloseDetected {
        vt_symbol: String,
        volume: i64,
        timestamp: DateTime<Local>,
    },
    /// Broker-reported position grew without a matching strategy order.
    ManualOpenDetected {
        vt_symbol: String,
        volume: i64,
        timestamp: DateTime<Local>,
    },
    SignalGenerated {
        vt_symbol: String,
        signal: String,
        reason: String,
    },
    OrderInstructionGenerated {
        vt_symbol: String,
        direction: String,
        offset: String,
        volume: i64,
        price: f64,
    },
    OrderStatusChanged {
        vt_orderid: String,
        vt_symbol: String,
        old_status: String,
        new_status: String,
    },
    PositionClosed {
        vt_symbol: String,
        signal: String,
        holding_seconds: f64,
    },
    /// A daily open cap was reached or exceeded.
    RiskLimitExceeded {
        vt_symbol: String,
        limit_type: String,
        current_volume: i64,
        limit_volume: i64,
    },
    /// A Greeks threshold was crossed (edge-triggered at portfolio level).
    GreeksRiskBreach {
        level: String,
        greek_name: String,
        current_value: f64,
        limit_value: f64,
        vt_symbol: String,
    },
    OrderTimeout {
        vt_orderid: String,
        vt_symbol: String,
        elapsed_seconds: f64,
    },
    OrderRetryExhausted {
        vt_symbol: String,
        total_retries: u32,
        original_price: f64,
        final_price: f64,
    },
    IcebergComplete {
        order_id: String,
        vt_symbol: String,
        total_volume: i64,
        filled_volume: i64,
    },
    IcebergCancelled {
        order_id: String,
        vt_symbol: String,
        filled_volume: i64,
        remaining_volume: i64,
    },
    ClassicIcebergComplete {
        order_id: String,
        vt_symbol: String,
        total_volume: i64,
        filled_volume: i64,
    },
    ClassicIcebergCancelled {
        order_id: String,
        vt_symbol: String,
        filled_volume: i64,
        remaining_volume: i64,
    },
    TwapComplete {
        order_id: String,
        vt_symbol: String,
        total_volume: i64,
    },
    EnhancedTwapComplete {
        order_id: String,
        vt_symbol: String,
        total_volume: i64,
    },
    VwapComplete {
        order_id: String,
        vt_symbol: String,
        total_volume: i64,
    },
    TimedSplitComplete {
        order_id: String,
        vt_symbol: String,
        total_volume: i64,
        filled_volume: i64,
    },
    /// The dominant future for a product changed.
    ActiveContractRolled {
        product: String,
        old_vt_symbol: String,
        new_vt_symbol: String,
    },
    HedgeExecuted {
        hedge_volume: i64,
        hedge_direction: String,
        portfolio_delta_before: f64,
        portfolio_delta_after: f64,
        hedge_instrument: String,
    },
    GammaScalp {
        rebalance_volume: i64,
        rebalance_direction: String,
        portfolio_delta_before: f64,
        portfolio_gamma: f64,
        hedge_instrument: String,
    },
}

impl DomainEvent {
    /// Stable name used for subscription keys and monitor rows.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ManualCloseDetected { .. } => "manual_close_detected",
            Self::ManualOpenDetected { .. } => "manual_open_detected",
            Self::SignalGenerated { .. } => "signal_generated",
            Self::OrderInstructionGenerated { .. } => "order_instruction_generated",
            Self::OrderStatusChanged { .. } => "order_status_changed",
            Self::PositionClosed { .. } => "position_closed",
            Self::RiskLimitExceeded { .. } => "risk_limit_exceeded",
            Self::GreeksRiskBreach { .. } => "greeks_risk_breach",
            Self::OrderTimeout { .. } => "order_timeout",
            Self::OrderRetryExhausted { .. } => "order_retry_exhausted",
            Self::IcebergComplete { .. } => "iceberg_complete",
            Self::IcebergCancelled { .. } => "iceberg_cancelled",
            Self::ClassicIcebergComplete { .. } => "classic_iceberg_complete",
            Self::ClassicIcebergCancelled { .. } => "classic_iceberg_cancelled",
            Self::TwapComplete { .. } => "twap_complete",
            Self::EnhancedTwapComplete { .. } => "enhanced_twap_complete",
            Self::VwapComplete { .. } => "vwap_complete",
            Self::TimedSplitComplete { .. } => "timed_split_complete",
            Self::ActiveContractRolled { .. } => "active_contract_rolled",
            Self::HedgeExecuted { .. } => "hedge_executed",
            Self::GammaScalp { .. } => "gamma_scalp",
        }
    }

    /// Symbol this event is about, when it has one.
    #[must_use]
    pub fn vt_symbol(&self) -> Option<&str> {
        match self {
            Self::ManualCloseDetected { vt_symbol, .. }
            | Self::ManualOpenDetected { vt_symbol, .. }
            | Self::SignalGenerated { vt_symbol, .. }
            | Self::OrderInstructionGenerated { vt_symbol, .. }
            | Self::OrderStatusChanged { vt_symbol, .. }
            | Self::PositionClosed { vt_symbol, .. }
            | Self::RiskLimitExceeded { vt_symbol, .. }
            | Self::GreeksRiskBreach { vt_symbol, .. }
            | Self::OrderTimeout { vt_symbol, .. }
            | Self::OrderRetryExhausted { vt_symbol, .. }
            | Self::IcebergComplete { vt_symbol, .. }
            | Self::IcebergCancelled { vt_symbol, .. }
            | Self::ClassicIcebergComplete { vt_symbol, .. }
            | Self::ClassicIcebergCancelled { vt_symbol, .. }
            | Self::TwapComplete { vt_symbol, .. }
            | Self::EnhancedTwapComplete { vt_symbol, .. }
            | Self::VwapComplete { vt_symbol, .. }
            | Self::TimedSplitComplete { vt_symbol, .. } => Some(vt_symbol),
            Self::ActiveContractRolled { new_vt_symbol, .. } => Some(new_vt_symbol),
            Self::HedgeExecuted {
                hedge_instrument, ..
            }
            | Self::GammaScalp {
                hedge_instrument, ..
            } => Some(hedge_instrument),
        }
    }
}

type Handler = Box<dyn FnMut(&DomainEvent)>;

/// Synchronous publish/subscribe registry.
///
/// Handlers registered for a specific event name fire before wildcard
/// handlers. Delivery happens on the publisher's stack; handlers must not
/// publish back into the bus.
#[derive(Default)]
pub struct EventBus {
    by_name: HashMap<&'static str, Vec<Handler>>,
    wildcard: Vec<Handler>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event name (see [`DomainEvent::name`]).
    pub fn subscribe(&mut self, name: &'static str, handler: impl FnMut(&DomainEvent) + 'static) {
        self.by_name.entry(name).or_default().push(Box::new(handler));
    }

    /// Register a handler that observes every event.
    pub fn subscribe_all(&mut self, handler: impl FnMut(&DomainEvent) + 'static) {
        self.wildcard.push(Box::new(handler));
    }

    /// Deliver one event to all matching handlers.
    pub fn publish(&mut self, event: &DomainEvent) {
        tracing::debug!(event = event.name(), symbol = ?event.vt_symbol(), "domain event");
        if let Some(handlers) = self.by_name.get_mut(event.name()) {
            for handler in handlers.iter_mut() {
                handler(event);
            }
        }
        for handler in self.wildcard.iter_mut() {
            handler(event);
        }
    }

    /// Deliver a batch in order.
    pub fn publish_all(&mut self, events: &[DomainEvent]) {
        for event in events {
            self.publish(event);
        }
    }
}
