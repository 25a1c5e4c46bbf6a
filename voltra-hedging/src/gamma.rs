//! Gamma scalping: harvest realized vol by re-centering delta while the
//! portfolio is long gamma.

use serde::{Deserialize, Serialize};

use voltra_core::{Direction, Offset, OrderInstruction};
use voltra_events::DomainEvent;
use voltra_greeks::PortfolioGreeks;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct GammaScalpConfig {
    /// |delta| that triggers a rebalance toward zero.
    pub rebalance_threshold: f64,
    pub hedge_instrument_vt_symbol: String,
    pub hedge_instrument_delta: f64,
    pub hedge_instrument_multiplier: f64,
}

impl Default for GammaScalpConfig {
    fn default() -> Self {
        Self {
            rebalance_threshold: 30.0,
            hedge_instrument_vt_symbol: String::new(),
            hedge_instrument_delta: 1.0,
            hedge_instrument_multiplier: 10.0,
        }
    }
}

/// Rebalance decision. `rejected` marks structural refusals (short gamma,
/// invalid config) as opposed to plain "nothing to do".
#[derive(Clone, Debug, PartialEq)]
pub struct ScalpResult {
    pub should_rebalance: bool,
    pub rejected: bool,
    pub reject_reason: Option<String>,
    pub rebalance_volume: i64,
    pub rebalance_direction: Option<Direction>,
    pub instruction: Option<OrderInstruction>,
}

impl ScalpResult {
    fn idle() -> Self {
        Self {
            should_rebalance: false,
            rejected: false,
            reject_reason: None,
            rebalance_volume: 0,
            rebalance_direction: None,
            instruction: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            rejected: true,
            reject_reason: Some(reason.into()),
            ..Self::idle()
        }
    }
}

/// Scalping engine; refuses outright unless the book is long gamma.
#[derive(Clone, Debug)]
pub struct GammaScalpingEngine {
    config: GammaScalpConfig,
}

impl GammaScalpingEngine {
    #[must_use]
    pub fn new(config: GammaScalpConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &GammaScalpConfig {
        &self.config
    }

    pub fn check_and_rebalance(
        &self,
        portfolio: &PortfolioGreeks,
        current_price: f64,
    ) -> (ScalpResult, Vec<DomainEvent>) {
        let cfg = &self.config;

        if portfolio.total_gamma <= 0.0 {
            return (ScalpResult::rejected("portfolio gamma not positive"), vec![]);
        }
        if cfg.hedge_instrument_multiplier <= 0.0 {
            return (
                ScalpResult::rejected("hedge instrument multiplier not positive"),
                vec![],
            );
        }
        if cfg.hedge_instrument_delta == 0.0 {
            return (ScalpResult::rejected("hedge instrument delta is zero"), vec![]);
        }
        if current_price <= 0.0 {
            return (ScalpResult::rejected("current price not positive"), vec![]);
        }

        if portfolio.total_delta.abs() <= cfg.rebalance_threshold {
            return (ScalpResult::idle(), vec![]);
        }

        let unit = cfg.hedge_instrument_delta * cfg.hedge_instrument_multiplier;
        let signed_volume = (-portfolio.total_delta / unit).round() as i64;
        if signed_volume == 0 {
            return (ScalpResult::idle(), vec![]);
        }
        let (direction, rebalance_volume) = if signed_volume > 0 {
            (Direction::Long, signed_volume)
        } else {
            (Direction::Short, -signed_volume)
        };

        let instruction = OrderInstruction::limit(
            cfg.hedge_instrument_vt_symbol.clone(),
            direction,
            Offset::Open,
            rebalance_volume,
            current_price,
            "gamma_scalp",
        );
        tracing::info!(
            delta = portfolio.total_delta,
            gamma = portfolio.total_gamma,
            rebalance_volume,
            ?direction,
            "gamma scalp rebalance"
        );

        let event = DomainEvent::GammaScalp {
            rebalance_volume,
            rebalance_direction: format!("{direction:?}"),
            portfolio_delta_before: portfolio.total_delta,
            portfolio_gamma: portfolio.total_gamma,
            hedge_instrument: cfg.hedge_instrument_vt_symbol.clone(),
        };

        (
            ScalpResult {
                should_rebalance: true,
                rejected: false,
                reject_reason: None,
                rebalance_volume,
                rebalance_direction: Some(direction),
                instruction: Some(instruction),
            },
            vec![event],
        )
    }
}
