//! Delta hedging: when the portfolio delta drifts outside the band, trade
//! the hedge instrument back toward the target.

use serde::{Deserialize, Serialize};

use voltra_core::{Direction, Offset, OrderInstruction};
use voltra_events::DomainEvent;
use voltra_greeks::PortfolioGreeks;

/// Hedge instrument and band settings; missing config keys fall back to
/// these serde defaults.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HedgingConfig {
    pub target_delta: f64,
    /// Tolerated |delta - target| before a hedge fires.
    pub hedging_band: f64,
    pub hedge_instrument_vt_symbol: String,
    /// Per-unit delta of the hedge instrument (1.0 for a future).
    pub hedge_instrument_delta: f64,
    pub hedge_instrument_multiplier: f64,
}

impl Default for HedgingConfig {
    fn default() -> Self {
        Self {
            target_delta: 0.0,
            hedging_band: 50.0,
            hedge_instrument_vt_symbol: String::new(),
            hedge_instrument_delta: 1.0,
            hedge_instrument_multiplier: 10.0,
        }
    }
}

/// What the engine decided and why.
#[derive(Clone, Debug, PartialEq)]
pub struct HedgeResult {
    pub should_hedge: bool,
    pub hedge_volume: i64,
    pub hedge_direction: Option<Direction>,
    pub instruction: Option<OrderInstruction>,
    pub reason: String,
}

impl HedgeResult {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            should_hedge: false,
            hedge_volume: 0,
            hedge_direction: None,
            instruction: None,
            reason: reason.into(),
        }
    }
}

/// Monitors portfolio delta and produces hedge instructions.
#[derive(Clone, Debug)]
pub struct DeltaHedgingEngine {
    config: HedgingConfig,
}

impl DeltaHedgingEngine {
    #[must_use]
    pub fn new(config: HedgingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &HedgingConfig {
        &self.config
    }

    /// Decide whether to hedge at the current price.
    ///
    /// The hedge quantity is the integer lot count that lands residual delta
    /// closest to the target; a zero rounding result produces no instruction.
    pub fn check_and_hedge(
        &self,
        portfolio: &PortfolioGreeks,
        current_price: f64,
    ) -> (HedgeResult, Vec<DomainEvent>) {
        let cfg = &self.config;

        if cfg.hedge_instrument_multiplier <= 0.0 {
            return (HedgeResult::skip("hedge instrument multiplier not positive"), vec![]);
        }
        if cfg.hedge_instrument_delta == 0.0 {
            return (HedgeResult::skip("hedge instrument delta is zero"), vec![]);
        }
        if current_price <= 0.0 {
            return (HedgeResult::skip("current price not positive"), vec![]);
        }

        let delta_diff = portfolio.total_delta - cfg.target_delta;
        if delta_diff.abs() <= cfg.hedging_band {
            return (HedgeResult::skip("delta inside hedging band"), vec![]);
        }

        let unit = cfg.hedge_instrument_delta * cfg.hedge_instrument_multiplier;
        let raw_volume = (cfg.target_delta - portfolio.total_delta) / unit;
        let signed_volume = raw_volume.round() as i64;
        if signed_volume == 0 {
            return (HedgeResult::skip("hedge volume rounds to zero"), vec![]);
        }

        let (direction, hedge_volume) = if signed_volume > 0 {
            (Direction::Long, signed_volume)
        } else {
            (Direction::Short, -signed_volume)
        };

        let instruction = OrderInstruction::limit(
            cfg.hedge_instrument_vt_symbol.clone(),
            direction,
            Offset::Open,
            hedge_volume,
            current_price,
            "delta_hedge",
        );

        let delta_after = portfolio.total_delta + hedge_volume as f64 * unit * direction.sign();
        tracing::info!(
            delta_before = portfolio.total_delta,
            delta_after,
            hedge_volume,
            ?direction,
            "delta hedge triggered"
        );

        let event = DomainEvent::HedgeExecuted {
            hedge_volume,
            hedge_direction: format!("{direction:?}"),
            portfolio_delta_before: portfolio.total_delta,
            portfolio_delta_after: delta_after,
            hedge_instrument: cfg.hedge_instrument_vt_symbol.clone(),
        };

        (
            HedgeResult {
                should_hedge: true,
                hedge_volume,
                hedge_direction: Some(direction),
                instruction: Some(instruction),
                reason: format!(
                    "delta drift {delta_diff:.4} beyond band {}",
                    cfg.hedging_band
                ),
            },
            vec![event],
        )
    }
}
