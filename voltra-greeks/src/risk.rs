//! Position and portfolio level Greeks risk checks.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::bs::Greeks;
use voltra_events::DomainEvent;

/// Which greek a threshold or breach refers to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GreekKind {
    Delta,
    Gamma,
    Vega,
}

impl GreekKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delta => "delta",
            Self::Gamma => "gamma",
            Self::Vega => "vega",
        }
    }
}

/// Absolute limits applied to weighted Greeks.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub position_delta_limit: f64,
    pub position_gamma_limit: f64,
    pub position_vega_limit: f64,
    pub portfolio_delta_limit: f64,
    pub portfolio_gamma_limit: f64,
    pub portfolio_vega_limit: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        // Vega is expressed per 1.00 of volatility, so one lot of a
        // near-the-money contract already carries vega in the thousands.
        Self {
            position_delta_limit: 100.0,
            position_gamma_limit: 10.0,
            position_vega_limit: 5_000.0,
            portfolio_delta_limit: 300.0,
            portfolio_gamma_limit: 30.0,
            portfolio_vega_limit: 20_000.0,
        }
    }
}

/// Outcome of a pre-trade position check.
#[derive(Clone, Debug, PartialEq)]
pub struct RiskCheckResult {
    pub passed: bool,
    pub breached: Vec<GreekKind>,
    pub reason: Option<String>,
}

impl RiskCheckResult {
    fn pass() -> Self {
        Self {
            passed: true,
            breached: Vec::new(),
            reason: None,
        }
    }
}

/// One active position's contribution to the portfolio book.
#[derive(Clone, Debug)]
pub struct PositionGreeksEntry {
    pub vt_symbol: String,
    pub greeks: Greeks,
    pub volume: i64,
    pub multiplier: f64,
    /// Long positions add exposure, short positions subtract it.
    pub direction_sign: f64,
}

/// Volume-and-multiplier weighted portfolio totals.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PortfolioGreeks {
    pub total_delta: f64,
    pub total_gamma: f64,
    pub total_theta: f64,
    pub total_vega: f64,
    pub position_count: usize,
}

/// Threshold checker with edge-triggered portfolio breach events.
pub struct RiskAggregator {
    thresholds: RiskThresholds,
    /// Greeks currently in breach; used to emit only ok -> breach edges.
    active_breaches: HashSet<GreekKind>,
}

impl RiskAggregator {
    #[must_use]
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self {
            thresholds,
            active_breaches: HashSet::new(),
        }
    }

    #[must_use]
    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// The portfolio is currently outside at least one limit.
    #[must_use]
    pub fn in_breach(&self) -> bool {
        !self.active_breaches.is_empty()
    }

    /// Pre-trade check of one position's weighted Greeks against the
    /// position-level limits.
    #[must_use]
    pub fn check_position_risk(
        &self,
        greeks: &Greeks,
        volume: i64,
        multiplier: f64,
    ) -> RiskCheckResult {
        let weight = volume as f64 * multiplier;
        let checks = [
            (
                GreekKind::Delta,
                (greeks.delta * weight).abs(),
                self.thresholds.position_delta_limit,
            ),
            (
                GreekKind::Gamma,
                (greeks.gamma * weight).abs(),
                self.thresholds.position_gamma_limit,
            ),
            (
                GreekKind::Vega,
                (greeks.vega * weight).abs(),
                self.thresholds.position_vega_limit,
            ),
        ];

        let breached: Vec<GreekKind> = checks
            .iter()
            .filter(|(_, value, limit)| value > limit)
            .map(|(kind, _, _)| *kind)
            .collect();

        if breached.is_empty() {
            return RiskCheckResult::pass();
        }
        let (kind, value, limit) = checks
            .iter()
            .find(|(kind, _, _)| breached.contains(kind))
            .expect("breached kind present");
        RiskCheckResult {
            passed: false,
            reason: Some(format!(
                "{} limit exceeded: |{value:.4}| > {limit}",
                kind.as_str()
            )),
            breached,
        }
    }

    /// Weighted sum over all active positions plus edge-triggered breach
    /// events for every greek that crossed its portfolio limit this call.
    pub fn aggregate_portfolio_greeks(
        &mut self,
        entries: &[PositionGreeksEntry],
    ) -> (PortfolioGreeks, Vec<DomainEvent>) {
        let mut totals = PortfolioGreeks {
            position_count: entries.len(),
            ..PortfolioGreeks::default()
        };
        for entry in entries {
            let weight = entry.volume as f64 * entry.multiplier * entry.direction_sign;
            totals.total_delta += entry.greeks.delta * weight;
            totals.total_gamma += entry.greeks.gamma * weight;
            totals.total_theta += entry.greeks.theta * weight;
            totals.total_vega += entry.greeks.vega * weight;
        }

        let levels = [
            (
                GreekKind::Delta,
                totals.total_delta,
                self.thresholds.portfolio_delta_limit,
            ),
            (
                GreekKind::Gamma,
                totals.total_gamma,
                self.thresholds.portfolio_gamma_limit,
            ),
            (
                GreekKind::Vega,
                totals.total_vega,
                self.thresholds.portfolio_vega_limit,
            ),
        ];

        let mut events = Vec::new();
        for (kind, value, limit) in levels {
            if value.abs() > limit {
                if self.active_breaches.insert(kind) {
                    events.push(DomainEvent::GreeksRiskBreach {
                        level: "portfolio".into(),
                        greek_name: kind.as_str().into(),
                        current_value: value,
                        limit_value: limit,
                        vt_symbol: String::new(),
                    });
                }
            } else {
                self.active_breaches.remove(&kind);
            }
        }

        (totals, events)
    }
}
