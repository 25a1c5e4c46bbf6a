//! Option analytics: Black-Scholes pricing and Greeks, the implied
//! volatility solver, the vol-surface builder and the portfolio Greeks
//! risk aggregator.

mod bs;
mod risk;
mod surface;

pub use bs::{bs_price, greeks, implied_volatility, BsParams, Greeks, GreeksError, IvConfig, IvSolution};
pub use risk::{
    GreekKind, PortfolioGreeks, PositionGreeksEntry, RiskAggregator, RiskCheckResult,
    RiskThresholds,
};
pub use surface::{SurfaceError, TermStructure, VolQuote, VolSmile, VolSurface};
