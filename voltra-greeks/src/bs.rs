//! Black-Scholes pricing, Greeks and the implied-volatility solver.
//!
//! Pure calculations with no side effects. Theta is reported per calendar
//! day; vega per 1.00 of volatility (callers scale by 0.01 for a per-1%
//! figure).

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

use voltra_core::OptionType;

/// Failures surfaced by the analytics layer.
#[derive(Debug, Error, PartialEq)]
pub enum GreeksError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The quoted price sits below the discounted intrinsic value.
    #[error("market price {market_price} below intrinsic value {intrinsic}")]
    BelowIntrinsic { market_price: f64, intrinsic: f64 },
    /// Newton/bisection failed to converge within the iteration budget.
    #[error("implied vol did not converge within {iterations} iterations")]
    NoConvergence { iterations: u32 },
}

/// Inputs to the Black-Scholes formulas.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct BsParams {
    pub spot: f64,
    pub strike: f64,
    /// Time to expiry in years.
    pub time_to_expiry: f64,
    /// Annualized risk-free rate.
    pub rate: f64,
    /// Annualized volatility.
    pub volatility: f64,
    pub option_type: OptionType,
}

/// First-order sensitivities of one option.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    /// Per calendar day.
    pub theta: f64,
    /// Per 1.00 of volatility.
    pub vega: f64,
}

/// Outcome of a successful implied-volatility solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IvSolution {
    pub implied_vol: f64,
    pub iterations: u32,
}

/// Solver tuning knobs.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct IvConfig {
    pub max_iterations: u32,
    pub tolerance: f64,
}

impl Default for IvConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-2,
        }
    }
}

fn norm_cdf(x: f64) -> f64 {
    // Normal::new only fails on invalid parameters; (0, 1) is always valid.
    Normal::new(0.0, 1.0).unwrap().cdf(x)
}

fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn validate(params: &BsParams) -> Result<(), GreeksError> {
    if params.spot <= 0.0 || params.strike <= 0.0 {
        return Err(GreeksError::InvalidInput(
            "spot and strike must be positive".into(),
        ));
    }
    if params.time_to_expiry < 0.0 {
        return Err(GreeksError::InvalidInput(
            "time to expiry cannot be negative".into(),
        ));
    }
    if params.volatility <= 0.0 {
        return Err(GreeksError::InvalidInput(
            "volatility must be positive".into(),
        ));
    }
    Ok(())
}

fn intrinsic(spot: f64, strike: f64, option_type: OptionType) -> f64 {
    match option_type {
        OptionType::Call => (spot - strike).max(0.0),
        OptionType::Put => (strike - spot).max(0.0),
    }
}

fn d1_d2(params: &BsParams) -> (f64, f64) {
    let sqrt_t = params.time_to_expiry.sqrt();
    let d1 = ((params.spot / params.strike).ln()
        + (params.rate + 0.5 * params.volatility * params.volatility) * params.time_to_expiry)
        / (params.volatility * sqrt_t);
    (d1, d1 - params.volatility * sqrt_t)
}

/// Theoretical Black-Scholes price; intrinsic value at expiry.
pub fn bs_price(params: &BsParams) -> Result<f64, GreeksError> {
    validate(params)?;
    if params.time_to_expiry == 0.0 {
        return Ok(intrinsic(params.spot, params.strike, params.option_type));
    }
    let (d1, d2) = d1_d2(params);
    let discount = (-params.rate * params.time_to_expiry).exp();
    let price = match params.option_type {
        OptionType::Call => params.spot * norm_cdf(d1) - params.strike * discount * norm_cdf(d2),
        OptionType::Put => params.strike * discount * norm_cdf(-d2) - params.spot * norm_cdf(-d1),
    };
    Ok(price)
}

/// Delta, gamma, theta and vega for one option.
pub fn greeks(params: &BsParams) -> Result<Greeks, GreeksError> {
    validate(params)?;

    if params.time_to_expiry == 0.0 {
        let delta = match params.option_type {
            OptionType::Call => {
                if params.spot > params.strike {
                    1.0
                } else {
                    0.0
                }
            }
            OptionType::Put => {
                if params.spot < params.strike {
                    -1.0
                } else {
                    0.0
                }
            }
        };
        return Ok(Greeks {
            delta,
            ..Greeks::default()
        });
    }

    let sqrt_t = params.time_to_expiry.sqrt();
    let (d1, d2) = d1_d2(params);
    let pdf_d1 = norm_pdf(d1);
    let discount = (-params.rate * params.time_to_expiry).exp();

    // Gamma and vega are identical for calls and puts.
    let gamma = pdf_d1 / (params.spot * params.volatility * sqrt_t);
    let vega = params.spot * pdf_d1 * sqrt_t;

    let (delta, theta_annual) = match params.option_type {
        OptionType::Call => (
            norm_cdf(d1),
            -params.spot * pdf_d1 * params.volatility / (2.0 * sqrt_t)
                - params.rate * params.strike * discount * norm_cdf(d2),
        ),
        OptionType::Put => (
            norm_cdf(d1) - 1.0,
            -params.spot * pdf_d1 * params.volatility / (2.0 * sqrt_t)
                + params.rate * params.strike * discount * norm_cdf(-d2),
        ),
    };

    Ok(Greeks {
        delta,
        gamma,
        theta: theta_annual / 365.0,
        vega,
    })
}

/// Solve for the volatility that reproduces `market_price`.
///
/// Newton steps seeded with the Brenner-Subrahmanyam approximation, bracketed
/// by bisection on `[0.001, 10.0]` so a wild vega cannot throw the iterate
/// out of the domain. Prices below discounted intrinsic and non-convergence
/// return errors rather than a fabricated vol.
pub fn implied_volatility(
    market_price: f64,
    spot: f64,
    strike: f64,
    time_to_expiry: f64,
    rate: f64,
    option_type: OptionType,
    config: &IvConfig,
) -> Result<IvSolution, GreeksError> {
    if market_price <= 0.0 {
        return Err(GreeksError::InvalidInput(
            "market price must be positive".into(),
        ));
    }
    if spot <= 0.0 || strike <= 0.0 || time_to_expiry <= 0.0 {
        return Err(GreeksError::InvalidInput(
            "spot, strike and time to expiry must be positive".into(),
        ));
    }

    let discounted_strike = strike * (-rate * time_to_expiry).exp();
    let intrinsic = match option_type {
        OptionType::Call => (spot - discounted_strike).max(0.0),
        OptionType::Put => (discounted_strike - spot).max(0.0),
    };
    if market_price < intrinsic - config.tolerance {
        return Err(GreeksError::BelowIntrinsic {
            market_price,
            intrinsic,
        });
    }

    // Brenner-Subrahmanyam starting point, clamped into the bracket.
    let mut sigma = ((2.0 * std::f64::consts::PI / time_to_expiry).sqrt() * market_price / spot)
        .clamp(0.05, 4.0);
    let mut lo = 0.001_f64;
    let mut hi = 10.0_f64;

    for iteration in 0..config.max_iterations {
        let params = BsParams {
            spot,
            strike,
            time_to_expiry,
            rate,
            volatility: sigma,
            option_type,
        };
        let price = bs_price(&params)?;
        let diff = price - market_price;
        if diff.abs() < config.tolerance {
            return Ok(IvSolution {
                implied_vol: sigma,
                iterations: iteration + 1,
            });
        }

        if diff > 0.0 {
            hi = sigma;
        } else {
            lo = sigma;
        }

        let vega = greeks(&params)?.vega;
        if vega.abs() > 1e-10 {
            let newton = sigma - diff / vega;
            sigma = if newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };
        } else {
            sigma = 0.5 * (lo + hi);
        }
    }

    Err(GreeksError::NoConvergence {
        iterations: config.max_iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn atm(option_type: OptionType) -> BsParams {
        BsParams {
            spot: 100.0,
            strike: 100.0,
            time_to_expiry: 0.25,
            rate: 0.03,
            volatility: 0.20,
            option_type,
        }
    }

    #[test]
    fn put_call_parity_holds() {
        let call = bs_price(&atm(OptionType::Call)).unwrap();
        let put = bs_price(&atm(OptionType::Put)).unwrap();
        let forward = 100.0 - 100.0 * (-0.03_f64 * 0.25).exp();
        assert!((call - put - forward).abs() < 1e-6);
    }

    #[test]
    fn atm_call_greeks_have_expected_signs() {
        let g = greeks(&atm(OptionType::Call)).unwrap();
        assert!(g.delta > 0.5 && g.delta < 0.65);
        assert!(g.gamma > 0.0);
        assert!(g.theta < 0.0);
        assert!(g.vega > 0.0);
    }

    #[test]
    fn gamma_identical_for_call_and_put() {
        let call = greeks(&atm(OptionType::Call)).unwrap();
        let put = greeks(&atm(OptionType::Put)).unwrap();
        assert_relative_eq!(call.gamma, put.gamma, epsilon = 1e-12);
        assert_relative_eq!(call.vega, put.vega, epsilon = 1e-12);
    }

    #[test]
    fn expiry_boundary_returns_intrinsic_and_terminal_greeks() {
        let params = BsParams {
            time_to_expiry: 0.0,
            spot: 110.0,
            ..atm(OptionType::Call)
        };
        assert_eq!(bs_price(&params).unwrap(), 10.0);
        let g = greeks(&params).unwrap();
        assert_eq!(g.delta, 1.0);
        assert_eq!(g.gamma, 0.0);
        assert_eq!(g.vega, 0.0);
        assert_eq!(g.theta, 0.0);

        let put_otm = BsParams {
            time_to_expiry: 0.0,
            option_type: OptionType::Put,
            spot: 110.0,
            ..atm(OptionType::Put)
        };
        assert_eq!(bs_price(&put_otm).unwrap(), 0.0);
        assert_eq!(greeks(&put_otm).unwrap().delta, 0.0);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let bad_vol = BsParams {
            volatility: 0.0,
            ..atm(OptionType::Call)
        };
        assert!(bs_price(&bad_vol).is_err());
        let bad_spot = BsParams {
            spot: -1.0,
            ..atm(OptionType::Call)
        };
        assert!(greeks(&bad_spot).is_err());
    }

    #[test]
    fn iv_round_trip_recovers_price() {
        let params = atm(OptionType::Call);
        let price = bs_price(&params).unwrap();
        let config = IvConfig {
            tolerance: 1e-6,
            ..IvConfig::default()
        };
        let solution =
            implied_volatility(price, 100.0, 100.0, 0.25, 0.03, OptionType::Call, &config).unwrap();
        assert_relative_eq!(solution.implied_vol, 0.20, epsilon = 1e-4);

        let reproduced = bs_price(&BsParams {
            volatility: solution.implied_vol,
            ..params
        })
        .unwrap();
        assert!((reproduced - price).abs() < 1e-5);
    }

    #[test]
    fn iv_rejects_price_below_intrinsic() {
        let result = implied_volatility(
            1.0,
            150.0,
            100.0,
            0.25,
            0.03,
            OptionType::Call,
            &IvConfig::default(),
        );
        assert!(matches!(result, Err(GreeksError::BelowIntrinsic { .. })));
    }

    #[test]
    fn iv_rejects_non_positive_price() {
        let result = implied_volatility(
            0.0,
            100.0,
            100.0,
            0.25,
            0.03,
            OptionType::Put,
            &IvConfig::default(),
        );
        assert!(matches!(result, Err(GreeksError::InvalidInput(_))));
    }
}
