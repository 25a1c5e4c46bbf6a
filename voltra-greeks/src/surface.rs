//! Implied-volatility surface built from market option quotes.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SurfaceError {
    /// Fewer than two distinct strikes or expiries survived filtering.
    #[error("not enough quotes to build a surface: {strikes} strikes, {expiries} expiries")]
    NotEnoughQuotes { strikes: usize, expiries: usize },
    #[error("surface is empty")]
    Empty,
    #[error("strike {strike} outside surface range [{min}, {max}]")]
    StrikeOutOfRange { strike: f64, min: f64, max: f64 },
    #[error("expiry {expiry} outside surface range [{min}, {max}]")]
    ExpiryOutOfRange { expiry: f64, min: f64, max: f64 },
}

/// One market observation of implied vol.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct VolQuote {
    pub strike: f64,
    /// Time to expiry in years.
    pub time_to_expiry: f64,
    pub implied_vol: f64,
}

/// Smile slice at a fixed expiry.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VolSmile {
    pub time_to_expiry: f64,
    pub strikes: Vec<f64>,
    pub vols: Vec<f64>,
}

/// Term-structure slice at a fixed strike.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TermStructure {
    pub strike: f64,
    pub expiries: Vec<f64>,
    pub vols: Vec<f64>,
}

/// Rectangular (expiry x strike) grid of implied vols.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VolSurface {
    strikes: Vec<f64>,
    expiries: Vec<f64>,
    /// `matrix[expiry_idx][strike_idx]`, 0.0 where no quote exists.
    matrix: Vec<Vec<f64>>,
    pub built_at: DateTime<Local>,
}

const EPS: f64 = 1e-9;

fn sorted_unique(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(|a, b| a.partial_cmp(b).expect("surface axis values are finite"));
    values.dedup_by(|a, b| (*a - *b).abs() < EPS);
    values
}

fn axis_index(axis: &[f64], value: f64) -> usize {
    // Index of the cell whose left edge is at or below `value`, clamped so a
    // right neighbour always exists.
    let mut idx = axis.partition_point(|edge| *edge <= value);
    idx = idx.saturating_sub(1);
    idx.min(axis.len() - 2)
}

impl VolSurface {
    /// Build a surface from raw quotes, dropping non-positive vols.
    ///
    /// Requires at least two distinct strikes and two distinct expiries.
    pub fn build(quotes: &[VolQuote]) -> Result<Self, SurfaceError> {
        let valid: Vec<&VolQuote> = quotes.iter().filter(|q| q.implied_vol > 0.0).collect();

        let strikes = sorted_unique(valid.iter().map(|q| q.strike).collect());
        let expiries = sorted_unique(valid.iter().map(|q| q.time_to_expiry).collect());

        if strikes.len() < 2 || expiries.len() < 2 {
            return Err(SurfaceError::NotEnoughQuotes {
                strikes: strikes.len(),
                expiries: expiries.len(),
            });
        }

        let mut matrix = vec![vec![0.0; strikes.len()]; expiries.len()];
        for quote in &valid {
            let si = strikes
                .iter()
                .position(|s| (s - quote.strike).abs() < EPS)
                .expect("strike present in axis");
            let ei = expiries
                .iter()
                .position(|e| (e - quote.time_to_expiry).abs() < EPS)
                .expect("expiry present in axis");
            matrix[ei][si] = quote.implied_vol;
        }

        Ok(Self {
            strikes,
            expiries,
            matrix,
            built_at: Local::now(),
        })
    }

    #[must_use]
    pub fn strikes(&self) -> &[f64] {
        &self.strikes
    }

    #[must_use]
    pub fn expiries(&self) -> &[f64] {
        &self.expiries
    }

    /// Bilinear interpolation inside the grid; out-of-range queries fail.
    pub fn query(&self, strike: f64, time_to_expiry: f64) -> Result<f64, SurfaceError> {
        if self.strikes.is_empty() || self.expiries.is_empty() {
            return Err(SurfaceError::Empty);
        }
        let (s_min, s_max) = (self.strikes[0], *self.strikes.last().expect("non-empty"));
        let (e_min, e_max) = (self.expiries[0], *self.expiries.last().expect("non-empty"));

        if strike < s_min - EPS || strike > s_max + EPS {
            return Err(SurfaceError::StrikeOutOfRange {
                strike,
                min: s_min,
                max: s_max,
            });
        }
        if time_to_expiry < e_min - EPS || time_to_expiry > e_max + EPS {
            return Err(SurfaceError::ExpiryOutOfRange {
                expiry: time_to_expiry,
                min: e_min,
                max: e_max,
            });
        }

        let strike = strike.clamp(s_min, s_max);
        let tte = time_to_expiry.clamp(e_min, e_max);

        let si = axis_index(&self.strikes, strike);
        let ei = axis_index(&self.expiries, tte);

        let (s0, s1) = (self.strikes[si], self.strikes[si + 1]);
        let (e0, e1) = (self.expiries[ei], self.expiries[ei + 1]);

        let ts = if (s1 - s0).abs() < EPS {
            0.0
        } else {
            (strike - s0) / (s1 - s0)
        };
        let te = if (e1 - e0).abs() < EPS {
            0.0
        } else {
            (tte - e0) / (e1 - e0)
        };

        let v00 = self.matrix[ei][si];
        let v01 = self.matrix[ei][si + 1];
        let v10 = self.matrix[ei + 1][si];
        let v11 = self.matrix[ei + 1][si + 1];

        Ok(v00 * (1.0 - ts) * (1.0 - te) + v01 * ts * (1.0 - te) + v10 * (1.0 - ts) * te
            + v11 * ts * te)
    }

    /// Smile at one expiry, interpolating across the expiry axis when needed.
    #[must_use]
    pub fn extract_smile(&self, time_to_expiry: f64) -> VolSmile {
        let vols = self
            .strikes
            .iter()
            .map(|&strike| self.query(strike, time_to_expiry).unwrap_or(0.0))
            .collect();
        VolSmile {
            time_to_expiry,
            strikes: self.strikes.clone(),
            vols,
        }
    }

    /// Term structure at one strike, interpolating across strikes when needed.
    #[must_use]
    pub fn extract_term_structure(&self, strike: f64) -> TermStructure {
        let vols = self
            .expiries
            .iter()
            .map(|&expiry| self.query(strike, expiry).unwrap_or(0.0))
            .collect();
        TermStructure {
            strike,
            expiries: self.expiries.clone(),
            vols,
        }
    }
}
