//! Per-symbol market state: bar history, indicator dictionary and the
//! active-contract map.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use voltra_core::{BarData, IndicatorMap, IndicatorValue, Product, VtSymbol};

use crate::DomainError;

/// Default number of bars retained per instrument.
const DEFAULT_HISTORY_CAP: usize = 500;

/// One tracked symbol: its bar ring and the open indicator dictionary.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Instrument {
    pub vt_symbol: VtSymbol,
    bars: VecDeque<BarData>,
    indicators: IndicatorMap,
    pub last_update_time: Option<DateTime<Local>>,
    history_cap: usize,
}

impl Instrument {
    #[must_use]
    pub fn new(vt_symbol: impl Into<VtSymbol>) -> Self {
        Self {
            vt_symbol: vt_symbol.into(),
            bars: VecDeque::with_capacity(DEFAULT_HISTORY_CAP),
            indicators: HashMap::new(),
            last_update_time: None,
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }

    /// Append a bar, enforcing strictly increasing datetimes.
    pub fn append_bar(&mut self, bar: BarData) -> Result<(), DomainError> {
        if let Some(last) = self.bars.back() {
            if bar.datetime <= last.datetime {
                return Err(DomainError::NonMonotonicBar {
                    vt_symbol: self.vt_symbol.clone(),
                    last: last.datetime.to_rfc3339(),
                    incoming: bar.datetime.to_rfc3339(),
                });
            }
        }
        if self.bars.len() >= self.history_cap {
            self.bars.pop_front();
        }
        self.last_update_time = Some(bar.datetime);
        self.bars.push_back(bar);
        Ok(())
    }

    /// Up to `n` most recent bars, oldest first.
    #[must_use]
    pub fn bar_history(&self, n: usize) -> Vec<BarData> {
        let skip = self.bars.len().saturating_sub(n);
        self.bars.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    #[must_use]
    pub fn latest_bar(&self) -> Option<&BarData> {
        self.bars.back()
    }

    #[must_use]
    pub fn latest_close(&self) -> f64 {
        self.bars.back().map(|b| b.close).unwrap_or(0.0)
    }

    /// Store an indicator value for the last appended bar.
    pub fn set_indicator(&mut self, name: impl Into<String>, value: impl Into<IndicatorValue>) {
        self.indicators.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn indicator(&self, name: &str) -> Option<&IndicatorValue> {
        self.indicators.get(name)
    }

    #[must_use]
    pub fn indicator_f64(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).and_then(IndicatorValue::as_f64)
    }

    #[must_use]
    pub fn indicators(&self) -> &IndicatorMap {
        &self.indicators
    }
}

/// Serializable state of the whole aggregate.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct InstrumentSnapshot {
    pub instruments: HashMap<VtSymbol, Instrument>,
    pub active_contracts: HashMap<Product, VtSymbol>,
}

/// Read-model aggregate over every tracked symbol.
///
/// Pure data container: indicator and signal computation live behind the
/// service ports, the engine feeds results back in here.
#[derive(Debug, Default)]
pub struct InstrumentAggregate {
    instruments: HashMap<VtSymbol, Instrument>,
    active_contracts: HashMap<Product, VtSymbol>,
}

impl InstrumentAggregate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, vt_symbol: &str) -> &mut Instrument {
        self.instruments
            .entry(vt_symbol.to_string())
            .or_insert_with(|| Instrument::new(vt_symbol))
    }

    #[must_use]
    pub fn get(&self, vt_symbol: &str) -> Option<&Instrument> {
        self.instruments.get(vt_symbol)
    }

    #[must_use]
    pub fn get_mut(&mut self, vt_symbol: &str) -> Option<&mut Instrument> {
        self.instruments.get_mut(vt_symbol)
    }

    /// Append one bar to its symbol's history.
    pub fn append_bar(&mut self, bar: BarData) -> Result<(), DomainError> {
        let vt_symbol = bar.vt_symbol.clone();
        self.get_or_create(&vt_symbol).append_bar(bar)
    }

    #[must_use]
    pub fn bar_history(&self, vt_symbol: &str, n: usize) -> Vec<BarData> {
        self.instruments
            .get(vt_symbol)
            .map(|i| i.bar_history(n))
            .unwrap_or_default()
    }

    /// Latest close, 0.0 for unknown symbols.
    #[must_use]
    pub fn latest_price(&self, vt_symbol: &str) -> f64 {
        self.instruments
            .get(vt_symbol)
            .map(Instrument::latest_close)
            .unwrap_or(0.0)
    }

    #[must_use]
    pub fn has_enough_data(&self, vt_symbol: &str, min_len: usize) -> bool {
        self.instruments
            .get(vt_symbol)
            .map(|i| i.bar_count() >= min_len)
            .unwrap_or(false)
    }

    /// Point the product at a new dominant contract.
    ///
    /// Returns the replaced symbol when the mapping actually changed.
    pub fn set_active_contract(
        &mut self,
        product: impl Into<Product>,
        vt_symbol: impl Into<VtSymbol>,
    ) -> Option<VtSymbol> {
        let vt_symbol = vt_symbol.into();
        let previous = self.active_contracts.insert(product.into(), vt_symbol.clone());
        previous.filter(|old| *old != vt_symbol)
    }

    #[must_use]
    pub fn active_contract(&self, product: &str) -> Option<&VtSymbol> {
        self.active_contracts.get(product)
    }

    #[must_use]
    pub fn all_active_contracts(&self) -> Vec<VtSymbol> {
        self.active_contracts.values().cloned().collect()
    }

    #[must_use]
    pub fn all_symbols(&self) -> Vec<VtSymbol> {
        self.instruments.keys().cloned().collect()
    }

    #[must_use]
    pub fn snapshot(&self) -> InstrumentSnapshot {
        InstrumentSnapshot {
            instruments: self.instruments.clone(),
            active_contracts: self.active_contracts.clone(),
        }
    }

    #[must_use]
    pub fn from_snapshot(snapshot: InstrumentSnapshot) -> Self {
        Self {
            instruments: snapshot.instruments,
            active_contracts: snapshot.active_contracts,
        }
    }

    pub fn clear(&mut self) {
        self.instruments.clear();
        self.active_contracts.clear();
    }
}
