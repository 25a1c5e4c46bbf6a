//! Pluggable strategy services and the contract-selection layer.
//!
//! Indicator computation, signal generation and sizing are capability ports:
//! concrete strategy crates supply implementations through a [`ServiceBundle`]
//! handed to the engine at construction. The engine itself never interprets
//! signal strings.

mod future_selector;
mod indicator;
mod option_selector;
mod signal;
mod sizing;

pub use future_selector::FutureSelector;
pub use indicator::MacdIndicatorService;
pub use option_selector::{
    check_liquidity, LiquidityConfig, OptionQuote, OptionSelector, OptionSelectorConfig,
};
pub use signal::MacdSignalService;
pub use sizing::{PositionSizingService, SizingConfig, SizingContext};

use chrono::NaiveDate;

use voltra_core::{BarData, ContractData, OptionType, OrderInstruction};
use voltra_domain::{Instrument, Position};

/// Writes per-bar indicator values into the instrument's open dictionary.
pub trait IndicatorService {
    fn calculate_bar(&mut self, instrument: &mut Instrument, bar: &BarData);
}

/// Maps indicator state to open-vocabulary signal strings.
pub trait SignalService {
    /// A signal to open a new position, or `None`.
    fn check_open_signal(&mut self, instrument: &Instrument) -> Option<String>;

    /// A signal to close `position`, or `None`.
    fn check_close_signal(&mut self, instrument: &Instrument, position: &Position)
        -> Option<String>;

    /// Which option leg a given open signal trades. The engine never
    /// interprets signal strings itself; strategies that emit call-side
    /// signals override this. Default: the short-put book.
    fn option_type_for(&self, _signal: &str) -> OptionType {
        OptionType::Put
    }
}

/// Turns a sized trading decision into an order instruction.
pub trait PositionSizer {
    fn calculate_open(&self, ctx: &SizingContext<'_>) -> Option<OrderInstruction>;

    fn calculate_exit(
        &self,
        position: &Position,
        pending_close_volume: i64,
        close_price: f64,
        signal: &str,
    ) -> Option<OrderInstruction>;
}

/// Chooses the dominant contract a product should trade on.
pub trait FutureSelectorPort {
    fn select_dominant(
        &self,
        contracts: &[ContractData],
        today: NaiveDate,
    ) -> Option<ContractData>;
}

/// Filters and ranks an option chain for trade-target selection.
pub trait OptionSelectorPort {
    /// The single option the strategy should trade, or `None`.
    fn select_target_option(
        &self,
        chain: &[OptionQuote],
        option_type: OptionType,
        underlying_price: f64,
        strike_level: Option<usize>,
    ) -> Option<OptionQuote>;

    /// Every qualifying OTM option, least OTM first.
    fn all_otm_options(
        &self,
        chain: &[OptionQuote],
        option_type: OptionType,
        underlying_price: f64,
    ) -> Vec<OptionQuote>;
}

/// The full set of strategy-supplied services consumed by the engine.
pub struct ServiceBundle {
    pub indicator: Box<dyn IndicatorService>,
    pub signal: Box<dyn SignalService>,
    pub sizer: Box<dyn PositionSizer>,
    pub future_selector: Box<dyn FutureSelectorPort>,
    pub option_selector: Box<dyn OptionSelectorPort>,
}

impl ServiceBundle {
    /// Bundle built from the reference MACD services and selectors; used by
    /// the demo configuration and the engine tests.
    #[must_use]
    pub fn reference(sizing: SizingConfig, option_selector: OptionSelectorConfig) -> Self {
        Self {
            indicator: Box::new(MacdIndicatorService::default()),
            signal: Box::new(MacdSignalService::default()),
            sizer: Box::new(PositionSizingService::new(sizing)),
            future_selector: Box::new(FutureSelector::default()),
            option_selector: Box::new(OptionSelector::new(option_selector)),
        }
    }
}
