//! Option-chain filtering: liquidity gates and OTM-level selection.

use serde::{Deserialize, Serialize};

use voltra_core::{ContractData, OptionType, TickData, VtSymbol};

use crate::OptionSelectorPort;

/// One row of the option chain as seen by the selector.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OptionQuote {
    pub vt_symbol: VtSymbol,
    pub underlying_vt_symbol: VtSymbol,
    pub option_type: OptionType,
    pub strike_price: f64,
    pub days_to_expiry: i64,
    pub bid_price: f64,
    pub bid_volume: i64,
    pub ask_price: f64,
    pub ask_volume: i64,
    /// Signed OTM moneyness, filled in during selection.
    pub otm_depth: f64,
}

/// Chain-level filter settings.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct OptionSelectorConfig {
    /// Which OTM level to trade (1 = closest to at-the-money).
    pub strike_level: usize,
    pub min_bid_price: f64,
    pub min_bid_volume: i64,
    pub min_trading_days: i64,
    pub max_trading_days: i64,
}

impl Default for OptionSelectorConfig {
    fn default() -> Self {
        Self {
            strike_level: 3,
            min_bid_price: 10.0,
            min_bid_volume: 10,
            min_trading_days: 1,
            max_trading_days: 50,
        }
    }
}

/// Hard pre-trade liquidity gate settings.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LiquidityConfig {
    /// Minimum cumulative day volume.
    pub min_volume: f64,
    pub min_bid_volume: f64,
    pub max_spread_ticks: f64,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            min_volume: 100.0,
            min_bid_volume: 1.0,
            max_spread_ticks: 3.0,
        }
    }
}

/// Stateless option selection service.
#[derive(Clone, Copy, Debug, Default)]
pub struct OptionSelector {
    pub config: OptionSelectorConfig,
}

impl OptionSelector {
    #[must_use]
    pub fn new(config: OptionSelectorConfig) -> Self {
        Self { config }
    }

    /// Pick the OTM level-N option of `option_type` from the chain.
    ///
    /// Rows failing the liquidity or expiry-window filters are dropped, the
    /// survivors are ranked by signed moneyness, and the N-th least-OTM row
    /// wins. When fewer rows than N remain the most OTM row is used. There is
    /// no retry with looser parameters: an empty result is an empty result.
    #[must_use]
    pub fn select_target_option(
        &self,
        chain: &[OptionQuote],
        option_type: OptionType,
        underlying_price: f64,
        strike_level: Option<usize>,
    ) -> Option<OptionQuote> {
        if chain.is_empty() || underlying_price <= 0.0 {
            return None;
        }
        let level = strike_level.unwrap_or(self.config.strike_level).max(1);

        let mut candidates: Vec<OptionQuote> = chain
            .iter()
            .filter(|q| q.option_type == option_type)
            .filter(|q| q.bid_price >= self.config.min_bid_price)
            .filter(|q| q.bid_volume >= self.config.min_bid_volume)
            .filter(|q| {
                (self.config.min_trading_days..=self.config.max_trading_days)
                    .contains(&q.days_to_expiry)
            })
            .cloned()
            .collect();

        for quote in &mut candidates {
            quote.otm_depth = match option_type {
                OptionType::Call => (quote.strike_price - underlying_price) / underlying_price,
                OptionType::Put => (underlying_price - quote.strike_price) / underlying_price,
            };
        }
        candidates.retain(|q| q.otm_depth > 0.0);
        if candidates.is_empty() {
            tracing::debug!(
                ?option_type,
                underlying_price,
                "option selection: no out-of-the-money candidates"
            );
            return None;
        }
        candidates.sort_by(|a, b| {
            a.otm_depth
                .partial_cmp(&b.otm_depth)
                .expect("moneyness is finite")
        });

        let index = level.min(candidates.len()) - 1;
        Some(candidates[index].clone())
    }

    /// All OTM options of one type, least OTM first, after the same filters.
    #[must_use]
    pub fn all_otm_options(
        &self,
        chain: &[OptionQuote],
        option_type: OptionType,
        underlying_price: f64,
    ) -> Vec<OptionQuote> {
        let mut result = Vec::new();
        let mut level = 1;
        while let Some(quote) =
            self.select_target_option(chain, option_type, underlying_price, Some(level))
        {
            if result
                .last()
                .is_some_and(|prev: &OptionQuote| prev.vt_symbol == quote.vt_symbol)
            {
                break;
            }
            result.push(quote);
            level += 1;
        }
        result
    }
}

impl OptionSelectorPort for OptionSelector {
    fn select_target_option(
        &self,
        chain: &[OptionQuote],
        option_type: OptionType,
        underlying_price: f64,
        strike_level: Option<usize>,
    ) -> Option<OptionQuote> {
        OptionSelector::select_target_option(self, chain, option_type, underlying_price, strike_level)
    }

    fn all_otm_options(
        &self,
        chain: &[OptionQuote],
        option_type: OptionType,
        underlying_price: f64,
    ) -> Vec<OptionQuote> {
        OptionSelector::all_otm_options(self, chain, option_type, underlying_price)
    }
}

/// Hard liquidity gate run immediately before sending a taker slice.
///
/// Requires enough day volume, a book deep enough to absorb `volume` at the
/// touch, and a spread tighter than the configured tick budget.
#[must_use]
pub fn check_liquidity(
    tick: &TickData,
    contract: &ContractData,
    volume: i64,
    config: &LiquidityConfig,
) -> bool {
    if tick.volume < config.min_volume {
        tracing::info!(
            vt_symbol = %tick.vt_symbol,
            day_volume = tick.volume,
            "liquidity gate: day volume too low"
        );
        return false;
    }
    let needed = (volume as f64).max(config.min_bid_volume);
    if tick.bid_volume_1 < needed {
        tracing::info!(
            vt_symbol = %tick.vt_symbol,
            bid_volume = tick.bid_volume_1,
            needed,
            "liquidity gate: top-of-book too thin"
        );
        return false;
    }
    match tick.spread_ticks(contract.pricetick) {
        Some(spread) if spread < config.max_spread_ticks => true,
        Some(spread) => {
            tracing::info!(
                vt_symbol = %tick.vt_symbol,
                spread_ticks = spread,
                "liquidity gate: spread too wide"
            );
            false
        }
        None => {
            tracing::info!(
                vt_symbol = %tick.vt_symbol,
                pricetick = contract.pricetick,
                "liquidity gate: invalid price tick"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use voltra_core::Exchange;

    fn quote(symbol: &str, option_type: OptionType, strike: f64) -> OptionQuote {
        OptionQuote {
            vt_symbol: symbol.into(),
            underlying_vt_symbol: "rb2505.SHFE".into(),
            option_type,
            strike_price: strike,
            days_to_expiry: 20,
            bid_price: 50.0,
            bid_volume: 40,
            ask_price: 52.0,
            ask_volume: 35,
            otm_depth: 0.0,
        }
    }

    fn put_chain() -> Vec<OptionQuote> {
        vec![
            quote("rb2505P3900.SHFE", OptionType::Put, 3900.0),
            quote("rb2505P3800.SHFE", OptionType::Put, 3800.0),
            quote("rb2505P3700.SHFE", OptionType::Put, 3700.0),
            quote("rb2505P4100.SHFE", OptionType::Put, 4100.0), // ITM for spot 4000
            quote("rb2505C4100.SHFE", OptionType::Call, 4100.0),
        ]
    }

    #[test]
    fn picks_the_nth_otm_level() {
        let selector = OptionSelector::default();
        let first = selector
            .select_target_option(&put_chain(), OptionType::Put, 4000.0, Some(1))
            .unwrap();
        assert_eq!(first.vt_symbol, "rb2505P3900.SHFE");

        let third = selector
            .select_target_option(&put_chain(), OptionType::Put, 4000.0, Some(3))
            .unwrap();
        assert_eq!(third.vt_symbol, "rb2505P3700.SHFE");
        assert!(third.otm_depth > 0.0);
    }

    #[test]
    fn falls_back_to_most_otm_when_chain_is_short() {
        let selector = OptionSelector::default();
        let deep = selector
            .select_target_option(&put_chain(), OptionType::Put, 4000.0, Some(9))
            .unwrap();
        assert_eq!(deep.vt_symbol, "rb2505P3700.SHFE");
    }

    #[test]
    fn liquidity_and_expiry_filters_apply() {
        let selector = OptionSelector::default();
        let mut chain = put_chain();
        chain[0].bid_volume = 1; // below min_bid_volume
        chain[1].days_to_expiry = 90; // beyond max_trading_days
        let selected = selector
            .select_target_option(&chain, OptionType::Put, 4000.0, Some(1))
            .unwrap();
        assert_eq!(selected.vt_symbol, "rb2505P3700.SHFE");
    }

    #[test]
    fn empty_when_nothing_qualifies() {
        let selector = OptionSelector::default();
        // Spot below every put strike: everything is in the money.
        assert!(selector
            .select_target_option(&put_chain(), OptionType::Put, 3000.0, Some(1))
            .is_none());
        assert!(selector
            .select_target_option(&[], OptionType::Put, 4000.0, None)
            .is_none());
    }

    #[test]
    fn all_otm_options_ranks_least_otm_first() {
        let selector = OptionSelector::default();
        let mut chain = put_chain();
        chain[2].bid_volume = 1; // P3700 fails the liquidity filter
        let ranked = selector.all_otm_options(&chain, OptionType::Put, 4000.0);
        let symbols: Vec<&str> = ranked.iter().map(|q| q.vt_symbol.as_str()).collect();
        // The ITM 4100 put and the illiquid 3700 put are gone; the rest are
        // ordered by moneyness.
        assert_eq!(symbols, vec!["rb2505P3900.SHFE", "rb2505P3800.SHFE"]);
        assert!(ranked[0].otm_depth < ranked[1].otm_depth);

        assert!(selector
            .all_otm_options(&put_chain(), OptionType::Put, 3000.0)
            .is_empty());
    }

    #[test]
    fn call_moneyness_points_the_other_way() {
        let selector = OptionSelector::default();
        let chain = vec![
            quote("rb2505C4100.SHFE", OptionType::Call, 4100.0),
            quote("rb2505C4200.SHFE", OptionType::Call, 4200.0),
        ];
        let first = selector
            .select_target_option(&chain, OptionType::Call, 4000.0, Some(1))
            .unwrap();
        assert_eq!(first.vt_symbol, "rb2505C4100.SHFE");
    }

    fn gate_fixture() -> (TickData, ContractData) {
        let tick = TickData {
            vt_symbol: "rb2505P3900.SHFE".into(),
            datetime: Local::now(),
            last_price: 50.0,
            volume: 5000.0,
            bid_price_1: 50.0,
            bid_volume_1: 30.0,
            ask_price_1: 51.0,
            ask_volume_1: 20.0,
        };
        let contract = ContractData {
            vt_symbol: "rb2505P3900.SHFE".into(),
            symbol: "rb2505P3900".into(),
            exchange: Exchange::Shfe,
            product: "rb".into(),
            name: "rb2505P3900".into(),
            size: 10.0,
            pricetick: 1.0,
            option: None,
        };
        (tick, contract)
    }

    #[test]
    fn liquidity_gate_accepts_deep_tight_books() {
        let (tick, contract) = gate_fixture();
        assert!(check_liquidity(&tick, &contract, 10, &LiquidityConfig::default()));
    }

    #[test]
    fn liquidity_gate_rejects_thin_book_wide_spread_and_bad_tick() {
        let config = LiquidityConfig::default();
        let (tick, contract) = gate_fixture();

        assert!(!check_liquidity(&tick, &contract, 31, &config));

        let mut wide = tick.clone();
        wide.ask_price_1 = 54.0;
        assert!(!check_liquidity(&wide, &contract, 1, &config));

        let mut quiet = tick.clone();
        quiet.volume = 10.0;
        assert!(!check_liquidity(&quiet, &contract, 1, &config));

        let mut bad_contract = contract;
        bad_contract.pricetick = 0.0;
        assert!(!check_liquidity(&tick, &bad_contract, 1, &config));
    }
}
