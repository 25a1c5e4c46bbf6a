//! Dominant-future selection under the 7-day expiry rule.

use chrono::NaiveDate;

use voltra_core::{expiry_from_symbol, ContractData};

use crate::FutureSelectorPort;

/// Picks the contract a product should trade on.
#[derive(Clone, Copy, Debug)]
pub struct FutureSelector {
    /// Roll to the next contract when the front expires within this many days.
    pub rollover_days: i64,
}

impl Default for FutureSelector {
    fn default() -> Self {
        Self { rollover_days: 7 }
    }
}

impl FutureSelector {
    /// Choose the dominant contract from one product's candidates.
    ///
    /// Candidates are ordered by parsed expiry (symbol order as tie-break);
    /// when the front contract expires within `rollover_days` the next one
    /// wins. Symbols with no parsable expiry fall back to plain symbol order,
    /// which matches chronological order for domestic futures.
    #[must_use]
    pub fn select_dominant(
        &self,
        contracts: &[ContractData],
        today: NaiveDate,
    ) -> Option<ContractData> {
        if contracts.is_empty() {
            return None;
        }

        let mut sorted: Vec<&ContractData> = contracts.iter().collect();
        // Parsable expiries first in date order; unparsable symbols last in
        // plain symbol order.
        sorted.sort_by(|a, b| {
            let ea = expiry_from_symbol(&a.symbol, today);
            let eb = expiry_from_symbol(&b.symbol, today);
            ea.is_none()
                .cmp(&eb.is_none())
                .then(ea.cmp(&eb))
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let front = sorted[0];
        let Some(front_expiry) = expiry_from_symbol(&front.symbol, today) else {
            return Some(front.clone());
        };

        let days_left = (front_expiry - today).num_days();
        if days_left > self.rollover_days {
            Some(front.clone())
        } else {
            Some(sorted.get(1).copied().unwrap_or(front).clone())
        }
    }
}

impl FutureSelectorPort for FutureSelector {
    fn select_dominant(
        &self,
        contracts: &[ContractData],
        today: NaiveDate,
    ) -> Option<ContractData> {
        FutureSelector::select_dominant(self, contracts, today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voltra_core::Exchange;

    fn future(symbol: &str) -> ContractData {
        ContractData {
            vt_symbol: format!("{symbol}.SHFE"),
            symbol: symbol.into(),
            exchange: Exchange::Shfe,
            product: "rb".into(),
            name: symbol.into(),
            size: 10.0,
            pricetick: 1.0,
            option: None,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn far_from_expiry_keeps_the_front_contract() {
        let selector = FutureSelector::default();
        let contracts = vec![future("rb2501"), future("rb2505")];
        let selected = selector.select_dominant(&contracts, d(2024, 12, 1)).unwrap();
        assert_eq!(selected.symbol, "rb2501");
    }

    #[test]
    fn within_seven_days_rolls_to_the_next_contract() {
        let selector = FutureSelector::default();
        let contracts = vec![future("rb2501"), future("rb2505")];
        // 2025-01-15 expiry, five days out.
        let selected = selector.select_dominant(&contracts, d(2025, 1, 10)).unwrap();
        assert_eq!(selected.symbol, "rb2505");
    }

    #[test]
    fn ten_days_out_still_front() {
        let selector = FutureSelector::default();
        let contracts = vec![future("rb2501"), future("rb2505")];
        let selected = selector.select_dominant(&contracts, d(2025, 1, 5)).unwrap();
        assert_eq!(selected.symbol, "rb2501");
    }

    #[test]
    fn single_contract_near_expiry_is_kept() {
        let selector = FutureSelector::default();
        let selected = selector
            .select_dominant(&[future("rb2501")], d(2025, 1, 10))
            .unwrap();
        assert_eq!(selected.symbol, "rb2501");
    }

    #[test]
    fn unparsable_symbols_fall_back_to_symbol_order() {
        let selector = FutureSelector::default();
        let contracts = vec![future("rbZZZZ"), future("rbAAAA")];
        let selected = selector.select_dominant(&contracts, d(2025, 1, 10)).unwrap();
        assert_eq!(selected.symbol, "rbAAAA");
    }

    #[test]
    fn empty_candidates_yield_none() {
        assert!(FutureSelector::default()
            .select_dominant(&[], d(2025, 1, 10))
            .is_none());
    }
}
