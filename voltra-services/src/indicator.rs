//! Reference indicator service: incremental EMA/MACD written into the
//! instrument's indicator dictionary.

use std::collections::HashMap;

use voltra_core::BarData;
use voltra_domain::Instrument;

use crate::IndicatorService;

/// Incremental EMA state.
#[derive(Clone, Copy, Debug, Default)]
struct Ema {
    period: usize,
    value: Option<f64>,
}

impl Ema {
    fn new(period: usize) -> Self {
        Self {
            period,
            value: None,
        }
    }

    fn next(&mut self, input: f64) -> f64 {
        let alpha = 2.0 / (self.period as f64 + 1.0);
        let next = match self.value {
            Some(previous) => alpha * input + (1.0 - alpha) * previous,
            None => input,
        };
        self.value = Some(next);
        next
    }
}

#[derive(Clone, Copy, Debug)]
struct MacdState {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    prev_hist: Option<f64>,
}

/// Writes `ema_fast`, `ema_slow`, `macd`, `macd_signal`, `macd_hist` and
/// `macd_hist_prev` for every bar. Periods follow the common 12/26/9 setup.
pub struct MacdIndicatorService {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    states: HashMap<String, MacdState>,
}

impl MacdIndicatorService {
    #[must_use]
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast_period,
            slow_period,
            signal_period,
            states: HashMap::new(),
        }
    }
}

impl Default for MacdIndicatorService {
    fn default() -> Self {
        Self::new(12, 26, 9)
    }
}

impl IndicatorService for MacdIndicatorService {
    fn calculate_bar(&mut self, instrument: &mut Instrument, bar: &BarData) {
        let state = self
            .states
            .entry(instrument.vt_symbol.clone())
            .or_insert_with(|| MacdState {
                fast: Ema::new(self.fast_period),
                slow: Ema::new(self.slow_period),
                signal: Ema::new(self.signal_period),
                prev_hist: None,
            });

        let fast = state.fast.next(bar.close);
        let slow = state.slow.next(bar.close);
        let macd = fast - slow;
        let signal = state.signal.next(macd);
        let hist = macd - signal;

        instrument.set_indicator("ema_fast", fast);
        instrument.set_indicator("ema_slow", slow);
        instrument.set_indicator("macd", macd);
        instrument.set_indicator("macd_signal", signal);
        instrument.set_indicator("macd_hist", hist);
        if let Some(prev) = state.prev_hist {
            instrument.set_indicator("macd_hist_prev", prev);
        }
        state.prev_hist = Some(hist);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local, TimeZone};

    fn bar(minute: i64, close: f64) -> BarData {
        let base = Local.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
        BarData {
            vt_symbol: "rb2505.SHFE".into(),
            datetime: base + Duration::minutes(minute),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn first_bar_seeds_emas_with_close() {
        let mut service = MacdIndicatorService::default();
        let mut instrument = Instrument::new("rb2505.SHFE");
        let first = bar(0, 4000.0);
        instrument.append_bar(first.clone()).unwrap();
        service.calculate_bar(&mut instrument, &first);

        assert_eq!(instrument.indicator_f64("ema_fast"), Some(4000.0));
        assert_eq!(instrument.indicator_f64("ema_slow"), Some(4000.0));
        assert_eq!(instrument.indicator_f64("macd"), Some(0.0));
    }

    #[test]
    fn rising_closes_turn_macd_positive() {
        let mut service = MacdIndicatorService::default();
        let mut instrument = Instrument::new("rb2505.SHFE");
        for minute in 0..30 {
            let bar = bar(minute, 4000.0 + 5.0 * minute as f64);
            instrument.append_bar(bar.clone()).unwrap();
            service.calculate_bar(&mut instrument, &bar);
        }
        assert!(instrument.indicator_f64("macd").unwrap() > 0.0);
        assert!(instrument.indicator_f64("macd_hist_prev").is_some());
    }

    #[test]
    fn state_is_kept_per_symbol() {
        let mut service = MacdIndicatorService::default();
        let mut rb = Instrument::new("rb2505.SHFE");
        let mut cu = Instrument::new("cu2505.SHFE");

        let rb_bar = bar(0, 4000.0);
        let mut cu_bar = bar(0, 70000.0);
        cu_bar.vt_symbol = "cu2505.SHFE".into();

        service.calculate_bar(&mut rb, &rb_bar);
        service.calculate_bar(&mut cu, &cu_bar);

        assert_eq!(rb.indicator_f64("ema_fast"), Some(4000.0));
        assert_eq!(cu.indicator_f64("ema_fast"), Some(70000.0));
    }
}
