//! Reference signal service driven by the MACD histogram.

use voltra_core::OptionType;
use voltra_domain::{Instrument, Position};

use crate::SignalService;

/// Emits `sell_put_macd_cross_up` when the histogram crosses above zero and
/// `close_macd_cross_down` on the opposite cross. Signal strings are opaque
/// to everything downstream; these are just the reference vocabulary.
#[derive(Debug, Default)]
pub struct MacdSignalService;

impl MacdSignalService {
    fn histogram_cross(instrument: &Instrument) -> Option<(f64, f64)> {
        let hist = instrument.indicator_f64("macd_hist")?;
        let prev = instrument.indicator_f64("macd_hist_prev")?;
        Some((prev, hist))
    }
}

impl SignalService for MacdSignalService {
    fn check_open_signal(&mut self, instrument: &Instrument) -> Option<String> {
        let (prev, hist) = Self::histogram_cross(instrument)?;
        if prev <= 0.0 && hist > 0.0 {
            Some("sell_put_macd_cross_up".to_string())
        } else if prev >= 0.0 && hist < 0.0 {
            Some("sell_call_macd_cross_down".to_string())
        } else {
            None
        }
    }

    fn check_close_signal(
        &mut self,
        instrument: &Instrument,
        position: &Position,
    ) -> Option<String> {
        let (prev, hist) = Self::histogram_cross(instrument)?;
        // Close when momentum turns against the signal that opened the leg.
        if position.signal.starts_with("sell_put") && prev >= 0.0 && hist < 0.0 {
            Some("close_macd_cross_down".to_string())
        } else if position.signal.starts_with("sell_call") && prev <= 0.0 && hist > 0.0 {
            Some("close_macd_cross_up".to_string())
        } else {
            None
        }
    }

    fn option_type_for(&self, signal: &str) -> OptionType {
        if signal.starts_with("sell_call") {
            OptionType::Call
        } else {
            OptionType::Put
        }
    }
}
