//! Bar pipeline: assemble N-minute window bars from ticks and 1-minute
//! bars. A window of one is a pass-through.
//!
//! Window bars for all subscribed symbols are emitted together with one
//! timestamp, so downstream logic always sees a consistent cross-symbol
//! snapshot.

use std::collections::HashMap;

use chrono::{DateTime, Local, Timelike};

use voltra_core::{BarData, TickData, VtSymbol};

/// Truncate a timestamp to its minute.
fn minute_of(datetime: DateTime<Local>) -> DateTime<Local> {
    datetime
        .with_second(0)
        .and_then(|dt| dt.with_nanosecond(0))
        .unwrap_or(datetime)
}

/// Builds per-symbol 1-minute bars out of raw ticks.
#[derive(Debug, Default)]
struct MinuteAssembler {
    current_minute: Option<DateTime<Local>>,
    working: HashMap<VtSymbol, BarData>,
}

impl MinuteAssembler {
    /// Fold one tick in; a tick in a newer minute flushes the finished
    /// minute for every symbol at once.
    fn update_tick(&mut self, tick: &TickData) -> Option<Vec<BarData>> {
        let tick_minute = minute_of(tick.datetime);
        let mut finished = None;

        if let Some(current) = self.current_minute {
            if tick_minute > current {
                finished = Some(self.working.drain().map(|(_, bar)| bar).collect());
            }
        }
        if finished.is_some() || self.current_minute.is_none() {
            self.current_minute = Some(tick_minute);
        }

        let bar = self
            .working
            .entry(tick.vt_symbol.clone())
            .or_insert_with(|| BarData {
                vt_symbol: tick.vt_symbol.clone(),
                datetime: tick_minute,
                open: tick.last_price,
                high: tick.last_price,
                low: tick.last_price,
                close: tick.last_price,
                volume: 0.0,
            });
        bar.high = bar.high.max(tick.last_price);
        bar.low = bar.low.min(tick.last_price);
        bar.close = tick.last_price;

        finished
    }
}

/// Bar pipeline, direct pass-through or windowed, chosen at init.
#[derive(Debug)]
pub enum BarPipeline {
    /// `bar_window == 1`: bars pass through unchanged.
    Passthrough { assembler: MinuteAssemblerBox },
    /// Assemble `window`-minute bars aligned to clock boundaries.
    Windowed {
        window: u32,
        assembler: MinuteAssemblerBox,
        working: HashMap<VtSymbol, BarData>,
        /// Guard against unbounded buffering of stale working bars.
        max_buffered: usize,
    },
}

/// Tick assembly state shared by both variants.
#[derive(Debug, Default)]
pub struct MinuteAssemblerBox {
    inner: MinuteAssembler,
}

impl BarPipeline {
    #[must_use]
    pub fn new(window: u32, max_buffered: usize) -> Self {
        if window <= 1 {
            Self::Passthrough {
                assembler: MinuteAssemblerBox::default(),
            }
        } else {
            Self::Windowed {
                window,
                assembler: MinuteAssemblerBox::default(),
                working: HashMap::new(),
                max_buffered,
            }
        }
    }

    /// Feed one tick; completed window bars come back when a window closes.
    pub fn handle_tick(&mut self, tick: &TickData) -> Option<Vec<BarData>> {
        let finished_minute = match self {
            Self::Passthrough { assembler } | Self::Windowed { assembler, .. } => {
                assembler.inner.update_tick(tick)?
            }
        };
        self.handle_bars(finished_minute)
    }

    /// Feed the 1-minute bars of one minute (all symbols together).
    ///
    /// Returns the finished window bars when this minute closes a window.
    pub fn handle_bars(&mut self, bars: Vec<BarData>) -> Option<Vec<BarData>> {
        match self {
            Self::Passthrough { .. } => {
                if bars.is_empty() {
                    None
                } else {
                    Some(bars)
                }
            }
            Self::Windowed {
                window,
                working,
                max_buffered,
                ..
            } => {
                let Some(minute) = bars.first().map(|b| b.datetime) else {
                    return None;
                };
                for bar in bars {
                    match working.get_mut(&bar.vt_symbol) {
                        Some(accumulated) => accumulated.merge(&bar),
                        None => {
                            working.insert(bar.vt_symbol.clone(), bar);
                        }
                    }
                }
                if working.len() > *max_buffered {
                    // Stale symbols must not pin memory; drop the book and
                    // restart the window.
                    tracing::warn!(
                        buffered = working.len(),
                        limit = *max_buffered,
                        "bar pipeline buffer overflow; dropping working bars"
                    );
                    working.clear();
                    return None;
                }

                // Clock-aligned close: minute 14 closes a 15-minute window.
                if (minute.minute() + 1) % *window == 0 {
                    let mut finished: Vec<BarData> =
                        working.drain().map(|(_, bar)| bar).collect();
                    let window_close = minute;
                    for bar in &mut finished {
                        bar.datetime = window_close;
                    }
                    finished.sort_by(|a, b| a.vt_symbol.cmp(&b.vt_symbol));
                    Some(finished)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(symbol: &str, minute: u32, close: f64) -> BarData {
        BarData {
            vt_symbol: symbol.into(),
            datetime: Local.with_ymd_and_hms(2025, 1, 10, 9, minute, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    fn tick(symbol: &str, minute: u32, second: u32, price: f64) -> TickData {
        TickData {
            vt_symbol: symbol.into(),
            datetime: Local
                .with_ymd_and_hms(2025, 1, 10, 9, minute, second)
                .unwrap(),
            last_price: price,
            volume: 100.0,
            bid_price_1: price - 1.0,
            bid_volume_1: 10.0,
            ask_price_1: price + 1.0,
            ask_volume_1: 10.0,
        }
    }

    #[test]
    fn window_of_one_passes_bars_through() {
        let mut pipeline = BarPipeline::new(1, 64);
        let input = vec![bar("rb2505.SHFE", 0, 4000.0)];
        let output = pipeline.handle_bars(input.clone()).unwrap();
        assert_eq!(output, input);
        assert!(pipeline.handle_bars(Vec::new()).is_none());
    }

    #[test]
    fn fifteen_minute_window_closes_on_the_boundary() {
        let mut pipeline = BarPipeline::new(15, 64);
        for minute in 0..14 {
            assert!(pipeline
                .handle_bars(vec![bar("rb2505.SHFE", minute, 4000.0 + minute as f64)])
                .is_none());
        }
        // Minute 14 is the last bar of the 09:00-09:14 window.
        let finished = pipeline
            .handle_bars(vec![bar("rb2505.SHFE", 14, 4020.0)])
            .unwrap();
        assert_eq!(finished.len(), 1);
        let window_bar = &finished[0];
        assert_eq!(window_bar.open, 4000.0);
        assert_eq!(window_bar.close, 4020.0);
        assert_eq!(window_bar.volume, 150.0);
        assert_eq!(window_bar.datetime.minute(), 14);
    }

    #[test]
    fn all_symbols_emit_together_with_one_timestamp() {
        let mut pipeline = BarPipeline::new(5, 64);
        for minute in 0..4 {
            pipeline.handle_bars(vec![
                bar("rb2505.SHFE", minute, 4000.0),
                bar("MA505.CZCE", minute, 2500.0),
            ]);
        }
        let finished = pipeline
            .handle_bars(vec![
                bar("rb2505.SHFE", 4, 4001.0),
                bar("MA505.CZCE", 4, 2501.0),
            ])
            .unwrap();
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].datetime, finished[1].datetime);
        // Deterministic symbol order.
        assert_eq!(finished[0].vt_symbol, "MA505.CZCE");
    }

    #[test]
    fn ticks_assemble_into_minute_bars_then_windows() {
        let mut pipeline = BarPipeline::new(1, 64);
        assert!(pipeline.handle_tick(&tick("rb2505.SHFE", 0, 5, 4000.0)).is_none());
        assert!(pipeline.handle_tick(&tick("rb2505.SHFE", 0, 40, 4004.0)).is_none());

        // First tick of minute 1 flushes minute 0.
        let finished = pipeline
            .handle_tick(&tick("rb2505.SHFE", 1, 2, 4002.0))
            .unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].open, 4000.0);
        assert_eq!(finished[0].close, 4004.0);
        assert_eq!(finished[0].datetime.minute(), 0);
    }

    #[test]
    fn buffer_limit_drops_stale_working_bars() {
        let mut pipeline = BarPipeline::new(30, 2);
        let bars: Vec<BarData> = (0..3)
            .map(|i| bar(&format!("sym{i}.SHFE"), 0, 100.0))
            .collect();
        assert!(pipeline.handle_bars(bars).is_none());
        if let BarPipeline::Windowed { working, .. } = &pipeline {
            assert!(working.is_empty());
        } else {
            panic!("expected windowed pipeline");
        }
    }
}
