//! Position sizing with daily caps and margin checks.

use serde::{Deserialize, Serialize};

use voltra_core::{AccountData, Direction, Offset, OrderInstruction};
use voltra_domain::Position;

use crate::PositionSizer;

/// Sizing and exposure limits.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SizingConfig {
    pub max_positions: usize,
    /// Fraction of balance that must remain available to open.
    pub position_ratio: f64,
    /// Lots per opening clip.
    pub open_volume: i64,
    pub global_daily_limit: i64,
    pub contract_daily_limit: i64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_positions: 5,
            position_ratio: 0.1,
            open_volume: 1,
            global_daily_limit: 50,
            contract_daily_limit: 2,
        }
    }
}

/// Everything the sizer looks at when deciding an open.
pub struct SizingContext<'a> {
    pub vt_symbol: &'a str,
    pub signal: &'a str,
    pub contract_price: f64,
    pub direction: Direction,
    pub account: &'a AccountData,
    pub active_positions: &'a [Position],
    /// Global opened-today count including reserved volume.
    pub global_open_used: i64,
    /// Per-contract opened-today count including reserved volume.
    pub contract_open_used: i64,
}

/// Cap-aware sizing service.
///
/// Checks run in a fixed order and the first failure wins; the clip size
/// itself is deliberately plain (a fixed lot count from config).
#[derive(Clone, Copy, Debug, Default)]
pub struct PositionSizingService {
    config: SizingConfig,
}

impl PositionSizingService {
    #[must_use]
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SizingConfig {
        &self.config
    }
}

impl PositionSizer for PositionSizingService {
    fn calculate_open(&self, ctx: &SizingContext<'_>) -> Option<OrderInstruction> {
        let cfg = &self.config;
        let volume = cfg.open_volume;

        if ctx.active_positions.len() >= cfg.max_positions {
            tracing::info!(
                vt_symbol = ctx.vt_symbol,
                held = ctx.active_positions.len(),
                "sizing: max concurrent positions reached"
            );
            return None;
        }
        if ctx.global_open_used + volume > cfg.global_daily_limit {
            tracing::info!(vt_symbol = ctx.vt_symbol, "sizing: global daily cap reached");
            return None;
        }
        if ctx.contract_open_used + volume > cfg.contract_daily_limit {
            tracing::info!(vt_symbol = ctx.vt_symbol, "sizing: contract daily cap reached");
            return None;
        }
        if ctx
            .active_positions
            .iter()
            .any(|p| p.vt_symbol == ctx.vt_symbol)
        {
            tracing::info!(vt_symbol = ctx.vt_symbol, "sizing: already holding contract");
            return None;
        }
        if ctx.contract_price <= 0.0 {
            return None;
        }
        let required = cfg.position_ratio * ctx.account.balance;
        if ctx.account.available() < required {
            tracing::info!(
                vt_symbol = ctx.vt_symbol,
                available = ctx.account.available(),
                required,
                "sizing: insufficient free margin"
            );
            return None;
        }

        Some(OrderInstruction::limit(
            ctx.vt_symbol,
            ctx.direction,
            Offset::Open,
            volume,
            ctx.contract_price,
            ctx.signal,
        ))
    }

    fn calculate_exit(
        &self,
        position: &Position,
        pending_close_volume: i64,
        close_price: f64,
        signal: &str,
    ) -> Option<OrderInstruction> {
        if !position.is_active() {
            return None;
        }
        let volume = (position.volume - pending_close_volume).max(0);
        if volume == 0 {
            return None;
        }
        Some(OrderInstruction::limit(
            position.vt_symbol.clone(),
            position.direction.inverse(),
            Offset::Close,
            volume,
            close_price,
            signal,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn account(balance: f64, frozen: f64) -> AccountData {
        AccountData {
            accountid: "sim".into(),
            balance,
            frozen,
        }
    }

    fn active_position(vt_symbol: &str) -> Position {
        let mut position = Position::new(
            vt_symbol,
            "rb2505.SHFE",
            "s",
            1,
            Direction::Short,
            Local::now(),
        );
        position.add_fill(1, 100.0, Local::now());
        position
    }

    fn ctx<'a>(
        account: &'a AccountData,
        positions: &'a [Position],
        global_used: i64,
        contract_used: i64,
    ) -> SizingContext<'a> {
        SizingContext {
            vt_symbol: "rb2505P3900.SHFE",
            signal: "sell_put_macd_cross_up",
            contract_price: 120.0,
            direction: Direction::Short,
            account,
            active_positions: positions,
            global_open_used: global_used,
            contract_open_used: contract_used,
        }
    }

    #[test]
    fn open_produces_a_short_open_clip() {
        let sizer = PositionSizingService::default();
        let account = account(1_000_000.0, 0.0);
        let instruction = sizer.calculate_open(&ctx(&account, &[], 0, 0)).unwrap();
        assert_eq!(instruction.volume, 1);
        assert_eq!(instruction.direction, Direction::Short);
        assert_eq!(instruction.offset, Offset::Open);
        assert_eq!(instruction.signal, "sell_put_macd_cross_up");
    }

    #[test]
    fn caps_and_duplicates_win_over_everything() {
        let sizer = PositionSizingService::default();
        let account = account(1_000_000.0, 0.0);

        assert!(sizer.calculate_open(&ctx(&account, &[], 50, 0)).is_none());
        assert!(sizer.calculate_open(&ctx(&account, &[], 0, 2)).is_none());

        let held: Vec<Position> = (0..5)
            .map(|i| active_position(&format!("rb2505P{}.SHFE", 3500 + i * 100)))
            .collect();
        assert!(sizer.calculate_open(&ctx(&account, &held, 0, 0)).is_none());

        let duplicate = vec![active_position("rb2505P3900.SHFE")];
        assert!(sizer.calculate_open(&ctx(&account, &duplicate, 0, 0)).is_none());
    }

    #[test]
    fn margin_requirement_blocks_opens() {
        let sizer = PositionSizingService::default();
        // 95% of the balance frozen: available < 10% requirement.
        let tight = account(100_000.0, 95_000.0);
        assert!(sizer.calculate_open(&ctx(&tight, &[], 0, 0)).is_none());
    }

    #[test]
    fn exit_clamps_to_unreserved_volume() {
        let sizer = PositionSizingService::default();
        let mut position = active_position("rb2505P3900.SHFE");
        position.add_fill(2, 100.0, Local::now());

        let instruction = sizer
            .calculate_exit(&position, 1, 90.0, "close_macd_cross_down")
            .unwrap();
        assert_eq!(instruction.volume, 2);
        assert_eq!(instruction.direction, Direction::Long);
        assert_eq!(instruction.offset, Offset::Close);

        assert!(sizer.calculate_exit(&position, 3, 90.0, "x").is_none());

        let mut closed = position.clone();
        closed.reduce_volume(3, Local::now());
        assert!(sizer.calculate_exit(&closed, 0, 90.0, "x").is_none());
    }
}
