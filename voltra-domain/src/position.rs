//! The strategy's position book: positions it opened, orders in flight,
//! daily open-volume caps and manual-intervention detection.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use voltra_core::{
    Direction, Offset, OrderData, OrderStatus, PositionData, TradeData, VtOrderId, VtSymbol,
};
use voltra_events::DomainEvent;

/// Strategy-view position, tagged with the signal that opened it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Position {
    pub vt_symbol: VtSymbol,
    pub underlying_vt_symbol: VtSymbol,
    /// Opaque signal string recorded at open time.
    pub signal: String,
    /// Filled volume currently held.
    pub volume: i64,
    /// Volume the opening orders were dispatched for.
    pub target_volume: i64,
    pub direction: Direction,
    pub open_price: f64,
    pub create_time: DateTime<Local>,
    pub open_time: Option<DateTime<Local>>,
    pub close_time: Option<DateTime<Local>>,
    pub is_closed: bool,
    pub is_manually_closed: bool,
}

impl Position {
    #[must_use]
    pub fn new(
        vt_symbol: impl Into<VtSymbol>,
        underlying_vt_symbol: impl Into<VtSymbol>,
        signal: impl Into<String>,
        target_volume: i64,
        direction: Direction,
        create_time: DateTime<Local>,
    ) -> Self {
        Self {
            vt_symbol: vt_symbol.into(),
            underlying_vt_symbol: underlying_vt_symbol.into(),
            signal: signal.into(),
            volume: 0,
            target_volume,
            direction,
            open_price: 0.0,
            create_time,
            open_time: None,
            close_time: None,
            is_closed: false,
            is_manually_closed: false,
        }
    }

    /// Record an opening fill, averaging the open price.
    pub fn add_fill(&mut self, volume: i64, price: f64, fill_time: DateTime<Local>) {
        if volume <= 0 {
            return;
        }
        if self.volume == 0 {
            self.open_price = price;
            self.open_time = Some(fill_time);
            self.volume = volume;
        } else {
            let total_value = self.open_price * self.volume as f64 + price * volume as f64;
            self.volume += volume;
            self.open_price = total_value / self.volume as f64;
        }
    }

    /// Record a closing fill; the position closes when volume reaches zero.
    pub fn reduce_volume(&mut self, volume: i64, close_time: DateTime<Local>) {
        self.volume = (self.volume - volume).max(0);
        if self.volume == 0 {
            self.is_closed = true;
            self.close_time = Some(close_time);
        }
    }

    pub fn mark_manually_closed(&mut self, volume: i64, close_time: DateTime<Local>) {
        self.is_manually_closed = true;
        self.reduce_volume(volume, close_time);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.volume > 0 && !self.is_closed
    }

    #[must_use]
    pub fn is_fully_filled(&self) -> bool {
        self.volume >= self.target_volume
    }

    #[must_use]
    pub fn pending_volume(&self) -> i64 {
        (self.target_volume - self.volume).max(0)
    }

    /// Seconds between first fill and close (or `until` while open).
    #[must_use]
    pub fn holding_seconds(&self, until: DateTime<Local>) -> Option<f64> {
        let open_time = self.open_time?;
        let end = self.close_time.unwrap_or(until);
        Some((end - open_time).num_milliseconds() as f64 / 1000.0)
    }
}

/// Order tracked through its broker lifecycle.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TrackedOrder {
    pub vt_orderid: VtOrderId,
    pub vt_symbol: VtSymbol,
    pub direction: Direction,
    pub offset: Offset,
    pub volume: i64,
    pub traded: i64,
    pub status: OrderStatus,
    pub price: f64,
    pub signal: String,
    pub create_time: DateTime<Local>,
    pub update_time: Option<DateTime<Local>>,
}

impl TrackedOrder {
    #[must_use]
    pub fn submitted(
        vt_orderid: impl Into<VtOrderId>,
        instruction: &voltra_core::OrderInstruction,
        create_time: DateTime<Local>,
    ) -> Self {
        Self {
            vt_orderid: vt_orderid.into(),
            vt_symbol: instruction.vt_symbol.clone(),
            direction: instruction.direction,
            offset: instruction.offset,
            volume: instruction.volume,
            traded: 0,
            status: OrderStatus::Submitting,
            price: instruction.price,
            signal: instruction.signal.clone(),
            create_time,
            update_time: None,
        }
    }

    /// Apply a broker status update. Terminal states are immutable and
    /// `traded` never exceeds `volume` or moves backwards.
    pub fn apply_update(&mut self, status: OrderStatus, traded: i64, at: DateTime<Local>) {
        if self.status.is_finished() {
            return;
        }
        self.status = status;
        self.traded = traded.clamp(self.traded, self.volume);
        self.update_time = Some(at);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    #[must_use]
    pub fn is_open_order(&self) -> bool {
        self.offset.is_open()
    }

    #[must_use]
    pub fn remaining_volume(&self) -> i64 {
        (self.volume - self.traded).max(0)
    }
}

/// Daily open-volume caps enforced by the aggregate.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DailyLimits {
    pub global_daily_limit: i64,
    pub contract_daily_limit: i64,
    /// Whether manually opened volume counts against the caps.
    pub count_manual_opens_in_caps: bool,
}

impl Default for DailyLimits {
    fn default() -> Self {
        Self {
            global_daily_limit: 50,
            contract_daily_limit: 2,
            count_manual_opens_in_caps: false,
        }
    }
}

/// Serializable state of the position book.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PositionSnapshot {
    pub positions: HashMap<VtSymbol, Position>,
    pub pending_orders: HashMap<VtOrderId, TrackedOrder>,
    pub managed_symbols: HashSet<VtSymbol>,
    pub daily_open_count_map: HashMap<VtSymbol, i64>,
    pub global_daily_open_count: i64,
    pub last_trading_date: Option<NaiveDate>,
}

/// Read-write aggregate root for everything the strategy holds or has in
/// flight. Every mutation is synchronous; detected anomalies are queued as
/// domain events and drained by the engine.
#[derive(Debug)]
pub struct PositionAggregate {
    positions: HashMap<VtSymbol, Position>,
    pending_orders: HashMap<VtOrderId, TrackedOrder>,
    managed_symbols: HashSet<VtSymbol>,
    domain_events: Vec<DomainEvent>,
    daily_open_count_map: HashMap<VtSymbol, i64>,
    global_daily_open_count: i64,
    last_trading_date: Option<NaiveDate>,
    limits: DailyLimits,
}

impl PositionAggregate {
    #[must_use]
    pub fn new(limits: DailyLimits) -> Self {
        Self {
            positions: HashMap::new(),
            pending_orders: HashMap::new(),
            managed_symbols: HashSet::new(),
            domain_events: Vec::new(),
            daily_open_count_map: HashMap::new(),
            global_daily_open_count: 0,
            last_trading_date: None,
            limits,
        }
    }

    // ---- position management ----

    pub fn create_position(
        &mut self,
        vt_symbol: impl Into<VtSymbol>,
        underlying_vt_symbol: impl Into<VtSymbol>,
        signal: impl Into<String>,
        target_volume: i64,
        direction: Direction,
        now: DateTime<Local>,
    ) -> &Position {
        let vt_symbol: VtSymbol = vt_symbol.into();
        let position = Position::new(
            vt_symbol.clone(),
            underlying_vt_symbol,
            signal,
            target_volume,
            direction,
            now,
        );
        self.managed_symbols.insert(vt_symbol.clone());
        self.positions.entry(vt_symbol).or_insert(position)
    }

    #[must_use]
    pub fn get_position(&self, vt_symbol: &str) -> Option<&Position> {
        self.positions.get(vt_symbol)
    }

    /// Active positions opened against one underlying future.
    #[must_use]
    pub fn positions_by_underlying(&self, underlying_vt_symbol: &str) -> Vec<Position> {
        self.positions
            .values()
            .filter(|p| p.underlying_vt_symbol == underlying_vt_symbol && p.is_active())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn active_positions(&self) -> Vec<Position> {
        self.positions
            .values()
            .filter(|p| p.is_active())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn all_positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    // ---- order management ----

    pub fn record_order_submitted(&mut self, order: TrackedOrder) {
        self.pending_orders.insert(order.vt_orderid.clone(), order);
    }

    #[must_use]
    pub fn pending_order(&self, vt_orderid: &str) -> Option<&TrackedOrder> {
        self.pending_orders.get(vt_orderid)
    }

    #[must_use]
    pub fn all_pending_orders(&self) -> Vec<TrackedOrder> {
        self.pending_orders.values().cloned().collect()
    }

    /// Is there a live closing order for this position's symbol?
    #[must_use]
    pub fn has_pending_close(&self, position: &Position) -> bool {
        self.pending_orders.values().any(|order| {
            order.vt_symbol == position.vt_symbol && !order.is_open_order() && order.is_active()
        })
    }

    /// Unfilled closing volume in flight for one symbol.
    #[must_use]
    pub fn pending_close_volume(&self, vt_symbol: &str) -> i64 {
        self.pending_orders
            .values()
            .filter(|o| o.vt_symbol == vt_symbol && !o.is_open_order() && o.is_active())
            .map(TrackedOrder::remaining_volume)
            .sum()
    }

    /// Open volume reserved by working open orders; per symbol when given,
    /// otherwise across the book.
    #[must_use]
    pub fn pending_open_volume(&self, vt_symbol: Option<&str>) -> i64 {
        self.pending_orders
            .values()
            .filter(|o| o.is_open_order() && o.is_active())
            .filter(|o| vt_symbol.map_or(true, |s| o.vt_symbol == s))
            .map(TrackedOrder::remaining_volume)
            .sum()
    }

    /// Apply a broker order event; finished orders leave the pending map.
    pub fn apply_order_update(&mut self, order: &OrderData) {
        let Some(tracked) = self.pending_orders.get_mut(&order.vt_orderid) else {
            return;
        };
        let old_status = tracked.status;
        tracked.apply_update(order.status, order.traded, order.datetime);
        if old_status != tracked.status
            && matches!(order.status, OrderStatus::Cancelled | OrderStatus::Rejected)
        {
            self.domain_events.push(DomainEvent::OrderStatusChanged {
                vt_orderid: order.vt_orderid.clone(),
                vt_symbol: order.vt_symbol.clone(),
                old_status: format!("{old_status:?}"),
                new_status: format!("{:?}", order.status),
            });
        }
        if tracked.status.is_finished() {
            self.pending_orders.remove(&order.vt_orderid);
        }
    }

    /// Apply a fill to the owning position. Open fills consume daily cap
    /// budget; a fill that empties a position closes it and emits
    /// `PositionClosed`.
    pub fn apply_trade(&mut self, trade: &TradeData) {
        if !self.managed_symbols.contains(&trade.vt_symbol) {
            return;
        }
        let Some(position) = self.positions.get_mut(&trade.vt_symbol) else {
            return;
        };

        if trade.offset.is_open() {
            position.add_fill(trade.volume, trade.price, trade.datetime);
            self.record_open_usage(&trade.vt_symbol, trade.volume);
        } else {
            position.reduce_volume(trade.volume, trade.datetime);
            if position.is_closed {
                let event = DomainEvent::PositionClosed {
                    vt_symbol: position.vt_symbol.clone(),
                    signal: position.signal.clone(),
                    holding_seconds: position.holding_seconds(trade.datetime).unwrap_or(0.0),
                };
                self.domain_events.push(event);
            }
        }
    }

    /// Compare a broker position report with the strategy's book and emit
    /// manual-intervention events for unexplained differences.
    pub fn reconcile_external_position(&mut self, report: &PositionData, now: DateTime<Local>) {
        if !self.managed_symbols.contains(&report.vt_symbol) {
            return;
        }
        let Some(position) = self.positions.get_mut(&report.vt_symbol) else {
            return;
        };
        if report.direction != position.direction {
            return;
        }

        if report.volume < position.volume {
            let manual_volume = position.volume - report.volume;
            position.mark_manually_closed(manual_volume, now);
            tracing::warn!(
                vt_symbol = %report.vt_symbol,
                volume = manual_volume,
                "manual close detected"
            );
            self.domain_events.push(DomainEvent::ManualCloseDetected {
                vt_symbol: report.vt_symbol.clone(),
                volume: manual_volume,
                timestamp: now,
            });
        } else if report.volume > position.volume {
            let manual_volume = report.volume - position.volume;
            tracing::warn!(
                vt_symbol = %report.vt_symbol,
                volume = manual_volume,
                "manual open detected"
            );
            // The strategy never manages volume it did not open; the book is
            // left untouched and the desk is notified instead.
            if self.limits.count_manual_opens_in_caps {
                self.record_open_usage(&report.vt_symbol, manual_volume);
            }
            self.domain_events.push(DomainEvent::ManualOpenDetected {
                vt_symbol: report.vt_symbol.clone(),
                volume: manual_volume,
                timestamp: now,
            });
        }
    }

    // ---- daily caps ----

    /// Reset daily counters when the trading date rolls over.
    pub fn on_new_trading_day(&mut self, date: NaiveDate) {
        if self.last_trading_date != Some(date) {
            self.daily_open_count_map.clear();
            self.global_daily_open_count = 0;
            self.last_trading_date = Some(date);
        }
    }

    /// Record filled open volume against the caps, emitting
    /// `RiskLimitExceeded` when a cap is reached.
    pub fn record_open_usage(&mut self, vt_symbol: &str, volume: i64) {
        self.global_daily_open_count += volume;
        let contract_count = self
            .daily_open_count_map
            .entry(vt_symbol.to_string())
            .or_insert(0);
        *contract_count += volume;
        let contract_count = *contract_count;

        if self.global_daily_open_count >= self.limits.global_daily_limit {
            self.domain_events.push(DomainEvent::RiskLimitExceeded {
                vt_symbol: "GLOBAL".into(),
                limit_type: "global".into(),
                current_volume: self.global_daily_open_count,
                limit_volume: self.limits.global_daily_limit,
            });
        }
        if contract_count >= self.limits.contract_daily_limit {
            self.domain_events.push(DomainEvent::RiskLimitExceeded {
                vt_symbol: vt_symbol.to_string(),
                limit_type: "contract".into(),
                current_volume: contract_count,
                limit_volume: self.limits.contract_daily_limit,
            });
        }
    }

    /// Would `volume_wanted` more lots fit under both caps, counting volume
    /// reserved by working open orders?
    #[must_use]
    pub fn check_open_limit(&self, vt_symbol: &str, volume_wanted: i64) -> bool {
        let global_used = self.global_daily_open_count + self.pending_open_volume(None);
        if global_used + volume_wanted > self.limits.global_daily_limit {
            return false;
        }
        let contract_used = self.daily_open_volume(vt_symbol) + self.pending_open_volume(Some(vt_symbol));
        contract_used + volume_wanted <= self.limits.contract_daily_limit
    }

    #[must_use]
    pub fn daily_open_volume(&self, vt_symbol: &str) -> i64 {
        self.daily_open_count_map.get(vt_symbol).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn global_daily_open_volume(&self) -> i64 {
        self.global_daily_open_count
    }

    #[must_use]
    pub fn limits(&self) -> &DailyLimits {
        &self.limits
    }

    // ---- domain events ----

    pub fn pop_domain_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.domain_events)
    }

    #[must_use]
    pub fn has_pending_events(&self) -> bool {
        !self.domain_events.is_empty()
    }

    // ---- misc ----

    #[must_use]
    pub fn is_managed(&self, vt_symbol: &str) -> bool {
        self.managed_symbols.contains(vt_symbol)
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.pending_orders.clear();
        self.managed_symbols.clear();
        self.domain_events.clear();
    }

    #[must_use]
    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            positions: self.positions.clone(),
            pending_orders: self.pending_orders.clone(),
            managed_symbols: self.managed_symbols.clone(),
            daily_open_count_map: self.daily_open_count_map.clone(),
            global_daily_open_count: self.global_daily_open_count,
            last_trading_date: self.last_trading_date,
        }
    }

    #[must_use]
    pub fn from_snapshot(snapshot: PositionSnapshot, limits: DailyLimits) -> Self {
        Self {
            positions: snapshot.positions,
            pending_orders: snapshot.pending_orders,
            managed_symbols: snapshot.managed_symbols,
            domain_events: Vec::new(),
            daily_open_count_map: snapshot.daily_open_count_map,
            global_daily_open_count: snapshot.global_daily_open_count,
            last_trading_date: snapshot.last_trading_date,
            limits,
        }
    }
}
