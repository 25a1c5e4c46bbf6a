//! Fundamental domain types shared across the entire workspace.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

mod identifiers;
pub use identifiers::{expiry_from_symbol, product_of_symbol, split_vt_symbol};

/// Alias for VnPy-style qualified contract codes (e.g., `rb2505.SHFE`).
pub type VtSymbol = String;
/// Alias for product codes (e.g., `rb`, `SA`).
pub type Product = String;
/// Unique identifier assigned to broker orders.
pub type VtOrderId = String;

/// Exchanges covered by the engine.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Hash, Serialize)]
pub enum Exchange {
    /// Shanghai Futures Exchange.
    Shfe,
    /// Dalian Commodity Exchange.
    Dce,
    /// Zhengzhou Commodity Exchange.
    Czce,
    /// China Financial Futures Exchange.
    Cffex,
    /// Shanghai International Energy Exchange.
    Ine,
    /// Guangzhou Futures Exchange.
    Gfex,
}

impl Exchange {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shfe => "SHFE",
            Self::Dce => "DCE",
            Self::Czce => "CZCE",
            Self::Cffex => "CFFEX",
            Self::Ine => "INE",
            Self::Gfex => "GFEX",
        }
    }

    /// Parse the exchange suffix of a qualified symbol.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SHFE" => Some(Self::Shfe),
            "DCE" => Some(Self::Dce),
            "CZCE" => Some(Self::Czce),
            "CFFEX" => Some(Self::Cffex),
            "INE" => Some(Self::Ine),
            "GFEX" => Some(Self::Gfex),
            _ => None,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The side of an order or position.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Returns the opposite side (long <-> short).
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Signed unit used when weighting exposures.
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

/// Open/close flag carried on every order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Offset {
    Open,
    Close,
    CloseToday,
    CloseYesterday,
}

impl Offset {
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    #[must_use]
    pub fn is_close(self) -> bool {
        !self.is_open()
    }
}

/// Order execution style supported by the broker session.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    Fak,
    Fok,
}

/// Broker-reported order lifecycle states.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Submitting,
    NotTraded,
    PartTraded,
    AllTraded,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// The order may still trade.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Submitting | Self::NotTraded | Self::PartTraded)
    }

    /// Terminal state: no further transitions are allowed.
    #[must_use]
    pub fn is_finished(self) -> bool {
        !self.is_active()
    }
}

/// Call/put flag on option contracts.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Call,
    Put,
}

/// Bar granularity used when requesting history.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Minute,
    Hour,
    Daily,
}

/// Aggregated OHLCV bar.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BarData {
    pub vt_symbol: VtSymbol,
    pub datetime: DateTime<Local>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl BarData {
    /// Fold another bar of the same symbol into this one (window aggregation).
    pub fn merge(&mut self, other: &BarData) {
        self.high = self.high.max(other.high);
        self.low = self.low.min(other.low);
        self.close = other.close;
        self.volume += other.volume;
    }
}

/// Top-of-book tick snapshot.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TickData {
    pub vt_symbol: VtSymbol,
    pub datetime: DateTime<Local>,
    pub last_price: f64,
    /// Cumulative day volume.
    pub volume: f64,
    pub bid_price_1: f64,
    pub bid_volume_1: f64,
    pub ask_price_1: f64,
    pub ask_volume_1: f64,
}

impl TickData {
    /// Bid/ask spread measured in price ticks; `None` when the tick size is invalid.
    #[must_use]
    pub fn spread_ticks(&self, pricetick: f64) -> Option<f64> {
        if pricetick <= 0.0 {
            return None;
        }
        Some((self.ask_price_1 - self.bid_price_1) / pricetick)
    }
}

/// Option-specific contract metadata.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OptionMeta {
    pub strike_price: f64,
    pub expiry: NaiveDate,
    pub underlying_vt_symbol: VtSymbol,
    pub option_type: OptionType,
}

/// Immutable metadata describing a tradable contract.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ContractData {
    pub vt_symbol: VtSymbol,
    pub symbol: String,
    pub exchange: Exchange,
    pub product: Product,
    pub name: String,
    /// Contract multiplier.
    pub size: f64,
    pub pricetick: f64,
    /// Present for option contracts only.
    pub option: Option<OptionMeta>,
}

impl ContractData {
    #[must_use]
    pub fn is_option(&self) -> bool {
        self.option.is_some()
    }
}

/// The unit of trading intent produced by sizing and hedging services.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderInstruction {
    pub vt_symbol: VtSymbol,
    pub direction: Direction,
    pub offset: Offset,
    pub volume: i64,
    pub price: f64,
    /// Opaque signal tag that produced this instruction.
    pub signal: String,
    pub order_type: OrderType,
}

impl OrderInstruction {
    /// Limit-order instruction with the conventional defaults.
    #[must_use]
    pub fn limit(
        vt_symbol: impl Into<VtSymbol>,
        direction: Direction,
        offset: Offset,
        volume: i64,
        price: f64,
        signal: impl Into<String>,
    ) -> Self {
        Self {
            vt_symbol: vt_symbol.into(),
            direction,
            offset,
            volume,
            price,
            signal: signal.into(),
            order_type: OrderType::Limit,
        }
    }
}

/// Broker order event payload.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderData {
    pub vt_orderid: VtOrderId,
    pub vt_symbol: VtSymbol,
    pub direction: Direction,
    pub offset: Offset,
    pub volume: i64,
    pub traded: i64,
    pub status: OrderStatus,
    pub price: f64,
    pub datetime: DateTime<Local>,
}

/// Broker trade (fill) event payload.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TradeData {
    pub vt_tradeid: String,
    pub vt_orderid: VtOrderId,
    pub vt_symbol: VtSymbol,
    pub direction: Direction,
    pub offset: Offset,
    pub volume: i64,
    pub price: f64,
    pub datetime: DateTime<Local>,
}

/// Broker position event payload.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PositionData {
    pub vt_symbol: VtSymbol,
    pub direction: Direction,
    pub volume: i64,
    pub frozen: i64,
    pub price: f64,
}

/// Broker account event payload.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AccountData {
    pub accountid: String,
    pub balance: f64,
    pub frozen: f64,
}

impl AccountData {
    /// Margin not locked by open positions or working orders.
    #[must_use]
    pub fn available(&self) -> f64 {
        (self.balance - self.frozen).max(0.0)
    }
}

/// Two-sided quote request forwarded to the broker.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct QuoteRequest {
    pub vt_symbol: VtSymbol,
    pub bid_price: f64,
    pub bid_volume: i64,
    pub ask_price: f64,
    pub ask_volume: i64,
}

/// Values stored in the open per-instrument indicator dictionary.
///
/// Strategy code decides what lives under each name; the engine only moves
/// the map around, so the variants cover the handful of shapes indicator
/// services actually produce.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Flag(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl IndicatorValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for IndicatorValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for IndicatorValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for IndicatorValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<&str> for IndicatorValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Open mapping from indicator name to its latest value.
pub type IndicatorMap = HashMap<String, IndicatorValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_inverse_round_trips() {
        assert_eq!(Direction::Long.inverse(), Direction::Short);
        assert_eq!(Direction::Short.inverse().inverse(), Direction::Short);
    }

    #[test]
    fn order_status_partitions_active_and_finished() {
        for status in [
            OrderStatus::Submitting,
            OrderStatus::NotTraded,
            OrderStatus::PartTraded,
        ] {
            assert!(status.is_active());
            assert!(!status.is_finished());
        }
        for status in [
            OrderStatus::AllTraded,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
        ] {
            assert!(status.is_finished());
        }
    }

    #[test]
    fn bar_merge_accumulates_window() {
        let mut first = BarData {
            vt_symbol: "rb2505.SHFE".into(),
            datetime: Local::now(),
            open: 4000.0,
            high: 4010.0,
            low: 3995.0,
            close: 4005.0,
            volume: 120.0,
        };
        let second = BarData {
            high: 4020.0,
            low: 3990.0,
            close: 4018.0,
            volume: 80.0,
            ..first.clone()
        };
        first.merge(&second);
        assert_eq!(first.open, 4000.0);
        assert_eq!(first.high, 4020.0);
        assert_eq!(first.low, 3990.0);
        assert_eq!(first.close, 4018.0);
        assert_eq!(first.volume, 200.0);
    }

    #[test]
    fn tick_spread_in_ticks() {
        let tick = TickData {
            vt_symbol: "rb2505.SHFE".into(),
            datetime: Local::now(),
            last_price: 4001.0,
            volume: 5000.0,
            bid_price_1: 4000.0,
            bid_volume_1: 30.0,
            ask_price_1: 4002.0,
            ask_volume_1: 25.0,
        };
        assert_eq!(tick.spread_ticks(1.0), Some(2.0));
        assert_eq!(tick.spread_ticks(0.0), None);
    }

    #[test]
    fn indicator_value_accessors() {
        assert_eq!(IndicatorValue::from(1.5).as_f64(), Some(1.5));
        assert_eq!(IndicatorValue::from(7i64).as_f64(), Some(7.0));
        assert_eq!(IndicatorValue::from(true).as_bool(), Some(true));
        assert_eq!(IndicatorValue::from("up").as_str(), Some("up"));
        assert_eq!(IndicatorValue::from("up").as_f64(), None);
    }
}
