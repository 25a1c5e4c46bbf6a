//! Adaptive pricing, tick rounding and the timeout/retry machine for
//! individual broker orders.
//!
//! The executor never talks to the gateway itself: it returns cancel lists
//! and re-priced instructions, the engine does the sending.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use voltra_core::{Direction, OrderInstruction, VtOrderId};
use voltra_events::DomainEvent;

/// Executor tuning knobs.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Ticks conceded through the touch when pricing a taker order.
    pub slippage_ticks: f64,
    pub timeout_seconds: f64,
    pub max_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_ticks: 2.0,
            timeout_seconds: 10.0,
            max_retries: 3,
        }
    }
}

/// One order under timeout management.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ManagedOrder {
    pub vt_orderid: VtOrderId,
    pub instruction: OrderInstruction,
    pub submit_time: DateTime<Local>,
    pub original_price: f64,
    pub retry_count: u32,
    pub is_active: bool,
    /// Set once the timeout sweep has asked for a cancel.
    pub timed_out: bool,
}

/// What to do after a timed-out order finished cancelling.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryOutcome {
    /// Re-submit with this re-priced instruction.
    Retry(OrderInstruction),
    /// Retries exhausted; the event has already been queued for the bus.
    Exhausted(DomainEvent),
    /// Order is not managed here (already removed or foreign).
    NotManaged,
}

/// Smart order executor: adaptive price, tick rounding, timeout + retry.
#[derive(Debug, Default)]
pub struct SmartOrderExecutor {
    config: ExecutionConfig,
    orders: HashMap<VtOrderId, ManagedOrder>,
}

impl SmartOrderExecutor {
    #[must_use]
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            orders: HashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Limit price biased toward the taker side by the slippage budget.
    ///
    /// Shorts hit the bid minus the budget, longs lift the ask plus it. An
    /// empty book falls back to the instruction price.
    #[must_use]
    pub fn adaptive_price(
        &self,
        instruction: &OrderInstruction,
        bid_price: f64,
        ask_price: f64,
        pricetick: f64,
    ) -> f64 {
        match instruction.direction {
            Direction::Short => {
                if bid_price <= 0.0 {
                    instruction.price
                } else {
                    bid_price - self.config.slippage_ticks * pricetick
                }
            }
            Direction::Long => {
                if ask_price <= 0.0 {
                    instruction.price
                } else {
                    ask_price + self.config.slippage_ticks * pricetick
                }
            }
        }
    }

    /// Round to the nearest valid price tick.
    #[must_use]
    pub fn round_to_tick(price: f64, pricetick: f64) -> f64 {
        if pricetick <= 0.0 {
            return price;
        }
        (price / pricetick).round() * pricetick
    }

    /// Tick rounding that never rounds away from the aggressive side:
    /// longs round up, shorts round down.
    #[must_use]
    pub fn round_aggressive(price: f64, pricetick: f64, direction: Direction) -> f64 {
        if pricetick <= 0.0 {
            return price;
        }
        match direction {
            Direction::Long => (price / pricetick).ceil() * pricetick,
            Direction::Short => (price / pricetick).floor() * pricetick,
        }
    }

    /// Put a freshly sent order under timeout management.
    pub fn register(
        &mut self,
        vt_orderid: impl Into<VtOrderId>,
        instruction: OrderInstruction,
        now: DateTime<Local>,
    ) -> &ManagedOrder {
        let vt_orderid = vt_orderid.into();
        let order = ManagedOrder {
            vt_orderid: vt_orderid.clone(),
            original_price: instruction.price,
            instruction,
            submit_time: now,
            retry_count: 0,
            is_active: true,
            timed_out: false,
        };
        self.orders.entry(vt_orderid).or_insert(order)
    }

    /// Sweep for orders past their deadline.
    ///
    /// Returns the order ids to cancel at the broker; an `OrderTimeout`
    /// event is produced per newly timed-out order.
    pub fn check_timeouts(&mut self, now: DateTime<Local>) -> (Vec<VtOrderId>, Vec<DomainEvent>) {
        let mut cancel_ids = Vec::new();
        let mut events = Vec::new();
        for order in self.orders.values_mut() {
            if !order.is_active || order.timed_out {
                continue;
            }
            let elapsed = (now - order.submit_time).num_milliseconds() as f64 / 1000.0;
            if elapsed >= self.config.timeout_seconds {
                order.timed_out = true;
                cancel_ids.push(order.vt_orderid.clone());
                events.push(DomainEvent::OrderTimeout {
                    vt_orderid: order.vt_orderid.clone(),
                    vt_symbol: order.instruction.vt_symbol.clone(),
                    elapsed_seconds: elapsed,
                });
            }
        }
        (cancel_ids, events)
    }

    pub fn mark_filled(&mut self, vt_orderid: &str) {
        self.orders.remove(vt_orderid);
    }

    /// A cancel ack arrived. The caller decides whether to follow up with
    /// [`Self::prepare_retry`]; plain cancels just drop the entry.
    pub fn mark_cancelled(&mut self, vt_orderid: &str) {
        if let Some(order) = self.orders.get_mut(vt_orderid) {
            order.is_active = false;
            if !order.timed_out {
                self.orders.remove(vt_orderid);
            }
        }
    }

    /// Build the next attempt for a timed-out, now-cancelled order.
    ///
    /// The re-priced instruction walks one more tick through the book.
    /// At the retry cap the entry is dropped and an `OrderRetryExhausted`
    /// event is returned instead.
    pub fn prepare_retry(&mut self, vt_orderid: &str, pricetick: f64) -> RetryOutcome {
        let Some(order) = self.orders.get_mut(vt_orderid) else {
            return RetryOutcome::NotManaged;
        };

        if order.retry_count >= self.config.max_retries {
            let event = DomainEvent::OrderRetryExhausted {
                vt_symbol: order.instruction.vt_symbol.clone(),
                total_retries: order.retry_count,
                original_price: order.original_price,
                final_price: order.instruction.price,
            };
            tracing::warn!(
                vt_orderid,
                retries = order.retry_count,
                "order retries exhausted"
            );
            self.orders.remove(vt_orderid);
            return RetryOutcome::Exhausted(event);
        }

        let old = &order.instruction;
        let raw_price = match old.direction {
            Direction::Short => old.price - pricetick,
            Direction::Long => old.price + pricetick,
        };
        let new_price = Self::round_to_tick(raw_price, pricetick);
        let retry = OrderInstruction {
            price: new_price,
            ..old.clone()
        };
        order.retry_count += 1;
        let retries_so_far = order.retry_count;
        self.orders.remove(vt_orderid);
        tracing::info!(
            vt_orderid,
            retry = retries_so_far,
            price = new_price,
            "re-pricing timed-out order"
        );
        RetryOutcome::Retry(retry)
    }

    /// Carry the retry budget of a previous attempt onto its replacement.
    pub fn register_retry(
        &mut self,
        vt_orderid: impl Into<VtOrderId>,
        instruction: OrderInstruction,
        previous_retries: u32,
        original_price: f64,
        now: DateTime<Local>,
    ) {
        let vt_orderid = vt_orderid.into();
        self.orders.insert(
            vt_orderid.clone(),
            ManagedOrder {
                vt_orderid,
                original_price,
                instruction,
                submit_time: now,
                retry_count: previous_retries,
                is_active: true,
                timed_out: false,
            },
        );
    }

    #[must_use]
    pub fn managed_order(&self, vt_orderid: &str) -> Option<&ManagedOrder> {
        self.orders.get(vt_orderid)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.orders.values().filter(|o| o.is_active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use voltra_core::Offset;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 1, 10, 10, 0, 0).unwrap()
    }

    fn short_open(price: f64) -> OrderInstruction {
        OrderInstruction::limit(
            "rb2505P3900.SHFE",
            Direction::Short,
            Offset::Open,
            1,
            price,
            "sell_put_macd_cross_up",
        )
    }

    #[test]
    fn adaptive_price_biases_toward_the_taker_side() {
        let executor = SmartOrderExecutor::new(ExecutionConfig {
            slippage_ticks: 2.0,
            ..ExecutionConfig::default()
        });
        let sell = short_open(100.0);
        assert_eq!(executor.adaptive_price(&sell, 99.0, 101.0, 1.0), 97.0);

        let mut buy = short_open(100.0);
        buy.direction = Direction::Long;
        assert_eq!(executor.adaptive_price(&buy, 99.0, 101.0, 1.0), 103.0);

        // No book: fall back to the instruction price.
        assert_eq!(executor.adaptive_price(&sell, 0.0, 0.0, 1.0), 100.0);
    }

    #[test]
    fn tick_rounding() {
        assert_eq!(SmartOrderExecutor::round_to_tick(100.3, 0.5), 100.5);
        assert_eq!(SmartOrderExecutor::round_to_tick(100.2, 0.5), 100.0);
        assert_eq!(SmartOrderExecutor::round_to_tick(100.3, 0.0), 100.3);
        assert_eq!(
            SmartOrderExecutor::round_aggressive(100.1, 0.5, Direction::Long),
            100.5
        );
        assert_eq!(
            SmartOrderExecutor::round_aggressive(100.9, 0.5, Direction::Short),
            100.5
        );
    }

    #[test]
    fn timeout_sweep_fires_once_per_order() {
        let mut executor = SmartOrderExecutor::new(ExecutionConfig {
            timeout_seconds: 10.0,
            ..ExecutionConfig::default()
        });
        executor.register("o1", short_open(100.0), now());

        let (early, _) = executor.check_timeouts(now() + Duration::seconds(5));
        assert!(early.is_empty());

        let (ids, events) = executor.check_timeouts(now() + Duration::seconds(11));
        assert_eq!(ids, vec!["o1".to_string()]);
        assert!(matches!(
            events.as_slice(),
            [DomainEvent::OrderTimeout { elapsed_seconds, .. }] if *elapsed_seconds >= 10.0
        ));

        // Already flagged: no duplicate cancel request.
        let (again, _) = executor.check_timeouts(now() + Duration::seconds(20));
        assert!(again.is_empty());
    }

    #[test]
    fn retry_walks_the_price_and_counts_down() {
        let mut executor = SmartOrderExecutor::new(ExecutionConfig {
            timeout_seconds: 1.0,
            max_retries: 2,
            ..ExecutionConfig::default()
        });
        executor.register("o1", short_open(100.0), now());
        executor.check_timeouts(now() + Duration::seconds(2));

        let RetryOutcome::Retry(first) = executor.prepare_retry("o1", 1.0) else {
            panic!("expected a retry");
        };
        assert_eq!(first.price, 99.0);
        executor.register_retry("o2", first, 1, 100.0, now());
        executor.check_timeouts(now() + Duration::seconds(2));

        let RetryOutcome::Retry(second) = executor.prepare_retry("o2", 1.0) else {
            panic!("expected a second retry");
        };
        assert_eq!(second.price, 98.0);
        executor.register_retry("o3", second, 2, 100.0, now());
        executor.check_timeouts(now() + Duration::seconds(2));

        let RetryOutcome::Exhausted(event) = executor.prepare_retry("o3", 1.0) else {
            panic!("expected exhaustion");
        };
        assert!(matches!(
            event,
            DomainEvent::OrderRetryExhausted {
                total_retries: 2,
                original_price,
                final_price,
                ..
            } if original_price == 100.0 && final_price == 98.0
        ));
        assert_eq!(executor.active_count(), 0);
    }

    #[test]
    fn fills_and_plain_cancels_drop_management() {
        let mut executor = SmartOrderExecutor::new(ExecutionConfig::default());
        executor.register("o1", short_open(100.0), now());
        executor.mark_filled("o1");
        assert_eq!(executor.prepare_retry("o1", 1.0), RetryOutcome::NotManaged);

        executor.register("o2", short_open(100.0), now());
        executor.mark_cancelled("o2");
        assert!(executor.managed_order("o2").is_none());
    }
}
