//! Advanced order scheduler: one parent order, many child orders spread
//! across time and volume, with per-algorithm gating.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use voltra_core::{OrderInstruction, VtOrderId};
use voltra_events::DomainEvent;

use crate::algorithm::{
    classic_iceberg, even_schedule, iceberg, interval_schedule, timed_split, twap, vwap,
};
use crate::ExecutionError;

/// The six supported split algorithms.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancedOrderType {
    Iceberg,
    ClassicIceberg,
    TimedSplit,
    Twap,
    EnhancedTwap,
    Vwap,
}

/// Parent order lifecycle.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancedOrderStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

/// Parameters the parent was submitted with (type-specific fields optional).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AdvancedOrderRequest {
    pub order_type: AdvancedOrderType,
    pub instruction: OrderInstruction,
    pub batch_size: Option<i64>,
    pub per_order_volume: Option<i64>,
    pub interval_seconds: Option<i64>,
    pub time_window_seconds: Option<i64>,
    pub num_slices: Option<usize>,
    pub volume_profile: Option<Vec<f64>>,
    pub volume_randomize_ratio: Option<f64>,
    pub price_offset_ticks: Option<i64>,
    pub price_tick: Option<f64>,
}

impl AdvancedOrderRequest {
    fn bare(order_type: AdvancedOrderType, instruction: OrderInstruction) -> Self {
        Self {
            order_type,
            instruction,
            batch_size: None,
            per_order_volume: None,
            interval_seconds: None,
            time_window_seconds: None,
            num_slices: None,
            volume_profile: None,
            volume_randomize_ratio: None,
            price_offset_ticks: None,
            price_tick: None,
        }
    }
}

/// One slice of a parent order.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChildOrder {
    pub child_id: String,
    pub parent_id: String,
    pub volume: i64,
    /// Absent for fill-gated (iceberg family) children.
    pub scheduled_time: Option<DateTime<Local>>,
    /// Price adjustment applied when the child is sent.
    pub price_offset: f64,
    /// Broker order id once submitted.
    pub vt_orderid: Option<VtOrderId>,
    pub is_submitted: bool,
    pub is_filled: bool,
    pub is_cancelled: bool,
}

impl ChildOrder {
    fn new(parent_id: &str, index: usize, volume: i64) -> Self {
        Self {
            child_id: format!("{parent_id}_child_{index}"),
            parent_id: parent_id.to_string(),
            volume,
            scheduled_time: None,
            price_offset: 0.0,
            vt_orderid: None,
            is_submitted: false,
            is_filled: false,
            is_cancelled: false,
        }
    }
}

/// A parent order and its children.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AdvancedOrder {
    pub order_id: String,
    pub request: AdvancedOrderRequest,
    pub status: AdvancedOrderStatus,
    pub filled_volume: i64,
    pub child_orders: Vec<ChildOrder>,
}

impl AdvancedOrder {
    #[must_use]
    pub fn total_volume(&self) -> i64 {
        self.request.instruction.volume
    }

    #[must_use]
    pub fn remaining_volume(&self) -> i64 {
        self.child_orders
            .iter()
            .filter(|c| !c.is_filled)
            .map(|c| c.volume)
            .sum()
    }

    fn is_fill_gated(&self) -> bool {
        matches!(
            self.request.order_type,
            AdvancedOrderType::Iceberg | AdvancedOrderType::ClassicIceberg
        )
    }
}

/// Child ids returned by a cancel, split by what the caller must do next.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CancelOutcome {
    /// Children never sent; marked cancelled in place.
    pub unscheduled_child_ids: Vec<String>,
    /// Broker order ids of submitted-but-unfilled children to cancel.
    pub broker_cancel_ids: Vec<VtOrderId>,
    pub events: Vec<DomainEvent>,
}

/// Serializable book of all advanced orders.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SchedulerSnapshot {
    pub orders: HashMap<String, AdvancedOrder>,
}

/// Owns every advanced order and its child lifecycle.
pub struct AdvancedOrderScheduler {
    orders: HashMap<String, AdvancedOrder>,
    rng: StdRng,
}

impl Default for AdvancedOrderScheduler {
    fn default() -> Self {
        Self {
            orders: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }
}

impl AdvancedOrderScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic jitter for tests.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            orders: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn validate_volume(instruction: &OrderInstruction) -> Result<(), ExecutionError> {
        if instruction.volume <= 0 {
            return Err(ExecutionError::InvalidParams(
                "total volume must be positive".into(),
            ));
        }
        Ok(())
    }

    fn insert(&mut self, order: AdvancedOrder) -> AdvancedOrder {
        self.orders.insert(order.order_id.clone(), order.clone());
        order
    }

    /// Batched iceberg: equal batches released one at a time as fills land.
    pub fn submit_iceberg(
        &mut self,
        instruction: OrderInstruction,
        batch_size: i64,
    ) -> Result<AdvancedOrder, ExecutionError> {
        Self::validate_volume(&instruction)?;
        if batch_size <= 0 {
            return Err(ExecutionError::InvalidParams(
                "batch size must be positive".into(),
            ));
        }

        let order_id = Uuid::new_v4().to_string();
        let child_orders: Vec<ChildOrder> = iceberg::split_batches(instruction.volume, batch_size)
            .into_iter()
            .enumerate()
            .map(|(i, volume)| ChildOrder::new(&order_id, i, volume))
            .collect();

        let mut request = AdvancedOrderRequest::bare(AdvancedOrderType::Iceberg, instruction);
        request.batch_size = Some(batch_size);
        tracing::info!(%order_id, children = child_orders.len(), "iceberg submitted");
        Ok(self.insert(AdvancedOrder {
            order_id,
            request,
            status: AdvancedOrderStatus::Active,
            filled_volume: 0,
            child_orders,
        }))
    }

    /// Classic iceberg: jittered clip sizes and per-child price offsets,
    /// strictly sequential release.
    pub fn submit_classic_iceberg(
        &mut self,
        instruction: OrderInstruction,
        per_order_volume: i64,
        volume_randomize_ratio: f64,
        price_offset_ticks: i64,
        price_tick: f64,
    ) -> Result<AdvancedOrder, ExecutionError> {
        Self::validate_volume(&instruction)?;
        if per_order_volume <= 0 {
            return Err(ExecutionError::InvalidParams(
                "per-order volume must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&volume_randomize_ratio) {
            return Err(ExecutionError::InvalidParams(
                "randomize ratio must lie in [0, 1]".into(),
            ));
        }
        if price_offset_ticks < 0 || price_tick < 0.0 {
            return Err(ExecutionError::InvalidParams(
                "price offset parameters must be non-negative".into(),
            ));
        }

        let order_id = Uuid::new_v4().to_string();
        let volumes = classic_iceberg::split_jittered(
            instruction.volume,
            per_order_volume,
            volume_randomize_ratio,
            &mut self.rng,
        );
        let offsets =
            classic_iceberg::price_offsets(volumes.len(), price_offset_ticks, price_tick, &mut self.rng);
        let child_orders: Vec<ChildOrder> = volumes
            .into_iter()
            .zip(offsets)
            .enumerate()
            .map(|(i, (volume, price_offset))| {
                let mut child = ChildOrder::new(&order_id, i, volume);
                child.price_offset = price_offset;
                child
            })
            .collect();

        let mut request =
            AdvancedOrderRequest::bare(AdvancedOrderType::ClassicIceberg, instruction);
        request.per_order_volume = Some(per_order_volume);
        request.volume_randomize_ratio = Some(volume_randomize_ratio);
        request.price_offset_ticks = Some(price_offset_ticks);
        request.price_tick = Some(price_tick);
        tracing::info!(
            order_id,
            children = child_orders.len(),
            "classic iceberg submitted"
        );
        Ok(self.insert(AdvancedOrder {
            order_id,
            request,
            status: AdvancedOrderStatus::Active,
            filled_volume: 0,
            child_orders,
        }))
    }

    /// Fixed clips on a fixed interval, independent of fills.
    pub fn submit_timed_split(
        &mut self,
        instruction: OrderInstruction,
        interval_seconds: i64,
        per_order_volume: i64,
        start_time: DateTime<Local>,
    ) -> Result<AdvancedOrder, ExecutionError> {
        Self::validate_volume(&instruction)?;
        if interval_seconds <= 0 {
            return Err(ExecutionError::InvalidParams(
                "interval must be positive".into(),
            ));
        }
        if per_order_volume <= 0 {
            return Err(ExecutionError::InvalidParams(
                "per-order volume must be positive".into(),
            ));
        }

        let order_id = Uuid::new_v4().to_string();
        let volumes = timed_split::split_fixed(instruction.volume, per_order_volume);
        let schedule = interval_schedule(start_time, interval_seconds, volumes.len());
        let child_orders = Self::scheduled_children(&order_id, &volumes, &schedule);

        let mut request = AdvancedOrderRequest::bare(AdvancedOrderType::TimedSplit, instruction);
        request.interval_seconds = Some(interval_seconds);
        request.per_order_volume = Some(per_order_volume);
        tracing::info!(%order_id, children = child_orders.len(), "timed split submitted");
        Ok(self.insert(AdvancedOrder {
            order_id,
            request,
            status: AdvancedOrderStatus::Active,
            filled_volume: 0,
            child_orders,
        }))
    }

    /// Equal slices spread evenly across the window.
    pub fn submit_twap(
        &mut self,
        instruction: OrderInstruction,
        time_window_seconds: i64,
        num_slices: usize,
        start_time: DateTime<Local>,
    ) -> Result<AdvancedOrder, ExecutionError> {
        self.submit_even_slices(
            instruction,
            time_window_seconds,
            num_slices,
            start_time,
            AdvancedOrderType::Twap,
        )
    }

    /// TWAP with explicitly parameterized window and slice count.
    pub fn submit_enhanced_twap(
        &mut self,
        instruction: OrderInstruction,
        time_window_seconds: i64,
        num_slices: usize,
        start_time: DateTime<Local>,
    ) -> Result<AdvancedOrder, ExecutionError> {
        self.submit_even_slices(
            instruction,
            time_window_seconds,
            num_slices,
            start_time,
            AdvancedOrderType::EnhancedTwap,
        )
    }

    fn submit_even_slices(
        &mut self,
        instruction: OrderInstruction,
        time_window_seconds: i64,
        num_slices: usize,
        start_time: DateTime<Local>,
        order_type: AdvancedOrderType,
    ) -> Result<AdvancedOrder, ExecutionError> {
        Self::validate_volume(&instruction)?;
        if time_window_seconds <= 0 {
            return Err(ExecutionError::InvalidParams(
                "time window must be positive".into(),
            ));
        }
        if num_slices == 0 {
            return Err(ExecutionError::InvalidParams(
                "slice count must be positive".into(),
            ));
        }

        let order_id = Uuid::new_v4().to_string();
        let volumes = twap::split_even(instruction.volume, num_slices);
        let schedule = even_schedule(start_time, time_window_seconds, num_slices);
        let child_orders = Self::scheduled_children(&order_id, &volumes, &schedule);

        let mut request = AdvancedOrderRequest::bare(order_type, instruction);
        request.time_window_seconds = Some(time_window_seconds);
        request.num_slices = Some(num_slices);
        tracing::info!(%order_id, ?order_type, slices = num_slices, "twap submitted");
        Ok(self.insert(AdvancedOrder {
            order_id,
            request,
            status: AdvancedOrderStatus::Active,
            filled_volume: 0,
            child_orders,
        }))
    }

    /// Slices proportional to a supplied volume profile.
    pub fn submit_vwap(
        &mut self,
        instruction: OrderInstruction,
        time_window_seconds: i64,
        volume_profile: Vec<f64>,
        start_time: DateTime<Local>,
    ) -> Result<AdvancedOrder, ExecutionError> {
        Self::validate_volume(&instruction)?;
        if time_window_seconds <= 0 {
            return Err(ExecutionError::InvalidParams(
                "time window must be positive".into(),
            ));
        }
        if volume_profile.is_empty() {
            return Err(ExecutionError::InvalidParams(
                "volume profile must not be empty".into(),
            ));
        }
        if volume_profile.iter().any(|w| *w <= 0.0) {
            return Err(ExecutionError::InvalidParams(
                "volume profile weights must be positive".into(),
            ));
        }

        let order_id = Uuid::new_v4().to_string();
        let volumes = vwap::apportion(instruction.volume, &volume_profile);
        let schedule = even_schedule(start_time, time_window_seconds, volume_profile.len());
        let child_orders = Self::scheduled_children(&order_id, &volumes, &schedule);

        let mut request = AdvancedOrderRequest::bare(AdvancedOrderType::Vwap, instruction);
        request.time_window_seconds = Some(time_window_seconds);
        request.volume_profile = Some(volume_profile);
        tracing::info!(%order_id, children = child_orders.len(), "vwap submitted");
        Ok(self.insert(AdvancedOrder {
            order_id,
            request,
            status: AdvancedOrderStatus::Active,
            filled_volume: 0,
            child_orders,
        }))
    }

    fn scheduled_children(
        order_id: &str,
        volumes: &[i64],
        schedule: &[DateTime<Local>],
    ) -> Vec<ChildOrder> {
        volumes
            .iter()
            .zip(schedule)
            .enumerate()
            .map(|(i, (volume, time))| {
                let mut child = ChildOrder::new(order_id, i, *volume);
                child.scheduled_time = Some(*time);
                child
            })
            .collect()
    }

    /// Children that should be sent now.
    ///
    /// Iceberg-family orders release the first unsubmitted child once all of
    /// its predecessors are filled (one open child at a time); scheduled
    /// orders release every due, unsubmitted child.
    #[must_use]
    pub fn get_pending_children(&self, now: DateTime<Local>) -> Vec<ChildOrder> {
        let mut pending = Vec::new();
        for order in self.orders.values() {
            if order.status != AdvancedOrderStatus::Active {
                continue;
            }
            if order.is_fill_gated() {
                for (index, child) in order.child_orders.iter().enumerate() {
                    if child.is_submitted || child.is_filled || child.is_cancelled {
                        continue;
                    }
                    if order.child_orders[..index].iter().all(|c| c.is_filled) {
                        pending.push(child.clone());
                    }
                    break;
                }
            } else {
                for child in &order.child_orders {
                    let due = child
                        .scheduled_time
                        .is_some_and(|scheduled| now >= scheduled);
                    if due && !child.is_submitted && !child.is_filled && !child.is_cancelled {
                        pending.push(child.clone());
                    }
                }
            }
        }
        pending
    }

    /// Record the broker order id once a child has been sent.
    pub fn mark_child_submitted(&mut self, child_id: &str, vt_orderid: impl Into<VtOrderId>) {
        if let Some(child) = self.find_child_mut(child_id) {
            child.is_submitted = true;
            child.vt_orderid = Some(vt_orderid.into());
        }
    }

    /// Fill callback; emits the per-type completion event when the parent
    /// finishes.
    pub fn on_child_filled(&mut self, child_id: &str) -> Vec<DomainEvent> {
        let Some(parent_id) = self.parent_of_child(child_id) else {
            return Vec::new();
        };
        let order = self.orders.get_mut(&parent_id).expect("parent exists");

        let Some(child) = order
            .child_orders
            .iter_mut()
            .find(|c| c.child_id == child_id)
        else {
            return Vec::new();
        };
        if child.is_filled {
            return Vec::new();
        }
        child.is_filled = true;
        let child_volume = child.volume;
        order.filled_volume += child_volume;

        if !order.child_orders.iter().all(|c| c.is_filled) {
            return Vec::new();
        }
        order.status = AdvancedOrderStatus::Completed;
        let vt_symbol = order.request.instruction.vt_symbol.clone();
        let total_volume = order.total_volume();
        let filled_volume = order.filled_volume;
        let order_id = order.order_id.clone();
        tracing::info!(%order_id, total_volume, "advanced order complete");

        let event = match order.request.order_type {
            AdvancedOrderType::Iceberg => DomainEvent::IcebergComplete {
                order_id,
                vt_symbol,
                total_volume,
                filled_volume,
            },
            AdvancedOrderType::ClassicIceberg => DomainEvent::ClassicIcebergComplete {
                order_id,
                vt_symbol,
                total_volume,
                filled_volume,
            },
            AdvancedOrderType::TimedSplit => DomainEvent::TimedSplitComplete {
                order_id,
                vt_symbol,
                total_volume,
                filled_volume,
            },
            AdvancedOrderType::Twap => DomainEvent::TwapComplete {
                order_id,
                vt_symbol,
                total_volume,
            },
            AdvancedOrderType::EnhancedTwap => DomainEvent::EnhancedTwapComplete {
                order_id,
                vt_symbol,
                total_volume,
            },
            AdvancedOrderType::Vwap => DomainEvent::VwapComplete {
                order_id,
                vt_symbol,
                total_volume,
            },
        };
        vec![event]
    }

    /// Route a broker fill to its child via the recorded order id.
    pub fn on_broker_fill(&mut self, vt_orderid: &str) -> Vec<DomainEvent> {
        let child_id = self.orders.values().find_map(|order| {
            order
                .child_orders
                .iter()
                .find(|c| c.vt_orderid.as_deref() == Some(vt_orderid))
                .map(|c| c.child_id.clone())
        });
        match child_id {
            Some(child_id) => self.on_child_filled(&child_id),
            None => Vec::new(),
        }
    }

    /// Cancel a parent order.
    ///
    /// Unsubmitted children are marked cancelled and their ids returned;
    /// submitted-but-unfilled children contribute their broker ids for the
    /// caller to cancel. Completed or already-cancelled parents are a no-op.
    pub fn cancel(&mut self, order_id: &str) -> CancelOutcome {
        let Some(order) = self.orders.get_mut(order_id) else {
            return CancelOutcome::default();
        };
        if matches!(
            order.status,
            AdvancedOrderStatus::Completed | AdvancedOrderStatus::Cancelled
        ) {
            return CancelOutcome::default();
        }

        order.status = AdvancedOrderStatus::Cancelled;
        let mut outcome = CancelOutcome::default();
        for child in &mut order.child_orders {
            if child.is_filled {
                continue;
            }
            if child.is_submitted {
                if let Some(vt_orderid) = &child.vt_orderid {
                    outcome.broker_cancel_ids.push(vt_orderid.clone());
                }
            } else {
                child.is_cancelled = true;
                outcome.unscheduled_child_ids.push(child.child_id.clone());
            }
        }

        let remaining = order.remaining_volume();
        let vt_symbol = order.request.instruction.vt_symbol.clone();
        tracing::info!(%order_id, remaining, "advanced order cancelled");
        match order.request.order_type {
            AdvancedOrderType::Iceberg => outcome.events.push(DomainEvent::IcebergCancelled {
                order_id: order.order_id.clone(),
                vt_symbol,
                filled_volume: order.filled_volume,
                remaining_volume: remaining,
            }),
            AdvancedOrderType::ClassicIceberg => {
                outcome.events.push(DomainEvent::ClassicIcebergCancelled {
                    order_id: order.order_id.clone(),
                    vt_symbol,
                    filled_volume: order.filled_volume,
                    remaining_volume: remaining,
                })
            }
            _ => {}
        }
        outcome
    }

    #[must_use]
    pub fn get_order(&self, order_id: &str) -> Option<&AdvancedOrder> {
        self.orders.get(order_id)
    }

    #[must_use]
    pub fn active_orders(&self) -> Vec<&AdvancedOrder> {
        self.orders
            .values()
            .filter(|o| o.status == AdvancedOrderStatus::Active)
            .collect()
    }

    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            orders: self.orders.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: SchedulerSnapshot) {
        self.orders = snapshot.orders;
    }

    fn parent_of_child(&self, child_id: &str) -> Option<String> {
        self.orders
            .values()
            .find(|order| order.child_orders.iter().any(|c| c.child_id == child_id))
            .map(|order| order.order_id.clone())
    }

    fn find_child_mut(&mut self, child_id: &str) -> Option<&mut ChildOrder> {
        self.orders
            .values_mut()
            .flat_map(|order| order.child_orders.iter_mut())
            .find(|c| c.child_id == child_id)
    }
}
