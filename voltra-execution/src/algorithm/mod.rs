//! Volume-split planners behind the advanced order scheduler.
//!
//! Each module turns a parent volume into per-child volumes (and, for the
//! timed family, a schedule). Planners are pure; the scheduler owns child
//! lifecycle and gating.

pub mod classic_iceberg;
pub mod iceberg;
pub mod timed_split;
pub mod twap;
pub mod vwap;

use chrono::{DateTime, Duration, Local};

/// Evenly spaced schedule: slice `i` fires at `start + round(i * window / n)`.
#[must_use]
pub fn even_schedule(
    start: DateTime<Local>,
    time_window_seconds: i64,
    num_slices: usize,
) -> Vec<DateTime<Local>> {
    let interval = time_window_seconds as f64 / num_slices as f64;
    (0..num_slices)
        .map(|i| start + Duration::seconds((interval * i as f64).round() as i64))
        .collect()
}

/// Fixed-interval schedule: slice `i` fires at `start + i * interval`.
#[must_use]
pub fn interval_schedule(
    start: DateTime<Local>,
    interval_seconds: i64,
    num_slices: usize,
) -> Vec<DateTime<Local>> {
    (0..num_slices)
        .map(|i| start + Duration::seconds(interval_seconds * i as i64))
        .collect()
}
