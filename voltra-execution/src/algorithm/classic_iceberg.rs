//! Classic iceberg split: per-child volume jitter and price offsets so the
//! child sequence does not advertise itself as an algorithm.

use rand::Rng;

/// Jittered volumes: child `i < n-1` draws from `[1-r, 1+r] * per_order`
/// (clamped so every later child keeps at least one lot), the final child
/// absorbs the exact remainder.
#[must_use]
pub fn split_jittered(
    total: i64,
    per_order_volume: i64,
    randomize_ratio: f64,
    rng: &mut impl Rng,
) -> Vec<i64> {
    let count = ((total + per_order_volume - 1) / per_order_volume) as usize;
    let mut volumes = Vec::with_capacity(count);
    let mut remaining = total;
    for index in 0..count {
        if index == count - 1 {
            volumes.push(remaining);
            break;
        }
        let slots_after = (count - 1 - index) as i64;
        let jitter = 1.0 + randomize_ratio * (rng.gen::<f64>() * 2.0 - 1.0);
        let raw = (per_order_volume as f64 * jitter).round() as i64;
        let volume = raw.clamp(1, remaining - slots_after);
        volumes.push(volume);
        remaining -= volume;
    }
    volumes
}

/// Per-child price offsets drawn uniformly from `[-k, +k]` ticks.
#[must_use]
pub fn price_offsets(
    count: usize,
    price_offset_ticks: i64,
    price_tick: f64,
    rng: &mut impl Rng,
) -> Vec<f64> {
    let bound = price_offset_ticks as f64 * price_tick;
    (0..count)
        .map(|_| (rng.gen::<f64>() * 2.0 - 1.0) * bound)
        .collect()
}
