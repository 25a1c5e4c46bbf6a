//! Fixed-clip split dispatched on a fixed interval, independent of fills.

/// Children of `per_order_volume` lots, the last one smaller when needed.
#[must_use]
pub fn split_fixed(total: i64, per_order_volume: i64) -> Vec<i64> {
    let mut volumes = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        let volume = per_order_volume.min(remaining);
        volumes.push(volume);
        remaining -= volume;
    }
    volumes
}
