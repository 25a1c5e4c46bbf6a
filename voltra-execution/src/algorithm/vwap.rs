//! Volume-weighted split: apportion the parent volume across a normalized
//! intraday volume profile using the largest-remainder method.

/// Allocate `total` proportionally to `profile` weights.
///
/// Floors the raw allocations, then hands the leftover lots to the slices
/// with the largest fractional parts so the sum is exact.
#[must_use]
pub fn apportion(total: i64, profile: &[f64]) -> Vec<i64> {
    let total_weight: f64 = profile.iter().sum();
    let raw: Vec<f64> = profile
        .iter()
        .map(|w| total as f64 * w / total_weight)
        .collect();
    let mut volumes: Vec<i64> = raw.iter().map(|v| v.floor() as i64).collect();
    let assigned: i64 = volumes.iter().sum();
    let mut leftover = total - assigned;

    let mut fractions: Vec<(f64, usize)> = raw
        .iter()
        .enumerate()
        .map(|(i, v)| (v - v.floor(), i))
        .collect();
    fractions.sort_by(|a, b| b.0.partial_cmp(&a.0).expect("weights are finite"));

    for (_, index) in fractions {
        if leftover == 0 {
            break;
        }
        volumes[index] += 1;
        leftover -= 1;
    }
    volumes
}
