//! Time-weighted split: equal slices with the remainder spread over the
//! first ones, dispatched evenly across the window.

/// `num_slices` volumes differing by at most one lot, summing to `total`.
#[must_use]
pub fn split_even(total: i64, num_slices: usize) -> Vec<i64> {
    let n = num_slices as i64;
    let base = total / n;
    let remainder = total % n;
    (0..n)
        .map(|i| base + i64::from(i < remainder))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_hundred_by_five_is_flat() {
        assert_eq!(split_even(300, 5), vec![60, 60, 60, 60, 60]);
    }

    #[test]
    fn remainder_goes_to_the_front() {
        assert_eq!(split_even(7, 3), vec![3, 2, 2]);
    }

    #[test]
    fn slice_spread_never_exceeds_one() {
        for total in 1..500_i64 {
            for slices in 1..20_usize {
                let volumes = split_even(total, slices);
                assert_eq!(volumes.iter().sum::<i64>(), total);
                let max = volumes.iter().max().unwrap();
                let min = volumes.iter().min().unwrap();
                assert!(max - min <= 1);
            }
        }
    }
}
