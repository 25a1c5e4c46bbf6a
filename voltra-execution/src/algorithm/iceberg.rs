//! Batched iceberg split: equal batches, last child takes the remainder.

/// Split `total` into `min(batch_size, remaining)` sized children.
#[must_use]
pub fn split_batches(total: i64, batch_size: i64) -> Vec<i64> {
    let mut volumes = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        let volume = batch_size.min(remaining);
        volumes.push(volume);
        remaining -= volume;
    }
    volumes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hundred_by_thirty_gives_the_canonical_split() {
        assert_eq!(split_batches(100, 30), vec![30, 30, 30, 10]);
    }

    #[test]
    fn exact_division_has_no_runt() {
        assert_eq!(split_batches(90, 30), vec![30, 30, 30]);
    }

    #[test]
    fn batch_larger_than_total_is_one_child() {
        assert_eq!(split_batches(10, 30), vec![10]);
    }

    #[test]
    fn sum_is_always_total() {
        for total in 1..200 {
            for batch in 1..40 {
                assert_eq!(split_batches(total, batch).iter().sum::<i64>(), total);
            }
        }
    }
}
