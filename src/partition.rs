use rand::seq::SliceRandom;
use rand::Rng;

/// Disjoint index sets over a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitions {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

/// Truncated `(train, val, test)` sizes for `n` samples. The rounding
/// remainder always lands in the test partition.
pub fn split_counts(n: usize, train_ratio: f64, val_ratio: f64) -> (usize, usize, usize) {
    let train = ((n as f64 * train_ratio).floor() as usize).min(n);
    let val = ((n as f64 * val_ratio).floor() as usize).min(n - train);
    (train, val, n - train - val)
}

/// Randomly split `0..n` into train, validation and test indices.
pub fn random_split(n: usize, train_ratio: f64, val_ratio: f64, rng: &mut impl Rng) -> Partitions {
    let (train_count, val_count, _) = split_counts(n, train_ratio, val_ratio);
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let test = order.split_off(train_count + val_count);
    let val = order.split_off(train_count);
    Partitions {
        train: order,
        val,
        test,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn hundred_samples_split_eighty_ten_ten() {
        assert_eq!(split_counts(100, 0.8, 0.1), (80, 10, 10));
    }

    #[test]
    fn remainder_goes_to_test() {
        assert_eq!(split_counts(7, 0.8, 0.1), (5, 0, 2));
        assert_eq!(split_counts(19, 0.8, 0.1), (15, 1, 3));
        assert_eq!(split_counts(0, 0.8, 0.1), (0, 0, 0));
    }

    #[test]
    fn counts_always_sum_to_n() {
        for n in 0..500 {
            let (a, b, c) = split_counts(n, 0.8, 0.1);
            assert_eq!(a + b + c, n);
        }
    }

    #[test]
    fn split_sizes_match_counts() {
        let mut rng = StdRng::seed_from_u64(3);
        let parts = random_split(37, 0.8, 0.1, &mut rng);
        assert_eq!(parts.train.len(), 29);
        assert_eq!(parts.val.len(), 3);
        assert_eq!(parts.test.len(), 5);
    }
}
