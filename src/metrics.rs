/// Per-class `(correct, total)` prediction counters for one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassAccuracy {
    correct: Vec<u64>,
    total: Vec<u64>,
}

impl ClassAccuracy {
    pub fn new(num_classes: usize) -> Self {
        Self {
            correct: vec![0; num_classes],
            total: vec![0; num_classes],
        }
    }

    /// Build counters from explicit `(correct, total)` pairs indexed by class.
    pub fn from_counts(counts: &[(u64, u64)]) -> Self {
        Self {
            correct: counts.iter().map(|c| c.0).collect(),
            total: counts.iter().map(|c| c.1).collect(),
        }
    }

    pub fn record(&mut self, label: usize, predicted: usize) {
        if label >= self.total.len() {
            self.correct.resize(label + 1, 0);
            self.total.resize(label + 1, 0);
        }
        self.total[label] += 1;
        if label == predicted {
            self.correct[label] += 1;
        }
    }

    pub fn samples(&self) -> u64 {
        self.total.iter().sum()
    }

    /// Accuracy in percent for each class that occurred at least once.
    pub fn per_class(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.correct
            .iter()
            .zip(&self.total)
            .enumerate()
            .filter(|(_, (_, &total))| total > 0)
            .map(|(class, (&correct, &total))| (class, 100.0 * correct as f64 / total as f64))
    }

    /// Mean of the per-class accuracies, in percent.
    ///
    /// Classes that never occurred are left out of the mean rather than
    /// counted as 0%. `None` when no sample was recorded at all.
    pub fn mean_per_class(&self) -> Option<f64> {
        let (sum, classes) = self
            .per_class()
            .fold((0.0, 0usize), |(sum, n), (_, acc)| (sum + acc, n + 1));
        (classes > 0).then(|| sum / classes as f64)
    }
}

/// Top-1 accuracy in percent; 0 for an empty partition.
pub fn accuracy_percent(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * correct as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_classes_are_excluded_from_the_mean() {
        let acc = ClassAccuracy::from_counts(&[(8, 10), (0, 0), (5, 5)]);
        assert_eq!(acc.mean_per_class(), Some(90.0));
    }

    #[test]
    fn a_seen_class_with_no_hits_counts_as_zero() {
        let acc = ClassAccuracy::from_counts(&[(8, 10), (0, 4), (5, 5)]);
        assert_eq!(acc.mean_per_class(), Some(60.0));
    }

    #[test]
    fn record_counts_hits_per_label() {
        let mut acc = ClassAccuracy::new(2);
        acc.record(0, 0);
        acc.record(0, 1);
        acc.record(1, 1);
        acc.record(3, 3);
        assert_eq!(acc.samples(), 4);
        let per_class: Vec<_> = acc.per_class().collect();
        assert_eq!(per_class, vec![(0, 50.0), (1, 100.0), (3, 100.0)]);
        assert_eq!(acc.mean_per_class(), Some(250.0 / 3.0));
    }

    #[test]
    fn empty_pass_has_no_mean() {
        assert_eq!(ClassAccuracy::new(4).mean_per_class(), None);
        assert_eq!(accuracy_percent(0, 0), 0.0);
        assert_eq!(accuracy_percent(3, 4), 75.0);
    }
}
