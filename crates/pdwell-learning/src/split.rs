//! Stratified hold-out split and stratified k-fold cross-validation.
//!
//! Both are deterministic for a given seed and input order. Indices refer to
//! the rows of the slice of labels that was passed in.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{PdwellError, Result};

/// Indices of each class, in input order.
fn class_indices(labels: &[u8]) -> [Vec<usize>; 2] {
    let mut classes: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    for (i, &label) in labels.iter().enumerate() {
        classes[usize::from(label.min(1))].push(i);
    }
    classes
}

/// Minimum per-class count that supports a hold-out split of `test_size`
/// followed by `folds`-fold cross-validation on the remainder.
pub fn required_per_class(test_size: f64, folds: usize) -> usize {
    let for_folds = (folds as f64 / (1.0 - test_size)).ceil() as usize;
    for_folds.max(folds + 1)
}

/// Reject datasets that cannot be split: a single class, or a class too small
/// for the hold-out split plus k-fold cross-validation.
pub fn check_class_counts(counts: [usize; 2], test_size: f64, folds: usize) -> Result<()> {
    match counts {
        [0, 0] => {
            return Err(PdwellError::InvalidData("dataset is empty".to_string()));
        }
        [0, _] => return Err(PdwellError::SingleClass { present: 1 }),
        [_, 0] => return Err(PdwellError::SingleClass { present: 0 }),
        _ => {}
    }

    let required = required_per_class(test_size, folds);
    for (class, &count) in counts.iter().enumerate() {
        if count < required {
            return Err(PdwellError::InsufficientSamples {
                class: class as u8,
                count,
                required,
                folds,
            });
        }
    }
    Ok(())
}

/// Stratified train/test split.
///
/// The test side receives `ceil(test_size * n)` rows, distributed across the
/// classes in proportion to their size (largest remainder first, ties to the
/// lower label). Both sides are returned in ascending row order.
pub fn stratified_train_test_split(
    labels: &[u8],
    test_size: f64,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let n = labels.len();
    let n_test = ((test_size * n as f64 - 1e-9).ceil() as usize).min(n);
    let mut classes = class_indices(labels);

    // Proportional allocation
    let exact: Vec<f64> = classes
        .iter()
        .map(|c| n_test as f64 * c.len() as f64 / n.max(1) as f64)
        .collect();
    let mut alloc: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let mut order = [0usize, 1];
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    let mut remaining = n_test - alloc.iter().sum::<usize>();
    for &class in order.iter().cycle().take(4) {
        if remaining == 0 {
            break;
        }
        if alloc[class] < classes[class].len() {
            alloc[class] += 1;
            remaining -= 1;
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (class, indices) in classes.iter_mut().enumerate() {
        indices.shuffle(&mut rng);
        let (test_part, train_part) = indices.split_at(alloc[class].min(indices.len()));
        test.extend_from_slice(test_part);
        train.extend_from_slice(train_part);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Stratified k-fold cross-validator.
///
/// Each class is optionally shuffled and then cut into `n_splits` contiguous
/// chunks; chunk sizes differ by at most one, with the larger chunks first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StratifiedKFold {
    n_splits: usize,
    shuffle: bool,
    seed: u64,
}

impl StratifiedKFold {
    /// `n_splits` folds in row order, without shuffling.
    ///
    /// The fold count is checked by [`split`](Self::split), which rejects
    /// fewer than two folds.
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: false,
            seed: 0,
        }
    }

    /// Shuffle each class with the given seed before chunking.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.shuffle = true;
        self
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Generate `(train, validation)` index pairs.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError::InsufficientSamples`] if a class has fewer rows
    /// than folds.
    pub fn split(&self, labels: &[u8]) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
        if self.n_splits < 2 {
            return Err(PdwellError::InvalidConfig(
                "cv_folds must be at least 2".to_string(),
            ));
        }

        let mut classes = class_indices(labels);
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); self.n_splits];

        let mut rng = StdRng::seed_from_u64(self.seed);
        for (class, indices) in classes.iter_mut().enumerate() {
            if indices.is_empty() {
                continue;
            }
            if indices.len() < self.n_splits {
                return Err(PdwellError::InsufficientSamples {
                    class: class as u8,
                    count: indices.len(),
                    required: self.n_splits,
                    folds: self.n_splits,
                });
            }
            if self.shuffle {
                indices.shuffle(&mut rng);
            }

            let fold_size = indices.len() / self.n_splits;
            let remainder = indices.len() % self.n_splits;
            let mut start = 0;
            for (i, fold) in folds.iter_mut().enumerate() {
                let size = if i < remainder { fold_size + 1 } else { fold_size };
                fold.extend_from_slice(&indices[start..start + size]);
                start += size;
            }
        }

        let splits = (0..self.n_splits)
            .map(|i| {
                let mut validation = folds[i].clone();
                validation.sort_unstable();
                let mut train: Vec<usize> = folds
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .flat_map(|(_, fold)| fold.iter().copied())
                    .collect();
                train.sort_unstable();
                (train, validation)
            })
            .collect();
        Ok(splits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n0: usize, n1: usize) -> Vec<u8> {
        let mut y = vec![0u8; n0];
        y.extend(vec![1u8; n1]);
        y
    }

    #[test]
    fn test_split_is_stratified_and_disjoint() {
        let y = labels(100, 100);
        let (train, test) = stratified_train_test_split(&y, 0.2, 42);
        assert_eq!(test.len(), 40);
        assert_eq!(train.len(), 160);
        assert_eq!(test.iter().filter(|&&i| y[i] == 1).count(), 20);
        assert!(train.iter().all(|i| !test.contains(i)));
    }

    #[test]
    fn test_split_unbalanced_allocation() {
        let y = labels(48, 147);
        let (train, test) = stratified_train_test_split(&y, 0.2, 42);
        assert_eq!(test.len(), 39);
        assert_eq!(train.len() + test.len(), 195);
        let positives = test.iter().filter(|&&i| y[i] == 1).count();
        assert!((29..=30).contains(&positives));
    }

    #[test]
    fn test_split_is_deterministic() {
        let y = labels(30, 40);
        assert_eq!(
            stratified_train_test_split(&y, 0.2, 7),
            stratified_train_test_split(&y, 0.2, 7)
        );
        assert_ne!(
            stratified_train_test_split(&y, 0.2, 7).1,
            stratified_train_test_split(&y, 0.2, 8).1
        );
    }

    #[test]
    fn test_kfold_covers_every_row_once() {
        let y = labels(23, 17);
        let splits = StratifiedKFold::new(5).with_seed(42).split(&y).unwrap();
        assert_eq!(splits.len(), 5);

        let mut seen: Vec<usize> = splits.iter().flat_map(|(_, v)| v.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());

        for (train, validation) in &splits {
            assert_eq!(train.len() + validation.len(), 40);
            let positives = validation.iter().filter(|&&i| y[i] == 1).count();
            assert!((3..=4).contains(&positives));
        }
    }

    #[test]
    fn test_kfold_too_few_per_class() {
        let y = labels(10, 3);
        let err = StratifiedKFold::new(5).split(&y).unwrap_err();
        assert!(matches!(
            err,
            PdwellError::InsufficientSamples { class: 1, count: 3, .. }
        ));
    }

    #[test]
    fn test_check_class_counts() {
        assert!(check_class_counts([100, 100], 0.2, 5).is_ok());
        assert!(matches!(
            check_class_counts([0, 50], 0.2, 5),
            Err(PdwellError::SingleClass { present: 1 })
        ));
        assert!(matches!(
            check_class_counts([50, 4], 0.2, 5),
            Err(PdwellError::InsufficientSamples { class: 1, .. })
        ));
        assert_eq!(required_per_class(0.2, 5), 7);
    }
}
