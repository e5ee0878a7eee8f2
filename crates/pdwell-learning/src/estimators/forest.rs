//! Random forest over the shared decision tree.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::tree::{ClassificationParams, fit_classification_tree};
use super::{
    Classifier, DecisionTree, LocalAttribution, check_training_input, check_width, normalize,
    not_fitted,
};
use crate::error::Result;
use crate::explain::ensemble_attribution;
use crate::types::OutputSpace;

/// Bagged gini trees with class-balanced sample weights.
///
/// Each tree sees a bootstrap sample and examines `sqrt(n_features)` features
/// per split. The class-1 probability is the mean of the tree leaf fractions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    n_estimators: usize,
    max_depth: usize,
    balanced: bool,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(100, 10)
    }
}

impl RandomForest {
    /// At least one tree; `max_depth` of 0 means a single leaf.
    pub fn new(n_estimators: usize, max_depth: usize) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            max_depth,
            balanced: true,
            n_features: 0,
            trees: Vec::new(),
        }
    }

    /// Toggle `n / (2 * n_class)` class weights (on by default).
    pub fn with_balanced_weights(mut self, balanced: bool) -> Self {
        self.balanced = balanced;
        self
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn tree_mean(&self, row: ArrayView1<f64>) -> f64 {
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }
}

/// `n / (2 * n_c)` per class, or 1 when unbalanced weighting is requested.
pub(crate) fn balanced_class_weights(y: &[u8]) -> [f64; 2] {
    let n = y.len() as f64;
    let positives = y.iter().filter(|&&l| l == 1).count() as f64;
    let negatives = n - positives;
    let weight = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 0.0 };
    [weight(negatives), weight(positives)]
}

impl Classifier for RandomForest {
    fn kind(&self) -> &'static str {
        "random_forest"
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: &[u8], seed: u64) -> Result<()> {
        check_training_input(&x, y)?;
        let n = x.nrows();
        let class_weight = if self.balanced {
            balanced_class_weights(y)
        } else {
            [1.0, 1.0]
        };
        let params = ClassificationParams {
            max_depth: self.max_depth,
            max_features: ((x.ncols() as f64).sqrt() as usize).max(1),
            min_samples_split: 2,
            min_samples_leaf: 1,
        };

        let mut master = StdRng::seed_from_u64(seed);
        let tree_seeds: Vec<u64> = (0..self.n_estimators).map(|_| master.r#gen()).collect();

        self.trees = tree_seeds
            .par_iter()
            .map(|&tree_seed| {
                let mut rng = StdRng::seed_from_u64(tree_seed);
                let mut counts = vec![0usize; n];
                for _ in 0..n {
                    counts[rng.gen_range(0..n)] += 1;
                }
                let weights: Vec<f64> = counts
                    .iter()
                    .zip(y)
                    .map(|(&c, &label)| c as f64 * class_weight[usize::from(label)])
                    .collect();
                fit_classification_tree(x, y, &weights, params, &mut rng)
            })
            .collect();
        self.n_features = x.ncols();
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<u8>> {
        let proba = self
            .predict_proba(x)?
            .ok_or_else(|| not_fitted(self.kind()))?;
        Ok(proba.into_iter().map(|p| u8::from(p > 0.5)).collect())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Option<Vec<f64>>> {
        if !self.is_fitted() {
            return Err(not_fitted(self.kind()));
        }
        check_width(self.kind(), &x, self.n_features)?;
        Ok(Some(x.outer_iter().map(|row| self.tree_mean(row)).collect()))
    }

    fn supports_native_importance(&self) -> bool {
        true
    }

    /// Mean decrease in impurity, averaged over trees.
    fn native_importance(&self) -> Option<Vec<f64>> {
        if !self.is_fitted() {
            return None;
        }
        let mut total = vec![0.0; self.n_features];
        for tree in &self.trees {
            for (acc, v) in total.iter_mut().zip(tree.feature_importance()) {
                *acc += v;
            }
        }
        Some(normalize(total))
    }

    fn supports_local_attribution(&self) -> bool {
        true
    }

    fn local_attribution(
        &self,
        x: ArrayView1<f64>,
        background: ArrayView2<f64>,
    ) -> Result<LocalAttribution> {
        if !self.is_fitted() {
            return Err(not_fitted(self.kind()));
        }
        let weight = 1.0 / self.trees.len() as f64;
        ensemble_attribution(
            &self.trees,
            weight,
            0.0,
            x,
            background,
            OutputSpace::Probability,
        )
    }
}
