//! Gradient-boosted trees for binary log-loss.
//!
//! Both objectives produce regression trees whose leaf values add up to the
//! log-odds, so tree attributions come out in log-odds space.

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::tree::{RegressionParams, SplitCriterion, fit_regression_tree};
use super::{
    Classifier, DecisionTree, LocalAttribution, check_training_input, check_width, normalize,
    not_fitted, sigmoid,
};
use crate::error::Result;
use crate::explain::ensemble_attribution;
use crate::types::OutputSpace;

/// How each boosting round scores splits and values its leaves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoostingObjective {
    /// Squared-error splits on the log-loss residuals with Newton leaves.
    FirstOrder,
    /// Gradient/hessian gain with L2 leaf shrinkage and a split penalty.
    SecondOrder {
        lambda: f64,
        gamma: f64,
        min_child_weight: f64,
    },
}

impl BoostingObjective {
    fn criterion(self) -> SplitCriterion {
        match self {
            BoostingObjective::FirstOrder => SplitCriterion::SquaredError,
            BoostingObjective::SecondOrder {
                lambda,
                gamma,
                min_child_weight,
            } => SplitCriterion::SecondOrder {
                lambda,
                gamma,
                min_child_weight,
            },
        }
    }
}

/// Additive log-odds model built from shallow regression trees.
///
/// The decision value is `init + learning_rate * sum(tree(x))`, where `init`
/// is the log-odds of the training prior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
    n_estimators: usize,
    learning_rate: f64,
    max_depth: usize,
    objective: BoostingObjective,
    init: f64,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl Default for GradientBoosting {
    fn default() -> Self {
        Self::new()
    }
}

impl GradientBoosting {
    /// 100 rounds of depth-5 trees at learning rate 0.1.
    pub fn new() -> Self {
        Self::with_objective(BoostingObjective::FirstOrder)
    }

    /// The second-order variant with `lambda = 1`, `gamma = 0` and a minimum
    /// child hessian of 1.
    pub fn regularized() -> Self {
        Self::with_objective(BoostingObjective::SecondOrder {
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
        })
    }

    /// Default round count, depth and learning rate with `objective`.
    pub fn with_objective(objective: BoostingObjective) -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 5,
            objective,
            init: 0.0,
            n_features: 0,
            trees: Vec::new(),
        }
    }

    pub fn n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n.max(1);
        self
    }

    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn objective(&self) -> BoostingObjective {
        self.objective
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Raw log-odds for each row.
    pub fn decision_function(&self, x: ArrayView2<f64>) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(not_fitted(self.kind()));
        }
        check_width(self.kind(), &x, self.n_features)?;
        Ok(x.outer_iter().map(|row| self.decision_row(row)).collect())
    }

    fn decision_row(&self, row: ArrayView1<f64>) -> f64 {
        self.init
            + self.learning_rate * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }
}

impl Classifier for GradientBoosting {
    fn kind(&self) -> &'static str {
        match self.objective {
            BoostingObjective::FirstOrder => "gradient_boosting",
            BoostingObjective::SecondOrder { .. } => "regularized_boosting",
        }
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: &[u8], _seed: u64) -> Result<()> {
        check_training_input(&x, y)?;
        let n = x.nrows();
        let target: Vec<f64> = y.iter().map(|&l| f64::from(l)).collect();
        let prior = target.iter().sum::<f64>() / n as f64;
        self.init = (prior / (1.0 - prior)).ln();

        let params = RegressionParams {
            max_depth: self.max_depth,
            min_samples_leaf: 1,
            criterion: self.objective.criterion(),
        };
        let mut raw = vec![self.init; n];
        let mut trees = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            let p: Vec<f64> = raw.iter().map(|&f| sigmoid(f)).collect();
            let residual: Vec<f64> = target.iter().zip(&p).map(|(t, p)| t - p).collect();
            let hessian: Vec<f64> = p.iter().map(|p| p * (1.0 - p)).collect();

            let tree = fit_regression_tree(x, &residual, &hessian, params);
            for (f, row) in raw.iter_mut().zip(x.outer_iter()) {
                *f += self.learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }
        self.trees = trees;
        self.n_features = x.ncols();
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<u8>> {
        Ok(self
            .decision_function(x)?
            .into_iter()
            .map(|d| u8::from(d > 0.0))
            .collect())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Option<Vec<f64>>> {
        Ok(Some(
            self.decision_function(x)?.into_iter().map(sigmoid).collect(),
        ))
    }

    fn supports_native_importance(&self) -> bool {
        true
    }

    /// Split gain per feature, averaged over rounds.
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
        ensemble_attribution(
            &self.trees,
            self.learning_rate,
            self.init,
            x,
            background,
            OutputSpace::LogOdds,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn data() -> (Array2<f64>, Vec<u8>) {
        let x = array![
            [0.1, 3.0],
            [0.3, 1.0],
            [0.2, 2.0],
            [0.5, 4.0],
            [0.4, 2.5],
            [0.9, 3.1],
            [1.2, 1.2],
            [1.0, 2.2],
            [1.4, 3.9],
            [1.1, 2.6],
            [1.3, 0.5],
            [0.0, 0.7]
        ];
        (x, vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 0])
    }

    #[test]
    fn test_boosting_fits_separable_data() {
        let (x, y) = data();
        let mut model = GradientBoosting::new().n_estimators(30);
        model.fit(x.view(), &y, 0).unwrap();

        assert_eq!(model.kind(), "gradient_boosting");
        assert_eq!(model.n_trees(), 30);
        assert_eq!(model.predict(x.view()).unwrap(), y);

        let proba = model.predict_proba(x.view()).unwrap().unwrap();
        for (p, label) in proba.iter().zip(&y) {
            assert!((0.0..=1.0).contains(p));
            assert_eq!(*p > 0.5, *label == 1);
        }
        let importance = model.native_importance().unwrap();
        assert!(importance[0] > importance[1]);
    }

    #[test]
    fn test_regularized_variant() {
        let (x, y) = data();
        let mut model = GradientBoosting::regularized().n_estimators(50);
        model.fit(x.view(), &y, 0).unwrap();
        assert_eq!(model.kind(), "regularized_boosting");
        assert_eq!(model.predict(x.view()).unwrap(), y);
    }

    #[test]
    fn test_attribution_sums_to_log_odds() {
        let (x, y) = data();
        let mut model = GradientBoosting::new().n_estimators(20);
        model.fit(x.view(), &y, 0).unwrap();

        let attribution = model.local_attribution(x.row(8), x.view()).unwrap();
        let decision = model.decision_function(x.slice(ndarray::s![8..9, ..])).unwrap()[0];
        assert_eq!(attribution.output_space, OutputSpace::LogOdds);
        assert!((attribution.output - decision).abs() < 1e-9);
        let total: f64 = attribution.contributions.iter().sum();
        assert!((attribution.base_value + total - attribution.output).abs() < 1e-9);
    }

    #[test]
    fn test_unfitted_model_errors() {
        let model = GradientBoosting::new();
        assert!(model.predict(array![[1.0, 2.0]].view()).is_err());
        assert!(model.native_importance().is_none());
    }
}
