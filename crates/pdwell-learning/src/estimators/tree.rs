//! Binary decision trees shared by the forest and the boosting ensembles.
//!
//! Trees are stored as a flat node vector with the root at index 0. A row
//! goes left when `x[feature] <= threshold`.

use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DecisionTree {
    nodes: Vec<Node>,
    /// Impurity decrease (or split gain) credited to each feature.
    impurity_decrease: Vec<f64>,
}

impl DecisionTree {
    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn n_features(&self) -> usize {
        self.impurity_decrease.len()
    }

    /// Value of the leaf `row` falls into.
    pub(crate) fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Impurity decrease per feature, normalised to sum 1.
    pub(crate) fn feature_importance(&self) -> Vec<f64> {
        super::normalize(self.impurity_decrease.clone())
    }

    pub(crate) fn depth(&self) -> usize {
        fn walk(nodes: &[Node], id: usize) -> usize {
            match &nodes[id] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

/// Growth limits for a gini classification tree.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClassificationParams {
    pub max_depth: usize,
    /// Number of non-constant features examined at each split.
    pub max_features: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

/// How a regression tree scores splits and values leaves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) enum SplitCriterion {
    /// Squared-error reduction of the residuals; Newton leaf `sum(r) / sum(h)`.
    SquaredError,
    /// Regularised second-order gain; leaf `sum(r) / (sum(h) + lambda)`.
    SecondOrder {
        lambda: f64,
        gamma: f64,
        min_child_weight: f64,
    },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RegressionParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub criterion: SplitCriterion,
}

/// Best split found at a node.
struct SplitChoice {
    feature: usize,
    threshold: f64,
    gain: f64,
}

fn threshold_between(lo: f64, hi: f64) -> f64 {
    let mid = lo / 2.0 + hi / 2.0;
    if mid >= hi || mid.is_infinite() { lo } else { mid }
}

/// Move rows going left to the front; returns the number of left rows.
fn partition(x: &ArrayView2<f64>, rows: &mut [usize], feature: usize, threshold: f64) -> usize {
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.iter().partition(|&&i| x[[i, feature]] <= threshold);
    let mid = left.len();
    rows[..mid].copy_from_slice(&left);
    rows[mid..].copy_from_slice(&right);
    mid
}

/// Rows of the node sorted by one feature, paired with their values.
fn sorted_by_feature(x: &ArrayView2<f64>, rows: &[usize], feature: usize) -> Vec<(f64, usize)> {
    let mut pairs: Vec<(f64, usize)> = rows.iter().map(|&i| (x[[i, feature]], i)).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    pairs
}

struct ClassificationBuilder<'a, R: Rng> {
    x: ArrayView2<'a, f64>,
    y: &'a [u8],
    weights: &'a [f64],
    params: ClassificationParams,
    rng: &'a mut R,
    nodes: Vec<Node>,
    impurity_decrease: Vec<f64>,
}

/// `w * gini` for class weights `w0`, `w1`.
fn weighted_gini(w0: f64, w1: f64) -> f64 {
    let w = w0 + w1;
    if w <= 0.0 {
        0.0
    } else {
        w - (w0 * w0 + w1 * w1) / w
    }
}

impl<R: Rng> ClassificationBuilder<'_, R> {
    fn class_weights(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(w0, w1), &i| {
            if self.y[i] == 1 {
                (w0, w1 + self.weights[i])
            } else {
                (w0 + self.weights[i], w1)
            }
        })
    }

    fn build(&mut self, rows: &mut [usize], depth: usize) -> usize {
        let (w0, w1) = self.class_weights(rows);
        let total = w0 + w1;
        let value = if total > 0.0 { w1 / total } else { 0.5 };
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value });

        if depth >= self.params.max_depth
            || rows.len() < self.params.min_samples_split
            || rows.len() < 2 * self.params.min_samples_leaf
            || w0 <= 0.0
            || w1 <= 0.0
        {
            return id;
        }

        let parent_impurity = weighted_gini(w0, w1);
        let Some(split) = self.find_split(rows, parent_impurity) else {
            return id;
        };
        self.impurity_decrease[split.feature] += split.gain;

        let mid = partition(&self.x, rows, split.feature, split.threshold);
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn find_split(&mut self, rows: &[usize], parent_impurity: f64) -> Option<SplitChoice> {
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(&mut *self.rng);

        let min_leaf = self.params.min_samples_leaf.max(1);
        let (tw0, tw1) = self.class_weights(rows);
        let mut best: Option<SplitChoice> = None;
        let mut best_child_impurity = f64::INFINITY;
        let mut examined = 0;

        for feature in features {
            if examined >= self.params.max_features {
                break;
            }
            let sorted = sorted_by_feature(&self.x, rows, feature);
            let (first, last) = (sorted[0].0, sorted[sorted.len() - 1].0);
            if first == last {
                continue;
            }
            examined += 1;

            let (mut lw0, mut lw1) = (0.0, 0.0);
            for pos in 0..sorted.len() - 1 {
                let i = sorted[pos].1;
                if self.y[i] == 1 {
                    lw1 += self.weights[i];
                } else {
                    lw0 += self.weights[i];
                }
                if sorted[pos].0 == sorted[pos + 1].0 {
                    continue;
                }
                let n_left = pos + 1;
                if n_left < min_leaf || sorted.len() - n_left < min_leaf {
                    continue;
                }
                let child = weighted_gini(lw0, lw1) + weighted_gini(tw0 - lw0, tw1 - lw1);
                if child < best_child_impurity {
                    best_child_impurity = child;
                    best = Some(SplitChoice {
                        feature,
                        threshold: threshold_between(sorted[pos].0, sorted[pos + 1].0),
                        gain: (parent_impurity - child).max(0.0),
                    });
                }
            }
        }
        best
    }
}

/// Grow a gini tree on the rows with positive weight.
///
/// `weights` carries both class weighting and bootstrap multiplicity; the
/// leaf value is the weighted fraction of class 1.
pub(crate) fn fit_classification_tree<R: Rng>(
    x: ArrayView2<f64>,
    y: &[u8],
    weights: &[f64],
    params: ClassificationParams,
    rng: &mut R,
) -> DecisionTree {
    let mut rows: Vec<usize> = (0..x.nrows()).filter(|&i| weights[i] > 0.0).collect();
    let mut builder = ClassificationBuilder {
        x: x.view(),
        y,
        weights,
        params,
        rng,
        nodes: Vec::new(),
        impurity_decrease: vec![0.0; x.ncols()],
    };
    builder.build(&mut rows, 0);
    DecisionTree {
        nodes: builder.nodes,
        impurity_decrease: builder.impurity_decrease,
    }
}

struct RegressionBuilder<'a> {
    x: ArrayView2<'a, f64>,
    residual: &'a [f64],
    hessian: &'a [f64],
    params: RegressionParams,
    nodes: Vec<Node>,
    impurity_decrease: Vec<f64>,
}

impl RegressionBuilder<'_> {
    fn leaf_value(&self, g: f64, h: f64) -> f64 {
        match self.params.criterion {
            SplitCriterion::SquaredError => {
                if h.abs() < 1e-150 {
                    0.0
                } else {
                    g / h
                }
            }
            SplitCriterion::SecondOrder { lambda, .. } => g / (h + lambda),
        }
    }

    fn build(&mut self, rows: &mut [usize], depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&i| self.residual[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hessian[i]).sum();
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: self.leaf_value(g, h),
        });

        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_samples_leaf.max(1) {
            return id;
        }
        if let SplitCriterion::SquaredError = self.params.criterion {
            let sum_sq: f64 = rows.iter().map(|&i| self.residual[i].powi(2)).sum();
            if sum_sq - g * g / rows.len() as f64 <= 1e-12 {
                return id;
            }
        }

        let Some(split) = self.find_split(rows, g, h) else {
            return id;
        };
        self.impurity_decrease[split.feature] += split.gain;

        let mid = partition(&self.x, rows, split.feature, split.threshold);
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn gain(&self, gl: f64, hl: f64, nl: usize, g: f64, h: f64, n: usize) -> Option<f64> {
        let (gr, hr, nr) = (g - gl, h - hl, n - nl);
        match self.params.criterion {
            SplitCriterion::SquaredError => {
                Some(gl * gl / nl as f64 + gr * gr / nr as f64 - g * g / n as f64)
            }
            SplitCriterion::SecondOrder {
                lambda,
                gamma,
                min_child_weight,
            } => {
                if hl < min_child_weight || hr < min_child_weight {
                    return None;
                }
                let gain = 0.5
                    * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - g * g / (h + lambda))
                    - gamma;
                (gain > 0.0).then_some(gain)
            }
        }
    }

    fn find_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitChoice> {
        let n = rows.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<SplitChoice> = None;

        for feature in 0..self.x.ncols() {
            let sorted = sorted_by_feature(&self.x, rows, feature);
            if sorted[0].0 == sorted[n - 1].0 {
                continue;
            }
            let (mut gl, mut hl) = (0.0, 0.0);
            for pos in 0..n - 1 {
                let i = sorted[pos].1;
                gl += self.residual[i];
                hl += self.hessian[i];
                if sorted[pos].0 == sorted[pos + 1].0 {
                    continue;
                }
                let nl = pos + 1;
                if nl < min_leaf || n - nl < min_leaf {
                    continue;
                }
                let Some(gain) = self.gain(gl, hl, nl, g, h, n) else {
                    continue;
                };
                if best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(SplitChoice {
                        feature,
                        threshold: threshold_between(sorted[pos].0, sorted[pos + 1].0),
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Grow a regression tree on per-row residuals (negative gradients) and
/// hessians.
pub(crate) fn fit_regression_tree(
    x: ArrayView2<f64>,
    residual: &[f64],
    hessian: &[f64],
    params: RegressionParams,
) -> DecisionTree {
    let mut rows: Vec<usize> = (0..x.nrows()).collect();
    let mut builder = RegressionBuilder {
        x: x.view(),
        residual,
        hessian,
        params,
        nodes: Vec::new(),
        impurity_decrease: vec![0.0; x.ncols()],
    };
    builder.build(&mut rows, 0);
    DecisionTree {
        nodes: builder.nodes,
        impurity_decrease: builder.impurity_decrease,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn params(max_depth: usize) -> ClassificationParams {
        ClassificationParams {
            max_depth,
            max_features: 2,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }

    #[test]
    fn test_classification_tree_fits_threshold() {
        let x = array![[0.0, 5.0], [1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let y = [0, 0, 1, 1];
        let mut rng = StdRng::seed_from_u64(1);
        let tree = fit_classification_tree(x.view(), &y, &[1.0; 4], params(3), &mut rng);

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.predict_row(array![0.5, 5.0].view()), 0.0);
        assert_eq!(tree.predict_row(array![2.5, 5.0].view()), 1.0);
        assert_eq!(tree.feature_importance(), vec![1.0, 0.0]);
        match &tree.nodes()[0] {
            Node::Split {
                feature, threshold, ..
            } => {
                assert_eq!(*feature, 0);
                assert_eq!(*threshold, 1.5);
            }
            Node::Leaf { .. } => panic!("root should split"),
        }
    }

    #[test]
    fn test_classification_tree_respects_depth() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = [0, 1, 0, 1, 0, 1];
        let mut rng = StdRng::seed_from_u64(1);
        let tree = fit_classification_tree(x.view(), &y, &[1.0; 6], params(1), &mut rng);
        assert!(tree.depth() <= 1);
    }

    #[test]
    fn test_zero_weight_rows_are_ignored() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = [0, 1, 1];
        let mut rng = StdRng::seed_from_u64(1);
        let tree = fit_classification_tree(x.view(), &y, &[0.0, 1.0, 1.0], params(3), &mut rng);
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.predict_row(array![0.0].view()), 1.0);
    }

    #[test]
    fn test_regression_tree_newton_leaves() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let residual = [-0.5, -0.5, 0.5, 0.5];
        let hessian = [0.25; 4];
        let tree = fit_regression_tree(
            x.view(),
            &residual,
            &hessian,
            RegressionParams {
                max_depth: 2,
                min_samples_leaf: 1,
                criterion: SplitCriterion::SquaredError,
            },
        );
        assert_eq!(tree.predict_row(array![0.0].view()), -2.0);
        assert_eq!(tree.predict_row(array![3.0].view()), 2.0);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_second_order_gamma_prunes() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let residual = [-0.5, -0.5, 0.5, 0.5];
        let hessian = [0.25; 4];
        let tree = fit_regression_tree(
            x.view(),
            &residual,
            &hessian,
            RegressionParams {
                max_depth: 3,
                min_samples_leaf: 1,
                criterion: SplitCriterion::SecondOrder {
                    lambda: 1.0,
                    gamma: 10.0,
                    min_child_weight: 0.0,
                },
            },
        );
        assert_eq!(tree.nodes().len(), 1);
    }
}
