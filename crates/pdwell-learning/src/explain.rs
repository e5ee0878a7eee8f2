//! Exact Shapley attributions for tree ensembles and importance ranking.
//!
//! Tree attributions are interventional: for each (target, background) pair
//! the tree is walked once, splitting into two paths wherever the target and
//! the background row disagree on a feature that has not yet been assigned
//! to either side. Each leaf then credits its value to the features on the
//! target side and debits it from the features on the background side with
//! the usual Shapley coalition weights. Averaging over the background rows
//! gives attributions that sum exactly to `f(x) - mean(f(background))`.

use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;

use crate::error::{PdwellError, Result};
use crate::estimators::{DecisionTree, LocalAttribution, Node};
use crate::types::{FeatureImportance, Impact, OutputSpace};

#[derive(Clone, Copy, PartialEq)]
enum Side {
    Unassigned,
    Target,
    Background,
}

/// `(s - 1)! * o! / (s + o)!`: the weight of one of `s` features on the side
/// that must be present, with `o` features on the side that must be absent.
fn coalition_weight(s: usize, o: usize) -> f64 {
    (1..=o).fold(1.0 / s as f64, |w, k| w * k as f64 / (s + k) as f64)
}

struct PairWalk<'a> {
    nodes: &'a [Node],
    x: ArrayView1<'a, f64>,
    b: ArrayView1<'a, f64>,
    side: Vec<Side>,
    target: Vec<usize>,
    background: Vec<usize>,
    scale: f64,
}

impl PairWalk<'_> {
    fn walk(&mut self, id: usize, phi: &mut [f64]) {
        match &self.nodes[id] {
            Node::Leaf { value } => {
                let (s, o) = (self.target.len(), self.background.len());
                if s + o == 0 {
                    return;
                }
                let v = self.scale * value;
                if s > 0 {
                    let w = coalition_weight(s, o);
                    for &f in &self.target {
                        phi[f] += v * w;
                    }
                }
                if o > 0 {
                    let w = coalition_weight(o, s);
                    for &f in &self.background {
                        phi[f] -= v * w;
                    }
                }
            }
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                let f = *feature;
                let x_child = if self.x[f] <= *threshold { *left } else { *right };
                let b_child = if self.b[f] <= *threshold { *left } else { *right };
                if x_child == b_child {
                    self.walk(x_child, phi);
                    return;
                }
                match self.side[f] {
                    Side::Target => self.walk(x_child, phi),
                    Side::Background => self.walk(b_child, phi),
                    Side::Unassigned => {
                        self.side[f] = Side::Target;
                        self.target.push(f);
                        self.walk(x_child, phi);
                        self.target.pop();

                        self.side[f] = Side::Background;
                        self.background.push(f);
                        self.walk(b_child, phi);
                        self.background.pop();
                        self.side[f] = Side::Unassigned;
                    }
                }
            }
        }
    }
}

/// Interventional Shapley values of one tree for one (target, background)
/// pair, scaled by `scale` and added into `phi`.
fn tree_pair_shap(
    tree: &DecisionTree,
    x: ArrayView1<f64>,
    b: ArrayView1<f64>,
    scale: f64,
    phi: &mut [f64],
) {
    let mut walk = PairWalk {
        nodes: tree.nodes(),
        x: x.view(),
        b: b.view(),
        side: vec![Side::Unassigned; x.len()],
        target: Vec::new(),
        background: Vec::new(),
        scale,
    };
    walk.walk(0, phi);
}

/// Attribution for an ensemble whose output is
/// `offset + weight * sum(tree(x))`.
pub(crate) fn ensemble_attribution(
    trees: &[DecisionTree],
    weight: f64,
    offset: f64,
    x: ArrayView1<f64>,
    background: ArrayView2<f64>,
    output_space: OutputSpace,
) -> Result<LocalAttribution> {
    let width = trees.first().map(|t| t.n_features()).unwrap_or(x.len());
    if x.len() != width || background.ncols() != width {
        return Err(PdwellError::Inference(format!(
            "attribution expects {width} features, got row {} / background {}",
            x.len(),
            background.ncols()
        )));
    }
    if background.nrows() == 0 {
        return Err(PdwellError::Inference(
            "attribution needs at least one background row".to_string(),
        ));
    }

    let output_of = |row: ArrayView1<f64>| {
        offset + weight * trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    };

    let n_background = background.nrows();
    let (phi_sum, base_sum) = (0..n_background)
        .into_par_iter()
        .map(|r| {
            let b = background.row(r);
            let mut phi = vec![0.0; width];
            for tree in trees {
                tree_pair_shap(tree, x, b, weight, &mut phi);
            }
            (phi, output_of(b))
        })
        .reduce(
            || (vec![0.0; width], 0.0),
            |(mut acc, base_a), (phi, base_b)| {
                for (a, p) in acc.iter_mut().zip(phi) {
                    *a += p;
                }
                (acc, base_a + base_b)
            },
        );

    let n = n_background as f64;
    Ok(LocalAttribution {
        contributions: phi_sum.into_iter().map(|p| p / n).collect(),
        base_value: base_sum / n,
        output: output_of(x),
        output_space,
    })
}

/// Up to `max` row indices spread evenly over `0..n`.
pub(crate) fn background_indices(n: usize, max: usize) -> Vec<usize> {
    if n <= max {
        return (0..n).collect();
    }
    let max = max.max(1);
    (0..max).map(|i| i * n / max).collect()
}

/// Percentile of `values` with linear interpolation between closest ranks.
pub(crate) fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// High above the 80th percentile, Medium above the 50th, Low otherwise.
pub(crate) fn impact_levels(importance: &[f64]) -> Vec<Impact> {
    let high = percentile(importance, 80.0);
    let medium = percentile(importance, 50.0);
    importance
        .iter()
        .map(|&v| {
            if v > high {
                Impact::High
            } else if v > medium {
                Impact::Medium
            } else {
                Impact::Low
            }
        })
        .collect()
}

/// Pair names with importances, bucket them and sort descending.
pub(crate) fn rank_importance(names: &[String], importance: &[f64]) -> Vec<FeatureImportance> {
    let levels = impact_levels(importance);
    let mut ranked: Vec<FeatureImportance> = names
        .iter()
        .zip(importance)
        .zip(levels)
        .map(|((feature, &importance), impact)| FeatureImportance {
            feature: feature.clone(),
            importance,
            impact,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}
