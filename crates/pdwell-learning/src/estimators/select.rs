//! Univariate feature selection by ANOVA F score.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::{check_width, not_fitted};
use crate::error::{PdwellError, Result};

/// Keeps the `k` columns with the highest one-way ANOVA F statistic against
/// the binary label.
///
/// `k` is clamped to the number of columns at fit time. Selected columns keep
/// their original relative order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectKBest {
    k: usize,
    n_features_in: usize,
    #[serde(with = "non_finite_as_null")]
    scores: Vec<f64>,
    selected: Vec<usize>,
}

/// JSON has no NaN or infinity; constant columns score NaN.
mod non_finite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(scores: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(scores.iter().map(|s| s.is_finite().then_some(*s)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let scores: Vec<Option<f64>> = Vec::deserialize(deserializer)?;
        Ok(scores.into_iter().map(|s| s.unwrap_or(f64::NAN)).collect())
    }
}

impl SelectKBest {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            n_features_in: 0,
            scores: Vec::new(),
            selected: Vec::new(),
        }
    }

    pub fn fit(&mut self, x: ArrayView2<f64>, y: &[u8]) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(PdwellError::InvalidData(format!(
                "{} labels for {} rows",
                y.len(),
                x.nrows()
            )));
        }
        self.n_features_in = x.ncols();
        self.scores = x.axis_iter(Axis(1)).map(|c| f_statistic(c.iter(), y)).collect();

        let k = self.k.clamp(1, x.ncols().max(1)).min(x.ncols());
        let mut order: Vec<usize> = (0..x.ncols()).collect();
        // Non-finite scores rank last
        order.sort_by(|&a, &b| {
            let sa = rank_key(self.scores[a]);
            let sb = rank_key(self.scores[b]);
            sb.total_cmp(&sa).then(a.cmp(&b))
        });
        let mut selected: Vec<usize> = order.into_iter().take(k).collect();
        selected.sort_unstable();
        self.selected = selected;
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        !self.selected.is_empty()
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted() {
            return Err(not_fitted("select_k_best"));
        }
        check_width("select_k_best", &x, self.n_features_in)?;
        Ok(x.select(Axis(1), &self.selected))
    }

    /// Indices of the kept columns, ascending.
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// F statistic per input column; NaN for constant columns.
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn n_features_in(&self) -> usize {
        self.n_features_in
    }

    /// Spread a vector over the kept columns back to the input width,
    /// filling dropped columns with zero.
    pub(crate) fn expand(&self, values: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.n_features_in];
        for (&idx, &v) in self.selected.iter().zip(values) {
            out[idx] = v;
        }
        out
    }
}

fn rank_key(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

/// F = (between-group mean square) / (within-group mean square) for two groups.
fn f_statistic<'a>(values: impl Iterator<Item = &'a f64>, y: &[u8]) -> f64 {
    let mut n = [0.0f64; 2];
    let mut sum = [0.0f64; 2];
    let mut sum_sq = [0.0f64; 2];
    for (&v, &label) in values.zip(y) {
        let g = usize::from(label.min(1));
        n[g] += 1.0;
        sum[g] += v;
        sum_sq[g] += v * v;
    }
    let n_total = n[0] + n[1];
    if n[0] == 0.0 || n[1] == 0.0 || n_total <= 2.0 {
        return f64::NAN;
    }

    let grand_mean = (sum[0] + sum[1]) / n_total;
    let ss_between: f64 = (0..2)
        .map(|g| n[g] * (sum[g] / n[g] - grand_mean).powi(2))
        .sum();
    let ss_within: f64 = (0..2).map(|g| sum_sq[g] - sum[g] * sum[g] / n[g]).sum();

    let ms_between = ss_between / 1.0;
    let ms_within = ss_within.max(0.0) / (n_total - 2.0);
    if ms_within == 0.0 {
        return if ms_between > 0.0 { f64::INFINITY } else { f64::NAN };
    }
    ms_between / ms_within
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_keeps_most_discriminative_columns() {
        // column 1 separates the classes, column 0 is noise, column 2 is constant
        let x = array![
            [0.3, 0.0, 1.0],
            [0.1, 0.1, 1.0],
            [0.2, 5.0, 1.0],
            [0.4, 5.1, 1.0]
        ];
        let y = [0, 0, 1, 1];
        let mut selector = SelectKBest::new(1);
        selector.fit(x.view(), &y).unwrap();
        assert_eq!(selector.selected(), &[1]);
        assert!(selector.scores()[2].is_nan());

        let reduced = selector.transform(x.view()).unwrap();
        assert_eq!(reduced.ncols(), 1);
        assert_eq!(reduced[[2, 0]], 5.0);
    }

    #[test]
    fn test_k_is_clamped() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 0.0]];
        let mut selector = SelectKBest::new(15);
        selector.fit(x.view(), &[0, 1, 1]).unwrap();
        assert_eq!(selector.selected(), &[0, 1]);
    }

    #[test]
    fn test_expand_restores_width() {
        let x = array![[0.0, 0.0, 0.0], [0.0, 1.0, 2.0], [1.0, 2.0, 4.0], [1.0, 3.0, 6.0]];
        let mut selector = SelectKBest::new(2);
        selector.fit(x.view(), &[0, 0, 1, 1]).unwrap();
        let expanded = selector.expand(&[0.5, 0.25]);
        assert_eq!(expanded.len(), 3);
        assert_eq!(expanded.iter().sum::<f64>(), 0.75);
    }

    #[test]
    fn test_nan_scores_survive_json() {
        let x = array![[0.0, 1.0], [1.0, 1.0], [2.0, 1.0], [3.0, 1.0]];
        let mut selector = SelectKBest::new(1);
        selector.fit(x.view(), &[0, 0, 1, 1]).unwrap();

        let json = serde_json::to_string(&selector).unwrap();
        let restored: SelectKBest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.selected(), selector.selected());
        assert!(restored.scores()[1].is_nan());
    }
}
