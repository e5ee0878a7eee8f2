//! Binary logistic regression fitted by Newton's method.
//!
//! Attributions are exact in log-odds space: each feature contributes
//! `coef_j * (x_j - mean_j)` against the background mean.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::forest::balanced_class_weights;
use super::{
    Classifier, LocalAttribution, check_training_input, check_width, not_fitted, sigmoid,
};
use crate::error::{PdwellError, Result};
use crate::types::OutputSpace;

/// L2-regularised logistic regression with balanced class weights.
///
/// Minimises `C * sum(w_i * logloss_i) + 0.5 * |coef|^2` with an unpenalised
/// intercept, using damped Newton steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    c: f64,
    max_iter: usize,
    tol: f64,
    coef: Vec<f64>,
    intercept: f64,
    fitted: bool,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl LogisticRegression {
    /// Unfitted model with inverse regularisation strength `c`.
    ///
    /// `c` must be positive; [`fit`](Classifier::fit) rejects anything else.
    pub fn new(c: f64) -> Self {
        Self {
            c,
            max_iter: 1000,
            tol: 1e-8,
            coef: Vec::new(),
            intercept: 0.0,
            fitted: false,
        }
    }

    /// Cap on Newton iterations (at least one).
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    /// Fitted weights, one per input column. Empty before fitting.
    pub fn coef(&self) -> &[f64] {
        &self.coef
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Log-odds of the positive class for every row.
    pub fn decision_function(&self, x: ArrayView2<f64>) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(not_fitted(self.kind()));
        }
        check_width(self.kind(), &x, self.coef.len())?;
        Ok(x.outer_iter().map(|row| self.decision_row(row)).collect())
    }

    fn decision_row(&self, row: ArrayView1<f64>) -> f64 {
        self.intercept + row.iter().zip(&self.coef).map(|(v, c)| v * c).sum::<f64>()
    }
}

/// Parameters are laid out as `[coef..., intercept]`.
struct Objective<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a [u8],
    weights: Vec<f64>,
    c: f64,
}

impl Objective<'_> {
    fn decision(&self, params: &[f64]) -> Vec<f64> {
        let d = self.x.ncols();
        self.x
            .outer_iter()
            .map(|row| params[d] + row.iter().zip(params).map(|(v, b)| v * b).sum::<f64>())
            .collect()
    }

    fn value(&self, params: &[f64]) -> f64 {
        let d = self.x.ncols();
        let loss: f64 = self
            .decision(params)
            .iter()
            .zip(self.y)
            .zip(&self.weights)
            .map(|((&z, &label), &w)| {
                // log(1 + e^z) - y*z, computed without overflow
                let softplus = if z > 0.0 {
                    z + (-z).exp().ln_1p()
                } else {
                    z.exp().ln_1p()
                };
                w * (softplus - f64::from(label) * z)
            })
            .sum();
        self.c * loss + 0.5 * params[..d].iter().map(|b| b * b).sum::<f64>()
    }

    fn gradient_and_hessian(&self, params: &[f64]) -> (Array1<f64>, Array2<f64>) {
        let d = self.x.ncols();
        let mut grad = Array1::<f64>::zeros(d + 1);
        let mut hess = Array2::<f64>::zeros((d + 1, d + 1));
        for (((row, z), &label), &w) in self
            .x
            .outer_iter()
            .zip(self.decision(params))
            .zip(self.y)
            .zip(&self.weights)
        {
            let p = sigmoid(z);
            let g = self.c * w * (p - f64::from(label));
            let s = self.c * w * p * (1.0 - p);
            for a in 0..=d {
                let xa = if a == d { 1.0 } else { row[a] };
                grad[a] += g * xa;
                for b in 0..=a {
                    let xb = if b == d { 1.0 } else { row[b] };
                    hess[[a, b]] += s * xa * xb;
                }
            }
        }
        for a in 0..=d {
            for b in 0..a {
                hess[[b, a]] = hess[[a, b]];
            }
        }
        for j in 0..d {
            grad[j] += params[j];
            hess[[j, j]] += 1.0;
        }
        (grad, hess)
    }
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() < 1e-300 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}

impl Classifier for LogisticRegression {
    fn kind(&self) -> &'static str {
        "logistic_regression"
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: &[u8], _seed: u64) -> Result<()> {
        check_training_input(&x, y)?;
        if self.c.is_nan() || self.c <= 0.0 {
            return Err(PdwellError::InvalidConfig(
                "logistic regression C must be positive".to_string(),
            ));
        }
        let class_weight = balanced_class_weights(y);
        let objective = Objective {
            x: x.view(),
            y,
            weights: y.iter().map(|&l| class_weight[usize::from(l)]).collect(),
            c: self.c,
        };

        let d = x.ncols();
        let mut params = vec![0.0; d + 1];
        let mut current = objective.value(&params);
        for _ in 0..self.max_iter {
            let (grad, hess) = objective.gradient_and_hessian(&params);
            if grad.iter().all(|g| g.abs() < self.tol) {
                break;
            }
            let step = solve(hess, grad).ok_or_else(|| {
                PdwellError::InvalidData("singular hessian in logistic regression".to_string())
            })?;

            let mut t = 1.0;
            let mut accepted = false;
            while t > 1e-10 {
                let trial: Vec<f64> = params.iter().zip(&step).map(|(p, s)| p - t * s).collect();
                let value = objective.value(&trial);
                if value <= current {
                    accepted = value < current;
                    params = trial;
                    current = value;
                    break;
                }
                t *= 0.5;
            }
            if !accepted {
                break;
            }
        }

        self.intercept = params[d];
        params.truncate(d);
        self.coef = params;
        self.fitted = true;
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.fitted
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

    fn supports_local_attribution(&self) -> bool {
        true
    }

    /// Exact linear attribution: `coef_j * (x_j - mean_j(background))`.
    fn local_attribution(
        &self,
        x: ArrayView1<f64>,
        background: ArrayView2<f64>,
    ) -> Result<LocalAttribution> {
        if !self.fitted {
            return Err(not_fitted(self.kind()));
        }
        check_width(self.kind(), &background, self.coef.len())?;
        if x.len() != self.coef.len() || background.nrows() == 0 {
            return Err(PdwellError::Inference(
                "attribution needs a matching row and a non-empty background".to_string(),
            ));
        }
        let mean = background
            .mean_axis(Axis(0))
            .ok_or_else(|| PdwellError::Inference("empty background".to_string()))?;
        let contributions: Vec<f64> = self
            .coef
            .iter()
            .zip(x.iter().zip(mean.iter()))
            .map(|(c, (v, m))| c * (v - m))
            .collect();
        Ok(LocalAttribution {
            contributions,
            base_value: self.decision_row(mean.view()),
            output: self.decision_row(x),
            output_space: OutputSpace::LogOdds,
        })
    }
}
