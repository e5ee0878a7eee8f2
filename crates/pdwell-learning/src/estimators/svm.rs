//! RBF-kernel support vector classifier.
//!
//! Has no native importance and no local attribution; bundles built on it
//! serve predictions only.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Classifier, check_training_input, check_width, not_fitted};
use crate::error::{PdwellError, Result};

const TAU: f64 = 1e-12;

/// Kernel SVM with an RBF kernel, trained by sequential minimal optimisation.
///
/// `gamma` follows the "scale" heuristic, `1 / (n_features * var(X))`. The
/// label is the sign of the decision function; the class-1 probability comes
/// from a sigmoid (Platt) fit on the training decision values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmClassifier {
    c: f64,
    tol: f64,
    max_iter: usize,
    gamma: f64,
    support_vectors: Array2<f64>,
    dual_coef: Vec<f64>,
    rho: f64,
    prob_a: f64,
    prob_b: f64,
    fitted: bool,
}

impl Default for SvmClassifier {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl SvmClassifier {
    /// Unfitted SVM with box constraint `c`, which must be positive.
    pub fn new(c: f64) -> Self {
        Self {
            c,
            tol: 1e-3,
            max_iter: 1_000_000,
            gamma: 0.0,
            support_vectors: Array2::zeros((0, 0)),
            dual_coef: Vec::new(),
            rho: 0.0,
            prob_a: 0.0,
            prob_b: 0.0,
            fitted: false,
        }
    }

    /// Kernel width chosen at fit time; 0 before fitting.
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Number of support vectors.
    pub fn n_support(&self) -> usize {
        self.dual_coef.len()
    }

    fn kernel(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        rbf(self.gamma, a, b)
    }

    /// Signed distance to the separating surface; positive means class 1.
    pub fn decision_function(&self, x: ArrayView2<f64>) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(not_fitted(self.kind()));
        }
        check_width(self.kind(), &x, self.support_vectors.ncols())?;
        Ok(x
            .outer_iter()
            .map(|row| {
                self.support_vectors
                    .outer_iter()
                    .zip(&self.dual_coef)
                    .map(|(sv, &coef)| coef * self.kernel(sv, row))
                    .sum::<f64>()
                    - self.rho
            })
            .collect())
    }

    fn probability_from_decision(&self, f: f64) -> f64 {
        let f_apb = f * self.prob_a + self.prob_b;
        if f_apb >= 0.0 {
            (-f_apb).exp() / (1.0 + (-f_apb).exp())
        } else {
            1.0 / (1.0 + f_apb.exp())
        }
    }
}

fn rbf(gamma: f64, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let dist: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    (-gamma * dist).exp()
}

fn scale_gamma(x: ArrayView2<f64>) -> f64 {
    let n = x.len() as f64;
    let mean = x.sum() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if var > 0.0 {
        1.0 / (x.ncols() as f64 * var)
    } else {
        1.0
    }
}

/// Dual solution of the C-SVC problem.
struct DualSolution {
    alpha: Vec<f64>,
    rho: f64,
    iterations: usize,
}

/// SMO with maximal-violating-pair working set selection.
///
/// Minimises `0.5 * a'Qa - e'a` subject to `y'a = 0`, `0 <= a <= C`, where
/// `Q_ij = y_i y_j K(x_i, x_j)`.
fn solve_dual(kernel: &Array2<f64>, y: &[f64], c: f64, tol: f64, max_iter: usize) -> DualSolution {
    let n = y.len();
    let q = |i: usize, j: usize| y[i] * y[j] * kernel[[i, j]];
    let mut alpha = vec![0.0; n];
    let mut grad = vec![-1.0; n];

    let is_upper = |a: f64| a >= c;
    let is_lower = |a: f64| a <= 0.0;

    let mut iterations = 0;
    while iterations < max_iter {
        // i maximises -y G over I_up, j minimises it over I_low
        let mut g_max = f64::NEG_INFINITY;
        let mut g_min = f64::INFINITY;
        let mut i_sel = None;
        let mut j_sel = None;
        for t in 0..n {
            let v = -y[t] * grad[t];
            let in_up = (y[t] > 0.0 && !is_upper(alpha[t])) || (y[t] < 0.0 && !is_lower(alpha[t]));
            let in_low = (y[t] > 0.0 && !is_lower(alpha[t])) || (y[t] < 0.0 && !is_upper(alpha[t]));
            if in_up && v > g_max {
                g_max = v;
                i_sel = Some(t);
            }
            if in_low && v < g_min {
                g_min = v;
                j_sel = Some(t);
            }
        }
        let (Some(i), Some(j)) = (i_sel, j_sel) else {
            break;
        };
        if g_max - g_min < tol {
            break;
        }
        iterations += 1;

        let (old_i, old_j) = (alpha[i], alpha[j]);
        if y[i] != y[j] {
            let mut quad = q(i, i) + q(j, j) + 2.0 * q(i, j);
            if quad <= 0.0 {
                quad = TAU;
            }
            let delta = (-grad[i] - grad[j]) / quad;
            let diff = alpha[i] - alpha[j];
            alpha[i] += delta;
            alpha[j] += delta;
            if diff > 0.0 {
                if alpha[j] < 0.0 {
                    alpha[j] = 0.0;
                    alpha[i] = diff;
                }
            } else if alpha[i] < 0.0 {
                alpha[i] = 0.0;
                alpha[j] = -diff;
            }
            if diff > 0.0 {
                if alpha[i] > c {
                    alpha[i] = c;
                    alpha[j] = c - diff;
                }
            } else if alpha[j] > c {
                alpha[j] = c;
                alpha[i] = c + diff;
            }
        } else {
            let mut quad = q(i, i) + q(j, j) - 2.0 * q(i, j);
            if quad <= 0.0 {
                quad = TAU;
            }
            let delta = (grad[i] - grad[j]) / quad;
            let sum = alpha[i] + alpha[j];
            alpha[i] -= delta;
            alpha[j] += delta;
            if sum > c {
                if alpha[i] > c {
                    alpha[i] = c;
                    alpha[j] = sum - c;
                }
            } else if alpha[j] < 0.0 {
                alpha[j] = 0.0;
                alpha[i] = sum;
            }
            if sum > c {
                if alpha[j] > c {
                    alpha[j] = c;
                    alpha[i] = sum - c;
                }
            } else if alpha[i] < 0.0 {
                alpha[i] = 0.0;
                alpha[j] = sum;
            }
        }

        let d_i = alpha[i] - old_i;
        let d_j = alpha[j] - old_j;
        for t in 0..n {
            grad[t] += q(t, i) * d_i + q(t, j) * d_j;
        }
    }

    // Offset from free vectors, or the midpoint of the feasible interval
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut free_sum = 0.0;
    let mut n_free = 0usize;
    for t in 0..n {
        let yg = y[t] * grad[t];
        if is_upper(alpha[t]) {
            if y[t] < 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else if is_lower(alpha[t]) {
            if y[t] > 0.0 {
                upper = upper.min(yg);
            } else {
                lower = lower.max(yg);
            }
        } else {
            n_free += 1;
            free_sum += yg;
        }
    }
    let rho = if n_free > 0 {
        free_sum / n_free as f64
    } else {
        (upper + lower) / 2.0
    };

    DualSolution {
        alpha,
        rho,
        iterations,
    }
}

/// Fit `P(y=1|f) = 1 / (1 + exp(A f + B))` by Newton's method with
/// backtracking, using smoothed targets.
fn fit_sigmoid(decision: &[f64], y: &[u8]) -> (f64, f64) {
    let prior1 = y.iter().filter(|&&l| l == 1).count() as f64;
    let prior0 = y.len() as f64 - prior1;
    let hi_target = (prior1 + 1.0) / (prior1 + 2.0);
    let lo_target = 1.0 / (prior0 + 2.0);
    let targets: Vec<f64> = y
        .iter()
        .map(|&l| if l == 1 { hi_target } else { lo_target })
        .collect();

    let objective = |a: f64, b: f64| -> f64 {
        decision
            .iter()
            .zip(&targets)
            .map(|(&f, &t)| {
                let f_apb = f * a + b;
                if f_apb >= 0.0 {
                    t * f_apb + (1.0 + (-f_apb).exp()).ln()
                } else {
                    (t - 1.0) * f_apb + (1.0 + f_apb.exp()).ln()
                }
            })
            .sum()
    };

    let min_step = 1e-10;
    let sigma = 1e-12;
    let mut a = 0.0;
    let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
    let mut fval = objective(a, b);

    for _ in 0..100 {
        let (mut h11, mut h22, mut h21) = (sigma, sigma, 0.0);
        let (mut g1, mut g2) = (0.0, 0.0);
        for (&f, &t) in decision.iter().zip(&targets) {
            let f_apb = f * a + b;
            let (p, q) = if f_apb >= 0.0 {
                let e = (-f_apb).exp();
                (e / (1.0 + e), 1.0 / (1.0 + e))
            } else {
                let e = f_apb.exp();
                (1.0 / (1.0 + e), e / (1.0 + e))
            };
            let d2 = p * q;
            h11 += f * f * d2;
            h22 += d2;
            h21 += f * d2;
            let d1 = t - p;
            g1 += f * d1;
            g2 += d1;
        }
        if g1.abs() < 1e-5 && g2.abs() < 1e-5 {
            break;
        }

        let det = h11 * h22 - h21 * h21;
        let da = -(h22 * g1 - h21 * g2) / det;
        let db = -(-h21 * g1 + h11 * g2) / det;
        let gd = g1 * da + g2 * db;

        let mut step = 1.0;
        while step >= min_step {
            let new_a = a + step * da;
            let new_b = b + step * db;
            let new_f = objective(new_a, new_b);
            if new_f < fval + 1e-4 * step * gd {
                a = new_a;
                b = new_b;
                fval = new_f;
                break;
            }
            step /= 2.0;
        }
        if step < min_step {
            debug!("Platt scaling line search stalled");
            break;
        }
    }
    (a, b)
}

impl Classifier for SvmClassifier {
    fn kind(&self) -> &'static str {
        "svm_rbf"
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: &[u8], _seed: u64) -> Result<()> {
        check_training_input(&x, y)?;
        if self.c <= 0.0 {
            return Err(PdwellError::InvalidConfig("SVM C must be positive".to_string()));
        }

        self.gamma = scale_gamma(x);
        let n = x.nrows();
        let mut kernel = Array2::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let k = rbf(self.gamma, x.row(i), x.row(j));
                kernel[[i, j]] = k;
                kernel[[j, i]] = k;
            }
        }

        let signs: Vec<f64> = y.iter().map(|&l| if l == 1 { 1.0 } else { -1.0 }).collect();
        let solution = solve_dual(&kernel, &signs, self.c, self.tol, self.max_iter);
        if solution.iterations >= self.max_iter {
            debug!("SMO reached the iteration limit ({})", self.max_iter);
        }

        let support: Vec<usize> = (0..n).filter(|&i| solution.alpha[i] > 0.0).collect();
        if support.is_empty() {
            return Err(PdwellError::InvalidData(
                "SVM found no support vectors".to_string(),
            ));
        }
        self.support_vectors = x.select(Axis(0), &support);
        self.dual_coef = support
            .iter()
            .map(|&i| solution.alpha[i] * signs[i])
            .collect();
        self.rho = solution.rho;
        self.fitted = true;

        // Training decision values, computed from the cached kernel
        let decision: Vec<f64> = (0..n)
            .map(|row| {
                support
                    .iter()
                    .zip(&self.dual_coef)
                    .map(|(&sv, &coef)| coef * kernel[[sv, row]])
                    .sum::<f64>()
                    - self.rho
            })
            .collect();
        let (a, b) = fit_sigmoid(&decision, y);
        self.prob_a = a;
        self.prob_b = b;

        debug!(
            "SVM fitted: {} support vectors, gamma {:.5}, {} SMO iterations",
            self.dual_coef.len(),
            self.gamma,
            solution.iterations
        );
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<u8>> {
        Ok(self
            .decision_function(x)?
            .into_iter()
            .map(|f| u8::from(f > 0.0))
            .collect())
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Option<Vec<f64>>> {
        let decision = self.decision_function(x)?;
        Ok(Some(
            decision
                .into_iter()
                .map(|f| self.probability_from_decision(f))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> (Array2<f64>, Vec<u8>) {
        let x = array![
            [-2.0, -1.5],
            [-1.5, -2.0],
            [-2.2, -1.9],
            [-1.8, -2.3],
            [-2.5, -1.0],
            [2.0, 1.5],
            [1.5, 2.0],
            [2.2, 1.9],
            [1.8, 2.3],
            [2.5, 1.0]
        ];
        (x, vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1])
    }

    #[test]
    fn test_separates_blobs() {
        let (x, y) = blobs();
        let mut svm = SvmClassifier::default();
        svm.fit(x.view(), &y, 42).unwrap();

        assert_eq!(svm.predict(x.view()).unwrap(), y);
        assert!(svm.n_support() > 0);
        let proba = svm.predict_proba(x.view()).unwrap().unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(proba[9] > proba[0]);
    }

    #[test]
    fn test_label_follows_decision_sign() {
        let (x, y) = blobs();
        let mut svm = SvmClassifier::default();
        svm.fit(x.view(), &y, 0).unwrap();
        let points = array![[1.0, 1.0], [-1.0, -1.0]];
        let decision = svm.decision_function(points.view()).unwrap();
        let labels = svm.predict(points.view()).unwrap();
        for (f, l) in decision.iter().zip(labels) {
            assert_eq!(l, u8::from(*f > 0.0));
        }
    }

    #[test]
    fn test_scale_gamma() {
        let x = array![[0.0, 2.0], [2.0, 0.0]];
        // var of all entries = 1, two features
        assert!((scale_gamma(x.view()) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_explanation_unavailable() {
        let (x, y) = blobs();
        let mut svm = SvmClassifier::default();
        svm.fit(x.view(), &y, 0).unwrap();
        assert!(!svm.supports_local_attribution());
        assert!(!svm.supports_native_importance());
        let err = svm.local_attribution(x.row(0), x.view()).unwrap_err();
        assert!(matches!(err, PdwellError::ExplanationUnavailable { .. }));
    }

    #[test]
    fn test_unfitted_predict_errors() {
        let svm = SvmClassifier::default();
        assert!(svm.predict(array![[0.0, 0.0]].view()).is_err());
    }
}
