//! Native estimators: scaling, univariate selection and the four classifier
//! families used as training candidates.
//!
//! Every classifier implements [`Classifier`]. Capabilities that only some
//! families have (native importance, local attribution, probabilities) are
//! exposed as explicit checks on the trait instead of being discovered at runtime.
//! [`ClassifierKind`] is the closed, serializable set of implementations that
//! a [`ModelPipeline`] can hold.

mod boosting;
mod forest;
mod logistic;
mod pipeline;
mod scaler;
mod select;
mod svm;
mod tree;

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{PdwellError, Result};
use crate::types::OutputSpace;

pub use boosting::{BoostingObjective, GradientBoosting};
pub use forest::RandomForest;
pub use logistic::LogisticRegression;
pub use pipeline::ModelPipeline;
pub use scaler::StandardScaler;
pub use select::SelectKBest;
pub use svm::SvmClassifier;
pub(crate) use tree::{DecisionTree, Node};

/// Additive attribution of one row in the classifier's input space.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalAttribution {
    /// One contribution per classifier input column.
    pub contributions: Vec<f64>,
    /// Mean model output over the background rows.
    pub base_value: f64,
    /// Model output for the explained row.
    pub output: f64,
    pub output_space: OutputSpace,
}

/// A binary classifier over dense `f64` features.
///
/// Labels are `0` (healthy) and `1` (affected). Inputs are expected to be
/// already transformed by the preceding pipeline stages.
pub trait Classifier: Send + Sync {
    /// Stable identifier of the classifier family, e.g. `"random_forest"`.
    fn kind(&self) -> &'static str;

    /// Fit on `x` / `y`. `seed` drives every random choice the fit makes.
    fn fit(&mut self, x: ArrayView2<f64>, y: &[u8], seed: u64) -> Result<()>;

    fn is_fitted(&self) -> bool;

    /// The classifier's own thresholded decision for each row.
    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<u8>>;

    /// Class-1 probability for each row, `None` if the family has no
    /// probability output.
    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Option<Vec<f64>>>;

    fn supports_native_importance(&self) -> bool {
        false
    }

    /// Per-column importance normalised to sum 1, if the family exposes one.
    fn native_importance(&self) -> Option<Vec<f64>> {
        None
    }

    fn supports_local_attribution(&self) -> bool {
        false
    }

    /// Exact additive attribution of `x` against `background`.
    fn local_attribution(
        &self,
        _x: ArrayView1<f64>,
        _background: ArrayView2<f64>,
    ) -> Result<LocalAttribution> {
        Err(PdwellError::ExplanationUnavailable {
            model: self.kind().to_string(),
            reason: "no local attribution support for this classifier".to_string(),
        })
    }
}

/// The closed set of classifier implementations a pipeline can hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "model", rename_all = "snake_case")]
pub enum ClassifierKind {
    Svm(SvmClassifier),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    LogisticRegression(LogisticRegression),
}

impl ClassifierKind {
    fn inner(&self) -> &dyn Classifier {
        match self {
            ClassifierKind::Svm(m) => m,
            ClassifierKind::RandomForest(m) => m,
            ClassifierKind::GradientBoosting(m) => m,
            ClassifierKind::LogisticRegression(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            ClassifierKind::Svm(m) => m,
            ClassifierKind::RandomForest(m) => m,
            ClassifierKind::GradientBoosting(m) => m,
            ClassifierKind::LogisticRegression(m) => m,
        }
    }
}

impl Classifier for ClassifierKind {
    fn kind(&self) -> &'static str {
        self.inner().kind()
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: &[u8], seed: u64) -> Result<()> {
        self.inner_mut().fit(x, y, seed)
    }

    fn is_fitted(&self) -> bool {
        self.inner().is_fitted()
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<u8>> {
        self.inner().predict(x)
    }

    fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Option<Vec<f64>>> {
        self.inner().predict_proba(x)
    }

    fn supports_native_importance(&self) -> bool {
        self.inner().supports_native_importance()
    }

    fn native_importance(&self) -> Option<Vec<f64>> {
        self.inner().native_importance()
    }

    fn supports_local_attribution(&self) -> bool {
        self.inner().supports_local_attribution()
    }

    fn local_attribution(
        &self,
        x: ArrayView1<f64>,
        background: ArrayView2<f64>,
    ) -> Result<LocalAttribution> {
        self.inner().local_attribution(x, background)
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Reject training input that no estimator can fit.
pub(crate) fn check_training_input(x: &ArrayView2<f64>, y: &[u8]) -> Result<()> {
    if x.nrows() == 0 {
        return Err(PdwellError::InvalidData("cannot fit on zero rows".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(PdwellError::InvalidData(format!(
            "{} labels for {} rows",
            y.len(),
            x.nrows()
        )));
    }
    if !y.contains(&0) || !y.contains(&1) {
        return Err(PdwellError::InvalidData(
            "both classes must be present to fit a classifier".to_string(),
        ));
    }
    Ok(())
}

/// Reject scoring input whose width differs from the fitted width.
pub(crate) fn check_width(kind: &str, x: &ArrayView2<f64>, expected: usize) -> Result<()> {
    if x.ncols() != expected {
        return Err(PdwellError::Inference(format!(
            "{kind} expects {expected} features, got {}",
            x.ncols()
        )));
    }
    Ok(())
}

pub(crate) fn not_fitted(kind: &str) -> PdwellError {
    PdwellError::Inference(format!("{kind} is not fitted"))
}

/// Normalise non-negative scores to sum 1; all-zero input stays all-zero.
pub(crate) fn normalize(mut scores: Vec<f64>) -> Vec<f64> {
    let total: f64 = scores.iter().sum();
    if total > 0.0 {
        for s in &mut scores {
            *s /= total;
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_is_stable() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(vec![1.0, 3.0]), vec![0.25, 0.75]);
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }
}
