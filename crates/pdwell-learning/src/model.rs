//! Trained bundle for inference and explanation.
//!
//! This module provides [`ModelBundle`], the read-only result of a training
//! run, which enables:
//!
//! - **Prediction** via [`predict()`](ModelBundle::predict) for one or many rows
//! - **Global importance** via [`global_importance()`](ModelBundle::global_importance)
//! - **Local attribution** via [`explain_instance()`](ModelBundle::explain_instance)
//!
//! # Lifecycle
//!
//! A `ModelBundle` is created in one of two ways:
//!
//! 1. **From training**: [`TrainingReport::bundle`](crate::TrainingReport::bundle)
//!    holds the bundle that was just persisted
//! 2. **From disk**: [`load_bundle()`] reads a previously written models directory
//!
//! # Example
//!
//! ```rust,ignore
//! use pdwell_learning::{load_bundle, read_feature_rows};
//!
//! let bundle = load_bundle("models")?;
//! let rows = read_feature_rows("uploads/patient.csv".as_ref())?;
//!
//! for prediction in bundle.predict(&rows)? {
//!     println!("{} ({:?})", prediction.label, prediction.probability);
//! }
//!
//! let record = bundle.explain_instance(&rows, 0)?;
//! for c in record.top(5) {
//!     println!("{:>20} {:+.4}", c.feature, c.contribution);
//! }
//! ```
//!
//! # Thread Safety
//!
//! `ModelBundle` is immutable and `Send + Sync`; share it behind an `Arc`
//! (see [`BundleCache`](crate::BundleCache)).

use ndarray::Array2;
use static_assertions::assert_impl_all;

use crate::config::ExplainConfig;
use crate::data::FeatureVector;
use crate::error::{PdwellError, Result};
use crate::estimators::{ModelPipeline, StandardScaler};
use crate::explain::{background_indices, rank_importance};
use crate::types::{AttributionRecord, Contribution, FeatureImportance, Prediction, TrainingSummary};

pub use crate::artifact::load_bundle;

/// A fitted pipeline together with the metadata needed to score raw rows.
///
/// # Invariants
///
/// - the pipeline is fitted and expects exactly `feature_names.len()` columns
/// - the scaler, when present, lives inside the pipeline and is applied once
#[derive(Debug, Clone)]
pub struct ModelBundle {
    model_name: String,
    version: String,
    feature_names: Vec<String>,
    pipeline: ModelPipeline,
    summary: Option<TrainingSummary>,
}

assert_impl_all!(ModelBundle: Send, Sync);

impl ModelBundle {
    /// Assemble a bundle from a fitted pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError::InvalidData`] if the pipeline is not fitted or
    /// its input width differs from the number of feature names.
    pub fn new(
        model_name: impl Into<String>,
        version: impl Into<String>,
        feature_names: Vec<String>,
        pipeline: ModelPipeline,
        summary: Option<TrainingSummary>,
    ) -> Result<Self> {
        if !pipeline.is_fitted() {
            return Err(PdwellError::InvalidData(
                "bundle pipeline is not fitted".to_string(),
            ));
        }
        if pipeline.n_features_in() != feature_names.len() {
            return Err(PdwellError::InvalidData(format!(
                "pipeline expects {} features but {} names were given",
                pipeline.n_features_in(),
                feature_names.len()
            )));
        }
        Ok(Self {
            model_name: model_name.into(),
            version: version.into(),
            feature_names,
            pipeline,
            summary,
        })
    }

    /// Candidate name of the model, e.g. `"RandomForest"`.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Training timestamp; changes on every retrain.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Feature names in the order the pipeline expects them.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// The fitted pipeline, taking columns in [`feature_names`](Self::feature_names) order.
    pub fn pipeline(&self) -> &ModelPipeline {
        &self.pipeline
    }

    /// The scaler fitted inside the pipeline, if it has one.
    pub fn scaler(&self) -> Option<&StandardScaler> {
        self.pipeline.scaler()
    }

    /// Training summary stored with the model, if any.
    pub fn summary(&self) -> Option<&TrainingSummary> {
        self.summary.as_ref()
    }

    /// `true` when [`global_importance()`](Self::global_importance) can succeed.
    pub fn supports_global_importance(&self) -> bool {
        self.pipeline.supports_native_importance()
    }

    /// `true` when [`explain_instance()`](Self::explain_instance) can succeed.
    pub fn supports_explanation(&self) -> bool {
        self.pipeline.supports_local_attribution()
    }

    fn align_rows(&self, rows: &[FeatureVector]) -> Result<Array2<f64>> {
        let width = self.feature_names.len();
        let mut values = Vec::with_capacity(rows.len() * width);
        for (i, row) in rows.iter().enumerate() {
            let aligned = row
                .align(&self.feature_names)
                .map_err(|e| PdwellError::Inference(format!("row {i}: {e}")))?;
            values.extend(aligned);
        }
        Array2::from_shape_vec((rows.len(), width), values)
            .map_err(|e| PdwellError::Inference(e.to_string()))
    }

    /// Score `rows`, returning one prediction per row in input order.
    ///
    /// Each row is aligned by feature name; `name`, `status` and unknown
    /// columns are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError::Inference`] if a row lacks one of the bundle's
    /// features.
    #[must_use = "returns the predictions; use them or handle the error"]
    pub fn predict(&self, rows: &[FeatureVector]) -> Result<Vec<Prediction>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let x = self.align_rows(rows)?;
        let labels = self.pipeline.predict(x.view())?;
        let probabilities = self.pipeline.predict_proba(x.view())?;
        Ok(labels
            .into_iter()
            .enumerate()
            .map(|(i, label)| Prediction {
                label,
                probability: probabilities.as_ref().map(|p| p[i]),
            })
            .collect())
    }

    /// Score a single row.
    pub fn predict_one(&self, row: &FeatureVector) -> Result<Prediction> {
        self.predict(std::slice::from_ref(row))?
            .pop()
            .ok_or_else(|| PdwellError::Inference("no prediction produced".to_string()))
    }

    /// Native importances, sorted descending and bucketed into impact levels.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError::ExplanationUnavailable`] for classifiers without
    /// a native importance (SVM, logistic regression).
    #[must_use = "returns the importance ranking; use it or handle the error"]
    pub fn global_importance(&self) -> Result<Vec<FeatureImportance>> {
        let importance = self.pipeline.native_importance().ok_or_else(|| {
            PdwellError::ExplanationUnavailable {
                model: self.pipeline.kind().to_string(),
                reason: "the classifier has no native feature importance".to_string(),
            }
        })?;
        Ok(rank_importance(&self.feature_names, &importance))
    }

    /// Explain `rows[row_index]` against `rows` as background, using the
    /// default [`ExplainConfig`].
    pub fn explain_instance(
        &self,
        rows: &[FeatureVector],
        row_index: usize,
    ) -> Result<AttributionRecord> {
        self.explain_instance_with(rows, row_index, &ExplainConfig::default())
    }

    /// Explain `rows[row_index]` with an explicit background cap.
    ///
    /// Contributions are reported in the bundle's feature order and sum with
    /// the base value to the model output.
    ///
    /// # Errors
    ///
    /// - [`PdwellError::Inference`] if `row_index` is out of range or a row
    ///   cannot be aligned
    /// - [`PdwellError::ExplanationUnavailable`] if the classifier has no
    ///   local attribution
    pub fn explain_instance_with(
        &self,
        rows: &[FeatureVector],
        row_index: usize,
        config: &ExplainConfig,
    ) -> Result<AttributionRecord> {
        if row_index >= rows.len() {
            return Err(PdwellError::Inference(format!(
                "row index {row_index} out of range for {} rows",
                rows.len()
            )));
        }
        if !self.supports_explanation() {
            return Err(PdwellError::ExplanationUnavailable {
                model: self.pipeline.kind().to_string(),
                reason: "no local attribution support for this classifier".to_string(),
            });
        }

        let x = self.align_rows(rows)?;
        let background = x.select(
            ndarray::Axis(0),
            &background_indices(rows.len(), config.max_background),
        );
        let attribution = self.pipeline.attribute(x.row(row_index), background.view())?;

        let contributions = self
            .feature_names
            .iter()
            .zip(x.row(row_index))
            .zip(attribution.contributions)
            .map(|((feature, &value), contribution)| Contribution {
                feature: feature.clone(),
                value,
                contribution,
            })
            .collect();
        Ok(AttributionRecord {
            row_index,
            model_name: self.model_name.clone(),
            base_value: attribution.base_value,
            output: attribution.output,
            output_space: attribution.output_space,
            contributions,
        })
    }
}

/// Score `rows` with `bundle`. See [`ModelBundle::predict`].
pub fn predict(bundle: &ModelBundle, rows: &[FeatureVector]) -> Result<Vec<Prediction>> {
    bundle.predict(rows)
}

/// Importance ranking of `bundle`. See [`ModelBundle::global_importance`].
pub fn global_importance(bundle: &ModelBundle) -> Result<Vec<FeatureImportance>> {
    bundle.global_importance()
}

/// Attribution of one row. See [`ModelBundle::explain_instance`].
pub fn explain_instance(
    bundle: &ModelBundle,
    rows: &[FeatureVector],
    row_index: usize,
) -> Result<AttributionRecord> {
    bundle.explain_instance(rows, row_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::{ClassifierKind, GradientBoosting, LogisticRegression, SvmClassifier};
    use crate::types::OutputSpace;
    use ndarray::array;

    fn names() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    fn training() -> (Array2<f64>, Vec<u8>) {
        let x = array![
            [0.0, 1.0],
            [0.5, 0.8],
            [1.0, 1.2],
            [1.5, 0.9],
            [4.0, 1.1],
            [4.5, 0.7],
            [5.0, 1.0],
            [5.5, 1.3]
        ];
        (x, vec![0, 0, 0, 0, 1, 1, 1, 1])
    }

    fn bundle(classifier: ClassifierKind) -> ModelBundle {
        let (x, y) = training();
        let mut pipeline = ModelPipeline::new(classifier).with_scaler();
        pipeline.fit(x.view(), &y, 0).unwrap();
        ModelBundle::new("Test", "v1", names(), pipeline, None).unwrap()
    }

    fn rows() -> Vec<FeatureVector> {
        vec![
            FeatureVector::from_pairs([("b", 1.0), ("a", 0.2)]),
            FeatureVector::from_pairs([("a", 5.2), ("b", 1.0), ("name", 3.0)]),
        ]
    }

    #[test]
    fn test_new_rejects_width_mismatch() {
        let (x, y) = training();
        let mut pipeline =
            ModelPipeline::new(ClassifierKind::LogisticRegression(LogisticRegression::default()));
        pipeline.fit(x.view(), &y, 0).unwrap();
        let err = ModelBundle::new("Test", "v1", vec!["a".to_string()], pipeline, None).unwrap_err();
        assert!(matches!(err, PdwellError::InvalidData(_)));
    }

    #[test]
    fn test_predict_aligns_by_name() {
        let bundle = bundle(ClassifierKind::LogisticRegression(LogisticRegression::default()));
        let predictions = bundle.predict(&rows()).unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].label, 0);
        assert_eq!(predictions[1].label, 1);
        assert!(predictions.iter().all(|p| p.probability.is_some()));
        assert_eq!(bundle.predict_one(&rows()[1]).unwrap(), predictions[1]);
    }

    #[test]
    fn test_missing_feature_is_an_inference_error() {
        let bundle = bundle(ClassifierKind::LogisticRegression(LogisticRegression::default()));
        let err = bundle
            .predict(&[FeatureVector::from_pairs([("a", 1.0)])])
            .unwrap_err();
        assert!(matches!(err, PdwellError::Inference(_)));
    }

    #[test]
    fn test_importance_availability() {
        let logistic = bundle(ClassifierKind::LogisticRegression(LogisticRegression::default()));
        assert!(matches!(
            logistic.global_importance(),
            Err(PdwellError::ExplanationUnavailable { .. })
        ));

        let boosted = bundle(ClassifierKind::GradientBoosting(
            GradientBoosting::new().n_estimators(10),
        ));
        let ranking = boosted.global_importance().unwrap();
        assert_eq!(ranking[0].feature, "a");
        let total: f64 = ranking.iter().map(|f| f.importance).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_explain_instance() {
        let bundle = bundle(ClassifierKind::LogisticRegression(LogisticRegression::default()));
        let record = bundle.explain_instance(&rows(), 1).unwrap();
        assert_eq!(record.row_index, 1);
        assert_eq!(record.output_space, OutputSpace::LogOdds);
        assert_eq!(record.contributions[0].feature, "a");
        assert_eq!(record.contributions[0].value, 5.2);
        assert!(
            (record.base_value + record.total_contribution() - record.output).abs() < 1e-9
        );

        let err = bundle.explain_instance(&rows(), 2).unwrap_err();
        assert!(matches!(err, PdwellError::Inference(_)));
    }

    #[test]
    fn test_svm_explanation_unavailable() {
        let bundle = bundle(ClassifierKind::Svm(SvmClassifier::default()));
        assert!(!bundle.supports_explanation());
        let err = bundle.explain_instance(&rows(), 0).unwrap_err();
        assert!(matches!(err, PdwellError::ExplanationUnavailable { .. }));
    }
}
