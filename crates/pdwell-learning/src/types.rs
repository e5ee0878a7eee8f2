//! Common types used throughout the pdwell-learning crate.
//!
//! This module defines result records, metrics, and other data structures
//! returned by the training pipeline and the inference service.
//!
//! # Overview
//!
//! - [`TrainingReport`]: Complete result from [`Pipeline::train()`](crate::Pipeline::train)
//! - [`TrainingResult`]: Per-candidate scores, predictions and fitted pipeline
//! - [`TrainingSummary`]: The JSON summary persisted as `training_results.json`
//! - [`ClassificationReport`]: Per-class precision/recall/F1 of the winner
//! - [`Prediction`]: Result from [`ModelBundle::predict()`](crate::ModelBundle::predict)
//! - [`FeatureImportance`]: One entry of [`ModelBundle::global_importance()`](crate::ModelBundle::global_importance)
//! - [`AttributionRecord`]: Result from [`ModelBundle::explain_instance()`](crate::ModelBundle::explain_instance)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::estimators::ModelPipeline;
use crate::model::ModelBundle;

/// Result of a training pipeline run.
///
/// Returned by [`Pipeline::train()`](crate::Pipeline::train) once the winning
/// pipeline has been selected and persisted.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct TrainingReport {
    /// Summary persisted as `training_results.json`.
    pub summary: TrainingSummary,

    /// Successful candidates, in registry order.
    pub results: Vec<TrainingResult>,

    /// Candidates that failed to fit or score, in registry order.
    pub failures: Vec<CandidateFailure>,

    /// Held-out classification report of the winner.
    pub classification_report: ClassificationReport,

    /// Row indices of the stratified train/test split.
    pub split: SplitIndices,

    /// The bundle that was written to disk.
    pub bundle: ModelBundle,

    /// Every file written, across the primary and backup directories.
    pub artifact_paths: Vec<PathBuf>,

    /// Total wall-clock training time in seconds.
    pub training_time_seconds: f64,
}

impl TrainingReport {
    /// Result record of the selected candidate.
    pub fn winner(&self) -> Option<&TrainingResult> {
        self.results
            .iter()
            .find(|r| r.name == self.summary.best_model)
    }
}

/// Row indices into the input dataset for each side of the hold-out split.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SplitIndices {
    /// Rows used for fitting and cross-validation.
    pub train: Vec<usize>,
    /// Rows used only for the final evaluation.
    pub test: Vec<usize>,
}

/// Per-candidate training record.
///
/// Kept for every successful candidate for reporting; only the winner's
/// pipeline is persisted.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct TrainingResult {
    /// Candidate name, e.g. `"RandomForest"`.
    pub name: String,

    /// Pipeline fitted on the full training split.
    pub pipeline: ModelPipeline,

    /// Accuracy of each cross-validation fold.
    pub cv_scores: Vec<f64>,

    /// Mean cross-validation accuracy. Used to rank candidates.
    pub cv_mean: f64,

    /// Population standard deviation of the fold accuracies.
    pub cv_std: f64,

    /// Accuracy on the held-out split.
    pub test_accuracy: f64,

    /// F1 score of the positive class on the held-out split.
    pub test_f1: f64,

    /// ROC AUC from the class-1 probability on the held-out split.
    pub test_auc: f64,

    /// Predicted labels for the held-out rows, in split order.
    pub predictions: Vec<u8>,

    /// Predicted class-1 probabilities for the held-out rows, in split order.
    pub probabilities: Vec<f64>,
}

impl TrainingResult {
    /// The metrics that go into the persisted summary.
    pub fn performance(&self) -> ModelPerformance {
        ModelPerformance {
            cv_score: self.cv_mean,
            cv_std: self.cv_std,
            test_accuracy: self.test_accuracy,
            test_f1: self.test_f1,
            test_auc: self.test_auc,
        }
    }
}

/// A candidate that raised an error during fitting or scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFailure {
    /// Candidate name.
    pub name: String,
    /// Rendered error message.
    pub error: String,
}

/// Scores of one candidate as persisted in `training_results.json`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    /// Mean cross-validation accuracy.
    pub cv_score: f64,
    /// Population standard deviation of the fold accuracies.
    pub cv_std: f64,
    /// Held-out accuracy.
    pub test_accuracy: f64,
    /// Held-out F1 of the positive class.
    pub test_f1: f64,
    /// Held-out ROC AUC.
    pub test_auc: f64,
}

/// Shape and balance of the training dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Number of rows.
    pub total_samples: usize,
    /// Number of feature columns.
    pub features: usize,
    /// Feature column names, in dataset order.
    pub feature_names: Vec<String>,
    /// Row count per label, keyed `"0"` / `"1"`.
    pub class_distribution: BTreeMap<String, usize>,
}

/// The JSON training summary written next to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// ISO-8601 timestamp of the run. Doubles as the bundle version.
    pub training_date: String,
    /// Name of the winning candidate.
    pub best_model: String,
    /// Mean cross-validation accuracy of the winner.
    pub best_cv_score: f64,
    /// Dataset shape and class balance.
    pub dataset_info: DatasetInfo,
    /// Scores of every successful candidate.
    pub model_performance: BTreeMap<String, ModelPerformance>,
    /// Error message of every failed candidate.
    #[serde(default)]
    pub failed_models: BTreeMap<String, String>,
}

/// Precision, recall, F1 and support for one class (or an average).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: usize,
}

/// Classification report in the familiar `output_dict` layout:
/// `{"0": {..}, "1": {..}, "accuracy": x, "macro avg": {..}, "weighted avg": {..}}`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationReport {
    #[serde(rename = "0")]
    pub healthy: ClassMetrics,
    #[serde(rename = "1")]
    pub affected: ClassMetrics,
    pub accuracy: f64,
    #[serde(rename = "macro avg")]
    pub macro_avg: ClassMetrics,
    #[serde(rename = "weighted avg")]
    pub weighted_avg: ClassMetrics,
}

/// Scoring result for one feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// The classifier's own decision: 0 = healthy, 1 = affected.
    pub label: u8,
    /// Class-1 probability, `None` when the classifier has no probability output.
    pub probability: Option<f64>,
}

/// Coarse impact bucket of a global importance score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Impact {
    High,
    Medium,
    Low,
}

impl Impact {
    /// Display label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Impact::High => "High",
            Impact::Medium => "Medium",
            Impact::Low => "Low",
        }
    }
}

/// One entry of the global importance ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    /// Normalised importance; all entries sum to 1.
    pub importance: f64,
    pub impact: Impact,
}

/// Space in which attributions and the model output are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSpace {
    /// Class-1 probability.
    Probability,
    /// Class-1 log-odds (raw decision value).
    LogOdds,
}

/// Signed contribution of one feature to a single prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub feature: String,
    /// The raw (unscaled) input value.
    pub value: f64,
    /// Positive values push towards the affected class.
    pub contribution: f64,
}

/// Additive per-feature explanation of one scored row.
///
/// `base_value + sum(contributions) == output` up to floating-point error.
/// Contributions are kept in the bundle's feature order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    /// Index of the explained row in the caller's input.
    pub row_index: usize,
    /// Name of the classifier that produced the output.
    pub model_name: String,
    /// Expected model output over the background rows.
    pub base_value: f64,
    /// Model output for the explained row.
    pub output: f64,
    pub output_space: OutputSpace,
    pub contributions: Vec<Contribution>,
}

impl AttributionRecord {
    /// Contributions ordered by absolute value, largest first.
    pub fn sorted_by_magnitude(&self) -> Vec<&Contribution> {
        let mut sorted: Vec<&Contribution> = self.contributions.iter().collect();
        sorted.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        sorted
    }

    /// The `n` largest contributions by absolute value.
    pub fn top(&self, n: usize) -> Vec<&Contribution> {
        let mut sorted = self.sorted_by_magnitude();
        sorted.truncate(n);
        sorted
    }

    /// Sum of all contributions.
    pub fn total_contribution(&self) -> f64 {
        self.contributions.iter().map(|c| c.contribution).sum()
    }
}
