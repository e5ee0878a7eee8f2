//! Error types for the pdwell-learning crate.
//!
//! This module defines [`PdwellError`], the error type used throughout the
//! crate. All public API functions return [`Result<T>`](Result).
//!
//! # Taxonomy
//!
//! Variants fall into a handful of families so that callers (the CLI, the web
//! application) can react to the family instead of every variant:
//!
//! - **Data errors**: the dataset is missing, malformed, has missing values or
//!   cannot support a stratified split. Fatal for training.
//! - **Candidate errors**: one candidate pipeline failed to fit or score. These
//!   are recorded in the training summary and never abort a run.
//! - **No viable model**: every candidate failed. Fatal, nothing is written.
//! - **Artifact missing**: inference was requested before any training run.
//! - **Explanation unavailable**: the loaded classifier type has no native
//!   importance or local attribution support.
//!
//! Errors are serializable as `{code, message}` so that the surrounding
//! application can forward them to its UI verbatim.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// URL of the public voice-measurement dataset the pipeline is designed for.
pub const DATASET_SOURCE_URL: &str = "https://archive.ics.uci.edu/ml/datasets/parkinsons";

/// The main error type for pdwell-learning operations.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PdwellError {
    /// Invalid configuration provided to the pipeline.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The training dataset file does not exist.
    #[error(
        "Dataset not found at '{path}'. Download the voice measurement dataset from \
         https://archive.ics.uci.edu/ml/datasets/parkinsons and save it as '{path}'"
    )]
    DatasetNotFound {
        /// The path that was expected to contain the dataset.
        path: String,
    },

    /// The dataset is malformed: non-numeric features, bad labels, non-finite values.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Feature columns contain missing values. No imputation is performed.
    #[error("Dataset contains {count} missing feature values; refusing to train on incomplete data")]
    MissingValues {
        /// Total number of missing cells across all feature columns.
        count: usize,
    },

    /// The label column was not found in the dataset.
    #[error("Target column '{0}' not found")]
    TargetNotFound(String),

    /// Only one class is present in the label column.
    #[error("Label column contains only class {present}; both classes 0 and 1 are required")]
    SingleClass {
        /// The single label value observed.
        present: u8,
    },

    /// A class has too few samples for a stratified split followed by k-fold CV.
    #[error(
        "Class {class} has {count} samples; at least {required} are required for a stratified \
         hold-out split with {folds}-fold cross-validation"
    )]
    InsufficientSamples {
        /// The under-represented class.
        class: u8,
        /// Number of samples observed for that class.
        count: usize,
        /// Minimum number of samples needed.
        required: usize,
        /// Number of cross-validation folds configured.
        folds: usize,
    },

    /// A single candidate pipeline failed to fit or score.
    ///
    /// Never propagated out of [`Pipeline::train`](crate::Pipeline::train); it is
    /// recorded against the candidate and the run continues.
    #[error("Candidate '{name}' failed: {reason}")]
    CandidateFailed {
        /// Candidate name, e.g. `"RandomForest"`.
        name: String,
        /// Human-readable failure cause.
        reason: String,
    },

    /// Every candidate failed. No artifact was written.
    #[error("No candidate model trained successfully ({})", format_failures(.failures))]
    NoViableModel {
        /// `(candidate, reason)` for each failed candidate.
        failures: Vec<(String, String)>,
    },

    /// No trained model artifact exists yet.
    #[error("Model not found at '{path}'. Run training first (`pdwell train`)")]
    ArtifactMissing {
        /// The model file path that was looked up.
        path: String,
    },

    /// The classifier does not support the requested importance or attribution.
    #[error("Explanation unavailable for {model}: {reason}")]
    ExplanationUnavailable {
        /// Classifier kind, e.g. `"svm_rbf"`.
        model: String,
        /// Why the explanation cannot be produced.
        reason: String,
    },

    /// Scoring failed: misaligned features, out-of-range row index, unfitted model.
    #[error("Inference error: {0}")]
    Inference(String),

    /// Training was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Training cancelled")]
    Cancelled,

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper (CSV parsing, column casts).
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_failures(failures: &[(String, String)]) -> String {
    if failures.is_empty() {
        return "no candidates were registered".to_string();
    }
    failures
        .iter()
        .map(|(name, reason)| format!("{name}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl PdwellError {
    /// Get error code for frontend handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::DatasetNotFound { .. } => "DATASET_NOT_FOUND",
            Self::InvalidData(_) => "INVALID_DATA",
            Self::MissingValues { .. } => "MISSING_VALUES",
            Self::TargetNotFound(_) => "TARGET_NOT_FOUND",
            Self::SingleClass { .. } => "SINGLE_CLASS",
            Self::InsufficientSamples { .. } => "INSUFFICIENT_SAMPLES",
            Self::CandidateFailed { .. } => "CANDIDATE_FAILED",
            Self::NoViableModel { .. } => "NO_VIABLE_MODEL",
            Self::ArtifactMissing { .. } => "ARTIFACT_MISSING",
            Self::ExplanationUnavailable { .. } => "EXPLANATION_UNAVAILABLE",
            Self::Inference(_) => "INFERENCE_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
        }
    }

    /// Returns `true` for the data-quality family of errors.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::DatasetNotFound { .. }
                | Self::InvalidData(_)
                | Self::MissingValues { .. }
                | Self::TargetNotFound(_)
                | Self::SingleClass { .. }
                | Self::InsufficientSamples { .. }
                | Self::Polars(_)
        )
    }

    /// Returns `true` when the application can degrade gracefully instead of failing.
    ///
    /// A missing artifact or an unsupported explanation should turn into a
    /// "prediction unavailable" message in the UI, not a crash.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ArtifactMissing { .. }
                | Self::ExplanationUnavailable { .. }
                | Self::Cancelled
                | Self::CandidateFailed { .. }
        )
    }

    /// Check if this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for PdwellError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PdwellError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pdwell-learning operations.
pub type Result<T> = std::result::Result<T, PdwellError>;
