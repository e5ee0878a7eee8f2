//! Progress reporting types for the training pipeline.
//!
//! This module defines [`TrainingStage`], [`ProgressUpdate`] and the
//! [`ProgressCallback`] type alias used by
//! [`PipelineBuilder::on_progress`](crate::PipelineBuilder::on_progress).
//!
//! # Example
//!
//! ```
//! use pdwell_learning::{Pipeline, PipelineConfig, ProgressUpdate};
//!
//! let pipeline = Pipeline::builder()
//!     .config(PipelineConfig::default())
//!     .on_progress(|update: ProgressUpdate| {
//!         println!("[{}] {:.0}% - {}", update.stage.as_str(), update.progress * 100.0, update.message);
//!     })
//!     .build();
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// The current stage of the training pipeline.
///
/// Training progresses through these stages in order (unless cancelled or failed):
///
/// 1. [`Initializing`](Self::Initializing)
/// 2. [`Loading`](Self::Loading) - reading and validating the dataset
/// 3. [`Splitting`](Self::Splitting) - stratified hold-out split
/// 4. [`Training`](Self::Training) - fitting and cross-validating candidates
/// 5. [`Selection`](Self::Selection) - picking the winner
/// 6. [`Persisting`](Self::Persisting) - writing the artifact bundle
/// 7. [`Complete`](Self::Complete)
///
/// Terminal states: [`Complete`](Self::Complete), [`Failed`](Self::Failed),
/// [`Cancelled`](Self::Cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum TrainingStage {
    /// Pipeline is initializing.
    #[default]
    Initializing,
    /// Dataset is being loaded and validated.
    Loading,
    /// Train/test split is being computed.
    Splitting,
    /// Candidates are being fitted and cross-validated.
    Training,
    /// The best candidate is being selected.
    Selection,
    /// The artifact bundle is being written.
    Persisting,
    /// Training completed successfully.
    Complete,
    /// Training failed.
    Failed,
    /// Training was cancelled.
    Cancelled,
}

impl TrainingStage {
    /// Returns the snake_case name of the stage.
    ///
    /// ```
    /// use pdwell_learning::TrainingStage;
    ///
    /// assert_eq!(TrainingStage::Training.as_str(), "training");
    /// ```
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStage::Initializing => "initializing",
            TrainingStage::Loading => "loading",
            TrainingStage::Splitting => "splitting",
            TrainingStage::Training => "training",
            TrainingStage::Selection => "selection",
            TrainingStage::Persisting => "persisting",
            TrainingStage::Complete => "complete",
            TrainingStage::Failed => "failed",
            TrainingStage::Cancelled => "cancelled",
        }
    }

    /// Returns `true` if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrainingStage::Complete | TrainingStage::Failed | TrainingStage::Cancelled
        )
    }

    /// Overall progress value reported when the stage starts.
    pub(crate) fn base_progress(&self) -> f64 {
        match self {
            TrainingStage::Initializing => 0.0,
            TrainingStage::Loading => 0.05,
            TrainingStage::Splitting => 0.1,
            TrainingStage::Training => 0.15,
            TrainingStage::Selection => 0.85,
            TrainingStage::Persisting => 0.9,
            TrainingStage::Complete | TrainingStage::Failed | TrainingStage::Cancelled => 1.0,
        }
    }
}

/// Error type for parsing a [`TrainingStage`] from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTrainingStageError {
    invalid_value: String,
}

impl ParseTrainingStageError {
    /// Returns the invalid value that caused the parse error.
    #[must_use]
    pub fn invalid_value(&self) -> &str {
        &self.invalid_value
    }
}

impl std::fmt::Display for ParseTrainingStageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid training stage: '{}'. Valid values are: initializing, loading, splitting, \
             training, selection, persisting, complete, failed, cancelled",
            self.invalid_value
        )
    }
}

impl std::error::Error for ParseTrainingStageError {}

impl FromStr for TrainingStage {
    type Err = ParseTrainingStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(TrainingStage::Initializing),
            "loading" => Ok(TrainingStage::Loading),
            "splitting" => Ok(TrainingStage::Splitting),
            "training" => Ok(TrainingStage::Training),
            "selection" => Ok(TrainingStage::Selection),
            "persisting" => Ok(TrainingStage::Persisting),
            "complete" => Ok(TrainingStage::Complete),
            "failed" => Ok(TrainingStage::Failed),
            "cancelled" => Ok(TrainingStage::Cancelled),
            _ => Err(ParseTrainingStageError {
                invalid_value: s.to_string(),
            }),
        }
    }
}

/// A progress update from the training pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressUpdate {
    /// The current training stage.
    pub stage: TrainingStage,

    /// Overall progress from 0.0 to 1.0. Increases monotonically during a run.
    pub progress: f64,

    /// Human-readable status message.
    pub message: String,

    /// Name of the candidate that just finished (training stage only).
    pub current_model: Option<String>,

    /// Number of candidates completed and total: `(completed, total)`.
    pub models_completed: Option<(u32, u32)>,
}

impl ProgressUpdate {
    /// Update at the start of `stage`.
    pub fn new(stage: TrainingStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress: stage.base_progress(),
            message: message.into(),
            current_model: None,
            models_completed: None,
        }
    }

    /// Update emitted after a candidate finished; progress is interpolated
    /// across the training stage.
    pub fn candidate_finished(name: &str, completed: u32, total: u32) -> Self {
        let start = TrainingStage::Training.base_progress();
        let end = TrainingStage::Selection.base_progress();
        let fraction = if total == 0 {
            1.0
        } else {
            f64::from(completed) / f64::from(total)
        };
        Self {
            stage: TrainingStage::Training,
            progress: start + (end - start) * fraction,
            message: format!("Finished {name} ({completed}/{total})"),
            current_model: Some(name.to_string()),
            models_completed: Some((completed, total)),
        }
    }

    /// Terminal success update.
    pub fn complete(message: impl Into<String>) -> Self {
        Self::new(TrainingStage::Complete, message)
    }

    /// Terminal cancellation update.
    pub fn cancelled() -> Self {
        Self::new(TrainingStage::Cancelled, "Training cancelled")
    }

    /// Terminal failure update.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(TrainingStage::Failed, message)
    }
}

/// Type alias for a progress callback function.
///
/// Callbacks must be thread-safe (`Send + Sync`) because candidate updates are
/// emitted from rayon worker threads.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;
