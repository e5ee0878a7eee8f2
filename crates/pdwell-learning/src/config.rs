//! Configuration types for the training pipeline and the explainer.
//!
//! This module provides [`PipelineConfig`] and its builder for configuring
//! a training run, and [`ExplainConfig`] for local attributions.
//!
//! # Example
//!
//! ```
//! use pdwell_learning::PipelineConfig;
//!
//! let config = PipelineConfig::builder()
//!     .data_path("data/parkinsons.csv")
//!     .models_dir("models")
//!     .cv_folds(5)
//!     .test_size(0.2)
//!     .build()
//!     .expect("valid config");
//! ```

use crate::error::PdwellError;
use std::path::PathBuf;

/// Default dataset location, relative to the project root.
pub const DEFAULT_DATA_PATH: &str = "data/parkinsons.csv";

/// Default artifact directory, relative to the project root.
pub const DEFAULT_MODELS_DIR: &str = "models";

/// Configuration for the training pipeline.
///
/// Use [`PipelineConfig::builder()`] to construct a configuration with the builder pattern.
/// Defaults reproduce the reference training script: an 80/20 stratified split,
/// 5-fold stratified cross-validation and seed 42.
///
/// # Validation
///
/// The builder validates the following constraints on [`build()`](PipelineConfigBuilder::build):
/// - `test_size` must be in range `(0.0, 1.0)` (exclusive)
/// - `cv_folds` must be at least 2
/// - `k_best` must be at least 1
/// - `n_jobs` must not be 0
/// - `target_column` and `id_column` must differ
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to the labelled CSV dataset.
    pub data_path: PathBuf,

    /// Canonical artifact directory. The bundle is always written here.
    pub models_dir: PathBuf,

    /// Optional secondary directory the bundle is replicated into.
    pub backup_dir: Option<PathBuf>,

    /// Name of the binary label column (default: `"status"`).
    pub target_column: String,

    /// Name of the identifier column dropped before training (default: `"name"`).
    ///
    /// The column is optional in the dataset; it is dropped only when present.
    pub id_column: String,

    /// Fraction of data held out for the final test evaluation (default: 0.2).
    pub test_size: f64,

    /// Number of stratified cross-validation folds (default: 5).
    pub cv_folds: usize,

    /// Random seed shared by the split, the folds and every candidate (default: 42).
    pub random_seed: u64,

    /// Number of features kept by the univariate selection stage of the SVM candidate (default: 15).
    ///
    /// Clamped to the number of available features at fit time.
    pub k_best: usize,

    /// Number of worker threads for candidate fitting (default: -1 for all cores).
    ///
    /// - `-1`: Use all available CPU cores
    /// - `1`: Single-threaded (useful for debugging)
    /// - `n > 1`: Use exactly `n` threads
    pub n_jobs: i32,

    /// Whether optional boosting variants are added to the candidate set (default: true).
    ///
    /// Has no effect when the crate is built without the `boosting-variants` feature.
    pub enable_boosting_variants: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            models_dir: PathBuf::from(DEFAULT_MODELS_DIR),
            backup_dir: None,
            target_column: "status".to_string(),
            id_column: "name".to_string(),
            test_size: 0.2,
            cv_folds: 5,
            random_seed: 42,
            k_best: 15,
            n_jobs: -1,
            enable_boosting_variants: true,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Number of rayon worker threads implied by `n_jobs`.
    pub(crate) fn worker_threads(&self) -> usize {
        if self.n_jobs < 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.n_jobs as usize
        }
    }
}

/// Builder for [`PipelineConfig`].
///
/// Created via [`PipelineConfig::builder()`]. All setters return `self` to allow
/// method chaining.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the dataset path.
    #[must_use]
    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_path = path.into();
        self
    }

    /// Set the canonical artifact directory.
    #[must_use]
    pub fn models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.models_dir = dir.into();
        self
    }

    /// Set a backup directory the bundle is replicated into.
    #[must_use]
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.backup_dir = Some(dir.into());
        self
    }

    /// Set the label column name.
    #[must_use]
    pub fn target_column(mut self, column: impl Into<String>) -> Self {
        self.config.target_column = column.into();
        self
    }

    /// Set the identifier column name.
    #[must_use]
    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.config.id_column = column.into();
        self
    }

    /// Set the test size fraction (default: 0.2).
    ///
    /// [`build()`](Self::build) returns an error if `size <= 0.0` or `size >= 1.0`.
    #[must_use]
    pub fn test_size(mut self, size: f64) -> Self {
        self.config.test_size = size;
        self
    }

    /// Set the number of cross-validation folds (default: 5).
    ///
    /// [`build()`](Self::build) returns an error if `folds < 2`.
    #[must_use]
    pub fn cv_folds(mut self, folds: usize) -> Self {
        self.config.cv_folds = folds;
        self
    }

    /// Set the random seed for reproducibility (default: 42).
    #[must_use]
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = seed;
        self
    }

    /// Set the number of features kept by univariate selection (default: 15).
    #[must_use]
    pub fn k_best(mut self, k: usize) -> Self {
        self.config.k_best = k;
        self
    }

    /// Set the number of parallel jobs (default: -1 for all cores).
    #[must_use]
    pub fn n_jobs(mut self, jobs: i32) -> Self {
        self.config.n_jobs = jobs;
        self
    }

    /// Enable or disable the optional boosting variants (default: true).
    #[must_use]
    pub fn enable_boosting_variants(mut self, enable: bool) -> Self {
        self.config.enable_boosting_variants = enable;
        self
    }

    /// Build the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError::InvalidConfig`] if any constraint listed on
    /// [`PipelineConfig`] is violated.
    pub fn build(self) -> Result<PipelineConfig, PdwellError> {
        if self.config.test_size <= 0.0 || self.config.test_size >= 1.0 {
            return Err(PdwellError::InvalidConfig(
                "test_size must be between 0.0 and 1.0 (exclusive)".to_string(),
            ));
        }

        if self.config.cv_folds < 2 {
            return Err(PdwellError::InvalidConfig(
                "cv_folds must be at least 2".to_string(),
            ));
        }

        if self.config.k_best == 0 {
            return Err(PdwellError::InvalidConfig(
                "k_best must be at least 1".to_string(),
            ));
        }

        if self.config.n_jobs == 0 {
            return Err(PdwellError::InvalidConfig(
                "n_jobs must be -1 or a positive thread count".to_string(),
            ));
        }

        if self.config.target_column == self.config.id_column {
            return Err(PdwellError::InvalidConfig(format!(
                "target_column and id_column must differ (both are '{}')",
                self.config.target_column
            )));
        }

        Ok(self.config)
    }
}

/// Configuration for local (per-instance) explanations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplainConfig {
    /// Maximum number of background rows used by the explainer (default: 100).
    ///
    /// Cost grows linearly with the background size, so larger uploads are
    /// subsampled with an even stride.
    pub max_background: usize,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            max_background: 100,
        }
    }
}

impl ExplainConfig {
    /// Create a config with the given background cap (at least 1).
    #[must_use]
    pub fn with_max_background(max_background: usize) -> Self {
        Self {
            max_background: max_background.max(1),
        }
    }
}
