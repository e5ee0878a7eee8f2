//! pdwell-learning: voice-feature risk model training, inference and explanation.
//!
//! This crate trains a binary classifier on sustained-phonation voice
//! measurements (jitter, shimmer, harmonics-to-noise ratio, nonlinear
//! dynamics), persists the winning model as a versioned bundle and serves
//! predictions, global feature importance and per-sample attributions from it.
//!
//! Everything runs natively: the estimators, cross-validation and the
//! attribution engine are implemented on top of `ndarray`, with `polars` for
//! CSV ingestion and `rayon` for parallel training.
//!
//! # Features
//!
//! - **Model Selection**: SVM, random forest, gradient boosting, logistic
//!   regression and (behind `boosting-variants`) regularized boosting,
//!   scored by stratified k-fold cross-validation
//! - **Versioned Bundles**: Atomic JSON artifacts with an ISO-8601 version
//! - **Explainability**: Exact interventional tree SHAP and linear attributions
//! - **Progress Reporting**: Stage callbacks and cooperative cancellation
//! - **Synthetic Data**: Seeded demo datasets matching the real feature set
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use pdwell_learning::{Pipeline, PipelineConfig, FeatureVector, load_bundle};
//!
//! let config = PipelineConfig::builder()
//!     .data_path("data/parkinsons.csv")
//!     .models_dir("models")
//!     .build()?;
//!
//! let pipeline = Pipeline::builder()
//!     .config(config)
//!     .on_progress(|u| println!("{:.0}% - {}", u.progress * 100.0, u.message))
//!     .build()?;
//!
//! let report = pipeline.train()?;
//! println!("winner: {}", report.summary.best_model);
//!
//! let bundle = load_bundle("models")?;
//! let predictions = bundle.predict(&rows)?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Training                                                          │
//! │                                                                   │
//! │  PipelineConfig ──► Pipeline ──► TrainingReport                   │
//! │                        │                                          │
//! │                        ├── candidates (parallel, k-fold CV)       │
//! │                        └── artifact::write_bundle ──► models/     │
//! └──────────────────────────────────────────────────────────────────┘
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Serving                                                           │
//! │                                                                   │
//! │  models/ ──► BundleCache ──► ModelBundle                          │
//! │                                ├── predict                        │
//! │                                ├── global_importance              │
//! │                                └── explain_instance               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T>`], an alias over
//! [`PdwellError`]:
//!
//! - [`PdwellError::DatasetNotFound`] - The training CSV does not exist
//! - [`PdwellError::InvalidData`] - Malformed or single-class data
//! - [`PdwellError::ArtifactMissing`] - No model has been trained yet
//! - [`PdwellError::Inference`] - Inputs do not fit the model
//! - [`PdwellError::ExplanationUnavailable`] - The model cannot be explained
//!
//! See [`PdwellError`] for the complete list.
//!
//! # Thread Safety
//!
//! [`ModelBundle`] is immutable after construction and `Send + Sync`; share it
//! behind an `Arc`. [`BundleCache`] swaps in a new `Arc` when the on-disk
//! version changes, so readers never observe a half-loaded model.
//!
//! # Modules
//!
//! - [`estimators`] - The classifiers, scaler and feature selector
//! - [`candidates`] - The registry of model candidates
//! - [`artifact`] - On-disk bundle layout
//! - [`metrics`] - Classification metrics
//! - [`synthetic`] - Seeded demo data

pub mod artifact;
mod cache;
mod cancellation;
pub mod candidates;
mod config;
mod data;
mod error;
pub mod estimators;
mod explain;
pub mod metrics;
mod model;
mod pipeline;
mod progress;
mod split;
pub mod synthetic;
mod types;

// Re-export public API
//
// Configuration types
pub use config::{
    DEFAULT_DATA_PATH, DEFAULT_MODELS_DIR, ExplainConfig, PipelineConfig, PipelineConfigBuilder,
};
// Cancellation token
pub use cancellation::CancellationToken;
// Error types
pub use error::{PdwellError, Result};
// Data loading
pub use data::{Dataset, FeatureVector, load_csv, read_feature_rows};
// Model types and serving operations
pub use model::{ModelBundle, explain_instance, global_importance, load_bundle, predict};
// Bundle cache
pub use cache::{BundleCache, MODELS_DIR_ENV, global_cache};
// Pipeline types
pub use pipeline::{Pipeline, PipelineBuilder};
// Progress reporting types
pub use progress::{ProgressCallback, ProgressUpdate, TrainingStage};
// Result and report types
pub use types::{
    AttributionRecord, CandidateFailure, ClassMetrics, ClassificationReport, Contribution,
    DatasetInfo, FeatureImportance, Impact, ModelPerformance, OutputSpace, Prediction,
    SplitIndices, TrainingReport, TrainingResult, TrainingSummary,
};
