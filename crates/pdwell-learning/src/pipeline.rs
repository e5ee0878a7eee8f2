//! Training pipeline implementation.
//!
//! This module provides the [`Pipeline`] struct and its builder for running
//! a training run. The pipeline loads the dataset, trains every registered
//! candidate, selects the winner and persists it.
//!
//! # Overview
//!
//! The training pipeline executes these stages in order:
//!
//! 1. **Loading** - Read and validate the labelled CSV
//! 2. **Splitting** - Stratified hold-out split with the configured seed
//! 3. **Training** - Fit each candidate, score it with stratified k-fold CV
//!    on the training split and evaluate it on the held-out split
//! 4. **Selection** - Pick the highest mean CV accuracy; the first candidate
//!    in registry order wins ties
//! 5. **Persisting** - Write the bundle atomically into the models directory
//!    and the optional backup directory
//!
//! # Example
//!
//! ```rust,ignore
//! use pdwell_learning::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::builder()
//!     .data_path("data/parkinsons.csv")
//!     .models_dir("models")
//!     .build()?;
//!
//! let pipeline = Pipeline::builder()
//!     .config(config)
//!     .on_progress(|update| {
//!         println!("[{:?}] {:.0}% - {}", update.stage, update.progress * 100.0, update.message);
//!     })
//!     .build()?;
//!
//! let report = pipeline.train()?;
//! println!("Best model: {} (cv {:.4})", report.summary.best_model, report.summary.best_cv_score);
//! ```
//!
//! # Thread Safety
//!
//! [`Pipeline`] is `Send + Sync`. Candidates are fitted in parallel on a
//! dedicated rayon pool sized by [`PipelineConfig::n_jobs`]; every candidate
//! seeds its own RNG, so results do not depend on the thread count.

use ndarray::{Array2, Axis};
use rayon::prelude::*;
use static_assertions::assert_impl_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::artifact::write_bundle;
use crate::cancellation::CancellationToken;
use crate::candidates::{CandidateFactory, available_candidates};
use crate::config::PipelineConfig;
use crate::data::{Dataset, load_csv};
use crate::error::{PdwellError, Result};
use crate::metrics::{accuracy, classification_report, f1_score, mean_std, roc_auc};
use crate::model::ModelBundle;
use crate::progress::{ProgressCallback, ProgressUpdate, TrainingStage};
use crate::split::{StratifiedKFold, check_class_counts, stratified_train_test_split};
use crate::types::{
    CandidateFailure, DatasetInfo, SplitIndices, TrainingReport, TrainingResult, TrainingSummary,
};

/// The model training pipeline.
///
/// Orchestrates loading, splitting, candidate training, selection and
/// persistence.
///
/// Use [`Pipeline::builder()`] to construct a pipeline with the builder pattern.
///
/// # Lifecycle
///
/// 1. Create a pipeline with [`Pipeline::builder()`]
/// 2. Call [`train()`](Self::train) to train on the configured CSV, or
///    [`train_dataset()`](Self::train_dataset) with an in-memory [`Dataset`]
/// 3. Use [`TrainingReport::bundle`] directly or reload it with
///    [`load_bundle()`](crate::load_bundle)
pub struct Pipeline {
    config: PipelineConfig,
    candidates: Option<Vec<CandidateFactory>>,
    progress_callback: Option<ProgressCallback>,
    cancellation_token: Option<CancellationToken>,
}

assert_impl_all!(Pipeline: Send, Sync);

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("candidates", &self.candidates)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .field(
                "cancellation_token",
                &self.cancellation_token.as_ref().map(|_| "<token>"),
            )
            .finish()
    }
}

/// Held-out data shared by every candidate.
struct Split {
    x_train: Array2<f64>,
    y_train: Vec<u8>,
    x_test: Array2<f64>,
    y_test: Vec<u8>,
}

impl Pipeline {
    /// Create a new builder for `Pipeline`.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Get the pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load the configured CSV and train on it.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError`] if:
    /// - [`DatasetNotFound`](PdwellError::DatasetNotFound): the CSV does not exist
    /// - [`TargetNotFound`](PdwellError::TargetNotFound), [`MissingValues`](PdwellError::MissingValues)
    ///   or [`InvalidData`](PdwellError::InvalidData): the CSV fails validation
    /// - any error listed on [`train_dataset()`](Self::train_dataset)
    pub fn train(&self) -> Result<TrainingReport> {
        let started = Instant::now();
        let result = self.load().and_then(|dataset| self.run(&dataset, started));
        self.finish(result)
    }

    /// Train on an already loaded dataset.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError`] if:
    /// - [`SingleClass`](PdwellError::SingleClass) or
    ///   [`InsufficientSamples`](PdwellError::InsufficientSamples): the labels
    ///   cannot support the split and the folds
    /// - [`NoViableModel`](PdwellError::NoViableModel): every candidate failed;
    ///   nothing is written
    /// - [`Cancelled`](PdwellError::Cancelled): the cancellation token fired
    /// - I/O or JSON errors while persisting the bundle
    pub fn train_dataset(&self, dataset: &Dataset) -> Result<TrainingReport> {
        let started = Instant::now();
        self.emit(ProgressUpdate::new(
            TrainingStage::Initializing,
            "Starting training",
        ));
        let result = self.run(dataset, started);
        self.finish(result)
    }

    fn emit(&self, update: ProgressUpdate) {
        if let Some(callback) = &self.progress_callback {
            callback(update);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancellation_token {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    fn finish(&self, result: Result<TrainingReport>) -> Result<TrainingReport> {
        match &result {
            Ok(report) => self.emit(ProgressUpdate::complete(format!(
                "Training complete: {} selected",
                report.summary.best_model
            ))),
            Err(PdwellError::Cancelled) => {
                info!("Training cancelled");
                self.emit(ProgressUpdate::cancelled());
            }
            Err(e) => {
                warn!("Training failed: {e}");
                self.emit(ProgressUpdate::failed(e.to_string()));
            }
        }
        result
    }

    fn load(&self) -> Result<Dataset> {
        self.emit(ProgressUpdate::new(
            TrainingStage::Initializing,
            "Starting training",
        ));
        self.check_cancelled()?;
        self.emit(ProgressUpdate::new(
            TrainingStage::Loading,
            format!("Loading {}", self.config.data_path.display()),
        ));
        load_csv(
            &self.config.data_path,
            &self.config.target_column,
            &self.config.id_column,
        )
    }

    fn run(&self, dataset: &Dataset, started: Instant) -> Result<TrainingReport> {
        let config = &self.config;
        check_class_counts(dataset.class_counts(), config.test_size, config.cv_folds)?;
        self.check_cancelled()?;

        self.emit(ProgressUpdate::new(
            TrainingStage::Splitting,
            "Creating stratified train/test split",
        ));
        let (train_idx, test_idx) =
            stratified_train_test_split(dataset.labels(), config.test_size, config.random_seed);
        let (x_train, y_train) = dataset.subset(&train_idx);
        let (x_test, y_test) = dataset.subset(&test_idx);
        info!(
            "Split {} samples into {} train / {} test",
            dataset.n_samples(),
            train_idx.len(),
            test_idx.len()
        );
        let split = Split {
            x_train,
            y_train,
            x_test,
            y_test,
        };
        self.check_cancelled()?;

        let candidates = self.selected_candidates(config);
        let total = candidates.len() as u32;
        self.emit(ProgressUpdate::new(
            TrainingStage::Training,
            format!("Training {total} candidates"),
        ));
        let outcomes = self.train_candidates(&candidates, &split)?;

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (factory, outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(PdwellError::Cancelled) => return Err(PdwellError::Cancelled),
                Err(e) => {
                    warn!("Candidate {} skipped: {e}", factory.name());
                    failures.push(CandidateFailure {
                        name: factory.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        self.check_cancelled()?;

        self.emit(ProgressUpdate::new(
            TrainingStage::Selection,
            "Selecting best model",
        ));
        let winner = select_winner(&results).ok_or_else(|| PdwellError::NoViableModel {
            failures: failures
                .iter()
                .map(|f| (f.name.clone(), f.error.clone()))
                .collect(),
        })?;
        info!(
            "Best model: {} (cv {:.4} ± {:.4}, test accuracy {:.4})",
            winner.name, winner.cv_mean, winner.cv_std, winner.test_accuracy
        );

        let report = classification_report(&split.y_test, &winner.predictions);
        let summary = build_summary(dataset, winner, &results, &failures);
        let bundle = ModelBundle::new(
            winner.name.clone(),
            summary.training_date.clone(),
            dataset.feature_names().to_vec(),
            winner.pipeline.clone(),
            Some(summary.clone()),
        )?;
        self.check_cancelled()?;

        self.emit(ProgressUpdate::new(
            TrainingStage::Persisting,
            format!("Writing artifacts to {}", config.models_dir.display()),
        ));
        let mut artifact_paths = write_bundle(&config.models_dir, &bundle, &report)?;
        if let Some(backup) = &config.backup_dir {
            match write_bundle(backup, &bundle, &report) {
                Ok(paths) => artifact_paths.extend(paths),
                Err(e) => warn!("Backup copy to {} failed: {e}", backup.display()),
            }
        }

        let training_time_seconds = started.elapsed().as_secs_f64();
        info!("Training finished in {training_time_seconds:.2}s");
        Ok(TrainingReport {
            summary,
            results,
            failures,
            classification_report: report,
            split: SplitIndices {
                train: train_idx,
                test: test_idx,
            },
            bundle,
            artifact_paths,
            training_time_seconds,
        })
    }

    /// The candidates of this run, in selection order.
    fn selected_candidates(&self, config: &PipelineConfig) -> Vec<CandidateFactory> {
        match &self.candidates {
            Some(list) => list
                .iter()
                .copied()
                .filter(|f| f.is_available(config))
                .collect(),
            None => available_candidates(config),
        }
    }

    /// Fit every candidate on the pool, returning outcomes in registry order.
    fn train_candidates(
        &self,
        candidates: &[CandidateFactory],
        split: &Split,
    ) -> Result<Vec<Result<TrainingResult>>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_threads())
            .build()
            .map_err(|e| PdwellError::InvalidConfig(format!("thread pool: {e}")))?;
        let total = candidates.len() as u32;
        let completed = AtomicU32::new(0);

        Ok(pool.install(|| {
            candidates
                .par_iter()
                .map(|factory| {
                    let outcome = self.train_candidate(factory, split);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    self.emit(ProgressUpdate::candidate_finished(factory.name(), done, total));
                    outcome
                })
                .collect()
        }))
    }

    fn train_candidate(&self, factory: &CandidateFactory, split: &Split) -> Result<TrainingResult> {
        let name = factory.name();
        let fail = |e: PdwellError| match e {
            PdwellError::Cancelled => PdwellError::Cancelled,
            e @ PdwellError::CandidateFailed { .. } => e,
            other => PdwellError::CandidateFailed {
                name: name.to_string(),
                reason: other.to_string(),
            },
        };
        self.check_cancelled()?;
        debug!("Training candidate {name}");

        let seed = self.config.random_seed;
        let folds = StratifiedKFold::new(self.config.cv_folds)
            .with_seed(seed)
            .split(&split.y_train)
            .map_err(fail)?;

        let mut cv_scores = Vec::with_capacity(folds.len());
        for (fold_train, fold_valid) in &folds {
            self.check_cancelled()?;
            let x_fit = split.x_train.select(Axis(0), fold_train);
            let y_fit: Vec<u8> = fold_train.iter().map(|&i| split.y_train[i]).collect();
            let x_valid = split.x_train.select(Axis(0), fold_valid);
            let y_valid: Vec<u8> = fold_valid.iter().map(|&i| split.y_train[i]).collect();

            let mut pipeline = factory.build(&self.config);
            pipeline.fit(x_fit.view(), &y_fit, seed).map_err(fail)?;
            let predicted = pipeline.predict(x_valid.view()).map_err(fail)?;
            cv_scores.push(accuracy(&y_valid, &predicted));
        }
        let (cv_mean, cv_std) = mean_std(&cv_scores);

        self.check_cancelled()?;
        let mut pipeline = factory.build(&self.config);
        pipeline
            .fit(split.x_train.view(), &split.y_train, seed)
            .map_err(fail)?;
        let predictions = pipeline.predict(split.x_test.view()).map_err(fail)?;
        let probabilities = pipeline
            .predict_proba(split.x_test.view())
            .map_err(fail)?
            .ok_or_else(|| PdwellError::CandidateFailed {
                name: name.to_string(),
                reason: "classifier produces no probabilities".to_string(),
            })?;
        let test_auc =
            roc_auc(&split.y_test, &probabilities).ok_or_else(|| PdwellError::CandidateFailed {
                name: name.to_string(),
                reason: "ROC AUC is undefined on the held-out split".to_string(),
            })?;
        let test_accuracy = accuracy(&split.y_test, &predictions);
        let test_f1 = f1_score(&split.y_test, &predictions);

        info!(
            "{name}: cv {cv_mean:.4} ± {cv_std:.4}, test accuracy {test_accuracy:.4}, \
             f1 {test_f1:.4}, auc {test_auc:.4}"
        );
        Ok(TrainingResult {
            name: name.to_string(),
            pipeline,
            cv_scores,
            cv_mean,
            cv_std,
            test_accuracy,
            test_f1,
            test_auc,
            predictions,
            probabilities,
        })
    }
}

/// Highest mean CV accuracy; the earliest candidate wins ties.
fn select_winner(results: &[TrainingResult]) -> Option<&TrainingResult> {
    results.iter().fold(None, |best, r| match best {
        Some(b) if r.cv_mean <= b.cv_mean => Some(b),
        _ => Some(r),
    })
}

fn build_summary(
    dataset: &Dataset,
    winner: &TrainingResult,
    results: &[TrainingResult],
    failures: &[CandidateFailure],
) -> TrainingSummary {
    let [healthy, affected] = dataset.class_counts();
    TrainingSummary {
        training_date: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        best_model: winner.name.clone(),
        best_cv_score: winner.cv_mean,
        dataset_info: DatasetInfo {
            total_samples: dataset.n_samples(),
            features: dataset.n_features(),
            feature_names: dataset.feature_names().to_vec(),
            class_distribution: BTreeMap::from([
                ("0".to_string(), healthy),
                ("1".to_string(), affected),
            ]),
        },
        model_performance: results
            .iter()
            .map(|r| (r.name.clone(), r.performance()))
            .collect(),
        failed_models: failures
            .iter()
            .map(|f| (f.name.clone(), f.error.clone()))
            .collect(),
    }
}

/// Builder for [`Pipeline`].
///
/// Created via [`Pipeline::builder()`]. Use method chaining to configure
/// the pipeline, then call [`build()`](Self::build) to create the pipeline.
///
/// # Required Configuration
///
/// - [`config()`](Self::config): Pipeline configuration (required)
///
/// # Optional Configuration
///
/// - [`candidates()`](Self::candidates): Candidate list replacing the registry
/// - [`on_progress()`](Self::on_progress): Progress callback for monitoring
/// - [`cancellation_token()`](Self::cancellation_token): Token for cancellation
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    candidates: Option<Vec<CandidateFactory>>,
    progress_callback: Option<ProgressCallback>,
    cancellation_token: Option<CancellationToken>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("config", &self.config)
            .field("candidates", &self.candidates)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .field(
                "cancellation_token",
                &self.cancellation_token.as_ref().map(|_| "<token>"),
            )
            .finish()
    }
}

impl PipelineBuilder {
    /// Set the pipeline configuration (required).
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the registered candidates (optional).
    ///
    /// The list order is the tie-break order for selection. Defaults to
    /// [`available_candidates()`](crate::candidates::available_candidates).
    #[must_use]
    pub fn candidates(mut self, candidates: Vec<CandidateFactory>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    /// Set the progress callback (optional).
    ///
    /// The callback receives [`ProgressUpdate`]s during training. Candidate
    /// updates arrive from rayon worker threads.
    ///
    /// # Note
    ///
    /// The callback should execute quickly to avoid blocking training.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(std::sync::Arc::new(callback));
        self
    }

    /// Set the cancellation token (optional).
    ///
    /// The token is checked between stages, between candidates and between
    /// cross-validation folds.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Build the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError::InvalidConfig`] if no configuration was provided
    /// or the candidate list is empty.
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config.ok_or_else(|| {
            PdwellError::InvalidConfig("Pipeline config is required".to_string())
        })?;
        if self.candidates.as_ref().is_some_and(Vec::is_empty) {
            return Err(PdwellError::InvalidConfig(
                "candidate list must not be empty".to_string(),
            ));
        }

        Ok(Pipeline {
            config,
            candidates: self.candidates,
            progress_callback: self.progress_callback,
            cancellation_token: self.cancellation_token,
        })
    }
}
