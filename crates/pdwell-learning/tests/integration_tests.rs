//! Integration tests for training, persistence and serving.
//!
//! Every test trains on seeded synthetic data written to a temporary
//! directory, so the suite needs no fixtures.

use pdwell_learning::artifact::{
    CLASSIFICATION_REPORT_FILE, FEATURE_NAMES_FILE, MODEL_FILE, SCALER_FILE, TRAINING_RESULTS_FILE,
    VERSION_FILE,
};
use pdwell_learning::candidates::{CandidateFactory, registry};
use pdwell_learning::estimators::{
    ClassifierKind, GradientBoosting, LogisticRegression, ModelPipeline, RandomForest,
    SvmClassifier,
};
use pdwell_learning::{
    BundleCache, CancellationToken, Dataset, FeatureVector, ModelBundle, PdwellError, Pipeline,
    PipelineConfig, TrainingReport, TrainingStage, explain_instance, global_importance,
    load_bundle, predict, synthetic,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::{Arc, Mutex};

// ============================================================================
// Helper Functions
// ============================================================================

fn config(models_dir: &Path) -> PipelineConfig {
    PipelineConfig::builder()
        .models_dir(models_dir)
        .n_jobs(2)
        .build()
        .unwrap()
}

fn train(dataset: &Dataset, models_dir: &Path) -> TrainingReport {
    Pipeline::builder()
        .config(config(models_dir))
        .build()
        .unwrap()
        .train_dataset(dataset)
        .unwrap()
}

fn balanced_200() -> Dataset {
    synthetic::generate(100, 100, 42).unwrap()
}

fn test_rows(dataset: &Dataset, report: &TrainingReport) -> Vec<FeatureVector> {
    report
        .split
        .test
        .iter()
        .map(|&i| dataset.row(i).unwrap())
        .collect()
}

// ============================================================================
// Training
// ============================================================================

#[test]
fn test_train_balanced_dataset_end_to_end() {
    let dataset = balanced_200();
    let dir = tempfile::tempdir().unwrap();
    let report = train(&dataset, dir.path());

    let winner = report.winner().expect("a winner is selected");
    let best = report
        .results
        .iter()
        .map(|r| r.cv_mean)
        .fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(winner.cv_mean, best);
    assert_eq!(report.summary.best_cv_score, best);
    assert_eq!(report.split.test.len(), 40);
    assert_eq!(report.split.train.len(), 160);

    for file in [
        MODEL_FILE,
        SCALER_FILE,
        FEATURE_NAMES_FILE,
        TRAINING_RESULTS_FILE,
        CLASSIFICATION_REPORT_FILE,
        VERSION_FILE,
    ] {
        assert!(dir.path().join(file).exists(), "{file} missing");
    }
    assert_eq!(report.classification_report.accuracy, winner.test_accuracy);
    assert_eq!(
        report.summary.model_performance.len() + report.summary.failed_models.len(),
        report.results.len() + report.failures.len()
    );
}

#[test]
fn test_persisted_feature_list_matches_input() {
    let dataset = balanced_200();
    let dir = tempfile::tempdir().unwrap();
    train(&dataset, dir.path());

    let raw = std::fs::read_to_string(dir.path().join(FEATURE_NAMES_FILE)).unwrap();
    let names: Vec<String> = serde_json::from_str(&raw).unwrap();
    assert_eq!(names, dataset.feature_names());

    let bundle = load_bundle(dir.path()).unwrap();
    assert_eq!(bundle.feature_names(), dataset.feature_names());
    assert_eq!(bundle.summary().unwrap().dataset_info.feature_names, names);
}

#[test]
fn test_cv_scores_are_reproducible_across_thread_counts() {
    let dataset = synthetic::generate(40, 40, 9).unwrap();
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();

    let first = train(&dataset, first_dir.path());
    let second = Pipeline::builder()
        .config(
            PipelineConfig::builder()
                .models_dir(second_dir.path())
                .n_jobs(1)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
        .train_dataset(&dataset)
        .unwrap();

    let scores = |r: &TrainingReport| {
        r.results
            .iter()
            .map(|c| (c.name.clone(), c.cv_scores.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(scores(&first), scores(&second));
    assert_eq!(first.summary.best_model, second.summary.best_model);
    assert_eq!(first.split, second.split);
}

#[test]
fn test_single_class_dataset_is_a_data_error() {
    let dataset = synthetic::generate(0, 30, 4).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let err = Pipeline::builder()
        .config(config(dir.path()))
        .build()
        .unwrap()
        .train_dataset(&dataset)
        .unwrap_err();

    assert!(matches!(err, PdwellError::SingleClass { present: 1 }));
    assert!(err.is_data_error());
    assert!(!dir.path().join(MODEL_FILE).exists());
}

#[test]
fn test_train_from_csv() {
    let dataset = synthetic::generate(30, 30, 12).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("voice.csv");
    dataset.write_csv(&csv, "name", "status").unwrap();

    let models = dir.path().join("models");
    let config = PipelineConfig::builder()
        .data_path(&csv)
        .models_dir(&models)
        .build()
        .unwrap();
    let report = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .train()
        .unwrap();

    assert_eq!(report.summary.dataset_info.total_samples, 60);
    assert_eq!(report.summary.dataset_info.features, 22);
    assert!(!report
        .summary
        .dataset_info
        .feature_names
        .iter()
        .any(|n| n == "name" || n == "status"));
    assert!(models.join(MODEL_FILE).exists());
}

#[test]
fn test_backup_dir_receives_a_copy() {
    let dataset = synthetic::generate(30, 30, 13).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let primary = dir.path().join("models");
    let backup = dir.path().join("backup");
    let config = PipelineConfig::builder()
        .models_dir(&primary)
        .backup_dir(&backup)
        .build()
        .unwrap();
    let report = Pipeline::builder()
        .config(config)
        .build()
        .unwrap()
        .train_dataset(&dataset)
        .unwrap();

    let from_primary = load_bundle(&primary).unwrap();
    let from_backup = load_bundle(&backup).unwrap();
    assert_eq!(from_primary.version(), from_backup.version());
    assert_eq!(from_primary.version(), report.summary.training_date);
    assert!(report.artifact_paths.iter().any(|p| p.starts_with(&backup)));
}

#[test]
fn test_cancel_during_training_writes_nothing() {
    let dataset = synthetic::generate(30, 30, 21).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let trigger = token.clone();
    let stages = Arc::new(Mutex::new(Vec::new()));
    let seen = stages.clone();

    let pipeline = Pipeline::builder()
        .config(config(dir.path()))
        .cancellation_token(token)
        .on_progress(move |update| {
            if update.models_completed.is_some() {
                trigger.cancel();
            }
            seen.lock().unwrap().push(update.stage);
        })
        .build()
        .unwrap();

    let err = pipeline.train_dataset(&dataset).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(stages.lock().unwrap().last(), Some(&TrainingStage::Cancelled));
    assert!(!dir.path().join(MODEL_FILE).exists());
}

fn broken_svm(_: &PipelineConfig) -> ModelPipeline {
    ModelPipeline::new(ClassifierKind::Svm(SvmClassifier::new(0.0))).with_scaler()
}

fn broken_logistic(_: &PipelineConfig) -> ModelPipeline {
    ModelPipeline::new(ClassifierKind::LogisticRegression(LogisticRegression::new(-1.0)))
        .with_scaler()
}

fn registered(name: &str) -> CandidateFactory {
    registry()
        .into_iter()
        .find(|f| f.name() == name)
        .unwrap()
}

#[test]
fn test_failed_candidate_is_reported_and_skipped() {
    let dataset = synthetic::generate(30, 30, 5).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let report = Pipeline::builder()
        .config(config(dir.path()))
        .candidates(vec![
            CandidateFactory::new("BrokenSvm", broken_svm),
            registered("LogisticRegression"),
        ])
        .build()
        .unwrap()
        .train_dataset(&dataset)
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "BrokenSvm");
    assert!(report.failures[0].error.contains("C must be positive"));
    assert_eq!(report.summary.best_model, "LogisticRegression");
    assert!(report.summary.failed_models.contains_key("BrokenSvm"));
    assert!(!report.summary.model_performance.contains_key("BrokenSvm"));

    let reloaded = load_bundle(dir.path()).unwrap();
    assert_eq!(reloaded.model_name(), "LogisticRegression");
    assert!(
        reloaded
            .summary()
            .unwrap()
            .failed_models
            .contains_key("BrokenSvm")
    );
}

#[test]
fn test_no_viable_model_keeps_previous_bundle() {
    let dataset = synthetic::generate(30, 30, 6).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let previous = Pipeline::builder()
        .config(config(dir.path()))
        .candidates(vec![registered("LogisticRegression")])
        .build()
        .unwrap()
        .train_dataset(&dataset)
        .unwrap();
    let model_before = std::fs::read(dir.path().join(MODEL_FILE)).unwrap();
    let summary_before = std::fs::read(dir.path().join(TRAINING_RESULTS_FILE)).unwrap();

    let err = Pipeline::builder()
        .config(config(dir.path()))
        .candidates(vec![
            CandidateFactory::new("BrokenSvm", broken_svm),
            CandidateFactory::new("BrokenLogistic", broken_logistic),
        ])
        .build()
        .unwrap()
        .train_dataset(&dataset)
        .unwrap_err();

    match &err {
        PdwellError::NoViableModel { failures } => {
            let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
            assert_eq!(names, vec!["BrokenSvm", "BrokenLogistic"]);
        }
        other => panic!("expected NoViableModel, got {other:?}"),
    }
    assert_eq!(std::fs::read(dir.path().join(MODEL_FILE)).unwrap(), model_before);
    assert_eq!(
        std::fs::read(dir.path().join(TRAINING_RESULTS_FILE)).unwrap(),
        summary_before
    );
    assert_eq!(
        load_bundle(dir.path()).unwrap().version(),
        previous.summary.training_date
    );
}

#[test]
fn test_empty_candidate_list_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = Pipeline::builder()
        .config(config(dir.path()))
        .candidates(Vec::new())
        .build()
        .unwrap_err();
    assert!(matches!(err, PdwellError::InvalidConfig(_)));
}

// ============================================================================
// Serving
// ============================================================================

#[test]
fn test_reloaded_bundle_reproduces_held_out_predictions() {
    let dataset = balanced_200();
    let dir = tempfile::tempdir().unwrap();
    let report = train(&dataset, dir.path());
    let winner = report.winner().unwrap();

    let bundle = load_bundle(dir.path()).unwrap();
    assert_eq!(bundle.model_name(), winner.name);
    let predictions = predict(&bundle, &test_rows(&dataset, &report)).unwrap();

    assert_eq!(predictions.len(), winner.predictions.len());
    let labels: Vec<u8> = predictions.iter().map(|p| p.label).collect();
    assert_eq!(labels, winner.predictions);
    for (prediction, expected) in predictions.iter().zip(&winner.probabilities) {
        let probability = prediction.probability.unwrap();
        assert!((probability - expected).abs() < 1e-9);
    }
}

#[test]
fn test_predictions_keep_input_order_and_ranges() {
    let dataset = synthetic::generate(40, 40, 5).unwrap();
    let dir = tempfile::tempdir().unwrap();
    train(&dataset, dir.path());
    let bundle = load_bundle(dir.path()).unwrap();

    let rows = dataset.rows();
    let all = bundle.predict(&rows).unwrap();
    assert_eq!(all.len(), rows.len());
    for p in &all {
        assert!(p.label <= 1);
        let probability = p.probability.unwrap();
        assert!((0.0..=1.0).contains(&probability));
    }

    // Scoring rows one at a time gives the same answers in the same order
    let one_by_one: Vec<_> = rows
        .iter()
        .map(|row| bundle.predict_one(row).unwrap())
        .collect();
    assert_eq!(one_by_one, all);

    let reversed: Vec<FeatureVector> = rows.iter().rev().cloned().collect();
    let mut back = bundle.predict(&reversed).unwrap();
    back.reverse();
    assert_eq!(back, all);

    assert!(bundle.predict(&[]).unwrap().is_empty());
}

#[test]
fn test_features_are_realigned_by_name() {
    let dataset = synthetic::generate(30, 30, 6).unwrap();
    let dir = tempfile::tempdir().unwrap();
    train(&dataset, dir.path());
    let bundle = load_bundle(dir.path()).unwrap();

    let row = dataset.row(7).unwrap();
    let mut pairs: Vec<(String, f64)> = row.iter().map(|(n, v)| (n.to_string(), v)).collect();
    pairs.reverse();
    pairs.push(("name".to_string(), 0.0));
    pairs.push(("unrelated".to_string(), 123.0));
    let permuted = FeatureVector::from_pairs(pairs);

    assert_eq!(
        bundle.predict_one(&permuted).unwrap(),
        bundle.predict_one(&row).unwrap()
    );
}

#[test]
fn test_missing_feature_is_an_inference_error() {
    let dataset = synthetic::generate(30, 30, 6).unwrap();
    let dir = tempfile::tempdir().unwrap();
    train(&dataset, dir.path());
    let bundle = load_bundle(dir.path()).unwrap();

    let partial = FeatureVector::from_pairs(
        dataset
            .row(0)
            .unwrap()
            .iter()
            .filter(|(name, _)| *name != "PPE")
            .map(|(n, v)| (n.to_string(), v))
            .collect::<Vec<_>>(),
    );
    let err = bundle.predict(&[partial]).unwrap_err();
    assert!(matches!(err, PdwellError::Inference(_)));
    assert!(err.to_string().contains("PPE"));
}

fn fitted_bundle(dataset: &Dataset, name: &str, classifier: ClassifierKind) -> ModelBundle {
    let mut pipeline = ModelPipeline::new(classifier).with_scaler();
    pipeline
        .fit(dataset.features().view(), dataset.labels(), 42)
        .unwrap();
    ModelBundle::new(
        name,
        "2026-01-01T00:00:00.000000Z",
        dataset.feature_names().to_vec(),
        pipeline,
        None,
    )
    .unwrap()
}

#[test]
fn test_explanations_are_additive() {
    let dataset = synthetic::generate(25, 25, 15).unwrap();
    let rows = dataset.rows();
    let bundles = [
        fitted_bundle(
            &dataset,
            "RandomForest",
            ClassifierKind::RandomForest(RandomForest::new(20, 4)),
        ),
        fitted_bundle(
            &dataset,
            "GradientBoosting",
            ClassifierKind::GradientBoosting(GradientBoosting::new().n_estimators(20)),
        ),
        fitted_bundle(
            &dataset,
            "LogisticRegression",
            ClassifierKind::LogisticRegression(LogisticRegression::default()),
        ),
    ];

    for bundle in &bundles {
        let record = explain_instance(bundle, &rows, 3).unwrap();
        assert_eq!(record.row_index, 3);
        assert_eq!(record.model_name, bundle.model_name());
        let names: Vec<&str> = record.contributions.iter().map(|c| c.feature.as_str()).collect();
        let expected: Vec<&str> = bundle.feature_names().iter().map(String::as_str).collect();
        assert_eq!(names, expected);
        assert_eq!(record.contributions[0].value, dataset.features()[[3, 0]]);

        let total = record.base_value + record.total_contribution();
        assert!(
            (total - record.output).abs() < 1e-6,
            "{}: {total} != {}",
            bundle.model_name(),
            record.output
        );

        let err = explain_instance(bundle, &rows, rows.len()).unwrap_err();
        assert!(matches!(err, PdwellError::Inference(_)));
    }

    // Tree ensembles rank features, the linear model does not
    assert_eq!(global_importance(&bundles[0]).unwrap().len(), 22);
    assert!(global_importance(&bundles[2]).is_err());
}

#[test]
fn test_svm_bundle_has_no_explanation() {
    let dataset = synthetic::generate(20, 20, 8).unwrap();
    let bundle = fitted_bundle(
        &dataset,
        "SVM_RBF",
        ClassifierKind::Svm(SvmClassifier::default()),
    );

    assert!(!bundle.supports_explanation());
    assert!(!bundle.supports_global_importance());
    let rows = dataset.rows();
    assert!(matches!(
        explain_instance(&bundle, &rows, 0),
        Err(PdwellError::ExplanationUnavailable { .. })
    ));
    assert!(matches!(
        global_importance(&bundle),
        Err(PdwellError::ExplanationUnavailable { .. })
    ));
    // Scoring still works
    assert_eq!(bundle.predict(&rows).unwrap().len(), 40);
}

#[test]
fn test_cache_picks_up_retrain() {
    let dataset = synthetic::generate(30, 30, 14).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cache = BundleCache::new(dir.path());
    assert!(matches!(cache.get(), Err(PdwellError::ArtifactMissing { .. })));

    let first = train(&dataset, dir.path());
    let loaded = cache.get().unwrap();
    assert_eq!(loaded.version(), first.summary.training_date);

    let second = train(&dataset, dir.path());
    assert_ne!(first.summary.training_date, second.summary.training_date);
    let reloaded = cache.get().unwrap();
    assert_eq!(reloaded.version(), second.summary.training_date);
    assert_eq!(loaded.version(), first.summary.training_date);
}
