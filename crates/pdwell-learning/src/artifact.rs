//! On-disk layout of a trained bundle.
//!
//! A models directory holds five JSON files and a version marker:
//!
//! | File | Contents |
//! |------|----------|
//! | [`MODEL_FILE`] | the fitted pipeline, model name, version, feature names and training summary |
//! | [`SCALER_FILE`] | the pipeline's fitted scaler (absent when the pipeline has none) |
//! | [`FEATURE_NAMES_FILE`] | ordered feature names |
//! | [`TRAINING_RESULTS_FILE`] | the training summary |
//! | [`CLASSIFICATION_REPORT_FILE`] | held-out report of the winner |
//! | [`VERSION_FILE`] | the version string of the model file, as plain text |
//!
//! Every file is written to a temporary sibling and renamed into place.
//! [`load_bundle`] reads only the model file, so a reader sees either the old
//! or the new bundle even while the other files are being replaced. The
//! remaining JSON files are copies for people and other tools.
//!
//! The version marker is removed before a write starts and written again
//! after the model file, so it never names a version older than the model
//! file it sits next to.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{PdwellError, Result};
use crate::estimators::ModelPipeline;
use crate::model::ModelBundle;
use crate::types::{ClassificationReport, TrainingSummary};

pub const MODEL_FILE: &str = "parkinsons_model.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const FEATURE_NAMES_FILE: &str = "feature_names.json";
pub const TRAINING_RESULTS_FILE: &str = "training_results.json";
pub const CLASSIFICATION_REPORT_FILE: &str = "classification_report.json";

/// Plain-text copy of the model version, cheap to poll.
pub const VERSION_FILE: &str = "model_version.txt";

/// Layout version of [`MODEL_FILE`].
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct PersistedModelRef<'a> {
    format_version: u32,
    model_name: &'a str,
    version: &'a str,
    feature_names: &'a [String],
    pipeline: &'a ModelPipeline,
    summary: Option<&'a TrainingSummary>,
}

#[derive(Deserialize)]
struct PersistedModel {
    format_version: u32,
    model_name: String,
    version: String,
    feature_names: Vec<String>,
    pipeline: ModelPipeline,
    #[serde(default)]
    summary: Option<TrainingSummary>,
}

/// Just enough of the model file to tell versions apart.
#[derive(Deserialize)]
struct VersionField {
    version: String,
}

fn write_atomic(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<&fs::File>) -> Result<()>,
) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PdwellError::Io(e.error))?;
    debug!(path = %path.display(), "wrote artifact");
    Ok(())
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, |writer| Ok(serde_json::to_writer_pretty(writer, value)?))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = fs::File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Write `bundle` and `report` into `dir`, creating it if needed.
///
/// Returns the paths written, in write order.
///
/// # Errors
///
/// Returns [`PdwellError::InvalidData`] if the bundle carries no training
/// summary, and I/O or JSON errors from the writes.
pub fn write_bundle(
    dir: &Path,
    bundle: &ModelBundle,
    report: &ClassificationReport,
) -> Result<Vec<PathBuf>> {
    let summary = bundle.summary().ok_or_else(|| {
        PdwellError::InvalidData("cannot persist a bundle without a training summary".to_string())
    })?;
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(6);

    let version_path = dir.join(VERSION_FILE);
    if version_path.exists() {
        fs::remove_file(&version_path)?;
    }

    let scaler_path = dir.join(SCALER_FILE);
    match bundle.scaler() {
        Some(scaler) => {
            write_json_atomic(&scaler_path, scaler)?;
            written.push(scaler_path);
        }
        None if scaler_path.exists() => fs::remove_file(&scaler_path)?,
        None => {}
    }

    let path = dir.join(FEATURE_NAMES_FILE);
    write_json_atomic(&path, bundle.feature_names())?;
    written.push(path);

    let path = dir.join(TRAINING_RESULTS_FILE);
    write_json_atomic(&path, summary)?;
    written.push(path);

    let path = dir.join(CLASSIFICATION_REPORT_FILE);
    write_json_atomic(&path, report)?;
    written.push(path);

    let path = dir.join(MODEL_FILE);
    write_json_atomic(
        &path,
        &PersistedModelRef {
            format_version: FORMAT_VERSION,
            model_name: bundle.model_name(),
            version: bundle.version(),
            feature_names: bundle.feature_names(),
            pipeline: bundle.pipeline(),
            summary: Some(summary),
        },
    )?;
    written.push(path);

    write_atomic(&version_path, |writer| {
        Ok(writer.write_all(bundle.version().as_bytes())?)
    })?;
    written.push(version_path);

    info!(dir = %dir.display(), model = bundle.model_name(), "bundle persisted");
    Ok(written)
}

/// Load the bundle stored in `dir`.
///
/// Only [`MODEL_FILE`] is read. It carries the pipeline, the feature names
/// and the training summary, so the result is always internally consistent.
/// Model files written without an embedded summary fall back to
/// [`TRAINING_RESULTS_FILE`] when its `training_date` matches the model
/// version.
///
/// # Errors
///
/// - [`PdwellError::ArtifactMissing`] if the model file does not exist
/// - [`PdwellError::InvalidData`] if the model file has an unknown format
///   version
/// - I/O or JSON errors from reading the model file
pub fn load_bundle(dir: impl AsRef<Path>) -> Result<ModelBundle> {
    let dir = dir.as_ref();
    let model_path = dir.join(MODEL_FILE);
    if !model_path.exists() {
        return Err(PdwellError::ArtifactMissing {
            path: model_path.display().to_string(),
        });
    }

    let persisted: PersistedModel = read_json(&model_path)?;
    if persisted.format_version != FORMAT_VERSION {
        return Err(PdwellError::InvalidData(format!(
            "unsupported model format version {} (expected {FORMAT_VERSION})",
            persisted.format_version
        )));
    }

    let summary = match persisted.summary {
        Some(summary) => Some(summary),
        None => legacy_summary(dir, &persisted.version),
    };

    debug!(path = %model_path.display(), version = %persisted.version, "loaded bundle");
    ModelBundle::new(
        persisted.model_name,
        persisted.version,
        persisted.feature_names,
        persisted.pipeline,
        summary,
    )
}

fn legacy_summary(dir: &Path, version: &str) -> Option<TrainingSummary> {
    let summary: TrainingSummary = read_json(&dir.join(TRAINING_RESULTS_FILE)).ok()?;
    (summary.training_date == version).then_some(summary)
}

/// Version string of the model stored in `dir`, without loading the pipeline.
///
/// Reads [`VERSION_FILE`] and falls back to the model file while the marker
/// is absent (mid-write, or a directory written before the marker
/// existed).
pub(crate) fn read_version(dir: &Path) -> Result<String> {
    let model_path = dir.join(MODEL_FILE);
    if !model_path.exists() {
        return Err(PdwellError::ArtifactMissing {
            path: model_path.display().to_string(),
        });
    }
    match fs::read_to_string(dir.join(VERSION_FILE)) {
        Ok(version) if !version.trim().is_empty() => Ok(version.trim().to_string()),
        Ok(_) => version_from_model(&model_path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => version_from_model(&model_path),
        Err(e) => Err(e.into()),
    }
}

fn version_from_model(model_path: &Path) -> Result<String> {
    let field: VersionField = read_json(model_path)?;
    Ok(field.version)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::estimators::{ClassifierKind, LogisticRegression};
    use crate::types::DatasetInfo;
    use ndarray::array;
    use std::collections::BTreeMap;

    pub(crate) fn sample_bundle(version: &str) -> ModelBundle {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let mut pipeline =
            ModelPipeline::new(ClassifierKind::LogisticRegression(LogisticRegression::default()));
        pipeline.fit(x.view(), &[0, 0, 1, 1], 0).unwrap();
        let summary = TrainingSummary {
            training_date: version.to_string(),
            best_model: "LogisticRegression".to_string(),
            best_cv_score: 1.0,
            dataset_info: DatasetInfo {
                total_samples: 4,
                features: 1,
                feature_names: vec!["x".to_string()],
                class_distribution: BTreeMap::new(),
            },
            model_performance: BTreeMap::new(),
            failed_models: BTreeMap::new(),
        };
        ModelBundle::new(
            "LogisticRegression",
            version,
            vec!["x".to_string()],
            pipeline,
            Some(summary),
        )
        .unwrap()
    }

    pub(crate) fn write_version(dir: &Path, version: &str) {
        write_bundle(dir, &sample_bundle(version), &ClassificationReport::default()).unwrap();
    }

    #[test]
    fn test_missing_model_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_bundle(dir.path()).unwrap_err();
        assert!(matches!(err, PdwellError::ArtifactMissing { .. }));
        let message = err.to_string();
        assert!(message.contains(MODEL_FILE));
        assert!(message.contains("Run training first"));
    }

    #[test]
    fn test_atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        write_json_atomic(&path, &vec![4]).unwrap();

        let value: Vec<i32> = read_json(&path).unwrap();
        assert_eq!(value, vec![4]);
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_read_version_without_full_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(MODEL_FILE),
            r#"{"format_version": 1, "version": "2026-01-02T03:04:05Z", "pipeline": {}}"#,
        )
        .unwrap();
        assert_eq!(read_version(dir.path()).unwrap(), "2026-01-02T03:04:05Z");
        assert!(load_bundle(dir.path()).is_err());
    }

    #[test]
    fn test_load_ignores_rewritten_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        write_version(dir.path(), "v1");

        // A concurrent writer has replaced the metadata but not yet the model
        let newer = sample_bundle("v2");
        write_json_atomic(
            &dir.path().join(TRAINING_RESULTS_FILE),
            newer.summary().unwrap(),
        )
        .unwrap();
        write_json_atomic(
            &dir.path().join(FEATURE_NAMES_FILE),
            &vec!["y".to_string(), "z".to_string()],
        )
        .unwrap();

        let bundle = load_bundle(dir.path()).unwrap();
        assert_eq!(bundle.version(), "v1");
        assert_eq!(bundle.summary().unwrap().training_date, "v1");
        assert_eq!(bundle.feature_names(), &["x".to_string()][..]);
    }

    #[test]
    fn test_version_file_written_after_model() {
        let dir = tempfile::tempdir().unwrap();
        let written =
            write_bundle(dir.path(), &sample_bundle("v1"), &ClassificationReport::default())
                .unwrap();

        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(&names[names.len() - 2..], &[MODEL_FILE, VERSION_FILE]);
        assert_eq!(
            fs::read_to_string(dir.path().join(VERSION_FILE)).unwrap(),
            "v1"
        );
        assert_eq!(read_version(dir.path()).unwrap(), "v1");
    }

    #[test]
    fn test_read_version_prefers_version_file() {
        let dir = tempfile::tempdir().unwrap();
        write_version(dir.path(), "v1");
        fs::write(dir.path().join(MODEL_FILE), "not json").unwrap();
        assert_eq!(read_version(dir.path()).unwrap(), "v1");

        fs::remove_file(dir.path().join(VERSION_FILE)).unwrap();
        assert!(read_version(dir.path()).is_err());
    }
}
