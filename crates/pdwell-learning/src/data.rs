//! Feature vectors, labelled datasets and CSV loading.
//!
//! Datasets are read with polars and validated before any training happens:
//! feature columns must be numeric and complete, labels must be 0/1. No value
//! is imputed or coerced.

use std::path::Path;

use ndarray::{Array2, ArrayView1, Axis};
use polars::prelude::*;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{PdwellError, Result};

/// Columns that are never treated as features.
pub const NON_FEATURE_COLUMNS: [&str; 2] = ["name", "status"];

/// Ordered mapping from feature name to value.
///
/// Inference aligns a vector to the model's feature list by name, so the
/// order here does not have to match the training order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureVector {
    entries: Vec<(String, f64)>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs. A repeated name keeps the last value.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut vector = Self::new();
        for (name, value) in pairs {
            vector.insert(name, value);
        }
        vector
    }

    /// Build from a JSON object of `name -> number`.
    ///
    /// String values are accepted when they parse as numbers. Identifier and
    /// label columns are skipped whatever their type.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            PdwellError::InvalidData("feature vector must be a JSON object".to_string())
        })?;

        let mut vector = Self::new();
        for (name, raw) in object {
            if NON_FEATURE_COLUMNS.contains(&name.as_str()) {
                continue;
            }
            let number = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| {
                PdwellError::InvalidData(format!("feature '{name}' is not numeric: {raw}"))
            })?;
            vector.insert(name.clone(), number);
        }
        Ok(vector)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Values in the order of `feature_names`.
    ///
    /// Identifier, label and unknown columns are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError::Inference`] naming every feature that is absent.
    pub fn align(&self, feature_names: &[String]) -> Result<Vec<f64>> {
        let mut values = Vec::with_capacity(feature_names.len());
        let mut missing = Vec::new();
        for name in feature_names {
            match self.get(name) {
                Some(v) => values.push(v),
                None => missing.push(name.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(PdwellError::Inference(format!(
                "missing features: {}",
                missing.join(", ")
            )));
        }
        Ok(values)
    }
}

/// A labelled dataset: one row per sample, label 0 = healthy, 1 = affected.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_names: Vec<String>,
    features: Array2<f64>,
    labels: Vec<u8>,
    ids: Option<Vec<String>>,
}

impl Dataset {
    /// Create a dataset from a feature matrix and labels.
    ///
    /// # Errors
    ///
    /// Returns [`PdwellError::InvalidData`] when shapes disagree, a label is
    /// not 0/1 or a value is not finite.
    pub fn new(feature_names: Vec<String>, features: Array2<f64>, labels: Vec<u8>) -> Result<Self> {
        if features.ncols() != feature_names.len() {
            return Err(PdwellError::InvalidData(format!(
                "{} feature names for {} columns",
                feature_names.len(),
                features.ncols()
            )));
        }
        if features.nrows() != labels.len() {
            return Err(PdwellError::InvalidData(format!(
                "{} labels for {} rows",
                labels.len(),
                features.nrows()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&l| l > 1) {
            return Err(PdwellError::InvalidData(format!(
                "labels must be 0 or 1, found {bad}"
            )));
        }
        for (j, column) in features.axis_iter(Axis(1)).enumerate() {
            if column.iter().any(|v| !v.is_finite()) {
                return Err(PdwellError::InvalidData(format!(
                    "feature '{}' contains non-finite values",
                    feature_names[j]
                )));
            }
        }

        Ok(Self {
            feature_names,
            features,
            labels,
            ids: None,
        })
    }

    /// Build a dataset from labelled feature vectors.
    ///
    /// The feature order is taken from the first row; every other row is
    /// aligned to it by name.
    pub fn from_rows(rows: &[(FeatureVector, u8)]) -> Result<Self> {
        let Some((first, _)) = rows.first() else {
            return Err(PdwellError::InvalidData("dataset is empty".to_string()));
        };
        let feature_names: Vec<String> = first
            .names()
            .filter(|n| !NON_FEATURE_COLUMNS.contains(n))
            .map(str::to_string)
            .collect();

        let mut features = Array2::zeros((rows.len(), feature_names.len()));
        let mut labels = Vec::with_capacity(rows.len());
        for (i, (vector, label)) in rows.iter().enumerate() {
            let values = vector
                .align(&feature_names)
                .map_err(|e| PdwellError::InvalidData(format!("row {i}: {e}")))?;
            for (j, v) in values.into_iter().enumerate() {
                features[[i, j]] = v;
            }
            labels.push(*label);
        }
        Self::new(feature_names, features, labels)
    }

    /// Attach row identifiers.
    pub fn with_ids(mut self, ids: Vec<String>) -> Result<Self> {
        if ids.len() != self.labels.len() {
            return Err(PdwellError::InvalidData(format!(
                "{} identifiers for {} rows",
                ids.len(),
                self.labels.len()
            )));
        }
        self.ids = Some(ids);
        Ok(self)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn ids(&self) -> Option<&[String]> {
        self.ids.as_deref()
    }

    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Row counts for label 0 and label 1.
    pub fn class_counts(&self) -> [usize; 2] {
        let positives = self.labels.iter().filter(|&&l| l == 1).count();
        [self.labels.len() - positives, positives]
    }

    /// The `index`-th row as a feature vector.
    pub fn row(&self, index: usize) -> Option<FeatureVector> {
        if index >= self.n_samples() {
            return None;
        }
        Some(self.vector_from(self.features.row(index)))
    }

    /// All rows as feature vectors, in dataset order.
    pub fn rows(&self) -> Vec<FeatureVector> {
        self.features
            .outer_iter()
            .map(|row| self.vector_from(row))
            .collect()
    }

    fn vector_from(&self, row: ArrayView1<f64>) -> FeatureVector {
        FeatureVector::from_pairs(self.feature_names.iter().cloned().zip(row.iter().copied()))
    }

    /// Features and labels of the given rows.
    pub(crate) fn subset(&self, indices: &[usize]) -> (Array2<f64>, Vec<u8>) {
        let x = self.features.select(Axis(0), indices);
        let y = indices.iter().map(|&i| self.labels[i]).collect();
        (x, y)
    }

    /// Convert to a polars frame with the identifier first and the label last.
    pub fn to_dataframe(&self, id_column: &str, target_column: &str) -> Result<DataFrame> {
        let mut columns: Vec<Column> = Vec::with_capacity(self.n_features() + 2);
        if let Some(ids) = &self.ids {
            columns.push(Column::new(id_column.into(), ids.clone()));
        }
        for (j, name) in self.feature_names.iter().enumerate() {
            let values: Vec<f64> = self.features.column(j).to_vec();
            columns.push(Column::new(name.as_str().into(), values));
        }
        let labels: Vec<i64> = self.labels.iter().map(|&l| i64::from(l)).collect();
        columns.push(Column::new(target_column.into(), labels));
        Ok(DataFrame::new(columns)?)
    }

    /// Write the dataset as CSV.
    pub fn write_csv(&self, path: &Path, id_column: &str, target_column: &str) -> Result<()> {
        let mut df = self.to_dataframe(id_column, target_column)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::File::create(path)?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(b',')
            .finish(&mut df)?;
        Ok(())
    }
}

/// Check whether a polars dtype is numeric.
fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Read a CSV file into a polars frame.
///
/// # Errors
///
/// Returns [`PdwellError::DatasetNotFound`] when the file does not exist.
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(PdwellError::DatasetNotFound {
            path: path.display().to_string(),
        });
    }
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    debug!("Read {} rows x {} columns from {}", df.height(), df.width(), path.display());
    Ok(df)
}

/// Load and validate a labelled dataset from CSV.
pub fn load_csv(path: &Path, target_column: &str, id_column: &str) -> Result<Dataset> {
    let df = read_csv(path)?;
    let dataset = dataset_from_frame(&df, target_column, id_column)?;
    info!(
        "Loaded dataset: {} samples, {} features, class counts {:?}",
        dataset.n_samples(),
        dataset.n_features(),
        dataset.class_counts()
    );
    Ok(dataset)
}

/// Split a frame into features and labels.
///
/// The identifier column is dropped when present. Every remaining column
/// except the label must be numeric and free of nulls.
pub fn dataset_from_frame(df: &DataFrame, target_column: &str, id_column: &str) -> Result<Dataset> {
    let column_names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();

    if !column_names.iter().any(|n| n == target_column) {
        return Err(PdwellError::TargetNotFound(target_column.to_string()));
    }

    let feature_names: Vec<String> = column_names
        .iter()
        .filter(|n| n.as_str() != target_column && n.as_str() != id_column)
        .cloned()
        .collect();
    if feature_names.is_empty() {
        return Err(PdwellError::InvalidData(
            "dataset has no feature columns".to_string(),
        ));
    }

    let missing: usize = feature_names
        .iter()
        .map(|name| df.column(name).map(|c| c.null_count()))
        .sum::<std::result::Result<usize, _>>()?;
    if missing > 0 {
        return Err(PdwellError::MissingValues { count: missing });
    }

    let n_rows = df.height();
    let mut features = Array2::zeros((n_rows, feature_names.len()));
    for (j, name) in feature_names.iter().enumerate() {
        let values = numeric_column(df, name)?;
        for (i, v) in values.into_iter().enumerate() {
            features[[i, j]] = v;
        }
    }

    let labels = label_column(df, target_column)?;
    let mut dataset = Dataset::new(feature_names, features, labels)?;

    if column_names.iter().any(|n| n == id_column) {
        let ids = df
            .column(id_column)?
            .cast(&DataType::String)?
            .as_materialized_series()
            .str()?
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect();
        dataset = dataset.with_ids(ids)?;
    }
    Ok(dataset)
}

/// Read every row of a CSV file as a feature vector for inference.
///
/// Identifier and label columns are skipped, and so are non-numeric columns.
/// A feature the model needs but the file lacks is reported when the rows are
/// aligned.
pub fn read_feature_rows(path: &Path) -> Result<Vec<FeatureVector>> {
    let df = read_csv(path)?;
    rows_from_frame(&df)
}

/// Convert a frame into feature vectors, one per row.
pub fn rows_from_frame(df: &DataFrame) -> Result<Vec<FeatureVector>> {
    let mut rows = vec![FeatureVector::new(); df.height()];
    for col in df.get_columns() {
        let name = col.name().to_string();
        if NON_FEATURE_COLUMNS.contains(&name.as_str()) {
            continue;
        }
        if !is_numeric_dtype(col.dtype()) {
            debug!("Skipping non-numeric column '{}'", name);
            continue;
        }
        if col.null_count() > 0 {
            return Err(PdwellError::InvalidData(format!(
                "column '{name}' contains {} missing values",
                col.null_count()
            )));
        }
        let values = numeric_column(df, &name)?;
        for (row, v) in rows.iter_mut().zip(values) {
            row.insert(name.clone(), v);
        }
    }
    Ok(rows)
}

fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let col = df.column(name)?;
    if !is_numeric_dtype(col.dtype()) {
        return Err(PdwellError::InvalidData(format!(
            "feature '{name}' is not numeric (dtype {})",
            col.dtype()
        )));
    }
    let series = col.as_materialized_series().cast(&DataType::Float64)?;
    let values: Vec<f64> = series.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(PdwellError::InvalidData(format!(
            "feature '{name}' contains non-finite values"
        )));
    }
    Ok(values)
}

/// Labels may be stored as integers, floats or the strings "0"/"1".
fn label_column(df: &DataFrame, target_column: &str) -> Result<Vec<u8>> {
    let col = df.column(target_column)?;
    if col.null_count() > 0 {
        return Err(PdwellError::InvalidData(format!(
            "label column '{target_column}' contains {} missing values",
            col.null_count()
        )));
    }

    let series = col.as_materialized_series();
    let raw: Vec<Option<f64>> = if is_numeric_dtype(series.dtype()) {
        series.cast(&DataType::Float64)?.f64()?.into_iter().collect()
    } else {
        series
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|v| v.and_then(|s| s.trim().parse::<f64>().ok()))
            .collect()
    };

    raw.into_iter()
        .enumerate()
        .map(|(i, v)| match v {
            Some(x) if x == 0.0 => Ok(0),
            Some(x) if x == 1.0 => Ok(1),
            _ => Err(PdwellError::InvalidData(format!(
                "row {i}: label must be 0 or 1"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    #[test]
    fn test_feature_vector_from_json_skips_identifier_and_label() {
        let vector = FeatureVector::from_json(&json!({
            "name": "patient_001",
            "status": "1",
            "NHR": 0.02,
            "HNR": "21.5"
        }))
        .unwrap();
        assert_eq!(vector.len(), 2);
        assert_eq!(vector.get("NHR"), Some(0.02));
        assert_eq!(vector.get("HNR"), Some(21.5));
        assert_eq!(vector.get("status"), None);
    }

    #[test]
    fn test_feature_vector_from_json_rejects_text() {
        let err = FeatureVector::from_json(&json!({"NHR": "high"})).unwrap_err();
        assert!(matches!(err, PdwellError::InvalidData(_)));
    }

    #[test]
    fn test_align_by_name() {
        let vector = FeatureVector::from_pairs([("b", 2.0), ("a", 1.0), ("extra", 9.0)]);
        let names = vec!["a".to_string(), "b".to_string()];
        assert_eq!(vector.align(&names).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_align_reports_missing() {
        let vector = FeatureVector::from_pairs([("a", 1.0)]);
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let err = vector.align(&names).unwrap_err();
        assert!(err.to_string().contains("b, c"));
    }

    #[test]
    fn test_dataset_rejects_bad_labels() {
        let result = Dataset::new(vec!["a".to_string()], array![[1.0], [2.0]], vec![0, 2]);
        assert!(matches!(result, Err(PdwellError::InvalidData(_))));
    }

    #[test]
    fn test_dataset_rejects_non_finite() {
        let result = Dataset::new(vec!["a".to_string()], array![[1.0], [f64::NAN]], vec![0, 1]);
        assert!(result.is_err());
    }

    #[test]
    fn test_dataset_from_frame_drops_identifier() {
        let df = df![
            "name" => ["p1", "p2", "p3"],
            "x1" => [1.0, 2.0, 3.0],
            "x2" => [1i64, 0, 1],
            "status" => ["0", "1", "1"]
        ]
        .unwrap();
        let dataset = dataset_from_frame(&df, "status", "name").unwrap();
        assert_eq!(dataset.feature_names(), &["x1".to_string(), "x2".to_string()]);
        assert_eq!(dataset.labels(), &[0, 1, 1]);
        assert_eq!(dataset.class_counts(), [1, 2]);
        assert_eq!(dataset.ids().unwrap()[2], "p3");
    }

    #[test]
    fn test_dataset_from_frame_missing_values() {
        let df = df![
            "x1" => [Some(1.0), None, Some(3.0)],
            "x2" => [Some(1.0), Some(2.0), None],
            "status" => [0i64, 1, 1]
        ]
        .unwrap();
        let err = dataset_from_frame(&df, "status", "name").unwrap_err();
        assert!(matches!(err, PdwellError::MissingValues { count: 2 }));
    }

    #[test]
    fn test_dataset_from_frame_non_numeric_feature() {
        let df = df![
            "x1" => ["a", "b"],
            "status" => [0i64, 1]
        ]
        .unwrap();
        let err = dataset_from_frame(&df, "status", "name").unwrap_err();
        assert!(err.to_string().contains("not numeric"));
    }

    #[test]
    fn test_dataset_from_frame_target_missing() {
        let df = df!["x1" => [1.0, 2.0]].unwrap();
        let err = dataset_from_frame(&df, "status", "name").unwrap_err();
        assert!(matches!(err, PdwellError::TargetNotFound(_)));
    }

    #[test]
    fn test_read_csv_missing_file() {
        let err = read_csv(Path::new("/nonexistent/parkinsons.csv")).unwrap_err();
        assert!(matches!(err, PdwellError::DatasetNotFound { .. }));
    }

    #[test]
    fn test_rows_from_frame_skips_non_features() {
        let df = df![
            "name" => ["p1", "p2"],
            "x1" => [1.0, 2.0],
            "status" => [0i64, 1]
        ]
        .unwrap();
        let rows = rows_from_frame(&df).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("x1"), Some(2.0));
        assert_eq!(rows[1].len(), 1);
    }

    #[test]
    fn test_from_rows_realigns() {
        let rows = vec![
            (FeatureVector::from_pairs([("a", 1.0), ("b", 2.0)]), 0),
            (FeatureVector::from_pairs([("b", 4.0), ("a", 3.0)]), 1),
        ];
        let dataset = Dataset::from_rows(&rows).unwrap();
        assert_eq!(dataset.features(), &array![[1.0, 2.0], [3.0, 4.0]]);
    }
}
