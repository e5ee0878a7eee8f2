//! Synthetic voice-measurement data for demos and tests.
//!
//! Each feature is drawn uniformly from a per-class range and rounded to six
//! decimals. Affected ranges are wider and shifted towards higher jitter,
//! shimmer and noise, and lower harmonics-to-noise ratio.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::data::Dataset;
use crate::error::Result;

/// The 22 voice features of the public dataset, in canonical column order.
pub const FEATURE_NAMES: [&str; 22] = [
    "MDVP:Fo(Hz)",
    "MDVP:Fhi(Hz)",
    "MDVP:Flo(Hz)",
    "MDVP:Jitter(%)",
    "MDVP:Jitter(Abs)",
    "MDVP:RAP",
    "MDVP:PPQ",
    "Jitter:DDP",
    "MDVP:Shimmer",
    "MDVP:Shimmer(dB)",
    "Shimmer:APQ3",
    "Shimmer:APQ5",
    "MDVP:APQ",
    "Shimmer:DDA",
    "NHR",
    "HNR",
    "RPDE",
    "DFA",
    "spread1",
    "spread2",
    "D2",
    "PPE",
];

/// `(low, high)` per feature for healthy speakers, in [`FEATURE_NAMES`] order.
const HEALTHY_RANGES: [(f64, f64); 22] = [
    (120.0, 220.0),
    (140.0, 280.0),
    (80.0, 180.0),
    (0.003, 0.008),
    (0.00001, 0.00005),
    (0.001, 0.005),
    (0.001, 0.005),
    (0.003, 0.015),
    (0.01, 0.04),
    (0.08, 0.35),
    (0.005, 0.020),
    (0.006, 0.025),
    (0.008, 0.030),
    (0.015, 0.060),
    (0.001, 0.020),
    (20.0, 30.0),
    (0.35, 0.55),
    (0.55, 0.75),
    (-6.0, -4.0),
    (0.1, 0.3),
    (1.5, 2.5),
    (0.05, 0.20),
];

/// `(low, high)` per feature for affected speakers.
const AFFECTED_RANGES: [(f64, f64); 22] = [
    (90.0, 250.0),
    (110.0, 350.0),
    (65.0, 200.0),
    (0.005, 0.030),
    (0.00002, 0.0002),
    (0.002, 0.018),
    (0.002, 0.018),
    (0.006, 0.055),
    (0.02, 0.12),
    (0.15, 1.10),
    (0.010, 0.065),
    (0.012, 0.070),
    (0.015, 0.085),
    (0.030, 0.195),
    (0.005, 0.065),
    (8.0, 25.0),
    (0.40, 0.70),
    (0.50, 0.85),
    (-8.0, -3.0),
    (0.05, 0.45),
    (1.2, 3.2),
    (0.08, 0.40),
];

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

fn uniform<R: Rng>(rng: &mut R, (low, high): (f64, f64)) -> f64 {
    round6(rng.gen_range(low..high))
}

fn feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

/// `n_healthy` healthy rows followed by `n_affected` affected rows, with ids
/// `patient_000`, `patient_001`, ...
pub fn generate(n_healthy: usize, n_affected: usize, seed: u64) -> Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = n_healthy + n_affected;
    let labels: Vec<u8> = (0..n).map(|i| u8::from(i >= n_healthy)).collect();

    let mut features = Array2::zeros((n, FEATURE_NAMES.len()));
    for (mut row, &label) in features.outer_iter_mut().zip(&labels) {
        let ranges = if label == 0 {
            &HEALTHY_RANGES
        } else {
            &AFFECTED_RANGES
        };
        for (cell, &range) in row.iter_mut().zip(ranges) {
            *cell = uniform(&mut rng, range);
        }
    }

    let ids = (0..n).map(|i| format!("patient_{i:03}")).collect();
    Dataset::new(feature_names(), features, labels)?.with_ids(ids)
}

/// Borderline rows with a random label.
///
/// Each feature comes from the overlap of the two class ranges when they
/// overlap, otherwise from one of the two ranges picked at random.
pub fn generate_edge_cases(n: usize, seed: u64) -> Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut features = Array2::zeros((n, FEATURE_NAMES.len()));
    let mut labels = Vec::with_capacity(n);

    for mut row in features.outer_iter_mut() {
        labels.push(u8::from(rng.gen_bool(0.5)));
        for (j, cell) in row.iter_mut().enumerate() {
            let (h, a) = (HEALTHY_RANGES[j], AFFECTED_RANGES[j]);
            let overlap = (h.0.max(a.0), h.1.min(a.1));
            *cell = if overlap.0 < overlap.1 {
                uniform(&mut rng, overlap)
            } else if rng.gen_bool(0.5) {
                uniform(&mut rng, h)
            } else {
                uniform(&mut rng, a)
            };
        }
    }

    let ids = (0..n).map(|i| format!("edge_patient_{i:03}")).collect();
    Dataset::new(feature_names(), features, labels)?.with_ids(ids)
}

/// A named demo dataset.
#[derive(Debug, Clone)]
pub struct DemoSet {
    pub name: &'static str,
    pub description: &'static str,
    pub dataset: Dataset,
}

/// The five demo sets shipped with the app.
pub fn demo_sets(seed: u64) -> Result<Vec<DemoSet>> {
    Ok(vec![
        DemoSet {
            name: "demo_small",
            description: "Small mixed dataset (10 samples) - good for quick testing",
            dataset: generate(5, 5, seed)?,
        },
        DemoSet {
            name: "demo_large",
            description: "Larger mixed dataset (50 samples) - better for evaluation",
            dataset: generate(20, 30, seed.wrapping_add(1))?,
        },
        DemoSet {
            name: "demo_healthy_only",
            description: "Only healthy samples (20 samples) - test specificity",
            dataset: generate(20, 0, seed.wrapping_add(2))?,
        },
        DemoSet {
            name: "demo_parkinsons_only",
            description: "Only affected samples (20 samples) - test sensitivity",
            dataset: generate(0, 20, seed.wrapping_add(3))?,
        },
        DemoSet {
            name: "demo_edge_cases",
            description: "Borderline cases (10 samples) - challenging predictions",
            dataset: generate_edge_cases(10, seed.wrapping_add(4))?,
        },
    ])
}

/// Write every demo set as `<name>.csv` plus a `README.txt` into `dir`.
///
/// Returns the paths of the CSV files.
pub fn write_demo_sets(dir: &Path, seed: u64) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let sets = demo_sets(seed)?;
    let mut paths = Vec::with_capacity(sets.len());
    let mut readme = String::from("Demo datasets for voice-feature risk prediction\n\n");

    for set in &sets {
        let path = dir.join(format!("{}.csv", set.name));
        set.dataset.write_csv(&path, "name", "status")?;
        let [healthy, affected] = set.dataset.class_counts();
        info!(
            "{}: {} samples ({healthy} healthy, {affected} affected) -> {}",
            set.name,
            set.dataset.n_samples(),
            path.display()
        );
        readme.push_str(&format!("{}.csv:\n  {}\n\n", set.name, set.description));
        paths.push(path);
    }
    readme.push_str("Column 'status' holds the label: 0 = healthy, 1 = affected.\n");
    fs::write(dir.join("README.txt"), readme)?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::load_csv;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generate_respects_ranges() {
        let dataset = generate(30, 20, 42).unwrap();
        assert_eq!(dataset.n_samples(), 50);
        assert_eq!(dataset.n_features(), 22);
        assert_eq!(dataset.class_counts(), [30, 20]);
        assert_eq!(dataset.ids().unwrap()[31], "patient_031");

        for (row, &label) in dataset.features().outer_iter().zip(dataset.labels()) {
            let ranges = if label == 0 { &HEALTHY_RANGES } else { &AFFECTED_RANGES };
            for (&v, &(low, high)) in row.iter().zip(ranges) {
                assert!(v >= round6(low) && v <= round6(high), "{v} outside {low}..{high}");
            }
        }
    }

    #[test]
    fn test_generate_is_seeded() {
        assert_eq!(generate(5, 5, 7).unwrap(), generate(5, 5, 7).unwrap());
        assert_ne!(generate(5, 5, 7).unwrap(), generate(5, 5, 8).unwrap());
    }

    #[test]
    fn test_edge_cases_use_overlap() {
        let dataset = generate_edge_cases(10, 1).unwrap();
        assert_eq!(dataset.ids().unwrap()[0], "edge_patient_000");
        let hnr = FEATURE_NAMES.iter().position(|&n| n == "HNR").unwrap();
        for v in dataset.features().column(hnr) {
            assert!((20.0..=25.0).contains(v));
        }
    }

    #[test]
    fn test_write_demo_sets_roundtrips_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_demo_sets(dir.path(), 42).unwrap();
        assert_eq!(paths.len(), 5);
        assert!(dir.path().join("README.txt").exists());

        let small = load_csv(&paths[0], "status", "name").unwrap();
        assert_eq!(small.n_samples(), 10);
        assert_eq!(small.feature_names(), &feature_names()[..]);
        assert_eq!(small.class_counts(), [5, 5]);
    }
}
