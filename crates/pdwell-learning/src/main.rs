//! CLI entry point for training and querying the voice-feature risk model.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use pdwell_learning::{
    BundleCache, DEFAULT_DATA_PATH, DEFAULT_MODELS_DIR, ExplainConfig, MODELS_DIR_ENV, Pipeline,
    PipelineConfig, TrainingReport, read_feature_rows, synthetic,
};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Voice-feature risk model: training, prediction and explanation",
    long_about = "Train a classifier on sustained-phonation voice measurements and query it.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  PDWELL_DATA_PATH     Default training CSV (overridden by --data)\n  \
                  PDWELL_MODELS_DIR    Default models directory (overridden by --models-dir)\n  \
                  RUST_LOG             Log filter (overrides --log-level)\n\n\
                  EXAMPLES:\n  \
                  # Generate demo data and train on the large set\n  \
                  pdwell demo-data -o demo\n  \
                  pdwell train --data demo/demo_large.csv\n\n  \
                  # Score a CSV and explain its first row\n  \
                  pdwell predict -i demo/demo_small.csv\n  \
                  pdwell explain -i demo/demo_small.csv --row 0"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Suppress progress output (only show warnings and errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output JSON to stdout instead of a human-readable summary
    ///
    /// Disables all logs; only the JSON result is written.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train every candidate, select the best and persist it
    Train {
        /// Labelled CSV dataset [default: $PDWELL_DATA_PATH or data/parkinsons.csv]
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Directory the bundle is written to
        #[arg(short, long)]
        models_dir: Option<PathBuf>,

        /// Secondary directory the bundle is replicated into
        #[arg(long)]
        backup_dir: Option<PathBuf>,

        /// Seed for the split, the folds and every candidate
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Number of worker threads (-1 for all cores)
        #[arg(long, default_value = "-1", allow_negative_numbers = true)]
        jobs: i32,
    },

    /// Score every row of a CSV file
    Predict {
        /// CSV file with one row per sample
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        models_dir: Option<PathBuf>,
    },

    /// Show the global feature importance of the trained model
    Importance {
        #[arg(short, long)]
        models_dir: Option<PathBuf>,
    },

    /// Explain one row of a CSV file, using the file as background
    Explain {
        /// CSV file with one row per sample
        #[arg(short, long)]
        input: PathBuf,

        /// Zero-based index of the row to explain
        #[arg(short, long, default_value = "0")]
        row: usize,

        /// Number of contributions to print
        #[arg(long, default_value = "10")]
        top: usize,

        /// Maximum number of background rows
        #[arg(long, default_value = "100")]
        max_background: usize,

        #[arg(short, long)]
        models_dir: Option<PathBuf>,
    },

    /// Write the synthetic demo datasets
    DemoData {
        /// Output directory for the CSV files
        #[arg(short, long, default_value = "demo_data")]
        output_dir: PathBuf,

        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

/// Filter from `env_var` when set, otherwise from the flags.
fn log_filter(env_var: &str, level: &str, quiet: bool) -> EnvFilter {
    let effective_level = if quiet { "warn" } else { level };
    EnvFilter::try_from_env(env_var).unwrap_or_else(|_| EnvFilter::new(effective_level))
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is disabled so stdout only carries JSON.
/// Call after `.env` is loaded so a `RUST_LOG` set there takes effect.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(EnvFilter::DEFAULT_ENV, level, quiet))
        .with_target(false)
        .init();
}

const DATA_PATH_ENV: &str = "PDWELL_DATA_PATH";

/// The flag, then the environment variable, then the built-in default.
fn resolve_path(flag: Option<PathBuf>, env_var: &str, default: &str) -> PathBuf {
    flag.or_else(|| std::env::var_os(env_var).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
}

fn resolve_models_dir(flag: Option<PathBuf>) -> PathBuf {
    resolve_path(flag, MODELS_DIR_ENV, DEFAULT_MODELS_DIR)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load environment variables from .env file
    dotenv().ok();

    init_logging(&args.log_level, args.quiet, args.json);

    let json = args.json;
    let quiet = args.quiet;
    match args.command {
        Command::Train {
            data,
            models_dir,
            backup_dir,
            seed,
            jobs,
        } => {
            let mut builder = PipelineConfig::builder()
                .data_path(resolve_path(data, DATA_PATH_ENV, DEFAULT_DATA_PATH))
                .models_dir(resolve_models_dir(models_dir))
                .random_seed(seed)
                .n_jobs(jobs);
            if let Some(dir) = backup_dir {
                builder = builder.backup_dir(dir);
            }
            run_train(builder.build()?, json, quiet)
        }
        Command::Predict { input, models_dir } => {
            run_predict(&input, &resolve_models_dir(models_dir), json)
        }
        Command::Importance { models_dir } => {
            run_importance(&resolve_models_dir(models_dir), json)
        }
        Command::Explain {
            input,
            row,
            top,
            max_background,
            models_dir,
        } => run_explain(
            &input,
            row,
            top,
            &ExplainConfig::with_max_background(max_background),
            &resolve_models_dir(models_dir),
            json,
        ),
        Command::DemoData { output_dir, seed } => {
            let paths = synthetic::write_demo_sets(&output_dir, seed)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&paths)?);
            } else {
                println!("Wrote {} demo datasets to {}", paths.len(), output_dir.display());
                for path in paths {
                    println!("  - {}", path.display());
                }
            }
            Ok(())
        }
    }
}

fn run_train(config: PipelineConfig, json: bool, quiet: bool) -> Result<()> {
    let mut builder = Pipeline::builder().config(config);
    if !json && !quiet {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.as_str(),
                update.message
            );
        });
    }
    let pipeline = builder.build()?;

    info!("{}", "=".repeat(60));
    info!("Training voice-feature risk model");
    info!("{}", "=".repeat(60));

    let report = pipeline.train().map_err(|e| {
        error!("Training failed: {}", e);
        anyhow!("Training failed: {}", e)
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
        return Ok(());
    }
    print_training_summary(&report);
    Ok(())
}

fn print_training_summary(report: &TrainingReport) {
    let summary = &report.summary;
    println!();
    println!("{}", "=".repeat(60));
    println!("TRAINING COMPLETE");
    println!("{}", "=".repeat(60));
    println!(
        "Dataset: {} samples x {} features",
        summary.dataset_info.total_samples, summary.dataset_info.features
    );
    println!();
    println!(
        "{:<22} {:>10} {:>8} {:>10} {:>8} {:>8}",
        "Model", "CV", "CV std", "Test acc", "F1", "AUC"
    );
    println!("{}", "-".repeat(70));
    for result in &report.results {
        let marker = if result.name == summary.best_model { "*" } else { " " };
        println!(
            "{marker}{:<21} {:>10.4} {:>8.4} {:>10.4} {:>8.4} {:>8.4}",
            result.name,
            result.cv_mean,
            result.cv_std,
            result.test_accuracy,
            result.test_f1,
            result.test_auc
        );
    }
    for failure in &report.failures {
        println!(" {:<21} failed: {}", failure.name, failure.error);
    }
    println!();
    println!(
        "Best model: {} (cv {:.4})",
        summary.best_model, summary.best_cv_score
    );
    println!("Version: {}", summary.training_date);
    println!("Training time: {:.1}s", report.training_time_seconds);
    println!("Artifacts:");
    for path in &report.artifact_paths {
        println!("  - {}", path.display());
    }
    println!("{}", "=".repeat(60));
}

fn run_predict(input: &Path, models_dir: &Path, json: bool) -> Result<()> {
    let bundle = BundleCache::new(models_dir).get()?;
    let rows = read_feature_rows(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let predictions = bundle.predict(&rows)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&predictions)?);
        return Ok(());
    }
    println!(
        "Model: {} (version {})",
        bundle.model_name(),
        bundle.version()
    );
    println!("{:<6} {:<10} {:>12}", "Row", "Label", "Probability");
    for (i, prediction) in predictions.iter().enumerate() {
        let label = if prediction.label == 1 { "affected" } else { "healthy" };
        let probability = prediction
            .probability
            .map(|p| format!("{p:.4}"))
            .unwrap_or_else(|| "-".to_string());
        println!("{i:<6} {label:<10} {probability:>12}");
    }
    Ok(())
}

fn run_importance(models_dir: &Path, json: bool) -> Result<()> {
    let bundle = BundleCache::new(models_dir).get()?;
    let ranking = bundle.global_importance()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ranking)?);
        return Ok(());
    }
    println!("Global feature importance ({})", bundle.model_name());
    for entry in &ranking {
        println!(
            "  {:<20} {:>8.4}  {}",
            entry.feature,
            entry.importance,
            entry.impact.as_str()
        );
    }
    Ok(())
}

fn run_explain(
    input: &Path,
    row: usize,
    top: usize,
    config: &ExplainConfig,
    models_dir: &Path,
    json: bool,
) -> Result<()> {
    let bundle = BundleCache::new(models_dir).get()?;
    let rows = read_feature_rows(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let record = bundle.explain_instance_with(&rows, row, config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    println!(
        "Row {} explained by {} ({:?} space)",
        record.row_index, record.model_name, record.output_space
    );
    println!("  base value: {:.4}", record.base_value);
    println!("  output:     {:.4}", record.output);
    println!();
    for contribution in record.top(top) {
        let direction = if contribution.contribution >= 0.0 {
            "towards affected"
        } else {
            "towards healthy"
        };
        println!(
            "  {:<20} = {:>12.6}  {:>+9.4}  {direction}",
            contribution.feature, contribution.value, contribution.contribution
        );
    }
    Ok(())
}
