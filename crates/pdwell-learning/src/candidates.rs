//! The fixed registry of candidate pipelines.
//!
//! Order matters: it is the order candidates are reported in and the
//! tie-break order for model selection.

use crate::config::PipelineConfig;
use crate::estimators::{
    ClassifierKind, GradientBoosting, LogisticRegression, ModelPipeline, RandomForest,
    SvmClassifier,
};

/// Builds an unfitted pipeline for one candidate.
#[derive(Clone, Copy)]
pub struct CandidateFactory {
    name: &'static str,
    build: fn(&PipelineConfig) -> ModelPipeline,
    available: fn(&PipelineConfig) -> bool,
}

impl std::fmt::Debug for CandidateFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateFactory")
            .field("name", &self.name)
            .finish()
    }
}

impl CandidateFactory {
    /// A candidate that is always available.
    ///
    /// Registered candidates come from [`registry()`]; this is for callers
    /// that hand [`PipelineBuilder::candidates`](crate::PipelineBuilder::candidates)
    /// a list of their own.
    pub const fn new(name: &'static str, build: fn(&PipelineConfig) -> ModelPipeline) -> Self {
        Self {
            name,
            build,
            available: always,
        }
    }

    /// Name used in reports, summaries and failure lists.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A fresh, unfitted pipeline for this candidate.
    pub fn build(&self, config: &PipelineConfig) -> ModelPipeline {
        (self.build)(config)
    }

    /// Whether the candidate takes part in a run under `config`.
    pub fn is_available(&self, config: &PipelineConfig) -> bool {
        (self.available)(config)
    }
}

fn always(_: &PipelineConfig) -> bool {
    true
}

fn svm_rbf(config: &PipelineConfig) -> ModelPipeline {
    ModelPipeline::new(ClassifierKind::Svm(SvmClassifier::default()))
        .with_scaler()
        .with_selector(config.k_best)
}

fn random_forest(_: &PipelineConfig) -> ModelPipeline {
    ModelPipeline::new(ClassifierKind::RandomForest(RandomForest::default())).with_scaler()
}

fn gradient_boosting(_: &PipelineConfig) -> ModelPipeline {
    ModelPipeline::new(ClassifierKind::GradientBoosting(GradientBoosting::new())).with_scaler()
}

fn logistic_regression(_: &PipelineConfig) -> ModelPipeline {
    ModelPipeline::new(ClassifierKind::LogisticRegression(
        LogisticRegression::default(),
    ))
    .with_scaler()
}

#[cfg(feature = "boosting-variants")]
fn regularized_boosting(_: &PipelineConfig) -> ModelPipeline {
    ModelPipeline::new(ClassifierKind::GradientBoosting(
        GradientBoosting::regularized(),
    ))
    .with_scaler()
}

#[cfg(feature = "boosting-variants")]
fn boosting_variants_enabled(config: &PipelineConfig) -> bool {
    config.enable_boosting_variants
}

/// Every registered candidate, in selection order.
pub fn registry() -> Vec<CandidateFactory> {
    #[allow(unused_mut)]
    let mut factories = vec![
        CandidateFactory {
            name: "SVM_RBF",
            build: svm_rbf,
            available: always,
        },
        CandidateFactory {
            name: "RandomForest",
            build: random_forest,
            available: always,
        },
        CandidateFactory {
            name: "GradientBoosting",
            build: gradient_boosting,
            available: always,
        },
        CandidateFactory {
            name: "LogisticRegression",
            build: logistic_regression,
            available: always,
        },
    ];
    #[cfg(feature = "boosting-variants")]
    factories.push(CandidateFactory {
        name: "RegularizedBoosting",
        build: regularized_boosting,
        available: boosting_variants_enabled,
    });
    factories
}

/// Registered candidates that are available under `config`.
pub fn available_candidates(config: &PipelineConfig) -> Vec<CandidateFactory> {
    registry()
        .into_iter()
        .filter(|f| f.is_available(config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_order() {
        let names: Vec<&str> = registry().iter().map(|f| f.name()).collect();
        assert_eq!(
            &names[..4],
            &["SVM_RBF", "RandomForest", "GradientBoosting", "LogisticRegression"]
        );
    }

    #[test]
    fn test_pipelines_match_candidates() {
        let config = PipelineConfig::default();
        for factory in registry() {
            let pipeline = factory.build(&config);
            assert!(pipeline.scaler().is_some(), "{} should scale", factory.name());
            assert_eq!(
                pipeline.selector().is_some(),
                factory.name() == "SVM_RBF",
                "{}",
                factory.name()
            );
        }
    }

    #[cfg(feature = "boosting-variants")]
    #[test]
    fn test_boosting_variant_respects_config() {
        let enabled = PipelineConfig::default();
        assert_eq!(available_candidates(&enabled).len(), 5);
        assert_eq!(
            available_candidates(&enabled)[4].build(&enabled).kind(),
            "regularized_boosting"
        );

        let disabled = PipelineConfig::builder()
            .enable_boosting_variants(false)
            .build()
            .unwrap();
        let names: Vec<&str> = available_candidates(&disabled)
            .iter()
            .map(|f| f.name())
            .collect();
        assert!(!names.contains(&"RegularizedBoosting"));
    }

    #[test]
    fn test_custom_factory_is_always_available() {
        fn plain(_: &PipelineConfig) -> ModelPipeline {
            ModelPipeline::new(ClassifierKind::LogisticRegression(LogisticRegression::default()))
        }
        let config = PipelineConfig::builder()
            .enable_boosting_variants(false)
            .build()
            .unwrap();
        let factory = CandidateFactory::new("Plain", plain);
        assert_eq!(factory.name(), "Plain");
        assert!(factory.is_available(&config));
        assert_eq!(factory.build(&config).kind(), "logistic_regression");
    }
}
