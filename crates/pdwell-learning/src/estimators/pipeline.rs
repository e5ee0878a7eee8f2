//! Scaler, selector and classifier fitted and applied as one unit.

use ndarray::{Array2, ArrayView1, ArrayView2, CowArray, Ix2};
use serde::{Deserialize, Serialize};

use super::{Classifier, ClassifierKind, LocalAttribution, SelectKBest, StandardScaler};
use crate::error::{PdwellError, Result};

/// Optional scaling, optional selection, then a classifier.
///
/// A pipeline is fitted once as a whole; transforms are frozen afterwards and
/// applied in the same order at scoring time. Attributions and importances
/// are reported in raw input-column space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPipeline {
    scaler: Option<StandardScaler>,
    selector: Option<SelectKBest>,
    classifier: ClassifierKind,
    n_features_in: usize,
}

impl ModelPipeline {
    /// A bare classifier; add stages with [`with_scaler`](Self::with_scaler)
    /// and [`with_selector`](Self::with_selector).
    pub fn new(classifier: ClassifierKind) -> Self {
        Self {
            scaler: None,
            selector: None,
            classifier,
            n_features_in: 0,
        }
    }

    pub fn with_scaler(mut self) -> Self {
        self.scaler = Some(StandardScaler::new());
        self
    }

    pub fn with_selector(mut self, k: usize) -> Self {
        self.selector = Some(SelectKBest::new(k));
        self
    }

    /// Fit every stage in order on `x`, passing `seed` to the classifier.
    pub fn fit(&mut self, x: ArrayView2<f64>, y: &[u8], seed: u64) -> Result<()> {
        let mut current: CowArray<f64, Ix2> = x.into();
        if let Some(scaler) = &mut self.scaler {
            current = scaler.fit_transform(current.view())?.into();
        }
        if let Some(selector) = &mut self.selector {
            selector.fit(current.view(), y)?;
            current = selector.transform(current.view())?.into();
        }
        self.classifier.fit(current.view(), y, seed)?;
        self.n_features_in = x.ncols();
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        self.classifier.is_fitted()
    }

    /// Apply the fitted scaler and selector.
    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted() {
            return Err(PdwellError::Inference(format!(
                "{} pipeline is not fitted",
                self.kind()
            )));
        }
        if x.ncols() != self.n_features_in {
            return Err(PdwellError::Inference(format!(
                "pipeline expects {} features, got {}",
                self.n_features_in,
                x.ncols()
            )));
        }
        let mut current = x.to_owned();
        if let Some(scaler) = &self.scaler {
            current = scaler.transform(current.view())?;
        }
        if let Some(selector) = &self.selector {
            current = selector.transform(current.view())?;
        }
        Ok(current)
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<u8>> {
        let z = self.transform(x)?;
        self.classifier.predict(z.view())
    }

    /// Class-1 probabilities, or `None` for classifiers without them.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Option<Vec<f64>>> {
        let z = self.transform(x)?;
        self.classifier.predict_proba(z.view())
    }

    pub fn supports_native_importance(&self) -> bool {
        self.classifier.supports_native_importance()
    }

    /// Classifier importance spread back over the input columns; columns the
    /// selector dropped get zero.
    pub fn native_importance(&self) -> Option<Vec<f64>> {
        let importance = self.classifier.native_importance()?;
        Some(match &self.selector {
            Some(selector) => selector.expand(&importance),
            None => importance,
        })
    }

    pub fn supports_local_attribution(&self) -> bool {
        self.classifier.supports_local_attribution()
    }

    /// Attribution of one raw row against raw background rows.
    pub fn attribute(
        &self,
        x: ArrayView1<f64>,
        background: ArrayView2<f64>,
    ) -> Result<LocalAttribution> {
        if !self.supports_local_attribution() {
            return Err(PdwellError::ExplanationUnavailable {
                model: self.kind().to_string(),
                reason: "no local attribution support for this classifier".to_string(),
            });
        }
        let row = self.transform(x.insert_axis(ndarray::Axis(0)))?;
        let background = self.transform(background)?;
        let mut attribution = self
            .classifier
            .local_attribution(row.row(0), background.view())?;
        if let Some(selector) = &self.selector {
            attribution.contributions = selector.expand(&attribution.contributions);
        }
        Ok(attribution)
    }

    pub fn scaler(&self) -> Option<&StandardScaler> {
        self.scaler.as_ref()
    }

    pub fn selector(&self) -> Option<&SelectKBest> {
        self.selector.as_ref()
    }

    pub fn classifier(&self) -> &ClassifierKind {
        &self.classifier
    }

    /// Raw input width seen at fit time.
    pub fn n_features_in(&self) -> usize {
        self.n_features_in
    }

    pub fn kind(&self) -> &'static str {
        self.classifier.kind()
    }
}
