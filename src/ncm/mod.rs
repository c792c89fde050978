//! Nonconformity measures
//!
//! A nonconformity measure wraps a scoring model and turns a (features, label) pair
//! into a scalar strangeness score, larger meaning more unusual.
//!
//! # Submodules
//!
//! * `classification`: measures built on a [`Classifier`](crate::model::Classifier).
//! * `regression`: residual based measures built on a [`Regressor`](crate::model::Regressor),
//!   optionally normalized by a second error model.
pub mod classification;
pub mod regression;

pub use classification::{ClassificationNcmKind, ClassifierNcm};
pub use regression::{RegressionNcmKind, ResidualNcm};

use crate::data::{DataRecord, FeatureVector};
use crate::errors::ConformalError;
use std::collections::{BTreeMap, BTreeSet};

/// Capabilities shared by every nonconformity measure.
pub trait NonconformityMeasure: Send + Sync {
    /// Fit the underlying model(s).
    fn fit(&mut self, records: &[DataRecord]) -> Result<(), ConformalError>;

    fn is_fitted(&self) -> bool;

    /// Copy with the same configuration and no fitted state.
    fn clone_untrained(&self) -> Self
    where
        Self: Sized;

    fn name(&self) -> String;
}

/// Label-conditioned nonconformity.
pub trait ClassificationNcm: NonconformityMeasure {
    /// Nonconformity of `features` under the hypothesis that its label is `label`.
    fn score(&self, features: &FeatureVector, label: i32) -> Result<f64, ConformalError>;

    /// Nonconformity under every label hypothesis in `labels`.
    fn scores(&self, features: &FeatureVector, labels: &BTreeSet<i32>) -> Result<BTreeMap<i32, f64>, ConformalError> {
        labels.iter().map(|l| Ok((*l, self.score(features, *l)?))).collect()
    }

    /// Labels seen while fitting.
    fn labels(&self) -> &BTreeSet<i32>;
}

/// Residual nonconformity with an optional per-example scaling.
pub trait RegressionNcm: NonconformityMeasure {
    /// Point prediction, the midpoint of every interval.
    fn predict_midpoint(&self, features: &FeatureVector) -> Result<f64, ConformalError>;

    /// Positive heteroscedasticity normalizer of an example.
    fn interval_scaling(&self, features: &FeatureVector) -> Result<f64, ConformalError>;

    /// `|y - y_hat| / scaling`.
    fn score(&self, record: &DataRecord) -> Result<f64, ConformalError> {
        let y_hat = self.predict_midpoint(&record.features)?;
        let scaling = self.interval_scaling(&record.features)?;
        let score = (record.label - y_hat).abs() / scaling;
        if !score.is_finite() {
            return Err(ConformalError::NonFiniteScore(score));
        }
        Ok(score)
    }
}
