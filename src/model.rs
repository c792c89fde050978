//! Scoring model
//!
//! The narrow interfaces through which the conformal engines consume external
//! scoring algorithms. Implementations own their hyper-parameters and their fitted
//! state; [`ScoringModel::clone_untrained`] must return a copy without the latter.
use crate::data::{DataRecord, FeatureVector};
use crate::errors::ConformalError;
use std::collections::BTreeMap;

/// Capabilities shared by every scoring model.
pub trait ScoringModel: Send + Sync {
    /// Fit the model to the records, replacing any earlier fit.
    fn fit(&mut self, records: &[DataRecord]) -> Result<(), ConformalError>;

    /// Whether the model has been fit.
    fn is_fitted(&self) -> bool;

    /// An unfitted copy with identical hyper-parameters.
    fn clone_untrained(&self) -> Self
    where
        Self: Sized;

    /// Human readable name, used in log messages.
    fn name(&self) -> &str;
}

/// Classifier producing one decision score per label, larger meaning more likely.
pub trait Classifier: ScoringModel {
    /// Decision score for every label seen during fitting.
    fn predict_scores(&self, features: &FeatureVector) -> Result<BTreeMap<i32, f64>, ConformalError>;

    /// Whether [`Classifier::predict_probabilities`] is implemented.
    fn supports_probabilities(&self) -> bool {
        false
    }

    /// Probability for every label seen during fitting.
    fn predict_probabilities(&self, _features: &FeatureVector) -> Result<BTreeMap<i32, f64>, ConformalError> {
        Err(ConformalError::Unsupported(format!(
            "{} does not produce probabilities",
            self.name()
        )))
    }
}

/// Regressor producing a point prediction.
pub trait Regressor: ScoringModel {
    fn predict_value(&self, features: &FeatureVector) -> Result<f64, ConformalError>;
}
