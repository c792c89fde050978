//! Conformal Prediction
//!
//! Aggregated (ACP) and transductive (TCP) conformal predictors producing p-values,
//! prediction sets and prediction intervals with finite-sample validity.
//!
//! # Submodules
//!
//! * `classification`: aggregated conformal classifier.
//! * `regression`: aggregated conformal regressor and its interval predictions.
//! * `tcp`: transductive conformal classifier, retraining per label hypothesis.
//! * `ensemble`: the slot bookkeeping and parallel training shared by the aggregated predictors.
//! * `gradient`: finite-difference feature gradients.

pub mod classification;
pub mod ensemble;
pub mod gradient;
pub mod regression;
pub mod tcp;

pub use classification::AcpClassifier;
pub use gradient::SparseGradient;
pub use regression::{AcpRegressor, CPRegressionPrediction};
pub use tcp::TcpClassifier;

use crate::constants::DEFAULT_GRADIENT_STEPSIZE;
use crate::errors::ConformalError;
use crate::sampler::SampleMethod;
use crate::utils::{items_to_strings, mean, median};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How the sub-models of an aggregated predictor are combined.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AggregationStrategy {
    /// Compare each sub-model's test score with its own calibration scores and pool the counts.
    PooledScores,
    /// Median of the sub-model p-values (classification) or half-widths (regression).
    #[default]
    MedianPValue,
    /// Mean of the sub-model p-values (classification) or half-widths (regression).
    MeanPValue,
}

impl AggregationStrategy {
    /// Combine per sub-model values for the p-value strategies.
    pub(crate) fn combine(&self, values: &[f64]) -> Option<f64> {
        match self {
            AggregationStrategy::MeanPValue => mean(values),
            _ => median(values),
        }
    }
}

impl FromStr for AggregationStrategy {
    type Err = ConformalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PooledScores" => Ok(AggregationStrategy::PooledScores),
            "MedianPValue" => Ok(AggregationStrategy::MedianPValue),
            "MeanPValue" => Ok(AggregationStrategy::MeanPValue),
            _ => Err(ConformalError::ParseString(
                s.to_string(),
                "AggregationStrategy".to_string(),
                items_to_strings(vec!["PooledScores", "MedianPValue", "MeanPValue"]),
            )),
        }
    }
}

fn default_sampler() -> SampleMethod {
    SampleMethod::default()
}
fn default_min_successful_models() -> Option<usize> {
    None
}

/// Configuration of an aggregated conformal predictor.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AcpConfig {
    #[serde(default = "default_sampler")]
    pub sampler: SampleMethod,
    #[serde(default)]
    pub aggregation: AggregationStrategy,
    /// Fewest sub-models that must train for `train` to succeed, `None` for a strict majority.
    #[serde(default = "default_min_successful_models")]
    pub min_successful_models: Option<usize>,
}

impl Default for AcpConfig {
    fn default() -> Self {
        AcpConfig {
            sampler: default_sampler(),
            aggregation: AggregationStrategy::default(),
            min_successful_models: default_min_successful_models(),
        }
    }
}

impl AcpConfig {
    /// Set the sampler.
    /// * `sampler` - Strategy producing the proper-training / calibration splits.
    pub fn set_sampler(mut self, sampler: SampleMethod) -> Self {
        self.sampler = sampler;
        self
    }

    /// Set the aggregation strategy.
    /// * `aggregation` - How sub-model outputs are combined at prediction time.
    pub fn set_aggregation(mut self, aggregation: AggregationStrategy) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Set the minimum number of successfully trained sub-models.
    /// * `min_successful_models` - `None` requires a strict majority of the splits.
    pub fn set_min_successful_models(mut self, min_successful_models: Option<usize>) -> Self {
        self.min_successful_models = min_successful_models;
        self
    }

    pub(crate) fn required_models(&self, num_samples: usize) -> usize {
        self.min_successful_models.unwrap_or(num_samples / 2 + 1)
    }

    pub fn validate(&self) -> Result<(), ConformalError> {
        use crate::sampler::Sampler;
        self.sampler.validate()?;
        let n = self.sampler.num_samples();
        match self.min_successful_models {
            Some(m) if m == 0 || m > n => Err(ConformalError::InvalidParameter(
                "min_successful_models".to_string(),
                format!("value within 1 and {}", n),
                m.to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Stepsize used when none is given to `calculate_gradient`.
pub(crate) fn gradient_stepsize(stepsize: Option<f64>) -> f64 {
    stepsize.unwrap_or(DEFAULT_GRADIENT_STEPSIZE)
}

/// JSON import and export of plain state objects.
pub trait StateIO: Serialize + DeserializeOwned + Sized {
    /// Dump the state as a json string.
    fn json_dump(&self) -> Result<String, ConformalError> {
        serde_json::to_string(self).map_err(|e| ConformalError::UnableToWrite(e.to_string()))
    }

    /// Load the state from a json string.
    ///
    /// * `json_str` - String object, which can be serialized to json.
    fn from_json(json_str: &str) -> Result<Self, ConformalError> {
        serde_json::from_str::<Self>(json_str).map_err(|e| ConformalError::UnableToRead(e.to_string()))
    }
}

impl StateIO for AcpConfig {}
