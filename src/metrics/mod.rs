//! Metrics
//!
//! Evaluation metrics for conformal classifiers, conformal regressors and Venn-ABERS predictors.
pub mod classification;
pub mod evaluation;
pub mod probabilistic;
pub mod regression;

use crate::calibration::cvap::CvapPrediction;
use crate::conformal::regression::CPRegressionPrediction;
use crate::errors::ConformalError;
use crate::utils::{items_to_strings, validate_confidence};
use evaluation::EvaluationMetric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

pub use evaluation::is_comparison_better;

/// Confidence used by confidence dependent metrics parsed without an explicit level.
pub const DEFAULT_METRIC_CONFIDENCE: f64 = 0.8;

pub type ClassificationMetric = Box<dyn EvaluationMetric<BTreeMap<i32, f64>> + Send>;
pub type RegressionMetric = Box<dyn EvaluationMetric<CPRegressionPrediction> + Send>;
pub type ProbabilisticMetric = Box<dyn EvaluationMetric<CvapPrediction> + Send>;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub enum Metric {
    ErrorRate { confidence: f64 },
    AverageSetSize { confidence: f64 },
    SingleLabelRate { confidence: f64 },
    ObservedFuzziness,
    Coverage { confidence: f64 },
    MedianWidth { confidence: f64 },
    RootMeanSquaredError,
    LogLoss,
    Brier,
}

impl Metric {
    /// Build the metric for p-value predictions, `None` if it does not apply to them.
    pub fn classification(&self) -> Result<Option<ClassificationMetric>, ConformalError> {
        Ok(match *self {
            Metric::ErrorRate { confidence } => Some(Box::new(classification::ErrorRate::new(confidence)?)),
            Metric::AverageSetSize { confidence } => Some(Box::new(classification::AverageSetSize::new(confidence)?)),
            Metric::SingleLabelRate { confidence } => {
                Some(Box::new(classification::SingleLabelRate::new(confidence)?))
            }
            Metric::ObservedFuzziness => Some(Box::new(classification::ObservedFuzziness::new())),
            _ => None,
        })
    }

    /// Build the metric for interval predictions, `None` if it does not apply to them.
    pub fn regression(&self) -> Result<Option<RegressionMetric>, ConformalError> {
        Ok(match *self {
            Metric::Coverage { confidence } => Some(Box::new(regression::Coverage::new(confidence)?)),
            Metric::MedianWidth { confidence } => Some(Box::new(regression::MedianWidth::new(confidence)?)),
            Metric::RootMeanSquaredError => Some(Box::new(regression::RootMeanSquaredError::new())),
            _ => None,
        })
    }

    /// Build the metric for calibrated probabilities, `None` if it does not apply to them.
    pub fn probabilistic(&self) -> Option<ProbabilisticMetric> {
        match self {
            Metric::LogLoss => Some(Box::new(probabilistic::LogLoss::new())),
            Metric::Brier => Some(Box::new(probabilistic::Brier::new())),
            _ => None,
        }
    }
}

fn parse_error(s: &str) -> ConformalError {
    ConformalError::ParseString(
        s.to_string(),
        "Metric".to_string(),
        items_to_strings(vec![
            "ErrorRate[@confidence]",
            "AverageSetSize[@confidence]",
            "SingleLabelRate[@confidence]",
            "ObservedFuzziness",
            "Coverage[@confidence]",
            "MedianWidth[@confidence]",
            "RootMeanSquaredError",
            "LogLoss",
            "Brier",
        ]),
    )
}

impl FromStr for Metric {
    type Err = ConformalError;

    /// Parse `Name` or `Name@confidence`, e.g. `ErrorRate@0.9`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, confidence) = match s.split_once('@') {
            Some((name, level)) => {
                let confidence: f64 = level.trim().parse().map_err(|_| parse_error(s))?;
                validate_confidence(confidence)?;
                (name.trim(), Some(confidence))
            }
            None => (s.trim(), None),
        };
        let level = confidence.unwrap_or(DEFAULT_METRIC_CONFIDENCE);
        let metric = match name {
            "ErrorRate" => Metric::ErrorRate { confidence: level },
            "AverageSetSize" => Metric::AverageSetSize { confidence: level },
            "SingleLabelRate" => Metric::SingleLabelRate { confidence: level },
            "Coverage" => Metric::Coverage { confidence: level },
            "MedianWidth" => Metric::MedianWidth { confidence: level },
            "ObservedFuzziness" if confidence.is_none() => Metric::ObservedFuzziness,
            "RootMeanSquaredError" if confidence.is_none() => Metric::RootMeanSquaredError,
            "LogLoss" if confidence.is_none() => Metric::LogLoss,
            "Brier" if confidence.is_none() => Metric::Brier,
            _ => return Err(parse_error(s)),
        };
        Ok(metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(
            Metric::from_str("ErrorRate@0.9").unwrap(),
            Metric::ErrorRate { confidence: 0.9 }
        );
        assert_eq!(
            Metric::from_str("Coverage").unwrap(),
            Metric::Coverage {
                confidence: DEFAULT_METRIC_CONFIDENCE
            }
        );
        assert_eq!(Metric::from_str("Brier").unwrap(), Metric::Brier);
        assert!(Metric::from_str("Brier@0.9").is_err());
        assert!(Metric::from_str("ErrorRate@1.5").is_err());
        assert!(Metric::from_str("AUC").is_err());
    }

    #[test]
    fn test_factories() {
        let metric = Metric::from_str("SingleLabelRate@0.7").unwrap();
        let built = metric.classification().unwrap().unwrap();
        assert_eq!(built.name(), "SingleLabelRate@0.7");
        assert!(built.maximize());
        assert!(metric.regression().unwrap().is_none());
        assert!(metric.probabilistic().is_none());
        assert!(Metric::LogLoss.probabilistic().is_some());
        assert!(Metric::RootMeanSquaredError.regression().unwrap().is_some());
    }
}
