use crate::conformal::regression::{CPRegressionPrediction, PredictedInterval};
use crate::errors::ConformalError;
use crate::metrics::evaluation::EvaluationMetric;
use crate::utils::{median, validate_confidence};

fn interval_at(prediction: &CPRegressionPrediction, confidence: f64) -> Result<PredictedInterval, ConformalError> {
    prediction.at_confidence(confidence).copied().ok_or_else(|| {
        ConformalError::InvalidParameter(
            "prediction".to_string(),
            format!("an interval at confidence {}", confidence),
            "no such interval".to_string(),
        )
    })
}

/// Fraction of observations falling inside the interval at a confidence level.
#[derive(Debug, Clone)]
pub struct Coverage {
    confidence: f64,
    covered: usize,
    total: usize,
}

impl Coverage {
    pub fn new(confidence: f64) -> Result<Self, ConformalError> {
        validate_confidence(confidence)?;
        Ok(Coverage {
            confidence,
            covered: 0,
            total: 0,
        })
    }
}

impl EvaluationMetric<CPRegressionPrediction> for Coverage {
    fn add_prediction(&mut self, observed: f64, prediction: &CPRegressionPrediction) -> Result<(), ConformalError> {
        let (lo, hi) = interval_at(prediction, self.confidence)?.interval();
        if lo <= observed && observed <= hi {
            self.covered += 1;
        }
        self.total += 1;
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        (self.total > 0).then(|| self.covered as f64 / self.total as f64)
    }

    fn num_observations(&self) -> usize {
        self.total
    }

    fn clear(&mut self) {
        self.covered = 0;
        self.total = 0;
    }

    fn name(&self) -> String {
        format!("Coverage@{}", self.confidence)
    }

    fn maximize(&self) -> bool {
        true
    }
}

/// Median full width of the intervals at a confidence level.
#[derive(Debug, Clone)]
pub struct MedianWidth {
    confidence: f64,
    widths: Vec<f64>,
}

impl MedianWidth {
    pub fn new(confidence: f64) -> Result<Self, ConformalError> {
        validate_confidence(confidence)?;
        Ok(MedianWidth {
            confidence,
            widths: Vec::new(),
        })
    }
}

impl EvaluationMetric<CPRegressionPrediction> for MedianWidth {
    fn add_prediction(&mut self, _observed: f64, prediction: &CPRegressionPrediction) -> Result<(), ConformalError> {
        self.widths
            .push(2.0 * interval_at(prediction, self.confidence)?.half_width);
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        median(&self.widths)
    }

    fn num_observations(&self) -> usize {
        self.widths.len()
    }

    fn clear(&mut self) {
        self.widths.clear();
    }

    fn name(&self) -> String {
        format!("MedianWidth@{}", self.confidence)
    }

    fn maximize(&self) -> bool {
        false
    }
}

/// Root mean squared error of the interval midpoints.
#[derive(Debug, Clone, Default)]
pub struct RootMeanSquaredError {
    squared: f64,
    total: usize,
}

impl RootMeanSquaredError {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvaluationMetric<CPRegressionPrediction> for RootMeanSquaredError {
    fn add_prediction(&mut self, observed: f64, prediction: &CPRegressionPrediction) -> Result<(), ConformalError> {
        self.squared += (observed - prediction.y_hat).powi(2);
        self.total += 1;
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.squared / self.total as f64).sqrt())
    }

    fn num_observations(&self) -> usize {
        self.total
    }

    fn clear(&mut self) {
        self.squared = 0.0;
        self.total = 0;
    }

    fn name(&self) -> String {
        "RootMeanSquaredError".to_string()
    }

    fn maximize(&self) -> bool {
        false
    }
}
