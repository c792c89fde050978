use crate::data::class_label;
use crate::errors::ConformalError;
use crate::metrics::evaluation::EvaluationMetric;
use crate::pvalue::prediction_set;
use crate::utils::validate_confidence;
use std::collections::BTreeMap;

type PValues = BTreeMap<i32, f64>;

/// Fraction of examples whose prediction set misses the observed label.
#[derive(Debug, Clone)]
pub struct ErrorRate {
    confidence: f64,
    errors: usize,
    total: usize,
}

impl ErrorRate {
    pub fn new(confidence: f64) -> Result<Self, ConformalError> {
        validate_confidence(confidence)?;
        Ok(ErrorRate {
            confidence,
            errors: 0,
            total: 0,
        })
    }
}

impl EvaluationMetric<PValues> for ErrorRate {
    fn add_prediction(&mut self, observed: f64, prediction: &PValues) -> Result<(), ConformalError> {
        let label = class_label(observed)?;
        if !prediction_set(prediction, self.confidence)?.contains(&label) {
            self.errors += 1;
        }
        self.total += 1;
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        (self.total > 0).then(|| self.errors as f64 / self.total as f64)
    }

    fn num_observations(&self) -> usize {
        self.total
    }

    fn clear(&mut self) {
        self.errors = 0;
        self.total = 0;
    }

    fn name(&self) -> String {
        format!("ErrorRate@{}", self.confidence)
    }

    fn maximize(&self) -> bool {
        false
    }
}

/// Mean number of labels in the prediction sets.
#[derive(Debug, Clone)]
pub struct AverageSetSize {
    confidence: f64,
    labels: usize,
    total: usize,
}

impl AverageSetSize {
    pub fn new(confidence: f64) -> Result<Self, ConformalError> {
        validate_confidence(confidence)?;
        Ok(AverageSetSize {
            confidence,
            labels: 0,
            total: 0,
        })
    }
}

impl EvaluationMetric<PValues> for AverageSetSize {
    fn add_prediction(&mut self, _observed: f64, prediction: &PValues) -> Result<(), ConformalError> {
        self.labels += prediction_set(prediction, self.confidence)?.len();
        self.total += 1;
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        (self.total > 0).then(|| self.labels as f64 / self.total as f64)
    }

    fn num_observations(&self) -> usize {
        self.total
    }

    fn clear(&mut self) {
        self.labels = 0;
        self.total = 0;
    }

    fn name(&self) -> String {
        format!("AverageSetSize@{}", self.confidence)
    }

    fn maximize(&self) -> bool {
        false
    }
}

/// Fraction of prediction sets holding exactly one label.
#[derive(Debug, Clone)]
pub struct SingleLabelRate {
    confidence: f64,
    singles: usize,
    total: usize,
}

impl SingleLabelRate {
    pub fn new(confidence: f64) -> Result<Self, ConformalError> {
        validate_confidence(confidence)?;
        Ok(SingleLabelRate {
            confidence,
            singles: 0,
            total: 0,
        })
    }
}

impl EvaluationMetric<PValues> for SingleLabelRate {
    fn add_prediction(&mut self, _observed: f64, prediction: &PValues) -> Result<(), ConformalError> {
        if prediction_set(prediction, self.confidence)?.len() == 1 {
            self.singles += 1;
        }
        self.total += 1;
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        (self.total > 0).then(|| self.singles as f64 / self.total as f64)
    }

    fn num_observations(&self) -> usize {
        self.total
    }

    fn clear(&mut self) {
        self.singles = 0;
        self.total = 0;
    }

    fn name(&self) -> String {
        format!("SingleLabelRate@{}", self.confidence)
    }

    fn maximize(&self) -> bool {
        true
    }
}

/// Mean sum of the p-values of the labels that were not observed.
#[derive(Debug, Clone, Default)]
pub struct ObservedFuzziness {
    sum: f64,
    total: usize,
}

impl ObservedFuzziness {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvaluationMetric<PValues> for ObservedFuzziness {
    fn add_prediction(&mut self, observed: f64, prediction: &PValues) -> Result<(), ConformalError> {
        let label = class_label(observed)?;
        self.sum += prediction
            .iter()
            .filter(|(l, _)| **l != label)
            .map(|(_, p)| *p)
            .sum::<f64>();
        self.total += 1;
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        (self.total > 0).then(|| self.sum / self.total as f64)
    }

    fn num_observations(&self) -> usize {
        self.total
    }

    fn clear(&mut self) {
        self.sum = 0.0;
        self.total = 0;
    }

    fn name(&self) -> String {
        "ObservedFuzziness".to_string()
    }

    fn maximize(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pvalues(p0: f64, p1: f64) -> PValues {
        vec![(0, p0), (1, p1)].into_iter().collect()
    }

    #[test]
    fn test_error_rate_and_set_size() {
        let mut error = ErrorRate::new(0.8).unwrap();
        let mut size = AverageSetSize::new(0.8).unwrap();
        let mut single = SingleLabelRate::new(0.8).unwrap();
        assert_eq!(error.value(), None);
        for (observed, p) in [(0.0, pvalues(0.5, 0.1)), (1.0, pvalues(0.5, 0.1)), (1.0, pvalues(0.3, 0.9))] {
            error.add_prediction(observed, &p).unwrap();
            size.add_prediction(observed, &p).unwrap();
            single.add_prediction(observed, &p).unwrap();
        }
        assert!((error.value().unwrap() - 1.0 / 3.0).abs() < 1e-12);
        assert!((size.value().unwrap() - 4.0 / 3.0).abs() < 1e-12);
        assert!((single.value().unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(error.num_observations(), 3);
        error.clear();
        assert_eq!(error.value(), None);
        assert!(ErrorRate::new(0.0).is_err());
    }

    #[test]
    fn test_observed_fuzziness() {
        let mut fuzz = ObservedFuzziness::new();
        fuzz.add_prediction(0.0, &pvalues(0.9, 0.2)).unwrap();
        fuzz.add_prediction(1.0, &pvalues(0.4, 0.6)).unwrap();
        assert!((fuzz.value().unwrap() - 0.3).abs() < 1e-12);
        assert!(fuzz.add_prediction(0.5, &pvalues(0.1, 0.1)).is_err());
    }
}
