use crate::calibration::cvap::CvapPrediction;
use crate::data::class_label;
use crate::errors::ConformalError;
use crate::metrics::evaluation::EvaluationMetric;

// Probabilities are clipped away from zero before taking logarithms.
const PROBABILITY_FLOOR: f64 = 1e-15;

/// Mean negative log probability of the observed label.
#[derive(Debug, Clone, Default)]
pub struct LogLoss {
    sum: f64,
    total: usize,
}

impl LogLoss {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvaluationMetric<CvapPrediction> for LogLoss {
    fn add_prediction(&mut self, observed: f64, prediction: &CvapPrediction) -> Result<(), ConformalError> {
        let label = class_label(observed)?;
        let p = prediction.probabilities.get(&label).copied().ok_or_else(|| {
            ConformalError::DataValidation(format!("no probability predicted for label {}", label))
        })?;
        self.sum -= p.max(PROBABILITY_FLOOR).ln();
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
        "LogLoss".to_string()
    }

    fn maximize(&self) -> bool {
        false
    }
}

/// Mean squared distance between the predicted distribution and the observed label.
#[derive(Debug, Clone, Default)]
pub struct Brier {
    sum: f64,
    total: usize,
}

impl Brier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvaluationMetric<CvapPrediction> for Brier {
    fn add_prediction(&mut self, observed: f64, prediction: &CvapPrediction) -> Result<(), ConformalError> {
        let label = class_label(observed)?;
        if !prediction.probabilities.contains_key(&label) {
            return Err(ConformalError::DataValidation(format!(
                "no probability predicted for label {}",
                label
            )));
        }
        self.sum += prediction
            .probabilities
            .iter()
            .map(|(l, p)| {
                let target = if *l == label { 1.0 } else { 0.0 };
                (p - target).powi(2)
            })
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
        "Brier".to_string()
    }

    fn maximize(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(p: f64) -> CvapPrediction {
        CvapPrediction {
            probabilities: vec![(0, 1.0 - p), (1, p)].into_iter().collect(),
            p0: p,
            p1: p,
            intervals: Vec::new(),
        }
    }

    #[test]
    fn test_log_loss() {
        let mut ll = LogLoss::new();
        ll.add_prediction(1.0, &prediction(0.5)).unwrap();
        assert!((ll.value().unwrap() - 2f64.ln()).abs() < 1e-12);
        ll.add_prediction(0.0, &prediction(1.0)).unwrap();
        assert!(ll.value().unwrap().is_finite());
        assert!(ll.add_prediction(2.0, &prediction(0.5)).is_err());
    }

    #[test]
    fn test_brier() {
        let mut brier = Brier::new();
        brier.add_prediction(1.0, &prediction(0.75)).unwrap();
        assert!((brier.value().unwrap() - 0.125).abs() < 1e-12);
        brier.clear();
        assert_eq!(brier.num_observations(), 0);
    }
}
