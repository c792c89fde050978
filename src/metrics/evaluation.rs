use crate::errors::ConformalError;

/// Metric object accumulating `(observed label, prediction)` pairs.
///
/// `P` is the prediction type the metric understands: p-values for conformal
/// classification, interval predictions for conformal regression and calibrated
/// probabilities for Venn-ABERS.
pub trait EvaluationMetric<P: ?Sized> {
    /// Record one observation.
    fn add_prediction(&mut self, observed: f64, prediction: &P) -> Result<(), ConformalError>;

    /// Current value, `None` before the first observation.
    fn value(&self) -> Option<f64>;

    fn num_observations(&self) -> usize;

    /// Forget every observation.
    fn clear(&mut self);

    fn name(&self) -> String;

    /// Whether larger values are better.
    fn maximize(&self) -> bool;
}

/// Compare two metric values, determining if `comparison` is better.
/// If one of them is NaN favor the non NaN value.
pub fn is_comparison_better(value: f64, comparison: f64, maximize: bool) -> bool {
    match (value.is_nan(), comparison.is_nan()) {
        (true, true) | (false, true) => false,
        (true, false) => true,
        (false, false) => {
            if maximize {
                value < comparison
            } else {
                value > comparison
            }
        }
    }
}
