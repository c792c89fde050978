//! P-values
//!
//! Pure functions turning nonconformity scores and calibration sets into p-values,
//! prediction sets, calibration quantiles and forced-prediction metrics.
use crate::errors::ConformalError;
use crate::utils::{count_at_or_below, count_below, is_non_decreasing, sorted, validate_confidence};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Fail on NaN or infinite scores.
pub fn validate_scores(scores: &[f64]) -> Result<(), ConformalError> {
    match scores.iter().find(|s| !s.is_finite()) {
        Some(s) => Err(ConformalError::NonFiniteScore(*s)),
        None => Ok(()),
    }
}

fn empty_calibration_error() -> ConformalError {
    ConformalError::InvalidParameter(
        "calibration set".to_string(),
        "at least one nonconformity score".to_string(),
        "0 scores".to_string(),
    )
}

/// Conformal p-value of `score` against an unsorted calibration set.
///
/// `p = (#{c >= score} + 1) / (n + 1)`, ties counted inclusively.
pub fn p_value(calibration: &[f64], score: f64) -> Result<f64, ConformalError> {
    if calibration.is_empty() {
        return Err(empty_calibration_error());
    }
    validate_scores(calibration)?;
    validate_scores(&[score])?;
    let at_least = calibration.iter().filter(|c| **c >= score).count();
    Ok((at_least + 1) as f64 / (calibration.len() + 1) as f64)
}

/// Sorted, finite calibration scores of one calibrated model.
///
/// Deserialized sets go through [`CalibrationSet::new`], so restored state is
/// validated and sorted the same way as freshly computed scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCalibrationSet")]
pub struct CalibrationSet {
    scores: Vec<f64>,
}

#[derive(Deserialize)]
struct RawCalibrationSet {
    scores: Vec<f64>,
}

impl TryFrom<RawCalibrationSet> for CalibrationSet {
    type Error = ConformalError;

    fn try_from(raw: RawCalibrationSet) -> Result<Self, Self::Error> {
        CalibrationSet::new(&raw.scores)
    }
}

impl CalibrationSet {
    /// Validate and sort the scores.
    pub fn new(scores: &[f64]) -> Result<Self, ConformalError> {
        if scores.is_empty() {
            return Err(empty_calibration_error());
        }
        validate_scores(scores)?;
        Ok(CalibrationSet { scores: sorted(scores) })
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Scores in ascending order.
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    /// Number of calibration scores greater than or equal to `score`.
    pub fn count_at_least(&self, score: f64) -> usize {
        self.scores.len() - count_below(&self.scores, score)
    }

    pub fn p_value(&self, score: f64) -> Result<f64, ConformalError> {
        validate_scores(&[score])?;
        Ok((self.count_at_least(score) + 1) as f64 / (self.scores.len() + 1) as f64)
    }

    /// The `ceil((n + 1) * confidence)`-th smallest score, infinite when that rank exceeds `n`.
    pub fn quantile(&self, confidence: f64) -> Result<f64, ConformalError> {
        validate_confidence(confidence)?;
        let n = self.scores.len();
        let rank = ((n + 1) as f64 * confidence).ceil() as usize;
        if rank > n {
            Ok(f64::INFINITY)
        } else {
            Ok(self.scores[rank.max(1) - 1])
        }
    }

    /// Quantiles for several confidences, which must come out non-decreasing.
    pub fn quantiles(&self, confidences: &[f64]) -> Result<Vec<f64>, ConformalError> {
        let mut order: Vec<usize> = (0..confidences.len()).collect();
        order.sort_by(|a, b| confidences[*a].total_cmp(&confidences[*b]));
        let qs = confidences
            .iter()
            .map(|c| self.quantile(*c))
            .collect::<Result<Vec<f64>, ConformalError>>()?;
        let ordered: Vec<f64> = order.iter().map(|i| qs[*i]).collect();
        if !is_non_decreasing(&ordered) {
            return Err(ConformalError::DataValidation(
                "calibration quantiles decrease with increasing confidence".to_string(),
            ));
        }
        Ok(qs)
    }

    /// Largest confidence whose quantile does not exceed `score`: `#{c <= score} / (n + 1)`.
    pub fn confidence_for_score(&self, score: f64) -> f64 {
        if score.is_nan() {
            return 0.0;
        }
        count_at_or_below(&self.scores, score) as f64 / (self.scores.len() + 1) as f64
    }
}

/// Labels whose p-value exceeds `1 - confidence`.
pub fn prediction_set(pvalues: &BTreeMap<i32, f64>, confidence: f64) -> Result<BTreeSet<i32>, ConformalError> {
    validate_confidence(confidence)?;
    Ok(labels_above(pvalues, 1.0 - confidence))
}

/// Labels whose p-value exceeds the significance level.
pub fn prediction_set_at_significance(
    pvalues: &BTreeMap<i32, f64>,
    significance: f64,
) -> Result<BTreeSet<i32>, ConformalError> {
    if significance.is_nan() || !(0.0..1.0).contains(&significance) {
        return Err(ConformalError::InvalidParameter(
            "significance".to_string(),
            "real value within [0, 1)".to_string(),
            significance.to_string(),
        ));
    }
    Ok(labels_above(pvalues, significance))
}

fn labels_above(pvalues: &BTreeMap<i32, f64>, threshold: f64) -> BTreeSet<i32> {
    pvalues
        .iter()
        .filter(|(_, p)| **p > threshold)
        .map(|(l, _)| *l)
        .collect()
}

/// Label with the largest p-value, the smallest label winning ties.
pub fn forced_prediction(pvalues: &BTreeMap<i32, f64>) -> Option<i32> {
    pvalues
        .iter()
        .fold(None, |best: Option<(i32, f64)>, (l, p)| match best {
            Some((_, bp)) if bp >= *p => best,
            _ => Some((*l, *p)),
        })
        .map(|(l, _)| l)
}

/// Largest p-value.
pub fn credibility(pvalues: &BTreeMap<i32, f64>) -> Option<f64> {
    pvalues.values().copied().reduce(f64::max)
}

/// One minus the second largest p-value, `1.0` for a single label.
pub fn confidence(pvalues: &BTreeMap<i32, f64>) -> Option<f64> {
    if pvalues.is_empty() {
        return None;
    }
    let mut ps: Vec<f64> = pvalues.values().copied().collect();
    ps.sort_by(|a, b| b.total_cmp(a));
    Some(1.0 - ps.get(1).copied().unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p_value_example() {
        let cal = vec![0.1, 0.2, 0.3, 0.4, 0.5];
        let p = p_value(&cal, 0.35).unwrap();
        assert!((p - 0.5).abs() < 1e-12);
        let set = CalibrationSet::new(&cal).unwrap();
        assert!((set.p_value(0.35).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ties_are_inclusive() {
        let set = CalibrationSet::new(&[0.2, 0.2, 0.2]).unwrap();
        assert_eq!(set.p_value(0.2).unwrap(), 1.0);
        assert_eq!(set.p_value(0.3).unwrap(), 0.25);
    }

    #[test]
    fn test_empty_and_non_finite_calibration() {
        let err = p_value(&[], 0.1).unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(
            CalibrationSet::new(&[0.1, f64::NAN]),
            Err(ConformalError::NonFiniteScore(_))
        ));
    }

    #[test]
    fn test_deserialized_set_is_validated() {
        let set: CalibrationSet = serde_json::from_str(r#"{"scores":[0.5,0.1,0.3]}"#).unwrap();
        assert_eq!(set.scores(), &[0.1, 0.3, 0.5]);
        assert!((set.p_value(0.2).unwrap() - 0.75).abs() < 1e-12);
        assert!(serde_json::from_str::<CalibrationSet>(r#"{"scores":[]}"#).is_err());
        let round_trip: CalibrationSet = serde_json::from_str(&serde_json::to_string(&set).unwrap()).unwrap();
        assert_eq!(round_trip, set);
    }

    #[test]
    fn test_prediction_set() {
        let pvalues: BTreeMap<i32, f64> = vec![(0, 0.8), (1, 0.04)].into_iter().collect();
        let all: Vec<i32> = prediction_set(&pvalues, 0.99).unwrap().into_iter().collect();
        assert_eq!(all, vec![0, 1]);
        let one: Vec<i32> = prediction_set(&pvalues, 0.5).unwrap().into_iter().collect();
        assert_eq!(one, vec![0]);
        assert!(prediction_set(&pvalues, 0.1).unwrap().is_empty());
        assert!(prediction_set(&pvalues, 0.0).is_err());

        let all_sig = prediction_set_at_significance(&pvalues, 0.0).unwrap();
        assert_eq!(all_sig.len(), 2);
        assert!(prediction_set_at_significance(&pvalues, 0.99).unwrap().len() <= 1);
    }

    #[test]
    fn test_quantile() {
        let set = CalibrationSet::new(&[0.5, 0.1, 0.4, 0.2, 0.3]).unwrap();
        // (n + 1) * 0.5 = 3 -> third smallest
        assert_eq!(set.quantile(0.5).unwrap(), 0.3);
        assert_eq!(set.quantile(0.8).unwrap(), 0.5);
        assert!(set.quantile(0.9).unwrap().is_infinite());
        assert_eq!(set.quantile(0.01).unwrap(), 0.1);
        assert!(set.quantile(0.0).is_err());
        let qs = set.quantiles(&[0.9, 0.5, 0.8]).unwrap();
        assert_eq!(qs[1], 0.3);
    }

    #[test]
    fn test_confidence_for_score_inverts_quantile() {
        let set = CalibrationSet::new(&[0.1, 0.2, 0.3, 0.4, 0.5]).unwrap();
        let c = set.confidence_for_score(0.35);
        assert!((c - 0.5).abs() < 1e-12);
        assert!(set.quantile(c).unwrap() <= 0.35);
        assert_eq!(set.confidence_for_score(0.05), 0.0);
    }

    #[test]
    fn test_forced_prediction_metrics() {
        let pvalues: BTreeMap<i32, f64> = vec![(0, 0.3), (1, 0.9), (2, 0.1)].into_iter().collect();
        assert_eq!(forced_prediction(&pvalues), Some(1));
        assert_eq!(credibility(&pvalues), Some(0.9));
        assert!((confidence(&pvalues).unwrap() - 0.7).abs() < 1e-12);
        assert_eq!(forced_prediction(&BTreeMap::new()), None);
    }
}
