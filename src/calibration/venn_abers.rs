//! Venn-ABERS calibration
//!
//! Computes, for every possible position of a new score among the calibration scores,
//! the isotonic fit the new example would receive under label 0 (`F0`) and label 1
//! (`F1`). Both curves come out of two sweeps over the convex hull of the cumulative
//! sum diagram, so prediction is a binary search instead of a refit.
use crate::calibration::isotonic::{merge_ties, WeightedPoint2D};
use crate::errors::ConformalError;
use crate::utils::{count_at_or_below, count_below};
use serde::{Deserialize, Serialize};

// Numerical slack when checking the monotonicity of the curves.
const MONOTONE_TOLERANCE: f64 = 1e-9;

type Point = (f64, f64);

#[inline]
fn cross(a: Point, b: Point, c: Point) -> f64 {
    (b.0 - a.0) * (c.1 - b.1) - (b.1 - a.1) * (c.0 - b.0)
}

#[inline]
fn non_left_turn(a: Point, b: Point, c: Point) -> bool {
    cross(a, b, c) <= 0.0
}

#[inline]
fn non_right_turn(a: Point, b: Point, c: Point) -> bool {
    cross(a, b, c) >= 0.0
}

#[inline]
fn slope(a: Point, b: Point) -> f64 {
    (b.1 - a.1) / (b.0 - a.0)
}

/// Whether `t` lies on or above the line through `p1` and `p2`.
#[inline]
fn not_below(t: Point, p1: Point, p2: Point) -> bool {
    let m = (p2.1 - p1.1) / (p2.0 - p1.0);
    let b = (p2.0 * p1.1 - p1.0 * p2.1) / (p2.0 - p1.0);
    t.1 >= t.0 * m + b
}

fn top_two(stack: &[Point]) -> Result<(Point, Point), ConformalError> {
    match stack {
        [.., second, top] => Ok((*top, *second)),
        _ => Err(ConformalError::InternalInvariant(
            "convex hull stack holds fewer than two corners".to_string(),
        )),
    }
}

/// Cumulative sum diagram shifted by one slot: slot 0 is reserved for `P_-1`,
/// slot `i + 1` holds `P_i` and slot `k + 2` is reserved for `P_k+1`.
fn cumulative_sums(data: &[WeightedPoint2D]) -> Vec<Point> {
    let mut points = vec![(0.0, 0.0); data.len() + 3];
    let (mut cw, mut cwy) = (0.0, 0.0);
    for (i, d) in data.iter().enumerate() {
        cw += d.w;
        cwy += d.w * d.y;
        points[i + 2] = (cw, cwy);
    }
    points
}

/// `F1` by position: entry `j` is the probability of a new example with `j`
/// calibration scores strictly below it, hypothesised to have label 1.
fn upper_curve(data: &[WeightedPoint2D]) -> Result<Vec<f64>, ConformalError> {
    let k = data.len();
    let mut p = cumulative_sums(data);
    p[0] = (-1.0, -1.0);

    let mut stack = vec![p[0], p[1]];
    for i in 1..=k {
        while stack.len() > 1 && non_left_turn(stack[stack.len() - 2], stack[stack.len() - 1], p[i + 1]) {
            stack.pop();
        }
        stack.push(p[i + 1]);
    }
    stack.reverse();

    let mut f1 = Vec::with_capacity(k + 1);
    for i in 1..=k {
        let (top, second) = top_two(&stack)?;
        f1.push(slope(top, second));
        p[i] = (p[i - 1].0 + p[i + 1].0 - p[i].0, p[i - 1].1 + p[i + 1].1 - p[i].1);
        if not_below(p[i], top, second) {
            continue;
        }
        stack.pop();
        while stack.len() > 1 && non_left_turn(p[i], stack[stack.len() - 1], stack[stack.len() - 2]) {
            stack.pop();
        }
        stack.push(p[i]);
    }
    // Above every calibration score the hypothesised label is the whole block.
    f1.push(1.0);
    Ok(f1)
}

/// `F0` by position: entry `j` is the probability of a new example with `j`
/// calibration scores at or below it, hypothesised to have label 0.
fn lower_curve(data: &[WeightedPoint2D]) -> Result<Vec<f64>, ConformalError> {
    let k = data.len();
    let mut p = cumulative_sums(data);
    p[k + 2] = (p[k + 1].0 + 1.0, p[k + 1].1);

    let mut stack = vec![p[k + 2], p[k + 1]];
    for i in (0..k).rev() {
        while stack.len() > 1 && non_right_turn(stack[stack.len() - 2], stack[stack.len() - 1], p[i + 1]) {
            stack.pop();
        }
        stack.push(p[i + 1]);
    }
    stack.reverse();

    let mut f0 = vec![0.0; k + 1];
    for i in (1..=k).rev() {
        let (top, second) = top_two(&stack)?;
        f0[i] = slope(top, second);
        p[i + 1] = (p[i].0 + p[i + 2].0 - p[i + 1].0, p[i].1 + p[i + 2].1 - p[i + 1].1);
        if !not_below(p[i + 1], top, second) {
            stack.pop();
            while stack.len() > 1 && non_right_turn(p[i + 1], stack[stack.len() - 1], stack[stack.len() - 2]) {
                stack.pop();
            }
            stack.push(p[i + 1]);
        }
    }
    Ok(f0)
}

/// Reject NaN and decreasing curves, then clamp rounding noise.
fn check_curve(name: &str, curve: &mut [f64]) -> Result<(), ConformalError> {
    let mut running = f64::NEG_INFINITY;
    for v in curve.iter_mut() {
        if v.is_nan() {
            return Err(ConformalError::InternalInvariant(format!("{} contains NaN", name)));
        }
        if *v < running - MONOTONE_TOLERANCE {
            return Err(ConformalError::InternalInvariant(format!(
                "{} decreases from {} to {}",
                name, running, v
            )));
        }
        // adding zero turns -0.0 into 0.0
        *v = v.clamp(0.0, 1.0).max(running) + 0.0;
        running = *v;
    }
    Ok(())
}

/// The probability pair of one example.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct VennAbersInterval {
    /// Calibrated probability of label 1 if the example were labelled 0.
    pub p0: f64,
    /// Calibrated probability of label 1 if the example were labelled 1.
    pub p1: f64,
}

impl VennAbersInterval {
    /// Single probability minimising log loss over the pair, `p1 / (1 - p0 + p1)`.
    pub fn probability(&self) -> f64 {
        self.p1 / (1.0 - self.p0 + self.p1)
    }

    pub fn width(&self) -> f64 {
        self.p1 - self.p0
    }
}

/// Fitted Venn-ABERS calibrator over binary labelled scores.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(try_from = "RawCalibrator")]
pub struct VennAbersCalibrator {
    scores: Vec<f64>,
    f0: Vec<f64>,
    f1: Vec<f64>,
}

#[derive(Deserialize)]
struct RawCalibrator {
    scores: Vec<f64>,
    f0: Vec<f64>,
    f1: Vec<f64>,
}

// Restored state must have the shape `fit` produces: distinct ascending finite
// scores and one more entry in each non-decreasing curve.
impl TryFrom<RawCalibrator> for VennAbersCalibrator {
    type Error = ConformalError;

    fn try_from(raw: RawCalibrator) -> Result<Self, Self::Error> {
        let RawCalibrator { scores, mut f0, mut f1 } = raw;
        if scores.is_empty() || f0.len() != scores.len() + 1 || f1.len() != scores.len() + 1 {
            return Err(ConformalError::DataValidation(format!(
                "calibrator with {} scores needs {} curve entries, got {} and {}",
                scores.len(),
                scores.len() + 1,
                f0.len(),
                f1.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) || scores.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConformalError::DataValidation(
                "calibrator scores must be finite and strictly ascending".to_string(),
            ));
        }
        if f0.iter().chain(f1.iter()).any(|v| !(0.0..=1.0).contains(v)) {
            return Err(ConformalError::DataValidation(
                "calibrator curves must lie in [0, 1]".to_string(),
            ));
        }
        check_curve("F0", &mut f0)?;
        check_curve("F1", &mut f1)?;
        Ok(VennAbersCalibrator { scores, f0, f1 })
    }
}

impl VennAbersCalibrator {
    /// Fit on `(score, label, weight)` points; labels must lie in `[0, 1]`.
    pub fn fit(points: &[WeightedPoint2D]) -> Result<Self, ConformalError> {
        if let Some(p) = points.iter().find(|p| !(0.0..=1.0).contains(&p.y)) {
            return Err(ConformalError::DataValidation(format!(
                "Venn-ABERS labels must lie in [0, 1], got {}",
                p.y
            )));
        }
        let data = merge_ties(points)?;
        if data.is_empty() {
            return Err(ConformalError::InvalidParameter(
                "calibration points".to_string(),
                "at least one point".to_string(),
                "0 points".to_string(),
            ));
        }
        let scores: Vec<f64> = data.iter().map(|p| p.x).collect();
        let k = data.len();

        if let Some(label) = single_label(&data) {
            return Ok(VennAbersCalibrator {
                scores,
                f0: vec![label; k + 1],
                f1: vec![label; k + 1],
            });
        }

        let mut f0 = lower_curve(&data)?;
        let mut f1 = upper_curve(&data)?;
        if f0.len() != k + 1 || f1.len() != k + 1 {
            return Err(ConformalError::InternalInvariant(format!(
                "expected {} curve entries, got {} and {}",
                k + 1,
                f0.len(),
                f1.len()
            )));
        }
        check_curve("F0", &mut f0)?;
        check_curve("F1", &mut f1)?;
        Ok(VennAbersCalibrator { scores, f0, f1 })
    }

    /// Fit on unweighted scores with boolean labels.
    pub fn fit_labels(scores: &[f64], positive: &[bool]) -> Result<Self, ConformalError> {
        if scores.len() != positive.len() {
            return Err(ConformalError::DataValidation(format!(
                "{} scores but {} labels",
                scores.len(),
                positive.len()
            )));
        }
        let points: Vec<WeightedPoint2D> = scores
            .iter()
            .zip(positive)
            .map(|(s, l)| WeightedPoint2D::new(*s, if *l { 1.0 } else { 0.0 }, 1.0))
            .collect();
        VennAbersCalibrator::fit(&points)
    }

    pub fn predict(&self, score: f64) -> Result<VennAbersInterval, ConformalError> {
        if score.is_nan() {
            return Err(ConformalError::NonFiniteScore(score));
        }
        Ok(VennAbersInterval {
            p0: self.f0[count_at_or_below(&self.scores, score)],
            p1: self.f1[count_below(&self.scores, score)],
        })
    }

    /// Distinct calibration scores, ascending.
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn f0(&self) -> &[f64] {
        &self.f0
    }

    pub fn f1(&self) -> &[f64] {
        &self.f1
    }
}

fn single_label(data: &[WeightedPoint2D]) -> Option<f64> {
    let first = data.first()?.y;
    if (first == 0.0 || first == 1.0) && data.iter().all(|p| p.y == first) {
        Some(first)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::isotonic::IsotonicRegression;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-12)
    }

    // Isotonic fit of the test point after adding it to the calibration set.
    fn brute_force(cal: &[WeightedPoint2D], score: f64, label: f64) -> f64 {
        let mut points = cal.to_vec();
        points.push(WeightedPoint2D::new(score, label, 1.0));
        let merged = merge_ties(&points).unwrap();
        let fitted = IsotonicRegression::fitted(&points).unwrap();
        let idx = merged.iter().position(|p| p.x == score).unwrap();
        fitted[idx]
    }

    #[test]
    fn test_known_curves() {
        let va = VennAbersCalibrator::fit_labels(&[1.0, 2.0, 3.0], &[false, false, true]).unwrap();
        assert!(close(va.f0(), &[0.0, 0.0, 0.0, 0.5]));
        assert!(close(va.f1(), &[1.0 / 3.0, 0.5, 1.0, 1.0]));
        assert!(va.f0().iter().chain(va.f1()).all(|v| v.is_sign_positive()));
        let below = va.predict(0.5).unwrap();
        assert_eq!(below.p0, 0.0);
        assert!((below.p1 - 1.0 / 3.0).abs() < 1e-12);
        let above = va.predict(4.0).unwrap();
        assert_eq!((above.p0, above.p1), (0.5, 1.0));
    }

    #[test]
    fn test_single_label_is_constant() {
        let ones = VennAbersCalibrator::fit_labels(&[1.0, 2.0, 3.0], &[true, true, true]).unwrap();
        assert!(ones.f0().iter().chain(ones.f1()).all(|v| *v == 1.0));
        let zeros = VennAbersCalibrator::fit_labels(&[1.0, 2.0], &[false, false]).unwrap();
        let p = zeros.predict(1.5).unwrap();
        assert_eq!((p.p0, p.p1), (0.0, 0.0));
    }

    #[test]
    fn test_ties_use_pooled_fit() {
        let cal = vec![
            WeightedPoint2D::new(1.0, 0.0, 1.0),
            WeightedPoint2D::new(1.0, 1.0, 1.0),
            WeightedPoint2D::new(2.0, 1.0, 1.0),
        ];
        let va = VennAbersCalibrator::fit(&cal).unwrap();
        assert_eq!(va.scores(), &[1.0, 2.0]);
        let p = va.predict(1.0).unwrap();
        assert!((p.p0 - brute_force(&cal, 1.0, 0.0)).abs() < 1e-12);
        assert!((p.p1 - brute_force(&cal, 1.0, 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_matches_brute_force_isotonic() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let n = rng.gen_range(1..14);
            let cal: Vec<WeightedPoint2D> = (0..n)
                .map(|_| {
                    let w = [0.5, 1.0, 2.0][rng.gen_range(0..3)];
                    let label = if rng.gen_bool(0.5) { 1.0 } else { 0.0 };
                    WeightedPoint2D::new(rng.gen_range(0..9) as f64 * 0.5, label, w)
                })
                .collect();
            let va = VennAbersCalibrator::fit(&cal).unwrap();
            // no negative zeros leak into predictions
            assert!(va.f0().iter().chain(va.f1()).all(|v| v.is_sign_positive()));
            if single_label(&merge_ties(&cal).unwrap()).is_some() {
                continue;
            }
            for _ in 0..6 {
                let t = rng.gen_range(-1..10) as f64 * 0.5 + if rng.gen_bool(0.3) { 0.25 } else { 0.0 };
                let p = va.predict(t).unwrap();
                assert!((p.p0 - brute_force(&cal, t, 0.0)).abs() < 1e-9, "p0 at {} for {:?}", t, cal);
                assert!((p.p1 - brute_force(&cal, t, 1.0)).abs() < 1e-9, "p1 at {} for {:?}", t, cal);
                assert!(p.p0 <= p.p1);
            }
        }
    }

    #[test]
    fn test_invalid_input() {
        assert!(VennAbersCalibrator::fit(&[]).unwrap_err().is_configuration());
        assert!(VennAbersCalibrator::fit(&[WeightedPoint2D::new(0.0, 2.0, 1.0)]).is_err());
        assert!(VennAbersCalibrator::fit_labels(&[0.0], &[]).is_err());
        let va = VennAbersCalibrator::fit_labels(&[0.0, 1.0], &[false, true]).unwrap();
        assert!(va.predict(f64::NAN).is_err());
    }

    #[test]
    fn test_deserialized_calibrator_is_validated() {
        let va = VennAbersCalibrator::fit_labels(&[1.0, 2.0, 3.0], &[false, false, true]).unwrap();
        let json = serde_json::to_string(&va).unwrap();
        assert_eq!(serde_json::from_str::<VennAbersCalibrator>(&json).unwrap(), va);

        let short = r#"{"scores":[1.0,2.0],"f0":[0.0,0.5],"f1":[0.5,1.0,1.0]}"#;
        assert!(serde_json::from_str::<VennAbersCalibrator>(short).is_err());
        let unsorted = r#"{"scores":[2.0,1.0],"f0":[0.0,0.0,0.5],"f1":[0.5,1.0,1.0]}"#;
        assert!(serde_json::from_str::<VennAbersCalibrator>(unsorted).is_err());
        let decreasing = r#"{"scores":[1.0,2.0],"f0":[0.5,0.0,0.5],"f1":[0.5,1.0,1.0]}"#;
        assert!(serde_json::from_str::<VennAbersCalibrator>(decreasing).is_err());
    }

    #[test]
    fn test_probability_in_interval() {
        let interval = VennAbersInterval { p0: 0.2, p1: 0.6 };
        let p = interval.probability();
        assert!(p >= interval.p0 && p <= interval.p1);
        assert!((interval.width() - 0.4).abs() < 1e-12);
    }
}
