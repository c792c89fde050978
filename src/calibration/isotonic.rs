use crate::errors::ConformalError;
use serde::{Deserialize, Serialize};

/// A weighted observation `(x, y)`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct WeightedPoint2D {
    pub x: f64,
    pub y: f64,
    pub w: f64,
}

impl WeightedPoint2D {
    pub fn new(x: f64, y: f64, w: f64) -> Self {
        WeightedPoint2D { x, y, w }
    }
}

/// Validate, sort by `x` and merge equal `x` into one point holding the weighted mean
/// of `y` and the summed weight. The output has strictly increasing `x`.
pub fn merge_ties(points: &[WeightedPoint2D]) -> Result<Vec<WeightedPoint2D>, ConformalError> {
    for p in points {
        if !p.x.is_finite() || !p.y.is_finite() {
            return Err(ConformalError::DataValidation(format!(
                "isotonic input must be finite, got ({}, {})",
                p.x, p.y
            )));
        }
        if !p.w.is_finite() || p.w <= 0.0 {
            return Err(ConformalError::InvalidParameter(
                "weight".to_string(),
                "positive finite value".to_string(),
                p.w.to_string(),
            ));
        }
    }
    let mut data = points.to_vec();
    data.sort_by(|a, b| a.x.total_cmp(&b.x));

    let mut merged: Vec<WeightedPoint2D> = Vec::with_capacity(data.len());
    for p in data {
        match merged.last_mut() {
            Some(last) if last.x == p.x => {
                let w = last.w + p.w;
                last.y = (last.y * last.w + p.y * p.w) / w;
                last.w = w;
            }
            _ => merged.push(p),
        }
    }
    Ok(merged)
}

/// Weighted isotonic (monotone non-decreasing) least squares regression.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IsotonicRegression {
    /// Block centres (weighted mean input).
    pub thresholds: Vec<f64>,
    /// Fitted block values.
    pub values: Vec<f64>,
}

// Pool adjacent violators over merged points.
// Blocks are (sum_wy, sum_w, sum_wx, number of points).
fn pava(data: &[WeightedPoint2D]) -> Vec<(f64, f64, f64, usize)> {
    let mut blocks: Vec<(f64, f64, f64, usize)> = Vec::with_capacity(data.len());
    for p in data {
        let mut current = (p.w * p.y, p.w, p.w * p.x, 1);
        while let Some(prev) = blocks.last() {
            if prev.0 / prev.1 > current.0 / current.1 {
                current = (
                    current.0 + prev.0,
                    current.1 + prev.1,
                    current.2 + prev.2,
                    current.3 + prev.3,
                );
                blocks.pop();
            } else {
                break;
            }
        }
        blocks.push(current);
    }
    blocks
}

fn empty_input_error() -> ConformalError {
    ConformalError::InvalidParameter(
        "isotonic input".to_string(),
        "at least one point".to_string(),
        "0 points".to_string(),
    )
}

impl IsotonicRegression {
    pub fn fit(points: &[WeightedPoint2D]) -> Result<Self, ConformalError> {
        let data = merge_ties(points)?;
        if data.is_empty() {
            return Err(empty_input_error());
        }
        let blocks = pava(&data);
        let thresholds = blocks.iter().map(|(_, w, wx, _)| wx / w).collect();
        let values = blocks.iter().map(|(wy, w, _, _)| wy / w).collect();
        Ok(IsotonicRegression { thresholds, values })
    }

    /// Fitted value of every merged input point, in ascending `x` order.
    pub fn fitted(points: &[WeightedPoint2D]) -> Result<Vec<f64>, ConformalError> {
        let data = merge_ties(points)?;
        if data.is_empty() {
            return Err(empty_input_error());
        }
        Ok(pava(&data)
            .into_iter()
            .flat_map(|(wy, w, _, n)| std::iter::repeat(wy / w).take(n))
            .collect())
    }

    /// Piecewise linear interpolation between block centres, clamped at both ends.
    pub fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|v| self.transform_one(*v)).collect()
    }

    fn transform_one(&self, p: f64) -> f64 {
        let (first, last) = match (self.thresholds.first(), self.thresholds.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return p,
        };
        if p <= first {
            return self.values[0];
        }
        if p >= last {
            return self.values[self.values.len() - 1];
        }
        let idx = self.thresholds.partition_point(|t| *t <= p) - 1;
        let (x0, x1) = (self.thresholds[idx], self.thresholds[idx + 1]);
        let (y0, y1) = (self.values[idx], self.values[idx + 1]);
        y0 + (y1 - y0) / (x1 - x0) * (p - x0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(v: &[(f64, f64)]) -> Vec<WeightedPoint2D> {
        v.iter().map(|(x, y)| WeightedPoint2D::new(*x, *y, 1.0)).collect()
    }

    #[test]
    fn test_merge_ties() {
        let merged = merge_ties(&[WeightedPoint2D::new(1.0, 0.0, 1.0), WeightedPoint2D::new(1.0, 1.0, 1.0)]).unwrap();
        assert_eq!(merged, vec![WeightedPoint2D::new(1.0, 0.5, 2.0)]);
        assert!(merge_ties(&[WeightedPoint2D::new(f64::NAN, 0.0, 1.0)]).is_err());
        assert!(merge_ties(&[WeightedPoint2D::new(0.0, 0.0, 0.0)]).is_err());
    }

    #[test]
    fn test_monotone_input_is_unchanged() {
        let fitted = IsotonicRegression::fitted(&pts(&[(1.0, 0.0), (2.0, 0.0), (3.0, 1.0)])).unwrap();
        assert_eq!(fitted, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_pools_violators() {
        let fitted = IsotonicRegression::fitted(&pts(&[(1.0, 1.0), (2.0, 0.0), (3.0, 2.0), (4.0, 1.0)])).unwrap();
        assert_eq!(fitted, vec![0.5, 0.5, 1.5, 1.5]);
    }

    #[test]
    fn test_weights() {
        let points = vec![WeightedPoint2D::new(1.0, 1.0, 3.0), WeightedPoint2D::new(2.0, 0.0, 1.0)];
        let fitted = IsotonicRegression::fitted(&points).unwrap();
        assert_eq!(fitted, vec![0.75, 0.75]);
    }

    #[test]
    fn test_transform_interpolates() {
        let model = IsotonicRegression::fit(&pts(&[(0.0, 0.0), (1.0, 1.0)])).unwrap();
        assert_eq!(model.transform(&[-1.0, 0.5, 3.0]), vec![0.0, 0.5, 1.0]);
        assert!(IsotonicRegression::fit(&[]).is_err());
    }
}
