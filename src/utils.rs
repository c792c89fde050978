use crate::errors::ConformalError;
use std::cmp::Ordering;

/// Create a string of all available items.
pub fn items_to_strings(items: Vec<&str>) -> String {
    let mut s = String::new();
    for i in items {
        s.push_str(i);
        s.push_str(&String::from(", "));
    }
    s
}

pub fn fmt_vec_output(v: &[f64]) -> String {
    let mut res = String::new();
    if let Some(last) = v.len().checked_sub(1) {
        if last == 0 {
            return format!("{:.4}", v[0]);
        }
        for n in &v[..last] {
            res.push_str(format!("{:.4}", n).as_str());
            res.push_str(", ");
        }
        res.push_str(format!("{:.4}", &v[last]).as_str());
    }
    res
}

// Validation
pub fn validate_positive_float_parameter(value: f64, parameter: &str) -> Result<(), ConformalError> {
    validate_float_parameter(value, 0.0, f64::INFINITY, parameter)
}

pub fn validate_float_parameter(value: f64, min: f64, max: f64, parameter: &str) -> Result<(), ConformalError> {
    if value.is_nan() || value < min || max < value {
        let ex_msg = format!("real value within range {} and {}", min, max);
        Err(ConformalError::InvalidParameter(
            parameter.to_string(),
            ex_msg,
            value.to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Confidence levels must lie in (0, 1].
pub fn validate_confidence(confidence: f64) -> Result<(), ConformalError> {
    if confidence.is_nan() || confidence <= 0.0 || confidence > 1.0 {
        return Err(ConformalError::InvalidParameter(
            "confidence".to_string(),
            "real value within (0, 1]".to_string(),
            confidence.to_string(),
        ));
    }
    Ok(())
}

/// Sort a copy of the values in ascending order, NaN last.
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan())));
    v
}

/// Number of values in a sorted slice strictly below `v`.
#[inline]
pub fn count_below(sorted: &[f64], v: f64) -> usize {
    sorted.partition_point(|x| *x < v)
}

/// Number of values in a sorted slice less than or equal to `v`.
#[inline]
pub fn count_at_or_below(sorted: &[f64], v: f64) -> usize {
    sorted.partition_point(|x| *x <= v)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Median, averaging the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let v = sorted(values);
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        Some((v[mid - 1] + v[mid]) / 2.0)
    } else {
        Some(v[mid])
    }
}

/// Geometric mean of non-negative values, `0.0` if any value is zero.
pub fn geometric_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    if values.iter().any(|v| *v <= 0.0) {
        return Some(0.0);
    }
    Some((values.iter().map(|v| v.ln()).sum::<f64>() / values.len() as f64).exp())
}

/// Whether the values are non-decreasing and free of NaN.
pub fn is_non_decreasing(values: &[f64]) -> bool {
    values.iter().all(|v| !v.is_nan()) && values.windows(2).all(|w| w[0].partial_cmp(&w[1]) != Some(Ordering::Greater))
}
