use crate::data::FeatureVector;
use crate::errors::ConformalError;
use crate::utils::validate_float_parameter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Change in nonconformity per unit change of each explicit feature.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SparseGradient {
    entries: BTreeMap<usize, f64>,
}

impl SparseGradient {
    pub fn get(&self, index: usize) -> Option<f64> {
        self.entries.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending feature index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.entries.iter().map(|(i, v)| (*i, *v))
    }

    /// Entry-wise mean; every gradient must cover the same features.
    pub fn mean(gradients: &[SparseGradient]) -> Result<SparseGradient, ConformalError> {
        let first = gradients.first().ok_or_else(|| {
            ConformalError::InternalInvariant("mean of zero gradients requested".to_string())
        })?;
        let mut entries = BTreeMap::new();
        for index in first.entries.keys() {
            let mut total = 0.0;
            for g in gradients {
                total += g.get(*index).ok_or_else(|| {
                    ConformalError::InternalInvariant(format!("feature {} missing from a sub-model gradient", index))
                })?;
            }
            entries.insert(*index, total / gradients.len() as f64);
        }
        Ok(SparseGradient { entries })
    }
}

/// Forward difference of `score` along every explicit feature of `features`.
pub fn finite_difference<F>(features: &FeatureVector, stepsize: f64, score: F) -> Result<SparseGradient, ConformalError>
where
    F: Fn(&FeatureVector) -> Result<f64, ConformalError>,
{
    validate_float_parameter(stepsize, f64::MIN_POSITIVE, f64::MAX, "stepsize")?;
    let base = score(features)?;
    let mut entries = BTreeMap::new();
    for (index, value) in features.iter() {
        let perturbed = features.with_value(index, value + stepsize);
        entries.insert(index, (score(&perturbed)? - base) / stepsize);
    }
    Ok(SparseGradient { entries })
}
