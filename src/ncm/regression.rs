use crate::constants::{DEFAULT_NORMALIZATION_BETA, LOG_RESIDUAL_FLOOR};
use crate::data::{DataRecord, FeatureVector};
use crate::errors::ConformalError;
use crate::model::Regressor;
use crate::ncm::{NonconformityMeasure, RegressionNcm};
use crate::utils::{items_to_strings, validate_positive_float_parameter};
use log::debug;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Residual normalization.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub enum RegressionNcmKind {
    /// `|y - y_hat|`.
    #[default]
    AbsDiff,
    /// `|y - y_hat| / (sigma_hat + beta)`, the error model predicting absolute residuals.
    Normalized { beta: f64 },
    /// `|y - y_hat| / (exp(mu_hat) + beta)`, the error model predicting log absolute residuals.
    LogNormalized { beta: f64 },
}

impl RegressionNcmKind {
    pub fn requires_error_model(&self) -> bool {
        !matches!(self, RegressionNcmKind::AbsDiff)
    }

    fn validate(&self) -> Result<(), ConformalError> {
        match self {
            RegressionNcmKind::AbsDiff => Ok(()),
            RegressionNcmKind::Normalized { beta } | RegressionNcmKind::LogNormalized { beta } => {
                validate_positive_float_parameter(*beta, "beta")
            }
        }
    }
}

impl FromStr for RegressionNcmKind {
    type Err = ConformalError;

    /// Normalized kinds parse with the default beta.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AbsDiff" => Ok(RegressionNcmKind::AbsDiff),
            "Normalized" => Ok(RegressionNcmKind::Normalized {
                beta: DEFAULT_NORMALIZATION_BETA,
            }),
            "LogNormalized" => Ok(RegressionNcmKind::LogNormalized {
                beta: DEFAULT_NORMALIZATION_BETA,
            }),
            _ => Err(ConformalError::ParseString(
                s.to_string(),
                "RegressionNcmKind".to_string(),
                items_to_strings(vec!["AbsDiff", "Normalized", "LogNormalized"]),
            )),
        }
    }
}

/// Residual nonconformity over a point regressor, optionally normalized by a second
/// regressor that learns the size of the residuals.
#[derive(Debug)]
pub struct ResidualNcm<R: Regressor> {
    model: R,
    error_model: Option<R>,
    kind: RegressionNcmKind,
}

impl<R: Regressor> ResidualNcm<R> {
    /// Plain absolute residual measure.
    pub fn abs_diff(model: R) -> Self {
        ResidualNcm {
            model,
            error_model: None,
            kind: RegressionNcmKind::AbsDiff,
        }
    }

    /// Any kind. Normalized kinds need an error model, `AbsDiff` must not get one.
    pub fn new(model: R, error_model: Option<R>, kind: RegressionNcmKind) -> Result<Self, ConformalError> {
        kind.validate()?;
        match (kind.requires_error_model(), error_model.is_some()) {
            (true, false) => Err(ConformalError::Unsupported(format!(
                "{:?} requires an error model",
                kind
            ))),
            (false, true) => Err(ConformalError::Unsupported(
                "AbsDiff does not use an error model".to_string(),
            )),
            _ => Ok(ResidualNcm {
                model,
                error_model,
                kind,
            }),
        }
    }

    pub fn kind(&self) -> RegressionNcmKind {
        self.kind
    }

    pub fn model(&self) -> &R {
        &self.model
    }

    fn residual_target(&self, residual: f64) -> f64 {
        match self.kind {
            RegressionNcmKind::LogNormalized { .. } => residual.max(LOG_RESIDUAL_FLOOR).ln(),
            _ => residual,
        }
    }
}

impl<R: Regressor> NonconformityMeasure for ResidualNcm<R> {
    fn fit(&mut self, records: &[DataRecord]) -> Result<(), ConformalError> {
        self.model.fit(records)?;
        if self.error_model.is_none() {
            return Ok(());
        }
        let residual_records = records
            .iter()
            .map(|r| {
                let residual = (r.label - self.model.predict_value(&r.features)?).abs();
                Ok(DataRecord::new(self.residual_target(residual), r.features.clone()))
            })
            .collect::<Result<Vec<DataRecord>, ConformalError>>()?;
        debug!(
            "Fitting error model of {} on {} residuals.",
            self.model.name(),
            residual_records.len()
        );
        if let Some(error_model) = self.error_model.as_mut() {
            error_model.fit(&residual_records)?;
        }
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.model.is_fitted() && self.error_model.as_ref().map_or(true, |m| m.is_fitted())
    }

    fn clone_untrained(&self) -> Self {
        ResidualNcm {
            model: self.model.clone_untrained(),
            error_model: self.error_model.as_ref().map(|m| m.clone_untrained()),
            kind: self.kind,
        }
    }

    fn name(&self) -> String {
        match &self.error_model {
            Some(e) => format!("{:?}({}, {})", self.kind, self.model.name(), e.name()),
            None => format!("{:?}({})", self.kind, self.model.name()),
        }
    }
}

impl<R: Regressor> RegressionNcm for ResidualNcm<R> {
    fn predict_midpoint(&self, features: &FeatureVector) -> Result<f64, ConformalError> {
        if !self.model.is_fitted() {
            return Err(ConformalError::NotTrained(self.model.name().to_string()));
        }
        let y_hat = self.model.predict_value(features)?;
        if !y_hat.is_finite() {
            return Err(ConformalError::DataValidation(format!(
                "{} predicted a non-finite value",
                self.model.name()
            )));
        }
        Ok(y_hat)
    }

    fn interval_scaling(&self, features: &FeatureVector) -> Result<f64, ConformalError> {
        let (error_model, beta) = match (&self.error_model, self.kind) {
            (None, _) | (_, RegressionNcmKind::AbsDiff) => return Ok(1.0),
            (Some(m), RegressionNcmKind::Normalized { beta }) | (Some(m), RegressionNcmKind::LogNormalized { beta }) => {
                (m, beta)
            }
        };
        if !error_model.is_fitted() {
            return Err(ConformalError::NotTrained(error_model.name().to_string()));
        }
        let prediction = error_model.predict_value(features)?;
        let scaling = match self.kind {
            RegressionNcmKind::LogNormalized { .. } => prediction.exp() + beta,
            _ => prediction.max(0.0) + beta,
        };
        if !scaling.is_finite() || scaling <= 0.0 {
            return Err(ConformalError::DataValidation(format!(
                "interval scaling must be positive and finite, got {}",
                scaling
            )));
        }
        Ok(scaling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KNearestNeighbors;

    fn records() -> Vec<DataRecord> {
        (0..20)
            .map(|i| {
                let x = i as f64;
                let noise = if i % 2 == 0 { 0.1 * x } else { -0.1 * x };
                DataRecord::new(2.0 * x + noise, FeatureVector::dense(vec![x]))
            })
            .collect()
    }

    #[test]
    fn test_abs_diff() {
        let mut ncm = ResidualNcm::abs_diff(KNearestNeighbors::new(1).unwrap());
        assert!(!ncm.is_fitted());
        ncm.fit(&records()).unwrap();
        let r = DataRecord::new(10.0, FeatureVector::dense(vec![3.0]));
        // 1-NN predicts the training label 6 - 0.3
        assert!((ncm.score(&r).unwrap() - 4.3).abs() < 1e-12);
        assert_eq!(ncm.interval_scaling(&r.features).unwrap(), 1.0);
    }

    #[test]
    fn test_normalized_scaling_follows_residuals() {
        let kind = RegressionNcmKind::Normalized { beta: 0.01 };
        let mut ncm = ResidualNcm::new(
            KNearestNeighbors::new(3).unwrap(),
            Some(KNearestNeighbors::new(3).unwrap()),
            kind,
        )
        .unwrap();
        ncm.fit(&records()).unwrap();
        let low = ncm.interval_scaling(&FeatureVector::dense(vec![2.0])).unwrap();
        let high = ncm.interval_scaling(&FeatureVector::dense(vec![18.0])).unwrap();
        assert!(low > 0.0);
        assert!(high > low);
    }

    #[test]
    fn test_log_normalized_is_positive() {
        let kind = RegressionNcmKind::LogNormalized { beta: 0.01 };
        let mut ncm = ResidualNcm::new(
            KNearestNeighbors::new(2).unwrap(),
            Some(KNearestNeighbors::new(2).unwrap()),
            kind,
        )
        .unwrap();
        ncm.fit(&records()).unwrap();
        let s = ncm.interval_scaling(&FeatureVector::dense(vec![5.0])).unwrap();
        assert!(s > 0.01);
        let fresh = ncm.clone_untrained();
        assert!(!fresh.is_fitted());
        assert_eq!(fresh.kind(), kind);
    }

    #[test]
    fn test_unsupported_combinations() {
        let missing = ResidualNcm::new(
            KNearestNeighbors::new(2).unwrap(),
            None,
            RegressionNcmKind::Normalized { beta: 0.1 },
        );
        assert!(missing.unwrap_err().is_configuration());
        let extra = ResidualNcm::new(
            KNearestNeighbors::new(2).unwrap(),
            Some(KNearestNeighbors::new(2).unwrap()),
            RegressionNcmKind::AbsDiff,
        );
        assert!(extra.is_err());
        assert!(ResidualNcm::new(
            KNearestNeighbors::new(2).unwrap(),
            Some(KNearestNeighbors::new(2).unwrap()),
            RegressionNcmKind::Normalized { beta: -1.0 },
        )
        .is_err());
        assert_eq!(
            "LogNormalized".parse::<RegressionNcmKind>().unwrap(),
            RegressionNcmKind::LogNormalized {
                beta: DEFAULT_NORMALIZATION_BETA
            }
        );
    }
}
