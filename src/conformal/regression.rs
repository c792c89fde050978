//! Aggregated conformal regression
//!
//! Sub-models are calibrated on normalized residuals. An interval at confidence `c`
//! has half-width `quantile(c) * interval_scaling(x)` around the point prediction.
use crate::conformal::ensemble::{train_one, Ensemble};
use crate::conformal::gradient::{finite_difference, SparseGradient};
use crate::conformal::{gradient_stepsize, AcpConfig, AggregationStrategy, StateIO};
use crate::context::Context;
use crate::data::{DataRecord, Dataset, FeatureVector};
use crate::errors::ConformalError;
use crate::ncm::RegressionNcm;
use crate::pvalue::CalibrationSet;
use crate::sampler::{Sampler, TrainSplit};
use crate::utils::{fmt_vec_output, is_non_decreasing, median, validate_confidence};
use log::debug;
use serde::{Deserialize, Serialize};

const NAME: &str = "AcpRegressor";

/// Half-width of an interval at one confidence level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictedInterval {
    pub confidence: f64,
    pub half_width: f64,
    y_hat: f64,
    min_obs: f64,
    max_obs: f64,
}

impl PredictedInterval {
    /// `[y_hat - half_width, y_hat + half_width]`.
    pub fn interval(&self) -> (f64, f64) {
        (self.y_hat - self.half_width, self.y_hat + self.half_width)
    }

    /// The interval intersected with the range of labels seen in training.
    pub fn capped_interval(&self) -> (f64, f64) {
        let (lo, hi) = self.interval();
        (lo.max(self.min_obs), hi.min(self.max_obs))
    }
}

/// Intervals of one example, either requested by confidence or by half-width.
#[derive(Clone, Debug, PartialEq)]
pub struct CPRegressionPrediction {
    pub y_hat: f64,
    pub interval_scaling: f64,
    pub min_obs: f64,
    pub max_obs: f64,
    by_confidence: Vec<PredictedInterval>,
    by_width: Vec<PredictedInterval>,
}

impl CPRegressionPrediction {
    /// Intervals from `predict`, ascending confidence.
    pub fn by_confidence(&self) -> &[PredictedInterval] {
        &self.by_confidence
    }

    /// Intervals from `predict_confidence`, ascending half-width. A confidence of 0
    /// means no confidence level yields an interval this narrow.
    pub fn by_width(&self) -> &[PredictedInterval] {
        &self.by_width
    }

    pub fn at_confidence(&self, confidence: f64) -> Option<&PredictedInterval> {
        self.by_confidence.iter().find(|p| p.confidence == confidence)
    }

    pub fn at_width(&self, half_width: f64) -> Option<&PredictedInterval> {
        self.by_width.iter().find(|p| p.half_width == half_width)
    }

    fn interval(&self, confidence: f64, half_width: f64) -> PredictedInterval {
        PredictedInterval {
            confidence,
            half_width,
            y_hat: self.y_hat,
            min_obs: self.min_obs,
            max_obs: self.max_obs,
        }
    }
}

#[derive(Debug)]
struct RegressionSlot<N> {
    ncm: N,
    calibration: CalibrationSet,
}

/// Plain calibration state of an [`AcpRegressor`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AcpRegressorState {
    pub min_obs: f64,
    pub max_obs: f64,
    pub calibrations: Vec<Option<CalibrationSet>>,
}

impl StateIO for AcpRegressorState {}

/// Aggregated conformal regressor.
#[derive(Debug)]
pub struct AcpRegressor<N: RegressionNcm> {
    pub cfg: AcpConfig,
    prototype: N,
    label_range: Option<(f64, f64)>,
    ensemble: Ensemble<RegressionSlot<N>>,
    // Every trained slot's scores, for PooledScores.
    pooled: Option<CalibrationSet>,
}

fn fit_slot<N: RegressionNcm>(prototype: &N, split: TrainSplit) -> Result<RegressionSlot<N>, ConformalError> {
    let mut ncm = prototype.clone_untrained();
    ncm.fit(&split.proper_training)?;
    let scores = split
        .calibration
        .iter()
        .map(|r| ncm.score(r))
        .collect::<Result<Vec<f64>, ConformalError>>()?;
    let calibration = CalibrationSet::new(&scores)?;
    Ok(RegressionSlot { ncm, calibration })
}

fn validate_widths(widths: &[f64]) -> Result<(), ConformalError> {
    match widths.iter().find(|w| w.is_nan() || **w < 0.0) {
        Some(w) => Err(ConformalError::InvalidParameter(
            "half_width".to_string(),
            "non-negative value".to_string(),
            w.to_string(),
        )),
        None => Ok(()),
    }
}

// Sort ascending and drop duplicates.
fn ascending(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v.dedup();
    v
}

impl<N: RegressionNcm> AcpRegressor<N> {
    /// Create an untrained regressor around an unfitted nonconformity measure.
    pub fn new(prototype: N, cfg: AcpConfig) -> Result<Self, ConformalError> {
        cfg.validate()?;
        Ok(AcpRegressor {
            cfg,
            prototype,
            label_range: None,
            ensemble: Ensemble::default(),
            pooled: None,
        })
    }

    /// Set the aggregation strategy; trained sub-models are kept.
    /// * `aggregation` - How the sub-model intervals are combined.
    pub fn set_aggregation(mut self, aggregation: AggregationStrategy) -> Self {
        self.cfg.aggregation = aggregation;
        self
    }

    pub fn num_models(&self) -> usize {
        self.cfg.sampler.num_samples()
    }

    pub fn is_trained(&self) -> bool {
        self.ensemble.len() == self.num_models() && self.ensemble.is_complete()
    }

    pub fn is_partially_trained(&self) -> bool {
        self.ensemble.is_partial()
    }

    fn rebuild_pooled(&mut self) -> Result<(), ConformalError> {
        let scores: Vec<f64> = self
            .ensemble
            .trained()
            .flat_map(|s| s.calibration.scores().iter().copied())
            .collect();
        self.pooled = if scores.is_empty() {
            None
        } else {
            Some(CalibrationSet::new(&scores)?)
        };
        Ok(())
    }

    /// Train every sub-model, replacing any earlier training.
    ///
    /// On failure the regressor is left untrained.
    pub fn train(&mut self, dataset: &Dataset, ctx: &Context) -> Result<(), ConformalError> {
        self.ensemble = Ensemble::default();
        self.pooled = None;
        self.label_range = None;
        let required = self.cfg.required_models(self.num_models());
        let prototype = &self.prototype;
        let ensemble = Ensemble::train(&self.cfg.sampler, dataset, ctx, required, NAME, |_, split| {
            fit_slot(prototype, split)
        })?;
        self.ensemble = ensemble;
        self.label_range = dataset.label_range();
        self.rebuild_pooled()
    }

    /// Train only sub-model `index`, keeping the others.
    pub fn train_index(&mut self, dataset: &Dataset, index: usize, ctx: &Context) -> Result<(), ConformalError> {
        let slot = train_one(&self.cfg.sampler, dataset, ctx, index, |_, split| {
            fit_slot(&self.prototype, split)
        })?;
        self.ensemble.resize(self.num_models());
        self.ensemble.set(index, slot)?;
        self.label_range = match (self.label_range, dataset.label_range()) {
            (Some((a, b)), Some((c, d))) => Some((a.min(c), b.max(d))),
            (old, new) => new.or(old),
        };
        self.rebuild_pooled()
    }

    fn ensure_trained(&self) -> Result<(), ConformalError> {
        if self.is_partially_trained() {
            Ok(())
        } else {
            Err(ConformalError::NotTrained(NAME.to_string()))
        }
    }

    /// Midpoint and scaling of every trained slot.
    fn slot_outputs(&self, features: &FeatureVector) -> Result<Vec<(f64, f64, &CalibrationSet)>, ConformalError> {
        self.ensemble
            .trained()
            .map(|slot| {
                Ok((
                    slot.ncm.predict_midpoint(features)?,
                    slot.ncm.interval_scaling(features)?,
                    &slot.calibration,
                ))
            })
            .collect()
    }

    fn empty_prediction(&self, outputs: &[(f64, f64, &CalibrationSet)]) -> Result<CPRegressionPrediction, ConformalError> {
        let y_hats: Vec<f64> = outputs.iter().map(|o| o.0).collect();
        let scalings: Vec<f64> = outputs.iter().map(|o| o.1).collect();
        let not_trained = || ConformalError::NotTrained(NAME.to_string());
        let (min_obs, max_obs) = self.label_range.unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
        Ok(CPRegressionPrediction {
            y_hat: median(&y_hats).ok_or_else(not_trained)?,
            interval_scaling: median(&scalings).ok_or_else(not_trained)?,
            min_obs,
            max_obs,
            by_confidence: Vec::new(),
            by_width: Vec::new(),
        })
    }

    /// Intervals at every requested confidence level.
    pub fn predict(&self, features: &FeatureVector, confidences: &[f64]) -> Result<CPRegressionPrediction, ConformalError> {
        self.ensure_trained()?;
        for c in confidences {
            validate_confidence(*c)?;
        }
        let confidences = ascending(confidences);
        let outputs = self.slot_outputs(features)?;
        let mut prediction = self.empty_prediction(&outputs)?;

        let half_widths: Vec<f64> = match (self.cfg.aggregation, &self.pooled) {
            (AggregationStrategy::PooledScores, Some(pooled)) => pooled
                .quantiles(&confidences)?
                .into_iter()
                .map(|q| q * prediction.interval_scaling)
                .collect(),
            (strategy, _) => {
                let per_slot = outputs
                    .iter()
                    .map(|(_, scaling, calibration)| {
                        Ok(calibration
                            .quantiles(&confidences)?
                            .into_iter()
                            .map(|q| q * scaling)
                            .collect::<Vec<f64>>())
                    })
                    .collect::<Result<Vec<Vec<f64>>, ConformalError>>()?;
                (0..confidences.len())
                    .map(|i| {
                        let values: Vec<f64> = per_slot.iter().map(|hw| hw[i]).collect();
                        strategy
                            .combine(&values)
                            .ok_or_else(|| ConformalError::NotTrained(NAME.to_string()))
                    })
                    .collect::<Result<Vec<f64>, ConformalError>>()?
            }
        };
        if !is_non_decreasing(&half_widths) {
            return Err(ConformalError::DataValidation(
                "interval widths decrease with increasing confidence".to_string(),
            ));
        }
        debug!(
            "Predicted half-widths [{}] around {}.",
            fmt_vec_output(&half_widths),
            prediction.y_hat
        );
        prediction.by_confidence = confidences
            .iter()
            .zip(half_widths)
            .map(|(c, hw)| prediction.interval(*c, hw))
            .collect();
        Ok(prediction)
    }

    /// Largest confidence whose interval fits within every requested half-width.
    pub fn predict_confidence(
        &self,
        features: &FeatureVector,
        half_widths: &[f64],
    ) -> Result<CPRegressionPrediction, ConformalError> {
        self.ensure_trained()?;
        validate_widths(half_widths)?;
        let half_widths = ascending(half_widths);
        let outputs = self.slot_outputs(features)?;
        let mut prediction = self.empty_prediction(&outputs)?;

        let confidences = half_widths
            .iter()
            .map(|w| match (self.cfg.aggregation, &self.pooled) {
                (AggregationStrategy::PooledScores, Some(pooled)) => {
                    Ok(pooled.confidence_for_score(w / prediction.interval_scaling))
                }
                (strategy, _) => {
                    let values: Vec<f64> = outputs
                        .iter()
                        .map(|(_, scaling, calibration)| calibration.confidence_for_score(w / scaling))
                        .collect();
                    strategy
                        .combine(&values)
                        .ok_or_else(|| ConformalError::NotTrained(NAME.to_string()))
                }
            })
            .collect::<Result<Vec<f64>, ConformalError>>()?;
        prediction.by_width = half_widths
            .iter()
            .zip(confidences)
            .map(|(w, c)| prediction.interval(c, *w))
            .collect();
        Ok(prediction)
    }

    /// Feature gradient averaged over the sub-models.
    ///
    /// * `stepsize` - Perturbation of every explicit feature, `DEFAULT_GRADIENT_STEPSIZE` when `None`.
    /// * `label` - Hypothesised target. With a target the gradient is taken of the nonconformity
    ///   of `(features, label)`, without one of the predicted midpoint.
    pub fn calculate_gradient(
        &self,
        features: &FeatureVector,
        stepsize: Option<f64>,
        label: Option<f64>,
    ) -> Result<SparseGradient, ConformalError> {
        self.ensure_trained()?;
        if let Some(y) = label {
            if !y.is_finite() {
                return Err(ConformalError::InvalidParameter(
                    "label".to_string(),
                    "a finite target".to_string(),
                    y.to_string(),
                ));
            }
        }
        let stepsize = gradient_stepsize(stepsize);
        let gradients = self
            .ensemble
            .trained()
            .map(|slot| match label {
                Some(y) => finite_difference(features, stepsize, |f| {
                    slot.ncm.score(&DataRecord::new(y, f.clone()))
                }),
                None => finite_difference(features, stepsize, |f| slot.ncm.predict_midpoint(f)),
            })
            .collect::<Result<Vec<SparseGradient>, ConformalError>>()?;
        SparseGradient::mean(&gradients)
    }

    pub fn export_state(&self) -> Result<AcpRegressorState, ConformalError> {
        self.ensure_trained()?;
        let (min_obs, max_obs) = self.label_range.unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
        Ok(AcpRegressorState {
            min_obs,
            max_obs,
            calibrations: self
                .ensemble
                .slots()
                .iter()
                .map(|s| s.as_ref().map(|slot| slot.calibration.clone()))
                .collect(),
        })
    }

    /// Rebuild a regressor from fitted measures and their exported calibration state.
    pub fn from_state(
        prototype: N,
        cfg: AcpConfig,
        state: AcpRegressorState,
        ncms: Vec<Option<N>>,
    ) -> Result<Self, ConformalError> {
        cfg.validate()?;
        let n = cfg.sampler.num_samples();
        if state.calibrations.len() != n || ncms.len() != n {
            return Err(ConformalError::DataValidation(format!(
                "expected {} slots, got {} calibrations and {} measures",
                n,
                state.calibrations.len(),
                ncms.len()
            )));
        }
        let mut slots = Vec::with_capacity(n);
        for (index, pair) in ncms.into_iter().zip(state.calibrations).enumerate() {
            match pair {
                (Some(ncm), Some(calibration)) if ncm.is_fitted() => slots.push(Some(RegressionSlot { ncm, calibration })),
                (None, None) => slots.push(None),
                _ => {
                    return Err(ConformalError::DataValidation(format!(
                        "slot {} has mismatching measure and calibration state",
                        index
                    )))
                }
            }
        }
        let mut regressor = AcpRegressor {
            cfg,
            prototype,
            label_range: Some((state.min_obs, state.max_obs)),
            ensemble: Ensemble::with_slots(slots),
            pooled: None,
        };
        regressor.rebuild_pooled()?;
        Ok(regressor)
    }
}
