//! Aggregated conformal classification
//!
//! Every split trains one clone of the nonconformity measure on its proper-training
//! records and scores its calibration records under their true labels. A new example
//! gets one p-value per label and sub-model; the configured strategy combines them.
use crate::conformal::ensemble::{train_one, Ensemble};
use crate::conformal::gradient::{finite_difference, SparseGradient};
use crate::conformal::{gradient_stepsize, AcpConfig, AggregationStrategy, StateIO};
use crate::context::Context;
use crate::data::{class_label, Dataset, FeatureVector};
use crate::errors::ConformalError;
use crate::ncm::ClassificationNcm;
use crate::pvalue::{self, CalibrationSet};
use crate::sampler::{Sampler, TrainSplit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const NAME: &str = "AcpClassifier";

#[derive(Debug)]
struct ClassificationSlot<N> {
    ncm: N,
    calibration: CalibrationSet,
}

/// Plain calibration state of an [`AcpClassifier`], one entry per split.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AcpClassifierState {
    pub labels: BTreeSet<i32>,
    pub calibrations: Vec<Option<CalibrationSet>>,
}

impl StateIO for AcpClassifierState {}

/// Aggregated conformal classifier.
#[derive(Debug)]
pub struct AcpClassifier<N: ClassificationNcm> {
    pub cfg: AcpConfig,
    prototype: N,
    labels: BTreeSet<i32>,
    ensemble: Ensemble<ClassificationSlot<N>>,
}

fn fit_slot<N: ClassificationNcm>(
    prototype: &N,
    split: TrainSplit,
    labels: &BTreeSet<i32>,
) -> Result<ClassificationSlot<N>, ConformalError> {
    let mut ncm = prototype.clone_untrained();
    ncm.fit(&split.proper_training)?;
    if let Some(missing) = labels.iter().find(|l| !ncm.labels().contains(l)) {
        return Err(ConformalError::DataValidation(format!(
            "label {} is absent from the proper-training set",
            missing
        )));
    }
    let observed = split
        .calibration
        .iter()
        .map(|r| class_label(r.label))
        .collect::<Result<BTreeSet<i32>, ConformalError>>()?;
    if observed.len() < 2 {
        return Err(ConformalError::DataValidation(
            "the calibration set holds a single class".to_string(),
        ));
    }
    let scores = split
        .calibration
        .iter()
        .map(|r| ncm.score(&r.features, class_label(r.label)?))
        .collect::<Result<Vec<f64>, ConformalError>>()?;
    let calibration = CalibrationSet::new(&scores)?;
    Ok(ClassificationSlot { ncm, calibration })
}

impl<N: ClassificationNcm> AcpClassifier<N> {
    /// Create an untrained classifier around an unfitted nonconformity measure.
    pub fn new(prototype: N, cfg: AcpConfig) -> Result<Self, ConformalError> {
        cfg.validate()?;
        Ok(AcpClassifier {
            cfg,
            prototype,
            labels: BTreeSet::new(),
            ensemble: Ensemble::default(),
        })
    }

    /// Set the aggregation strategy; trained sub-models are kept.
    /// * `aggregation` - How the sub-model p-values are combined.
    pub fn set_aggregation(mut self, aggregation: AggregationStrategy) -> Self {
        self.cfg.aggregation = aggregation;
        self
    }

    pub fn num_models(&self) -> usize {
        self.cfg.sampler.num_samples()
    }

    /// Label space seen at training.
    pub fn labels(&self) -> &BTreeSet<i32> {
        &self.labels
    }

    /// Every sub-model is trained.
    pub fn is_trained(&self) -> bool {
        self.ensemble.len() == self.num_models() && self.ensemble.is_complete()
    }

    /// At least one sub-model is trained.
    pub fn is_partially_trained(&self) -> bool {
        self.ensemble.is_partial()
    }

    fn label_space(dataset: &Dataset) -> Result<BTreeSet<i32>, ConformalError> {
        dataset.validate()?;
        let labels = dataset.class_labels()?;
        if labels.len() < 2 {
            return Err(ConformalError::DataValidation(format!(
                "classification needs at least two labels, found {}",
                labels.len()
            )));
        }
        Ok(labels)
    }

    /// Train every sub-model, replacing any earlier training.
    ///
    /// On failure the classifier is left untrained.
    pub fn train(&mut self, dataset: &Dataset, ctx: &Context) -> Result<(), ConformalError> {
        self.ensemble = Ensemble::default();
        self.labels.clear();
        let labels = Self::label_space(dataset)?;
        let required = self.cfg.required_models(self.num_models());
        let prototype = &self.prototype;
        let ensemble = Ensemble::train(&self.cfg.sampler, dataset, ctx, required, NAME, |_, split| {
            fit_slot(prototype, split, &labels)
        })?;
        self.labels = labels;
        self.ensemble = ensemble;
        Ok(())
    }

    /// Train only sub-model `index`, keeping the others.
    pub fn train_index(&mut self, dataset: &Dataset, index: usize, ctx: &Context) -> Result<(), ConformalError> {
        let labels = Self::label_space(dataset)?;
        if self.ensemble.is_partial() && labels != self.labels {
            return Err(ConformalError::DataValidation(
                "the label space differs from the one the other sub-models were trained on".to_string(),
            ));
        }
        let slot = train_one(&self.cfg.sampler, dataset, ctx, index, |_, split| {
            fit_slot(&self.prototype, split, &labels)
        })?;
        self.ensemble.resize(self.num_models());
        self.ensemble.set(index, slot)?;
        self.labels = labels;
        Ok(())
    }

    fn ensure_trained(&self) -> Result<(), ConformalError> {
        if self.is_partially_trained() {
            Ok(())
        } else {
            Err(ConformalError::NotTrained(NAME.to_string()))
        }
    }

    /// P-value of every label.
    pub fn predict(&self, features: &FeatureVector) -> Result<BTreeMap<i32, f64>, ConformalError> {
        self.ensure_trained()?;
        let per_slot = self
            .ensemble
            .trained()
            .map(|slot| Ok((slot.ncm.scores(features, &self.labels)?, &slot.calibration)))
            .collect::<Result<Vec<_>, ConformalError>>()?;

        let mut pvalues = BTreeMap::new();
        for label in &self.labels {
            let p = match self.cfg.aggregation {
                AggregationStrategy::PooledScores => {
                    let (mut at_least, mut total) = (0, 0);
                    for (scores, calibration) in &per_slot {
                        at_least += calibration.count_at_least(scores[label]);
                        total += calibration.len();
                    }
                    (at_least + 1) as f64 / (total + 1) as f64
                }
                strategy => {
                    let ps = per_slot
                        .iter()
                        .map(|(scores, calibration)| calibration.p_value(scores[label]))
                        .collect::<Result<Vec<f64>, ConformalError>>()?;
                    strategy
                        .combine(&ps)
                        .ok_or_else(|| ConformalError::NotTrained(NAME.to_string()))?
                }
            };
            pvalues.insert(*label, p);
        }
        Ok(pvalues)
    }

    /// Labels whose p-value exceeds `1 - confidence`.
    pub fn prediction_set(&self, features: &FeatureVector, confidence: f64) -> Result<BTreeSet<i32>, ConformalError> {
        pvalue::prediction_set(&self.predict(features)?, confidence)
    }

    /// Largest p-value of the example.
    pub fn credibility(&self, features: &FeatureVector) -> Result<f64, ConformalError> {
        pvalue::credibility(&self.predict(features)?).ok_or_else(|| ConformalError::NotTrained(NAME.to_string()))
    }

    /// One minus the second largest p-value of the example.
    pub fn confidence(&self, features: &FeatureVector) -> Result<f64, ConformalError> {
        pvalue::confidence(&self.predict(features)?).ok_or_else(|| ConformalError::NotTrained(NAME.to_string()))
    }

    /// Label with the largest p-value.
    pub fn forced_prediction(&self, features: &FeatureVector) -> Result<i32, ConformalError> {
        pvalue::forced_prediction(&self.predict(features)?).ok_or_else(|| ConformalError::NotTrained(NAME.to_string()))
    }

    /// Gradient of the nonconformity of `label`, averaged over the sub-models.
    ///
    /// * `stepsize` - Perturbation of every explicit feature, `DEFAULT_GRADIENT_STEPSIZE` when `None`.
    /// * `label` - Hypothesised label, the smallest label when `None`.
    pub fn calculate_gradient(
        &self,
        features: &FeatureVector,
        stepsize: Option<f64>,
        label: Option<i32>,
    ) -> Result<SparseGradient, ConformalError> {
        self.ensure_trained()?;
        let label = resolve_label(&self.labels, label)?;
        let stepsize = gradient_stepsize(stepsize);
        let gradients = self
            .ensemble
            .trained()
            .map(|slot| finite_difference(features, stepsize, |f| slot.ncm.score(f, label)))
            .collect::<Result<Vec<SparseGradient>, ConformalError>>()?;
        SparseGradient::mean(&gradients)
    }

    /// Calibration state of every split.
    pub fn export_state(&self) -> Result<AcpClassifierState, ConformalError> {
        self.ensure_trained()?;
        Ok(AcpClassifierState {
            labels: self.labels.clone(),
            calibrations: self
                .ensemble
                .slots()
                .iter()
                .map(|s| s.as_ref().map(|slot| slot.calibration.clone()))
                .collect(),
        })
    }

    /// Rebuild a classifier from fitted measures and their exported calibration state.
    ///
    /// `ncms[i]` must be fitted exactly when `state.calibrations[i]` is present.
    pub fn from_state(
        prototype: N,
        cfg: AcpConfig,
        state: AcpClassifierState,
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
                (Some(ncm), Some(calibration)) if ncm.is_fitted() => {
                    slots.push(Some(ClassificationSlot { ncm, calibration }))
                }
                (None, None) => slots.push(None),
                _ => {
                    return Err(ConformalError::DataValidation(format!(
                        "slot {} has mismatching measure and calibration state",
                        index
                    )))
                }
            }
        }
        Ok(AcpClassifier {
            cfg,
            prototype,
            labels: state.labels,
            ensemble: Ensemble::with_slots(slots),
        })
    }
}

pub(crate) fn resolve_label(labels: &BTreeSet<i32>, label: Option<i32>) -> Result<i32, ConformalError> {
    match label {
        Some(l) if labels.contains(&l) => Ok(l),
        Some(l) => Err(ConformalError::InvalidParameter(
            "label".to_string(),
            format!("one of {:?}", labels),
            l.to_string(),
        )),
        None => labels
            .iter()
            .next()
            .copied()
            .ok_or_else(|| ConformalError::NotTrained(NAME.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataRecord;
    use crate::models::NearestCentroid;
    use crate::ncm::{ClassificationNcmKind, ClassifierNcm};
    use crate::sampler::{FoldedSampler, SampleMethod};

    fn blobs() -> Dataset {
        let records = (0..60)
            .map(|i| {
                let label = i % 2;
                let centre = if label == 0 { 0.0 } else { 4.0 };
                let jitter = ((i * 7) % 11) as f64 / 11.0 - 0.5;
                DataRecord::new(label as f64, FeatureVector::dense(vec![centre + jitter, jitter]))
            })
            .collect();
        Dataset::new(records)
    }

    fn classifier(aggregation: AggregationStrategy) -> AcpClassifier<ClassifierNcm<NearestCentroid>> {
        let ncm = ClassifierNcm::new(NearestCentroid::new(), ClassificationNcmKind::NegativeDistanceToHyperplane).unwrap();
        let cfg = AcpConfig::default()
            .set_sampler(SampleMethod::Folded(FoldedSampler::new(5, true)))
            .set_aggregation(aggregation);
        AcpClassifier::new(ncm, cfg).unwrap()
    }

    #[test]
    fn test_untrained_errors() {
        let acp = classifier(AggregationStrategy::default());
        assert!(!acp.is_partially_trained());
        let err = acp.predict(&FeatureVector::dense(vec![0.0, 0.0])).unwrap_err();
        assert!(matches!(err, ConformalError::NotTrained(_)));
        assert!(acp.export_state().is_err());
    }

    #[test]
    fn test_train_and_predict() {
        for aggregation in [
            AggregationStrategy::PooledScores,
            AggregationStrategy::MedianPValue,
            AggregationStrategy::MeanPValue,
        ] {
            let mut acp = classifier(aggregation);
            acp.train(&blobs(), &Context::new(11)).unwrap();
            assert!(acp.is_trained());
            let near_zero = FeatureVector::dense(vec![0.1, 0.0]);
            let pvalues = acp.predict(&near_zero).unwrap();
            assert!(pvalues[&0] > pvalues[&1]);
            assert!(pvalues.values().all(|p| *p > 0.0 && *p <= 1.0));
            assert_eq!(acp.forced_prediction(&near_zero).unwrap(), 0);
            let set = acp.prediction_set(&near_zero, 0.8).unwrap();
            assert!(set.contains(&0));
            assert!(!set.contains(&1));
        }
    }

    #[test]
    fn test_prediction_set_shrinks_with_lower_confidence() {
        let mut acp = classifier(AggregationStrategy::MedianPValue);
        acp.train(&blobs(), &Context::new(5)).unwrap();
        let x = FeatureVector::dense(vec![2.0, 0.0]);
        let wide = acp.prediction_set(&x, 0.99).unwrap();
        let narrow = acp.prediction_set(&x, 0.5).unwrap();
        assert!(narrow.is_subset(&wide));
    }

    #[test]
    fn test_train_index_and_state() {
        let mut acp = classifier(AggregationStrategy::MedianPValue);
        let ctx = Context::new(2);
        acp.train_index(&blobs(), 3, &ctx).unwrap();
        assert!(acp.is_partially_trained());
        assert!(!acp.is_trained());
        assert!(acp.train_index(&blobs(), 5, &ctx).is_err());

        let state = acp.export_state().unwrap();
        assert_eq!(state.calibrations.len(), 5);
        assert!(state.calibrations[3].is_some());
        let restored = AcpClassifierState::from_json(&state.json_dump().unwrap()).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn test_restored_state_is_validated() {
        let state = AcpClassifierState::from_json(r#"{"labels":[0,1],"calibrations":[{"scores":[0.5,0.1,0.3]},null]}"#)
            .unwrap();
        let calibration = state.calibrations[0].as_ref().unwrap();
        assert!((calibration.p_value(0.2).unwrap() - 0.75).abs() < 1e-12);
        assert!(state.calibrations[1].is_none());
        let err = AcpClassifierState::from_json(r#"{"labels":[0,1],"calibrations":[{"scores":[]}]}"#).unwrap_err();
        assert!(matches!(err, ConformalError::UnableToRead(_)));
    }

    #[test]
    fn test_gradient_points_away_from_label() {
        let mut acp = classifier(AggregationStrategy::MedianPValue);
        acp.train(&blobs(), &Context::new(9)).unwrap();
        let x = FeatureVector::dense(vec![2.0, 0.0]);
        let g = acp.calculate_gradient(&x, None, None).unwrap();
        assert_eq!(g.len(), 2);
        // moving towards class 1 makes label 0 stranger
        assert!(g.get(0).unwrap() > 0.0);
        assert!(acp.calculate_gradient(&x, None, Some(9)).is_err());
    }

    #[test]
    fn test_single_label_dataset_fails() {
        let mut acp = classifier(AggregationStrategy::MedianPValue);
        let ds = Dataset::new(
            (0..10)
                .map(|i| DataRecord::new(1.0, FeatureVector::dense(vec![i as f64])))
                .collect(),
        );
        assert!(acp.train(&ds, &Context::default()).unwrap_err().is_data());
        assert!(!acp.is_partially_trained());
    }
}
