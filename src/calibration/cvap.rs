//! Cross Venn-ABERS predictor
//!
//! One binary classifier per split, each with a Venn-ABERS calibrator fit on the
//! margin of the positive decision score over the negative one. The per-split
//! probability pairs are merged with geometric means into a single probability of
//! the positive label.
use crate::calibration::venn_abers::{VennAbersCalibrator, VennAbersInterval};
use crate::conformal::ensemble::{train_one, Ensemble};
use crate::conformal::StateIO;
use crate::context::Context;
use crate::data::{class_label, Dataset, FeatureVector};
use crate::errors::ConformalError;
use crate::model::Classifier;
use crate::sampler::{SampleMethod, Sampler, TrainSplit};
use crate::utils::{geometric_mean, mean};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const NAME: &str = "CvapPredictor";

fn default_sampler() -> SampleMethod {
    SampleMethod::default()
}
fn default_min_successful_models() -> Option<usize> {
    None
}

/// Configuration of a [`CvapPredictor`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CvapConfig {
    #[serde(default = "default_sampler")]
    pub sampler: SampleMethod,
    /// Fewest sub-models that must train for `train` to succeed, `None` for a strict majority.
    #[serde(default = "default_min_successful_models")]
    pub min_successful_models: Option<usize>,
}

impl Default for CvapConfig {
    fn default() -> Self {
        CvapConfig {
            sampler: default_sampler(),
            min_successful_models: default_min_successful_models(),
        }
    }
}

impl CvapConfig {
    /// Set the sampler.
    /// * `sampler` - Strategy producing the proper-training / calibration splits.
    pub fn set_sampler(mut self, sampler: SampleMethod) -> Self {
        self.sampler = sampler;
        self
    }

    /// Set the minimum number of successfully trained sub-models.
    /// * `min_successful_models` - `None` requires a strict majority of the splits.
    pub fn set_min_successful_models(mut self, min_successful_models: Option<usize>) -> Self {
        self.min_successful_models = min_successful_models;
        self
    }

    pub fn validate(&self) -> Result<(), ConformalError> {
        self.sampler.validate()?;
        let n = self.sampler.num_samples();
        match self.min_successful_models {
            Some(m) if m == 0 || m > n => Err(ConformalError::InvalidParameter(
                "min_successful_models".to_string(),
                format!("value within 1 and {}", n),
                m.to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl StateIO for CvapConfig {}

/// Calibrated probabilities of one example.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CvapPrediction {
    /// Probability of each of the two labels, summing to one.
    pub probabilities: BTreeMap<i32, f64>,
    /// Mean lower probability of the positive label over the sub-models.
    pub p0: f64,
    /// Mean upper probability of the positive label over the sub-models.
    pub p1: f64,
    /// Probability pair of every trained sub-model.
    pub intervals: Vec<VennAbersInterval>,
}

/// Calibrator state of a [`CvapPredictor`], one entry per split.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CvapState {
    pub negative: i32,
    pub positive: i32,
    pub calibrators: Vec<Option<VennAbersCalibrator>>,
}

impl StateIO for CvapState {}

#[derive(Debug)]
struct CvapSlot<C> {
    model: C,
    calibrator: VennAbersCalibrator,
}

/// Cross Venn-ABERS predictor over a binary classifier.
#[derive(Debug)]
pub struct CvapPredictor<C: Classifier> {
    pub cfg: CvapConfig,
    prototype: C,
    // (negative, positive)
    labels: Option<(i32, i32)>,
    ensemble: Ensemble<CvapSlot<C>>,
}

/// Margin of the positive label over the best other label, increasing with the
/// evidence for the positive class.
fn positive_score<C: Classifier>(model: &C, features: &FeatureVector, positive: i32) -> Result<f64, ConformalError> {
    let scores = model.predict_scores(features)?;
    let own = *scores.get(&positive).ok_or_else(|| {
        ConformalError::DataValidation(format!("{} produced no score for label {}", model.name(), positive))
    })?;
    let best_other = scores
        .iter()
        .filter(|(l, _)| **l != positive)
        .map(|(_, s)| *s)
        .reduce(f64::max)
        .ok_or_else(|| {
            ConformalError::DataValidation(format!("{} produced a score for a single label", model.name()))
        })?;
    let score = own - best_other;
    if !score.is_finite() {
        return Err(ConformalError::NonFiniteScore(score));
    }
    Ok(score)
}

fn fit_slot<C: Classifier>(prototype: &C, split: TrainSplit, positive: i32) -> Result<CvapSlot<C>, ConformalError> {
    let mut model = prototype.clone_untrained();
    model.fit(&split.proper_training)?;
    let mut scores = Vec::with_capacity(split.calibration.len());
    let mut labels = Vec::with_capacity(split.calibration.len());
    for r in &split.calibration {
        scores.push(positive_score(&model, &r.features, positive)?);
        labels.push(class_label(r.label)? == positive);
    }
    if labels.iter().all(|l| *l) || labels.iter().all(|l| !*l) {
        return Err(ConformalError::DataValidation(
            "the calibration set holds a single class".to_string(),
        ));
    }
    let calibrator = VennAbersCalibrator::fit_labels(&scores, &labels)?;
    Ok(CvapSlot { model, calibrator })
}

fn binary_labels(dataset: &Dataset) -> Result<(i32, i32), ConformalError> {
    dataset.validate()?;
    let labels: Vec<i32> = dataset.class_labels()?.into_iter().collect();
    match labels.as_slice() {
        [negative, positive] => Ok((*negative, *positive)),
        _ => Err(ConformalError::DataValidation(format!(
            "Venn-ABERS needs exactly two labels, found {}",
            labels.len()
        ))),
    }
}

impl<C: Classifier> CvapPredictor<C> {
    pub fn new(prototype: C, cfg: CvapConfig) -> Result<Self, ConformalError> {
        cfg.validate()?;
        Ok(CvapPredictor {
            cfg,
            prototype,
            labels: None,
            ensemble: Ensemble::default(),
        })
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

    /// `(negative, positive)` labels, the positive label being the larger one.
    pub fn labels(&self) -> Option<(i32, i32)> {
        self.labels
    }

    /// Train every sub-model, replacing any earlier training.
    pub fn train(&mut self, dataset: &Dataset, ctx: &Context) -> Result<(), ConformalError> {
        self.ensemble = Ensemble::default();
        self.labels = None;
        let (negative, positive) = binary_labels(dataset)?;
        let required = self
            .cfg
            .min_successful_models
            .unwrap_or(self.num_models() / 2 + 1);
        let prototype = &self.prototype;
        self.ensemble = Ensemble::train(&self.cfg.sampler, dataset, ctx, required, NAME, |_, split| {
            fit_slot(prototype, split, positive)
        })?;
        self.labels = Some((negative, positive));
        Ok(())
    }

    /// Train only sub-model `index`, keeping the others.
    pub fn train_index(&mut self, dataset: &Dataset, index: usize, ctx: &Context) -> Result<(), ConformalError> {
        let labels = binary_labels(dataset)?;
        if self.ensemble.is_partial() && self.labels != Some(labels) {
            return Err(ConformalError::DataValidation(
                "the label space differs from the one the other sub-models were trained on".to_string(),
            ));
        }
        let slot = train_one(&self.cfg.sampler, dataset, ctx, index, |_, split| {
            fit_slot(&self.prototype, split, labels.1)
        })?;
        self.ensemble.resize(self.num_models());
        self.ensemble.set(index, slot)?;
        self.labels = Some(labels);
        Ok(())
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<CvapPrediction, ConformalError> {
        let (negative, positive) = match self.labels {
            Some(labels) if self.is_partially_trained() => labels,
            _ => return Err(ConformalError::NotTrained(NAME.to_string())),
        };
        let intervals = self
            .ensemble
            .trained()
            .map(|slot| {
                let score = positive_score(&slot.model, features, positive)?;
                slot.calibrator.predict(score)
            })
            .collect::<Result<Vec<VennAbersInterval>, ConformalError>>()?;

        let not_trained = || ConformalError::NotTrained(NAME.to_string());
        let p0s: Vec<f64> = intervals.iter().map(|i| i.p0).collect();
        let p1s: Vec<f64> = intervals.iter().map(|i| i.p1).collect();
        let complements: Vec<f64> = p0s.iter().map(|p| 1.0 - p).collect();
        let gm1 = geometric_mean(&p1s).ok_or_else(not_trained)?;
        let gm0 = geometric_mean(&complements).ok_or_else(not_trained)?;
        // Both means vanish only when the sub-models disagree completely.
        let p = if gm0 + gm1 > 0.0 {
            gm1 / (gm0 + gm1)
        } else {
            let singles: Vec<f64> = intervals.iter().map(|i| i.probability()).collect();
            mean(&singles).ok_or_else(not_trained)?
        };

        let mut probabilities = BTreeMap::new();
        probabilities.insert(negative, 1.0 - p);
        probabilities.insert(positive, p);
        Ok(CvapPrediction {
            probabilities,
            p0: mean(&p0s).ok_or_else(not_trained)?,
            p1: mean(&p1s).ok_or_else(not_trained)?,
            intervals,
        })
    }

    pub fn export_state(&self) -> Result<CvapState, ConformalError> {
        let (negative, positive) = match self.labels {
            Some(labels) if self.is_partially_trained() => labels,
            _ => return Err(ConformalError::NotTrained(NAME.to_string())),
        };
        Ok(CvapState {
            negative,
            positive,
            calibrators: self
                .ensemble
                .slots()
                .iter()
                .map(|s| s.as_ref().map(|slot| slot.calibrator.clone()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataRecord;
    use crate::models::NearestCentroid;
    use crate::sampler::{FoldedSampler, RandomSampler};

    fn overlapping() -> Dataset {
        Dataset::new(
            (0..80)
                .map(|i| {
                    let label = i % 2;
                    let x = label as f64 * 1.5 + ((i * 17) % 13) as f64 / 13.0 * 2.0;
                    DataRecord::new(label as f64, FeatureVector::dense(vec![x]))
                })
                .collect(),
        )
    }

    fn cvap() -> CvapPredictor<NearestCentroid> {
        let cfg = CvapConfig::default().set_sampler(SampleMethod::Folded(FoldedSampler::new(4, true)));
        CvapPredictor::new(NearestCentroid::new(), cfg).unwrap()
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let mut cvap = cvap();
        cvap.train(&overlapping(), &Context::new(6)).unwrap();
        assert!(cvap.is_trained());
        assert_eq!(cvap.labels(), Some((0, 1)));
        for x in [-1.0, 0.5, 1.7, 2.5, 5.0] {
            let p = cvap.predict(&FeatureVector::dense(vec![x])).unwrap();
            let total: f64 = p.probabilities.values().sum();
            assert!((total - 1.0).abs() < 1e-6);
            assert!(p.probabilities.values().all(|v| (0.0..=1.0).contains(v)));
            assert!(p.p0 <= p.p1);
            assert_eq!(p.intervals.len(), 4);
        }
        let low = cvap.predict(&FeatureVector::dense(vec![-1.0])).unwrap();
        let high = cvap.predict(&FeatureVector::dense(vec![5.0])).unwrap();
        assert!(high.probabilities[&1] > low.probabilities[&1]);
    }

    #[test]
    fn test_probability_follows_the_margin() {
        let mut cvap = cvap();
        cvap.train(&overlapping(), &Context::new(6)).unwrap();
        let probabilities: Vec<f64> = [-3.0, -1.0, 0.5, 1.25, 2.0, 3.5, 5.0, 8.0]
            .iter()
            .map(|x| cvap.predict(&FeatureVector::dense(vec![*x])).unwrap().probabilities[&1])
            .collect();
        assert!(probabilities.windows(2).all(|w| w[0] <= w[1] + 1e-12), "{:?}", probabilities);
        assert!(probabilities[7] > probabilities[0]);
        let far = cvap.predict(&FeatureVector::dense(vec![-3.0])).unwrap();
        assert!(far.intervals.iter().all(|i| i.p0.is_sign_positive()));
    }

    #[test]
    fn test_rejects_non_binary() {
        let mut cvap = cvap();
        let ds = Dataset::new(
            (0..30)
                .map(|i| DataRecord::new((i % 3) as f64, FeatureVector::dense(vec![i as f64])))
                .collect(),
        );
        assert!(cvap.train(&ds, &Context::default()).unwrap_err().is_data());
        assert!(cvap.predict(&FeatureVector::dense(vec![1.0])).is_err());
    }

    #[test]
    fn test_single_class_calibration_fails_sub_model() {
        // Only one positive record: at most one calibration set can see it.
        let mut records: Vec<DataRecord> = (0..20)
            .map(|i| DataRecord::new(0.0, FeatureVector::dense(vec![i as f64])))
            .collect();
        records.push(DataRecord::new(1.0, FeatureVector::dense(vec![30.0])));
        let cfg = CvapConfig::default()
            .set_sampler(SampleMethod::Random(RandomSampler::new(4, 0.2, false)))
            .set_min_successful_models(Some(4));
        let mut cvap = CvapPredictor::new(NearestCentroid::new(), cfg).unwrap();
        let err = cvap.train(&Dataset::new(records), &Context::default()).unwrap_err();
        assert!(matches!(err, ConformalError::InsufficientModels { .. }));
        assert!(!cvap.is_partially_trained());
    }

    #[test]
    fn test_state_export() {
        let mut cvap = cvap();
        cvap.train_index(&overlapping(), 1, &Context::new(2)).unwrap();
        let state = cvap.export_state().unwrap();
        assert_eq!(state.calibrators.len(), 4);
        assert!(state.calibrators[1].is_some());
        assert_eq!(CvapState::from_json(&state.json_dump().unwrap()).unwrap(), state);
    }
}
