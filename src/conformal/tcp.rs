//! Transductive conformal classification
//!
//! No calibration set is held out: for every label hypothesis the measure is refit on
//! the training records plus the test example, and the training records themselves
//! act as the calibration set.
use crate::conformal::classification::resolve_label;
use crate::conformal::gradient::{finite_difference, SparseGradient};
use crate::conformal::gradient_stepsize;
use crate::context::Context;
use crate::data::{class_label, DataRecord, Dataset, FeatureVector};
use crate::errors::ConformalError;
use crate::ncm::ClassificationNcm;
use crate::pvalue::{self, p_value};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

const NAME: &str = "TcpClassifier";

/// Transductive conformal classifier.
#[derive(Debug)]
pub struct TcpClassifier<N: ClassificationNcm> {
    prototype: N,
    training: Vec<DataRecord>,
    labels: BTreeSet<i32>,
}

impl<N: ClassificationNcm> TcpClassifier<N> {
    pub fn new(prototype: N) -> Self {
        TcpClassifier {
            prototype,
            training: Vec::new(),
            labels: BTreeSet::new(),
        }
    }

    /// Keep every record of the dataset. No model is fit until prediction.
    pub fn train(&mut self, dataset: &Dataset) -> Result<(), ConformalError> {
        dataset.validate()?;
        let labels = dataset.class_labels()?;
        if labels.len() < 2 {
            return Err(ConformalError::DataValidation(format!(
                "classification needs at least two labels, found {}",
                labels.len()
            )));
        }
        self.training = dataset.all_records().cloned().collect();
        self.labels = labels;
        info!("{} holds {} training records.", NAME, self.training.len());
        Ok(())
    }

    pub fn is_trained(&self) -> bool {
        !self.training.is_empty()
    }

    pub fn labels(&self) -> &BTreeSet<i32> {
        &self.labels
    }

    pub fn training_records(&self) -> &[DataRecord] {
        &self.training
    }

    fn ensure_trained(&self) -> Result<(), ConformalError> {
        if self.is_trained() {
            Ok(())
        } else {
            Err(ConformalError::NotTrained(NAME.to_string()))
        }
    }

    /// A fresh measure fit on the training records plus `(features, label)`.
    fn fit_hypothesis(&self, features: &FeatureVector, label: i32) -> Result<N, ConformalError> {
        let mut augmented = Vec::with_capacity(self.training.len() + 1);
        augmented.extend(self.training.iter().cloned());
        augmented.push(DataRecord::new(label as f64, features.clone()));
        let mut ncm = self.prototype.clone_untrained();
        ncm.fit(&augmented)?;
        Ok(ncm)
    }

    fn hypothesis_p_value(&self, features: &FeatureVector, label: i32) -> Result<f64, ConformalError> {
        let ncm = self.fit_hypothesis(features, label)?;
        let calibration = self
            .training
            .iter()
            .map(|r| ncm.score(&r.features, class_label(r.label)?))
            .collect::<Result<Vec<f64>, ConformalError>>()?;
        let score = ncm.score(features, label)?;
        debug!("{} hypothesis {} scored {}.", NAME, label, score);
        p_value(&calibration, score)
    }

    /// P-value of every label, the hypotheses evaluated in parallel.
    pub fn predict(&self, features: &FeatureVector, ctx: &Context) -> Result<BTreeMap<i32, f64>, ConformalError> {
        self.ensure_trained()?;
        let labels: Vec<i32> = self.labels.iter().copied().collect();
        let pool = ctx.thread_pool(labels.len())?;
        let pvalues: Result<Vec<f64>, ConformalError> = pool.install(|| {
            labels
                .par_iter()
                .map(|label| {
                    ctx.cancellation.check()?;
                    self.hypothesis_p_value(features, *label)
                })
                .collect()
        });
        // A cancelled call reports cancellation even if another hypothesis failed first.
        ctx.cancellation.check()?;
        Ok(labels.into_iter().zip(pvalues?).collect())
    }

    pub fn prediction_set(
        &self,
        features: &FeatureVector,
        confidence: f64,
        ctx: &Context,
    ) -> Result<BTreeSet<i32>, ConformalError> {
        pvalue::prediction_set(&self.predict(features, ctx)?, confidence)
    }

    pub fn credibility(&self, features: &FeatureVector, ctx: &Context) -> Result<f64, ConformalError> {
        pvalue::credibility(&self.predict(features, ctx)?).ok_or_else(|| ConformalError::NotTrained(NAME.to_string()))
    }

    /// Gradient of the nonconformity of `label` under the measure fit on the training
    /// records plus `(features, label)`.
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
        let ncm = self.fit_hypothesis(features, label)?;
        finite_difference(features, gradient_stepsize(stepsize), |f| ncm.score(f, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use crate::models::NearestCentroid;
    use crate::ncm::{ClassificationNcmKind, ClassifierNcm};

    fn dataset() -> Dataset {
        Dataset::new(
            (0..24)
                .map(|i| {
                    let label = i % 3;
                    let x = label as f64 * 5.0 + (i % 4) as f64 * 0.25;
                    DataRecord::new(label as f64, FeatureVector::dense(vec![x]))
                })
                .collect(),
        )
    }

    fn tcp() -> TcpClassifier<ClassifierNcm<NearestCentroid>> {
        let ncm = ClassifierNcm::new(NearestCentroid::new(), ClassificationNcmKind::NegativeDistanceToHyperplane).unwrap();
        TcpClassifier::new(ncm)
    }

    #[test]
    fn test_predict() {
        let mut tcp = tcp();
        assert!(tcp.predict(&FeatureVector::dense(vec![0.0]), &Context::default()).is_err());
        tcp.train(&dataset()).unwrap();
        let ctx = Context::default().set_num_threads(Some(2));
        let pvalues = tcp.predict(&FeatureVector::dense(vec![5.3]), &ctx).unwrap();
        assert_eq!(pvalues.len(), 3);
        assert!(pvalues[&1] > pvalues[&0]);
        assert!(pvalues[&1] > pvalues[&2]);
        assert!((pvalues[&0] - 1.0 / 25.0).abs() < 1e-12);
        let set = tcp.prediction_set(&FeatureVector::dense(vec![5.3]), 0.9, &ctx).unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_deterministic_across_thread_counts() {
        let mut tcp = tcp();
        tcp.train(&dataset()).unwrap();
        let x = FeatureVector::dense(vec![7.5]);
        let a = tcp.predict(&x, &Context::default().set_num_threads(Some(1))).unwrap();
        let b = tcp.predict(&x, &Context::default().set_num_threads(Some(3))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cancellation() {
        let mut tcp = tcp();
        tcp.train(&dataset()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = Context::default().set_cancellation(token);
        let err = tcp.predict(&FeatureVector::dense(vec![1.0]), &ctx).unwrap_err();
        assert!(matches!(err, ConformalError::Cancelled));
    }

    #[test]
    fn test_gradient_is_deterministic() {
        let mut tcp = tcp();
        tcp.train(&dataset()).unwrap();
        let x = FeatureVector::dense(vec![2.5]);
        let a = tcp.calculate_gradient(&x, Some(0.01), Some(0)).unwrap();
        let b = tcp.calculate_gradient(&x, Some(0.01), Some(0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
        // moving towards label 1 makes label 0 stranger
        assert!(a.get(0).unwrap() > 0.0);
        assert_eq!(tcp.calculate_gradient(&x, None, None).unwrap(), a.clone());
    }
}
