use crate::data::{class_label, DataRecord, FeatureVector};
use crate::errors::ConformalError;
use crate::model::Classifier;
use crate::ncm::{ClassificationNcm, NonconformityMeasure};
use crate::utils::items_to_strings;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// How the classifier output is turned into nonconformity.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ClassificationNcmKind {
    /// Negative margin between the label's decision score and the best other label.
    #[default]
    NegativeDistanceToHyperplane,
    /// `1 - p(label)`.
    InverseProbability,
    /// `(1 - (p(label) - max p(other))) / 2`.
    ProbabilityMargin,
}

impl ClassificationNcmKind {
    pub fn requires_probabilities(&self) -> bool {
        !matches!(self, ClassificationNcmKind::NegativeDistanceToHyperplane)
    }
}

impl FromStr for ClassificationNcmKind {
    type Err = ConformalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NegativeDistanceToHyperplane" => Ok(ClassificationNcmKind::NegativeDistanceToHyperplane),
            "InverseProbability" => Ok(ClassificationNcmKind::InverseProbability),
            "ProbabilityMargin" => Ok(ClassificationNcmKind::ProbabilityMargin),
            _ => Err(ConformalError::ParseString(
                s.to_string(),
                "ClassificationNcmKind".to_string(),
                items_to_strings(vec![
                    "NegativeDistanceToHyperplane",
                    "InverseProbability",
                    "ProbabilityMargin",
                ]),
            )),
        }
    }
}

/// Nonconformity measure backed by a [`Classifier`].
#[derive(Debug)]
pub struct ClassifierNcm<C: Classifier> {
    model: C,
    kind: ClassificationNcmKind,
    labels: BTreeSet<i32>,
}

impl<C: Classifier> ClassifierNcm<C> {
    /// Wrap an unfitted classifier. Probability based kinds require a probabilistic model.
    pub fn new(model: C, kind: ClassificationNcmKind) -> Result<Self, ConformalError> {
        if kind.requires_probabilities() && !model.supports_probabilities() {
            return Err(ConformalError::Unsupported(format!(
                "{:?} requires probabilities, which {} does not produce",
                kind,
                model.name()
            )));
        }
        Ok(ClassifierNcm {
            model,
            kind,
            labels: BTreeSet::new(),
        })
    }

    pub fn model(&self) -> &C {
        &self.model
    }

    pub fn kind(&self) -> ClassificationNcmKind {
        self.kind
    }

    fn outputs(&self, features: &FeatureVector) -> Result<BTreeMap<i32, f64>, ConformalError> {
        if !self.model.is_fitted() {
            return Err(ConformalError::NotTrained(self.model.name().to_string()));
        }
        if self.kind.requires_probabilities() {
            self.model.predict_probabilities(features)
        } else {
            self.model.predict_scores(features)
        }
    }

    fn from_outputs(&self, outputs: &BTreeMap<i32, f64>, label: i32) -> Result<f64, ConformalError> {
        let own = *outputs.get(&label).ok_or_else(|| {
            ConformalError::DataValidation(format!("label {} was not seen when fitting {}", label, self.model.name()))
        })?;
        let best_other = outputs
            .iter()
            .filter(|(l, _)| **l != label)
            .map(|(_, v)| *v)
            .reduce(f64::max);
        let score = match self.kind {
            ClassificationNcmKind::NegativeDistanceToHyperplane => -(own - best_other.unwrap_or(0.0)),
            ClassificationNcmKind::InverseProbability => 1.0 - own,
            ClassificationNcmKind::ProbabilityMargin => (1.0 - (own - best_other.unwrap_or(0.0))) / 2.0,
        };
        if !score.is_finite() {
            return Err(ConformalError::NonFiniteScore(score));
        }
        Ok(score)
    }
}

impl<C: Classifier> NonconformityMeasure for ClassifierNcm<C> {
    fn fit(&mut self, records: &[DataRecord]) -> Result<(), ConformalError> {
        self.labels = records
            .iter()
            .map(|r| class_label(r.label))
            .collect::<Result<BTreeSet<i32>, ConformalError>>()?;
        self.model.fit(records)
    }

    fn is_fitted(&self) -> bool {
        self.model.is_fitted()
    }

    fn clone_untrained(&self) -> Self {
        ClassifierNcm {
            model: self.model.clone_untrained(),
            kind: self.kind,
            labels: BTreeSet::new(),
        }
    }

    fn name(&self) -> String {
        format!("{:?}({})", self.kind, self.model.name())
    }
}

impl<C: Classifier> ClassificationNcm for ClassifierNcm<C> {
    fn score(&self, features: &FeatureVector, label: i32) -> Result<f64, ConformalError> {
        let outputs = self.outputs(features)?;
        self.from_outputs(&outputs, label)
    }

    // One model evaluation for all hypotheses.
    fn scores(&self, features: &FeatureVector, labels: &BTreeSet<i32>) -> Result<BTreeMap<i32, f64>, ConformalError> {
        let outputs = self.outputs(features)?;
        labels
            .iter()
            .map(|l| Ok((*l, self.from_outputs(&outputs, *l)?)))
            .collect()
    }

    fn labels(&self) -> &BTreeSet<i32> {
        &self.labels
    }
}
