//! Models
//!
//! Small deterministic reference implementations of the scoring-model traits.
//! They are intentionally simple; real applications wrap their own algorithms.
use crate::data::{class_label, DataRecord, FeatureVector};
use crate::errors::ConformalError;
use crate::model::{Classifier, Regressor, ScoringModel};
use hashbrown::HashMap;
use std::collections::BTreeMap;

/// Classifier scoring each label by the negative euclidean distance to the label's centroid.
#[derive(Debug, Clone, Default)]
pub struct NearestCentroid {
    centroids: BTreeMap<i32, Vec<f64>>,
}

impl NearestCentroid {
    pub fn new() -> Self {
        Self::default()
    }

    fn distances(&self, features: &FeatureVector) -> Result<BTreeMap<i32, f64>, ConformalError> {
        if self.centroids.is_empty() {
            return Err(ConformalError::NotTrained(self.name().to_string()));
        }
        Ok(self
            .centroids
            .iter()
            .map(|(label, c)| {
                let centroid = FeatureVector::Dense(c.clone());
                (*label, centroid.squared_distance(features).sqrt())
            })
            .collect())
    }
}

impl ScoringModel for NearestCentroid {
    fn fit(&mut self, records: &[DataRecord]) -> Result<(), ConformalError> {
        if records.is_empty() {
            return Err(ConformalError::EmptyDataset);
        }
        let dim = records
            .iter()
            .filter_map(|r| r.features.max_index())
            .max()
            .map_or(0, |m| m + 1);
        let mut sums: HashMap<i32, (Vec<f64>, usize)> = HashMap::new();
        for r in records {
            let label = class_label(r.label)?;
            let entry = sums.entry(label).or_insert_with(|| (vec![0.0; dim], 0));
            for (i, v) in r.features.iter() {
                entry.0[i] += v;
            }
            entry.1 += 1;
        }
        self.centroids = sums
            .into_iter()
            .map(|(label, (sum, n))| (label, sum.into_iter().map(|s| s / n as f64).collect()))
            .collect();
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        !self.centroids.is_empty()
    }

    fn clone_untrained(&self) -> Self {
        NearestCentroid::new()
    }

    fn name(&self) -> &str {
        "NearestCentroid"
    }
}

impl Classifier for NearestCentroid {
    fn predict_scores(&self, features: &FeatureVector) -> Result<BTreeMap<i32, f64>, ConformalError> {
        Ok(self.distances(features)?.into_iter().map(|(l, d)| (l, -d)).collect())
    }

    fn supports_probabilities(&self) -> bool {
        true
    }

    // Softmax over negative distances.
    fn predict_probabilities(&self, features: &FeatureVector) -> Result<BTreeMap<i32, f64>, ConformalError> {
        let scores = self.predict_scores(features)?;
        let max = scores.values().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: BTreeMap<i32, f64> = scores.into_iter().map(|(l, s)| (l, (s - max).exp())).collect();
        let total: f64 = exp.values().sum();
        Ok(exp.into_iter().map(|(l, e)| (l, e / total)).collect())
    }
}

/// Regressor predicting the mean label of the `k` nearest training records.
#[derive(Debug, Clone)]
pub struct KNearestNeighbors {
    k: usize,
    records: Vec<DataRecord>,
}

impl KNearestNeighbors {
    pub fn new(k: usize) -> Result<Self, ConformalError> {
        if k == 0 {
            return Err(ConformalError::InvalidParameter(
                "k".to_string(),
                "a positive integer".to_string(),
                k.to_string(),
            ));
        }
        Ok(KNearestNeighbors { k, records: Vec::new() })
    }
}

impl ScoringModel for KNearestNeighbors {
    fn fit(&mut self, records: &[DataRecord]) -> Result<(), ConformalError> {
        if records.is_empty() {
            return Err(ConformalError::EmptyDataset);
        }
        self.records = records.to_vec();
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        !self.records.is_empty()
    }

    fn clone_untrained(&self) -> Self {
        KNearestNeighbors {
            k: self.k,
            records: Vec::new(),
        }
    }

    fn name(&self) -> &str {
        "KNearestNeighbors"
    }
}

impl Regressor for KNearestNeighbors {
    fn predict_value(&self, features: &FeatureVector) -> Result<f64, ConformalError> {
        if self.records.is_empty() {
            return Err(ConformalError::NotTrained(self.name().to_string()));
        }
        let mut dist: Vec<(f64, usize)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.features.squared_distance(features), i))
            .collect();
        // Ties broken on insertion order so predictions are deterministic.
        dist.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let k = self.k.min(dist.len());
        Ok(dist[..k].iter().map(|(_, i)| self.records[*i].label).sum::<f64>() / k as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(label: f64, x: f64) -> DataRecord {
        DataRecord::new(label, FeatureVector::dense(vec![x]))
    }

    #[test]
    fn test_nearest_centroid() {
        let mut model = NearestCentroid::new();
        assert!(!model.is_fitted());
        model
            .fit(&[rec(0.0, 0.0), rec(0.0, 1.0), rec(1.0, 4.0), rec(1.0, 6.0)])
            .unwrap();
        let scores = model.predict_scores(&FeatureVector::dense(vec![1.0])).unwrap();
        assert_eq!(scores[&0], -0.5);
        assert_eq!(scores[&1], -4.0);
        let probs = model.predict_probabilities(&FeatureVector::dense(vec![1.0])).unwrap();
        assert!((probs.values().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(probs[&0] > probs[&1]);
        assert!(!model.clone_untrained().is_fitted());
    }

    #[test]
    fn test_knn() {
        let mut model = KNearestNeighbors::new(2).unwrap();
        model.fit(&[rec(1.0, 0.0), rec(3.0, 1.0), rec(10.0, 10.0)]).unwrap();
        let pred = model.predict_value(&FeatureVector::dense(vec![0.4])).unwrap();
        assert_eq!(pred, 2.0);
        assert!(KNearestNeighbors::new(0).is_err());
    }
}
