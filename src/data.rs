//! Data
//!
//! Records, feature vectors and datasets consumed by the samplers and the conformal engines.
//! A [`FeatureVector`] is only ever read through index lookups, so scoring models are free
//! to pick whichever representation suits them.
use crate::errors::ConformalError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Feature values of a single example, either dense or sparse.
///
/// Missing indices of a sparse vector, and indices past the end of a dense vector,
/// read as `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureVector {
    /// Every index from `0` to `len - 1` is explicit.
    Dense(Vec<f64>),
    /// Only the stored indices are explicit.
    Sparse(BTreeMap<usize, f64>),
}

impl FeatureVector {
    /// Create a dense vector.
    pub fn dense(values: Vec<f64>) -> Self {
        FeatureVector::Dense(values)
    }

    /// Create a sparse vector from `(index, value)` pairs. Later duplicates win.
    pub fn sparse<I: IntoIterator<Item = (usize, f64)>>(entries: I) -> Self {
        FeatureVector::Sparse(entries.into_iter().collect())
    }

    /// Value stored at `index`.
    pub fn get(&self, index: usize) -> f64 {
        match self {
            FeatureVector::Dense(v) => v.get(index).copied().unwrap_or(0.0),
            FeatureVector::Sparse(m) => m.get(&index).copied().unwrap_or(0.0),
        }
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        match self {
            FeatureVector::Dense(v) => v.len(),
            FeatureVector::Sparse(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest explicit index, if any.
    pub fn max_index(&self) -> Option<usize> {
        match self {
            FeatureVector::Dense(v) => v.len().checked_sub(1),
            FeatureVector::Sparse(m) => m.keys().next_back().copied(),
        }
    }

    /// Iterate over the explicit `(index, value)` entries in ascending index order.
    pub fn iter(&self) -> FeatureIter<'_> {
        match self {
            FeatureVector::Dense(v) => FeatureIter::Dense(v.iter().enumerate()),
            FeatureVector::Sparse(m) => FeatureIter::Sparse(m.iter()),
        }
    }

    /// Copy of this vector with `index` set to `value`.
    ///
    /// Setting an index past the end of a dense vector pads it with zeros.
    pub fn with_value(&self, index: usize, value: f64) -> Self {
        let mut out = self.clone();
        match &mut out {
            FeatureVector::Dense(v) => {
                if index >= v.len() {
                    v.resize(index + 1, 0.0);
                }
                v[index] = value;
            }
            FeatureVector::Sparse(m) => {
                m.insert(index, value);
            }
        }
        out
    }

    /// Squared euclidean distance, treating absent entries as zero.
    pub fn squared_distance(&self, other: &FeatureVector) -> f64 {
        let upper = match (self.max_index(), other.max_index()) {
            (Some(a), Some(b)) => a.max(b) + 1,
            (Some(a), None) | (None, Some(a)) => a + 1,
            (None, None) => return 0.0,
        };
        match (self, other) {
            (FeatureVector::Dense(_), FeatureVector::Dense(_)) => (0..upper)
                .map(|i| {
                    let d = self.get(i) - other.get(i);
                    d * d
                })
                .sum(),
            _ => {
                let indices: BTreeSet<usize> = self.iter().chain(other.iter()).map(|(i, _)| i).collect();
                indices
                    .into_iter()
                    .map(|i| {
                        let d = self.get(i) - other.get(i);
                        d * d
                    })
                    .sum()
            }
        }
    }
}

/// Iterator over the explicit entries of a [`FeatureVector`].
pub enum FeatureIter<'a> {
    Dense(std::iter::Enumerate<std::slice::Iter<'a, f64>>),
    Sparse(std::collections::btree_map::Iter<'a, usize, f64>),
}

impl<'a> Iterator for FeatureIter<'a> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            FeatureIter::Dense(it) => it.next().map(|(i, v)| (i, *v)),
            FeatureIter::Sparse(it) => it.next().map(|(i, v)| (*i, *v)),
        }
    }
}

/// A labelled example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub label: f64,
    pub features: FeatureVector,
}

impl DataRecord {
    pub fn new(label: f64, features: FeatureVector) -> Self {
        DataRecord { label, features }
    }
}

/// Convert a record label into a class label.
pub fn class_label(label: f64) -> Result<i32, ConformalError> {
    if !label.is_finite() || label.fract() != 0.0 || label < i32::MIN as f64 || label > i32::MAX as f64 {
        return Err(ConformalError::DataValidation(format!(
            "label {} is not an integral class label",
            label
        )));
    }
    Ok(label as i32)
}

/// Records available for training, split in three groups.
///
/// `records` are assigned to proper-training or calibration by the sampling strategy,
/// `calibration_exclusive` always end up in the calibration set and
/// `training_exclusive` always end up in the proper-training set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub records: Vec<DataRecord>,
    pub calibration_exclusive: Vec<DataRecord>,
    pub training_exclusive: Vec<DataRecord>,
}

impl Dataset {
    pub fn new(records: Vec<DataRecord>) -> Self {
        Dataset {
            records,
            calibration_exclusive: Vec::new(),
            training_exclusive: Vec::new(),
        }
    }

    /// Set the records that may only be used for calibration.
    pub fn set_calibration_exclusive(mut self, records: Vec<DataRecord>) -> Self {
        self.calibration_exclusive = records;
        self
    }

    /// Set the records that may only be used for proper training.
    pub fn set_training_exclusive(mut self, records: Vec<DataRecord>) -> Self {
        self.training_exclusive = records;
        self
    }

    /// Total number of records over all three groups.
    pub fn len(&self) -> usize {
        self.records.len() + self.calibration_exclusive.len() + self.training_exclusive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every record, regardless of group.
    pub fn all_records(&self) -> impl Iterator<Item = &DataRecord> {
        self.records
            .iter()
            .chain(self.calibration_exclusive.iter())
            .chain(self.training_exclusive.iter())
    }

    /// Sorted set of class labels.
    pub fn class_labels(&self) -> Result<BTreeSet<i32>, ConformalError> {
        self.all_records().map(|r| class_label(r.label)).collect()
    }

    /// Smallest and largest label, used to cap regression intervals.
    pub fn label_range(&self) -> Option<(f64, f64)> {
        self.all_records().fold(None, |acc, r| match acc {
            None => Some((r.label, r.label)),
            Some((lo, hi)) => Some((lo.min(r.label), hi.max(r.label))),
        })
    }

    /// Fail when the dataset is empty or carries non-finite labels.
    pub fn validate(&self) -> Result<(), ConformalError> {
        if self.is_empty() {
            return Err(ConformalError::EmptyDataset);
        }
        if let Some(r) = self.all_records().find(|r| !r.label.is_finite()) {
            return Err(ConformalError::DataValidation(format!("non-finite label {}", r.label)));
        }
        Ok(())
    }
}

/// Load a CSV fixture with a header row; `target` names the label column and every
/// other column becomes a dense feature.
#[cfg(test)]
pub(crate) fn read_csv_dataset(path: &str, target: &str) -> Dataset {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .expect("Failed to open file");
    let headers = reader.headers().expect("Missing header").clone();
    let target_index = headers.iter().position(|h| h == target).expect("Target not found");
    let records = reader
        .records()
        .map(|row| {
            let row = row.expect("CSV record error");
            let values: Vec<f64> = row.iter().map(|v| v.parse::<f64>().expect("Invalid number")).collect();
            let features = values
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != target_index)
                .map(|(_, v)| *v)
                .collect();
            DataRecord::new(values[target_index], FeatureVector::dense(features))
        })
        .collect();
    Dataset::new(records)
}
