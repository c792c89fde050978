//! Sampler
//!
//! Strategies for partitioning a dataset into proper-training and calibration sets.
//! Every split is a pure function of the dataset, the seed and the split index, so the
//! same seed always reproduces the same sequence of splits.
use crate::constants::{DEFAULT_CALIBRATION_RATIO, DEFAULT_NUM_FOLDS, DEFAULT_NUM_MODELS, MIN_NUM_FOLDS, SEED_MIX};
use crate::data::{class_label, DataRecord, Dataset};
use crate::errors::ConformalError;
use crate::utils::{items_to_strings, validate_float_parameter};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// One proper-training / calibration partition.
#[derive(Debug, Clone)]
pub struct TrainSplit {
    pub proper_training: Vec<DataRecord>,
    pub calibration: Vec<DataRecord>,
    /// Integral labels present in either part.
    pub observed_labels: BTreeSet<i32>,
}

impl TrainSplit {
    fn new(proper_training: Vec<DataRecord>, calibration: Vec<DataRecord>) -> Self {
        let observed_labels = proper_training
            .iter()
            .chain(calibration.iter())
            .filter_map(|r| class_label(r.label).ok())
            .collect();
        TrainSplit {
            proper_training,
            calibration,
            observed_labels,
        }
    }
}

/// Seed of split `index`, decorrelated from neighbouring indices.
#[inline]
pub fn split_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64).wrapping_add(1).wrapping_mul(SEED_MIX)
}

/// A sampler partitions a dataset into a fixed number of splits.
pub trait Sampler {
    /// Number of splits this sampler produces.
    fn num_samples(&self) -> usize;

    /// Fail fast on invalid parameters.
    fn validate(&self) -> Result<(), ConformalError>;

    /// Build split `index`.
    fn split(&self, dataset: &Dataset, seed: u64, index: usize) -> Result<TrainSplit, ConformalError>;

    /// Build every split, failing on the first invalid one.
    fn splits(&self, dataset: &Dataset, seed: u64) -> Result<Vec<TrainSplit>, ConformalError> {
        (0..self.num_samples()).map(|i| self.split(dataset, seed, i)).collect()
    }

    /// Lazily iterate over the splits.
    fn iter<'a>(&'a self, dataset: &'a Dataset, seed: u64) -> SplitIterator<'a, Self>
    where
        Self: Sized,
    {
        SplitIterator {
            sampler: self,
            dataset,
            seed,
            next: 0,
        }
    }
}

pub struct SplitIterator<'a, S: Sampler> {
    sampler: &'a S,
    dataset: &'a Dataset,
    seed: u64,
    next: usize,
}

impl<'a, S: Sampler> Iterator for SplitIterator<'a, S> {
    type Item = Result<TrainSplit, ConformalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.sampler.num_samples() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(self.sampler.split(self.dataset, self.seed, index))
    }
}

fn check_index(index: usize, n: usize) -> Result<(), ConformalError> {
    if index >= n {
        return Err(ConformalError::InvalidParameter(
            "split index".to_string(),
            format!("value below {}", n),
            index.to_string(),
        ));
    }
    Ok(())
}

fn stratify(records: &[DataRecord]) -> Result<BTreeMap<i32, Vec<usize>>, ConformalError> {
    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (i, r) in records.iter().enumerate() {
        groups.entry(class_label(r.label)?).or_default().push(i);
    }
    Ok(groups)
}

// Exclusive records join their bucket, and each bucket is shuffled so the final
// order does not reveal how a record was assigned.
fn assemble(
    dataset: &Dataset,
    calibration_idx: &[usize],
    training_idx: &[usize],
    rng: &mut StdRng,
) -> Result<TrainSplit, ConformalError> {
    let mut calibration: Vec<DataRecord> = calibration_idx.iter().map(|i| dataset.records[*i].clone()).collect();
    calibration.extend(dataset.calibration_exclusive.iter().cloned());
    let mut proper: Vec<DataRecord> = training_idx.iter().map(|i| dataset.records[*i].clone()).collect();
    proper.extend(dataset.training_exclusive.iter().cloned());
    if calibration.is_empty() || proper.is_empty() {
        return Err(ConformalError::DataValidation(format!(
            "split produced {} proper-training and {} calibration records, both must be non-empty",
            proper.len(),
            calibration.len()
        )));
    }
    calibration.shuffle(rng);
    proper.shuffle(rng);
    Ok(TrainSplit::new(proper, calibration))
}

/// Independent random draws with a fixed calibration ratio.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct RandomSampler {
    pub num_models: usize,
    pub calibration_ratio: f64,
    pub stratified: bool,
}

impl Default for RandomSampler {
    fn default() -> Self {
        RandomSampler {
            num_models: DEFAULT_NUM_MODELS,
            calibration_ratio: DEFAULT_CALIBRATION_RATIO,
            stratified: false,
        }
    }
}

impl RandomSampler {
    pub fn new(num_models: usize, calibration_ratio: f64, stratified: bool) -> Self {
        RandomSampler {
            num_models,
            calibration_ratio,
            stratified,
        }
    }
}

impl Sampler for RandomSampler {
    fn num_samples(&self) -> usize {
        self.num_models
    }

    fn validate(&self) -> Result<(), ConformalError> {
        if self.num_models == 0 {
            return Err(ConformalError::InvalidParameter(
                "num_models".to_string(),
                "a positive integer".to_string(),
                "0".to_string(),
            ));
        }
        validate_float_parameter(self.calibration_ratio, 0.0, 1.0, "calibration_ratio")?;
        if self.calibration_ratio == 0.0 || self.calibration_ratio == 1.0 {
            return Err(ConformalError::InvalidParameter(
                "calibration_ratio".to_string(),
                "real value within (0, 1)".to_string(),
                self.calibration_ratio.to_string(),
            ));
        }
        Ok(())
    }

    fn split(&self, dataset: &Dataset, seed: u64, index: usize) -> Result<TrainSplit, ConformalError> {
        self.validate()?;
        check_index(index, self.num_models)?;
        let mut rng = StdRng::seed_from_u64(split_seed(seed, index));
        let mut calibration = Vec::new();
        let mut training = Vec::new();

        let groups = if self.stratified {
            let groups = stratify(&dataset.records)?;
            groups.into_values().collect::<Vec<_>>()
        } else {
            vec![(0..dataset.records.len()).collect::<Vec<_>>()]
        };
        for mut group in groups {
            group.shuffle(&mut rng);
            let n_cal = (group.len() as f64 * self.calibration_ratio).round() as usize;
            if self.stratified && (n_cal == 0 || n_cal == group.len()) {
                return Err(ConformalError::DataValidation(format!(
                    "a class with {} records can not be stratified with calibration ratio {}",
                    group.len(),
                    self.calibration_ratio
                )));
            }
            calibration.extend_from_slice(&group[..n_cal]);
            training.extend_from_slice(&group[n_cal..]);
        }
        assemble(dataset, &calibration, &training, &mut rng)
    }
}

/// K-fold partitioning: every record is used for calibration in exactly one fold.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct FoldedSampler {
    pub num_folds: usize,
    pub stratified: bool,
}

impl Default for FoldedSampler {
    fn default() -> Self {
        FoldedSampler {
            num_folds: DEFAULT_NUM_FOLDS,
            stratified: false,
        }
    }
}

impl FoldedSampler {
    pub fn new(num_folds: usize, stratified: bool) -> Self {
        FoldedSampler { num_folds, stratified }
    }

    /// Fold of every record in `dataset.records`, identical for every split index.
    pub fn fold_assignment(&self, dataset: &Dataset, seed: u64) -> Result<Vec<usize>, ConformalError> {
        let n = dataset.records.len();
        let k = self.num_folds;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut folds = vec![0; n];
        if self.stratified {
            let mut position = 0;
            for (label, mut group) in stratify(&dataset.records)? {
                if group.len() < k {
                    return Err(ConformalError::DataValidation(format!(
                        "class {} has {} records, fewer than the {} folds",
                        label,
                        group.len(),
                        k
                    )));
                }
                group.shuffle(&mut rng);
                for i in group {
                    folds[i] = position % k;
                    position += 1;
                }
            }
        } else {
            if n < k {
                return Err(ConformalError::DataValidation(format!(
                    "{} records can not be divided into {} folds",
                    n, k
                )));
            }
            let mut perm: Vec<usize> = (0..n).collect();
            perm.shuffle(&mut rng);
            for (pos, i) in perm.into_iter().enumerate() {
                folds[i] = pos * k / n;
            }
        }
        Ok(folds)
    }
}

impl Sampler for FoldedSampler {
    fn num_samples(&self) -> usize {
        self.num_folds
    }

    fn validate(&self) -> Result<(), ConformalError> {
        if self.num_folds < MIN_NUM_FOLDS {
            return Err(ConformalError::InvalidParameter(
                "num_folds".to_string(),
                format!("an integer of at least {}", MIN_NUM_FOLDS),
                self.num_folds.to_string(),
            ));
        }
        Ok(())
    }

    fn split(&self, dataset: &Dataset, seed: u64, index: usize) -> Result<TrainSplit, ConformalError> {
        self.validate()?;
        check_index(index, self.num_folds)?;
        let folds = self.fold_assignment(dataset, seed)?;
        let (calibration, training): (Vec<usize>, Vec<usize>) = (0..folds.len()).partition(|i| folds[*i] == index);
        let mut rng = StdRng::seed_from_u64(split_seed(seed, index));
        assemble(dataset, &calibration, &training, &mut rng)
    }
}

/// Serializable choice of sampling strategy.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum SampleMethod {
    Random(RandomSampler),
    Folded(FoldedSampler),
}

impl Default for SampleMethod {
    fn default() -> Self {
        SampleMethod::Random(RandomSampler::default())
    }
}

impl Sampler for SampleMethod {
    fn num_samples(&self) -> usize {
        match self {
            SampleMethod::Random(s) => s.num_samples(),
            SampleMethod::Folded(s) => s.num_samples(),
        }
    }

    fn validate(&self) -> Result<(), ConformalError> {
        match self {
            SampleMethod::Random(s) => s.validate(),
            SampleMethod::Folded(s) => s.validate(),
        }
    }

    fn split(&self, dataset: &Dataset, seed: u64, index: usize) -> Result<TrainSplit, ConformalError> {
        match self {
            SampleMethod::Random(s) => s.split(dataset, seed, index),
            SampleMethod::Folded(s) => s.split(dataset, seed, index),
        }
    }
}

impl FromStr for SampleMethod {
    type Err = ConformalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Random" => Ok(SampleMethod::Random(RandomSampler::default())),
            "RandomStratified" => Ok(SampleMethod::Random(RandomSampler {
                stratified: true,
                ..Default::default()
            })),
            "Folded" => Ok(SampleMethod::Folded(FoldedSampler::default())),
            "FoldedStratified" => Ok(SampleMethod::Folded(FoldedSampler {
                stratified: true,
                ..Default::default()
            })),
            _ => Err(ConformalError::ParseString(
                s.to_string(),
                "SampleMethod".to_string(),
                items_to_strings(vec!["Random", "RandomStratified", "Folded", "FoldedStratified"]),
            )),
        }
    }
}
