//! Ensemble
//!
//! Pre-indexed slots of independently trained sub-models. Training runs one task per
//! split index on a bounded pool and writes each result into its own slot, so the
//! outcome does not depend on completion order.
use crate::context::Context;
use crate::data::Dataset;
use crate::errors::ConformalError;
use crate::sampler::{Sampler, TrainSplit};
use log::{info, warn};
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct Ensemble<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for Ensemble<T> {
    fn default() -> Self {
        Ensemble { slots: Vec::new() }
    }
}

impl<T> Ensemble<T> {
    pub fn with_slots(slots: Vec<Option<T>>) -> Self {
        Ensemble { slots }
    }

    /// Number of slots, trained or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn num_trained(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Every slot holds a trained sub-model.
    pub fn is_complete(&self) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(|s| s.is_some())
    }

    /// At least one slot holds a trained sub-model.
    pub fn is_partial(&self) -> bool {
        self.slots.iter().any(|s| s.is_some())
    }

    pub fn trained(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten()
    }

    pub fn slots(&self) -> &[Option<T>] {
        &self.slots
    }

    /// Resize to `len` slots, dropping sub-models beyond it.
    pub fn resize(&mut self, len: usize) {
        self.slots.resize_with(len, || None);
    }

    pub fn set(&mut self, index: usize, value: T) -> Result<(), ConformalError> {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(out_of_range(index, self.slots.len())),
        }
    }
}

pub(crate) fn out_of_range(index: usize, len: usize) -> ConformalError {
    ConformalError::InvalidParameter(
        "index".to_string(),
        format!("split index below {}", len),
        index.to_string(),
    )
}

impl<T: Send> Ensemble<T> {
    /// Train one sub-model per split of `sampler` with `fit`.
    ///
    /// A failing sub-model is logged and its slot left empty, unless the failure is a
    /// configuration error or a cancellation, which abort the whole call. Fewer than
    /// `required` trained sub-models is an `InsufficientModels` error.
    pub fn train<S, F>(
        sampler: &S,
        dataset: &Dataset,
        ctx: &Context,
        required: usize,
        what: &str,
        fit: F,
    ) -> Result<Self, ConformalError>
    where
        S: Sampler + Sync,
        F: Fn(usize, TrainSplit) -> Result<T, ConformalError> + Sync,
    {
        sampler.validate()?;
        dataset.validate()?;
        let n = sampler.num_samples();
        let pool = ctx.thread_pool(n)?;

        // Outer errors abort, inner errors mark a failed slot.
        let results: Vec<Result<Result<T, ConformalError>, ConformalError>> = pool.install(|| {
            (0..n)
                .into_par_iter()
                .map(|index| {
                    ctx.cancellation.check()?;
                    let split = sampler.split(dataset, ctx.seed, index)?;
                    match fit(index, split) {
                        Err(e) if e.is_configuration() || matches!(e, ConformalError::Cancelled) => Err(e),
                        other => Ok(other),
                    }
                })
                .collect()
        });

        let mut slots = Vec::with_capacity(n);
        for (index, result) in results.into_iter().enumerate() {
            match result? {
                Ok(model) => slots.push(Some(model)),
                Err(e) => {
                    warn!("Sub-model {} of {} failed to train: {}", index, what, e);
                    slots.push(None);
                }
            }
        }
        let ensemble = Ensemble { slots };
        let trained = ensemble.num_trained();
        if trained < required {
            return Err(ConformalError::InsufficientModels { trained, required });
        }
        info!("Trained {} of {} sub-models of {}.", trained, n, what);
        Ok(ensemble)
    }
}

/// Train only split `index`, propagating any failure.
pub(crate) fn train_one<S, T, F>(
    sampler: &S,
    dataset: &Dataset,
    ctx: &Context,
    index: usize,
    fit: F,
) -> Result<T, ConformalError>
where
    S: Sampler,
    F: FnOnce(usize, TrainSplit) -> Result<T, ConformalError>,
{
    sampler.validate()?;
    dataset.validate()?;
    if index >= sampler.num_samples() {
        return Err(out_of_range(index, sampler.num_samples()));
    }
    ctx.cancellation.check()?;
    let split = sampler.split(dataset, ctx.seed, index)?;
    fit(index, split)
}
