//! Calibration
//!
//! Probability calibration through isotonic regression and Venn-ABERS predictors.
//!
//! # Submodules
//!
//! * `isotonic`: Weighted isotonic regression by pool adjacent violators.
//! * `venn_abers`: Inductive Venn-ABERS calibration of one scoring model.
//! * `cvap`: Cross Venn-ABERS predictors over several calibration splits.

pub mod cvap;
pub mod isotonic;
pub mod venn_abers;
#[cfg(test)]
mod tests;
