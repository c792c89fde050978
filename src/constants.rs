pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_NUM_MODELS: usize = 10;
pub const DEFAULT_NUM_FOLDS: usize = 10;
pub const DEFAULT_CALIBRATION_RATIO: f64 = 0.2;
pub const DEFAULT_GRADIENT_STEPSIZE: f64 = 0.01;
pub const DEFAULT_NORMALIZATION_BETA: f64 = 0.01;
pub const MIN_NUM_FOLDS: usize = 2;
// Multiplier used to decorrelate per-split seeds (golden ratio, 64 bit).
pub const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;
// Floor used before taking logarithms of absolute residuals.
pub const LOG_RESIDUAL_FLOOR: f64 = 1e-8;
