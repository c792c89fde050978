//! Errors
//!
//! Custom error types used throughout the `conformist` crate.
use thiserror::Error;

/// Errors that can occur while training or predicting with a conformal predictor.
#[derive(Debug, Error)]
pub enum ConformalError {
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// Invalid value parsing.
    #[error("Invalid value {0} passed for {1}, expected one of {2}.")]
    ParseString(String, String, String),
    /// The requested combination of components can not work together.
    #[error("Unsupported configuration: {0}")]
    Unsupported(String),
    /// Predict, gradient or state export was requested before training.
    #[error("The {0} has not been trained, call train first.")]
    NotTrained(String),
    /// The dataset passed for training holds no records.
    #[error("The dataset is empty.")]
    EmptyDataset,
    /// The data can not be used for the requested operation.
    #[error("Invalid data: {0}")]
    DataValidation(String),
    /// A nonconformity score was NaN or infinite.
    #[error("Non-finite nonconformity score {0} encountered.")]
    NonFiniteScore(f64),
    /// Too few sub-models could be trained in an aggregated predictor.
    #[error("Only {trained} sub-models trained successfully, at least {required} are required.")]
    InsufficientModels { trained: usize, required: usize },
    /// A computation produced output that violates its own post-conditions.
    #[error("Internal invariant violated: {0}. This is a bug, please report it.")]
    InternalInvariant(String),
    /// The operation was cancelled through the context's cancellation token.
    #[error("The operation was cancelled.")]
    Cancelled,
    /// Unable to build the worker pool.
    #[error("Unable to build thread pool: {0}")]
    ThreadPool(String),
    /// Unable to serialize state.
    #[error("Unable to write state: {0}")]
    UnableToWrite(String),
    /// Unable to deserialize state.
    #[error("Unable to read state: {0}")]
    UnableToRead(String),
}

impl ConformalError {
    /// Configuration errors are raised before any training starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ConformalError::InvalidParameter(..) | ConformalError::ParseString(..) | ConformalError::Unsupported(_)
        )
    }

    /// Data errors point at the dataset rather than the configuration or the code.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            ConformalError::EmptyDataset | ConformalError::DataValidation(_) | ConformalError::NonFiniteScore(_)
        )
    }
}
