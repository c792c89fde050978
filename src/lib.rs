// Modules
pub mod calibration;
pub mod conformal;
pub mod constants;
pub mod context;
pub mod data;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod models;
pub mod ncm;
pub mod pvalue;
pub mod sampler;
pub mod utils;

// Individual classes, and functions
pub use calibration::cvap::{CvapConfig, CvapPredictor};
pub use calibration::venn_abers::VennAbersCalibrator;
pub use conformal::{AcpClassifier, AcpConfig, AcpRegressor, AggregationStrategy, TcpClassifier};
pub use context::{CancellationToken, Context};
pub use data::{DataRecord, Dataset, FeatureVector};
pub use errors::ConformalError;
pub use model::{Classifier, Regressor, ScoringModel};
