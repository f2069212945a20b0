pub mod boosting;
pub mod config;
pub mod elo;
pub mod error;
pub mod fallback;
pub mod features;
pub mod forest;
pub mod predictor;
pub mod records;
pub mod registry;
pub mod regressor;
pub mod ridge;
pub mod service;
pub mod source;
pub mod store;
pub mod synthetic;
pub mod trainer;
pub mod tree;
pub mod validator;

pub use config::PipelineConfig;
pub use error::ServiceError;
pub use predictor::{Prediction, RankingOutcome};
pub use service::{PredictionRequest, PredictionResponse, PredictionService};
