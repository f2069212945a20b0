use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::regressor::ModelFamily;
use crate::service::PipelineState;

/// A team that cannot be featurized at all. Absorbed by the pipeline: the team is
/// dropped from the run and reported alongside the result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("insufficient data for team {team_id}: no matches before the snapshot")]
pub struct InsufficientDataError {
    pub team_id: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    #[error("{family}: {rows} rows cannot be split into {folds} folds")]
    TooFewRows {
        family: ModelFamily,
        rows: usize,
        folds: usize,
    },
    #[error("{family}: {rows} feature rows but {labels} labels")]
    LabelMismatch {
        family: ModelFamily,
        rows: usize,
        labels: usize,
    },
    #[error("{family}: hyperparameter grid is empty")]
    EmptyGrid { family: ModelFamily },
    #[error("{family}: fit failed ({reason})")]
    Degenerate { family: ModelFamily, reason: String },
}

impl TrainingError {
    pub fn family(&self) -> ModelFamily {
        match self {
            TrainingError::TooFewRows { family, .. }
            | TrainingError::LabelMismatch { family, .. }
            | TrainingError::EmptyGrid { family }
            | TrainingError::Degenerate { family, .. } => *family,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no trained model available")]
pub struct NoModelAvailableError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "ground truth for {team_id} in {tournament_id} resolved at {resolved_at}, not before snapshot {as_of}"
)]
pub struct LeakageError {
    pub tournament_id: String,
    pub team_id: String,
    pub resolved_at: DateTime<Utc>,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),
    #[error("unknown tournament: {0}")]
    UnknownTournament(String),
}

impl SourceError {
    /// Whether the caller may simply issue the request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("cv_folds must be at least 2, got {0}")]
    Folds(usize),
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("no model families configured")]
    NoFamilies,
    #[error("hyperparameter grid for {0} is empty")]
    EmptyGrid(ModelFamily),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("data source failed during {state:?}: {source}")]
    Source {
        state: PipelineState,
        #[source]
        source: SourceError,
        /// States visited up to and including `Failed`.
        trace: Vec<PipelineState>,
    },
    #[error("data source returned no entity records for {tournament_id}")]
    NoRecords {
        tournament_id: String,
        trace: Vec<PipelineState>,
    },
    #[error("request cancelled during {0:?}")]
    Cancelled(PipelineState),
    #[error("persisted model set uses features {found:?}, expected {expected:?}")]
    SchemaMismatch {
        found: Vec<String>,
        expected: Vec<String>,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Leakage(#[from] LeakageError),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Source { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The pipeline states a failed request went through, ending in `Failed`. Only
    /// collaborator failures carry one.
    pub fn trace(&self) -> Option<&[PipelineState]> {
        match self {
            ServiceError::Source { trace, .. } | ServiceError::NoRecords { trace, .. } => {
                Some(trace)
            }
            _ => None,
        }
    }
}
