use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::PipelineConfig;
use crate::error::{NoModelAvailableError, ServiceError, SourceError, TrainingError};
use crate::fallback::{self, FallbackReason};
use crate::features::{self, FeatureMatrix};
use crate::predictor::{self, Prediction, RankingOutcome};
use crate::records::HistoricalTournament;
use crate::registry::ModelRegistry;
use crate::regressor::ModelFamily;
use crate::source::SnapshotSource;
use crate::store::ModelStore;
use crate::trainer::{self, ModelSet, TrainingSet, current_schema};
use crate::validator::{self, FailReason, ModelScore, ValidationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Collecting,
    Featurizing,
    Training,
    Predicting,
    Validating,
    Done,
    Failed,
}

/// Request-scoped cancellation flag. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct PredictionRequest {
    pub tournament_id: String,
    /// Overrides the service default for this request only.
    pub config: Option<PipelineConfig>,
    pub cancel: CancelToken,
}

impl PredictionRequest {
    pub fn new(tournament_id: impl Into<String>) -> Self {
        Self {
            tournament_id: tournament_id.into(),
            config: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOrigin {
    /// The committed registry snapshot.
    Registry,
    /// Trained for this request and dropped afterwards.
    Transient,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResponse {
    pub tournament_id: String,
    pub as_of: DateTime<Utc>,
    pub outcome: RankingOutcome,
    pub report: ValidationReport,
    pub excluded: Vec<String>,
    pub training_failures: Vec<String>,
    pub model_origin: ModelOrigin,
    pub trace: Vec<PipelineState>,
    /// SHA-256 over the ranking; equal inputs give equal digests.
    pub digest: String,
}

impl PredictionResponse {
    pub fn predictions(&self) -> &[Prediction] {
        self.outcome.predictions()
    }

    pub fn fallback_used(&self) -> bool {
        self.outcome.is_fallback()
    }
}

#[derive(Debug, Clone)]
pub struct RetrainSummary {
    pub families: Vec<ModelFamily>,
    pub failures: Vec<TrainingError>,
    pub training_rows: usize,
    pub trained_through: Option<DateTime<Utc>>,
    pub committed: bool,
    pub persisted: bool,
}

struct Run<'a> {
    cancel: &'a CancelToken,
    trace: Vec<PipelineState>,
}

impl Run<'_> {
    fn enter(&mut self, state: PipelineState) -> Result<(), ServiceError> {
        if self.cancel.is_cancelled() {
            log::info!("request cancelled before {state:?}");
            return Err(ServiceError::Cancelled(state));
        }
        log::info!("pipeline state -> {state:?}");
        self.trace.push(state);
        Ok(())
    }

    /// Moves the run to `Failed` and hands the full trace to the error.
    fn fail<F>(&mut self, build: F) -> ServiceError
    where
        F: FnOnce(Vec<PipelineState>) -> ServiceError,
    {
        self.trace.push(PipelineState::Failed);
        let err = build(std::mem::take(&mut self.trace));
        log::warn!("pipeline failed: {err}");
        err
    }

    fn source_failed(&mut self, state: PipelineState, source: SourceError) -> ServiceError {
        self.fail(|trace| ServiceError::Source {
            state,
            source,
            trace,
        })
    }
}

struct ModelChoice {
    models: Arc<ModelSet>,
    failures: Vec<TrainingError>,
    origin: ModelOrigin,
}

impl ModelChoice {
    fn untrained() -> Self {
        Self {
            models: Arc::new(ModelSet::empty()),
            failures: Vec::new(),
            origin: ModelOrigin::Transient,
        }
    }
}

pub struct PredictionService<S: SnapshotSource> {
    source: S,
    config: PipelineConfig,
    registry: ModelRegistry,
    store: Option<Box<dyn ModelStore>>,
}

impl<S: SnapshotSource> PredictionService<S> {
    pub fn new(source: S, config: PipelineConfig) -> Self {
        Self {
            source,
            config,
            registry: ModelRegistry::new(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Box<dyn ModelStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Runs one request through every pipeline state. Only a data-source failure, an
    /// invalid config, a leakage violation or cancellation surfaces as an error; every
    /// other problem degrades the ranking instead.
    ///
    /// The verdict always comes from the walk-forward replay under the request config.
    /// Committed models are only reused when they were trained under that same config, so
    /// the replay validates the procedure that produced them.
    pub fn predict(&self, request: &PredictionRequest) -> Result<PredictionResponse, ServiceError> {
        let cfg = request.config.as_ref().unwrap_or(&self.config);
        cfg.validate()?;
        let mut run = Run {
            cancel: &request.cancel,
            trace: Vec::new(),
        };

        run.enter(PipelineState::Collecting)?;
        let snapshot = self
            .source
            .current_snapshot(&request.tournament_id)
            .map_err(|e| run.source_failed(PipelineState::Collecting, e))?;
        if snapshot.records.is_empty() {
            let tournament_id = request.tournament_id.clone();
            return Err(run.fail(|trace| ServiceError::NoRecords {
                tournament_id,
                trace,
            }));
        }
        let as_of = snapshot.as_of;
        let history = self
            .source
            .historical_tournaments()
            .map_err(|e| run.source_failed(PipelineState::Collecting, e))?;
        let history = prior_history(history, as_of);

        run.enter(PipelineState::Featurizing)?;
        let build = features::build_snapshot_features(&snapshot, cfg);
        drop(snapshot);
        let excluded: Vec<String> = build
            .insufficient
            .iter()
            .map(|e| e.team_id.clone())
            .collect();
        let matrix = build.matrix;
        if matrix.is_empty() {
            log::warn!(
                "no team in {} has matches before {as_of}; ranking will be empty",
                request.tournament_id
            );
        }

        run.enter(PipelineState::Training)?;
        let choice = if matrix.is_empty() {
            ModelChoice::untrained()
        } else {
            self.models_for(&history, as_of, cfg)
        };

        run.enter(PipelineState::Predicting)?;
        let primary = predictor::predict(&choice.models, &matrix, cfg);

        run.enter(PipelineState::Validating)?;
        let report = if matrix.is_empty() {
            validator::failed_report(FailReason::NoEligibleTeams, Vec::new())
        } else {
            let holdout = validator::walk_forward(&history, as_of, cfg);
            validator::validate(
                &holdout.rankings,
                &holdout.truth,
                as_of,
                cfg.accuracy_threshold,
                ModelScore::from_set(&choice.models),
            )?
        };
        log::info!(
            "validation: samples={} mae={:.3} within_1={:.3} verdict={:?}",
            report.samples,
            report.mae,
            report.accuracy_within_1,
            report.verdict
        );

        let missing = missing_families(cfg, &choice.models);
        let outcome = decide(&matrix, cfg, primary, &report, missing);

        run.enter(PipelineState::Done)?;
        let digest = ranking_digest(outcome.predictions());
        Ok(PredictionResponse {
            tournament_id: request.tournament_id.clone(),
            as_of,
            outcome,
            report,
            excluded,
            training_failures: choice.failures.iter().map(|e| e.to_string()).collect(),
            model_origin: choice.origin,
            trace: run.trace,
            digest,
        })
    }

    fn models_for(
        &self,
        history: &[HistoricalTournament],
        as_of: DateTime<Utc>,
        cfg: &PipelineConfig,
    ) -> ModelChoice {
        if let Some(committed) = self.registry.snapshot() {
            if reusable(&committed, cfg, as_of) {
                log::info!(
                    "using committed models trained through {:?}",
                    committed.trained_through
                );
                return ModelChoice {
                    models: committed,
                    failures: Vec::new(),
                    origin: ModelOrigin::Registry,
                };
            }
        }
        let set = TrainingSet::from_history(history, as_of, cfg);
        log::info!(
            "training transient models on {} rows from {} tournaments",
            set.len(),
            set.tournaments.len()
        );
        let outcome = trainer::train_all(&set, cfg);
        ModelChoice {
            models: Arc::new(outcome.models),
            failures: outcome.failures,
            origin: ModelOrigin::Transient,
        }
    }

    /// Trains on everything resolved before `as_of` and swaps the registry in one step.
    /// If persisting fails the new set stays committed and the store error is returned.
    pub fn retrain(&self, as_of: DateTime<Utc>) -> Result<RetrainSummary, ServiceError> {
        self.config.validate()?;
        let history = self
            .source
            .historical_tournaments()
            .map_err(|source| ServiceError::Source {
                state: PipelineState::Training,
                source,
                trace: vec![PipelineState::Training, PipelineState::Failed],
            })?;
        let set = TrainingSet::from_history(&history, as_of, &self.config);
        let outcome = trainer::train_all(&set, &self.config);

        let mut summary = RetrainSummary {
            families: outcome.models.families(),
            failures: outcome.failures,
            training_rows: set.len(),
            trained_through: set.trained_through,
            committed: false,
            persisted: false,
        };
        if outcome.models.is_empty() {
            log::warn!("retrain produced no models; keeping the committed set");
            return Ok(summary);
        }

        let blob = outcome
            .models
            .to_blob()
            .context("serialize model set")?;
        self.registry.replace(outcome.models);
        summary.committed = true;
        log::info!(
            "committed {} models trained on {} rows",
            summary.families.len(),
            summary.training_rows
        );

        if let Some(store) = &self.store {
            store.store(&blob)?;
            summary.persisted = true;
        }
        Ok(summary)
    }

    /// Restores the registry from the store. Returns false when nothing is stored.
    pub fn load_persisted(&self) -> Result<bool, ServiceError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(blob) = store.load()? else {
            return Ok(false);
        };
        let set = ModelSet::from_blob(&blob).context("decode persisted model set")?;
        if !set.schema_matches() {
            return Err(ServiceError::SchemaMismatch {
                found: set.feature_names,
                expected: current_schema(),
            });
        }
        log::info!("loaded {} persisted models", set.models.len());
        self.registry.replace(set);
        Ok(true)
    }
}

fn prior_history(
    history: Vec<HistoricalTournament>,
    as_of: DateTime<Utc>,
) -> Vec<HistoricalTournament> {
    let total = history.len();
    let prior: Vec<HistoricalTournament> = history
        .into_iter()
        .filter(|h| h.resolved_at < as_of)
        .collect();
    if prior.len() < total {
        log::debug!(
            "ignoring {} tournaments not resolved before {as_of}",
            total - prior.len()
        );
    }
    prior
}

fn reusable(committed: &ModelSet, cfg: &PipelineConfig, as_of: DateTime<Utc>) -> bool {
    !committed.is_empty()
        && committed.schema_matches()
        && committed.trained_with(cfg)
        && committed.trained_through.is_some_and(|t| t < as_of)
}

fn missing_families(cfg: &PipelineConfig, models: &ModelSet) -> Vec<ModelFamily> {
    let trained: BTreeSet<ModelFamily> = models.families().into_iter().collect();
    cfg.model_families
        .iter()
        .copied()
        .filter(|f| !trained.contains(f))
        .collect()
}

fn decide(
    matrix: &FeatureMatrix,
    cfg: &PipelineConfig,
    primary: Result<Vec<Prediction>, NoModelAvailableError>,
    report: &ValidationReport,
    missing: Vec<ModelFamily>,
) -> RankingOutcome {
    if matrix.is_empty() {
        return fallback::fallback_outcome(matrix, cfg, FallbackReason::NoEligibleTeams);
    }
    let predictions = match primary {
        Ok(predictions) => predictions,
        Err(_) => {
            return fallback::fallback_outcome(matrix, cfg, FallbackReason::NoModelAvailable);
        }
    };
    if let validator::Verdict::Fail { reason } = &report.verdict {
        return fallback::fallback_outcome(
            matrix,
            cfg,
            FallbackReason::ValidationFailed {
                cause: reason.clone(),
            },
        );
    }
    if cfg.fallback_on_partial_training_failure && !missing.is_empty() {
        return fallback::fallback_outcome(
            matrix,
            cfg,
            FallbackReason::MissingFamilies { families: missing },
        );
    }
    RankingOutcome::Primary { predictions }
}

pub fn ranking_digest(predictions: &[Prediction]) -> String {
    let mut hasher = Sha256::new();
    for p in predictions {
        hasher.update(p.team_id.as_bytes());
        hasher.update([0u8]);
        hasher.update((p.rank as u64).to_le_bytes());
        hasher.update(p.score.to_bits().to_le_bytes());
        hasher.update(p.confidence.to_bits().to_le_bytes());
        hasher.update(p.source_model.as_bytes());
        hasher.update([u8::from(p.fallback_used)]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TournamentCatalog;
    use crate::synthetic::SyntheticLeague;

    #[test]
    fn cancelled_request_stops_before_collecting() {
        let league = SyntheticLeague::default();
        let service = PredictionService::new(league.catalog(), PipelineConfig::default());
        let token = CancelToken::new();
        token.cancel();
        let request = PredictionRequest::new(league.current_id()).with_cancel(token);
        let err = service.predict(&request).unwrap_err();
        assert!(matches!(err, ServiceError::Cancelled(PipelineState::Collecting)));
        assert!(service.registry().is_empty());
    }

    #[test]
    fn unknown_tournament_is_a_source_failure() {
        let service = PredictionService::new(TournamentCatalog::new(), PipelineConfig::default());
        let err = service.predict(&PredictionRequest::new("nope")).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Source {
                state: PipelineState::Collecting,
                source: SourceError::UnknownTournament(_),
                ..
            }
        ));
        assert!(!err.is_retryable());
        assert_eq!(
            err.trace(),
            Some(&[PipelineState::Collecting, PipelineState::Failed][..])
        );
    }

    #[test]
    fn digest_changes_with_ranking() {
        let p = |id: &str, rank| Prediction {
            team_id: id.to_string(),
            rank,
            score: rank as f64,
            confidence: 0.5,
            source_model: "ridge".to_string(),
            fallback_used: false,
        };
        let a = ranking_digest(&[p("x", 1), p("y", 2)]);
        let b = ranking_digest(&[p("y", 1), p("x", 2)]);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, ranking_digest(&[p("x", 1), p("y", 2)]));
    }
}
