use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::elo::EloConfig;
use crate::error::TrainingError;
use crate::features::{self, FEATURE_NAMES, FeatureRow};
use crate::records::HistoricalTournament;
use crate::regressor::{FittedModel, HyperparamSpace, Hyperparams, ModelFamily, Regressor};

/// Labelled rows derived once from resolved tournaments. Every family trains from the
/// same set, so a failed family can be retried without featurizing again.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrainingSet {
    pub rows: Vec<FeatureRow>,
    pub labels: Vec<f64>,
    pub tournaments: Vec<String>,
    pub trained_through: Option<DateTime<Utc>>,
}

impl TrainingSet {
    /// Uses only tournaments resolved strictly before `cutoff`, oldest first. Teams
    /// without a recorded placement or without matches contribute no row.
    pub fn from_history(
        history: &[HistoricalTournament],
        cutoff: DateTime<Utc>,
        cfg: &PipelineConfig,
    ) -> Self {
        let mut resolved: Vec<&HistoricalTournament> =
            history.iter().filter(|h| h.resolved_at < cutoff).collect();
        resolved.sort_by(|a, b| {
            a.snapshot
                .as_of
                .cmp(&b.snapshot.as_of)
                .then_with(|| a.id().cmp(b.id()))
        });

        let mut set = TrainingSet::default();
        for tournament in resolved {
            let build = features::build_snapshot_features(&tournament.snapshot, cfg);
            let mut used = false;
            for row in build.matrix.rows() {
                let Some(placement) = tournament.placement_of(&row.team_id) else {
                    continue;
                };
                set.rows.push(row.values);
                set.labels.push(placement as f64);
                used = true;
            }
            if used {
                set.tournaments.push(tournament.id().to_string());
                set.trained_through = set.trained_through.max(Some(tournament.resolved_at));
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub family: ModelFamily,
    pub params: Hyperparams,
    /// Mean fold MAE of the chosen hyperparameters.
    pub cv_score: f64,
    pub cv_std: f64,
    pub model: FittedModel,
}

impl TrainedModel {
    pub fn predict_row(&self, row: &FeatureRow) -> f64 {
        self.model.predict_row(row)
    }

    pub fn score(&self) -> f64 {
        self.cv_score
    }
}

/// Every config value that changes what training produces: the tuning setup and the
/// settings that shape feature values. Two configs with equal profiles train identical
/// model sets from the same history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProfile {
    pub model_families: Vec<ModelFamily>,
    pub cv_folds: usize,
    pub hyperparams: HyperparamSpace,
    pub seed: u64,
    pub recency_half_life_days: f64,
    pub stability_horizon_days: f64,
    pub full_roster_size: usize,
    pub tournament_event_markers: Vec<String>,
    pub elo: EloConfig,
}

impl TrainingProfile {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            model_families: cfg.model_families.iter().copied().collect(),
            cv_folds: cfg.cv_folds,
            hyperparams: cfg.hyperparams.clone(),
            seed: cfg.seed,
            recency_half_life_days: cfg.recency_half_life_days,
            stability_horizon_days: cfg.stability_horizon_days,
            full_roster_size: cfg.full_roster_size,
            tournament_event_markers: cfg.tournament_event_markers.clone(),
            elo: cfg.elo,
        }
    }
}

/// The immutable unit the registry swaps and the store persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSet {
    pub models: Vec<TrainedModel>,
    pub feature_names: Vec<String>,
    pub trained_through: Option<DateTime<Utc>>,
    pub training_rows: usize,
    /// Absent on sets that were not produced by `train_all`; such sets are never reused.
    #[serde(default)]
    pub profile: Option<TrainingProfile>,
}

impl ModelSet {
    pub fn empty() -> Self {
        Self {
            models: Vec::new(),
            feature_names: current_schema(),
            trained_through: None,
            training_rows: 0,
            profile: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn families(&self) -> Vec<ModelFamily> {
        self.models.iter().map(|m| m.family).collect()
    }

    /// Lowest CV score wins; equal scores fall back to family priority.
    pub fn best(&self) -> Option<&TrainedModel> {
        self.models.iter().min_by(|a, b| {
            a.cv_score
                .total_cmp(&b.cv_score)
                .then(a.family.priority().cmp(&b.family.priority()))
        })
    }

    pub fn get(&self, family: ModelFamily) -> Option<&TrainedModel> {
        self.models.iter().find(|m| m.family == family)
    }

    pub fn schema_matches(&self) -> bool {
        self.feature_names == current_schema()
    }

    /// Whether `cfg` would train this same set.
    pub fn trained_with(&self, cfg: &PipelineConfig) -> bool {
        self.profile
            .as_ref()
            .is_some_and(|p| *p == TrainingProfile::from_config(cfg))
    }

    pub fn to_blob(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_blob(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

pub fn current_schema() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub models: ModelSet,
    pub failures: Vec<TrainingError>,
}

/// Contiguous folds in row order; the first `n % k` folds take one extra row.
pub fn kfold_indices(n: usize, k: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    if k == 0 || n < k {
        return Vec::new();
    }
    let base = n / k;
    let extra = n % k;
    let mut out = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        let end = start + size;
        let test: Vec<usize> = (start..end).collect();
        let train: Vec<usize> = (0..start).chain(end..n).collect();
        out.push((train, test));
        start = end;
    }
    out
}

fn gather(rows: &[FeatureRow], labels: &[f64], idx: &[usize]) -> (Vec<FeatureRow>, Vec<f64>) {
    (
        idx.iter().map(|&i| rows[i]).collect(),
        idx.iter().map(|&i| labels[i]).collect(),
    )
}

fn cross_validate(
    rows: &[FeatureRow],
    labels: &[f64],
    params: Hyperparams,
    folds: &[(Vec<usize>, Vec<usize>)],
    seed: u64,
) -> Result<(f64, f64), TrainingError> {
    let mut scores = Vec::with_capacity(folds.len());
    for (train_idx, test_idx) in folds {
        let (train_rows, train_labels) = gather(rows, labels, train_idx);
        let (test_rows, test_labels) = gather(rows, labels, test_idx);
        let mut model = FittedModel::unfitted(params, seed);
        model.fit(&train_rows, &train_labels)?;
        scores.push(model.score(&test_rows, &test_labels));
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
    log::debug!(
        "{} {params}: fold MAE {:?} mean {mean:.4}",
        params.family(),
        scores
    );
    Ok((mean, var.sqrt()))
}

/// Tunes one family over its grid by k-fold CV, then refits the winning
/// hyperparameters on every row.
pub fn train(
    rows: &[FeatureRow],
    labels: &[f64],
    family: ModelFamily,
    space: &HyperparamSpace,
    folds: usize,
    seed: u64,
) -> Result<TrainedModel, TrainingError> {
    if rows.len() != labels.len() {
        return Err(TrainingError::LabelMismatch {
            family,
            rows: rows.len(),
            labels: labels.len(),
        });
    }
    if folds < 2 || rows.len() < folds {
        return Err(TrainingError::TooFewRows {
            family,
            rows: rows.len(),
            folds,
        });
    }
    let grid = space.grid(family);
    if grid.is_empty() {
        return Err(TrainingError::EmptyGrid { family });
    }

    let splits = kfold_indices(rows.len(), folds);
    let mut best: Option<(Hyperparams, f64, f64)> = None;
    let mut last_err = None;
    for params in grid {
        match cross_validate(rows, labels, params, &splits, seed) {
            Ok((mean, std)) => {
                let better = match &best {
                    Some((_, best_mean, _)) => mean < *best_mean,
                    None => mean.is_finite(),
                };
                if better {
                    best = Some((params, mean, std));
                }
            }
            Err(err) => {
                log::debug!("{family} {params}: skipped ({err})");
                last_err = Some(err);
            }
        }
    }

    let Some((params, cv_score, cv_std)) = best else {
        return Err(last_err.unwrap_or(TrainingError::Degenerate {
            family,
            reason: "no hyperparameters produced a finite score".to_string(),
        }));
    };

    let mut model = FittedModel::unfitted(params, seed);
    model.fit(rows, labels)?;
    Ok(TrainedModel {
        family,
        params,
        cv_score,
        cv_std,
        model,
    })
}

pub fn train_family(
    set: &TrainingSet,
    family: ModelFamily,
    cfg: &PipelineConfig,
) -> Result<TrainedModel, TrainingError> {
    train(
        &set.rows,
        &set.labels,
        family,
        &cfg.hyperparams,
        cfg.cv_folds,
        cfg.seed,
    )
}

/// Trains every configured family in parallel and waits for all of them. A family that
/// fails is reported in `failures`; the rest still make up the model set.
pub fn train_all(set: &TrainingSet, cfg: &PipelineConfig) -> TrainingOutcome {
    let families: Vec<ModelFamily> = cfg.model_families.iter().copied().collect();
    let results: Vec<Result<TrainedModel, TrainingError>> = families
        .par_iter()
        .map(|family| train_family(set, *family, cfg))
        .collect();

    let mut models = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(model) => {
                log::info!(
                    "trained {} ({}) cv_mae={:.3} ± {:.3}",
                    model.family,
                    model.params,
                    model.cv_score,
                    model.cv_std
                );
                models.push(model);
            }
            Err(err) => {
                log::warn!("training failed: {err}");
                failures.push(err);
            }
        }
    }
    models.sort_by_key(|m| m.family.priority());

    TrainingOutcome {
        models: ModelSet {
            models,
            feature_names: current_schema(),
            trained_through: set.trained_through,
            training_rows: set.len(),
            profile: Some(TrainingProfile::from_config(cfg)),
        },
        failures,
    }
}
