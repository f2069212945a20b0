use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::LeakageError;
use crate::features;
use crate::predictor::{self, Prediction};
use crate::records::{GroundTruth, HistoricalTournament};
use crate::regressor::ModelFamily;
use crate::trainer::{self, ModelSet, TrainingSet};

const HIGHLIGHTS: usize = 3;
const TOP_N: u32 = 3;

/// One ranking produced for a resolved tournament, before its result was known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldoutRanking {
    pub tournament_id: String,
    pub as_of: DateTime<Utc>,
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementDetail {
    pub tournament_id: String,
    pub team_id: String,
    pub predicted: usize,
    pub actual: u32,
    pub error: u32,
}

impl PlacementDetail {
    pub fn within(&self, positions: u32) -> bool {
        self.error <= positions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub tournament_id: String,
    pub team_id: String,
    pub positions: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub family: ModelFamily,
    pub params: String,
    pub cv_score: f64,
    pub cv_std: f64,
}

impl ModelScore {
    pub fn from_set(set: &ModelSet) -> Vec<ModelScore> {
        set.models
            .iter()
            .map(|m| ModelScore {
                family: m.family,
                params: m.params.to_string(),
                cv_score: m.cv_score,
                cv_std: m.cv_std,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailReason {
    BelowThreshold { accuracy: f64, threshold: f64 },
    NoHoldout,
    NoEligibleTeams,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::BelowThreshold {
                accuracy,
                threshold,
            } => write!(f, "±1 accuracy {accuracy:.3} below threshold {threshold:.3}"),
            FailReason::NoHoldout => f.write_str("no resolved tournament to validate against"),
            FailReason::NoEligibleTeams => f.write_str("no team could be ranked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail { reason: FailReason },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub samples: usize,
    pub mae: f64,
    pub rmse: f64,
    pub accuracy_within_1: f64,
    pub accuracy_within_2: f64,
    pub accuracy_within_3: f64,
    pub exact: f64,
    pub top3_accuracy: f64,
    pub details: Vec<PlacementDetail>,
    /// Finished better than predicted.
    pub surprises: Vec<Highlight>,
    /// Finished worse than predicted.
    pub disappointments: Vec<Highlight>,
    pub model_scores: Vec<ModelScore>,
    pub verdict: Verdict,
}

/// Compares holdout rankings with recorded placements. Any ground truth resolved at or
/// after `as_of` is rejected outright.
pub fn validate(
    rankings: &[HoldoutRanking],
    truth: &[GroundTruth],
    as_of: DateTime<Utc>,
    threshold: f64,
    model_scores: Vec<ModelScore>,
) -> Result<ValidationReport, LeakageError> {
    if let Some(leak) = truth.iter().find(|t| t.resolved_at >= as_of) {
        return Err(LeakageError {
            tournament_id: leak.tournament_id.clone(),
            team_id: leak.team_id.clone(),
            resolved_at: leak.resolved_at,
            as_of,
        });
    }

    let actual: HashMap<(&str, &str), u32> = truth
        .iter()
        .map(|t| ((t.tournament_id.as_str(), t.team_id.as_str()), t.placement))
        .collect();

    let mut details = Vec::new();
    for ranking in rankings {
        for p in &ranking.predictions {
            let Some(&placement) = actual.get(&(ranking.tournament_id.as_str(), p.team_id.as_str()))
            else {
                continue;
            };
            details.push(PlacementDetail {
                tournament_id: ranking.tournament_id.clone(),
                team_id: p.team_id.clone(),
                predicted: p.rank,
                actual: placement,
                error: (p.rank as i64 - placement as i64).unsigned_abs() as u32,
            });
        }
    }

    Ok(report_from_details(details, threshold, model_scores))
}

/// A report with no samples that fails for `reason`.
pub fn failed_report(reason: FailReason, model_scores: Vec<ModelScore>) -> ValidationReport {
    ValidationReport {
        samples: 0,
        mae: 0.0,
        rmse: 0.0,
        accuracy_within_1: 0.0,
        accuracy_within_2: 0.0,
        accuracy_within_3: 0.0,
        exact: 0.0,
        top3_accuracy: 0.0,
        details: Vec::new(),
        surprises: Vec::new(),
        disappointments: Vec::new(),
        model_scores,
        verdict: Verdict::Fail { reason },
    }
}

fn report_from_details(
    details: Vec<PlacementDetail>,
    threshold: f64,
    model_scores: Vec<ModelScore>,
) -> ValidationReport {
    let samples = details.len();
    if samples == 0 {
        return failed_report(FailReason::NoHoldout, model_scores);
    }

    let n = samples as f64;
    let share = |pred: &dyn Fn(&PlacementDetail) -> bool| {
        details.iter().filter(|d| pred(*d)).count() as f64 / n
    };
    let mae = details.iter().map(|d| d.error as f64).sum::<f64>() / n;
    let mse = details.iter().map(|d| (d.error as f64).powi(2)).sum::<f64>() / n;
    let accuracy_within_1 = share(&|d| d.within(1));
    let accuracy_within_2 = share(&|d| d.within(2));
    let accuracy_within_3 = share(&|d| d.within(3));
    let exact = share(&|d| d.error == 0);

    let actual_top = details.iter().filter(|d| d.actual <= TOP_N).count();
    let top_hit = details
        .iter()
        .filter(|d| d.actual <= TOP_N && d.predicted <= TOP_N as usize)
        .count();
    let top3_accuracy = if actual_top == 0 {
        0.0
    } else {
        top_hit as f64 / actual_top as f64
    };

    let surprises = highlights(&details, |d| d.actual < d.predicted as u32);
    let disappointments = highlights(&details, |d| d.actual > d.predicted as u32);

    let verdict = if accuracy_within_1 >= threshold {
        Verdict::Pass
    } else {
        Verdict::Fail {
            reason: FailReason::BelowThreshold {
                accuracy: accuracy_within_1,
                threshold,
            },
        }
    };

    ValidationReport {
        samples,
        mae,
        rmse: mse.sqrt(),
        accuracy_within_1,
        accuracy_within_2,
        accuracy_within_3,
        exact,
        top3_accuracy,
        details,
        surprises,
        disappointments,
        model_scores,
        verdict,
    }
}

fn highlights<F>(details: &[PlacementDetail], keep: F) -> Vec<Highlight>
where
    F: Fn(&PlacementDetail) -> bool,
{
    let mut out: Vec<Highlight> = details
        .iter()
        .filter(|d| keep(*d))
        .map(|d| Highlight {
            tournament_id: d.tournament_id.clone(),
            team_id: d.team_id.clone(),
            positions: d.error,
        })
        .collect();
    out.sort_by(|a, b| {
        b.positions
            .cmp(&a.positions)
            .then_with(|| a.tournament_id.cmp(&b.tournament_id))
            .then_with(|| a.team_id.cmp(&b.team_id))
    });
    out.truncate(HIGHLIGHTS);
    out
}

/// Rankings and truth gathered by replaying history one tournament at a time.
#[derive(Debug, Clone, Default)]
pub struct WalkForward {
    pub rankings: Vec<HoldoutRanking>,
    pub truth: Vec<GroundTruth>,
}

/// Each tournament resolved before `as_of` is ranked by models trained only on
/// tournaments resolved before its own snapshot. Tournaments with no earlier history,
/// or whose training yields no model, are skipped.
pub fn walk_forward(
    history: &[HistoricalTournament],
    as_of: DateTime<Utc>,
    cfg: &PipelineConfig,
) -> WalkForward {
    let mut holdouts: Vec<&HistoricalTournament> =
        history.iter().filter(|h| h.resolved_at < as_of).collect();
    holdouts.sort_by(|a, b| {
        a.snapshot
            .as_of
            .cmp(&b.snapshot.as_of)
            .then_with(|| a.id().cmp(b.id()))
    });

    let mut out = WalkForward::default();
    for holdout in holdouts {
        let set = TrainingSet::from_history(history, holdout.snapshot.as_of, cfg);
        if set.is_empty() {
            log::debug!("walk-forward: {} has no earlier history", holdout.id());
            continue;
        }
        let trained = trainer::train_all(&set, cfg);
        let matrix = features::build_snapshot_features(&holdout.snapshot, cfg).matrix;
        let Ok(predictions) = predictor::predict(&trained.models, &matrix, cfg) else {
            log::debug!("walk-forward: no model for {}", holdout.id());
            continue;
        };
        out.rankings.push(HoldoutRanking {
            tournament_id: holdout.id().to_string(),
            as_of: holdout.snapshot.as_of,
            predictions,
        });
        out.truth.extend(holdout.ground_truth());
    }
    out
}
