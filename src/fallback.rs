use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::features::{FeatureMatrix, WIN_RATE, team_strength_index};
use crate::predictor::{Prediction, RankingOutcome};
use crate::regressor::ModelFamily;
use crate::validator::FailReason;

pub const FALLBACK_SOURCE: &str = "fallback_win_rate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    /// No team had a match before the snapshot.
    NoEligibleTeams,
    /// Every configured family failed to train.
    NoModelAvailable,
    /// Some families failed and the config treats that as untrustworthy.
    MissingFamilies { families: Vec<ModelFamily> },
    ValidationFailed { cause: FailReason },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NoEligibleTeams => f.write_str("no team has match history"),
            FallbackReason::NoModelAvailable => f.write_str("no trained model available"),
            FallbackReason::MissingFamilies { families } => {
                let names: Vec<&str> = families.iter().map(|fam| fam.label()).collect();
                write!(f, "training failed for {}", names.join(", "))
            }
            FallbackReason::ValidationFailed { cause } => write!(f, "validation failed: {cause}"),
        }
    }
}

/// Win rate descending, then composite strength descending, then team id. Confidence never
/// exceeds the configured cap.
pub fn fallback_ranking(matrix: &FeatureMatrix, cfg: &PipelineConfig) -> Vec<Prediction> {
    let mut rows: Vec<_> = matrix
        .rows()
        .iter()
        .map(|row| (row, team_strength_index(&row.values)))
        .collect();
    rows.sort_by(|(a, sa), (b, sb)| {
        b.values[WIN_RATE]
            .total_cmp(&a.values[WIN_RATE])
            .then(sb.total_cmp(sa))
            .then_with(|| a.team_id.cmp(&b.team_id))
    });

    let cap = cfg.fallback_confidence_cap.clamp(0.0, 1.0);
    rows.into_iter()
        .enumerate()
        .map(|(idx, (row, _))| {
            let penalty = if row.low_sample {
                cfg.low_sample_penalty.clamp(0.0, 1.0)
            } else {
                1.0
            };
            Prediction {
                team_id: row.team_id.clone(),
                rank: idx + 1,
                score: (idx + 1) as f64,
                confidence: cap * penalty,
                source_model: FALLBACK_SOURCE.to_string(),
                fallback_used: true,
            }
        })
        .collect()
}

pub fn fallback_outcome(
    matrix: &FeatureMatrix,
    cfg: &PipelineConfig,
    reason: FallbackReason,
) -> RankingOutcome {
    log::warn!("using fallback ranking: {reason}");
    RankingOutcome::Fallback {
        predictions: fallback_ranking(matrix, cfg),
        reason,
    }
}
