use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::NoModelAvailableError;
use crate::fallback::FallbackReason;
use crate::features::FeatureMatrix;
use crate::trainer::ModelSet;

/// Agreement used when there is only one model to agree with.
pub const SINGLE_MODEL_AGREEMENT: f64 = 0.75;

// Keeps a perfect-CV model from taking all the weight.
const WEIGHT_EPSILON: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub team_id: String,
    pub rank: usize,
    /// Predicted placement on a continuous scale; lower is better.
    pub score: f64,
    pub confidence: f64,
    pub source_model: String,
    pub fallback_used: bool,
}

/// A ranking is either what the models said or what the fallback policy substituted.
/// Callers have to match to get at the predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RankingOutcome {
    Primary {
        predictions: Vec<Prediction>,
    },
    Fallback {
        predictions: Vec<Prediction>,
        reason: FallbackReason,
    },
}

impl RankingOutcome {
    pub fn predictions(&self) -> &[Prediction] {
        match self {
            RankingOutcome::Primary { predictions } => predictions,
            RankingOutcome::Fallback { predictions, .. } => predictions,
        }
    }

    pub fn into_predictions(self) -> Vec<Prediction> {
        match self {
            RankingOutcome::Primary { predictions } => predictions,
            RankingOutcome::Fallback { predictions, .. } => predictions,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RankingOutcome::Fallback { .. })
    }

    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match self {
            RankingOutcome::Primary { .. } => None,
            RankingOutcome::Fallback { reason, .. } => Some(reason),
        }
    }
}

struct Scored<'a> {
    team_id: &'a str,
    score: f64,
    primary_raw: f64,
    confidence: f64,
}

fn model_weight(cv_score: f64) -> f64 {
    if cv_score.is_finite() && cv_score >= 0.0 {
        1.0 / (cv_score + WEIGHT_EPSILON)
    } else {
        1e-6
    }
}

/// Applies every model to every team and ranks the blended scores. The model with the
/// best CV score is the primary and supplies the first tie-break.
pub fn predict(
    models: &ModelSet,
    matrix: &FeatureMatrix,
    cfg: &PipelineConfig,
) -> Result<Vec<Prediction>, NoModelAvailableError> {
    let primary = models.best().ok_or(NoModelAvailableError)?;
    let weights: Vec<f64> = models.models.iter().map(|m| model_weight(m.cv_score)).collect();
    let weight_sum: f64 = weights.iter().sum();
    let single = models.models.len() == 1;

    let mut scored: Vec<Scored<'_>> = matrix
        .rows()
        .iter()
        .map(|row| {
            let outputs: Vec<f64> = models
                .models
                .iter()
                .map(|m| m.predict_row(&row.values))
                .collect();
            let score = outputs
                .iter()
                .zip(&weights)
                .map(|(o, w)| o * w)
                .sum::<f64>()
                / weight_sum;
            let agreement = if single {
                SINGLE_MODEL_AGREEMENT
            } else {
                let variance = outputs
                    .iter()
                    .zip(&weights)
                    .map(|(o, w)| w * (o - score).powi(2))
                    .sum::<f64>()
                    / weight_sum;
                1.0 / (1.0 + variance)
            };
            let penalty = if row.low_sample {
                cfg.low_sample_penalty
            } else {
                1.0
            };
            Scored {
                team_id: &row.team_id,
                score,
                primary_raw: primary.predict_row(&row.values),
                confidence: (agreement * penalty).clamp(0.0, 1.0),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then(a.primary_raw.total_cmp(&b.primary_raw))
            .then(b.confidence.total_cmp(&a.confidence))
            .then_with(|| a.team_id.cmp(b.team_id))
    });

    let source = primary.family.label();
    Ok(scored
        .into_iter()
        .enumerate()
        .map(|(idx, s)| Prediction {
            team_id: s.team_id.to_string(),
            rank: idx + 1,
            score: s.score,
            confidence: s.confidence,
            source_model: source.to_string(),
            fallback_used: false,
        })
        .collect())
}
