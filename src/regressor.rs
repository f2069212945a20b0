use std::fmt;

use serde::{Deserialize, Serialize};

use crate::boosting::BoostedModel;
use crate::error::TrainingError;
use crate::features::FeatureRow;
use crate::forest::ForestModel;
use crate::ridge::RidgeModel;

/// Declaration order is the tie-break priority: simpler families first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Ridge,
    BoostedTrees,
    RandomForest,
}

pub const FAMILY_PRIORITY: [ModelFamily; 3] = [
    ModelFamily::Ridge,
    ModelFamily::BoostedTrees,
    ModelFamily::RandomForest,
];

impl ModelFamily {
    pub fn label(self) -> &'static str {
        match self {
            ModelFamily::Ridge => "ridge",
            ModelFamily::BoostedTrees => "boosted_trees",
            ModelFamily::RandomForest => "random_forest",
        }
    }

    /// Lower is preferred when cross-validation scores tie.
    pub fn priority(self) -> usize {
        FAMILY_PRIORITY
            .iter()
            .position(|f| *f == self)
            .unwrap_or(FAMILY_PRIORITY.len())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ridge" => Some(ModelFamily::Ridge),
            "boosted_trees" | "gradient_boosting" | "boosted" => Some(ModelFamily::BoostedTrees),
            "random_forest" | "forest" => Some(ModelFamily::RandomForest),
            _ => None,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Hyperparams {
    Ridge {
        alpha: f64,
    },
    BoostedTrees {
        n_estimators: usize,
        learning_rate: f64,
        max_depth: usize,
    },
    RandomForest {
        n_estimators: usize,
        max_depth: usize,
        min_samples_leaf: usize,
    },
}

impl Hyperparams {
    pub fn family(&self) -> ModelFamily {
        match self {
            Hyperparams::Ridge { .. } => ModelFamily::Ridge,
            Hyperparams::BoostedTrees { .. } => ModelFamily::BoostedTrees,
            Hyperparams::RandomForest { .. } => ModelFamily::RandomForest,
        }
    }
}

impl fmt::Display for Hyperparams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hyperparams::Ridge { alpha } => write!(f, "alpha={alpha}"),
            Hyperparams::BoostedTrees {
                n_estimators,
                learning_rate,
                max_depth,
            } => write!(
                f,
                "n_estimators={n_estimators} learning_rate={learning_rate} max_depth={max_depth}"
            ),
            Hyperparams::RandomForest {
                n_estimators,
                max_depth,
                min_samples_leaf,
            } => write!(
                f,
                "n_estimators={n_estimators} max_depth={max_depth} min_samples_leaf={min_samples_leaf}"
            ),
        }
    }
}

/// Tuning grids per family. Grids are listed simplest-first; equal CV scores keep the
/// earlier entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperparamSpace {
    pub ridge_alpha: Vec<f64>,
    pub boosted_n_estimators: Vec<usize>,
    pub boosted_learning_rate: Vec<f64>,
    pub boosted_max_depth: usize,
    pub forest_n_estimators: Vec<usize>,
    pub forest_max_depth: Vec<usize>,
    pub forest_min_samples_leaf: usize,
}

impl Default for HyperparamSpace {
    fn default() -> Self {
        Self {
            ridge_alpha: vec![0.1, 1.0, 10.0],
            boosted_n_estimators: vec![50, 100],
            boosted_learning_rate: vec![0.05, 0.1],
            boosted_max_depth: 3,
            forest_n_estimators: vec![50, 100],
            forest_max_depth: vec![5, 10],
            forest_min_samples_leaf: 1,
        }
    }
}

impl HyperparamSpace {
    pub fn grid(&self, family: ModelFamily) -> Vec<Hyperparams> {
        let mut out = Vec::new();
        match family {
            ModelFamily::Ridge => {
                for &alpha in &self.ridge_alpha {
                    out.push(Hyperparams::Ridge { alpha });
                }
            }
            ModelFamily::BoostedTrees => {
                for &n_estimators in &self.boosted_n_estimators {
                    for &learning_rate in &self.boosted_learning_rate {
                        out.push(Hyperparams::BoostedTrees {
                            n_estimators,
                            learning_rate,
                            max_depth: self.boosted_max_depth,
                        });
                    }
                }
            }
            ModelFamily::RandomForest => {
                for &n_estimators in &self.forest_n_estimators {
                    for &max_depth in &self.forest_max_depth {
                        out.push(Hyperparams::RandomForest {
                            n_estimators,
                            max_depth,
                            min_samples_leaf: self.forest_min_samples_leaf,
                        });
                    }
                }
            }
        }
        out
    }
}

/// The capability set every model family provides.
pub trait Regressor {
    fn family(&self) -> ModelFamily;

    fn fit(&mut self, rows: &[FeatureRow], labels: &[f64]) -> Result<(), TrainingError>;

    fn predict_row(&self, row: &FeatureRow) -> f64;

    fn predict(&self, rows: &[FeatureRow]) -> Vec<f64> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    /// Mean absolute error on the given rows (lower is better).
    fn score(&self, rows: &[FeatureRow], labels: &[f64]) -> f64 {
        mean_absolute_error(&self.predict(rows), labels)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", content = "model", rename_all = "snake_case")]
pub enum FittedModel {
    Ridge(RidgeModel),
    BoostedTrees(BoostedModel),
    RandomForest(ForestModel),
}

impl FittedModel {
    pub fn unfitted(params: Hyperparams, seed: u64) -> Self {
        match params {
            Hyperparams::Ridge { alpha } => FittedModel::Ridge(RidgeModel::new(alpha)),
            Hyperparams::BoostedTrees {
                n_estimators,
                learning_rate,
                max_depth,
            } => FittedModel::BoostedTrees(BoostedModel::new(n_estimators, learning_rate, max_depth)),
            Hyperparams::RandomForest {
                n_estimators,
                max_depth,
                min_samples_leaf,
            } => FittedModel::RandomForest(ForestModel::new(
                n_estimators,
                max_depth,
                min_samples_leaf,
                seed,
            )),
        }
    }

    fn inner(&self) -> &dyn Regressor {
        match self {
            FittedModel::Ridge(m) => m,
            FittedModel::BoostedTrees(m) => m,
            FittedModel::RandomForest(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Regressor {
        match self {
            FittedModel::Ridge(m) => m,
            FittedModel::BoostedTrees(m) => m,
            FittedModel::RandomForest(m) => m,
        }
    }
}

impl Regressor for FittedModel {
    fn family(&self) -> ModelFamily {
        self.inner().family()
    }

    fn fit(&mut self, rows: &[FeatureRow], labels: &[f64]) -> Result<(), TrainingError> {
        self.inner_mut().fit(rows, labels)
    }

    fn predict_row(&self, row: &FeatureRow) -> f64 {
        self.inner().predict_row(row)
    }
}

pub fn mean_absolute_error(predicted: &[f64], actual: &[f64]) -> f64 {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return f64::INFINITY;
    }
    let sum: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).abs())
        .sum();
    sum / predicted.len() as f64
}

pub(crate) fn check_shapes(
    family: ModelFamily,
    rows: &[FeatureRow],
    labels: &[f64],
) -> Result<(), TrainingError> {
    if rows.len() != labels.len() {
        return Err(TrainingError::LabelMismatch {
            family,
            rows: rows.len(),
            labels: labels.len(),
        });
    }
    if rows.is_empty() {
        return Err(TrainingError::Degenerate {
            family,
            reason: "no rows".to_string(),
        });
    }
    Ok(())
}
