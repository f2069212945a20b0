use serde::{Deserialize, Serialize};

use crate::error::TrainingError;
use crate::features::FeatureRow;
use crate::regressor::{ModelFamily, Regressor, check_shapes};
use crate::tree::RegressionTree;

/// Least-squares gradient boosting: each stage fits a shallow tree to the current
/// residuals and is added with shrinkage `learning_rate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedModel {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    #[serde(default)]
    pub base: f64,
    #[serde(default)]
    pub stages: Vec<RegressionTree>,
}

impl BoostedModel {
    pub fn new(n_estimators: usize, learning_rate: f64, max_depth: usize) -> Self {
        Self {
            n_estimators,
            learning_rate,
            max_depth,
            base: 0.0,
            stages: Vec::new(),
        }
    }
}

impl Regressor for BoostedModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::BoostedTrees
    }

    fn fit(&mut self, rows: &[FeatureRow], labels: &[f64]) -> Result<(), TrainingError> {
        check_shapes(ModelFamily::BoostedTrees, rows, labels)?;
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(TrainingError::Degenerate {
                family: ModelFamily::BoostedTrees,
                reason: format!("learning_rate {} outside (0, 1]", self.learning_rate),
            });
        }

        let n = rows.len();
        let all: Vec<usize> = (0..n).collect();
        let base = labels.iter().sum::<f64>() / n as f64;
        let mut current = vec![base; n];
        let mut stages = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            let residuals: Vec<f64> = labels.iter().zip(&current).map(|(y, f)| y - f).collect();
            if residuals.iter().all(|r| r.abs() < 1e-12) {
                break;
            }
            let tree = RegressionTree::fit(rows, &residuals, &all, self.max_depth, 1);
            for (i, row) in rows.iter().enumerate() {
                current[i] += self.learning_rate * tree.predict_row(row);
            }
            stages.push(tree);
        }

        self.base = base;
        self.stages = stages;
        Ok(())
    }

    fn predict_row(&self, row: &FeatureRow) -> f64 {
        self.stages
            .iter()
            .fold(self.base, |acc, tree| acc + self.learning_rate * tree.predict_row(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;

    #[test]
    fn more_stages_fit_training_data_better() {
        let rows: Vec<FeatureRow> = (0..20)
            .map(|i| {
                let mut r = [0.0; FEATURE_COUNT];
                r[6] = (i % 10) as f64;
                r[1] = (i / 10) as f64;
                r
            })
            .collect();
        let labels: Vec<f64> = (0..20).map(|i| ((i % 10) * 2 + i / 10) as f64).collect();

        let mut short = BoostedModel::new(5, 0.1, 3);
        let mut long = BoostedModel::new(100, 0.1, 3);
        short.fit(&rows, &labels).expect("fit");
        long.fit(&rows, &labels).expect("fit");
        assert!(long.score(&rows, &labels) < short.score(&rows, &labels));
    }

    #[test]
    fn zero_learning_rate_is_rejected() {
        let rows = vec![[0.0; FEATURE_COUNT]; 4];
        let mut model = BoostedModel::new(10, 0.0, 3);
        let err = model.fit(&rows, &[1.0, 2.0, 3.0, 4.0]).unwrap_err();
        assert_eq!(err.family(), ModelFamily::BoostedTrees);
    }
}
