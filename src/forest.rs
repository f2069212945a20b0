use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::TrainingError;
use crate::features::FeatureRow;
use crate::regressor::{ModelFamily, Regressor, check_shapes};
use crate::tree::RegressionTree;

/// Bagged regression trees. Bootstrap draws come from a `StdRng` seeded by the config,
/// so a fixed seed reproduces the same forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
    #[serde(default)]
    pub trees: Vec<RegressionTree>,
}

impl ForestModel {
    pub fn new(n_estimators: usize, max_depth: usize, min_samples_leaf: usize, seed: u64) -> Self {
        Self {
            n_estimators,
            max_depth,
            min_samples_leaf,
            seed,
            trees: Vec::new(),
        }
    }
}

impl Regressor for ForestModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::RandomForest
    }

    fn fit(&mut self, rows: &[FeatureRow], labels: &[f64]) -> Result<(), TrainingError> {
        check_shapes(ModelFamily::RandomForest, rows, labels)?;
        if self.n_estimators == 0 {
            return Err(TrainingError::Degenerate {
                family: ModelFamily::RandomForest,
                reason: "n_estimators must be positive".to_string(),
            });
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = rows.len();
        let mut trees = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(RegressionTree::fit(
                rows,
                labels,
                &sample,
                self.max_depth,
                self.min_samples_leaf,
            ));
        }
        self.trees = trees;
        Ok(())
    }

    fn predict_row(&self, row: &FeatureRow) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        sum / self.trees.len() as f64
    }
}
