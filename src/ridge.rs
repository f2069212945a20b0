use serde::{Deserialize, Serialize};

use crate::error::TrainingError;
use crate::features::{FEATURE_COUNT, FeatureRow};
use crate::regressor::{ModelFamily, Regressor, check_shapes};

/// L2-regularized least squares on standardized columns. The intercept is the label
/// mean and is not penalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeModel {
    pub alpha: f64,
    #[serde(default)]
    pub feature_means: Vec<f64>,
    #[serde(default)]
    pub feature_stds: Vec<f64>,
    #[serde(default)]
    pub coeffs: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
}

impl RidgeModel {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            feature_means: Vec::new(),
            feature_stds: Vec::new(),
            coeffs: Vec::new(),
            intercept: 0.0,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.coeffs.len() == FEATURE_COUNT
    }
}

impl Regressor for RidgeModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::Ridge
    }

    fn fit(&mut self, rows: &[FeatureRow], labels: &[f64]) -> Result<(), TrainingError> {
        check_shapes(ModelFamily::Ridge, rows, labels)?;
        let (mean, std) = feature_norm_stats(rows);
        let n = rows.len() as f64;
        let y_mean = labels.iter().sum::<f64>() / n;

        // Normal equations: (ZᵀZ + αI) β = Zᵀ(y - ȳ)
        let mut a = [[0.0; FEATURE_COUNT]; FEATURE_COUNT];
        let mut b = [0.0; FEATURE_COUNT];
        for (row, y) in rows.iter().zip(labels) {
            let z = standardize(row, &mean, &std);
            let yc = y - y_mean;
            for i in 0..FEATURE_COUNT {
                b[i] += z[i] * yc;
                for j in 0..FEATURE_COUNT {
                    a[i][j] += z[i] * z[j];
                }
            }
        }
        for (i, row) in a.iter_mut().enumerate() {
            row[i] += self.alpha.max(0.0);
        }

        let coeffs = solve(a, b).ok_or_else(|| TrainingError::Degenerate {
            family: ModelFamily::Ridge,
            reason: format!("singular normal equations at alpha={}", self.alpha),
        })?;

        self.feature_means = mean.to_vec();
        self.feature_stds = std.to_vec();
        self.coeffs = coeffs.to_vec();
        self.intercept = y_mean;
        Ok(())
    }

    fn predict_row(&self, row: &FeatureRow) -> f64 {
        if !self.is_fitted() {
            return self.intercept;
        }
        let mut out = self.intercept;
        for i in 0..FEATURE_COUNT {
            out += self.coeffs[i] * standardized(row[i], self.feature_means[i], self.feature_stds[i]);
        }
        out
    }
}

fn feature_norm_stats(rows: &[FeatureRow]) -> (FeatureRow, FeatureRow) {
    let mut mean = [0.0; FEATURE_COUNT];
    let mut var = [0.0; FEATURE_COUNT];
    let n = rows.len().max(1) as f64;

    for row in rows {
        for i in 0..FEATURE_COUNT {
            mean[i] += row[i];
        }
    }
    for v in &mut mean {
        *v /= n;
    }
    for row in rows {
        for i in 0..FEATURE_COUNT {
            let d = row[i] - mean[i];
            var[i] += d * d;
        }
    }
    for v in &mut var {
        *v = (*v / n).sqrt();
    }
    (mean, var)
}

// Constant columns carry no signal and standardize to zero.
fn standardized(x: f64, mean: f64, std: f64) -> f64 {
    if std < 1e-9 { 0.0 } else { (x - mean) / std }
}

fn standardize(row: &FeatureRow, mean: &FeatureRow, std: &FeatureRow) -> FeatureRow {
    let mut out = [0.0; FEATURE_COUNT];
    for i in 0..FEATURE_COUNT {
        out[i] = standardized(row[i], mean[i], std[i]);
    }
    out
}

/// Gaussian elimination with partial pivoting.
fn solve(
    mut a: [[f64; FEATURE_COUNT]; FEATURE_COUNT],
    mut b: [f64; FEATURE_COUNT],
) -> Option<[f64; FEATURE_COUNT]> {
    for col in 0..FEATURE_COUNT {
        let pivot = (col..FEATURE_COUNT)
            .max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for r in (col + 1)..FEATURE_COUNT {
            let factor = a[r][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..FEATURE_COUNT {
                a[r][c] -= factor * a[col][c];
            }
            b[r] -= factor * b[col];
        }
    }

    let mut x = [0.0; FEATURE_COUNT];
    for r in (0..FEATURE_COUNT).rev() {
        let mut acc = b[r];
        for c in (r + 1)..FEATURE_COUNT {
            acc -= a[r][c] * x[c];
        }
        x[r] = acc / a[r][r];
    }
    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}
