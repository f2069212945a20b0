use serde::{Deserialize, Serialize};

use crate::features::{FEATURE_COUNT, FeatureRow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Variance-reduction regression tree. Split search walks features in column order and
/// thresholds in ascending order, keeping the first strictly better split, so the same
/// inputs always grow the same tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub root: Node,
}

impl RegressionTree {
    pub fn fit(
        rows: &[FeatureRow],
        targets: &[f64],
        indices: &[usize],
        max_depth: usize,
        min_samples_leaf: usize,
    ) -> Self {
        let min_samples_leaf = min_samples_leaf.max(1);
        let root = grow(rows, targets, indices, 0, max_depth, min_samples_leaf);
        Self {
            max_depth,
            min_samples_leaf,
            root,
        }
    }

    pub fn predict_row(&self, row: &FeatureRow) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(node: &Node) -> usize {
            match node {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(left).max(walk(right)),
            }
        }
        walk(&self.root)
    }
}

fn mean_of(targets: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len() as f64
}

fn grow(
    rows: &[FeatureRow],
    targets: &[f64],
    indices: &[usize],
    depth: usize,
    max_depth: usize,
    min_samples_leaf: usize,
) -> Node {
    let value = mean_of(targets, indices);
    if depth >= max_depth || indices.len() < 2 * min_samples_leaf {
        return Node::Leaf { value };
    }
    let Some(split) = best_split(rows, targets, indices, min_samples_leaf) else {
        return Node::Leaf { value };
    };

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .partition(|&&i| rows[i][split.feature] <= split.threshold);

    Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left: Box::new(grow(rows, targets, &left_idx, depth + 1, max_depth, min_samples_leaf)),
        right: Box::new(grow(rows, targets, &right_idx, depth + 1, max_depth, min_samples_leaf)),
    }
}

struct Split {
    feature: usize,
    threshold: f64,
}

fn best_split(
    rows: &[FeatureRow],
    targets: &[f64],
    indices: &[usize],
    min_samples_leaf: usize,
) -> Option<Split> {
    let n = indices.len();
    let total_sum: f64 = indices.iter().map(|&i| targets[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| targets[i] * targets[i]).sum();
    let parent_sse = total_sq - total_sum * total_sum / n as f64;
    if parent_sse <= 1e-12 {
        return None;
    }

    let mut best: Option<(f64, Split)> = None;
    let mut order: Vec<usize> = indices.to_vec();
    for feature in 0..FEATURE_COUNT {
        order.sort_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]).then(a.cmp(&b)));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for pos in 0..n - 1 {
            let i = order[pos];
            left_sum += targets[i];
            left_sq += targets[i] * targets[i];

            let left_n = pos + 1;
            let right_n = n - left_n;
            if left_n < min_samples_leaf || right_n < min_samples_leaf {
                continue;
            }
            let here = rows[i][feature];
            let next = rows[order[pos + 1]][feature];
            if next <= here {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n as f64)
                + (right_sq - right_sum * right_sum / right_n as f64);
            let improves = match &best {
                Some((best_sse, _)) => sse < *best_sse - 1e-12,
                None => sse < parent_sse - 1e-12,
            };
            if improves {
                best = Some((
                    sse,
                    Split {
                        feature,
                        threshold: (here + next) / 2.0,
                    },
                ));
            }
        }
    }
    best.map(|(_, split)| split)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<FeatureRow>, Vec<f64>) {
        let mut rows = Vec::new();
        let mut targets = Vec::new();
        for i in 0..10 {
            let mut row = [0.0; FEATURE_COUNT];
            row[2] = i as f64;
            rows.push(row);
            targets.push(if i < 5 { 1.0 } else { 9.0 });
        }
        (rows, targets)
    }

    #[test]
    fn single_split_finds_the_step() {
        let (rows, targets) = step_data();
        let idx: Vec<usize> = (0..rows.len()).collect();
        let tree = RegressionTree::fit(&rows, &targets, &idx, 1, 1);
        match &tree.root {
            Node::Split {
                feature, threshold, ..
            } => {
                assert_eq!(*feature, 2);
                assert!((*threshold - 4.5).abs() < 1e-12);
            }
            Node::Leaf { .. } => panic!("expected a split"),
        }
        assert_eq!(tree.predict_row(&rows[0]), 1.0);
        assert_eq!(tree.predict_row(&rows[9]), 9.0);
    }

    #[test]
    fn depth_and_leaf_size_are_respected() {
        let (rows, _) = step_data();
        let targets: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let idx: Vec<usize> = (0..rows.len()).collect();
        let tree = RegressionTree::fit(&rows, &targets, &idx, 2, 1);
        assert!(tree.depth() <= 2);

        let wide = RegressionTree::fit(&rows, &targets, &idx, 10, 6);
        assert_eq!(wide.depth(), 0);
    }

    #[test]
    fn constant_targets_make_a_leaf() {
        let (rows, _) = step_data();
        let targets = vec![3.0; rows.len()];
        let idx: Vec<usize> = (0..rows.len()).collect();
        let tree = RegressionTree::fit(&rows, &targets, &idx, 5, 1);
        assert_eq!(tree.root, Node::Leaf { value: 3.0 });
    }
}
