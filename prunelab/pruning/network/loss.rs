use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::LabError;

/// Loss functions understood by the engine and loss-aware strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Softmax followed by negative log-likelihood.
    CrossEntropy,
}

impl Default for Loss {
    fn default() -> Self {
        Self::CrossEntropy
    }
}

impl Loss {
    /// Stable identifier.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CrossEntropy => "cross_entropy",
        }
    }

    /// Returns the mean loss over the batch and its gradient w.r.t. the logits.
    pub fn evaluate(
        self,
        logits: &Array2<f32>,
        labels: &[usize],
    ) -> Result<(f32, Array2<f32>), LabError> {
        let (rows, classes) = logits.dim();
        if labels.len() != rows {
            return Err(LabError::ShapeMismatch {
                expected: rows,
                found: labels.len(),
            });
        }
        if rows == 0 {
            return Err(LabError::EmptyDataset("batch"));
        }
        match self {
            Self::CrossEntropy => {
                let mut grad = softmax(logits);
                let mut total = 0.0;
                for (row, &label) in labels.iter().enumerate() {
                    if label >= classes {
                        return Err(LabError::ShapeMismatch {
                            expected: classes,
                            found: label + 1,
                        });
                    }
                    total -= (grad[[row, label]] + 1e-7).ln();
                    grad[[row, label]] -= 1.0;
                }
                let scale = rows as f32;
                grad.mapv_inplace(|value| value / scale);
                Ok((total / scale, grad))
            }
        }
    }
}

/// Row-wise softmax.
#[must_use]
pub fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, value| acc.max(*value));
        row.mapv_inplace(|value| (value - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|value| value / sum);
    }
    probs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_rows_sum_to_one() {
        let logits = Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
        let probs = softmax(&logits);
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
        assert!(probs[[0, 2]] > probs[[0, 0]]);
    }

    #[test]
    fn cross_entropy_gradient_points_away_from_label() {
        let logits = Array2::zeros((1, 4));
        let (loss, grad) = Loss::CrossEntropy.evaluate(&logits, &[2]).unwrap();
        assert!((loss - 4.0_f32.ln()).abs() < 1e-4);
        assert!(grad[[0, 2]] < 0.0);
        assert!(grad[[0, 0]] > 0.0);
    }

    #[test]
    fn rejects_out_of_range_labels() {
        let logits = Array2::zeros((1, 2));
        assert!(Loss::CrossEntropy.evaluate(&logits, &[5]).is_err());
        assert!(Loss::CrossEntropy.evaluate(&logits, &[0, 1]).is_err());
    }
}
