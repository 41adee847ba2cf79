use serde::{Serialize, Deserialize};

use crate::activation::ActivationFunction;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f64 = 1e-12;

/// Huber threshold.
const DELTA: f64 = 1.0;

/// Selects which loss function the reference MLP trains with.
///
/// - `Mse`                — mean-squared error, linear head.
/// - `CrossEntropy`       — categorical cross-entropy, softmax head. The
///   gradient is the combined Softmax+CE gradient (predicted - expected).
/// - `BinaryCrossEntropy` — binary cross-entropy, sigmoid head.
/// - `Mae`                — mean absolute error, linear head.
/// - `Huber`              — Huber loss (δ=1.0), linear head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    Mse,
    CrossEntropy,
    BinaryCrossEntropy,
    Mae,
    Huber,
}

impl LossType {
    /// Activation the output layer must use for this loss.
    pub fn head(&self) -> ActivationFunction {
        match self {
            LossType::CrossEntropy       => ActivationFunction::Softmax,
            LossType::BinaryCrossEntropy => ActivationFunction::Sigmoid,
            _                            => ActivationFunction::Identity,
        }
    }

    /// True when the step should also report classification accuracy as its score.
    pub fn is_classification(&self) -> bool {
        matches!(self, LossType::CrossEntropy)
    }

    /// Scalar loss for one sample.
    pub fn loss(&self, predicted: &[f64], expected: &[f64]) -> f64 {
        let n = predicted.len().max(1) as f64;
        let pairs = predicted.iter().zip(expected.iter());
        match self {
            LossType::Mse => pairs.map(|(p, y)| (p - y).powi(2)).sum::<f64>() / n,
            LossType::CrossEntropy => pairs.map(|(p, y)| -y * (p + EPS).ln()).sum(),
            LossType::BinaryCrossEntropy => pairs
                .map(|(p, y)| -(y * (p + EPS).ln() + (1.0 - y) * (1.0 - p + EPS).ln()))
                .sum::<f64>() / n,
            LossType::Mae => pairs.map(|(p, y)| (p - y).abs()).sum::<f64>() / n,
            LossType::Huber => pairs
                .map(|(p, y)| {
                    let x = p - y;
                    if x.abs() <= DELTA { 0.5 * x * x } else { DELTA * (x.abs() - 0.5 * DELTA) }
                })
                .sum::<f64>() / n,
        }
    }

    /// Per-output gradient for one sample, in the head's activation space
    /// (pre-softmax logits for `CrossEntropy`).
    pub fn derivative(&self, predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        let n = predicted.len().max(1) as f64;
        let pairs = predicted.iter().zip(expected.iter());
        match self {
            LossType::Mse => pairs.map(|(p, y)| 2.0 * (p - y) / n).collect(),
            LossType::CrossEntropy => pairs.map(|(p, y)| p - y).collect(),
            LossType::BinaryCrossEntropy => pairs
                .map(|(p, y)| (p - y) / ((p + EPS) * (1.0 - p + EPS)) / n)
                .collect(),
            LossType::Mae => pairs
                .map(|(p, y)| {
                    let diff = p - y;
                    if diff > 0.0 { 1.0 / n } else if diff < 0.0 { -1.0 / n } else { 0.0 }
                })
                .collect(),
            LossType::Huber => pairs
                .map(|(p, y)| {
                    let x = p - y;
                    (if x.abs() <= DELTA { x } else { DELTA * x.signum() }) / n
                })
                .collect(),
        }
    }
}
