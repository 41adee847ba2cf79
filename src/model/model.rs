use std::collections::BTreeMap;

use serde_json::Value;

use crate::data::Batch;
use crate::error::{Result, TrainError};
use crate::math::Matrix;

/// Task metric returned by a step, already averaged over the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Score {
    Scalar(f64),
    Vector(Vec<f64>),
    /// Rank-2 scores are a caller error (not averaged over the batch); the
    /// variant exists so the driver can reject them with a clear message.
    Matrix(Matrix),
}

impl Score {
    pub fn rank(&self) -> usize {
        match self {
            Score::Scalar(_) => 0,
            Score::Vector(_) => 1,
            Score::Matrix(_) => 2,
        }
    }

    /// Components of the score; a scalar becomes a one-element sequence.
    pub fn into_components(self) -> Result<Vec<f64>> {
        let rank = self.rank();
        match self {
            Score::Scalar(v) => Ok(vec![v]),
            Score::Vector(v) => Ok(v),
            Score::Matrix(_) => Err(TrainError::ScoreRank { rank }),
        }
    }
}

/// What a training or validation step returns.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub loss: f64,
    pub score: Option<Score>,
}

impl StepOutput {
    pub fn with_score(loss: f64, score: Score) -> Self {
        StepOutput { loss, score: Some(score) }
    }
}

impl From<f64> for StepOutput {
    fn from(loss: f64) -> Self {
        StepOutput { loss, score: None }
    }
}

/// Named output tensors of a predict step. A bare tensor is stored as `output`.
pub type Prediction = BTreeMap<String, Matrix>;

/// Which step functions a model provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCapabilities {
    pub training_step: bool,
    pub validation_step: bool,
    pub predict_step: bool,
}

impl Default for StepCapabilities {
    fn default() -> Self {
        StepCapabilities { training_step: true, validation_step: false, predict_step: false }
    }
}

/// The step function a pass calls for every batch, resolved once per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Training,
    Validation,
}

impl StepKind {
    /// Training passes need `training_step`; validation passes prefer
    /// `validation_step` and fall back to `training_step`.
    pub fn resolve(caps: StepCapabilities, train: bool) -> Result<StepKind> {
        if train {
            if caps.training_step {
                return Ok(StepKind::Training);
            }
        } else if caps.validation_step {
            return Ok(StepKind::Validation);
        } else if caps.training_step {
            return Ok(StepKind::Training);
        }
        Err(TrainError::MissingStep { step: "training_step" })
    }
}

/// A parameter tensor together with its gradient accumulator.
pub struct Param<'a> {
    pub value: &'a mut Matrix,
    pub grad: &'a mut Matrix,
}

/// The contract a trainable model exposes to the engine.
///
/// Gradient flow: in training mode a step records what it needs, then
/// `backward(scale)` adds `scale * dLoss/dParam` to each gradient
/// accumulator. The optimizer reads the accumulators through `parameters()`.
pub trait Model {
    fn capabilities(&self) -> StepCapabilities {
        StepCapabilities::default()
    }

    /// Switches between training and evaluation mode. In evaluation mode no
    /// gradient information is tracked and parameters must not change.
    fn set_training(&mut self, training: bool);

    fn training_step(&mut self, _batch: &Batch, _batch_id: usize) -> Result<StepOutput> {
        Err(TrainError::MissingStep { step: "training_step" })
    }

    fn validation_step(&mut self, _batch: &Batch, _batch_id: usize) -> Result<StepOutput> {
        Err(TrainError::MissingStep { step: "validation_step" })
    }

    fn predict_step(&mut self, _batch: &Batch, _batch_id: usize) -> Result<Prediction> {
        Err(TrainError::MissingStep { step: "predict_step" })
    }

    /// Accumulates the gradients of the last training step's loss, multiplied by `scale`.
    fn backward(&mut self, scale: f64) -> Result<()>;

    fn parameters(&mut self) -> Vec<Param<'_>>;

    fn zero_grad(&mut self) {
        for p in self.parameters() {
            p.grad.fill(0.0);
        }
    }

    /// Number of trainable scalars.
    fn num_params(&self) -> usize;

    /// Model configuration stored alongside checkpoints.
    fn config(&self) -> Value {
        Value::Null
    }

    fn state_dict(&self) -> Result<Value>;

    fn load_state_dict(&mut self, state: &Value) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_prefers_validation_step() {
        let caps = StepCapabilities { validation_step: true, ..Default::default() };
        assert_eq!(StepKind::resolve(caps, false).unwrap(), StepKind::Validation);
        assert_eq!(StepKind::resolve(caps, true).unwrap(), StepKind::Training);
    }

    #[test]
    fn test_validation_falls_back_to_training_step() {
        let caps = StepCapabilities::default();
        assert_eq!(StepKind::resolve(caps, false).unwrap(), StepKind::Training);
    }

    #[test]
    fn test_missing_training_step_is_fatal() {
        let caps = StepCapabilities { training_step: false, validation_step: true, predict_step: false };
        assert!(matches!(
            StepKind::resolve(caps, true),
            Err(TrainError::MissingStep { step: "training_step" })
        ));
        let none = StepCapabilities { training_step: false, validation_step: false, predict_step: false };
        assert!(StepKind::resolve(none, false).is_err());
    }

    #[test]
    fn test_scalar_score_is_promoted() {
        assert_eq!(Score::Scalar(0.5).into_components().unwrap(), vec![0.5]);
        assert!(matches!(
            Score::Matrix(Matrix::zeros(2, 2)).into_components(),
            Err(TrainError::ScoreRank { rank: 2 })
        ));
    }
}
