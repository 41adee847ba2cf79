use serde_json::Value;

use crate::error::Result;
use crate::model::Param;

/// Applies accumulated gradients to model parameters.
///
/// The learning rate is owned by the optimizer; schedulers change it through
/// `set_lr`.
pub trait Optimizer {
    fn lr(&self) -> f64;

    fn set_lr(&mut self, lr: f64);

    /// One parameter update from the current gradient accumulators.
    /// Parameters arrive in the same order on every call.
    fn step(&mut self, params: Vec<Param<'_>>);

    fn state_dict(&self) -> Result<Value>;

    fn load_state_dict(&mut self, state: &Value) -> Result<()>;
}
