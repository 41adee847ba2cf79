use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::error::Result;
use crate::math::Matrix;
use crate::model::Param;
use crate::optim::optimizer::Optimizer;

/// Stochastic gradient descent with optional momentum.
///
/// `v = momentum * v + g;  w -= lr * v`. With `momentum == 0` this is plain SGD
/// and no velocity buffers are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sgd {
    pub learning_rate: f64,
    pub momentum: f64,
    velocity: Vec<Matrix>,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate, momentum: 0.0, velocity: Vec::new() }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Sgd {
        self.momentum = momentum;
        self
    }
}

impl Optimizer for Sgd {
    fn lr(&self) -> f64 {
        self.learning_rate
    }

    fn set_lr(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn step(&mut self, params: Vec<Param<'_>>) {
        let lr = self.learning_rate;
        if self.momentum == 0.0 {
            for p in params {
                p.value.add_scaled(p.grad, -lr);
            }
            return;
        }

        if self.velocity.len() != params.len() {
            self.velocity = params.iter().map(|p| Matrix::zeros(p.grad.rows, p.grad.cols)).collect();
        }
        for (p, v) in params.into_iter().zip(self.velocity.iter_mut()) {
            v.scale_mut(self.momentum);
            v.add_scaled(p.grad, 1.0);
            p.value.add_scaled(v, -lr);
        }
    }

    fn state_dict(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn load_state_dict(&mut self, state: &Value) -> Result<()> {
        *self = Sgd::deserialize(state)?;
        Ok(())
    }
}
