use serde::{Serialize, Deserialize};

use crate::error::Result;
use crate::model::Model;
use crate::optim::Optimizer;

/// Numeric strategy requested for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// Gradients of the raw loss.
    #[default]
    Full,
    /// Dynamic loss scaling: backward on `scale * loss`, unscale before the
    /// update, skip non-finite updates.
    Scaled { init_scale: f64, growth_interval: usize },
}

/// Dynamic loss-scale state.
#[derive(Debug, Clone, PartialEq)]
pub struct LossScaler {
    pub scale: f64,
    growth_interval: usize,
    good_steps: usize,
    pub skipped: usize,
}

impl LossScaler {
    pub fn new(init_scale: f64, growth_interval: usize) -> Self {
        LossScaler { scale: init_scale, growth_interval: growth_interval.max(1), good_steps: 0, skipped: 0 }
    }

    fn update(&mut self, finite: bool) {
        if finite {
            self.good_steps += 1;
            if self.good_steps >= self.growth_interval {
                self.scale *= 2.0;
                self.good_steps = 0;
            }
        } else {
            self.scale *= 0.5;
            self.good_steps = 0;
            self.skipped += 1;
        }
    }
}

/// How the driver turns a step's loss into a parameter update. Selected once
/// per run so the epoch loop is the same for every numeric strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStrategy {
    Plain,
    Scaled(LossScaler),
}

impl StepStrategy {
    pub fn select(precision: Precision) -> StepStrategy {
        match precision {
            Precision::Full => StepStrategy::Plain,
            Precision::Scaled { init_scale, growth_interval } => {
                StepStrategy::Scaled(LossScaler::new(init_scale, growth_interval))
            }
        }
    }

    /// Accumulates gradients for the last training step.
    pub fn backward<M: Model + ?Sized>(&self, model: &mut M) -> Result<()> {
        match self {
            StepStrategy::Plain => model.backward(1.0),
            StepStrategy::Scaled(scaler) => model.backward(scaler.scale),
        }
    }

    /// Applies the accumulated gradients. Returns false when a scaled update
    /// was skipped because the gradients overflowed.
    pub fn apply<M: Model + ?Sized>(&mut self, model: &mut M, optim: &mut dyn Optimizer) -> bool {
        match self {
            StepStrategy::Plain => {
                optim.step(model.parameters());
                true
            }
            StepStrategy::Scaled(scaler) => {
                let inv = 1.0 / scaler.scale;
                let mut finite = true;
                for p in model.parameters() {
                    p.grad.scale_mut(inv);
                    finite &= p.grad.is_finite();
                }
                if finite {
                    optim.step(model.parameters());
                }
                scaler.update(finite);
                finite
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaler_backs_off_and_grows() {
        let mut s = LossScaler::new(1024.0, 2);
        s.update(false);
        assert_eq!(s.scale, 512.0);
        assert_eq!(s.skipped, 1);
        s.update(true);
        s.update(true);
        assert_eq!(s.scale, 1024.0);
    }

    #[test]
    fn test_select() {
        assert_eq!(StepStrategy::select(Precision::Full), StepStrategy::Plain);
        assert!(matches!(
            StepStrategy::select(Precision::Scaled { init_scale: 8.0, growth_interval: 10 }),
            StepStrategy::Scaled(LossScaler { scale, .. }) if scale == 8.0
        ));
    }
}
