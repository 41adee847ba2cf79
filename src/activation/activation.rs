use serde::{Serialize, Deserialize};
use std::f64::consts::{E, PI};

/// Activation applied between the linear layers of an MLP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFunction {
    Gelu,
    ReLU,
    ReLU6,
    Sigmoid,
    Tanh,
    Swish,
    HardSwish,
    HardSigmoid,
    Identity,
    /// Softmax is a vector-valued activation; it is applied at the layer level
    /// in `Layer::feed_from()`, never element-wise.
    Softmax,
}

impl ActivationFunction {
    /// Looks up a hidden-layer activation by name.
    ///
    /// Unknown names fall back to `Gelu` with a warning; this is the only
    /// configuration error the crate downgrades instead of failing.
    pub fn from_name(name: &str) -> ActivationFunction {
        match name.to_ascii_lowercase().as_str() {
            "gelu"     => ActivationFunction::Gelu,
            "relu"     => ActivationFunction::ReLU,
            "relu6"    => ActivationFunction::ReLU6,
            "sigmoid"  => ActivationFunction::Sigmoid,
            "tanh"     => ActivationFunction::Tanh,
            "swish"    => ActivationFunction::Swish,
            "hswish"   => ActivationFunction::HardSwish,
            "hsigmoid" => ActivationFunction::HardSigmoid,
            other => {
                tracing::warn!("MLP: unknown activation function {other}, set to gelu");
                ActivationFunction::Gelu
            }
        }
    }

    /// True for activations whose He initialization fits better than Xavier.
    pub fn is_relu_like(&self) -> bool {
        matches!(
            self,
            ActivationFunction::ReLU | ActivationFunction::ReLU6
                | ActivationFunction::Gelu | ActivationFunction::Swish
                | ActivationFunction::HardSwish
        )
    }

    /// Element-wise activation. `Softmax` returns `x` unchanged here; the
    /// layer normalizes the whole row.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Gelu => {
                let c = (2.0_f64 / PI).sqrt();
                0.5 * x * (1.0 + (c * (x + 0.044715 * x.powi(3))).tanh())
            }
            ActivationFunction::ReLU => x.max(0.0),
            ActivationFunction::ReLU6 => x.clamp(0.0, 6.0),
            ActivationFunction::Sigmoid => 1.0 / (1.0 + E.powf(-x)),
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::Swish => x / (1.0 + E.powf(-x)),
            ActivationFunction::HardSwish => x * (x + 3.0).clamp(0.0, 6.0) / 6.0,
            ActivationFunction::HardSigmoid => (x + 3.0).clamp(0.0, 6.0) / 6.0,
            ActivationFunction::Identity | ActivationFunction::Softmax => x,
        }
    }

    /// Element-wise derivative with respect to the pre-activation `x`.
    ///
    /// `Softmax` is always paired with cross-entropy, whose derivative is
    /// already taken w.r.t. the logits, so it passes the delta through (1.0).
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::Gelu => {
                let c = (2.0_f64 / PI).sqrt();
                let inner = c * (x + 0.044715 * x.powi(3));
                let tanh_inner = inner.tanh();
                let sech2 = 1.0 - tanh_inner * tanh_inner;
                let d_inner = c * (1.0 + 3.0 * 0.044715 * x.powi(2));
                0.5 * tanh_inner + 0.5 * x * sech2 * d_inner + 0.5
            }
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::ReLU6 => if x > 0.0 && x < 6.0 { 1.0 } else { 0.0 },
            ActivationFunction::Sigmoid => {
                let fx = self.function(x);
                fx * (1.0 - fx)
            }
            ActivationFunction::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            ActivationFunction::Swish => {
                let sig = 1.0 / (1.0 + E.powf(-x));
                sig + x * sig * (1.0 - sig)
            }
            ActivationFunction::HardSwish => {
                if x <= -3.0 { 0.0 } else if x >= 3.0 { 1.0 } else { (2.0 * x + 3.0) / 6.0 }
            }
            ActivationFunction::HardSigmoid => {
                if x > -3.0 && x < 3.0 { 1.0 / 6.0 } else { 0.0 }
            }
            ActivationFunction::Identity | ActivationFunction::Softmax => 1.0,
        }
    }
}
