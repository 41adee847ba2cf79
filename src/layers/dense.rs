use serde::{Serialize, Deserialize};

use crate::activation::ActivationFunction;
use crate::math::Matrix;
use crate::model::Param;

/// Fully connected layer `a = f(x·W + b)` over a batch with one sample per row.
///
/// Only the parameters are serialized. Gradient accumulators, the gradient
/// of the last training step and the forward cache are rebuilt on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub size: usize,
    /// `input_size × size`
    pub weights: Matrix,
    /// `1 × size`
    pub biases: Matrix,
    pub activator: ActivationFunction,
    #[serde(skip)]
    grad_weights: Matrix,
    #[serde(skip)]
    grad_biases: Matrix,
    // Gradient of the last recorded step, not yet accumulated.
    #[serde(skip)]
    tape_weights: Matrix,
    #[serde(skip)]
    tape_biases: Matrix,
    #[serde(skip)]
    input: Matrix,
    // Pre-activation values (z = xW + b) needed for the derivative.
    #[serde(skip)]
    pre_neurons: Matrix,
}

impl Layer {
    /// He-initialized for ReLU-like activations, Xavier otherwise; zero biases.
    pub fn new(size: usize, input_size: usize, activation: ActivationFunction) -> Layer {
        let weights = if activation.is_relu_like() {
            Matrix::he(input_size, size)
        } else {
            Matrix::xavier(input_size, size)
        };

        Layer {
            size,
            grad_weights: Matrix::zeros_like(&weights),
            grad_biases: Matrix::zeros(1, size),
            weights,
            biases: Matrix::zeros(1, size),
            activator: activation,
            tape_weights: Matrix::default(),
            tape_biases: Matrix::default(),
            input: Matrix::default(),
            pre_neurons: Matrix::default(),
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.rows
    }

    /// Forward pass over a batch. With `record` set the layer keeps what
    /// `backprop` needs.
    pub fn feed_from(&mut self, input: &Matrix, record: bool) -> Matrix {
        let mut z = input.clone() * self.weights.clone();
        for row in z.data.iter_mut() {
            for (x, b) in row.iter_mut().zip(&self.biases.data[0]) {
                *x += b;
            }
        }

        let a = match self.activator {
            ActivationFunction::Softmax => softmax_rows(&z),
            f => z.map(|x| f.function(x)),
        };
        if record {
            self.input = input.clone();
            self.pre_neurons = z;
        }
        a
    }

    /// Records the parameter gradients for `delta` (∂L/∂a, one row per
    /// sample) and returns ∂L/∂x for the previous layer.
    pub fn backprop(&mut self, delta: &Matrix) -> Matrix {
        let act_derivative = self.pre_neurons.map(|x| self.activator.derivative(x));
        let layer_delta = hadamard(delta, &act_derivative);

        self.tape_weights = self.input.transpose() * layer_delta.clone();
        self.tape_biases = column_sums(&layer_delta);
        layer_delta * self.weights.transpose()
    }

    pub fn has_tape(&self) -> bool {
        self.tape_weights.same_shape(&self.weights)
    }

    /// Adds `scale` times the recorded gradient to the accumulators and
    /// consumes the record.
    pub fn accumulate(&mut self, scale: f64) {
        self.ensure_grads();
        if self.has_tape() {
            self.grad_weights.add_scaled(&self.tape_weights, scale);
            self.grad_biases.add_scaled(&self.tape_biases, scale);
        }
        self.tape_weights = Matrix::default();
        self.tape_biases = Matrix::default();
    }

    pub fn parameters(&mut self) -> Vec<Param<'_>> {
        self.ensure_grads();
        vec![
            Param { value: &mut self.weights, grad: &mut self.grad_weights },
            Param { value: &mut self.biases, grad: &mut self.grad_biases },
        ]
    }

    pub fn num_params(&self) -> usize {
        self.weights.numel() + self.biases.numel()
    }

    /// Accumulators are skipped by serde, so a loaded layer builds them here.
    fn ensure_grads(&mut self) {
        if !self.grad_weights.same_shape(&self.weights) {
            self.grad_weights = Matrix::zeros_like(&self.weights);
        }
        if !self.grad_biases.same_shape(&self.biases) {
            self.grad_biases = Matrix::zeros_like(&self.biases);
        }
    }
}

/// Element-wise (Hadamard) product of two same-shape matrices.
fn hadamard(a: &Matrix, b: &Matrix) -> Matrix {
    let data = a.data.iter().zip(b.data.iter())
        .map(|(row_a, row_b)| {
            row_a.iter().zip(row_b.iter()).map(|(x, y)| x * y).collect()
        })
        .collect();
    Matrix::from_data(data)
}

fn column_sums(m: &Matrix) -> Matrix {
    let mut sums = vec![0.0; m.cols];
    for row in &m.data {
        for (s, x) in sums.iter_mut().zip(row) {
            *s += x;
        }
    }
    Matrix::row_vector(sums)
}

/// Numerically stable softmax of every row.
fn softmax_rows(z: &Matrix) -> Matrix {
    let data = z.data.iter()
        .map(|row| {
            let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let exps: Vec<f64> = row.iter().map(|x| (x - max).exp()).collect();
            let sum: f64 = exps.iter().sum();
            exps.into_iter().map(|e| e / sum).collect()
        })
        .collect();
    Matrix { rows: z.rows, cols: z.cols, data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn identity_layer() -> Layer {
        let mut layer = Layer::new(2, 2, ActivationFunction::Identity);
        layer.weights = Matrix::from_data(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        layer.biases = Matrix::row_vector(vec![0.5, -0.5]);
        layer
    }

    #[test]
    fn test_feed_from_adds_bias_per_row() {
        let mut layer = identity_layer();
        let out = layer.feed_from(&Matrix::from_data(vec![vec![1.0, 2.0], vec![3.0, 4.0]]), false);
        assert_eq!(out.data, vec![vec![1.5, 1.5], vec![3.5, 3.5]]);
        assert!(!layer.has_tape());
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let mut layer = Layer::new(3, 2, ActivationFunction::Softmax);
        let out = layer.feed_from(&Matrix::from_data(vec![vec![1.0, -2.0]]), false);
        assert_relative_eq!(out.data[0].iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_backprop_and_accumulate() {
        let mut layer = identity_layer();
        let x = Matrix::from_data(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        layer.feed_from(&x, true);
        let delta = Matrix::from_data(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let upstream = layer.backprop(&delta);
        assert_eq!(upstream.data, delta.data);
        assert!(layer.has_tape());

        layer.accumulate(2.0);
        assert!(!layer.has_tape());
        let params = layer.parameters();
        // xᵀ·δ = [[1,3],[2,4]], doubled.
        assert_eq!(params[0].grad.data, vec![vec![2.0, 6.0], vec![4.0, 8.0]]);
        assert_eq!(params[1].grad.data, vec![vec![2.0, 2.0]]);
    }

    #[test]
    fn test_deserialized_layer_rebuilds_accumulators() {
        let layer = identity_layer();
        let json = serde_json::to_string(&layer).unwrap();
        let mut back: Layer = serde_json::from_str(&json).unwrap();
        assert_eq!(back.weights, layer.weights);
        let params = back.parameters();
        assert!(params[0].grad.same_shape(params[0].value));
    }
}
