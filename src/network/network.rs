use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::data::Batch;
use crate::error::{Result, TrainError};
use crate::layers::Layer;
use crate::math::Matrix;
use crate::model::{Model, Param, Prediction, Score, StepCapabilities, StepOutput};
use crate::network::config::MlpConfig;

/// Multilayer perceptron trained on `(inputs, targets)` batches.
///
/// Reports the batch-mean loss of its `MlpConfig::loss` and, for
/// cross-entropy, the batch accuracy as its score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub config: MlpConfig,
    pub layers: Vec<Layer>,
    #[serde(skip)]
    training: bool,
}

impl Network {
    pub fn new(config: MlpConfig) -> Result<Network> {
        config.build()
    }

    pub(crate) fn from_layers(config: MlpConfig, layers: Vec<Layer>) -> Network {
        Network { config, layers, training: false }
    }

    /// Forward pass over a batch with one sample per row. Nothing is recorded.
    pub fn forward(&mut self, input: &Matrix) -> Result<Matrix> {
        self.run(input, false)
    }

    fn run(&mut self, input: &Matrix, record: bool) -> Result<Matrix> {
        if input.cols != self.config.input {
            return Err(TrainError::Model(format!(
                "expected {} input features, got {}",
                self.config.input, input.cols
            )));
        }
        let mut current = input.clone();
        for layer in &mut self.layers {
            current = layer.feed_from(&current, record);
        }
        Ok(current)
    }

    /// Serializes the network (config and weights) to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a network from a JSON file previously written by `save_json`.
    pub fn load_json(path: &str) -> Result<Network> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// The `(inputs, targets)` arrays of a batch.
fn split(batch: &Batch) -> Result<(&Matrix, &Matrix)> {
    match (batch.get(0).and_then(Batch::as_array), batch.get(1).and_then(Batch::as_array)) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(TrainError::UnrecognizedBatch(
            "expected an (inputs, targets) pair of arrays".to_string(),
        )),
    }
}

/// Index of the maximum element in a slice.
fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

impl Model for Network {
    fn capabilities(&self) -> StepCapabilities {
        StepCapabilities { training_step: true, validation_step: false, predict_step: true }
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn training_step(&mut self, batch: &Batch, _batch_id: usize) -> Result<StepOutput> {
        let (x, y) = split(batch)?;
        if y.rows != x.rows || y.cols != self.config.output {
            return Err(TrainError::Model(format!(
                "targets are {}x{}, expected {}x{}",
                y.rows, y.cols, x.rows, self.config.output
            )));
        }
        let pred = self.run(x, self.training)?;
        let n = x.rows.max(1) as f64;
        let loss_fn = self.config.loss;

        let loss = pred.data.iter().zip(&y.data)
            .map(|(p, t)| loss_fn.loss(p, t))
            .sum::<f64>() / n;

        let score = if loss_fn.is_classification() {
            let correct = pred.data.iter().zip(&y.data)
                .filter(|(p, t)| argmax(p) == argmax(t))
                .count();
            Some(Score::Scalar(correct as f64 / n))
        } else {
            None
        };

        if self.training {
            let mut delta = Matrix::from_data(
                pred.data.iter().zip(&y.data)
                    .map(|(p, t)| loss_fn.derivative(p, t).into_iter().map(|d| d / n).collect())
                    .collect(),
            );
            for layer in self.layers.iter_mut().rev() {
                delta = layer.backprop(&delta);
            }
        }

        Ok(StepOutput { loss, score })
    }

    fn predict_step(&mut self, batch: &Batch, _batch_id: usize) -> Result<Prediction> {
        let x = match batch {
            Batch::Array(x) => x,
            nested => nested.get(0).and_then(Batch::as_array).ok_or_else(|| {
                TrainError::UnrecognizedBatch("expected an input array".to_string())
            })?,
        };
        let out = self.forward(x)?;
        Ok(Prediction::from([("output".to_string(), out)]))
    }

    fn backward(&mut self, scale: f64) -> Result<()> {
        if !self.layers.iter().all(Layer::has_tape) {
            return Err(TrainError::StateMismatch(
                "backward called without a recorded training step".to_string(),
            ));
        }
        for layer in &mut self.layers {
            layer.accumulate(scale);
        }
        Ok(())
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        self.layers.iter_mut().flat_map(|layer| layer.parameters()).collect()
    }

    fn num_params(&self) -> usize {
        self.layers.iter().map(Layer::num_params).sum()
    }

    fn config(&self) -> Value {
        serde_json::to_value(&self.config).unwrap_or(Value::Null)
    }

    fn state_dict(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.layers)?)
    }

    fn load_state_dict(&mut self, state: &Value) -> Result<()> {
        let layers: Vec<Layer> = serde_json::from_value(state.clone())?;
        let same = layers.len() == self.layers.len()
            && layers.iter().zip(&self.layers).all(|(a, b)| {
                a.weights.same_shape(&b.weights) && a.biases.same_shape(&b.biases)
            });
        if !same {
            return Err(TrainError::StateMismatch(
                "stored parameters do not match the network architecture".to_string(),
            ));
        }
        self.layers = layers;
        Ok(())
    }
}
