use serde::{Serialize, Deserialize};

use crate::activation::ActivationFunction;
use crate::error::{Result, TrainError};
use crate::layers::Layer;
use crate::loss::LossType;
use crate::network::network::Network;

fn default_fun() -> String {
    "gelu".to_string()
}

/// A fully serializable description of a multilayer perceptron.
///
/// Fields:
/// - `input`   — number of inputs (> 0)
/// - `output`  — number of outputs (> 0)
/// - `hidden`  — neurons of each hidden layer; empty means none
/// - `stretch` — when `hidden` is empty, one hidden layer of
///               `floor(stretch * input)` neurons (none if that is 0)
/// - `fun`     — hidden activation: gelu, relu, sigmoid, tanh, relu6, swish,
///               hswish, hsigmoid; anything else falls back to gelu
/// - `loss`    — training loss, which also fixes the output activation
///
/// `MlpConfig` is stored in every checkpoint so a run can be rebuilt before
/// its parameters are loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    pub input: usize,
    pub output: usize,
    #[serde(default)]
    pub hidden: Vec<usize>,
    #[serde(default)]
    pub stretch: Option<f64>,
    #[serde(default = "default_fun")]
    pub fun: String,
    pub loss: LossType,
}

impl MlpConfig {
    pub fn new(input: usize, output: usize, loss: LossType) -> MlpConfig {
        MlpConfig { input, output, hidden: Vec::new(), stretch: None, fun: default_fun(), loss }
    }

    pub fn hidden(mut self, hidden: &[usize]) -> Self {
        self.hidden = hidden.to_vec();
        self
    }

    pub fn stretch(mut self, stretch: f64) -> Self {
        self.stretch = Some(stretch);
        self
    }

    pub fn fun(mut self, fun: &str) -> Self {
        self.fun = fun.to_string();
        self
    }

    /// Layer widths from input to output.
    pub fn neurons(&self) -> Vec<usize> {
        let mut neurons = vec![self.input];
        if !self.hidden.is_empty() {
            neurons.extend(&self.hidden);
        } else if let Some(stretch) = self.stretch {
            let hidden = (stretch * self.input as f64).floor();
            if hidden >= 1.0 {
                neurons.push(hidden as usize);
            }
        }
        neurons.push(self.output);
        neurons
    }

    pub fn build(&self) -> Result<Network> {
        if self.input == 0 || self.output == 0 {
            return Err(TrainError::config(
                "mlp",
                format!("wrong input/output: {}/{}", self.input, self.output),
            ));
        }
        if self.hidden.contains(&0) {
            return Err(TrainError::config("hidden", format!("zero-width layer in {:?}", self.hidden)));
        }
        if let Some(stretch) = self.stretch {
            if !(stretch.is_finite() && stretch >= 0.0) {
                return Err(TrainError::config("stretch", format!("must be finite and >= 0, got {stretch}")));
            }
        }

        let fun = ActivationFunction::from_name(&self.fun);
        let neurons = self.neurons();
        let last = neurons.len() - 1;
        let layers = (1..neurons.len())
            .map(|i| {
                let activation = if i == last { self.loss.head() } else { fun };
                Layer::new(neurons[i], neurons[i - 1], activation)
            })
            .collect();
        Ok(Network::from_layers(self.clone(), layers))
    }

    /// Serializes the config to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes an `MlpConfig` from a JSON file.
    pub fn load_json(path: &str) -> Result<MlpConfig> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neurons_from_hidden_list() {
        let cfg = MlpConfig::new(3, 1, LossType::Mse).hidden(&[128, 512]);
        assert_eq!(cfg.neurons(), vec![3, 128, 512, 1]);
    }

    #[test]
    fn test_neurons_from_stretch() {
        let cfg = MlpConfig::new(32, 1, LossType::Mse).stretch(4.0);
        assert_eq!(cfg.neurons(), vec![32, 128, 1]);
        let none = MlpConfig::new(32, 1, LossType::Mse).stretch(0.0);
        assert_eq!(none.neurons(), vec![32, 1]);
    }

    #[test]
    fn test_build_uses_loss_head() {
        let net = MlpConfig::new(4, 3, LossType::CrossEntropy).hidden(&[5]).fun("relu").build().unwrap();
        assert_eq!(net.layers.len(), 2);
        assert_eq!(net.layers[0].activator, ActivationFunction::ReLU);
        assert_eq!(net.layers[1].activator, ActivationFunction::Softmax);
    }

    #[test]
    fn test_unknown_activation_falls_back_to_gelu() {
        let net = MlpConfig::new(2, 1, LossType::Mse).hidden(&[3]).fun("bogus").build().unwrap();
        assert_eq!(net.layers[0].activator, ActivationFunction::Gelu);
    }

    #[test]
    fn test_zero_output_is_rejected() {
        assert!(MlpConfig::new(2, 0, LossType::Mse).build().is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let cfg: MlpConfig = serde_json::from_str(r#"{"input": 2, "output": 1, "loss": "mse"}"#).unwrap();
        assert_eq!(cfg.fun, "gelu");
        assert!(cfg.hidden.is_empty());
    }
}
