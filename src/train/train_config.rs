use serde::{Serialize, Deserialize};

use crate::error::{Result, TrainError};
use crate::train::checkpoint::Monitor;
use crate::train::strategy::Precision;

/// What happens to the gradients of a trailing partial accumulation group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialGroup {
    /// Only full groups of `accumulate` batches update the parameters; the
    /// remainder is discarded when the next training pass zeroes gradients.
    #[default]
    Drop,
    /// The remainder is applied as one extra update at the end of the pass.
    Flush,
}

/// Configuration for one `Trainer::fit` call.
///
/// # Fields
/// - `epochs`         — training passes to run; `None` runs until the sample
///                      budget or patience stops it
/// - `samples`        — stop once this many training samples were consumed
///                      by this call
/// - `pre_val`        — validate once before the first epoch
/// - `period_val`     — steady-state validation period in epochs (0 = never)
/// - `period_val_beg` — validation period while fewer than `samples_beg`
///                      samples have been trained on
/// - `samples_beg`    — size of that early phase in samples
/// - `period_plot`    — plot + summary period in epochs (0 = never)
/// - `period_points`  — periodic checkpoint period in epochs
/// - `period_call`    — callback period in epochs (0 = never)
/// - `monitor`        — which events write checkpoints / keep best copies
/// - `patience`       — stop after this many epochs without any improvement
/// - `accumulate`     — batches per optimizer update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub epochs: Option<usize>,
    pub samples: Option<usize>,
    pub pre_val: bool,
    pub period_val: usize,
    pub period_val_beg: usize,
    pub samples_beg: Option<usize>,
    pub period_plot: usize,
    pub period_points: usize,
    pub period_call: usize,
    pub monitor: Vec<Monitor>,
    pub patience: Option<usize>,
    pub accumulate: usize,
    pub partial_group: PartialGroup,
    pub precision: Precision,
    pub verbose: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        FitConfig {
            epochs: None,
            samples: None,
            pre_val: false,
            period_val: 1,
            period_val_beg: 1,
            samples_beg: None,
            period_plot: 100,
            period_points: 1,
            period_call: 0,
            monitor: Vec::new(),
            patience: None,
            accumulate: 1,
            partial_group: PartialGroup::Drop,
            precision: Precision::Full,
            verbose: true,
        }
    }
}

impl FitConfig {
    /// A run of `epochs` training passes with default cadences.
    pub fn new(epochs: usize) -> Self {
        FitConfig { epochs: Some(epochs), ..FitConfig::default() }
    }

    pub fn samples(mut self, samples: usize) -> Self {
        self.samples = Some(samples);
        self
    }

    pub fn pre_val(mut self, pre_val: bool) -> Self {
        self.pre_val = pre_val;
        self
    }

    pub fn period_val(mut self, period: usize) -> Self {
        self.period_val = period;
        self
    }

    /// Validate every `period` epochs during the first `samples_beg` samples.
    pub fn early_validation(mut self, period: usize, samples_beg: usize) -> Self {
        self.period_val_beg = period;
        self.samples_beg = Some(samples_beg);
        self
    }

    pub fn period_plot(mut self, period: usize) -> Self {
        self.period_plot = period;
        self
    }

    pub fn period_points(mut self, period: usize) -> Self {
        self.period_points = period;
        self
    }

    pub fn period_call(mut self, period: usize) -> Self {
        self.period_call = period;
        self
    }

    pub fn monitor(mut self, monitor: &[Monitor]) -> Self {
        self.monitor = monitor.to_vec();
        self
    }

    pub fn patience(mut self, patience: usize) -> Self {
        self.patience = Some(patience);
        self
    }

    pub fn accumulate(mut self, batches: usize) -> Self {
        self.accumulate = batches;
        self
    }

    pub fn partial_group(mut self, policy: PartialGroup) -> Self {
        self.partial_group = policy;
        self
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn monitors(&self, monitor: Monitor) -> bool {
        self.monitor.contains(&monitor)
    }

    /// Rejects values no run can honour. Called before the first epoch.
    pub fn validate(&self) -> Result<()> {
        if self.accumulate == 0 {
            return Err(TrainError::config("accumulate", "must be at least 1, got 0"));
        }
        if self.epochs == Some(0) {
            return Err(TrainError::config("epochs", "must be positive when given, got 0"));
        }
        if self.samples == Some(0) {
            return Err(TrainError::config("samples", "must be positive when given, got 0"));
        }
        if let Precision::Scaled { init_scale, .. } = self.precision {
            if !(init_scale.is_finite() && init_scale > 0.0) {
                return Err(TrainError::config(
                    "precision",
                    format!("init_scale must be a positive number, got {init_scale}"),
                ));
            }
        }
        Ok(())
    }

    /// Serializes the config to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a config from JSON; missing fields take their defaults.
    pub fn load_json(path: &str) -> Result<FitConfig> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let config: FitConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}
