use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::batch::Batch;
use crate::data::source::DataSource;
use crate::error::{Result, TrainError};
use crate::math::Matrix;

/// In-memory samples served as mini-batches.
///
/// Labelled datasets yield `Batch::pair(inputs, targets)`; unlabelled ones
/// (for `predict`) yield a bare `Batch::Array`.
pub struct Dataset {
    inputs: Vec<Vec<f64>>,
    labels: Option<Vec<Vec<f64>>>,
    batch_size: usize,
    shuffle: bool,
    whole: bool,
    seed: Option<u64>,
    rng: StdRng,
}

impl Dataset {
    pub fn new(inputs: Vec<Vec<f64>>, labels: Vec<Vec<f64>>, batch_size: usize) -> Result<Dataset> {
        if inputs.len() != labels.len() {
            return Err(TrainError::config(
                "labels",
                format!("{} inputs but {} labels", inputs.len(), labels.len()),
            ));
        }
        Dataset::build(inputs, Some(labels), batch_size)
    }

    pub fn unlabeled(inputs: Vec<Vec<f64>>, batch_size: usize) -> Result<Dataset> {
        Dataset::build(inputs, None, batch_size)
    }

    fn build(inputs: Vec<Vec<f64>>, labels: Option<Vec<Vec<f64>>>, batch_size: usize) -> Result<Dataset> {
        if batch_size == 0 {
            return Err(TrainError::config("batch_size", "must be at least 1"));
        }
        Ok(Dataset {
            inputs,
            labels,
            batch_size,
            shuffle: false,
            whole: false,
            seed: None,
            rng: StdRng::from_entropy(),
        })
    }

    /// Shuffle sample order at the start of every pass.
    pub fn shuffled(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Makes shuffling reproducible; `reset()` rewinds to this seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_whole(mut self, whole: bool) -> Self {
        self.whole = whole;
        self
    }

    /// Number of samples.
    pub fn samples(&self) -> usize {
        self.inputs.len()
    }
}

impl DataSource for Dataset {
    fn len(&self) -> usize {
        let n = self.inputs.len();
        if self.whole {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_> {
        let mut order: Vec<usize> = (0..self.inputs.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let n_batches = self.len();
        let batch_size = self.batch_size;
        let inputs = &self.inputs;
        let labels = self.labels.as_ref();

        Box::new((0..n_batches).map(move |b| {
            let start = b * batch_size;
            let end = (start + batch_size).min(order.len());
            let idx = &order[start..end];
            let x = Matrix::from_data(idx.iter().map(|&i| inputs[i].clone()).collect());
            match labels {
                Some(labels) => {
                    let y = Matrix::from_data(idx.iter().map(|&i| labels[i].clone()).collect());
                    Batch::pair(x, y)
                }
                None => Batch::Array(x),
            }
        }))
    }

    fn reset(&mut self) {
        if let Some(seed) = self.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
    }

    fn set_batch_size(&mut self, batch_size: usize) {
        if batch_size > 0 {
            self.batch_size = batch_size;
        }
    }

    fn set_whole(&mut self, whole: bool) {
        self.whole = whole;
    }

    fn whole(&self) -> bool {
        self.whole
    }
}
