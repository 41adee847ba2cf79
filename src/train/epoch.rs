use std::time::{Duration, Instant};

use crate::data::{Batch, DataSource};
use crate::error::{Result, TrainError};
use crate::model::{Model, Score, StepKind};
use crate::optim::Optimizer;
use crate::train::history::{EpochResult, Mode};
use crate::train::metrics::MetricAggregator;
use crate::train::progress::{Progress, ProgressReporter};
use crate::train::strategy::StepStrategy;
use crate::train::train_config::PartialGroup;

/// Hook applied to every batch before it reaches the model, e.g. for
/// augmentation. Receives the batch and its index within the pass.
pub type BatchTransform = Box<dyn FnMut(Batch, usize) -> Batch>;

/// Per-mode batch transforms. Prediction prefers `tst` and falls back to `val`.
#[derive(Default)]
pub struct Transforms {
    pub trn: Option<BatchTransform>,
    pub val: Option<BatchTransform>,
    pub tst: Option<BatchTransform>,
}

/// What one pass is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pass {
    /// 1-based epoch number; 0 for a validation before training starts.
    pub epoch: usize,
    pub mode: Mode,
    /// Batches per optimizer update.
    pub accumulate: usize,
    pub partial_group: PartialGroup,
}

impl Pass {
    pub fn train(epoch: usize, accumulate: usize, partial_group: PartialGroup) -> Pass {
        Pass { epoch, mode: Mode::Train, accumulate, partial_group }
    }

    pub fn validate(epoch: usize) -> Pass {
        Pass { epoch, mode: Mode::Validate, accumulate: 1, partial_group: PartialGroup::Drop }
    }
}

/// Everything a completed pass produced.
#[derive(Debug, Clone)]
pub struct EpochOutput {
    /// Per-batch losses, scores and sample counts.
    pub aggregator: MetricAggregator,
    pub result: EpochResult,
}

/// Runs one full pass of `data` through `model`.
///
/// Training passes compute gradients for every batch but only update the
/// parameters (and zero the gradients) after every `accumulate`-th batch;
/// only those batches count as steps. Validation passes run with the model
/// out of training mode and never touch the optimizer.
///
/// Nothing is committed here: the caller folds the returned result into the
/// history once the pass has succeeded.
pub fn fit_epoch<M: Model + ?Sized>(
    model: &mut M,
    data: &mut dyn DataSource,
    optim: Option<&mut dyn Optimizer>,
    strategy: &mut StepStrategy,
    transform: &mut Option<BatchTransform>,
    reporter: &mut ProgressReporter,
    pass: Pass,
) -> Result<EpochOutput> {
    let train = pass.mode.is_train();
    let mut optim = match optim {
        None if train => return Err(TrainError::MissingOptimizer),
        optim => optim,
    };
    if pass.accumulate == 0 {
        return Err(TrainError::config("accumulate", "must be at least 1, got 0"));
    }
    let n_batches = data.len();
    if n_batches == 0 {
        return Err(TrainError::EmptySource { mode: pass.mode.as_str() });
    }

    let kind = StepKind::resolve(model.capabilities(), train)?;
    model.set_training(train);
    if train {
        model.zero_grad();
    }

    let start = Instant::now();
    let mut aggregator = MetricAggregator::new();
    let mut samples = 0usize;
    let mut steps = 0usize;
    let mut pending = 0usize;

    for (batch_id, batch) in data.batches().enumerate() {
        let n = batch.samples()?;
        let batch = match transform.as_mut() {
            Some(f) => f(batch, batch_id),
            None => batch,
        };

        let out = match kind {
            StepKind::Training => model.training_step(&batch, batch_id)?,
            StepKind::Validation => model.validation_step(&batch, batch_id)?,
        };
        let score = out.score.map(Score::into_components).transpose()?;

        if train {
            strategy.backward(model)?;
            pending += 1;
            if (batch_id + 1) % pass.accumulate == 0 {
                if let Some(optim) = optim.as_deref_mut() {
                    if strategy.apply(model, optim) {
                        steps += 1;
                    }
                }
                model.zero_grad();
                pending = 0;
            }
        }

        aggregator.accumulate(out.loss, score, n)?;
        samples += n;

        if reporter.due(batch_id + 1 >= n_batches) {
            reporter.report(progress(&aggregator, pass, batch_id, n_batches, samples, steps, start.elapsed()));
        }
    }

    if train && pending > 0 && pass.partial_group == PartialGroup::Flush {
        if let Some(optim) = optim.as_deref_mut() {
            if strategy.apply(model, optim) {
                steps += 1;
            }
        }
        model.zero_grad();
    }
    reporter.finish();

    let metrics = aggregator
        .reduce()
        .ok_or(TrainError::EmptySource { mode: pass.mode.as_str() })?;
    let result = EpochResult {
        loss: metrics.loss,
        score: metrics.score,
        samples,
        steps,
        elapsed: start.elapsed(),
    };
    Ok(EpochOutput { aggregator, result })
}

fn progress(
    aggregator: &MetricAggregator,
    pass: Pass,
    batch_id: usize,
    n_batches: usize,
    samples: usize,
    steps: usize,
    elapsed: Duration,
) -> Progress {
    let (loss, score) = match aggregator.reduce() {
        Some(m) => (m.loss, m.score),
        None => (0.0, None),
    };
    Progress {
        epoch: pass.epoch,
        mode: pass.mode,
        done: ((batch_id + 1) as f64 / n_batches as f64).min(1.0),
        loss,
        score,
        samples,
        steps,
        elapsed_ms: elapsed.as_millis() as u64,
    }
}
