use std::collections::btree_map::Entry;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Instant;

use chrono::Local;

use crate::data::DataSource;
use crate::error::{Result, TrainError};
use crate::model::{Model, Prediction};
use crate::optim::{Optimizer, Scheduler, SchedulerChain};
use crate::train::checkpoint::{self, Checkpoint, CheckpointPolicy, Monitor};
use crate::train::epoch::{fit_epoch, Pass, Transforms};
use crate::train::history::{Direction, EpochResult, History, Improved, Mode, Times, TrainingClock};
use crate::train::progress::{Progress, ProgressReporter};
use crate::train::strategy::StepStrategy;
use crate::train::train_config::FitConfig;
use crate::train::view::ViewConfig;

/// Renders the history, e.g. to a chart file or a dashboard.
pub trait Plotter {
    fn plot(&mut self, hist: &History, view: &ViewConfig) -> Result<()>;
}

/// Training and validation sources.
#[derive(Default)]
pub struct DataSources {
    pub trn: Option<Box<dyn DataSource>>,
    pub val: Option<Box<dyn DataSource>>,
}

/// In-memory copies of the model taken at validation improvements.
#[derive(Debug, Clone)]
pub struct BestModels<M> {
    pub loss: Option<M>,
    pub score: Option<M>,
}

impl<M> Default for BestModels<M> {
    fn default() -> Self {
        BestModels { loss: None, score: None }
    }
}

/// Why a `fit` call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EpochBudget,
    SampleBudget,
    Patience,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub stop_reason: StopReason,
    /// Training epochs completed by this call.
    pub epochs_run: usize,
    pub summary: Summary,
}

/// Best metrics and timing of the whole run.
///
/// Reports the validation bests when the run has been validated, else the
/// training bests.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub validated: bool,
    pub best_loss: Option<f64>,
    pub best_score: Option<f64>,
    pub clock: TrainingClock,
    pub time: Times,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.clock;
        let kind = if self.validated { "valuation" } else { "training" };
        let loss = self.best_loss.map_or_else(|| "???".to_string(), |l| format!("{l:.6}"));
        match self.best_score {
            Some(score) => write!(f, "{kind} score={score:.6}, loss={loss};")?,
            None => write!(f, "{kind} loss={loss};")?,
        }
        writeln!(f, "  epochs={}, samples={}, steps={}", c.epochs, c.samples, c.steps)?;

        let per = |total: f64, scale: f64, n: usize| {
            if n > 0 { format!("{:.2}", total * scale / n as f64) } else { "???".to_string() }
        };
        write!(
            f,
            "times=(trn:{:.2}, val:{:.2})m,  {} s/epoch, {} s/10^3 steps,  {} s/10^6 samples",
            self.time.trn / 60.0,
            self.time.val / 60.0,
            per(self.time.trn, 1.0, c.epochs),
            per(self.time.trn, 1e3, c.steps),
            per(self.time.trn, 1e6, c.samples),
        )
    }
}

/// Options of `Trainer::predict`.
#[derive(Debug, Clone, Default)]
pub struct PredictOptions {
    /// Skip a trailing fractional batch.
    pub whole: bool,
    /// Batch size for this call only; the source's own is restored afterwards.
    pub batch_size: Option<usize>,
    /// Stop after this many batches; `Some(0)` runs them all.
    pub n_batches: Option<usize>,
    pub verbose: bool,
}

/// Drives a model through epochs of training and validation.
///
/// All run state (clock, history, best trackers, scheduler progress) lives on
/// the trainer, so a second `fit` continues where the first one stopped.
pub struct Trainer<M: Model> {
    pub model: M,
    optimizer: Option<Box<dyn Optimizer>>,
    schedulers: SchedulerChain,
    pub data: DataSources,
    pub hist: History,
    pub best: BestModels<M>,
    pub checkpoints: CheckpointPolicy,
    pub transforms: Transforms,
    pub view: ViewConfig,
    plotter: Option<Box<dyn Plotter>>,
    progress_tx: Option<mpsc::Sender<Progress>>,
}

impl<M: Model + Clone> Trainer<M> {
    /// `score_max` fixes whether a larger score is better for this run.
    pub fn new(model: M, score_max: bool) -> Self {
        let params = model.num_params();
        Trainer {
            model,
            optimizer: None,
            schedulers: SchedulerChain::new(0.0),
            data: DataSources::default(),
            hist: History::new(Direction::score(score_max), params),
            best: BestModels::default(),
            checkpoints: CheckpointPolicy::default(),
            transforms: Transforms::default(),
            view: ViewConfig::default(),
            plotter: None,
            progress_tx: None,
        }
    }

    pub fn with_train_data(mut self, data: impl DataSource + 'static) -> Self {
        self.data.trn = Some(Box::new(data));
        self
    }

    pub fn with_val_data(mut self, data: impl DataSource + 'static) -> Self {
        self.data.val = Some(Box::new(data));
        self
    }

    pub fn with_optimizer(mut self, optim: impl Optimizer + 'static) -> Self {
        self.set_optimizer(optim);
        self
    }

    pub fn set_optimizer(&mut self, optim: impl Optimizer + 'static) {
        self.schedulers.set_default_lr(optim.lr());
        self.optimizer = Some(Box::new(optim));
    }

    pub fn optimizer(&self) -> Option<&dyn Optimizer> {
        self.optimizer.as_deref()
    }

    /// Write checkpoints of `monitor` events into `folder`.
    pub fn set_checkpoint_folder(&mut self, monitor: Monitor, folder: impl Into<PathBuf>) {
        self.checkpoints.set_folder(monitor, folder);
    }

    pub fn set_plotter(&mut self, plotter: impl Plotter + 'static) {
        self.plotter = Some(Box::new(plotter));
    }

    /// Sends a `Progress` event at most once a second per pass and for every
    /// final batch.
    pub fn set_progress_channel(&mut self, tx: mpsc::Sender<Progress>) {
        self.progress_tx = Some(tx);
    }

    pub fn add_label(&mut self, text: impl Into<String>) {
        self.hist.add_label(text);
    }

    // ── Learning-rate phases ────────────────────────────────────────────────

    pub fn schedulers(&self) -> &SchedulerChain {
        &self.schedulers
    }

    /// Replaces every phase with `scheduler` and applies its starting rate now.
    pub fn set_scheduler(&mut self, scheduler: Scheduler) {
        self.clear_schedulers();
        if let Some(lr) = scheduler.lr1() {
            if let Some(optim) = self.optimizer.as_mut() {
                optim.set_lr(lr);
            }
            self.schedulers.set_default_lr(lr);
        }
        self.schedulers.push(scheduler);
    }

    pub fn add_scheduler(&mut self, scheduler: Scheduler) {
        self.schedulers.push(scheduler);
    }

    pub fn del_scheduler(&mut self, index: usize) -> Option<Scheduler> {
        self.schedulers.remove(index)
    }

    pub fn clear_schedulers(&mut self) {
        self.schedulers.clear();
        if let Some(optim) = &self.optimizer {
            self.schedulers.set_default_lr(optim.lr());
        }
    }

    pub fn reset_schedulers(&mut self) {
        self.schedulers.reset();
    }

    pub fn stop_schedulers(&mut self) {
        self.schedulers.stop();
    }

    /// Advances the acting phase; a finished phase leaves a history label.
    fn step_schedulers(&mut self, epochs: usize, samples: usize) {
        let Some(optim) = self.optimizer.as_deref_mut() else {
            return;
        };
        if let Some(ended) = self.schedulers.step(epochs, samples, optim) {
            tracing::info!(phase = %ended.name, index = ended.index, lr = self.schedulers.get_lr(), "scheduler phase finished");
            self.hist.add_label(ended.name);
        }
    }

    // ── Training ────────────────────────────────────────────────────────────

    pub fn fit(&mut self, cfg: &FitConfig) -> Result<FitOutcome> {
        self.fit_with_callback(cfg, None)
    }

    /// Runs epochs until the epoch budget, the sample budget or patience
    /// stops the run. `callback` is called every `period_call` epochs and
    /// once more when the sample budget is reached.
    pub fn fit_with_callback(
        &mut self,
        cfg: &FitConfig,
        mut callback: Option<&mut dyn FnMut(&History)>,
    ) -> Result<FitOutcome> {
        let Some(optim) = self.optimizer.as_deref() else {
            return Err(TrainError::MissingOptimizer);
        };
        if self.data.trn.is_none() {
            return Err(TrainError::MissingTrainData);
        }
        cfg.validate()?;

        self.schedulers.set_default_lr(optim.lr());
        self.hist.params = self.model.num_params();
        if let Some(val) = self.data.val.as_mut() {
            val.reset();
        }
        if let Some(trn) = self.data.trn.as_mut() {
            trn.reset();
        }
        let mut strategy = StepStrategy::select(cfg.precision);
        tracing::debug!(epochs = ?cfg.epochs, samples = ?cfg.samples, params = self.hist.params, "fit started");

        if cfg.pre_val && self.data.val.is_some() {
            let (result, batch_size) = self.run_pass(Pass::validate(0), &mut strategy, cfg.verbose)?;
            let lr = self.schedulers.get_lr();
            self.hist.record_baseline(batch_size, lr, &result);
        }

        let mut last_best = 0usize;
        let mut consumed = 0usize;
        let mut epoch = 0usize;
        let stop_reason = loop {
            epoch += 1;
            let final_epoch = cfg.epochs == Some(epoch);

            let pass = Pass::train(epoch, cfg.accumulate, cfg.partial_group);
            let (trn, batch_size) = self.run_pass(pass, &mut strategy, cfg.verbose)?;
            let lr = self.schedulers.get_lr();
            if self.hist.commit(Mode::Train, batch_size, lr, &trn).any() {
                last_best = epoch;
            }

            if self.data.val.is_some() && validation_due(cfg, epoch, self.hist.clock.samples) {
                let (val, batch_size) = self.run_pass(Pass::validate(epoch), &mut strategy, cfg.verbose)?;
                let improved = self.hist.commit(Mode::Validate, batch_size, lr, &val);
                if improved.any() {
                    last_best = epoch;
                    self.on_val_improved(improved, &val, &cfg.monitor)?;
                }
            }

            if cfg.period_plot > 0 && (epoch % cfg.period_plot == 0 || final_epoch) {
                self.report(cfg.verbose)?;
            }

            if cfg.monitors(Monitor::Points)
                && cfg.period_points > 0
                && (epoch % cfg.period_points == 0 || final_epoch)
            {
                self.save_points(&trn, &cfg.monitor)?;
            }

            if cfg.period_call > 0 && epoch % cfg.period_call == 0 {
                if let Some(cb) = callback.as_deref_mut() {
                    cb(&self.hist);
                }
            }

            self.step_schedulers(1, trn.samples);

            if let Some(budget) = cfg.samples {
                consumed += trn.samples;
                if consumed >= budget {
                    self.report(cfg.verbose)?;
                    if let Some(cb) = callback.as_deref_mut() {
                        cb(&self.hist);
                    }
                    break StopReason::SampleBudget;
                }
            }

            if let Some(patience) = cfg.patience.filter(|&p| p > 0) {
                if epoch - last_best > patience {
                    tracing::info!(
                        patience,
                        epoch,
                        best_val_score_epochs = self.hist.val.best.score.epochs,
                        best_val_loss_epochs = self.hist.val.best.loss.epochs,
                        "stop on patience"
                    );
                    break StopReason::Patience;
                }
            }

            if final_epoch {
                break StopReason::EpochBudget;
            }
        };

        let summary = self.stat();
        if cfg.verbose {
            println!("{summary}");
        }
        Ok(FitOutcome { stop_reason, epochs_run: epoch, summary })
    }

    /// One pass over the training or validation source.
    fn run_pass(&mut self, pass: Pass, strategy: &mut StepStrategy, verbose: bool) -> Result<(EpochResult, usize)> {
        let mut reporter = ProgressReporter::new(verbose, &self.view, self.progress_tx.clone());
        let (data, transform) = match pass.mode {
            Mode::Train => (self.data.trn.as_deref_mut(), &mut self.transforms.trn),
            Mode::Validate => (self.data.val.as_deref_mut(), &mut self.transforms.val),
        };
        let data = match data {
            Some(data) => data,
            None if pass.mode.is_train() => return Err(TrainError::MissingTrainData),
            None => return Err(TrainError::config("data.val", "no validation source")),
        };
        let batch_size = data.batch_size();
        let optim: Option<&mut dyn Optimizer> = match (pass.mode, self.optimizer.as_mut()) {
            (Mode::Train, Some(optim)) => Some(&mut **optim),
            _ => None,
        };

        let out = fit_epoch(&mut self.model, data, optim, strategy, transform, &mut reporter, pass)?;
        tracing::debug!(
            mode = %pass.mode,
            epoch = pass.epoch,
            loss = out.result.loss,
            samples = out.result.samples,
            steps = out.result.steps,
            "pass finished"
        );
        Ok((out.result, batch_size))
    }

    /// Saves and/or keeps the model for each monitored validation improvement.
    fn on_val_improved(&mut self, improved: Improved, val: &EpochResult, monitors: &[Monitor]) -> Result<()> {
        if improved.loss {
            if let Some(folder) = self.checkpoints.destination(Monitor::Loss, monitors).map(Path::to_path_buf) {
                let path = self.save(&folder, &checkpoint::best_stem(Monitor::Loss, val.loss), "")?;
                tracing::info!(path = %path.display(), loss = val.loss, "saved best validation loss");
            }
            if self.checkpoints.keeps_copy(Monitor::Loss, monitors) {
                self.best.loss = Some(self.model.clone());
            }
        }
        if improved.score {
            if let Some(score) = val.primary_score() {
                if let Some(folder) = self.checkpoints.destination(Monitor::Score, monitors).map(Path::to_path_buf) {
                    let path = self.save(&folder, &checkpoint::best_stem(Monitor::Score, score), "")?;
                    tracing::info!(path = %path.display(), score, "saved best validation score");
                }
            }
            if self.checkpoints.keeps_copy(Monitor::Score, monitors) {
                self.best.score = Some(self.model.clone());
            }
        }
        Ok(())
    }

    fn save_points(&mut self, trn: &EpochResult, monitors: &[Monitor]) -> Result<()> {
        let Some(folder) = self.checkpoints.destination(Monitor::Points, monitors).map(Path::to_path_buf) else {
            return Ok(());
        };
        let stem = checkpoint::points_stem(
            self.hist.val.scores.last().copied().unwrap_or(0.0),
            trn.primary_score().unwrap_or(0.0),
            self.hist.val.losses.last().copied(),
            trn.loss,
        );
        let path = self.save(&folder, &stem, "")?;
        tracing::debug!(path = %path.display(), "saved points checkpoint");
        Ok(())
    }

    fn report(&mut self, verbose: bool) -> Result<()> {
        self.plot()?;
        if verbose {
            println!("{}", self.stat());
        }
        Ok(())
    }

    /// Hands the history to the plotter, if one is attached.
    pub fn plot(&mut self) -> Result<()> {
        match self.plotter.as_mut() {
            Some(plotter) => plotter.plot(&self.hist, &self.view),
            None => Ok(()),
        }
    }

    pub fn stat(&self) -> Summary {
        let validated = !self.hist.val.is_empty();
        let best = &self.hist.track(if validated { Mode::Validate } else { Mode::Train }).best;
        Summary {
            validated,
            best_loss: best.loss.value,
            best_score: best.score.value,
            clock: self.hist.clock,
            time: self.hist.time,
        }
    }

    // ── Checkpoints ─────────────────────────────────────────────────────────

    /// Writes the current run state to `<folder>/<stem>.json` (with a numeric
    /// suffix if that name exists) and returns the path.
    pub fn save(&self, folder: impl AsRef<Path>, stem: &str, info: &str) -> Result<PathBuf> {
        let record = Checkpoint {
            info: info.to_string(),
            date: Local::now(),
            config: self.model.config(),
            model: self.model.state_dict()?,
            optimizer: self.optimizer.as_ref().map(|o| o.state_dict()).transpose()?,
            hist: self.hist.clone(),
            view: self.view.clone(),
        };
        record.write(folder.as_ref(), stem)
    }

    /// Restores model parameters, optimizer state, history and view from a
    /// checkpoint, so the next `fit` continues that run. Returns the record's info.
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<String> {
        let record = Checkpoint::read(path.as_ref())?;
        self.model.load_state_dict(&record.model)?;
        match (self.optimizer.as_mut(), record.optimizer.as_ref()) {
            (Some(optim), Some(state)) => {
                optim.load_state_dict(state)?;
                self.schedulers.set_default_lr(optim.lr());
            }
            (None, Some(_)) => tracing::warn!("checkpoint has optimizer state but no optimizer is set"),
            _ => {}
        }
        self.hist = record.hist;
        self.view = record.view;
        tracing::info!(path = %path.as_ref().display(), epochs = self.hist.clock.epochs, "checkpoint loaded");
        Ok(record.info)
    }

    // ── Inference ───────────────────────────────────────────────────────────

    /// Runs the model's predict step over `data`, stacking each named output
    /// along the sample axis.
    pub fn predict(&mut self, data: &mut dyn DataSource, options: &PredictOptions) -> Result<Prediction> {
        predict_with(&mut self.model, &mut self.transforms, data, options)
    }

    /// Like `predict`, with the copy kept at the best validation `monitor`.
    pub fn predict_best(&mut self, monitor: Monitor, data: &mut dyn DataSource, options: &PredictOptions) -> Result<Prediction> {
        let model = match monitor {
            Monitor::Loss => self.best.loss.as_mut(),
            Monitor::Score => self.best.score.as_mut(),
            Monitor::Points => None,
        };
        let Some(model) = model else {
            return Err(TrainError::StateMismatch(format!("no best model kept for {monitor:?}")));
        };
        predict_with(model, &mut self.transforms, data, options)
    }
}

/// Validation runs on the early period while the clock is below
/// `samples_beg`, on the steady period, and on the final epoch.
fn validation_due(cfg: &FitConfig, epoch: usize, clock_samples: usize) -> bool {
    let early = cfg.samples_beg.is_some_and(|beg| clock_samples < beg)
        && cfg.period_val_beg > 0
        && epoch % cfg.period_val_beg == 0;
    let steady = cfg.period_val > 0 && epoch % cfg.period_val == 0;
    early || steady || cfg.epochs == Some(epoch)
}

fn predict_with<N: Model + ?Sized>(
    model: &mut N,
    transforms: &mut Transforms,
    data: &mut dyn DataSource,
    options: &PredictOptions,
) -> Result<Prediction> {
    if !model.capabilities().predict_step {
        return Err(TrainError::MissingStep { step: "predict_step" });
    }
    model.set_training(false);

    let whole = data.whole();
    data.set_whole(options.whole);
    let batch_size = options.batch_size.map(|bs| {
        let saved = data.batch_size();
        data.set_batch_size(bs);
        saved
    });

    let result = predict_batches(model, transforms, data, options);

    data.set_whole(whole);
    if let Some(bs) = batch_size {
        data.set_batch_size(bs);
    }
    result
}

fn predict_batches<N: Model + ?Sized>(
    model: &mut N,
    transforms: &mut Transforms,
    data: &mut dyn DataSource,
    options: &PredictOptions,
) -> Result<Prediction> {
    let transform = if transforms.tst.is_some() { &mut transforms.tst } else { &mut transforms.val };
    let total = data.len();
    let limit = options.n_batches.filter(|&n| n > 0).map_or(total, |n| n.min(total));
    let start = Instant::now();
    let mut last = Instant::now();
    let mut res = Prediction::new();

    for (batch_id, batch) in data.batches().enumerate().take(limit) {
        let batch = match transform.as_mut() {
            Some(f) => f(batch, batch_id),
            None => batch,
        };
        for (name, out) in model.predict_step(&batch, batch_id)? {
            match res.entry(name) {
                Entry::Vacant(e) => {
                    e.insert(out);
                }
                Entry::Occupied(mut e) => {
                    if e.get().cols != out.cols {
                        return Err(TrainError::StateMismatch(format!(
                            "prediction `{}` changed width from {} to {}",
                            e.key(), e.get().cols, out.cols
                        )));
                    }
                    e.get_mut().vstack(&out);
                }
            }
        }

        if options.verbose && (last.elapsed().as_secs_f64() > 1.0 || batch_id + 1 == limit) {
            last = Instant::now();
            print!("\r[{:3.0}%]  {:.2}m ", 100.0 * (batch_id + 1) as f64 / limit.max(1) as f64, start.elapsed().as_secs_f64() / 60.0);
            let _ = std::io::stdout().flush();
        }
    }

    if options.verbose {
        println!(" keys: {:?}", res.keys().collect::<Vec<_>>());
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_cadence_with_early_phase() {
        let cfg = FitConfig::new(10).early_validation(1, 100).period_val(5);
        let validated: Vec<usize> = (1..=10)
            .filter(|&epoch| validation_due(&cfg, epoch, epoch * 40))
            .collect();
        assert_eq!(validated, vec![1, 2, 5, 10]);
    }

    #[test]
    fn test_zero_period_never_validates_except_final() {
        let cfg = FitConfig::new(3).period_val(0);
        let validated: Vec<usize> = (1..=3).filter(|&e| validation_due(&cfg, e, 0)).collect();
        assert_eq!(validated, vec![3]);
    }

    #[test]
    fn test_summary_formats_both_lines() {
        let summary = Summary {
            validated: true,
            best_loss: Some(0.25),
            best_score: Some(0.9),
            clock: TrainingClock { epochs: 2, samples: 2_000, steps: 20 },
            time: Times { trn: 120.0, val: 60.0 },
        };
        let text = summary.to_string();
        assert!(text.starts_with("valuation score=0.900000, loss=0.250000;  epochs=2, samples=2000, steps=20"));
        assert!(text.contains("times=(trn:2.00, val:1.00)m,  60.00 s/epoch, 6000.00 s/10^3 steps,  60000.00 s/10^6 samples"));
    }

    #[test]
    fn test_summary_without_runs() {
        let summary = Summary {
            validated: false,
            best_loss: None,
            best_score: None,
            clock: TrainingClock::default(),
            time: Times::default(),
        };
        let text = summary.to_string();
        assert!(text.starts_with("training loss=???;"));
        assert!(text.contains("??? s/epoch"));
    }
}
