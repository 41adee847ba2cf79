use std::sync::mpsc;

use serde_json::Value;

use ferrite_trainer::data::{Batch, Dataset};
use ferrite_trainer::model::{Model, Param, Prediction, Score, StepCapabilities, StepOutput};
use ferrite_trainer::optim::{Optimizer, Scheduler, Sgd, Span};
use ferrite_trainer::train::{
    Checkpoint, FitConfig, History, Monitor, PartialGroup, Precision, PredictOptions, StopReason,
    Trainer,
};
use ferrite_trainer::{LossType, Matrix, MlpConfig, Result, TrainError};

/// One parameter `w`; every backward pushes a unit gradient, so plain SGD
/// moves `w` by `-lr` per update. The loss `1 / (1 + |w|)` therefore falls
/// with every update and stays flat when `frozen` is set.
#[derive(Clone)]
struct Drift {
    w: Matrix,
    g: Matrix,
    frozen: bool,
    scored: bool,
    tape: bool,
}

impl Drift {
    fn new() -> Self {
        Drift { w: Matrix::zeros(1, 1), g: Matrix::zeros(1, 1), frozen: false, scored: false, tape: false }
    }

    fn frozen() -> Self {
        Drift { frozen: true, ..Drift::new() }
    }

    fn w(&self) -> f64 {
        self.w.data[0][0]
    }
}

impl Model for Drift {
    fn capabilities(&self) -> StepCapabilities {
        StepCapabilities { training_step: true, validation_step: false, predict_step: true }
    }

    fn set_training(&mut self, training: bool) {
        self.tape = training;
    }

    fn training_step(&mut self, _batch: &Batch, _batch_id: usize) -> Result<StepOutput> {
        let loss = if self.frozen { 1.0 } else { 1.0 / (1.0 + self.w().abs()) };
        Ok(StepOutput { loss, score: self.scored.then(|| Score::Scalar(self.w().abs())) })
    }

    fn predict_step(&mut self, batch: &Batch, _batch_id: usize) -> Result<Prediction> {
        let x = batch.as_array().ok_or_else(|| TrainError::UnrecognizedBatch("array".into()))?;
        Ok([("output".to_string(), x.map(|v| v + 1.0))].into())
    }

    fn backward(&mut self, scale: f64) -> Result<()> {
        if self.tape && !self.frozen {
            self.g.data[0][0] += scale;
        }
        Ok(())
    }

    fn parameters(&mut self) -> Vec<Param<'_>> {
        vec![Param { value: &mut self.w, grad: &mut self.g }]
    }

    fn num_params(&self) -> usize {
        1
    }

    fn config(&self) -> Value {
        serde_json::json!({ "kind": "drift" })
    }

    fn state_dict(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.w)?)
    }

    fn load_state_dict(&mut self, state: &Value) -> Result<()> {
        self.w = serde_json::from_value(state.clone())?;
        Ok(())
    }
}

fn data(samples: usize, batch_size: usize) -> Dataset {
    Dataset::new(vec![vec![0.0]; samples], vec![vec![0.0]; samples], batch_size).unwrap()
}

fn trainer(model: Drift, trn_samples: usize, batch_size: usize) -> Trainer<Drift> {
    Trainer::new(model, true)
        .with_train_data(data(trn_samples, batch_size))
        .with_optimizer(Sgd::new(0.1))
}

fn quiet(epochs: usize) -> FitConfig {
    FitConfig::new(epochs).verbose(false)
}

#[test]
fn test_ten_batches_of_eight() {
    let mut t = trainer(Drift::new(), 80, 8);
    let outcome = t.fit(&quiet(1)).unwrap();
    assert_eq!(outcome.stop_reason, StopReason::EpochBudget);
    assert_eq!(outcome.epochs_run, 1);
    assert_eq!(t.hist.clock.epochs, 1);
    assert_eq!(t.hist.clock.samples, 80);
    assert_eq!(t.hist.clock.steps, 10);
    assert_eq!(t.hist.trn.samples_epoch, vec![80]);
    assert_eq!(t.hist.trn.batch_size, vec![8]);
}

#[test]
fn test_accumulation_boundaries() {
    let mut strict = trainer(Drift::new(), 14, 2);
    strict.fit(&quiet(1).accumulate(3)).unwrap();
    assert_eq!(strict.hist.clock.steps, 2);
    assert!((strict.model.w() + 0.2 * 3.0).abs() < 1e-12);

    let mut flush = trainer(Drift::new(), 14, 2);
    flush.fit(&quiet(1).accumulate(3).partial_group(PartialGroup::Flush)).unwrap();
    assert_eq!(flush.hist.clock.steps, 3);
    assert_eq!(flush.hist.clock.samples, 14);
}

#[test]
fn test_validation_cadence_follows_sample_threshold() {
    let mut t = trainer(Drift::new(), 40, 8).with_val_data(data(16, 8));
    t.fit(&quiet(10).early_validation(1, 100).period_val(5)).unwrap();
    assert_eq!(t.hist.val.epochs, vec![1, 2, 5, 10]);
    assert_eq!(t.hist.trn.len(), 10);
}

#[test]
fn test_pre_val_records_epoch_zero() {
    let mut t = trainer(Drift::new(), 8, 8).with_val_data(data(8, 8));
    t.fit(&quiet(1).pre_val(true)).unwrap();
    assert_eq!(t.hist.val.epochs, vec![0, 1]);
    assert_eq!(t.hist.val.steps_epoch, vec![0, 0]);
}

#[test]
fn test_patience_stops_before_epoch_budget() {
    let mut t = trainer(Drift::frozen(), 8, 4).with_val_data(data(8, 4));
    let outcome = t.fit(&quiet(20).patience(3)).unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Patience);
    // Only epoch 1 improves; 5 - 1 > 3.
    assert_eq!(outcome.epochs_run, 5);
    assert_eq!(t.hist.clock.epochs, 5);
}

#[test]
fn test_patience_resets_on_any_improvement() {
    let mut t = trainer(Drift::new(), 8, 4).with_val_data(data(8, 4));
    let outcome = t.fit(&quiet(8).patience(1)).unwrap();
    assert_eq!(outcome.stop_reason, StopReason::EpochBudget);
    assert_eq!(outcome.epochs_run, 8);
}

#[test]
fn test_sample_budget_is_relative_to_the_call() {
    let mut t = trainer(Drift::new(), 40, 8);
    let mut calls = 0;
    let mut count = |_: &History| calls += 1;
    let outcome = t.fit_with_callback(&FitConfig::default().samples(100).verbose(false), Some(&mut count)).unwrap();
    assert_eq!(outcome.stop_reason, StopReason::SampleBudget);
    assert_eq!(outcome.epochs_run, 3);
    assert_eq!(calls, 1);

    let again = t.fit(&FitConfig::default().samples(40).verbose(false)).unwrap();
    assert_eq!(again.epochs_run, 1);
    assert_eq!(t.hist.clock.samples, 160);
}

#[test]
fn test_callback_period() {
    let mut t = trainer(Drift::new(), 8, 8);
    let mut seen = Vec::new();
    let mut record = |h: &History| seen.push(h.clock.epochs);
    t.fit_with_callback(&quiet(6).period_call(2), Some(&mut record)).unwrap();
    assert_eq!(seen, vec![2, 4, 6]);
}

#[test]
fn test_preconditions() {
    let mut no_optim = Trainer::new(Drift::new(), true).with_train_data(data(4, 2));
    assert!(matches!(no_optim.fit(&quiet(1)), Err(TrainError::MissingOptimizer)));

    let mut no_data = Trainer::new(Drift::new(), true).with_optimizer(Sgd::new(0.1));
    assert!(matches!(no_data.fit(&quiet(1)), Err(TrainError::MissingTrainData)));

    let mut bad = trainer(Drift::new(), 4, 2);
    assert!(matches!(bad.fit(&quiet(1).accumulate(0)), Err(TrainError::InvalidConfig { .. })));
    assert_eq!(bad.hist.clock.epochs, 0);
}

#[test]
fn test_failed_pass_leaves_epoch_uncommitted() {
    let mut t = trainer(Drift::new(), 4, 2).with_val_data(data(0, 2));
    assert!(matches!(t.fit(&quiet(2)), Err(TrainError::EmptySource { mode: "val" })));
    assert_eq!(t.hist.clock.epochs, 1);
    assert!(t.hist.val.is_empty());
}

#[test]
fn test_scheduler_phase_end_adds_label() {
    let mut t = trainer(Drift::new(), 8, 8);
    t.set_scheduler(Scheduler::linear(Some(0.0), 1.0, Span::Epochs(2)).unwrap().named("warmup"));
    t.add_scheduler(Scheduler::constant(0.5, Span::Epochs(10)).unwrap().named("hold"));
    assert_eq!(t.optimizer().unwrap().lr(), 0.0);

    t.fit(&quiet(3)).unwrap();
    assert_eq!(t.hist.labels.len(), 1);
    assert_eq!(t.hist.labels[0].text, "warmup");
    assert_eq!(t.hist.labels[0].epochs, 2);
    assert_eq!(t.schedulers().schedulers()[1].done(), 1);
    assert_eq!(t.optimizer().unwrap().lr(), 0.5);
    // The rate recorded for an epoch is the one in force while it ran.
    assert_eq!(t.hist.trn.lr, vec![0.0, 0.5, 1.0]);
}

#[test]
fn test_best_checkpoints_and_copies() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = trainer(Drift { scored: true, ..Drift::new() }, 8, 4).with_val_data(data(8, 4));
    t.set_checkpoint_folder(Monitor::Loss, dir.path().join("loss"));
    t.set_checkpoint_folder(Monitor::Score, dir.path().join("score"));
    t.checkpoints.keep_best = true;

    t.fit(&quiet(3).monitor(&[Monitor::Loss])).unwrap();
    let losses = std::fs::read_dir(dir.path().join("loss")).unwrap().count();
    assert_eq!(losses, 3);
    assert!(!dir.path().join("score").exists());
    assert!(t.best.loss.is_some());
    assert!(t.best.score.is_none());
    assert_eq!(t.hist.val.best.loss.points.len(), 3);
}

#[test]
fn test_best_score_checkpoints_and_copies() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = trainer(Drift { scored: true, ..Drift::new() }, 8, 4).with_val_data(data(8, 4));
    t.set_checkpoint_folder(Monitor::Loss, dir.path().join("loss"));
    t.set_checkpoint_folder(Monitor::Score, dir.path().join("score"));
    t.checkpoints.keep_best = true;

    t.fit(&quiet(3).monitor(&[Monitor::Score])).unwrap();
    let mut names: Vec<String> = std::fs::read_dir(dir.path().join("score"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 3);
    assert!(names[0].starts_with("score_0.2000_"), "{names:?}");
    assert!(names.iter().all(|n| n.ends_with(".json")));
    assert!(!dir.path().join("loss").exists());
    assert!(t.best.score.is_some());
    assert!(t.best.loss.is_none());

    let best = t.best.score.as_ref().unwrap().w();
    assert_eq!(best, t.model.w());
    let mut unseen = Dataset::unlabeled(vec![vec![1.0]; 2], 2).unwrap();
    assert_eq!(t.predict_best(Monitor::Score, &mut unseen, &PredictOptions::default()).unwrap()["output"].rows, 2);
}

#[test]
fn test_pre_val_does_not_claim_the_first_best() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = trainer(Drift::frozen(), 8, 4).with_val_data(data(8, 4));
    t.set_checkpoint_folder(Monitor::Loss, dir.path());
    t.checkpoints.keep_best = true;

    t.fit(&quiet(2).pre_val(true).monitor(&[Monitor::Loss])).unwrap();
    assert_eq!(t.hist.val.epochs, vec![0, 1, 2]);
    let epochs: Vec<usize> = t.hist.val.best.loss.points.iter().map(|p| p.epochs).collect();
    assert_eq!(epochs, vec![1]);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    assert!(t.best.loss.is_some());
}

#[test]
fn test_scaled_precision_trains_like_full() {
    let mut t = trainer(Drift::new(), 80, 8);
    let precision = Precision::Scaled { init_scale: 1024.0, growth_interval: 1000 };
    t.fit(&quiet(1).precision(precision)).unwrap();
    assert_eq!(t.hist.clock.steps, 10);
    assert!((t.model.w() + 1.0).abs() < 1e-9);
}

#[test]
fn test_resume_from_points_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut first = trainer(Drift::new(), 8, 4);
    first.set_checkpoint_folder(Monitor::Points, dir.path());
    first.fit(&quiet(3).period_points(3).monitor(&[Monitor::Points])).unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.starts_with("points_"));
    assert!(name.contains("_loss_val_none_"));

    let record = Checkpoint::read(&files[0]).unwrap();
    assert_eq!(record.config["kind"], "drift");
    assert!(record.optimizer.is_some());

    let mut resumed = trainer(Drift::new(), 8, 4);
    resumed.load_checkpoint(&files[0]).unwrap();
    assert_eq!(resumed.model.w(), first.model.w());
    assert_eq!(resumed.hist.clock, first.hist.clock);

    resumed.fit(&quiet(2)).unwrap();
    assert_eq!(resumed.hist.clock.epochs, 5);
    assert_eq!(resumed.hist.clock.steps, 10);
    assert_eq!(resumed.hist.trn.epochs, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_progress_channel_receives_final_batches() {
    let (tx, rx) = mpsc::channel();
    let mut t = trainer(Drift::new(), 16, 4).with_val_data(data(8, 4));
    t.set_progress_channel(tx);
    t.fit(&quiet(2)).unwrap();
    let finals: Vec<_> = rx.try_iter().filter(|p| p.done >= 1.0).collect();
    assert_eq!(finals.len(), 4);
    assert_eq!(finals[0].samples, 16);
    assert_eq!(finals[0].steps, 4);
}

#[test]
fn test_predict_restores_batch_size() {
    let mut t = trainer(Drift::new(), 4, 2);
    let mut unseen = Dataset::unlabeled(vec![vec![1.0]; 7], 3).unwrap();
    let opts = PredictOptions { batch_size: Some(2), n_batches: Some(3), ..Default::default() };
    let pred = t.predict(&mut unseen, &opts).unwrap();
    assert_eq!(pred["output"].rows, 6);
    assert_eq!(pred["output"].data[0], vec![2.0]);
    assert_eq!(ferrite_trainer::DataSource::batch_size(&unseen), 3);

    let whole = PredictOptions { whole: true, ..Default::default() };
    assert_eq!(t.predict(&mut unseen, &whole).unwrap()["output"].rows, 6);

    let all = PredictOptions { n_batches: Some(0), ..Default::default() };
    assert_eq!(t.predict(&mut unseen, &all).unwrap()["output"].rows, 7);
}

#[test]
fn test_predict_best_requires_a_copy() {
    let mut t = trainer(Drift::new(), 4, 2);
    let mut unseen = Dataset::unlabeled(vec![vec![1.0]; 2], 2).unwrap();
    assert!(t.predict_best(Monitor::Score, &mut unseen, &PredictOptions::default()).is_err());
}

#[test]
fn test_mlp_learns_xor_through_fit() {
    let inputs = vec![vec![0.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 1.0]];
    let labels = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];
    let net = MlpConfig::new(2, 1, LossType::Mse).hidden(&[8]).fun("tanh").build().unwrap();
    let mut t = Trainer::new(net, false)
        .with_train_data(Dataset::new(inputs.clone(), labels.clone(), 4).unwrap())
        .with_val_data(Dataset::new(inputs, labels, 4).unwrap())
        .with_optimizer(Sgd::new(0.1));
    t.fit(&quiet(500).period_val(50)).unwrap();
    let first = t.hist.trn.losses[0];
    let best = t.hist.val.best.loss.value.unwrap();
    assert!(best < first, "validation loss {best} not below first training loss {first}");
    assert_eq!(t.hist.params, 2 * 8 + 8 + 8 + 1);
}
