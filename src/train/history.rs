use std::fmt;
use std::time::Duration;

use serde::{Serialize, Deserialize};

/// Training or validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Train,
    Validate,
}

impl Mode {
    pub fn is_train(&self) -> bool {
        matches!(self, Mode::Train)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Train => "trn",
            Mode::Validate => "val",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative (epochs, samples, steps) of training.
///
/// Only training passes advance it, and only once the pass has completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingClock {
    pub epochs: usize,
    pub samples: usize,
    pub steps: usize,
}

impl TrainingClock {
    pub fn commit_epoch(&mut self, samples: usize, steps: usize) {
        self.epochs += 1;
        self.samples += samples;
        self.steps += steps;
    }
}

/// Summary of one completed pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochResult {
    pub loss: f64,
    pub score: Option<Vec<f64>>,
    pub samples: usize,
    pub steps: usize,
    pub elapsed: Duration,
}

impl EpochResult {
    /// Primary (first) score component.
    pub fn primary_score(&self) -> Option<f64> {
        self.score.as_ref().and_then(|s| s.first().copied())
    }
}

/// Which way a metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    pub fn score(maximize: bool) -> Direction {
        if maximize { Direction::Maximize } else { Direction::Minimize }
    }

    /// Strict improvement; ties never count.
    pub fn improves(&self, candidate: f64, best: f64) -> bool {
        match self {
            Direction::Minimize => candidate < best,
            Direction::Maximize => candidate > best,
        }
    }
}

/// An improvement event: (value, epochs, samples, steps).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestPoint {
    pub value: f64,
    pub epochs: usize,
    pub samples: usize,
    pub steps: usize,
}

/// Best value of one metric in one mode, with every improvement recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTracker {
    pub direction: Direction,
    pub value: Option<f64>,
    /// Full score vector at the latest improvement.
    pub components: Option<Vec<f64>>,
    pub epochs: usize,
    pub samples: usize,
    pub steps: usize,
    pub points: Vec<BestPoint>,
}

impl BestTracker {
    pub fn new(direction: Direction) -> Self {
        BestTracker {
            direction,
            value: None,
            components: None,
            epochs: 0,
            samples: 0,
            steps: 0,
            points: Vec::new(),
        }
    }

    /// Records `candidate` if it strictly improves on the best so far.
    pub fn consider(&mut self, candidate: f64, at: TrainingClock) -> bool {
        let improved = match self.value {
            None => true,
            Some(best) => self.direction.improves(candidate, best),
        };
        if improved {
            self.value = Some(candidate);
            self.epochs = at.epochs;
            self.samples = at.samples;
            self.steps = at.steps;
            self.points.push(BestPoint {
                value: candidate,
                epochs: at.epochs,
                samples: at.samples,
                steps: at.steps,
            });
        }
        improved
    }

    /// Compares the first component; keeps the whole vector on improvement.
    pub fn consider_score(&mut self, score: &[f64], at: TrainingClock) -> bool {
        let Some(&primary) = score.first() else {
            return false;
        };
        let improved = self.consider(primary, at);
        if improved {
            self.components = Some(score.to_vec());
        }
        improved
    }
}

/// Best trackers of one mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Best {
    pub loss: BestTracker,
    pub score: BestTracker,
}

/// Improvements found while committing one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Improved {
    pub loss: bool,
    pub score: bool,
}

impl Improved {
    pub fn any(&self) -> bool {
        self.loss || self.score
    }
}

/// Append-only per-pass records of one mode. All vectors share indices,
/// except `scores`, which only grows for passes that produced a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub best: Best,
    pub epochs: Vec<usize>,
    pub samples: Vec<usize>,
    pub steps: Vec<usize>,
    pub batch_size: Vec<usize>,
    pub lr: Vec<f64>,
    pub samples_epoch: Vec<usize>,
    pub steps_epoch: Vec<usize>,
    pub times: Vec<f64>,
    pub losses: Vec<f64>,
    pub scores: Vec<f64>,
}

impl Track {
    pub fn new(score_direction: Direction) -> Self {
        Track {
            best: Best {
                loss: BestTracker::new(Direction::Minimize),
                score: BestTracker::new(score_direction),
            },
            epochs: Vec::new(),
            samples: Vec::new(),
            steps: Vec::new(),
            batch_size: Vec::new(),
            lr: Vec::new(),
            samples_epoch: Vec::new(),
            steps_epoch: Vec::new(),
            times: Vec::new(),
            losses: Vec::new(),
            scores: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    /// Appends the pass and updates the best trackers at clock `at`.
    pub fn commit(&mut self, at: TrainingClock, batch_size: usize, lr: f64, result: &EpochResult) -> Improved {
        self.record(at, batch_size, lr, result);
        Improved {
            loss: self.best.loss.consider(result.loss, at),
            score: result.score.as_deref().is_some_and(|s| self.best.score.consider_score(s, at)),
        }
    }

    /// Appends the pass without touching the best trackers.
    pub fn record(&mut self, at: TrainingClock, batch_size: usize, lr: f64, result: &EpochResult) {
        self.epochs.push(at.epochs);
        self.samples.push(at.samples);
        self.steps.push(at.steps);
        self.batch_size.push(batch_size);
        self.lr.push(lr);
        self.samples_epoch.push(result.samples);
        self.steps_epoch.push(result.steps);
        self.times.push(result.elapsed.as_secs_f64());
        self.losses.push(result.loss);
        if let Some(primary) = result.primary_score() {
            self.scores.push(primary);
        }
    }
}

/// Annotation on the history: scheduler phase boundaries and user notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub text: String,
    pub epochs: usize,
    pub samples: usize,
    pub steps: usize,
    pub time_trn: f64,
    pub time_val: f64,
}

/// Cumulative wall time in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Times {
    pub trn: f64,
    pub val: f64,
}

/// Complete run state that survives across `fit` calls and checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub clock: TrainingClock,
    pub time: Times,
    pub labels: Vec<Label>,
    pub trn: Track,
    pub val: Track,
    /// Trainable parameter count of the model.
    pub params: usize,
}

impl History {
    pub fn new(score_direction: Direction, params: usize) -> Self {
        History {
            clock: TrainingClock::default(),
            time: Times::default(),
            labels: Vec::new(),
            trn: Track::new(score_direction),
            val: Track::new(score_direction),
            params,
        }
    }

    pub fn track(&self, mode: Mode) -> &Track {
        match mode {
            Mode::Train => &self.trn,
            Mode::Validate => &self.val,
        }
    }

    pub fn add_label(&mut self, text: impl Into<String>) {
        self.labels.push(Label {
            text: text.into(),
            epochs: self.clock.epochs,
            samples: self.clock.samples,
            steps: self.clock.steps,
            time_trn: self.time.trn,
            time_val: self.time.val,
        });
    }

    /// Commits a completed pass. Training passes first advance the clock, so
    /// the record and any new best carry the post-epoch coordinates.
    pub fn commit(&mut self, mode: Mode, batch_size: usize, lr: f64, result: &EpochResult) -> Improved {
        let secs = result.elapsed.as_secs_f64();
        match mode {
            Mode::Train => {
                self.clock.commit_epoch(result.samples, result.steps);
                self.time.trn += secs;
                self.trn.commit(self.clock, batch_size, lr, result)
            }
            Mode::Validate => {
                self.time.val += secs;
                self.val.commit(self.clock, batch_size, lr, result)
            }
        }
    }

    /// Records a validation pass run before any training. Bests are left
    /// alone, so the first validation after training always counts as one.
    pub fn record_baseline(&mut self, batch_size: usize, lr: f64, result: &EpochResult) {
        self.time.val += result.elapsed.as_secs_f64();
        self.val.record(self.clock, batch_size, lr, result);
    }
}
