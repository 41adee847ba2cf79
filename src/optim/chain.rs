use crate::optim::optimizer::Optimizer;
use crate::optim::scheduler::Scheduler;

/// Emitted when the acting scheduler exhausts itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseEnded {
    pub index: usize,
    pub name: String,
}

/// Ordered learning-rate phases. The first enabled scheduler is in charge.
///
/// A call to `step` advances exactly one scheduler. When that scheduler
/// exhausts itself its last rate stays on the optimizer; the next phase only
/// takes over on the following call.
#[derive(Debug, Clone)]
pub struct SchedulerChain {
    schedulers: Vec<Scheduler>,
    last_lr: Option<f64>,
    default_lr: f64,
}

impl SchedulerChain {
    pub fn new(default_lr: f64) -> Self {
        SchedulerChain { schedulers: Vec::new(), last_lr: None, default_lr }
    }

    /// Rate reported before any scheduler has acted.
    pub fn set_default_lr(&mut self, lr: f64) {
        self.default_lr = lr;
    }

    pub fn push(&mut self, scheduler: Scheduler) {
        self.schedulers.push(scheduler);
    }

    pub fn remove(&mut self, index: usize) -> Option<Scheduler> {
        (index < self.schedulers.len()).then(|| self.schedulers.remove(index))
    }

    pub fn clear(&mut self) {
        self.schedulers.clear();
        self.last_lr = None;
    }

    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    pub fn schedulers(&self) -> &[Scheduler] {
        &self.schedulers
    }

    /// The scheduler that the next `step` will advance.
    pub fn current(&self) -> Option<&Scheduler> {
        self.schedulers.iter().find(|s| s.is_enabled())
    }

    pub fn step(&mut self, epochs: usize, samples: usize, optim: &mut dyn Optimizer) -> Option<PhaseEnded> {
        let index = self.schedulers.iter().position(|s| s.is_enabled())?;
        let scheduler = &mut self.schedulers[index];
        let exhausted = scheduler.step(epochs, samples, optim);
        self.last_lr = scheduler.lr();

        exhausted.then(|| PhaseEnded { index, name: scheduler.name.clone() })
    }

    /// Re-enables every scheduler and zeroes its progress.
    pub fn reset(&mut self) {
        self.schedulers.iter_mut().for_each(Scheduler::reset);
    }

    /// Disables every scheduler; the current rate stays in effect.
    pub fn stop(&mut self) {
        self.schedulers.iter_mut().for_each(Scheduler::disable);
    }

    pub fn get_lr(&self) -> f64 {
        self.last_lr.unwrap_or(self.default_lr)
    }
}
