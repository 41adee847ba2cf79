//! Learning-rate schedulers
//!
//! A `Scheduler` is one phase of a schedule: it moves the learning rate from
//! a starting value `lr1` to a terminal value `lr2` over a span measured in
//! epochs or samples, then disables itself. Phases are sequenced by
//! `SchedulerChain`.

use std::f64::consts::PI;
use std::fmt;

use serde::{Serialize, Deserialize};

use crate::error::{Result, TrainError};
use crate::optim::optimizer::Optimizer;

/// Shape of the learning-rate curve between `lr1` and `lr2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Holds `lr1`.
    Const,
    /// Straight line from `lr1` to `lr2`.
    Linear,
    /// Geometric interpolation from `lr1` to `lr2`.
    Exp,
    /// Half cosine from `lr1` down (or up) to `lr2`.
    Cos,
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleKind::Const => "const",
            ScheduleKind::Linear => "linear",
            ScheduleKind::Exp => "exp",
            ScheduleKind::Cos => "cos",
        };
        f.write_str(name)
    }
}

/// How long a phase lasts, and in which unit its `done` counter advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Span {
    Epochs(usize),
    Samples(usize),
}

impl Span {
    pub fn total(&self) -> usize {
        match *self {
            Span::Epochs(n) | Span::Samples(n) => n,
        }
    }

    fn delta(&self, epochs: usize, samples: usize) -> usize {
        match self {
            Span::Epochs(_) => epochs,
            Span::Samples(_) => samples,
        }
    }
}

/// One named learning-rate phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scheduler {
    pub name: String,
    kind: ScheduleKind,
    lr1: Option<f64>,
    lr2: Option<f64>,
    span: Span,
    done: usize,
    enabled: bool,
    /// Starting rate captured from the optimizer when `lr1` is absent.
    start: Option<f64>,
    /// Rate set by the most recent `step`.
    lr: Option<f64>,
}

impl Scheduler {
    /// Validates the configuration; misconfigured phases never reach a run.
    pub fn new(kind: ScheduleKind, lr1: Option<f64>, lr2: Option<f64>, span: Span) -> Result<Scheduler> {
        let name = kind.to_string();
        let invalid = |reason: String| TrainError::InvalidScheduler { name: name.clone(), reason };

        if span.total() == 0 {
            return Err(invalid(format!("span must be positive, got {:?}", span)));
        }
        for (label, lr) in [("lr1", lr1), ("lr2", lr2)] {
            if let Some(v) = lr {
                if !v.is_finite() || v < 0.0 {
                    return Err(invalid(format!("{label} must be a finite non-negative rate, got {v}")));
                }
                if kind == ScheduleKind::Exp && v == 0.0 {
                    return Err(invalid(format!("{label} must be positive for exp, got {v}")));
                }
            }
        }
        match kind {
            ScheduleKind::Const if lr1.is_none() => {
                return Err(invalid("const needs lr1".to_string()));
            }
            ScheduleKind::Linear | ScheduleKind::Exp | ScheduleKind::Cos if lr2.is_none() => {
                return Err(invalid(format!("{kind} needs a terminal rate lr2")));
            }
            _ => {}
        }

        Ok(Scheduler {
            name,
            kind,
            lr1,
            lr2,
            span,
            done: 0,
            enabled: true,
            start: None,
            lr: None,
        })
    }

    pub fn constant(lr: f64, span: Span) -> Result<Scheduler> {
        Scheduler::new(ScheduleKind::Const, Some(lr), Some(lr), span)
    }

    pub fn linear(lr1: Option<f64>, lr2: f64, span: Span) -> Result<Scheduler> {
        Scheduler::new(ScheduleKind::Linear, lr1, Some(lr2), span)
    }

    pub fn exponential(lr1: Option<f64>, lr2: f64, span: Span) -> Result<Scheduler> {
        Scheduler::new(ScheduleKind::Exp, lr1, Some(lr2), span)
    }

    pub fn cosine(lr1: Option<f64>, lr2: f64, span: Span) -> Result<Scheduler> {
        Scheduler::new(ScheduleKind::Cos, lr1, Some(lr2), span)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    pub fn lr1(&self) -> Option<f64> {
        self.lr1
    }

    pub fn lr2(&self) -> Option<f64> {
        self.lr2
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Rate set by the last `step`, if this phase has acted.
    pub fn lr(&self) -> Option<f64> {
        self.lr
    }

    /// Completion predicate.
    pub fn is_done(&self) -> bool {
        self.done >= self.span.total()
    }

    /// Learning rate at fraction `t` in [0, 1] of the span, starting from `start`.
    pub fn value_at(&self, start: f64, t: f64) -> f64 {
        let end = self.lr2.unwrap_or(start);
        let t = t.clamp(0.0, 1.0);
        match self.kind {
            ScheduleKind::Const => start,
            ScheduleKind::Linear => start + (end - start) * t,
            ScheduleKind::Exp if start > 0.0 && end > 0.0 => start * (end / start).powf(t),
            ScheduleKind::Exp => start + (end - start) * t,
            ScheduleKind::Cos => end + (start - end) * 0.5 * (1.0 + (PI * t).cos()),
        }
    }

    /// Advances `done` by the elapsed epochs or samples, sets the new rate on
    /// the optimizer, and disables the phase once it is complete.
    ///
    /// Returns true when this call exhausted the phase. Disabled phases are inert.
    pub fn step(&mut self, epochs: usize, samples: usize, optim: &mut dyn Optimizer) -> bool {
        if !self.enabled {
            return false;
        }
        let start = match self.lr1.or(self.start) {
            Some(lr) => lr,
            None => {
                let lr = optim.lr();
                self.start = Some(lr);
                lr
            }
        };
        self.done += self.span.delta(epochs, samples);

        let t = self.done as f64 / self.span.total() as f64;
        let lr = self.value_at(start, t);
        optim.set_lr(lr);
        self.lr = Some(lr);

        if self.is_done() {
            self.enabled = false;
            return true;
        }
        false
    }

    /// Re-arms the phase from the beginning.
    pub fn reset(&mut self) {
        self.enabled = true;
        self.done = 0;
        self.start = None;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::sgd::Sgd;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_reaches_terminal_rate_and_disables() {
        let mut opt = Sgd::new(1.0);
        let mut s = Scheduler::linear(Some(1.0), 0.0, Span::Epochs(4)).unwrap();
        assert!(!s.step(1, 10, &mut opt));
        assert_relative_eq!(opt.lr(), 0.75);
        s.step(1, 10, &mut opt);
        s.step(1, 10, &mut opt);
        assert!(s.step(1, 10, &mut opt));
        assert_relative_eq!(opt.lr(), 0.0);
        assert!(!s.is_enabled());

        // inert once exhausted
        opt.set_lr(0.3);
        assert!(!s.step(1, 10, &mut opt));
        assert_relative_eq!(opt.lr(), 0.3);
    }

    #[test]
    fn test_sample_span_counts_samples() {
        let mut opt = Sgd::new(0.1);
        let mut s = Scheduler::exponential(Some(0.1), 0.001, Span::Samples(100)).unwrap();
        s.step(1, 50, &mut opt);
        assert_eq!(s.done(), 50);
        assert_relative_eq!(opt.lr(), 0.01, epsilon = 1e-12);
        assert!(s.step(1, 60, &mut opt));
        assert_relative_eq!(opt.lr(), 0.001, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_lr1_starts_from_optimizer() {
        let mut opt = Sgd::new(0.4);
        let mut s = Scheduler::cosine(None, 0.0, Span::Epochs(2)).unwrap();
        s.step(1, 0, &mut opt);
        assert_relative_eq!(opt.lr(), 0.2, epsilon = 1e-12);
        s.step(1, 0, &mut opt);
        assert_relative_eq!(opt.lr(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reset_rearms() {
        let mut opt = Sgd::new(0.1);
        let mut s = Scheduler::constant(0.05, Span::Epochs(1)).unwrap();
        assert!(s.step(1, 0, &mut opt));
        s.reset();
        assert!(s.is_enabled());
        assert_eq!(s.done(), 0);
    }

    #[test]
    fn test_misconfiguration_is_rejected_at_construction() {
        assert!(Scheduler::linear(Some(0.1), 0.0, Span::Epochs(0)).is_err());
        assert!(Scheduler::new(ScheduleKind::Linear, Some(0.1), None, Span::Epochs(3)).is_err());
        assert!(Scheduler::exponential(Some(0.1), 0.0, Span::Epochs(3)).is_err());
        assert!(Scheduler::constant(f64::NAN, Span::Epochs(3)).is_err());
        let err = Scheduler::new(ScheduleKind::Const, None, None, Span::Epochs(3)).unwrap_err();
        assert!(format!("{}", err).contains("const"));
    }
}
