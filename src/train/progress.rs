use std::io::Write;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use serde::{Serialize, Deserialize};

use crate::train::history::Mode;
use crate::train::view::{TimeUnit, ViewConfig};

/// Minimum spacing between two intermediate progress reports.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Running statistics of a pass, emitted while it runs.
///
/// When a progress channel is attached to the trainer, one `Progress` value
/// is sent at most once a second and always for the final batch of a pass.
/// Receivers (e.g. a dashboard) use these to drive live charts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    /// 1-based epoch number; 0 for a pre-run validation.
    pub epoch: usize,
    pub mode: Mode,
    /// Fraction of the pass completed, in (0, 1].
    pub done: f64,
    /// Sample-weighted mean loss so far.
    pub loss: f64,
    pub score: Option<Vec<f64>>,
    /// Samples seen in this pass.
    pub samples: usize,
    /// Optimizer updates in this pass.
    pub steps: usize,
    pub elapsed_ms: u64,
}

impl Progress {
    /// One-line rendering, e.g.
    /// `  3t[100%]  score=0.9375 loss=0.1832   samples=64 steps=8  time=1.2ms/step  0.15s/10^6`.
    pub fn render(&self, time_unit: TimeUnit, count: (f64, i32)) -> String {
        let mut st = String::new();
        if let Some(score) = self.score.as_ref().filter(|s| !s.is_empty()) {
            st += &format!("score={:.4} ", score[0]);
            if score.len() > 1 {
                let rest: Vec<String> = score[1..].iter().map(|v| format!("{v:.4}")).collect();
                st += &format!("({}) ", rest.join(", "));
            }
        }
        st += &format!("loss={:.4} ", self.loss);

        let secs = self.elapsed_ms as f64 / 1e3;
        let per_step = if self.steps == 0 { 0.0 } else { secs / (time_unit.scale() * self.steps as f64) };
        let per_count = count.0 * secs / (time_unit.scale() * self.samples.max(1) as f64);
        format!(
            "{:3}{}[{:3.0}%]  {}  samples={} steps={}  time={:.3}{}/step  {:.2}{}/10^{}",
            self.epoch,
            if self.mode.is_train() { 't' } else { 'v' },
            100.0 * self.done,
            st,
            self.samples,
            self.steps,
            per_step,
            time_unit.suffix(),
            per_count,
            time_unit.suffix(),
            count.1,
        )
    }
}

/// Throttles and delivers progress reports for one pass.
pub struct ProgressReporter {
    verbose: bool,
    tx: Option<mpsc::Sender<Progress>>,
    time_unit: TimeUnit,
    count: (f64, i32),
    last: Instant,
}

impl ProgressReporter {
    pub fn new(verbose: bool, view: &ViewConfig, tx: Option<mpsc::Sender<Progress>>) -> Self {
        ProgressReporter {
            verbose,
            tx,
            time_unit: view.units.time,
            count: view.count_unit(),
            last: Instant::now(),
        }
    }

    /// Silent reporter.
    pub fn quiet() -> Self {
        ProgressReporter::new(false, &ViewConfig::default(), None)
    }

    pub fn is_active(&self) -> bool {
        self.verbose || self.tx.is_some()
    }

    /// True when a report is due: a second has passed or this is the final batch.
    pub fn due(&self, final_batch: bool) -> bool {
        self.is_active() && (final_batch || self.last.elapsed() > REPORT_INTERVAL)
    }

    pub fn report(&mut self, progress: Progress) {
        self.last = Instant::now();
        if self.verbose {
            print!("\r{}", progress.render(self.time_unit, self.count));
            let _ = std::io::stdout().flush();
        }
        if let Some(tx) = &self.tx {
            // A dropped receiver only detaches the channel; it never stops training.
            if tx.send(progress).is_err() {
                self.tx = None;
            }
        }
    }

    /// Ends the progress line of a pass.
    pub fn finish(&self) {
        if self.verbose {
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Progress {
        Progress {
            epoch: 3,
            mode: Mode::Train,
            done: 1.0,
            loss: 0.25,
            score: Some(vec![0.9, 0.1]),
            samples: 64,
            steps: 8,
            elapsed_ms: 16,
        }
    }

    #[test]
    fn test_render_includes_all_components() {
        let line = sample().render(TimeUnit::Ms, (1e6, 6));
        assert!(line.starts_with("  3t[100%]"));
        assert!(line.contains("score=0.9000 (0.1000)"));
        assert!(line.contains("loss=0.2500"));
        assert!(line.contains("samples=64 steps=8"));
        assert!(line.contains("time=2.000ms/step"));
    }

    #[test]
    fn test_channel_receives_and_survives_drop() {
        let (tx, rx) = mpsc::channel();
        let mut reporter = ProgressReporter::new(false, &ViewConfig::default(), Some(tx));
        assert!(reporter.due(true));
        reporter.report(sample());
        assert_eq!(rx.recv().unwrap().steps, 8);
        drop(rx);
        reporter.report(sample());
        assert!(!reporter.is_active());
    }

    #[test]
    fn test_quiet_reporter_is_never_due() {
        assert!(!ProgressReporter::quiet().due(true));
    }
}
