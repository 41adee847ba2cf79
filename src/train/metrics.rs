use crate::error::{Result, TrainError};

/// Sample-weighted epoch mean of loss and score.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    pub loss: f64,
    pub score: Option<Vec<f64>>,
}

/// Per-batch loss / score / sample-count records of one pass.
///
/// Batches may differ in size (the last one usually does), so the reduction
/// weights each batch by its sample count rather than averaging batch means.
#[derive(Debug, Clone, Default)]
pub struct MetricAggregator {
    losses: Vec<f64>,
    scores: Option<Vec<Vec<f64>>>,
    counts: Vec<usize>,
}

impl MetricAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one batch. The score must be absent for every batch of a pass,
    /// or present with the same number of components for every batch.
    pub fn accumulate(&mut self, loss: f64, score: Option<Vec<f64>>, samples: usize) -> Result<()> {
        let expected = self.scores.as_ref().map(|all| all[0].len());
        let found = score.as_ref().map(Vec::len);
        match (found, expected) {
            (None, None) => {}
            (Some(n), Some(m)) if n == m => {}
            (Some(_), None) if self.counts.is_empty() => {}
            (found, expected) => {
                return Err(TrainError::ScoreShape {
                    expected: describe_shape(expected),
                    found: describe_shape(found),
                });
            }
        }
        if let Some(s) = score {
            self.scores.get_or_insert_with(Vec::new).push(s);
        }
        self.losses.push(loss);
        self.counts.push(samples);
        Ok(())
    }

    pub fn batches(&self) -> usize {
        self.counts.len()
    }

    pub fn samples(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Σ(xᵢ·bᵢ)/Σbᵢ over the batches seen so far; `None` before the first
    /// batch or when every batch was empty.
    pub fn reduce(&self) -> Option<EpochMetrics> {
        let total = self.samples();
        if total == 0 {
            return None;
        }
        let total = total as f64;
        let loss = self.losses.iter().zip(&self.counts)
            .map(|(l, &n)| l * n as f64)
            .sum::<f64>() / total;

        let score = self.scores.as_ref().map(|all| {
            let mut mean = vec![0.0; all[0].len()];
            for (s, &n) in all.iter().zip(&self.counts) {
                for (m, v) in mean.iter_mut().zip(s) {
                    *m += v * n as f64;
                }
            }
            mean.iter_mut().for_each(|m| *m /= total);
            mean
        });

        Some(EpochMetrics { loss, score })
    }
}

fn describe_shape(components: Option<usize>) -> String {
    match components {
        Some(n) => format!("{n} components"),
        None => "no score".to_string(),
    }
}
