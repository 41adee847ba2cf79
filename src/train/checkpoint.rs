use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::error::Result;
use crate::train::history::History;
use crate::train::view::ViewConfig;

/// Event categories that may write a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    /// New best validation loss.
    Loss,
    /// New best validation score.
    Score,
    /// Periodic checkpoint, regardless of improvement.
    Points,
}

/// Where monitored events are written, and whether best models are kept in memory.
#[derive(Debug, Clone, Default)]
pub struct CheckpointPolicy {
    pub loss: Option<PathBuf>,
    pub score: Option<PathBuf>,
    pub points: Option<PathBuf>,
    /// Deep-copy the model on a monitored validation improvement.
    pub keep_best: bool,
}

impl CheckpointPolicy {
    pub fn folder(&self, monitor: Monitor) -> Option<&Path> {
        match monitor {
            Monitor::Loss => self.loss.as_deref(),
            Monitor::Score => self.score.as_deref(),
            Monitor::Points => self.points.as_deref(),
        }
    }

    pub fn set_folder(&mut self, monitor: Monitor, folder: impl Into<PathBuf>) {
        let folder = Some(folder.into());
        match monitor {
            Monitor::Loss => self.loss = folder,
            Monitor::Score => self.score = folder,
            Monitor::Points => self.points = folder,
        }
    }

    /// Folder to save into, if `monitor` is active and has a destination.
    pub fn destination(&self, monitor: Monitor, active: &[Monitor]) -> Option<&Path> {
        if active.contains(&monitor) { self.folder(monitor) } else { None }
    }

    pub fn keeps_copy(&self, monitor: Monitor, active: &[Monitor]) -> bool {
        self.keep_best && active.contains(&monitor)
    }
}

/// Persisted training state. The field set is fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub info: String,
    pub date: DateTime<Local>,
    /// Model configuration.
    pub config: Value,
    /// Model parameters.
    pub model: Value,
    pub optimizer: Option<Value>,
    pub hist: History,
    pub view: ViewConfig,
}

impl Checkpoint {
    /// Writes `<folder>/<stem>.json`, never overwriting: on a clash the name
    /// gets a numeric suffix. Returns the written path.
    pub fn write(&self, folder: &Path, stem: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(folder)?;
        let mut attempt = 0usize;
        loop {
            let name = if attempt == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}_{attempt}.json")
            };
            let path = folder.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    let mut writer = BufWriter::new(file);
                    serde_json::to_writer_pretty(&mut writer, self)?;
                    writer.flush()?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn read(path: &Path) -> Result<Checkpoint> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Local time down to milliseconds, safe for file names.
pub fn timestamp() -> String {
    Local::now().format("%m.%d_%H-%M-%S%.3f").to_string()
}

/// File stem for a new-best checkpoint, e.g. `loss_0.1234_03.14_15-09-26.535`.
pub fn best_stem(monitor: Monitor, value: f64) -> String {
    let kind = match monitor {
        Monitor::Loss => "loss",
        Monitor::Score => "score",
        Monitor::Points => "points",
    };
    format!("{kind}_{value:.4}_{}", timestamp())
}

/// File stem for a periodic checkpoint, carrying the latest metrics.
pub fn points_stem(score_val: f64, score_trn: f64, loss_val: Option<f64>, loss_trn: f64) -> String {
    let loss_val = loss_val.map_or_else(|| "none".to_string(), |v| format!("{v:.4}"));
    format!(
        "points_{}_score_val_{score_val:.4}_trn_{score_trn:.4}_loss_val_{loss_val}_trn_{loss_trn:.4}",
        timestamp()
    )
}
