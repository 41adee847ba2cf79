use serde::{Serialize, Deserialize};

/// X axis of history plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XUnit {
    Epoch,
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Ms,
    S,
    M,
    H,
}

impl TimeUnit {
    /// Seconds per unit.
    pub fn scale(&self) -> f64 {
        match self {
            TimeUnit::Ms => 1e-3,
            TimeUnit::S => 1.0,
            TimeUnit::M => 60.0,
            TimeUnit::H => 3600.0,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            TimeUnit::Ms => "ms",
            TimeUnit::S => "s",
            TimeUnit::M => "m",
            TimeUnit::H => "h",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Units {
    pub unit: XUnit,
    /// Sample count unit, e.g. 1e6 to report time per million samples.
    pub count: f64,
    pub time: TimeUnit,
}

/// Options of the loss or score subplot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubplotView {
    pub show: bool,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    pub ticks: Option<usize>,
    /// Overlay the learning rate.
    pub lr: bool,
    /// Draw history labels.
    pub labels: bool,
    /// Mark training-best points.
    pub trn_checks: bool,
    /// Mark validation-best points.
    pub val_checks: bool,
}

impl Default for SubplotView {
    fn default() -> Self {
        SubplotView {
            show: true,
            y_min: None,
            y_max: None,
            ticks: None,
            lr: true,
            labels: true,
            trn_checks: false,
            val_checks: true,
        }
    }
}

/// How the history is rendered. Stored in every checkpoint so a run can be
/// re-plotted the way it was being watched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    pub w: f64,
    pub h: f64,
    pub units: Units,
    /// Minimum x in samples; negative means "the last |x_min| samples".
    pub x_min: f64,
    pub x_max: Option<f64>,
    pub loss: SubplotView,
    pub score: SubplotView,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            w: 12.0,
            h: 5.0,
            units: Units { unit: XUnit::Epoch, count: 1e6, time: TimeUnit::S },
            x_min: 0.0,
            x_max: None,
            loss: SubplotView::default(),
            score: SubplotView::default(),
        }
    }
}

impl ViewConfig {
    /// Sample count unit and its power of ten; a non-positive count means 1.
    pub fn count_unit(&self) -> (f64, i32) {
        let count = if self.units.count > 0.0 { self.units.count } else { 1.0 };
        (count, count.log10().round() as i32)
    }
}
