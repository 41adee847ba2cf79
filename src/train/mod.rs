pub mod checkpoint;
pub mod epoch;
pub mod history;
pub mod metrics;
pub mod progress;
pub mod strategy;
pub mod train_config;
pub mod trainer;
pub mod view;

pub use checkpoint::{Checkpoint, CheckpointPolicy, Monitor};
pub use epoch::{fit_epoch, BatchTransform, EpochOutput, Pass, Transforms};
pub use history::{BestTracker, Direction, EpochResult, History, Mode, TrainingClock};
pub use metrics::{EpochMetrics, MetricAggregator};
pub use progress::{Progress, ProgressReporter};
pub use strategy::{LossScaler, Precision, StepStrategy};
pub use train_config::{FitConfig, PartialGroup};
pub use trainer::{FitOutcome, Plotter, PredictOptions, StopReason, Summary, Trainer};
pub use view::ViewConfig;
