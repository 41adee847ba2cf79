pub mod error;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod model;
pub mod optim;
pub mod data;
pub mod train;

// Convenience re-exports
pub use error::{Result, TrainError};
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use layers::dense::Layer;
pub use network::{MlpConfig, Network};
pub use loss::LossType;
pub use model::{Model, StepOutput, Score};
pub use optim::{Optimizer, Scheduler, Sgd, Span};
pub use data::{Batch, DataSource, Dataset};
pub use train::{FitConfig, Monitor, Trainer};
