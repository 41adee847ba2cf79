pub mod model;

pub use model::{Model, Param, Prediction, Score, StepCapabilities, StepKind, StepOutput};
