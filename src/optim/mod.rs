pub mod chain;
pub mod optimizer;
pub mod scheduler;
pub mod sgd;

pub use chain::{PhaseEnded, SchedulerChain};
pub use optimizer::Optimizer;
pub use scheduler::{ScheduleKind, Scheduler, Span};
pub use sgd::Sgd;
