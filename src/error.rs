//! Error types for the training engine.

use thiserror::Error;

/// Every fatal condition the engine can surface.
///
/// Precondition violations mean the caller wired the run incorrectly and are
/// never retried. I/O and codec failures come from checkpoint writes and reads.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Define the optimizer first")]
    MissingOptimizer,

    #[error("Define the training data first")]
    MissingTrainData,

    #[error("Model must implement {step}")]
    MissingStep { step: &'static str },

    #[error("Scores should be averaged over the batch, but got rank {rank}")]
    ScoreRank { rank: usize },

    #[error("Score shape changed within an epoch: expected {expected}, got {found}")]
    ScoreShape { expected: String, found: String },

    #[error("Unrecognized batch container: {0}")]
    UnrecognizedBatch(String),

    #[error("Data source produced no batches in {mode} mode")]
    EmptySource { mode: &'static str },

    #[error("Invalid configuration for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("Invalid scheduler `{name}`: {reason}")]
    InvalidScheduler { name: String, reason: String },

    #[error("State mismatch: {0}")]
    StateMismatch(String),

    #[error("Model step failed: {0}")]
    Model(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TrainError {
    /// Shorthand for a configuration error naming the offending field.
    pub fn config(field: &'static str, reason: impl Into<String>) -> Self {
        TrainError::InvalidConfig { field, reason: reason.into() }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, TrainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_offender() {
        let err = TrainError::config("accumulate", "must be at least 1, got 0");
        let msg = format!("{}", err);
        assert!(msg.contains("accumulate"));
        assert!(msg.contains("got 0"));

        let err = TrainError::MissingStep { step: "training_step" };
        assert!(format!("{}", err).contains("training_step"));

        let err = TrainError::ScoreRank { rank: 2 };
        assert!(format!("{}", err).contains("rank 2"));
    }

    #[test]
    fn test_io_error_converts() {
        fn open() -> Result<std::fs::File> {
            Ok(std::fs::File::open("/definitely/not/here.json")?)
        }
        assert!(matches!(open(), Err(TrainError::Io(_))));
    }
}
