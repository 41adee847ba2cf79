use crate::error::{Result, TrainError};
use crate::math::Matrix;

/// One mini-batch as handed to a model step.
///
/// Either a single array with one sample per row, or a nested sequence of
/// batches such as `(inputs, targets)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    Array(Matrix),
    Nested(Vec<Batch>),
}

impl Batch {
    /// `(inputs, targets)` pair, the layout `Dataset` produces.
    pub fn pair(inputs: Matrix, targets: Matrix) -> Batch {
        Batch::Nested(vec![Batch::Array(inputs), Batch::Array(targets)])
    }

    /// Number of samples: the outer dimension of the array, or of the first
    /// element of a nested batch, recursively.
    pub fn samples(&self) -> Result<usize> {
        match self {
            Batch::Array(m) => Ok(m.rows),
            Batch::Nested(items) => match items.first() {
                Some(first) => first.samples(),
                None => Err(TrainError::UnrecognizedBatch(
                    "empty nested batch has no first element".to_string(),
                )),
            },
        }
    }

    pub fn as_array(&self) -> Option<&Matrix> {
        match self {
            Batch::Array(m) => Some(m),
            Batch::Nested(_) => None,
        }
    }

    /// Element `i` of a nested batch.
    pub fn get(&self, i: usize) -> Option<&Batch> {
        match self {
            Batch::Nested(items) => items.get(i),
            Batch::Array(_) => None,
        }
    }
}
