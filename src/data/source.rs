use crate::data::batch::Batch;

/// A finite, restartable sequence of batches with a known length.
///
/// Every call to `batches()` starts a fresh pass.
pub trait DataSource {
    /// Number of batches one pass yields.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nominal samples per batch, recorded in the history.
    fn batch_size(&self) -> usize;

    /// Starts a new pass over the data.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Batch> + '_>;

    /// Called once at the start of every `fit`.
    fn reset(&mut self) {}

    /// Changes the batch size; sources with a fixed layout may ignore it.
    fn set_batch_size(&mut self, _batch_size: usize) {}

    /// When set, a trailing fractional batch is skipped.
    fn set_whole(&mut self, _whole: bool) {}

    fn whole(&self) -> bool {
        false
    }
}
