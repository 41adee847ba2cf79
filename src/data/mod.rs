pub mod batch;
pub mod dataset;
pub mod source;

pub use batch::Batch;
pub use dataset::Dataset;
pub use source::DataSource;
