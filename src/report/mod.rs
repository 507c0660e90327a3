//! Result aggregation and persisted artifacts

pub mod aggregate;
pub mod summary;
pub mod tables;

pub use aggregate::{aggregate, DatasetSize, ReportRange, SizeResult};
pub use summary::{write_run, RunSummary};
pub use tables::RawTableWriter;
