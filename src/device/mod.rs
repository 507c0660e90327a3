//! Instrument acquisition: sources, session worker and counters

pub mod session;
pub mod source;
pub mod state;

pub use session::{AcquisitionSession, SessionConfig, SessionProgress, StopHandle};
pub use source::DeviceSource;
pub use state::AcquisitionStats;
