//! Device line decoding and time series reassembly

pub mod assembler;
pub mod frame;

pub use assembler::{BatchSpan, TimeSample, TimeSeriesAssembler};
pub use frame::{latin1_to_string, FrameDecoder, FrameLayout, RawFrame};
