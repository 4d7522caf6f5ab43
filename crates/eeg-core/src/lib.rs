//! EEG-Core: Foundation types for the streaming EEG pipeline
//!
//! Sample containers, stream timestamps, ADC unit conversion and the shared
//! error type used by every other crate in the workspace.

pub mod conversion;
pub mod error;
pub mod sample;
pub mod timestamp;

pub use conversion::AdcFormat;
pub use error::{PipelineError, PipelineResult};
pub use sample::*;
pub use timestamp::StreamTimestamp;

/// Number of analog channels delivered by the acquisition board
pub const CHANNEL_COUNT: usize = 8;

/// Nominal sampling rate of the acquisition board (Hz)
pub const DEFAULT_SAMPLING_RATE: f64 = 250.0;
