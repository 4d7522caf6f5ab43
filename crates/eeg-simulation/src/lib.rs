//! EEG-Simulation: synthetic EEG generation and streaming
//!
//! Provides a seedable 8-channel EEG source with labeled artifacts for
//! exercising the pipeline without hardware.

pub mod eeg_simulator;
pub mod real_time_stream;
pub mod signal_patterns;

pub use eeg_simulator::*;
pub use real_time_stream::*;
pub use signal_patterns::*;
