//! EEG-Runtime: async processing service around the sample pipeline
//!
//! Producers push samples through a bounded queue, consumers subscribe to
//! processed output and status lines, control surfaces send commands.

pub mod processing_service;

pub use processing_service::*;
