//! EEG-Processing: streaming filters and spike detection
//!
//! Per-channel IIR filtering with cached state, zero-phase batch filtering,
//! and adaptive artifact detection for 8-channel EEG streams.

pub mod config;
pub mod design;
pub mod detector;
pub mod filters;
pub mod iir;
pub mod nlms;
pub mod pipeline;
pub mod processor;
pub mod ring_buffer;

pub use config::{FilterSettings, ProcessingConfig, ProcessingProfile};
pub use design::{design, CoefficientSet, FilterKind, SecondOrderSection};
pub use detector::{
    sded_adaptive, sded_fixed, AdaptiveSpikeDetector, DetectionMode, DetectorConfig,
    DetectorState, DualThreshold, DualThresholdConfig, DualUpdate, SdedStep,
};
pub use filters::{batch_apply, FilterConfig, FilterKey, FilterState, StreamingFilterBank};
pub use nlms::{NlmsConfig, NlmsFilter, NlmsStep};
pub use pipeline::{DetectorCommand, FilterCommand, SamplePipeline};
pub use processor::{ProcessingMetrics, SampleProcessor};
pub use ring_buffer::RingBuffer;
