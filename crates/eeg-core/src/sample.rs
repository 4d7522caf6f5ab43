//! Sample containers exchanged between transports, the pipeline and consumers

use crate::error::{PipelineError, PipelineResult};
use crate::CHANNEL_COUNT;
use serde::{Deserialize, Serialize};

/// One reading per channel plus the acquisition timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Monotonic timestamp in milliseconds
    pub timestamp_ms: u64,
    /// Channel readings
    pub channels: [f64; CHANNEL_COUNT],
}

impl Sample {
    /// Create new sample from a full channel array
    pub fn new(timestamp_ms: u64, channels: [f64; CHANNEL_COUNT]) -> Self {
        Self {
            timestamp_ms,
            channels,
        }
    }

    /// Create sample from a slice, validating the channel count
    pub fn from_slice(timestamp_ms: u64, values: &[f64]) -> PipelineResult<Self> {
        let channels: [f64; CHANNEL_COUNT] =
            values
                .try_into()
                .map_err(|_| PipelineError::MalformedSample {
                    expected: CHANNEL_COUNT,
                    actual: values.len(),
                })?;
        Ok(Self::new(timestamp_ms, channels))
    }

    /// Same value on every channel
    pub fn splat(timestamp_ms: u64, value: f64) -> Self {
        Self::new(timestamp_ms, [value; CHANNEL_COUNT])
    }

    /// Get reading for a channel
    pub fn channel(&self, index: usize) -> Option<f64> {
        self.channels.get(index).copied()
    }

    /// A reading of exactly zero means the transport had nothing for that channel
    pub fn is_missing(&self, index: usize) -> bool {
        self.channels.get(index).is_some_and(|v| *v == 0.0)
    }
}

/// Unvalidated sample as delivered by a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Monotonic timestamp in milliseconds
    pub timestamp_ms: u64,
    /// Channel readings, expected to hold exactly one value per channel
    pub values: Vec<f64>,
}

impl RawSample {
    pub fn new(timestamp_ms: u64, values: Vec<f64>) -> Self {
        Self {
            timestamp_ms,
            values,
        }
    }
}

impl TryFrom<RawSample> for Sample {
    type Error = PipelineError;

    fn try_from(raw: RawSample) -> PipelineResult<Self> {
        Sample::from_slice(raw.timestamp_ms, &raw.values)
    }
}

impl TryFrom<&RawSample> for Sample {
    type Error = PipelineError;

    fn try_from(raw: &RawSample) -> PipelineResult<Self> {
        Sample::from_slice(raw.timestamp_ms, &raw.values)
    }
}

impl From<Sample> for RawSample {
    fn from(sample: Sample) -> Self {
        RawSample::new(sample.timestamp_ms, sample.channels.to_vec())
    }
}

/// Pipeline output for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSample {
    /// Timestamp of the source sample
    pub timestamp_ms: u64,
    /// Filtered readings (original values where no filter ran)
    pub filtered: [f64; CHANNEL_COUNT],
    /// Per-channel spike flags, `None` when detection is disabled
    pub spikes: Option<[bool; CHANNEL_COUNT]>,
}

impl ProcessedSample {
    /// Output that passes the sample through untouched
    pub fn passthrough(sample: &Sample) -> Self {
        Self {
            timestamp_ms: sample.timestamp_ms,
            filtered: sample.channels,
            spikes: None,
        }
    }

    /// True if any channel flagged a spike on this tick
    pub fn any_spike(&self) -> bool {
        self.spikes.is_some_and(|s| s.iter().any(|&b| b))
    }

    /// Number of channels that flagged a spike on this tick
    pub fn spike_count(&self) -> usize {
        self.spikes
            .map(|s| s.iter().filter(|&&b| b).count())
            .unwrap_or(0)
    }
}
