//! Per-sample processor trait and timing helpers

use eeg_core::{PipelineResult, ProcessedSample, RawSample};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Anything that turns raw transport samples into pipeline output
///
/// Implementors own all per-channel state and are driven from a single task.
pub trait SampleProcessor: Send {
    /// Process one raw sample; `label` is the optional per-tick ground truth
    fn process(&mut self, raw: &RawSample, label: Option<bool>) -> PipelineResult<ProcessedSample>;

    /// Get processor name/identifier
    fn name(&self) -> &str;

    /// Reset processor internal state
    fn reset(&mut self);

    /// Get processing latency estimate in microseconds
    fn latency_estimate(&self) -> u64 {
        100
    }
}

/// Timing and outcome of one processing call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingMetrics {
    /// Actual processing time in microseconds
    pub processing_time_us: u64,
    /// Success/failure status
    pub success: bool,
    /// Error message if processing failed
    pub error_message: Option<String>,
}

impl ProcessingMetrics {
    /// Start timing a processing operation
    pub fn start_timing() -> ProcessingTimer {
        ProcessingTimer {
            start_time: Instant::now(),
        }
    }

    /// True if the call succeeded within `max_latency_us`
    pub fn within_budget(&self, max_latency_us: u64) -> bool {
        self.success && self.processing_time_us <= max_latency_us
    }
}

/// Helper for timing processing operations
pub struct ProcessingTimer {
    start_time: Instant,
}

impl ProcessingTimer {
    fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Finish timing and return metrics
    pub fn finish(self) -> ProcessingMetrics {
        ProcessingMetrics {
            processing_time_us: self.elapsed_us(),
            success: true,
            error_message: None,
        }
    }

    /// Finish with error
    pub fn finish_with_error(self, error: &str) -> ProcessingMetrics {
        ProcessingMetrics {
            processing_time_us: self.elapsed_us(),
            success: false,
            error_message: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_processing_metrics() {
        let timer = ProcessingMetrics::start_timing();
        std::thread::sleep(Duration::from_millis(1));
        let metrics = timer.finish();

        assert!(metrics.processing_time_us > 0);
        assert!(metrics.success);
        assert!(metrics.error_message.is_none());
        assert!(metrics.within_budget(u64::MAX));
    }

    #[test]
    fn test_failed_metrics_never_within_budget() {
        let metrics = ProcessingMetrics::start_timing().finish_with_error("bad sample");
        assert!(!metrics.success);
        assert_eq!(metrics.error_message.as_deref(), Some("bad sample"));
        assert!(!metrics.within_budget(u64::MAX));
    }
}
