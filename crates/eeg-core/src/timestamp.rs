//! Millisecond stream timestamps
//!
//! Transports stamp each sample with a monotonic millisecond counter. The
//! pipeline only ever compares and subtracts these values, it never maps them
//! to wall-clock time.

use core::fmt;
use core::time::Duration;
use serde::{Deserialize, Serialize};

/// Monotonic millisecond timestamp attached to every sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct StreamTimestamp {
    millis: u64,
}

impl StreamTimestamp {
    /// Create a timestamp from milliseconds
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Timestamp of the `index`-th sample of a stream starting at `start`
    pub fn for_sample_index(start: StreamTimestamp, index: u64, sampling_rate: f64) -> Self {
        let offset = (index as f64 * 1000.0 / sampling_rate).round() as u64;
        Self::from_millis(start.millis.saturating_add(offset))
    }

    /// Get milliseconds
    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.millis
    }

    /// Elapsed time since an earlier timestamp, zero if `earlier` is later
    #[inline]
    pub fn saturating_duration_since(&self, earlier: StreamTimestamp) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(earlier.millis))
    }
}

impl From<u64> for StreamTimestamp {
    fn from(millis: u64) -> Self {
        Self::from_millis(millis)
    }
}

impl fmt::Display for StreamTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.millis / 1000, self.millis % 1000)
    }
}
