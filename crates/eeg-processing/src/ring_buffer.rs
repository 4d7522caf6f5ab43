//! Fixed-capacity sample window with running statistics

use serde::{Deserialize, Serialize};

/// Window used by fixed and single-threshold detection
pub const DEFAULT_WINDOW: usize = 64;

/// Window used by dual-threshold detection and the NLMS reference
pub const EXTENDED_WINDOW: usize = 500;

/// Overwriting ring buffer of the most recent `capacity` readings
///
/// Mean and standard deviation are served from running sums. The sums are
/// rebuilt from the stored values once per lap to keep rounding from
/// accumulating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingBuffer {
    values: Vec<f64>,
    capacity: usize,
    head: usize,
    sum: f64,
    sum_sq: f64,
}

impl RingBuffer {
    /// Create an empty buffer; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    /// Append a value, evicting the oldest one once full
    pub fn push(&mut self, value: f64) {
        if self.values.len() < self.capacity {
            self.values.push(value);
        } else {
            let old = std::mem::replace(&mut self.values[self.head], value);
            self.sum -= old;
            self.sum_sq -= old * old;
        }
        self.sum += value;
        self.sum_sq += value * value;
        self.head = (self.head + 1) % self.capacity;

        if self.head == 0 {
            self.resum();
        }
    }

    fn resum(&mut self) {
        self.sum = self.values.iter().sum();
        self.sum_sq = self.values.iter().map(|v| v * v).sum();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Readiness signal for detection
    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    /// Mean of the stored values, zero when empty
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.sum / self.values.len() as f64
    }

    /// Population standard deviation of the stored values
    pub fn std_dev(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let n = self.values.len() as f64;
        let mean = self.sum / n;
        (self.sum_sq / n - mean * mean).max(0.0).sqrt()
    }

    /// Values in insertion order, oldest first
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let split = if self.is_full() { self.head } else { 0 };
        self.values[split..]
            .iter()
            .chain(self.values[..split].iter())
            .copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.head = 0;
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fills_then_reports_full() {
        let mut buffer = RingBuffer::new(4);
        for v in [1.0, 2.0, 3.0] {
            buffer.push(v);
        }
        assert!(!buffer.is_full());
        buffer.push(4.0);
        assert!(buffer.is_full());
        assert!((buffer.mean() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_overwrites_oldest() {
        let mut buffer = RingBuffer::new(3);
        for v in [1.0, 2.0, 3.0, 10.0] {
            buffer.push(v);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.iter().collect::<Vec<_>>(), vec![2.0, 3.0, 10.0]);
        assert!((buffer.mean() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_std_dev() {
        let mut buffer = RingBuffer::new(8);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            buffer.push(v);
        }
        assert!((buffer.mean() - 5.0).abs() < 1e-12);
        assert!((buffer.std_dev() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_running_sums_stay_exact_over_many_laps() {
        let mut buffer = RingBuffer::new(64);
        for i in 0..100_000 {
            buffer.push(1e6 + (i % 7) as f64);
        }
        let exact: f64 = buffer.iter().sum::<f64>() / 64.0;
        assert!((buffer.mean() - exact).abs() < 1e-6);
    }

    #[test]
    fn test_clear_and_empty() {
        let mut buffer = RingBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.mean(), 0.0);
        buffer.push(3.0);
        assert!(buffer.is_full());
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
