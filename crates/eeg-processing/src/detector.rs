//! Adaptive spike detection
//!
//! Each channel tracks an exponentially smoothed baseline and flags ticks
//! whose deviation from it crosses a threshold. Three modes decide where the
//! threshold comes from:
//!
//! - [`DetectionMode::Fixed`]: a constant threshold
//! - [`DetectionMode::AdaptiveSingle`]: an RMS-style threshold that follows
//!   the deviation itself, no ground truth needed
//! - [`DetectionMode::AdaptiveDual`]: a `(delta_min, delta_max)` band that is
//!   corrected from per-tick labels with a `1/(1+t)` learning rate
//!
//! An optional NLMS stage cancels a synthetic reference drawn from the
//! channel's own window statistics before classification.

use crate::nlms::{NlmsConfig, NlmsFilter};
use crate::ring_buffer::{RingBuffer, DEFAULT_WINDOW, EXTENDED_WINDOW};
use eeg_core::{config_error, PipelineError, PipelineResult, Sample, CHANNEL_COUNT};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Threshold strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMode {
    Fixed,
    #[default]
    AdaptiveSingle,
    AdaptiveDual,
}

impl DetectionMode {
    /// True if the mode learns from labels
    pub fn is_supervised(&self) -> bool {
        matches!(self, DetectionMode::AdaptiveDual)
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectionMode::Fixed => "fixed",
            DetectionMode::AdaptiveSingle => "adaptive-single",
            DetectionMode::AdaptiveDual => "adaptive-dual",
        };
        f.write_str(name)
    }
}

impl FromStr for DetectionMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "fixed" => Ok(DetectionMode::Fixed),
            "adaptive" | "adaptive-single" => Ok(DetectionMode::AdaptiveSingle),
            "dual" | "adaptive-dual" => Ok(DetectionMode::AdaptiveDual),
            other => Err(config_error!("unrecognized detector mode '{}'", other)),
        }
    }
}

/// Outcome of one single-threshold step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SdedStep {
    /// Absolute deviation from the baseline before the update
    pub measure: f64,
    pub spike: bool,
    /// Updated baseline
    pub mean: f64,
    /// Updated threshold (unchanged in fixed mode)
    pub threshold: f64,
}

/// Baseline update shared by every mode
///
/// Spike ticks blend toward the midpoint of sample and baseline at half rate
/// so artifacts drag the baseline less.
#[inline]
pub fn update_mean(x: f64, mean: f64, alpha: f64, spike: bool) -> f64 {
    if spike {
        let reduced = alpha / 2.0;
        reduced * (x + mean) / 2.0 + (1.0 - reduced) * mean
    } else {
        alpha * x + (1.0 - alpha) * mean
    }
}

/// Fixed-threshold step
#[inline]
pub fn sded_fixed(x: f64, mean: f64, alpha: f64, threshold: f64) -> SdedStep {
    let measure = (x - mean).abs();
    let spike = measure > threshold;
    SdedStep {
        measure,
        spike,
        mean: update_mean(x, mean, alpha, spike),
        threshold,
    }
}

/// Self-adaptive threshold step
#[inline]
pub fn sded_adaptive(x: f64, mean: f64, alpha: f64, alpha_delta: f64, threshold: f64) -> SdedStep {
    let step = sded_fixed(x, mean, alpha, threshold);
    let a = if step.spike { alpha_delta / 2.0 } else { alpha_delta };
    SdedStep {
        threshold: (a * step.measure * step.measure + (1.0 - a) * threshold * threshold).sqrt(),
        ..step
    }
}

/// Dual-threshold parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DualThresholdConfig {
    pub delta_min: f64,
    pub delta_max: f64,
    /// Initial learning rate, divided by `1 + corrections`
    pub learning_rate: f64,
    /// Upper clamp for both bounds
    pub max_cap: f64,
}

impl Default for DualThresholdConfig {
    fn default() -> Self {
        Self {
            delta_min: 20.0,
            delta_max: 5000.0,
            learning_rate: 0.5,
            max_cap: 10_000.0,
        }
    }
}

impl DualThresholdConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if !(self.max_cap > 0.0 && self.max_cap.is_finite()) {
            return Err(config_error!("dual threshold cap must be positive"));
        }
        if !(self.delta_min >= 0.0 && self.delta_min < self.delta_max && self.delta_max <= self.max_cap) {
            return Err(config_error!(
                "dual thresholds must satisfy 0 <= min < max <= cap, got ({}, {}) with cap {}",
                self.delta_min,
                self.delta_max,
                self.max_cap
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(config_error!("dual threshold learning rate must be positive"));
        }
        Ok(())
    }
}

/// Result of a supervised correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DualUpdate {
    /// Prediction matched the label
    NoCorrection,
    Applied { delta_min: f64, delta_max: f64 },
    /// The correction would have inverted the band and was discarded
    Rejected { proposed_min: f64, proposed_max: f64 },
}

/// Lower and upper deviation bounds; `delta_min < delta_max` always holds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DualThreshold {
    delta_min: f64,
    delta_max: f64,
    corrections: u64,
}

impl DualThreshold {
    pub fn new(delta_min: f64, delta_max: f64) -> PipelineResult<Self> {
        if !(delta_min < delta_max) {
            return Err(config_error!(
                "lower threshold {} must be below upper threshold {}",
                delta_min,
                delta_max
            ));
        }
        Ok(Self {
            delta_min,
            delta_max,
            corrections: 0,
        })
    }

    pub fn delta_min(&self) -> f64 {
        self.delta_min
    }

    pub fn delta_max(&self) -> f64 {
        self.delta_max
    }

    /// Applied corrections so far
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    /// Spike iff the measure lies strictly inside the band
    #[inline]
    pub fn classify(&self, measure: f64) -> bool {
        self.delta_min < measure && measure < self.delta_max
    }

    /// Correct the band from a ground-truth label
    ///
    /// A missed positive moves the bound the measure fell outside of toward
    /// it. A false positive moves the nearer bound toward it, shrinking the
    /// band. Both bounds are clamped to `[0, max_cap]`; a result that is not
    /// strictly ordered leaves the band untouched.
    pub fn adapt(&mut self, measure: f64, label: bool, learning_rate: f64, max_cap: f64) -> DualUpdate {
        if self.classify(measure) == label {
            return DualUpdate::NoCorrection;
        }
        let eta = learning_rate / (1.0 + self.corrections as f64);
        let (mut lo, mut hi) = (self.delta_min, self.delta_max);

        let move_lower = if label {
            measure <= lo
        } else {
            measure - lo <= hi - measure
        };
        if move_lower {
            lo += eta * (measure - lo);
        } else {
            hi += eta * (measure - hi);
        }

        // max/min rather than clamp: NaN collapses to a bound instead of panicking
        lo = lo.max(0.0).min(max_cap);
        hi = hi.max(0.0).min(max_cap);

        if !(lo < hi) {
            return DualUpdate::Rejected {
                proposed_min: lo,
                proposed_max: hi,
            };
        }
        self.delta_min = lo;
        self.delta_max = hi;
        self.corrections += 1;
        DualUpdate::Applied {
            delta_min: lo,
            delta_max: hi,
        }
    }
}

/// Detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub mode: DetectionMode,
    /// Baseline learning rate
    pub alpha: f64,
    /// Threshold learning rate for the adaptive single mode
    pub alpha_delta: f64,
    /// Initial (or constant) single threshold
    pub threshold: f64,
    pub dual: DualThresholdConfig,
    /// Reference cancellation stage, disabled when `None`
    pub nlms: Option<NlmsConfig>,
    /// Window length; picked from the mode when `None`
    pub window: Option<usize>,
    /// Detect on the deviation from the previous window's mean
    pub subtract_moving_average: bool,
    /// Seed for the NLMS reference generator
    pub seed: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::AdaptiveSingle,
            alpha: 0.01,
            alpha_delta: 0.01,
            threshold: 100.0,
            dual: DualThresholdConfig::default(),
            nlms: None,
            window: None,
            subtract_moving_average: true,
            seed: 0,
        }
    }
}

impl DetectorConfig {
    /// Default configuration for a mode
    pub fn for_mode(mode: DetectionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Enable the NLMS stage
    pub fn with_nlms(mut self, nlms: NlmsConfig) -> Self {
        self.nlms = Some(nlms);
        self
    }

    /// Window length actually used
    pub fn window_len(&self) -> usize {
        match self.window {
            Some(len) => len,
            None if self.mode.is_supervised() || self.nlms.is_some() => EXTENDED_WINDOW,
            None => DEFAULT_WINDOW,
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        for (name, rate) in [("alpha", self.alpha), ("alpha_delta", self.alpha_delta)] {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(config_error!("{} must be in (0, 1], got {}", name, rate));
            }
        }
        if !(self.threshold >= 0.0 && self.threshold.is_finite()) {
            return Err(config_error!("threshold must be a non-negative number, got {}", self.threshold));
        }
        if self.window == Some(0) {
            return Err(config_error!("detector window must hold at least one sample"));
        }
        if self.mode.is_supervised() {
            self.dual.validate()?;
        }
        if let Some(nlms) = &self.nlms {
            nlms.validate()?;
        }
        Ok(())
    }
}

/// Per-channel detector state
#[derive(Debug, Clone)]
pub struct DetectorState {
    mean: f64,
    threshold: f64,
    dual: DualThreshold,
    window: RingBuffer,
    nlms: Option<NlmsFilter>,
    last_measure: f64,
    spike_count: u64,
}

impl DetectorState {
    fn new(config: &DetectorConfig) -> PipelineResult<Self> {
        let dual = if config.mode.is_supervised() {
            DualThreshold::new(config.dual.delta_min, config.dual.delta_max)?
        } else {
            DualThreshold {
                delta_min: 0.0,
                delta_max: config.dual.max_cap.max(f64::MIN_POSITIVE),
                corrections: 0,
            }
        };
        Ok(Self {
            mean: 0.0,
            threshold: config.threshold,
            dual,
            window: RingBuffer::new(config.window_len()),
            nlms: config.nlms.as_ref().map(NlmsFilter::new).transpose()?,
            last_measure: 0.0,
            spike_count: 0,
        })
    }

    /// Baseline estimate
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Current single threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn dual(&self) -> &DualThreshold {
        &self.dual
    }

    pub fn window(&self) -> &RingBuffer {
        &self.window
    }

    pub fn nlms(&self) -> Option<&NlmsFilter> {
        self.nlms.as_ref()
    }

    /// Deviation computed on the last classified tick
    pub fn last_measure(&self) -> f64 {
        self.last_measure
    }

    pub fn spike_count(&self) -> u64 {
        self.spike_count
    }

    /// True once the window is full and classification is active
    pub fn is_ready(&self) -> bool {
        self.window.is_full()
    }
}

/// Per-channel spike detector for 8-channel samples
#[derive(Debug)]
pub struct AdaptiveSpikeDetector {
    config: DetectorConfig,
    channels: Vec<DetectorState>,
    rng: StdRng,
    reference: Vec<f64>,
}

impl AdaptiveSpikeDetector {
    pub fn new(config: DetectorConfig) -> PipelineResult<Self> {
        config.validate()?;
        let channels = (0..CHANNEL_COUNT)
            .map(|_| DetectorState::new(&config))
            .collect::<PipelineResult<Vec<_>>>()?;
        let order = config.nlms.map(|n| n.order).unwrap_or(0);
        debug!(mode = %config.mode, window = config.window_len(), nlms = order, "spike detector created");
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            reference: vec![0.0; order],
            channels,
            config,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Classify one sample; `label` is ground truth for every channel
    ///
    /// Labels only matter in the dual mode. Channels whose window is not yet
    /// full record the value and report no spike.
    pub fn detect(&mut self, sample: &Sample, label: Option<bool>) -> [bool; CHANNEL_COUNT] {
        let mut spikes = [false; CHANNEL_COUNT];
        for (channel, state) in self.channels.iter_mut().enumerate() {
            spikes[channel] = detect_channel(
                &self.config,
                state,
                &mut self.rng,
                &mut self.reference,
                channel,
                sample.channels[channel],
                label,
            );
        }
        spikes
    }

    pub fn channel_state(&self, channel: usize) -> Option<&DetectorState> {
        self.channels.get(channel)
    }

    /// Reinitialize every channel and reseed the reference generator
    pub fn reset(&mut self) {
        for state in &mut self.channels {
            // construction already succeeded once with this config
            if let Ok(fresh) = DetectorState::new(&self.config) {
                *state = fresh;
            }
        }
        self.rng = StdRng::seed_from_u64(self.config.seed);
        debug!("spike detector reset");
    }
}

fn detect_channel(
    config: &DetectorConfig,
    state: &mut DetectorState,
    rng: &mut StdRng,
    reference: &mut [f64],
    channel: usize,
    x: f64,
    label: Option<bool>,
) -> bool {
    if !state.window.is_full() {
        state.window.push(x);
        return false;
    }

    let mut value = if config.subtract_moving_average {
        x - state.window.mean()
    } else {
        x
    };

    if let Some(nlms) = state.nlms.as_mut() {
        let mean = state.window.mean();
        match Normal::new(mean, state.window.std_dev()) {
            Ok(normal) => reference.iter_mut().for_each(|r| *r = normal.sample(rng)),
            Err(_) => reference.iter_mut().for_each(|r| *r = mean),
        }
        value = nlms.step(reference, value).error;
    }
    state.window.push(x);

    let (measure, spike) = match config.mode {
        DetectionMode::Fixed => {
            let step = sded_fixed(value, state.mean, config.alpha, state.threshold);
            state.mean = step.mean;
            (step.measure, step.spike)
        }
        DetectionMode::AdaptiveSingle => {
            let step = sded_adaptive(value, state.mean, config.alpha, config.alpha_delta, state.threshold);
            state.mean = step.mean;
            state.threshold = step.threshold;
            (step.measure, step.spike)
        }
        DetectionMode::AdaptiveDual => {
            let measure = (value - state.mean).abs();
            let spike = state.dual.classify(measure);
            state.mean = update_mean(value, state.mean, config.alpha, spike);
            if let Some(label) = label {
                let dual = &config.dual;
                if let DualUpdate::Rejected { proposed_min, proposed_max } =
                    state.dual.adapt(measure, label, dual.learning_rate, dual.max_cap)
                {
                    debug!(channel, proposed_min, proposed_max, "dual threshold update rejected");
                }
            }
            (measure, spike)
        }
    };

    state.last_measure = measure;
    if spike {
        state.spike_count += 1;
    }
    spike
}
