//! Streaming filter bank for per-channel real-time filtering
//!
//! Every (channel, configuration) pair owns one [`FilterState`] that is
//! designed lazily on the first sample it sees and then kept until
//! [`StreamingFilterBank::clear`] runs. Reconfiguring a channel does not touch
//! the previous state; it simply starts a new cache entry.

use crate::design::{self, CoefficientSet, FilterKind, SecondOrderSection, DEFAULT_NOTCH_Q, DEFAULT_ORDER};
use crate::iir::{self, NormalizedTf};
use eeg_core::{config_error, PipelineResult, Sample, CHANNEL_COUNT, DEFAULT_SAMPLING_RATE};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Filter configuration parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Filter type
    pub kind: FilterKind,
    /// Cutoff (Hz); only the first entry is used by single-cutoff kinds
    pub cutoffs: [f64; 2],
    /// Butterworth order, ignored by the notch
    #[serde(default = "default_order")]
    pub order: usize,
    /// Sampling rate the coefficients are designed for (Hz)
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,
    /// Notch quality factor
    #[serde(default = "default_q")]
    pub q: f64,
}

fn default_order() -> usize {
    DEFAULT_ORDER
}

fn default_sampling_rate() -> f64 {
    DEFAULT_SAMPLING_RATE
}

fn default_q() -> f64 {
    DEFAULT_NOTCH_Q
}

impl FilterConfig {
    /// Create lowpass filter configuration
    pub fn lowpass(cutoff: f64, order: usize) -> Self {
        Self::new(FilterKind::LowPass, [cutoff, 0.0], order)
    }

    /// Create highpass filter configuration
    pub fn highpass(cutoff: f64, order: usize) -> Self {
        Self::new(FilterKind::HighPass, [cutoff, 0.0], order)
    }

    /// Create bandpass filter configuration
    pub fn bandpass(low: f64, high: f64, order: usize) -> Self {
        Self::new(FilterKind::BandPass, [low, high], order)
    }

    /// Create notch filter configuration
    pub fn notch(freq: f64, q: f64) -> Self {
        Self {
            q,
            ..Self::new(FilterKind::Notch, [freq, 0.0], 2)
        }
    }

    /// Build from a kind and a 1 or 2 element cutoff list
    ///
    /// Single-cutoff kinds take the first entry and ignore the rest, the way
    /// the control panel sends a `[min, max]` pair for every kind.
    pub fn from_cutoffs(kind: FilterKind, cutoffs: &[f64], order: usize) -> PipelineResult<Self> {
        let pair = match (kind.cutoff_count(), cutoffs) {
            (1, [c, ..]) => [*c, 0.0],
            (2, [lo, hi]) => [*lo, *hi],
            _ => {
                return Err(config_error!(
                    "{} filter takes {} cutoff(s), got {}",
                    kind,
                    kind.cutoff_count(),
                    cutoffs.len()
                ))
            }
        };
        Ok(Self::new(kind, pair, order))
    }

    fn new(kind: FilterKind, cutoffs: [f64; 2], order: usize) -> Self {
        Self {
            kind,
            cutoffs,
            order,
            sampling_rate: DEFAULT_SAMPLING_RATE,
            q: DEFAULT_NOTCH_Q,
        }
    }

    /// Set the design sampling rate
    pub fn with_sampling_rate(mut self, sampling_rate: f64) -> Self {
        self.sampling_rate = sampling_rate;
        self
    }

    /// Cutoffs that apply to this kind
    pub fn cutoff_slice(&self) -> &[f64] {
        &self.cutoffs[..self.kind.cutoff_count()]
    }

    /// Design the coefficients for this configuration
    pub fn design(&self) -> PipelineResult<CoefficientSet> {
        match self.kind {
            FilterKind::Notch => {
                design::design_notch(self.cutoffs[0], self.q, self.sampling_rate)
            }
            kind => design::design_butterworth(
                kind,
                self.cutoff_slice(),
                self.sampling_rate,
                self.order,
            ),
        }
    }

    /// Check the configuration without keeping any state
    pub fn validate(&self) -> PipelineResult<()> {
        let coefficients = self.design()?;
        iir::steady_state(&coefficients).map(|_| ())
    }

    /// Zero-phase filtering of a complete recording
    pub fn apply_zero_phase(&self, signal: &[f64]) -> PipelineResult<Vec<f64>> {
        iir::zero_phase(&self.design()?, signal)
    }
}

/// Cache key: channel index plus the bit patterns of the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterKey {
    channel: usize,
    kind: FilterKind,
    cutoffs: [u64; 2],
    order: usize,
    sampling_rate: u64,
    q: u64,
}

impl FilterKey {
    pub fn new(channel: usize, config: &FilterConfig) -> Self {
        let single = config.kind.cutoff_count() == 1;
        Self {
            channel,
            kind: config.kind,
            cutoffs: [
                config.cutoffs[0].to_bits(),
                if single { 0 } else { config.cutoffs[1].to_bits() },
            ],
            order: if config.kind == FilterKind::Notch { 0 } else { config.order },
            sampling_rate: config.sampling_rate.to_bits(),
            q: if config.kind == FilterKind::Notch { config.q.to_bits() } else { 0 },
        }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }
}

#[derive(Debug, Clone)]
enum Kernel {
    Tf(NormalizedTf),
    Sos(Vec<SecondOrderSection>),
}

/// Coefficients plus delay line for one (channel, configuration) pair
#[derive(Debug, Clone)]
pub struct FilterState {
    id: u64,
    kernel: Kernel,
    delay: Vec<f64>,
    samples_processed: u64,
}

impl FilterState {
    /// Design the filter and settle the delay line on `first_input`
    fn new(id: u64, config: &FilterConfig, first_input: f64) -> PipelineResult<Self> {
        let coefficients = config.design()?;
        let zi = iir::steady_state(&coefficients)?;
        let kernel = match &coefficients {
            CoefficientSet::TransferFunction { b, a } => Kernel::Tf(NormalizedTf::new(b, a)?),
            CoefficientSet::SecondOrderSections(sections) => Kernel::Sos(sections.clone()),
        };
        Ok(Self {
            id,
            kernel,
            delay: zi.into_iter().map(|v| v * first_input).collect(),
            samples_processed: 0,
        })
    }

    #[inline]
    fn step(&mut self, x: f64) -> f64 {
        self.samples_processed += 1;
        match &self.kernel {
            Kernel::Tf(tf) => iir::tf_step(tf, &mut self.delay, x),
            Kernel::Sos(sections) => iir::sos_step(sections, &mut self.delay, x),
        }
    }

    /// Identity of this state; a new id is issued on every creation
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current delay line contents
    pub fn delay_line(&self) -> &[f64] {
        &self.delay
    }

    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }
}

/// Per-channel state cache for streaming filters
#[derive(Debug, Default)]
pub struct StreamingFilterBank {
    active: Option<FilterConfig>,
    butterworth_states: HashMap<FilterKey, FilterState>,
    notch_states: HashMap<FilterKey, FilterState>,
    next_id: u64,
}

impl StreamingFilterBank {
    /// Create an empty filter bank with no active filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter bank with `config` applied to every channel
    pub fn with_config(config: FilterConfig) -> PipelineResult<Self> {
        let mut bank = Self::new();
        bank.configure(Some(config))?;
        Ok(bank)
    }

    /// Select the filter used by [`apply_channels`](Self::apply_channels)
    ///
    /// The configuration is validated up front; on error the previous
    /// selection stays active and no state is created.
    pub fn configure(&mut self, config: Option<FilterConfig>) -> PipelineResult<()> {
        if let Some(config) = &config {
            config.validate()?;
        }
        debug!(?config, "filter bank configured");
        self.active = config;
        Ok(())
    }

    pub fn active_config(&self) -> Option<&FilterConfig> {
        self.active.as_ref()
    }

    /// Filter one value of one channel, creating its state on first use
    pub fn streaming_apply(
        &mut self,
        channel: usize,
        config: &FilterConfig,
        sample: f64,
    ) -> PipelineResult<f64> {
        let key = FilterKey::new(channel, config);
        let states = if config.kind.is_butterworth() {
            &mut self.butterworth_states
        } else {
            &mut self.notch_states
        };
        let state = match states.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let state = FilterState::new(self.next_id, config, sample)?;
                debug!(
                    channel,
                    kind = %config.kind,
                    id = state.id,
                    delay = state.delay.len(),
                    "created filter state"
                );
                self.next_id += 1;
                entry.insert(state)
            }
        };
        Ok(state.step(sample))
    }

    /// Apply the active filter to every channel of a sample
    ///
    /// Channels reading exactly zero carry no data on this tick and pass
    /// through unfiltered without advancing their state.
    pub fn apply_channels(&mut self, sample: &Sample) -> PipelineResult<[f64; CHANNEL_COUNT]> {
        let mut out = sample.channels;
        let Some(config) = self.active else {
            return Ok(out);
        };
        for (channel, value) in out.iter_mut().enumerate() {
            if sample.is_missing(channel) {
                continue;
            }
            *value = self.streaming_apply(channel, &config, *value)?;
        }
        Ok(out)
    }

    /// Look up the cached state for a (channel, configuration) pair
    pub fn state(&self, channel: usize, config: &FilterConfig) -> Option<&FilterState> {
        let key = FilterKey::new(channel, config);
        if config.kind.is_butterworth() {
            self.butterworth_states.get(&key)
        } else {
            self.notch_states.get(&key)
        }
    }

    /// Number of cached states across both filter families
    pub fn state_count(&self) -> usize {
        self.butterworth_states.len() + self.notch_states.len()
    }

    /// Drop every cached state; the active selection is kept
    pub fn clear(&mut self) {
        debug!(
            butterworth = self.butterworth_states.len(),
            notch = self.notch_states.len(),
            "clearing filter states"
        );
        self.butterworth_states.clear();
        self.notch_states.clear();
    }
}

/// Zero-phase filtering of a pre-recorded signal; never touches a bank
pub fn batch_apply(
    kind: FilterKind,
    cutoffs: &[f64],
    sampling_rate: f64,
    order: usize,
    signal: &[f64],
) -> PipelineResult<Vec<f64>> {
    if cutoffs.len() != kind.cutoff_count() {
        return Err(config_error!(
            "{} filter takes {} cutoff(s), got {}",
            kind,
            kind.cutoff_count(),
            cutoffs.len()
        ));
    }
    FilterConfig::from_cutoffs(kind, cutoffs, order)?
        .with_sampling_rate(sampling_rate)
        .apply_zero_phase(signal)
}
