//! Synthetic 8-channel EEG with alpha rhythm, noise, line hum and artifacts

use crate::signal_patterns::ArtifactPattern;
use eeg_core::{config_error, PipelineResult, RawSample, StreamTimestamp, CHANNEL_COUNT};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Configuration for EEG simulation (amplitudes in millivolts)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EegConfig {
    /// Sampling rate in Hz
    pub sampling_rate: f64,
    /// Alpha rhythm centre frequency
    pub alpha_frequency: f64,
    pub alpha_amplitude: f64,
    /// Gaussian noise standard deviation (0.0 = no noise)
    pub noise_std: f64,
    /// Power line interference (50/60Hz)
    pub powerline_freq: Option<f64>,
    pub powerline_amplitude: f64,
    /// Artifact timing and strength
    pub artifact: ArtifactPattern,
    /// Channels that pick up artifacts (frontal electrodes for blinks)
    pub artifact_channels: Vec<usize>,
    /// Probability that a channel reads exactly zero on a tick
    pub dropout_probability: f64,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

impl Default for EegConfig {
    fn default() -> Self {
        Self {
            sampling_rate: eeg_core::DEFAULT_SAMPLING_RATE,
            alpha_frequency: 10.0,
            alpha_amplitude: 20.0,
            noise_std: 5.0,
            powerline_freq: Some(50.0),
            powerline_amplitude: 10.0,
            artifact: ArtifactPattern::default(),
            artifact_channels: vec![0, 1],
            dropout_probability: 0.0,
            seed: None,
        }
    }
}

impl EegConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if !(self.sampling_rate > 0.0 && self.sampling_rate.is_finite()) {
            return Err(config_error!("sampling rate must be positive, got {}", self.sampling_rate));
        }
        if let Some(&channel) = self.artifact_channels.iter().find(|&&c| c >= CHANNEL_COUNT) {
            return Err(config_error!("artifact channel {} out of range", channel));
        }
        if !(0.0..=1.0).contains(&self.dropout_probability) {
            return Err(config_error!(
                "dropout probability must be within [0, 1], got {}",
                self.dropout_probability
            ));
        }
        Ok(())
    }
}

/// One simulated sample plus its ground-truth artifact label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSample {
    pub sample: RawSample,
    /// True while an artifact is being injected
    pub artifact: bool,
}

/// EEG signal simulator
pub struct EegSimulator {
    config: EegConfig,
    rng: StdRng,
    noise: Normal<f64>,
    start: StreamTimestamp,
    sample_index: u64,
}

impl EegSimulator {
    /// Create new EEG simulator with configuration
    pub fn new(config: EegConfig) -> PipelineResult<Self> {
        config.validate()?;

        let seed = config.seed.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        });
        let noise = Normal::new(0.0, config.noise_std)
            .map_err(|e| config_error!("invalid noise level {}: {}", config.noise_std, e))?;

        Ok(Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            noise,
            start: StreamTimestamp::default(),
            sample_index: 0,
        })
    }

    /// Stream time of the next sample in seconds
    pub fn current_time(&self) -> f64 {
        self.sample_index as f64 / self.config.sampling_rate
    }

    /// Generate the next sample
    pub fn next_sample(&mut self) -> LabeledSample {
        let time = self.current_time();
        let timestamp =
            StreamTimestamp::for_sample_index(self.start, self.sample_index, self.config.sampling_rate);
        let artifact_value = self.config.artifact.value_at(time);

        let mut values = Vec::with_capacity(CHANNEL_COUNT);
        for channel in 0..CHANNEL_COUNT {
            if self.config.dropout_probability > 0.0
                && self.rng.gen::<f64>() < self.config.dropout_probability
            {
                values.push(0.0);
                continue;
            }
            let mut value = self.background(time, channel);
            if self.config.artifact_channels.contains(&channel) {
                value += artifact_value;
            }
            values.push(value);
        }
        self.sample_index += 1;

        LabeledSample {
            sample: RawSample::new(timestamp.as_millis(), values),
            artifact: self.config.artifact.is_active(time),
        }
    }

    /// Alpha rhythm, noise and line hum for one channel
    fn background(&mut self, time: f64, channel: usize) -> f64 {
        // slight frequency and phase spread across the montage
        let freq = self.config.alpha_frequency + channel as f64 * 0.25;
        let phase = channel as f64 * PI / 8.0;
        let mut value = self.config.alpha_amplitude * (2.0 * PI * freq * time + phase).sin();

        value += self.noise.sample(&mut self.rng);

        if let Some(line) = self.config.powerline_freq {
            value += self.config.powerline_amplitude * (2.0 * PI * line * time).sin();
        }
        value
    }

    /// Generate `duration` seconds of samples
    pub fn generate(&mut self, duration: f64) -> Vec<LabeledSample> {
        let count = (duration * self.config.sampling_rate).round() as usize;
        (0..count).map(|_| self.next_sample()).collect()
    }

    /// Samples produced since the last reset
    pub fn sample_index(&self) -> u64 {
        self.sample_index
    }

    /// Restart the stream clock
    pub fn reset_time(&mut self) {
        self.sample_index = 0;
    }

    /// Get current configuration
    pub fn config(&self) -> &EegConfig {
        &self.config
    }

    /// Update configuration; the stream clock keeps running
    pub fn update_config(&mut self, config: EegConfig) -> PipelineResult<()> {
        config.validate()?;
        self.noise = Normal::new(0.0, config.noise_std)
            .map_err(|e| config_error!("invalid noise level {}: {}", config.noise_std, e))?;
        self.config = config;
        Ok(())
    }

    /// Swap the artifact pattern
    pub fn set_artifact(&mut self, artifact: ArtifactPattern) {
        self.config.artifact = artifact;
    }
}
