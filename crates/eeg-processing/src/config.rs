//! Configuration management for the processing pipeline

use crate::design::{FilterKind, DEFAULT_NOTCH_Q, DEFAULT_ORDER, MAX_ORDER};
use crate::detector::{DetectionMode, DetectorConfig};
use crate::filters::FilterConfig;
use eeg_core::{config_error, AdcFormat, PipelineResult, DEFAULT_SAMPLING_RATE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Processing presets for common recording situations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingProfile {
    /// No filtering, no detection
    Raw,
    /// Low-pass plus adaptive detection of blink artifacts
    EyeBlink,
    /// 50 Hz notch only
    LineNoise,
    /// Custom profile
    Custom,
}

/// Streaming filter selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// `None` disables filtering
    pub kind: Option<FilterKind>,
    pub cutoffs: Vec<f64>,
    /// Butterworth order
    pub order: usize,
    /// Notch quality factor
    pub q: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            kind: None,
            cutoffs: Vec::new(),
            order: DEFAULT_ORDER,
            q: DEFAULT_NOTCH_Q,
        }
    }
}

impl FilterSettings {
    pub fn new(kind: FilterKind, cutoffs: &[f64]) -> Self {
        Self {
            kind: Some(kind),
            cutoffs: cutoffs.to_vec(),
            ..Self::default()
        }
    }

    /// Resolve to a bank configuration at the given sampling rate
    pub fn to_filter_config(&self, sampling_rate: f64) -> PipelineResult<Option<FilterConfig>> {
        let Some(kind) = self.kind else {
            return Ok(None);
        };
        let config = FilterConfig {
            q: self.q,
            ..FilterConfig::from_cutoffs(kind, &self.cutoffs, self.order)?
                .with_sampling_rate(sampling_rate)
        };
        Ok(Some(config))
    }
}

/// Global processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Configuration name/profile
    pub name: String,
    pub profile: ProcessingProfile,
    /// Sampling rate of the incoming stream (Hz)
    pub sampling_rate: f64,
    /// Unit of the incoming channel values
    pub input_format: AdcFormat,
    pub filter: FilterSettings,
    /// Spike detection, disabled when `None`
    pub detector: Option<DetectorConfig>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self::for_profile(ProcessingProfile::Raw)
    }
}

impl ProcessingConfig {
    /// Preset configuration for a profile
    pub fn for_profile(profile: ProcessingProfile) -> Self {
        let base = Self {
            name: "Raw".to_string(),
            profile,
            sampling_rate: DEFAULT_SAMPLING_RATE,
            input_format: AdcFormat::Millivolts,
            filter: FilterSettings::default(),
            detector: None,
        };
        match profile {
            ProcessingProfile::Raw => base,
            ProcessingProfile::EyeBlink => Self {
                name: "Eye blink".to_string(),
                filter: FilterSettings::new(FilterKind::LowPass, &[15.0]),
                detector: Some(DetectorConfig::for_mode(DetectionMode::AdaptiveSingle)),
                ..base
            },
            ProcessingProfile::LineNoise => Self {
                name: "Line noise".to_string(),
                filter: FilterSettings::new(FilterKind::Notch, &[50.0]),
                ..base
            },
            ProcessingProfile::Custom => Self {
                name: "Custom".to_string(),
                ..base
            },
        }
    }

    /// Check every section; nothing is built on failure
    pub fn validate(&self) -> PipelineResult<()> {
        if !(self.sampling_rate > 0.0 && self.sampling_rate.is_finite()) {
            return Err(config_error!("sampling rate must be positive, got {}", self.sampling_rate));
        }
        if self.filter.order == 0 || self.filter.order > MAX_ORDER {
            return Err(config_error!(
                "filter order must be between 1 and {}, got {}",
                MAX_ORDER,
                self.filter.order
            ));
        }
        if let Some(filter) = self.filter.to_filter_config(self.sampling_rate)? {
            filter.validate()?;
        }
        if let Some(detector) = &self.detector {
            detector.validate()?;
        }
        Ok(())
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> PipelineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
