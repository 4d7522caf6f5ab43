//! Filter-then-detect pipeline for one sample stream

use crate::config::ProcessingConfig;
use crate::design::FilterKind;
use crate::detector::{AdaptiveSpikeDetector, DetectionMode, DetectorConfig};
use crate::filters::{FilterConfig, StreamingFilterBank};
use crate::nlms::NlmsConfig;
use crate::processor::SampleProcessor;
use eeg_core::{
    config_error, AdcFormat, PipelineResult, ProcessedSample, RawSample, Sample, CHANNEL_COUNT,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Filter selection sent by a control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCommand {
    /// `None` turns filtering off
    pub kind: Option<FilterKind>,
    /// One or two cutoffs in Hz
    #[serde(default)]
    pub cutoffs: Vec<f64>,
    /// Drop the active filter and every cached state
    #[serde(default)]
    pub clear: bool,
}

impl FilterCommand {
    pub fn apply(kind: FilterKind, cutoffs: &[f64]) -> Self {
        Self {
            kind: Some(kind),
            cutoffs: cutoffs.to_vec(),
            clear: false,
        }
    }

    pub fn clear() -> Self {
        Self {
            kind: None,
            cutoffs: Vec::new(),
            clear: true,
        }
    }
}

/// Detector selection sent by a control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorCommand {
    /// `None` turns detection off
    pub mode: Option<DetectionMode>,
    #[serde(default)]
    pub use_nlms: bool,
    /// NLMS parameters, falling back to the configured ones
    #[serde(default)]
    pub nlms: Option<NlmsConfig>,
}

impl DetectorCommand {
    pub fn enable(mode: DetectionMode) -> Self {
        Self {
            mode: Some(mode),
            use_nlms: false,
            nlms: None,
        }
    }

    pub fn disable() -> Self {
        Self {
            mode: None,
            use_nlms: false,
            nlms: None,
        }
    }
}

/// Streaming pipeline: unit conversion, filtering, then spike detection
#[derive(Debug)]
pub struct SamplePipeline {
    name: String,
    sampling_rate: f64,
    input_format: AdcFormat,
    filter_order: usize,
    notch_q: f64,
    bank: StreamingFilterBank,
    detector: Option<AdaptiveSpikeDetector>,
    detector_template: DetectorConfig,
}

impl SamplePipeline {
    /// Build a pipeline from a validated configuration
    pub fn new(config: &ProcessingConfig) -> PipelineResult<Self> {
        config.validate()?;
        let mut bank = StreamingFilterBank::new();
        bank.configure(config.filter.to_filter_config(config.sampling_rate)?)?;
        let detector = config
            .detector
            .clone()
            .map(AdaptiveSpikeDetector::new)
            .transpose()?;

        info!(
            name = %config.name,
            sampling_rate = config.sampling_rate,
            filter = ?bank.active_config().map(|c| c.kind),
            detector = ?detector.as_ref().map(|d| d.config().mode),
            "pipeline created"
        );

        Ok(Self {
            name: config.name.clone(),
            sampling_rate: config.sampling_rate,
            input_format: config.input_format,
            filter_order: config.filter.order,
            notch_q: config.filter.q,
            bank,
            detector,
            detector_template: config.detector.clone().unwrap_or_default(),
        })
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    pub fn filter_bank(&self) -> &StreamingFilterBank {
        &self.bank
    }

    pub fn detector(&self) -> Option<&AdaptiveSpikeDetector> {
        self.detector.as_ref()
    }

    /// Run one validated sample through filter and detector
    pub fn process_sample(
        &mut self,
        sample: &Sample,
        label: Option<bool>,
    ) -> PipelineResult<ProcessedSample> {
        let mut input = *sample;
        self.input_format.convert_in_place(&mut input.channels);
        let mut output = ProcessedSample::passthrough(&input);
        output.filtered = self.bank.apply_channels(&input)?;
        if let Some(detector) = self.detector.as_mut() {
            let filtered = Sample::new(input.timestamp_ms, output.filtered);
            output.spikes = Some(detector.detect(&filtered, label));
        }
        Ok(output)
    }

    /// Switch the active filter; returns a status line
    ///
    /// On error the previous filter stays active.
    pub fn apply_filter_command(&mut self, command: &FilterCommand) -> PipelineResult<String> {
        if command.clear {
            self.bank.configure(None)?;
            self.bank.clear();
            return Ok("Filter cleared.".to_string());
        }
        let Some(kind) = command.kind else {
            self.bank.configure(None)?;
            return Ok("No filter applied.".to_string());
        };
        let config = FilterConfig {
            q: self.notch_q,
            ..FilterConfig::from_cutoffs(kind, &command.cutoffs, self.filter_order)?
                .with_sampling_rate(self.sampling_rate)
        };
        self.bank.configure(Some(config))?;

        let status = match kind {
            FilterKind::LowPass | FilterKind::HighPass => {
                format!("Applying {} filter with threshold {} Hz", kind, config.cutoffs[0])
            }
            FilterKind::BandPass => format!(
                "Applying {} filter with range {}-{} Hz",
                kind, config.cutoffs[0], config.cutoffs[1]
            ),
            FilterKind::Notch => format!("Applying {} filter at {} Hz", kind, config.cutoffs[0]),
        };
        Ok(status)
    }

    /// Switch detection mode; returns a status line
    ///
    /// A new detector starts from scratch. On error the previous one is kept.
    pub fn apply_detector_command(&mut self, command: &DetectorCommand) -> PipelineResult<String> {
        let Some(mode) = command.mode else {
            self.detector = None;
            return Ok("Spike detection disabled.".to_string());
        };
        let nlms = if command.use_nlms {
            let params = command.nlms.or(self.detector_template.nlms).ok_or_else(|| {
                config_error!("NLMS stage requested without mu and eps")
            })?;
            Some(params)
        } else {
            None
        };
        let config = DetectorConfig {
            mode,
            nlms,
            ..self.detector_template.clone()
        };
        self.detector = Some(AdaptiveSpikeDetector::new(config)?);
        Ok(format!(
            "Spike detection enabled ({}{}).",
            mode,
            if command.use_nlms { ", NLMS" } else { "" }
        ))
    }
}

impl SampleProcessor for SamplePipeline {
    fn process(&mut self, raw: &RawSample, label: Option<bool>) -> PipelineResult<ProcessedSample> {
        let sample = Sample::try_from(raw).map_err(|e| {
            warn!(timestamp_ms = raw.timestamp_ms, error = %e, "dropping sample");
            e
        })?;
        self.process_sample(&sample, label)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) {
        self.bank.clear();
        if let Some(detector) = self.detector.as_mut() {
            detector.reset();
        }
    }

    fn latency_estimate(&self) -> u64 {
        // a few microseconds per channel for the filter, same again for detection
        let per_channel = if self.detector.is_some() { 4 } else { 2 };
        per_channel * CHANNEL_COUNT as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterSettings, ProcessingProfile};
    use eeg_core::PipelineError;

    fn raw_pipeline() -> SamplePipeline {
        SamplePipeline::new(&ProcessingConfig::for_profile(ProcessingProfile::Raw)).unwrap()
    }

    #[test]
    fn test_raw_profile_passes_through() {
        let mut pipeline = raw_pipeline();
        let raw = RawSample::new(5, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let out = pipeline.process(&raw, None).unwrap();
        assert_eq!(out.filtered, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(out.spikes, None);
        assert_eq!(out.timestamp_ms, 5);
    }

    #[test]
    fn test_malformed_sample_is_dropped() {
        let mut pipeline = raw_pipeline();
        let raw = RawSample::new(1, vec![1.0; 5]);
        match pipeline.process(&raw, None) {
            Err(PipelineError::MalformedSample { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 5);
            }
            other => panic!("expected MalformedSample, got {:?}", other),
        }
        assert_eq!(pipeline.filter_bank().state_count(), 0);
    }

    #[test]
    fn test_filter_commands() {
        let mut pipeline = raw_pipeline();
        let status = pipeline
            .apply_filter_command(&FilterCommand::apply(FilterKind::BandPass, &[8.0, 12.0]))
            .unwrap();
        assert_eq!(status, "Applying Band Pass filter with range 8-12 Hz");

        pipeline.process(&RawSample::new(0, vec![1.0; 8]), None).unwrap();
        assert_eq!(pipeline.filter_bank().state_count(), 8);

        let status = pipeline.apply_filter_command(&FilterCommand::clear()).unwrap();
        assert_eq!(status, "Filter cleared.");
        assert_eq!(pipeline.filter_bank().state_count(), 0);
        assert!(pipeline.filter_bank().active_config().is_none());
    }

    #[test]
    fn test_single_cutoff_command_uses_first_value() {
        let mut pipeline = raw_pipeline();
        let status = pipeline
            .apply_filter_command(&FilterCommand::apply(FilterKind::Notch, &[50.0, 60.0]))
            .unwrap();
        assert_eq!(status, "Applying Notch filter at 50 Hz");
        let active = pipeline.filter_bank().active_config().unwrap();
        assert_eq!(active.cutoff_slice(), &[50.0]);
    }

    #[test]
    fn test_bad_filter_command_keeps_previous() {
        let mut pipeline = raw_pipeline();
        pipeline
            .apply_filter_command(&FilterCommand::apply(FilterKind::LowPass, &[30.0]))
            .unwrap();
        let err = pipeline
            .apply_filter_command(&FilterCommand::apply(FilterKind::HighPass, &[200.0]))
            .unwrap_err();
        assert!(err.is_configuration_error());
        assert_eq!(pipeline.filter_bank().active_config().unwrap().kind, FilterKind::LowPass);
    }

    #[test]
    fn test_detector_commands() {
        let mut pipeline = raw_pipeline();
        pipeline
            .apply_detector_command(&DetectorCommand::enable(DetectionMode::Fixed))
            .unwrap();
        let out = pipeline.process(&RawSample::new(0, vec![1.0; 8]), None).unwrap();
        assert_eq!(out.spikes, Some([false; 8]));

        let nlms = DetectorCommand {
            mode: Some(DetectionMode::AdaptiveSingle),
            use_nlms: true,
            nlms: None,
        };
        assert!(pipeline.apply_detector_command(&nlms).is_err());
        assert_eq!(pipeline.detector().unwrap().config().mode, DetectionMode::Fixed);

        let nlms = DetectorCommand {
            nlms: Some(NlmsConfig::new(4, 0.1, 1e-6)),
            ..nlms
        };
        let status = pipeline.apply_detector_command(&nlms).unwrap();
        assert_eq!(status, "Spike detection enabled (adaptive-single, NLMS).");
        assert_eq!(pipeline.detector().unwrap().config().window_len(), 500);

        pipeline.apply_detector_command(&DetectorCommand::disable()).unwrap();
        assert!(pipeline.detector().is_none());
    }

    #[test]
    fn test_detector_without_filter_sees_raw_values() {
        let mut config = ProcessingConfig::for_profile(ProcessingProfile::Raw);
        config.detector = Some(DetectorConfig {
            window: Some(8),
            ..DetectorConfig::for_mode(DetectionMode::Fixed)
        });
        let mut pipeline = SamplePipeline::new(&config).unwrap();
        for i in 0..8 {
            pipeline.process(&RawSample::new(i, vec![2.0; 8]), None).unwrap();
        }
        let mut values = vec![2.0; 8];
        values[6] = 600.0;
        let out = pipeline.process(&RawSample::new(8, values), None).unwrap();
        assert!(out.any_spike());
        assert_eq!(out.spike_count(), 1);
        assert!(out.spikes.unwrap()[6]);
    }

    /// Eight steady ticks at 300, then a jump to 900 on channel 6 and a
    /// zero reading on channel 2
    fn run_step(filter: FilterSettings) -> (SamplePipeline, ProcessedSample) {
        let mut config = ProcessingConfig::for_profile(ProcessingProfile::Custom);
        config.filter = filter;
        config.detector = Some(DetectorConfig {
            window: Some(8),
            ..DetectorConfig::for_mode(DetectionMode::Fixed)
        });
        let mut pipeline = SamplePipeline::new(&config).unwrap();
        for i in 0..8 {
            pipeline.process(&RawSample::new(i * 4, vec![300.0; 8]), None).unwrap();
        }
        let mut values = vec![300.0; 8];
        values[6] = 900.0;
        values[2] = 0.0;
        let out = pipeline.process(&RawSample::new(32, values), None).unwrap();
        (pipeline, out)
    }

    #[test]
    fn test_filter_then_detect() {
        let (_, raw) = run_step(FilterSettings::default());
        let (pipeline, filtered) = run_step(FilterSettings {
            order: 2,
            ..FilterSettings::new(FilterKind::LowPass, &[5.0])
        });

        // unfiltered, the jump and the dropout both exceed the threshold
        assert_eq!(
            raw.spikes,
            Some([false, false, true, false, false, false, true, false])
        );
        // the 5 Hz low-pass lets through about 0.4% of the jump on its first tick
        assert!(filtered.filtered[6] > 300.0 && filtered.filtered[6] < 305.0);
        // the zero reading skips the filter but still reaches the detector
        assert_eq!(filtered.filtered[2], 0.0);
        assert_eq!(
            filtered.spikes,
            Some([false, false, true, false, false, false, false, false])
        );
        assert_ne!(raw.spikes, filtered.spikes);

        let active = *pipeline.filter_bank().active_config().unwrap();
        let skipped = pipeline.filter_bank().state(2, &active).unwrap();
        assert_eq!(skipped.samples_processed(), 8);
        let stepped = pipeline.filter_bank().state(6, &active).unwrap();
        assert_eq!(stepped.samples_processed(), 9);
    }

    #[test]
    fn test_adc_counts_are_converted() {
        let mut config = ProcessingConfig::for_profile(ProcessingProfile::Raw);
        config.input_format = AdcFormat::Signed24;
        let mut pipeline = SamplePipeline::new(&config).unwrap();
        let out = pipeline
            .process(&RawSample::new(0, vec![8_388_607.0; 8]), None)
            .unwrap();
        assert!((out.filtered[0] - 5000.0).abs() < 1e-9);
    }
}
