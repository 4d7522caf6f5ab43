//! Processing service for real-time pipeline integration

use eeg_core::{PipelineResult, ProcessedSample, RawSample, CHANNEL_COUNT};
use eeg_processing::{
    DetectorCommand, FilterCommand, ProcessingConfig, ProcessingMetrics, SampleProcessor,
    SamplePipeline,
};
use eeg_simulation::LabeledSample;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Queue sizes and calibration window of the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Bounded input queue; producers wait when it is full
    pub input_capacity: usize,
    /// Processed samples kept for slow subscribers
    pub output_capacity: usize,
    pub status_capacity: usize,
    /// Stream time during which labels reach the detector (0 disables)
    pub calibration_secs: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            input_capacity: 256,
            output_capacity: 1024,
            status_capacity: 64,
            calibration_secs: 10.0,
        }
    }
}

/// One sample handed to the service, with optional ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    pub sample: RawSample,
    pub label: Option<bool>,
}

impl InputSample {
    pub fn unlabeled(sample: RawSample) -> Self {
        Self {
            sample,
            label: None,
        }
    }
}

impl From<LabeledSample> for InputSample {
    fn from(labeled: LabeledSample) -> Self {
        Self {
            sample: labeled.sample,
            label: Some(labeled.artifact),
        }
    }
}

/// Commands for controlling processing
#[derive(Debug, Clone)]
pub enum ServiceCommand {
    Filter(FilterCommand),
    Detector(DetectorCommand),
    Pause,
    Resume,
    /// Drop filter and detector state, restart calibration
    Reset,
    Stop,
}

/// Statistics about processing performance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub is_running: bool,
    pub samples_processed: u64,
    /// Malformed samples plus samples received while paused
    pub samples_dropped: u64,
    /// Labels forwarded to the detector during calibration
    pub labels_used: u64,
    pub calibrating: bool,
    pub spikes_per_channel: [u64; CHANNEL_COUNT],
    /// Ticks where at least one channel spiked
    pub spike_ticks: u64,
    pub total_processing_time_us: u64,
    pub average_latency_us: u64,
    /// Samples that took longer than one sample period
    pub budget_overruns: u64,
    pub last_timestamp_ms: Option<u64>,
}

impl ProcessingStats {
    pub fn total_spikes(&self) -> u64 {
        self.spikes_per_channel.iter().sum()
    }

    fn record(&mut self, output: &ProcessedSample, metrics: &ProcessingMetrics) {
        self.samples_processed += 1;
        self.total_processing_time_us += metrics.processing_time_us;
        self.average_latency_us = self.total_processing_time_us / self.samples_processed;
        self.last_timestamp_ms = Some(output.timestamp_ms);
        if let Some(spikes) = output.spikes {
            for (count, spiked) in self.spikes_per_channel.iter_mut().zip(spikes) {
                if spiked {
                    *count += 1;
                }
            }
        }
        if output.any_spike() {
            self.spike_ticks += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Calibration {
    /// Waiting for the first sample to anchor the window
    Pending,
    Running { start_ms: u64 },
    Done,
}

/// Sender halves for feeding a service
#[derive(Debug, Clone)]
pub struct ServiceInputs {
    pub samples: mpsc::Sender<InputSample>,
    pub commands: mpsc::Sender<ServiceCommand>,
}

/// Real-time processing service for one sample stream
pub struct ProcessingService {
    pipeline: SamplePipeline,
    calibration_ms: u64,
    calibration: Calibration,
    latency_budget_us: u64,
    is_running: bool,

    // Communication channels
    input_receiver: mpsc::Receiver<InputSample>,
    command_receiver: mpsc::Receiver<ServiceCommand>,
    output_sender: broadcast::Sender<ProcessedSample>,
    status_sender: broadcast::Sender<String>,

    stats: Arc<Mutex<ProcessingStats>>,
}

impl ProcessingService {
    /// Create new processing service; it stops once the sample queue closes
    pub fn new(
        processing: &ProcessingConfig,
        config: &ServiceConfig,
    ) -> PipelineResult<(Self, ServiceInputs)> {
        let pipeline = SamplePipeline::new(processing)?;
        let (sample_sender, input_receiver) = mpsc::channel(config.input_capacity.max(1));
        let (command_sender, command_receiver) = mpsc::channel(32);
        let (output_sender, _) = broadcast::channel(config.output_capacity.max(1));
        let (status_sender, _) = broadcast::channel(config.status_capacity.max(1));

        let calibration_ms = (config.calibration_secs.max(0.0) * 1000.0).round() as u64;
        let latency_budget_us = (1e6 / pipeline.sampling_rate()) as u64;
        let service = Self {
            pipeline,
            calibration_ms,
            calibration: Calibration::Pending,
            latency_budget_us,
            is_running: true,
            input_receiver,
            command_receiver,
            output_sender,
            status_sender,
            stats: Arc::new(Mutex::new(ProcessingStats {
                is_running: true,
                ..ProcessingStats::default()
            })),
        };
        let inputs = ServiceInputs {
            samples: sample_sender,
            commands: command_sender,
        };
        Ok((service, inputs))
    }

    /// Get output receiver for processed samples
    pub fn subscribe_output(&self) -> broadcast::Receiver<ProcessedSample> {
        self.output_sender.subscribe()
    }

    /// Get receiver for human-readable status lines
    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status_sender.subscribe()
    }

    pub fn stats_handle(&self) -> Arc<Mutex<ProcessingStats>> {
        self.stats.clone()
    }

    /// Main processing loop
    pub async fn run(&mut self) -> PipelineResult<()> {
        info!(
            pipeline = self.pipeline.name(),
            calibration_ms = self.calibration_ms,
            latency_estimate_us = self.pipeline.latency_estimate(),
            latency_budget_us = self.latency_budget_us,
            "processing service started"
        );
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;

                command = self.command_receiver.recv(), if commands_open => {
                    match command {
                        Some(ServiceCommand::Stop) => {
                            self.publish_status("Processing stopped.".to_string());
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => commands_open = false,
                    }
                }

                input = self.input_receiver.recv() => {
                    match input {
                        Some(input) => self.process_input(input).await,
                        None => {
                            info!("input queue closed, stopping processing service");
                            break;
                        }
                    }
                }
            }
        }

        self.stats.lock().await.is_running = false;
        Ok(())
    }

    async fn handle_command(&mut self, command: ServiceCommand) {
        let outcome = match command {
            ServiceCommand::Filter(filter) => self.pipeline.apply_filter_command(&filter),
            ServiceCommand::Detector(detector) => {
                let outcome = self.pipeline.apply_detector_command(&detector);
                if outcome.is_ok() {
                    self.calibration = Calibration::Pending;
                }
                outcome
            }
            ServiceCommand::Pause => {
                self.set_running(false).await;
                Ok("Processing paused.".to_string())
            }
            ServiceCommand::Resume => {
                self.set_running(true).await;
                Ok("Processing resumed.".to_string())
            }
            ServiceCommand::Reset => {
                self.pipeline.reset();
                self.calibration = Calibration::Pending;
                Ok("Pipeline reset.".to_string())
            }
            // handled by the loop
            ServiceCommand::Stop => return,
        };

        match outcome {
            Ok(status) => {
                info!(status = %status, "command applied");
                self.publish_status(status);
            }
            Err(e) => {
                warn!(error = %e, "command rejected");
                self.publish_status(format!("Configuration error: {}", e));
            }
        }
    }

    async fn set_running(&mut self, running: bool) {
        self.is_running = running;
        self.stats.lock().await.is_running = running;
    }

    /// Process a single sample through the pipeline
    async fn process_input(&mut self, input: InputSample) {
        if !self.is_running {
            self.stats.lock().await.samples_dropped += 1;
            return;
        }

        let timestamp_ms = input.sample.timestamp_ms;
        let calibrating = self.in_calibration(timestamp_ms);
        let label = input.label.filter(|_| calibrating);

        let timer = ProcessingMetrics::start_timing();
        match self.pipeline.process(&input.sample, label) {
            Ok(output) => {
                let metrics = timer.finish();
                // no subscribers is fine
                let _ = self.output_sender.send(output);

                let mut stats = self.stats.lock().await;
                stats.record(&output, &metrics);
                if !metrics.within_budget(self.latency_budget_us) {
                    stats.budget_overruns += 1;
                }
                stats.calibrating = calibrating;
                if label.is_some() {
                    stats.labels_used += 1;
                }
            }
            Err(e) => {
                let metrics = timer.finish_with_error(&e.to_string());
                self.stats.lock().await.samples_dropped += 1;
                if let Some(message) = metrics.error_message {
                    self.publish_status(format!(
                        "Dropped sample at {} ms: {}",
                        timestamp_ms, message
                    ));
                }
            }
        }
    }

    /// Advance the calibration window; true while labels should be used
    fn in_calibration(&mut self, timestamp_ms: u64) -> bool {
        if self.calibration_ms == 0 {
            return false;
        }
        match self.calibration {
            Calibration::Done => false,
            Calibration::Pending => {
                self.calibration = Calibration::Running {
                    start_ms: timestamp_ms,
                };
                true
            }
            Calibration::Running { start_ms } => {
                if timestamp_ms.saturating_sub(start_ms) < self.calibration_ms {
                    return true;
                }
                self.calibration = Calibration::Done;
                info!(timestamp_ms, "calibration complete");
                self.publish_status("Calibration complete.".to_string());
                false
            }
        }
    }

    fn publish_status(&self, status: String) {
        let _ = self.status_sender.send(status);
    }

    pub fn pipeline(&self) -> &SamplePipeline {
        &self.pipeline
    }

    /// Processing time allowed per sample: one sample period
    pub fn latency_budget_us(&self) -> u64 {
        self.latency_budget_us
    }
}

/// Channels and handles of a running service
pub struct ServiceHandle {
    pub inputs: ServiceInputs,
    pub outputs: broadcast::Receiver<ProcessedSample>,
    pub status: broadcast::Receiver<String>,
    pub stats: Arc<Mutex<ProcessingStats>>,
    pub task: JoinHandle<()>,
}

/// Create a service and run it on the current tokio runtime
pub fn start_processing_service(
    processing: &ProcessingConfig,
    config: &ServiceConfig,
) -> PipelineResult<ServiceHandle> {
    let (mut service, inputs) = ProcessingService::new(processing, config)?;

    let outputs = service.subscribe_output();
    let status = service.subscribe_status();
    let stats = service.stats_handle();

    let task = tokio::spawn(async move {
        if let Err(e) = service.run().await {
            error!(error = %e, "processing service failed");
        }
    });

    Ok(ServiceHandle {
        inputs,
        outputs,
        status,
        stats,
        task,
    })
}
