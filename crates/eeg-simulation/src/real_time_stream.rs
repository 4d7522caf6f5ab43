//! Real-time EEG sample streaming paced at the sampling rate

use crate::eeg_simulator::{EegConfig, EegSimulator, LabeledSample};
use crate::signal_patterns::ArtifactPattern;
use eeg_core::PipelineResult;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Configuration for real-time streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// EEG simulation configuration
    pub eeg_config: EegConfig,
    /// Update rate in Hz (how often a batch of samples is released)
    pub update_rate: f64,
    /// Broadcast capacity in samples
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            eeg_config: EegConfig::default(),
            update_rate: 25.0, // 10 samples per tick at 250 Hz
            buffer_size: 1024,
        }
    }
}

impl StreamConfig {
    /// Samples released on every tick
    pub fn samples_per_tick(&self) -> usize {
        ((self.eeg_config.sampling_rate / self.update_rate).round() as usize).max(1)
    }
}

/// Commands for controlling the stream
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Start,
    Stop,
    Pause,
    Resume,
    UpdateConfig(StreamConfig),
    SetArtifact(ArtifactPattern),
}

/// Stream statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub is_running: bool,
    pub samples_generated: u64,
    /// Stream time covered by the generated samples (s)
    pub total_duration: f64,
    pub artifact_samples: u64,
    /// Time spent producing the last batch (s)
    pub last_batch_time: f64,
}

/// Real-time EEG sample stream
pub struct RealTimeEegStream {
    config: StreamConfig,
    simulator: EegSimulator,
    data_sender: broadcast::Sender<LabeledSample>,
    control_receiver: mpsc::Receiver<StreamCommand>,
    stats: StreamStats,
}

impl RealTimeEegStream {
    /// Create new real-time EEG stream and its control handle
    ///
    /// The stream ends once every clone of the handle is dropped.
    pub fn new(config: StreamConfig) -> PipelineResult<(Self, mpsc::Sender<StreamCommand>)> {
        let simulator = EegSimulator::new(config.eeg_config.clone())?;
        let (data_sender, _) = broadcast::channel(config.buffer_size.max(1));
        let (control_sender, control_receiver) = mpsc::channel(32);

        let stream = Self {
            config,
            simulator,
            data_sender,
            control_receiver,
            stats: StreamStats::default(),
        };
        Ok((stream, control_sender))
    }

    /// Get a receiver for data updates
    pub fn subscribe(&self) -> broadcast::Receiver<LabeledSample> {
        self.data_sender.subscribe()
    }

    fn tick_interval(&self) -> tokio::time::Interval {
        let mut timer = interval(Duration::from_secs_f64(1.0 / self.config.update_rate.max(0.1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    /// Run until the control channel closes
    pub async fn run(&mut self) -> PipelineResult<()> {
        let mut interval_timer = self.tick_interval();

        info!(
            update_rate = self.config.update_rate,
            samples_per_tick = self.config.samples_per_tick(),
            "EEG stream ready"
        );

        loop {
            tokio::select! {
                _ = interval_timer.tick() => {
                    if self.stats.is_running {
                        self.emit_batch();
                    }
                }

                command = self.control_receiver.recv() => {
                    match command {
                        Some(StreamCommand::Start) => {
                            self.stats.is_running = true;
                            info!("EEG stream started");
                        }
                        Some(StreamCommand::Stop) => {
                            self.stats = StreamStats::default();
                            self.simulator.reset_time();
                            info!("EEG stream stopped");
                        }
                        Some(StreamCommand::Pause) => {
                            self.stats.is_running = false;
                            info!("EEG stream paused");
                        }
                        Some(StreamCommand::Resume) => {
                            self.stats.is_running = true;
                            info!("EEG stream resumed");
                        }
                        Some(StreamCommand::UpdateConfig(new_config)) => {
                            match self.simulator.update_config(new_config.eeg_config.clone()) {
                                Ok(()) => {
                                    self.config = new_config;
                                    interval_timer = self.tick_interval();
                                    info!("EEG stream configuration updated");
                                }
                                Err(e) => warn!(error = %e, "rejected stream configuration"),
                            }
                        }
                        Some(StreamCommand::SetArtifact(pattern)) => {
                            self.simulator.set_artifact(pattern);
                            self.config.eeg_config.artifact = pattern;
                            info!(pattern = pattern.description(), "EEG stream artifact updated");
                        }
                        None => {
                            info!("EEG stream control channel closed");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn emit_batch(&mut self) {
        let start_time = Instant::now();
        let count = self.config.samples_per_tick();
        for _ in 0..count {
            let sample = self.simulator.next_sample();
            if sample.artifact {
                self.stats.artifact_samples += 1;
            }
            // no receivers is fine
            let _ = self.data_sender.send(sample);
        }

        let generation_time = start_time.elapsed();
        self.stats.samples_generated += count as u64;
        self.stats.total_duration = self.simulator.current_time();
        self.stats.last_batch_time = generation_time.as_secs_f64();

        let tick = 1.0 / self.config.update_rate;
        if generation_time.as_secs_f64() > tick {
            warn!(
                elapsed_ms = generation_time.as_secs_f64() * 1000.0,
                tick_ms = tick * 1000.0,
                "sample generation slower than real time"
            );
        }
    }

    /// Get current stream statistics
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Check if stream is running
    pub fn is_running(&self) -> bool {
        self.stats.is_running
    }

    /// Get current configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }
}

/// Create a stream and run it on the current tokio runtime
pub fn start_eeg_stream(
    config: StreamConfig,
) -> PipelineResult<(broadcast::Receiver<LabeledSample>, mpsc::Sender<StreamCommand>)> {
    let (mut stream, control_sender) = RealTimeEegStream::new(config)?;
    let data_receiver = stream.subscribe();

    tokio::spawn(async move {
        if let Err(e) = stream.run().await {
            error!(error = %e, "EEG stream failed");
        }
    });

    Ok((data_receiver, control_sender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn fast_config() -> StreamConfig {
        StreamConfig {
            eeg_config: EegConfig {
                seed: Some(9),
                ..EegConfig::default()
            },
            update_rate: 50.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_real_time_stream_basic() {
        let (mut data_receiver, control_sender) = start_eeg_stream(fast_config()).unwrap();

        control_sender.send(StreamCommand::Start).await.unwrap();
        sleep(Duration::from_millis(200)).await;

        let mut count = 0;
        let mut last_ts = None;
        while let Ok(sample) = data_receiver.try_recv() {
            assert_eq!(sample.sample.values.len(), 8);
            if let Some(prev) = last_ts {
                assert!(sample.sample.timestamp_ms > prev);
            }
            last_ts = Some(sample.sample.timestamp_ms);
            count += 1;
        }

        assert!(count >= 10, "Should have received at least 10 samples, got {}", count);
        control_sender.send(StreamCommand::Stop).await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_control_commands() {
        let (mut data_receiver, control_sender) = start_eeg_stream(fast_config()).unwrap();

        // nothing is produced before Start
        sleep(Duration::from_millis(60)).await;
        assert!(data_receiver.try_recv().is_err());

        control_sender.send(StreamCommand::Start).await.unwrap();
        sleep(Duration::from_millis(60)).await;

        control_sender.send(StreamCommand::Pause).await.unwrap();
        sleep(Duration::from_millis(60)).await;
        while data_receiver.try_recv().is_ok() {}
        sleep(Duration::from_millis(60)).await;
        assert!(data_receiver.try_recv().is_err(), "paused stream kept producing");

        control_sender
            .send(StreamCommand::SetArtifact(ArtifactPattern::None))
            .await
            .unwrap();
        control_sender.send(StreamCommand::Resume).await.unwrap();

        let sample = data_receiver.recv().await.unwrap();
        assert!(!sample.artifact);

        control_sender.send(StreamCommand::Stop).await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_ends_when_handles_drop() {
        let (mut stream, control_sender) = RealTimeEegStream::new(fast_config()).unwrap();
        let task = tokio::spawn(async move {
            stream.run().await.unwrap();
            stream.stats().samples_generated
        });
        control_sender.send(StreamCommand::Start).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        drop(control_sender);
        let generated = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("stream did not stop")
            .unwrap();
        assert!(generated > 0);
    }

    #[test]
    fn test_samples_per_tick() {
        assert_eq!(StreamConfig::default().samples_per_tick(), 10);
        let config = StreamConfig {
            update_rate: 1000.0,
            ..Default::default()
        };
        assert_eq!(config.samples_per_tick(), 1);
    }
}
