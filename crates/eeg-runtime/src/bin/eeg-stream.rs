//! Headless EEG stream: simulator → processing service → summary

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use eeg_core::{ProcessedSample, CHANNEL_COUNT};
use eeg_processing::{ProcessingConfig, ProcessingProfile};
use eeg_runtime::{
    start_processing_service, InputSample, ProcessingStats, ServiceConfig, ServiceHandle,
    ServiceInputs,
};
use eeg_simulation::{
    start_eeg_stream, EegConfig, EegSimulator, LabeledSample, StreamCommand, StreamConfig,
};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "eeg-stream",
    version,
    about = "Run simulated 8-channel EEG through the filter and spike detection pipeline"
)]
struct Args {
    /// JSON processing configuration (overrides --profile)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Processing preset
    #[arg(long, value_enum, default_value_t = Profile::EyeBlink)]
    profile: Profile,

    /// Seconds of signal to generate
    #[arg(long, default_value_t = 30.0)]
    duration: f64,

    /// Simulator seed
    #[arg(long)]
    seed: Option<u64>,

    /// Seconds of labeled calibration at the start of the stream
    #[arg(long, default_value_t = 10.0)]
    calibration: f64,

    /// Pace samples at the sampling rate instead of as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Raw,
    EyeBlink,
    LineNoise,
    Custom,
}

impl From<Profile> for ProcessingProfile {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::Raw => ProcessingProfile::Raw,
            Profile::EyeBlink => ProcessingProfile::EyeBlink,
            Profile::LineNoise => ProcessingProfile::LineNoise,
            Profile::Custom => ProcessingProfile::Custom,
        }
    }
}

/// Ground truth of one forwarded sample, sent ahead of the sample itself
type Label = (u64, bool);

/// Running comparison of spike ticks against the injected artifacts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LabelTally {
    artifact_ticks: u64,
    /// Spike ticks that coincide with an injected artifact
    hits: u64,
    false_alarms: u64,
    /// Outputs whose label could not be found
    unmatched: u64,
}

impl LabelTally {
    fn record(&mut self, spiked: bool, artifact: bool) {
        if artifact {
            self.artifact_ticks += 1;
        }
        match (spiked, artifact) {
            (true, true) => self.hits += 1,
            (true, false) => self.false_alarms += 1,
            _ => {}
        }
    }
}

/// Pop labels until the one sent for `timestamp_ms`
///
/// Labels of outputs lost to a lagging receiver are skipped. Timestamps
/// repeat above 1000 Hz, so the first label with a matching stamp wins.
async fn label_for(labels: &mut mpsc::Receiver<Label>, timestamp_ms: u64) -> Option<bool> {
    while let Some((label_ts, artifact)) = labels.recv().await {
        if label_ts == timestamp_ms {
            return Some(artifact);
        }
    }
    None
}

/// Consume processed samples as they arrive, keeping only counters
async fn collect(
    mut outputs: tokio::sync::broadcast::Receiver<ProcessedSample>,
    mut labels: mpsc::Receiver<Label>,
) -> LabelTally {
    let mut tally = LabelTally::default();
    loop {
        match outputs.recv().await {
            Ok(output) => match label_for(&mut labels, output.timestamp_ms).await {
                Some(artifact) => tally.record(output.any_spike(), artifact),
                None => tally.unmatched += 1,
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "processed samples lost"),
            Err(RecvError::Closed) => break,
        }
    }
    tally
}

#[derive(Debug, Serialize)]
struct Summary {
    pipeline: String,
    samples_forwarded: u64,
    samples_processed: u64,
    samples_dropped: u64,
    labels_used: u64,
    spikes_per_channel: [u64; CHANNEL_COUNT],
    artifact_ticks: u64,
    spike_ticks: u64,
    /// Spike ticks that coincide with an injected artifact
    hits: u64,
    false_alarms: u64,
    average_latency_us: u64,
}

impl Summary {
    fn new(pipeline: String, forwarded: u64, stats: &ProcessingStats, tally: &LabelTally) -> Self {
        Self {
            pipeline,
            samples_forwarded: forwarded,
            samples_processed: stats.samples_processed,
            samples_dropped: stats.samples_dropped,
            labels_used: stats.labels_used,
            spikes_per_channel: stats.spikes_per_channel,
            artifact_ticks: tally.artifact_ticks,
            spike_ticks: stats.spike_ticks,
            hits: tally.hits,
            false_alarms: tally.false_alarms,
            average_latency_us: stats.average_latency_us,
        }
    }

    fn print(&self) {
        println!("Pipeline:          {}", self.pipeline);
        println!("Samples forwarded: {}", self.samples_forwarded);
        println!("Samples processed: {}", self.samples_processed);
        println!("Samples dropped:   {}", self.samples_dropped);
        println!("Calibration labels:{:>6}", self.labels_used);
        println!("Artifact ticks:    {}", self.artifact_ticks);
        println!(
            "Spike ticks:       {} ({} during artifacts, {} outside)",
            self.spike_ticks, self.hits, self.false_alarms
        );
        for (channel, count) in self.spikes_per_channel.iter().enumerate() {
            println!("  channel {}: {} spikes", channel, count);
        }
        println!("Average latency:   {} us", self.average_latency_us);
    }
}

/// Hand one sample to the service, its label first
async fn forward(
    labeled: LabeledSample,
    inputs: &ServiceInputs,
    labels: &mpsc::Sender<Label>,
) -> Result<()> {
    labels
        .send((labeled.sample.timestamp_ms, labeled.artifact))
        .await
        .context("summary collector stopped early")?;
    inputs
        .samples
        .send(InputSample::from(labeled))
        .await
        .context("processing service stopped early")?;
    Ok(())
}

/// Push `total` samples as fast as the service accepts them
async fn feed_offline(
    eeg_config: EegConfig,
    total: usize,
    inputs: &ServiceInputs,
    labels: &mpsc::Sender<Label>,
) -> Result<u64> {
    let mut simulator = EegSimulator::new(eeg_config)?;
    for _ in 0..total {
        forward(simulator.next_sample(), inputs, labels).await?;
    }
    Ok(total as u64)
}

/// Forward the paced simulator stream until `total` samples went through
async fn feed_realtime(
    eeg_config: EegConfig,
    total: usize,
    inputs: &ServiceInputs,
    labels: &mpsc::Sender<Label>,
) -> Result<u64> {
    let config = StreamConfig {
        eeg_config,
        ..StreamConfig::default()
    };
    let (mut data, control) = start_eeg_stream(config)?;
    control.send(StreamCommand::Start).await?;

    let mut forwarded = 0u64;
    while forwarded < total as u64 {
        match data.recv().await {
            Ok(labeled) => {
                forward(labeled, inputs, labels).await?;
                forwarded += 1;
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "stream receiver lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    control.send(StreamCommand::Stop).await?;
    Ok(forwarded)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let processing = match &args.config {
        Some(path) => ProcessingConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProcessingConfig::for_profile(args.profile.into()),
    };

    let eeg_config = EegConfig {
        sampling_rate: processing.sampling_rate,
        seed: args.seed,
        ..EegConfig::default()
    };
    let total = (args.duration.max(0.0) * processing.sampling_rate).round() as usize;
    let service_config = ServiceConfig {
        calibration_secs: args.calibration,
        ..ServiceConfig::default()
    };

    info!(
        pipeline = %processing.name,
        duration = args.duration,
        realtime = args.realtime,
        "starting EEG stream"
    );

    let ServiceHandle {
        inputs,
        outputs,
        mut status,
        stats,
        task,
    } = start_processing_service(&processing, &service_config)?;

    let status_task = tokio::spawn(async move {
        loop {
            match status.recv().await {
                Ok(line) => info!(status = %line),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "status lines lost"),
                Err(RecvError::Closed) => break,
            }
        }
    });
    // unread labels bound the outputs in flight, so the collector cannot lag
    let (label_sender, label_receiver) = mpsc::channel(service_config.output_capacity);
    let collector = tokio::spawn(collect(outputs, label_receiver));

    let forwarded = if args.realtime {
        feed_realtime(eeg_config, total, &inputs, &label_sender).await?
    } else {
        feed_offline(eeg_config, total, &inputs, &label_sender).await?
    };

    // closing the queue lets the service drain and exit
    drop(inputs);
    drop(label_sender);
    task.await?;
    let tally = collector.await?;
    status_task.await?;
    if tally.unmatched > 0 {
        warn!(unmatched = tally.unmatched, "outputs without a label");
    }

    let stats = stats.lock().await.clone();
    let summary = Summary::new(processing.name.clone(), forwarded, &stats, &tally);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        summary.print();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[test]
    fn test_tally_counts_hits_and_false_alarms() {
        let mut tally = LabelTally::default();
        tally.record(true, true);
        tally.record(true, false);
        tally.record(false, true);
        tally.record(false, false);
        assert_eq!(
            tally,
            LabelTally {
                artifact_ticks: 2,
                hits: 1,
                false_alarms: 1,
                unmatched: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_label_lookup_with_repeated_timestamps() {
        let (sender, mut receiver) = mpsc::channel(8);
        // 2000 Hz stamps: 0, 1, 1, 2
        for label in [(0, false), (1, true), (1, false), (2, true)] {
            sender.send(label).await.unwrap();
        }
        drop(sender);

        assert_eq!(label_for(&mut receiver, 0).await, Some(false));
        assert_eq!(label_for(&mut receiver, 1).await, Some(true));
        assert_eq!(label_for(&mut receiver, 1).await, Some(false));
        // a lost output skips its label
        assert_eq!(label_for(&mut receiver, 2).await, Some(true));
        assert_eq!(label_for(&mut receiver, 3).await, None);
    }

    #[tokio::test]
    async fn test_collector_pairs_outputs_with_labels() {
        let (output_sender, outputs) = tokio::sync::broadcast::channel(8);
        let (label_sender, labels) = mpsc::channel(8);
        let collector = tokio::spawn(collect(outputs, labels));

        let mut spiking = ProcessedSample {
            timestamp_ms: 0,
            filtered: [0.0; CHANNEL_COUNT],
            spikes: Some([false; CHANNEL_COUNT]),
        };
        label_sender.send((0, true)).await.unwrap();
        output_sender.send(spiking).unwrap();
        spiking.timestamp_ms = 1;
        if let Some(spikes) = spiking.spikes.as_mut() {
            spikes[3] = true;
        }
        label_sender.send((1, false)).await.unwrap();
        output_sender.send(spiking).unwrap();
        drop(output_sender);

        let tally = collector.await.unwrap();
        assert_eq!(tally.artifact_ticks, 1);
        assert_eq!(tally.hits, 0);
        assert_eq!(tally.false_alarms, 1);
        assert_eq!(tally.unmatched, 0);
    }

    #[tokio::test]
    async fn test_realtime_feed_stops_after_total_above_1000_hz() {
        let processing = ProcessingConfig {
            sampling_rate: 2000.0,
            ..ProcessingConfig::for_profile(ProcessingProfile::Raw)
        };
        let handle = start_processing_service(&processing, &ServiceConfig::default()).unwrap();
        let (label_sender, mut label_receiver) = mpsc::channel(1024);
        let eeg_config = EegConfig {
            sampling_rate: 2000.0,
            seed: Some(3),
            ..EegConfig::default()
        };

        let forwarded = timeout(
            Duration::from_secs(5),
            feed_realtime(eeg_config, 150, &handle.inputs, &label_sender),
        )
        .await
        .expect("feed did not stop")
        .unwrap();
        assert_eq!(forwarded, 150);

        drop(label_sender);
        let mut labels = 0;
        while label_receiver.recv().await.is_some() {
            labels += 1;
        }
        assert_eq!(labels, 150);
    }

    #[tokio::test]
    async fn test_offline_feed_forwards_every_sample() {
        let handle = start_processing_service(
            &ProcessingConfig::for_profile(ProcessingProfile::Raw),
            &ServiceConfig::default(),
        )
        .unwrap();
        let (label_sender, label_receiver) = mpsc::channel(1024);
        let collector = tokio::spawn(collect(handle.outputs, label_receiver));
        let eeg_config = EegConfig {
            seed: Some(5),
            ..EegConfig::default()
        };

        let forwarded = feed_offline(eeg_config, 600, &handle.inputs, &label_sender)
            .await
            .unwrap();
        drop(handle.inputs);
        drop(label_sender);
        handle.task.await.unwrap();
        let tally = collector.await.unwrap();

        assert_eq!(forwarded, 600);
        assert_eq!(handle.stats.lock().await.samples_processed, 600);
        assert_eq!(tally.unmatched, 0);
        // default blink pattern: 0.3 s of every 4 s, 75 ticks in the first 2.4 s
        assert_eq!(tally.artifact_ticks, 75);
    }
}
