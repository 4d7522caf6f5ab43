//! Artifact timing patterns for the EEG simulator

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// When and how strongly artifacts are injected
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ArtifactPattern {
    /// Clean recording
    None,
    /// Eye blinks at a fixed period with a raised-cosine shape
    Periodic {
        period: f64,
        width: f64,
        amplitude: f64,
    },
    /// Muscle bursts (on/off cycles)
    Burst {
        on_duration: f64,
        off_duration: f64,
        amplitude: f64,
    },
    /// Blinks whose amplitude grows linearly until `duration`
    Ramp {
        period: f64,
        width: f64,
        start_amplitude: f64,
        end_amplitude: f64,
        duration: f64,
    },
}

impl Default for ArtifactPattern {
    fn default() -> Self {
        ArtifactPattern::Periodic {
            period: 4.0,
            width: 0.3,
            amplitude: 400.0,
        }
    }
}

impl ArtifactPattern {
    /// Artifact contribution at `time` seconds
    pub fn value_at(&self, time: f64) -> f64 {
        match *self {
            ArtifactPattern::None => 0.0,

            ArtifactPattern::Periodic { period, width, amplitude } => {
                amplitude * blink_shape(time, period, width)
            }

            ArtifactPattern::Burst { on_duration, off_duration, amplitude } => {
                let cycle = on_duration + off_duration;
                if cycle <= 0.0 || time % cycle >= on_duration {
                    return 0.0;
                }
                // carrier well above the EEG bands so bursts look like EMG
                amplitude * (2.0 * PI * 60.0 * time).sin()
            }

            ArtifactPattern::Ramp {
                period,
                width,
                start_amplitude,
                end_amplitude,
                duration,
            } => {
                let progress = if duration > 0.0 { (time / duration).min(1.0) } else { 1.0 };
                let amplitude = start_amplitude + (end_amplitude - start_amplitude) * progress;
                amplitude * blink_shape(time, period, width)
            }
        }
    }

    /// Ground-truth label: true while an artifact is present
    pub fn is_active(&self, time: f64) -> bool {
        match *self {
            ArtifactPattern::None => false,
            ArtifactPattern::Periodic { period, width, .. }
            | ArtifactPattern::Ramp { period, width, .. } => {
                period > 0.0 && time % period < width
            }
            ArtifactPattern::Burst { on_duration, off_duration, .. } => {
                let cycle = on_duration + off_duration;
                cycle > 0.0 && time % cycle < on_duration
            }
        }
    }

    /// Get pattern description
    pub fn description(&self) -> &'static str {
        match self {
            ArtifactPattern::None => "Clean",
            ArtifactPattern::Periodic { .. } => "Periodic blinks",
            ArtifactPattern::Burst { .. } => "Muscle bursts",
            ArtifactPattern::Ramp { .. } => "Growing blinks",
        }
    }

    /// Create common preset patterns
    pub fn presets() -> Vec<(&'static str, ArtifactPattern)> {
        vec![
            ("Resting", ArtifactPattern::None),
            ("Blinking", ArtifactPattern::default()),
            (
                "Frequent Blinks",
                ArtifactPattern::Periodic {
                    period: 1.5,
                    width: 0.25,
                    amplitude: 600.0,
                },
            ),
            (
                "Jaw Clench",
                ArtifactPattern::Burst {
                    on_duration: 0.5,
                    off_duration: 2.5,
                    amplitude: 250.0,
                },
            ),
            (
                "Fatiguing Blinks",
                ArtifactPattern::Ramp {
                    period: 3.0,
                    width: 0.3,
                    start_amplitude: 100.0,
                    end_amplitude: 800.0,
                    duration: 60.0,
                },
            ),
        ]
    }
}

/// Raised-cosine pulse of length `width` at the start of every period
fn blink_shape(time: f64, period: f64, width: f64) -> f64 {
    if period <= 0.0 || width <= 0.0 {
        return 0.0;
    }
    let phase = time % period;
    if phase >= width {
        return 0.0;
    }
    0.5 * (1.0 - (2.0 * PI * phase / width).cos())
}
