//! Recursive filter kernels
//!
//! Direct form II transposed steps for transfer functions and biquad
//! cascades, steady-state initial conditions, and zero-phase
//! (forward-backward) filtering of complete buffers.

use crate::design::{CoefficientSet, SecondOrderSection};
use eeg_core::{config_error, PipelineError, PipelineResult};
use nalgebra::{DMatrix, DVector};

/// Transfer function with `a[0] == 1` and `b`, `a` padded to equal length
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTf {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}

impl NormalizedTf {
    pub fn new(b: &[f64], a: &[f64]) -> PipelineResult<Self> {
        let a0 = a.first().copied().unwrap_or(0.0);
        if a0 == 0.0 || !a0.is_finite() {
            return Err(config_error!("leading denominator coefficient must be non-zero"));
        }
        let n = b.len().max(a.len());
        let pad = |c: &[f64]| -> Vec<f64> {
            let mut out: Vec<f64> = c.iter().map(|v| v / a0).collect();
            out.resize(n, 0.0);
            out
        };
        Ok(Self { b: pad(b), a: pad(a) })
    }

    /// Number of delay elements
    pub fn order(&self) -> usize {
        self.a.len() - 1
    }
}

/// One direct-form-II-transposed step; `z` holds `order()` elements
#[inline]
pub fn tf_step(tf: &NormalizedTf, z: &mut [f64], x: f64) -> f64 {
    let n = z.len();
    if n == 0 {
        return tf.b[0] * x;
    }
    let y = tf.b[0] * x + z[0];
    for i in 0..n - 1 {
        z[i] = tf.b[i + 1] * x + z[i + 1] - tf.a[i + 1] * y;
    }
    z[n - 1] = tf.b[n] * x - tf.a[n] * y;
    y
}

/// One step through a biquad cascade; `z` holds two elements per section
#[inline]
pub fn sos_step(sections: &[SecondOrderSection], z: &mut [f64], x: f64) -> f64 {
    let mut value = x;
    for (s, zs) in sections.iter().zip(z.chunks_exact_mut(2)) {
        let y = s.b[0] * value + zs[0];
        zs[0] = s.b[1] * value + zs[1] - s.a[1] * y;
        zs[1] = s.b[2] * value - s.a[2] * y;
        value = y;
    }
    value
}

/// Steady-state delay line for a unit step input
///
/// Solves `(I - A^T) zi = b[1..] - a[1..] * b[0]` where `A` is the companion
/// matrix of the denominator.
pub fn lfilter_zi(tf: &NormalizedTf) -> PipelineResult<Vec<f64>> {
    let n = tf.order();
    if n == 0 {
        return Ok(Vec::new());
    }
    let i_minus_a = DMatrix::<f64>::from_fn(n, n, |i, j| {
        let identity = if i == j { 1.0 } else { 0.0 };
        let companion_t = if j == 0 {
            -tf.a[i + 1]
        } else if j == i + 1 {
            1.0
        } else {
            0.0
        };
        identity - companion_t
    });
    let rhs = DVector::<f64>::from_iterator(n, (1..=n).map(|k| tf.b[k] - tf.a[k] * tf.b[0]));
    i_minus_a
        .lu()
        .solve(&rhs)
        .map(|zi| zi.iter().copied().collect())
        .ok_or_else(|| config_error!("filter has a pole at z = 1, no steady state exists"))
}

/// Steady-state delay line of a biquad cascade for a unit step input
pub fn sosfilt_zi(sections: &[SecondOrderSection]) -> PipelineResult<Vec<f64>> {
    let mut zi = Vec::with_capacity(sections.len() * 2);
    let mut scale = 1.0;
    for section in sections {
        let tf = NormalizedTf::new(&section.b, &section.a)?;
        zi.extend(lfilter_zi(&tf)?.into_iter().map(|v| v * scale));
        scale *= section.b.iter().sum::<f64>() / section.a.iter().sum::<f64>();
    }
    Ok(zi)
}

/// Steady-state delay line for any coefficient set
pub fn steady_state(coefficients: &CoefficientSet) -> PipelineResult<Vec<f64>> {
    match coefficients {
        CoefficientSet::TransferFunction { b, a } => lfilter_zi(&NormalizedTf::new(b, a)?),
        CoefficientSet::SecondOrderSections(sections) => sosfilt_zi(sections),
    }
}

/// Filter a buffer causally starting from delay line `z` (updated in place)
pub fn lfilter(tf: &NormalizedTf, signal: &[f64], z: &mut [f64]) -> Vec<f64> {
    signal.iter().map(|&x| tf_step(tf, z, x)).collect()
}

/// Filter a buffer through a biquad cascade starting from `z`
pub fn sosfilt(sections: &[SecondOrderSection], signal: &[f64], z: &mut [f64]) -> Vec<f64> {
    signal.iter().map(|&x| sos_step(sections, z, x)).collect()
}

/// Odd extension of `signal` by `n` samples at both ends
fn odd_extend(signal: &[f64], n: usize) -> Vec<f64> {
    let len = signal.len();
    let first = signal[0];
    let last = signal[len - 1];
    let mut out = Vec::with_capacity(len + 2 * n);
    out.extend((1..=n).rev().map(|i| 2.0 * first - signal[i]));
    out.extend_from_slice(signal);
    out.extend((1..=n).map(|i| 2.0 * last - signal[len - 1 - i]));
    out
}

fn check_length(signal: &[f64], padlen: usize) -> PipelineResult<()> {
    if signal.len() <= padlen {
        return Err(PipelineError::SignalTooShort {
            length: signal.len(),
            required: padlen,
        });
    }
    Ok(())
}

/// Forward-backward filtering through a transfer function
pub fn filtfilt(tf: &NormalizedTf, signal: &[f64]) -> PipelineResult<Vec<f64>> {
    let padlen = 3 * tf.a.len();
    check_length(signal, padlen)?;
    let zi = lfilter_zi(tf)?;
    let ext = odd_extend(signal, padlen);

    let mut z: Vec<f64> = zi.iter().map(|v| v * ext[0]).collect();
    let mut forward = lfilter(tf, &ext, &mut z);

    forward.reverse();
    let mut z: Vec<f64> = zi.iter().map(|v| v * forward[0]).collect();
    let mut backward = lfilter(tf, &forward, &mut z);
    backward.reverse();

    Ok(backward[padlen..backward.len() - padlen].to_vec())
}

/// Forward-backward filtering through a biquad cascade
pub fn sosfiltfilt(sections: &[SecondOrderSection], signal: &[f64]) -> PipelineResult<Vec<f64>> {
    let trailing_zeros = sections
        .iter()
        .filter(|s| s.b[2] == 0.0)
        .count()
        .min(sections.iter().filter(|s| s.a[2] == 0.0).count());
    let padlen = 3 * (2 * sections.len() + 1 - trailing_zeros);
    check_length(signal, padlen)?;
    let zi = sosfilt_zi(sections)?;
    let ext = odd_extend(signal, padlen);

    let mut z: Vec<f64> = zi.iter().map(|v| v * ext[0]).collect();
    let mut forward = sosfilt(sections, &ext, &mut z);

    forward.reverse();
    let mut z: Vec<f64> = zi.iter().map(|v| v * forward[0]).collect();
    let mut backward = sosfilt(sections, &forward, &mut z);
    backward.reverse();

    Ok(backward[padlen..backward.len() - padlen].to_vec())
}

/// Zero-phase filtering for any coefficient set
pub fn zero_phase(coefficients: &CoefficientSet, signal: &[f64]) -> PipelineResult<Vec<f64>> {
    match coefficients {
        CoefficientSet::TransferFunction { b, a } => filtfilt(&NormalizedTf::new(b, a)?, signal),
        CoefficientSet::SecondOrderSections(sections) => sosfiltfilt(sections, signal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{design, FilterKind};
    use std::f64::consts::PI;

    fn lowpass_tf() -> NormalizedTf {
        match design(FilterKind::LowPass, &[20.0], 250.0, 5).unwrap() {
            CoefficientSet::TransferFunction { b, a } => NormalizedTf::new(&b, &a).unwrap(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_normalize_pads_and_scales() {
        let tf = NormalizedTf::new(&[2.0], &[2.0, 1.0]).unwrap();
        assert_eq!(tf.b, vec![1.0, 0.0]);
        assert_eq!(tf.a, vec![1.0, 0.5]);
        assert!(NormalizedTf::new(&[1.0], &[0.0, 1.0]).is_err());
    }

    #[test]
    fn test_first_order_zi_closed_form() {
        // y[n] = 0.5 x[n] + 0.5 y[n-1] settles at 1 for a unit step, zi = 0.5
        let tf = NormalizedTf::new(&[0.5], &[1.0, -0.5]).unwrap();
        let zi = lfilter_zi(&tf).unwrap();
        assert_eq!(zi.len(), 1);
        assert!((zi[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_steady_state_has_no_transient() {
        let tf = lowpass_tf();
        let zi = lfilter_zi(&tf).unwrap();
        let mut z: Vec<f64> = zi.iter().map(|v| v * 3.0).collect();
        let out = lfilter(&tf, &[3.0; 50], &mut z);
        for y in out {
            assert!((y - 3.0).abs() < 1e-9, "output {} drifted from 3.0", y);
        }
    }

    #[test]
    fn test_sos_steady_state_bandpass() {
        let set = design(FilterKind::BandPass, &[8.0, 12.0], 250.0, 5).unwrap();
        let sections = match set {
            CoefficientSet::SecondOrderSections(s) => s,
            _ => unreachable!(),
        };
        let zi = sosfilt_zi(&sections).unwrap();
        assert_eq!(zi.len(), 10);
        let mut z: Vec<f64> = zi.iter().map(|v| v * 7.0).collect();
        let out = sosfilt(&sections, &[7.0; 50], &mut z);
        // a band-pass rejects DC entirely, steady state is zero output
        for y in out {
            assert!(y.abs() < 1e-9);
        }
    }

    #[test]
    fn test_filtfilt_preserves_passband_without_lag() {
        let tf = lowpass_tf();
        let fs = 250.0;
        let signal: Vec<f64> = (0..1000)
            .map(|i| (2.0 * PI * 2.0 * i as f64 / fs).sin())
            .collect();
        let out = filtfilt(&tf, &signal).unwrap();
        assert_eq!(out.len(), signal.len());
        // zero phase: 2 Hz well inside the passband comes back aligned
        for i in 100..900 {
            assert!((out[i] - signal[i]).abs() < 1e-2);
        }
    }

    #[test]
    fn test_filtfilt_rejects_short_signal() {
        let tf = lowpass_tf();
        match filtfilt(&tf, &[1.0; 18]) {
            Err(PipelineError::SignalTooShort { length, required }) => {
                assert_eq!(length, 18);
                assert_eq!(required, 18);
            }
            other => panic!("expected SignalTooShort, got {:?}", other),
        }
    }

    #[test]
    fn test_sosfiltfilt_removes_out_of_band() {
        let set = design(FilterKind::BandPass, &[8.0, 12.0], 250.0, 4).unwrap();
        let fs = 250.0;
        let alpha: Vec<f64> = (0..2000)
            .map(|i| (2.0 * PI * 10.0 * i as f64 / fs).sin())
            .collect();
        let noisy: Vec<f64> = alpha
            .iter()
            .enumerate()
            .map(|(i, v)| v + 0.5 * (2.0 * PI * 50.0 * i as f64 / fs).sin() + 2.0)
            .collect();
        let out = zero_phase(&set, &noisy).unwrap();
        for i in 500..1500 {
            assert!((out[i] - alpha[i]).abs() < 0.05);
        }
    }
}
