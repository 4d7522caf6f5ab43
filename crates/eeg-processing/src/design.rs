//! Coefficient design for Butterworth and notch filters
//!
//! Butterworth designs go through the analog zero/pole/gain prototype, a
//! frequency transform (lowpass, highpass or bandpass), and the bilinear
//! transform with pre-warping. Low/high-pass results are expanded into a
//! transfer function; band-pass results are kept as second-order sections
//! because the expanded polynomial of a narrow band design is poorly
//! conditioned. The notch is a single second-order IIR section.

use eeg_core::{config_error, PipelineResult};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Highest Butterworth order accepted by the designer
pub const MAX_ORDER: usize = 16;

/// Imaginary parts below this are treated as real poles when pairing sections
const REAL_POLE_TOLERANCE: f64 = 1e-10;

/// Default order used by the real-time path
pub const DEFAULT_ORDER: usize = 5;

/// Default notch quality factor
pub const DEFAULT_NOTCH_Q: f64 = 30.0;

/// Filter families supported by the filter bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterKind {
    /// Butterworth lowpass filter
    LowPass,
    /// Butterworth highpass filter
    HighPass,
    /// Butterworth bandpass filter
    BandPass,
    /// Second-order IIR notch for powerline interference
    Notch,
}

impl FilterKind {
    /// Number of cutoff frequencies this kind takes
    pub fn cutoff_count(&self) -> usize {
        match self {
            FilterKind::BandPass => 2,
            _ => 1,
        }
    }

    /// True for the Butterworth family (cached separately from notches)
    pub fn is_butterworth(&self) -> bool {
        !matches!(self, FilterKind::Notch)
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterKind::LowPass => "Low Pass",
            FilterKind::HighPass => "High Pass",
            FilterKind::BandPass => "Band Pass",
            FilterKind::Notch => "Notch",
        };
        f.write_str(name)
    }
}

impl FromStr for FilterKind {
    type Err = eeg_core::PipelineError;

    fn from_str(s: &str) -> PipelineResult<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "lowpass" | "low" => Ok(FilterKind::LowPass),
            "highpass" | "high" => Ok(FilterKind::HighPass),
            "bandpass" | "band" => Ok(FilterKind::BandPass),
            "notch" => Ok(FilterKind::Notch),
            _ => Err(config_error!("unrecognized filter kind '{}'", s)),
        }
    }
}

/// One biquad: `b0 + b1 z^-1 + b2 z^-2` over `1 + a1 z^-1 + a2 z^-2`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecondOrderSection {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

/// Designed filter coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoefficientSet {
    /// Direct transfer function, `a[0] == 1`
    TransferFunction { b: Vec<f64>, a: Vec<f64> },
    /// Cascaded biquads, applied in order
    SecondOrderSections(Vec<SecondOrderSection>),
}

impl CoefficientSet {
    /// Number of delay elements needed to stream this design
    pub fn state_len(&self) -> usize {
        match self {
            CoefficientSet::TransferFunction { b, a } => b.len().max(a.len()) - 1,
            CoefficientSet::SecondOrderSections(sections) => sections.len() * 2,
        }
    }

    /// Gain at DC (z = 1)
    pub fn dc_gain(&self) -> f64 {
        match self {
            CoefficientSet::TransferFunction { b, a } => {
                b.iter().sum::<f64>() / a.iter().sum::<f64>()
            }
            CoefficientSet::SecondOrderSections(sections) => sections
                .iter()
                .map(|s| s.b.iter().sum::<f64>() / s.a.iter().sum::<f64>())
                .product(),
        }
    }

    /// Magnitude response at `freq` Hz for sampling rate `fs`
    pub fn magnitude_at(&self, freq: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * freq / fs;
        let z_inv = Complex64::from_polar(1.0, -w);
        let eval = |coeffs: &[f64]| {
            coeffs
                .iter()
                .rev()
                .fold(Complex64::new(0.0, 0.0), |acc, &c| acc * z_inv + c)
        };
        match self {
            CoefficientSet::TransferFunction { b, a } => (eval(b) / eval(a)).norm(),
            CoefficientSet::SecondOrderSections(sections) => sections
                .iter()
                .map(|s| (eval(&s.b) / eval(&s.a)).norm())
                .product(),
        }
    }
}

/// Cutoffs normalized to the Nyquist frequency, validated to lie in (0, 1)
pub fn normalized_cutoffs(cutoffs: &[f64], sampling_rate: f64) -> PipelineResult<Vec<f64>> {
    if !(sampling_rate > 0.0) || !sampling_rate.is_finite() {
        return Err(config_error!("sampling rate must be positive, got {}", sampling_rate));
    }
    let nyquist = 0.5 * sampling_rate;
    cutoffs
        .iter()
        .map(|&c| {
            if c > 0.0 && c < nyquist {
                Ok(c / nyquist)
            } else {
                Err(config_error!(
                    "cutoff {} Hz outside (0, {}) Hz for sampling rate {} Hz",
                    c,
                    nyquist,
                    sampling_rate
                ))
            }
        })
        .collect()
}

/// Design coefficients for `kind`
///
/// `order` is ignored for notch designs, which always use `DEFAULT_NOTCH_Q`;
/// use [`design_notch`] to pick another quality factor.
pub fn design(
    kind: FilterKind,
    cutoffs: &[f64],
    sampling_rate: f64,
    order: usize,
) -> PipelineResult<CoefficientSet> {
    match kind {
        FilterKind::Notch => {
            let freq = single_cutoff(kind, cutoffs)?;
            design_notch(freq, DEFAULT_NOTCH_Q, sampling_rate)
        }
        _ => design_butterworth(kind, cutoffs, sampling_rate, order),
    }
}

/// Butterworth design for the low/high/band-pass kinds
pub fn design_butterworth(
    kind: FilterKind,
    cutoffs: &[f64],
    sampling_rate: f64,
    order: usize,
) -> PipelineResult<CoefficientSet> {
    if order == 0 || order > MAX_ORDER {
        return Err(config_error!("filter order must be in 1..={}, got {}", MAX_ORDER, order));
    }
    if cutoffs.len() != kind.cutoff_count() {
        return Err(config_error!(
            "{} filter takes {} cutoff(s), got {}",
            kind,
            kind.cutoff_count(),
            cutoffs.len()
        ));
    }
    let wn = normalized_cutoffs(cutoffs, sampling_rate)?;

    // Work at fs = 2 so normalized frequencies map directly
    const FS: f64 = 2.0;
    let warp = |w: f64| 2.0 * FS * (PI * w / FS).tan();

    let proto = Zpk::butterworth_prototype(order);
    match kind {
        FilterKind::LowPass => {
            let zpk = proto.lowpass(warp(wn[0])).bilinear(FS);
            Ok(zpk.to_transfer_function())
        }
        FilterKind::HighPass => {
            let zpk = proto.highpass(warp(wn[0])).bilinear(FS);
            Ok(zpk.to_transfer_function())
        }
        FilterKind::BandPass => {
            if wn[0] >= wn[1] {
                return Err(config_error!(
                    "band-pass low cutoff {} Hz must be below high cutoff {} Hz",
                    cutoffs[0],
                    cutoffs[1]
                ));
            }
            let (lo, hi) = (warp(wn[0]), warp(wn[1]));
            let zpk = proto.bandpass((lo * hi).sqrt(), hi - lo).bilinear(FS);
            zpk.to_sections()
        }
        FilterKind::Notch => Err(config_error!("notch is not a Butterworth design")),
    }
}

/// Second-order IIR notch at `freq` Hz with quality factor `q`
pub fn design_notch(freq: f64, q: f64, sampling_rate: f64) -> PipelineResult<CoefficientSet> {
    if !(q > 0.0) || !q.is_finite() {
        return Err(config_error!("notch quality factor must be positive, got {}", q));
    }
    let w0 = normalized_cutoffs(&[freq], sampling_rate)?[0];

    // -3 dB bandwidth of w0 / Q
    let bw = w0 / q * PI;
    let w0 = w0 * PI;
    let beta = (bw / 2.0).tan();
    let gain = 1.0 / (1.0 + beta);
    let cos_w0 = w0.cos();

    Ok(CoefficientSet::TransferFunction {
        b: vec![gain, -2.0 * gain * cos_w0, gain],
        a: vec![1.0, -2.0 * gain * cos_w0, 2.0 * gain - 1.0],
    })
}

fn single_cutoff(kind: FilterKind, cutoffs: &[f64]) -> PipelineResult<f64> {
    match cutoffs {
        [c] => Ok(*c),
        _ => Err(config_error!(
            "{} filter takes 1 cutoff, got {}",
            kind,
            cutoffs.len()
        )),
    }
}

/// Zero/pole/gain representation used during design
#[derive(Debug, Clone)]
struct Zpk {
    zeros: Vec<Complex64>,
    poles: Vec<Complex64>,
    gain: f64,
}

impl Zpk {
    /// Analog lowpass prototype with unit cutoff
    fn butterworth_prototype(order: usize) -> Self {
        let n = order as f64;
        let poles = (0..order)
            .map(|k| {
                let m = -(n - 1.0) + 2.0 * k as f64;
                -Complex64::from_polar(1.0, PI * m / (2.0 * n))
            })
            .collect();
        Zpk {
            zeros: Vec::new(),
            poles,
            gain: 1.0,
        }
    }

    fn degree(&self) -> usize {
        self.poles.len() - self.zeros.len()
    }

    fn lowpass(self, wo: f64) -> Self {
        let degree = self.degree();
        Zpk {
            zeros: self.zeros.iter().map(|z| z * wo).collect(),
            poles: self.poles.iter().map(|p| p * wo).collect(),
            gain: self.gain * wo.powi(degree as i32),
        }
    }

    fn highpass(self, wo: f64) -> Self {
        let degree = self.degree();
        let num: Complex64 = self.zeros.iter().map(|z| -z).product();
        let den: Complex64 = self.poles.iter().map(|p| -p).product();
        let mut zeros: Vec<Complex64> = self.zeros.iter().map(|z| wo / z).collect();
        zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
        Zpk {
            zeros,
            poles: self.poles.iter().map(|p| wo / p).collect(),
            gain: self.gain * (num / den).re,
        }
    }

    fn bandpass(self, wo: f64, bw: f64) -> Self {
        let degree = self.degree();
        let split = |roots: &[Complex64]| -> Vec<Complex64> {
            let scaled: Vec<Complex64> = roots.iter().map(|r| r * bw / 2.0).collect();
            let mut out: Vec<Complex64> = scaled
                .iter()
                .map(|r| r + (r * r - wo * wo).sqrt())
                .collect();
            out.extend(scaled.iter().map(|r| r - (r * r - wo * wo).sqrt()));
            out
        };
        let mut zeros = split(&self.zeros);
        zeros.extend(std::iter::repeat(Complex64::new(0.0, 0.0)).take(degree));
        Zpk {
            zeros,
            poles: split(&self.poles),
            gain: self.gain * bw.powi(degree as i32),
        }
    }

    fn bilinear(self, fs: f64) -> Self {
        let degree = self.degree();
        let fs2 = Complex64::new(2.0 * fs, 0.0);
        let num: Complex64 = self.zeros.iter().map(|z| fs2 - z).product();
        let den: Complex64 = self.poles.iter().map(|p| fs2 - p).product();
        let mut zeros: Vec<Complex64> = self.zeros.iter().map(|z| (fs2 + z) / (fs2 - z)).collect();
        zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));
        Zpk {
            zeros,
            poles: self.poles.iter().map(|p| (fs2 + p) / (fs2 - p)).collect(),
            gain: self.gain * (num / den).re,
        }
    }

    fn to_transfer_function(&self) -> CoefficientSet {
        let b = poly(&self.zeros).into_iter().map(|c| c * self.gain).collect();
        let a = poly(&self.poles);
        CoefficientSet::TransferFunction { b, a }
    }

    /// Pair conjugate poles into biquads, one zero at +1 and one at -1 each
    ///
    /// Only valid for digital band-pass designs, whose zeros are exactly
    /// `order` copies of +1 and `order` copies of -1.
    fn to_sections(&self) -> PipelineResult<CoefficientSet> {
        let mut complex: Vec<Complex64> = self
            .poles
            .iter()
            .filter(|p| p.im > REAL_POLE_TOLERANCE)
            .copied()
            .collect();
        let mut real: Vec<f64> = self
            .poles
            .iter()
            .filter(|p| p.im.abs() <= REAL_POLE_TOLERANCE)
            .map(|p| p.re)
            .collect();
        if real.len() % 2 != 0 || complex.len() * 2 + real.len() != self.poles.len() {
            return Err(config_error!("band-pass poles do not pair into sections"));
        }

        // poles nearest the unit circle go last
        complex.sort_by(|x, y| x.norm().total_cmp(&y.norm()));
        real.sort_by(|x, y| x.abs().total_cmp(&y.abs()));

        let mut denominators: Vec<(f64, [f64; 3])> = complex
            .iter()
            .map(|p| (p.norm(), [1.0, -2.0 * p.re, p.norm_sqr()]))
            .collect();
        denominators.extend(
            real.chunks(2)
                .map(|pair| (pair[1].abs(), [1.0, -(pair[0] + pair[1]), pair[0] * pair[1]])),
        );
        denominators.sort_by(|x, y| x.0.total_cmp(&y.0));

        let sections = denominators
            .into_iter()
            .enumerate()
            .map(|(i, (_, a))| {
                let g = if i == 0 { self.gain } else { 1.0 };
                SecondOrderSection {
                    b: [g, 0.0, -g],
                    a,
                }
            })
            .collect();
        Ok(CoefficientSet::SecondOrderSections(sections))
    }
}

/// Real polynomial coefficients (highest power first) with the given roots
fn poly(roots: &[Complex64]) -> Vec<f64> {
    let mut coeffs = vec![Complex64::new(1.0, 0.0)];
    for root in roots {
        let mut next = vec![Complex64::new(0.0, 0.0); coeffs.len() + 1];
        for (i, c) in coeffs.iter().enumerate() {
            next[i] += c;
            next[i + 1] -= c * root;
        }
        coeffs = next;
    }
    coeffs.into_iter().map(|c| c.re).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 250.0;

    fn tf(set: &CoefficientSet) -> (&[f64], &[f64]) {
        match set {
            CoefficientSet::TransferFunction { b, a } => (b, a),
            _ => panic!("expected transfer function"),
        }
    }

    #[test]
    fn test_bandpass_normalized_cutoffs() {
        let wn = normalized_cutoffs(&[8.0, 12.0], FS).unwrap();
        assert_eq!(wn, vec![0.064, 0.096]);
    }

    #[test]
    fn test_cutoff_at_or_above_nyquist_rejected() {
        let err = design(FilterKind::BandPass, &[8.0, 125.0], FS, 5).unwrap_err();
        assert!(err.is_configuration_error());
        assert!(design(FilterKind::LowPass, &[130.0], FS, 5).is_err());
        assert!(design(FilterKind::HighPass, &[0.0], FS, 5).is_err());
        assert!(design(FilterKind::Notch, &[-50.0], FS, 5).is_err());
        assert!(design(FilterKind::LowPass, &[f64::NAN], FS, 5).is_err());
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        assert!(design(FilterKind::BandPass, &[12.0, 8.0], FS, 5).is_err());
        assert!(design(FilterKind::BandPass, &[8.0], FS, 5).is_err());
        assert!(design(FilterKind::LowPass, &[8.0, 12.0], FS, 5).is_err());
        assert!(design(FilterKind::LowPass, &[30.0], FS, 0).is_err());
        assert!(design(FilterKind::LowPass, &[30.0], FS, MAX_ORDER + 1).is_err());
        assert!(design(FilterKind::LowPass, &[30.0], 0.0, 5).is_err());
        assert!(design_notch(50.0, 0.0, FS).is_err());
    }

    #[test]
    fn test_unrecognized_kind() {
        assert_eq!("Low Pass".parse::<FilterKind>().unwrap(), FilterKind::LowPass);
        assert_eq!("band".parse::<FilterKind>().unwrap(), FilterKind::BandPass);
        assert_eq!("highpass".parse::<FilterKind>().unwrap(), FilterKind::HighPass);
        assert!("comb".parse::<FilterKind>().unwrap_err().is_configuration_error());
        assert!("bandstop".parse::<FilterKind>().unwrap_err().is_configuration_error());
        assert!("band-stop".parse::<FilterKind>().is_err());
    }

    #[test]
    fn test_design_is_deterministic() {
        for kind in [FilterKind::LowPass, FilterKind::HighPass, FilterKind::Notch] {
            let a = design(kind, &[20.0], FS, 5).unwrap();
            let b = design(kind, &[20.0], FS, 5).unwrap();
            assert_eq!(a, b);
        }
        let a = design(FilterKind::BandPass, &[8.0, 12.0], FS, 5).unwrap();
        let b = design(FilterKind::BandPass, &[8.0, 12.0], FS, 5).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_lowpass_second_order_matches_closed_form() {
        // bilinear 2nd order Butterworth at fs/4 has b = [0.2929, 0.5858, 0.2929]
        let set = design(FilterKind::LowPass, &[62.5], FS, 2).unwrap();
        let (b, a) = tf(&set);
        assert!((b[0] - 0.292_893_218_813_452_4).abs() < 1e-12);
        assert!((b[1] - 0.585_786_437_626_904_9).abs() < 1e-12);
        assert!((a[0] - 1.0).abs() < 1e-12);
        assert!(a[1].abs() < 1e-12);
        assert!((a[2] - 0.171_572_875_253_809_9).abs() < 1e-12);
    }

    #[test]
    fn test_lowpass_response() {
        let set = design(FilterKind::LowPass, &[30.0], FS, 5).unwrap();
        assert_eq!(set.state_len(), 5);
        assert!((set.dc_gain() - 1.0).abs() < 1e-9);
        let at_cutoff = set.magnitude_at(30.0, FS);
        assert!((at_cutoff - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(set.magnitude_at(100.0, FS) < 1e-3);
    }

    #[test]
    fn test_highpass_response() {
        let set = design(FilterKind::HighPass, &[1.0], FS, 4).unwrap();
        assert!(set.dc_gain().abs() < 1e-9);
        assert!((set.magnitude_at(60.0, FS) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_bandpass_sections() {
        let set = design(FilterKind::BandPass, &[8.0, 12.0], FS, 5).unwrap();
        match &set {
            CoefficientSet::SecondOrderSections(sections) => assert_eq!(sections.len(), 5),
            _ => panic!("band-pass should design second-order sections"),
        }
        assert_eq!(set.state_len(), 10);
        let center = (8.0f64 * 12.0).sqrt();
        assert!((set.magnitude_at(center, FS) - 1.0).abs() < 1e-3);
        assert!((set.magnitude_at(8.0, FS) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-3);
        assert!(set.magnitude_at(30.0, FS) < 1e-3);
        assert!(set.dc_gain().abs() < 1e-12);
    }

    #[test]
    fn test_notch_response() {
        let set = design_notch(50.0, 30.0, FS).unwrap();
        let (b, a) = tf(&set);
        assert_eq!(b.len(), 3);
        assert_eq!(a.len(), 3);
        assert!(set.magnitude_at(50.0, FS) < 1e-9);
        assert!((set.dc_gain() - 1.0).abs() < 1e-12);
        assert!((set.magnitude_at(10.0, FS) - 1.0).abs() < 1e-2);
    }
}
