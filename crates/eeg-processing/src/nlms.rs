//! Normalized least-mean-squares reference cancellation

use eeg_core::{config_error, PipelineResult};
use serde::{Deserialize, Serialize};

/// Default number of taps
pub const DEFAULT_NLMS_ORDER: usize = 4;

/// NLMS stage parameters; `mu` and `eps` have no defaults
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NlmsConfig {
    #[serde(default = "default_order")]
    pub order: usize,
    /// Step size
    #[serde(default)]
    pub mu: Option<f64>,
    /// Regularization added to the input power
    #[serde(default)]
    pub eps: Option<f64>,
}

fn default_order() -> usize {
    DEFAULT_NLMS_ORDER
}

impl NlmsConfig {
    pub fn new(order: usize, mu: f64, eps: f64) -> Self {
        Self {
            order,
            mu: Some(mu),
            eps: Some(eps),
        }
    }

    /// Resolve the required parameters
    pub fn validate(&self) -> PipelineResult<(f64, f64)> {
        if self.order == 0 {
            return Err(config_error!("NLMS order must be at least 1"));
        }
        let mu = match self.mu {
            Some(mu) if mu > 0.0 && mu.is_finite() => mu,
            Some(mu) => return Err(config_error!("NLMS step size must be positive, got {}", mu)),
            None => return Err(config_error!("NLMS step size (mu) is required")),
        };
        let eps = match self.eps {
            Some(eps) if eps > 0.0 && eps.is_finite() => eps,
            Some(eps) => return Err(config_error!("NLMS regularization must be positive, got {}", eps)),
            None => return Err(config_error!("NLMS regularization (eps) is required")),
        };
        Ok((mu, eps))
    }
}

/// Result of one adaptation step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NlmsStep {
    /// Filter output for the reference
    pub y_hat: f64,
    /// Residual passed on to classification
    pub error: f64,
    /// Normalized step size used for the update
    pub mu_eff: f64,
}

/// Adaptive FIR whose weights persist across calls
#[derive(Debug, Clone, PartialEq)]
pub struct NlmsFilter {
    weights: Vec<f64>,
    mu: f64,
    eps: f64,
}

impl NlmsFilter {
    pub fn new(config: &NlmsConfig) -> PipelineResult<Self> {
        let (mu, eps) = config.validate()?;
        Ok(Self {
            weights: vec![0.0; config.order],
            mu,
            eps,
        })
    }

    pub fn order(&self) -> usize {
        self.weights.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Adapt on one reference vector; entries beyond `order()` are ignored
    pub fn step(&mut self, x_ref: &[f64], desired: f64) -> NlmsStep {
        let y_hat: f64 = self.weights.iter().zip(x_ref).map(|(w, x)| w * x).sum();
        let error = desired - y_hat;
        let power: f64 = x_ref.iter().take(self.weights.len()).map(|x| x * x).sum();
        let mu_eff = self.mu / (power + self.eps);
        for (w, x) in self.weights.iter_mut().zip(x_ref) {
            *w += mu_eff * error * x;
        }
        NlmsStep { y_hat, error, mu_eff }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_core::PipelineError;

    #[test]
    fn test_single_update() {
        let mut filter = NlmsFilter::new(&NlmsConfig::new(2, 0.5, 1e-6)).unwrap();
        let step = filter.step(&[1.0, 1.0], 2.0);
        assert_eq!(step.y_hat, 0.0);
        assert_eq!(step.error, 2.0);
        assert!((step.mu_eff - 0.5 / 2.000001).abs() < 1e-15);
        for w in filter.weights() {
            assert!((w - 2.0 * 0.5 / 2.000001).abs() < 1e-15);
            assert!((w - 0.4999999).abs() < 1e-6, "weight {}", w);
        }
    }

    #[test]
    fn test_weights_persist_and_converge() {
        let mut filter = NlmsFilter::new(&NlmsConfig::new(2, 0.5, 1e-6)).unwrap();
        let mut last = f64::MAX;
        for _ in 0..50 {
            last = filter.step(&[1.0, 1.0], 2.0).error.abs();
        }
        assert!(last < 1e-9);
        let y: f64 = filter.weights().iter().sum();
        assert!((y - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_parameters_rejected() {
        let config = NlmsConfig {
            order: 4,
            mu: None,
            eps: Some(1e-6),
        };
        assert!(matches!(
            NlmsFilter::new(&config),
            Err(PipelineError::InvalidConfiguration { .. })
        ));
        let config = NlmsConfig {
            order: 4,
            mu: Some(0.1),
            eps: None,
        };
        assert!(NlmsFilter::new(&config).is_err());
        assert!(NlmsFilter::new(&NlmsConfig::new(4, -0.1, 1e-6)).is_err());
        assert!(NlmsFilter::new(&NlmsConfig::new(0, 0.1, 1e-6)).is_err());
    }

    #[test]
    fn test_config_from_json_without_mu() {
        let config: NlmsConfig = serde_json::from_str(r#"{"eps": 1e-6}"#).unwrap();
        assert_eq!(config.order, DEFAULT_NLMS_ORDER);
        assert!(config.validate().is_err());
    }
}
