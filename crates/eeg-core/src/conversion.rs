//! ADC count to millivolt conversion for the supported front ends

use serde::{Deserialize, Serialize};

/// Reference voltage of the acquisition front ends (V)
pub const REFERENCE_VOLTS: f64 = 5.0;

/// Raw count encodings delivered by the transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdcFormat {
    /// ADS1299 over BLE: signed 24-bit counts
    Signed24,
    /// ESP32 ADC over WebSocket: unsigned 12-bit counts
    Unsigned12,
    /// Values already in millivolts
    Millivolts,
}

impl AdcFormat {
    /// Full-scale count for this encoding
    pub fn full_scale(&self) -> f64 {
        match self {
            AdcFormat::Signed24 => 8_388_607.0, // 2^23 - 1
            AdcFormat::Unsigned12 => 4_095.0,   // 2^12 - 1
            AdcFormat::Millivolts => 1.0,
        }
    }

    /// Convert one raw count to millivolts
    #[inline]
    pub fn to_millivolts(&self, raw: f64) -> f64 {
        match self {
            AdcFormat::Millivolts => raw,
            _ => raw / self.full_scale() * REFERENCE_VOLTS * 1000.0,
        }
    }

    /// Convert a whole channel vector in place
    pub fn convert_in_place(&self, values: &mut [f64]) {
        if *self == AdcFormat::Millivolts {
            return;
        }
        for v in values.iter_mut() {
            *v = self.to_millivolts(*v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed24_full_scale() {
        let mv = AdcFormat::Signed24.to_millivolts(8_388_607.0);
        assert!((mv - 5000.0).abs() < 1e-9);
        let mv = AdcFormat::Signed24.to_millivolts(-8_388_607.0);
        assert!((mv + 5000.0).abs() < 1e-9);
    }

    #[test]
    fn test_unsigned12_midscale() {
        let mv = AdcFormat::Unsigned12.to_millivolts(4095.0 / 2.0);
        assert!((mv - 2500.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_stays_zero() {
        // zero readings must survive conversion so the filter skip still applies
        let mut values = [0.0, 100.0];
        AdcFormat::Signed24.convert_in_place(&mut values);
        assert_eq!(values[0], 0.0);
        assert!(values[1] > 0.0);
    }
}
