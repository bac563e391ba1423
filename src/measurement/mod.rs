//! Derived measurements produced by the oscilloscope facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Power derived from one voltage/current channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    /// Active power in watts.
    pub power: f64,
    /// RMS voltage on the voltage channel.
    pub voltage: f64,
    /// Raw RMS reading on the current-sense channel, before the shunt factor is applied.
    pub current: f64,
    /// Phase between the two channels in degrees.
    pub phase: f64,
}

impl PowerReading {
    /// `voltage_rms * sensed_rms / shunt_factor * cos(phase)`
    pub fn derive(voltage_rms: f64, sensed_rms: f64, phase_deg: f64, shunt_factor: f64) -> Self {
        Self {
            power: voltage_rms * sensed_rms / shunt_factor * phase_deg.to_radians().cos(),
            voltage: voltage_rms,
            current: sensed_rms,
            phase: phase_deg,
        }
    }
}

/// A timestamped power reading. Created fresh on every sampling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    pub timestamp: DateTime<Utc>,
    pub power: f64,
    pub voltage_rms: f64,
    pub current_rms: f64,
    pub phase_deg: f64,
}

impl MeasurementSample {
    pub fn new(reading: PowerReading) -> Self {
        Self {
            timestamp: Utc::now(),
            power: reading.power,
            voltage_rms: reading.voltage,
            current_rms: reading.current,
            phase_deg: reading.phase,
        }
    }

    pub fn reading(&self) -> PowerReading {
        PowerReading {
            power: self.power,
            voltage: self.voltage_rms,
            current: self.current_rms,
            phase: self.phase_deg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_phase_power() {
        let reading = PowerReading::derive(10.0, 2.0, 0.0, 0.2);
        assert!((reading.power - 100.0).abs() < 1e-9);
        assert_eq!(reading.current, 2.0);
    }

    #[test]
    fn test_quadrature_power_vanishes() {
        let reading = PowerReading::derive(10.0, 2.0, 90.0, 0.2);
        assert!(reading.power.abs() < 1e-9);
    }

    #[test]
    fn test_sample_keeps_components() {
        let reading = PowerReading::derive(5.0, 1.0, 60.0, 1.0);
        let sample = MeasurementSample::new(reading);
        assert_eq!(sample.reading(), reading);
    }
}
