//! Configuration using Figment.
//!
//! Settings are layered, lowest precedence first:
//! 1. Compiled defaults (the transducer bench: 38 kHz drive, 2 W setpoint)
//! 2. A TOML file (`config/default.toml` unless another path is given)
//! 3. Environment variables prefixed with `PULSER_DAQ_`, `__` separating nested keys
//!
//! ```text
//! PULSER_DAQ_APPLICATION__LOG_LEVEL=debug
//! PULSER_DAQ_PID__KP=0.5
//! PULSER_DAQ_FEEDBACK__DURATION_SECS=30
//! ```
//!
//! Loaded settings are validated before they are returned.

use crate::discovery::{default_known_devices, KnownDevice};
use crate::error::{AppResult, DaqError};
use crate::error_recovery::RetryPolicy;
use crate::generator::DEFAULT_MAX_AMPLITUDE;
use crate::pid::PidController;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "PULSER_DAQ_";
/// Longest run any experiment accepts: one week.
pub const MAX_RUN_SECS: f64 = 7.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub application: ApplicationConfig,
    pub oscilloscope: InstrumentConfig,
    pub generator: InstrumentConfig,
    pub measurement: MeasurementConfig,
    pub actuation: ActuationConfig,
    pub pid: PidConfig,
    pub feedback: FeedbackConfig,
    pub step: StepConfig,
    pub sweep: SweepConfig,
    pub sampler: SamplerConfig,
    pub known_devices: Vec<KnownDevice>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            oscilloscope: InstrumentConfig::default(),
            generator: InstrumentConfig::default(),
            measurement: MeasurementConfig::default(),
            actuation: ActuationConfig::default(),
            pid: PidConfig::default(),
            feedback: FeedbackConfig::default(),
            step: StepConfig::default(),
            sweep: SweepConfig::default(),
            sampler: SamplerConfig::default(),
            known_devices: default_known_devices(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    /// trace, debug, info, warn or error
    pub log_level: String,
    /// Where experiment CSV files are written.
    pub output_dir: PathBuf,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "pulser_daq".to_string(),
            log_level: "info".to_string(),
            output_dir: PathBuf::from("data"),
        }
    }
}

/// Connection to one instrument. An empty `resource` means "auto-detect from the known devices".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    pub resource: String,
    pub channels: u8,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            resource: String::new(),
            channels: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub voltage_channel: u8,
    pub current_channel: u8,
    /// Volts across the current-sense shunt per ampere.
    pub shunt_factor: f64,
    pub retry: RetryPolicy,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            voltage_channel: 1,
            current_channel: 2,
            shunt_factor: 0.2,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    pub drive_channel: u8,
    /// Amplitude ceiling of the generator in volts.
    pub max_amplitude: f64,
    /// Amplitude commanded when the controller asks for one outside the ceiling.
    pub fallback_amplitude: f64,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            drive_channel: 1,
            max_amplitude: DEFAULT_MAX_AMPLITUDE,
            fallback_amplitude: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Target power in watts.
    pub setpoint: f64,
    /// Bound on the amplitude correction per cycle. Unbounded when absent.
    pub max_output: Option<f64>,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.2,
            kd: 0.2,
            setpoint: 2.0,
            max_output: None,
        }
    }
}

impl PidConfig {
    pub fn controller(&self) -> PidController {
        let pid = PidController::new(self.kp, self.ki, self.kd, self.setpoint);
        match self.max_output {
            Some(bound) => pid.with_max_output(bound),
            None => pid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub frequency_hz: f64,
    pub initial_amplitude: f64,
    pub duration_secs: f64,
    /// Stop after this many control cycles even if the duration has not elapsed.
    pub max_cycles: Option<u64>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 38_000.0,
            initial_amplitude: 0.25,
            duration_secs: 10.0,
            max_cycles: None,
        }
    }
}

impl FeedbackConfig {
    pub fn duration(&self) -> Duration {
        seconds(self.duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    pub frequency_hz: f64,
    pub low_amplitude: f64,
    pub high_amplitude: f64,
    /// Time after start at which the amplitude steps up.
    pub step_at_secs: f64,
    pub duration_secs: f64,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 37_849.0,
            low_amplitude: 0.05,
            high_amplitude: 0.25,
            step_at_secs: 7.0,
            duration_secs: 15.0,
        }
    }
}

impl StepConfig {
    pub fn step_at(&self) -> Duration {
        seconds(self.step_at_secs)
    }

    pub fn duration(&self) -> Duration {
        seconds(self.duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub start_hz: f64,
    pub end_hz: f64,
    pub points: usize,
    /// Wait after each frequency change before measuring.
    pub settle_ms: u64,
    pub amplitude: f64,
    pub repetitions: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start_hz: 34_000.0,
            end_hz: 42_000.0,
            points: 320,
            settle_ms: 30,
            amplitude: 0.2,
            repetitions: 1,
        }
    }
}

impl SweepConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_ms: u64,
    /// Samples buffered before the worker blocks.
    pub capacity: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 20,
            capacity: 64,
        }
    }
}

impl SamplerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Settings {
    /// Provider stack: defaults, then `path`, then the environment.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file and the environment. A missing file leaves the
    /// defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Self::figment(path).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the instruments or the experiments cannot work with.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.oscilloscope.channels == 0 || self.generator.channels == 0 {
            return invalid("Instruments need at least one channel".to_string());
        }

        let m = &self.measurement;
        for channel in [m.voltage_channel, m.current_channel] {
            if channel == 0 || channel > self.oscilloscope.channels {
                return invalid(format!(
                    "Measurement channel {} outside 1..={}",
                    channel, self.oscilloscope.channels
                ));
            }
        }
        if m.voltage_channel == m.current_channel {
            return invalid("Voltage and current channels must differ".to_string());
        }
        if !(m.shunt_factor.is_finite() && m.shunt_factor > 0.0) {
            return invalid(format!("Invalid shunt_factor {}", m.shunt_factor));
        }
        if m.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }

        let a = &self.actuation;
        if a.drive_channel == 0 || a.drive_channel > self.generator.channels {
            return invalid(format!(
                "Drive channel {} outside 1..={}",
                a.drive_channel, self.generator.channels
            ));
        }
        if !(a.max_amplitude.is_finite() && a.max_amplitude > 0.0) {
            return invalid(format!("Invalid max_amplitude {}", a.max_amplitude));
        }
        self.check_amplitude("actuation.fallback_amplitude", a.fallback_amplitude)?;

        if let Some(bound) = self.pid.max_output {
            if bound.is_nan() || bound < 0.0 {
                return invalid(format!("Invalid pid.max_output {}", bound));
            }
        }

        let f = &self.feedback;
        check_frequency("feedback.frequency_hz", f.frequency_hz)?;
        self.check_amplitude("feedback.initial_amplitude", f.initial_amplitude)?;
        check_run_time("feedback.duration_secs", f.duration_secs)?;

        let s = &self.step;
        check_frequency("step.frequency_hz", s.frequency_hz)?;
        self.check_amplitude("step.low_amplitude", s.low_amplitude)?;
        self.check_amplitude("step.high_amplitude", s.high_amplitude)?;
        check_run_time("step.duration_secs", s.duration_secs)?;
        if !(s.step_at_secs >= 0.0 && s.step_at_secs < s.duration_secs) {
            return invalid(format!(
                "step.step_at_secs ({}) must fall inside step.duration_secs ({})",
                s.step_at_secs, s.duration_secs
            ));
        }

        let w = &self.sweep;
        check_frequency("sweep.start_hz", w.start_hz)?;
        check_frequency("sweep.end_hz", w.end_hz)?;
        if w.start_hz >= w.end_hz {
            return invalid(format!(
                "sweep.start_hz ({}) must be below sweep.end_hz ({})",
                w.start_hz, w.end_hz
            ));
        }
        if w.points < 2 {
            return invalid("sweep.points must be at least 2".to_string());
        }
        if w.repetitions == 0 {
            return invalid("sweep.repetitions must be at least 1".to_string());
        }
        self.check_amplitude("sweep.amplitude", w.amplitude)?;

        if self.sampler.capacity == 0 {
            return invalid("sampler.capacity must be at least 1".to_string());
        }

        for device in &self.known_devices {
            if device.channels == 0 || device.aliases.is_empty() {
                return invalid(format!(
                    "Known device '{}' needs channels and at least one alias",
                    device.name
                ));
            }
        }

        Ok(())
    }

    /// Render the settings as a TOML document that [`Settings::load_from`] reads back.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DaqError::Configuration(format!("Failed to render settings: {}", e)))
    }

    /// Retry policy for phase measurements.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.measurement.retry.clone()
    }

    fn check_amplitude(&self, name: &str, volts: f64) -> AppResult<()> {
        if !(volts.is_finite() && volts >= 0.0 && volts <= self.actuation.max_amplitude) {
            return invalid(format!(
                "{} = {} V outside 0..={} V",
                name, volts, self.actuation.max_amplitude
            ));
        }
        Ok(())
    }
}

fn check_frequency(name: &str, hz: f64) -> AppResult<()> {
    if !(hz.is_finite() && hz > 0.0) {
        return invalid(format!("Invalid {} {}", name, hz));
    }
    Ok(())
}

fn check_run_time(name: &str, secs: f64) -> AppResult<()> {
    if !(secs.is_finite() && secs > 0.0 && secs <= MAX_RUN_SECS) {
        return invalid(format!("{} = {} s outside (0, {}] s", name, secs, MAX_RUN_SECS));
    }
    Ok(())
}

/// Saturating conversion: negative and NaN become zero, huge values `Duration::MAX`.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

fn invalid(message: String) -> AppResult<()> {
    Err(DaqError::Configuration(message))
}
