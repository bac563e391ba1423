//! Closed-loop power regulation.

use super::BenchChannels;
use crate::config::Settings;
use crate::data::storage::write_records;
use crate::error::{AppResult, DaqError};
use crate::generator::Generator;
use crate::instrument::InstrumentLink;
use crate::metadata::{RunContext, RunMetadata};
use crate::oscilloscope::Oscilloscope;
use crate::pid::PidController;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    /// Seconds since the loop started, taken right after the measurement.
    pub elapsed_secs: f64,
    /// Measured power in watts.
    pub power: f64,
    /// Controller output for this cycle.
    pub output: f64,
    /// Amplitude actually commanded after this cycle.
    pub amplitude: f64,
}

#[derive(Debug, Clone)]
pub struct PowerFeedback {
    pub channels: BenchChannels,
    pub frequency_hz: f64,
    pub initial_amplitude: f64,
    /// Substituted when the controller asks for an amplitude the generator refuses.
    pub fallback_amplitude: f64,
    pub duration: Duration,
    pub max_cycles: Option<u64>,
}

impl Default for PowerFeedback {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl PowerFeedback {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            channels: BenchChannels::from_settings(settings),
            frequency_hz: settings.feedback.frequency_hz,
            initial_amplitude: settings.feedback.initial_amplitude,
            fallback_amplitude: settings.actuation.fallback_amplitude,
            duration: settings.feedback.duration(),
            max_cycles: settings.feedback.max_cycles,
        }
    }

    /// Run the loop until the duration elapses or `max_cycles` cycles have completed.
    ///
    /// Any measurement or bus error ends the run. The drive output is disabled before the
    /// error is returned.
    pub fn run<S: InstrumentLink, G: InstrumentLink>(
        &self,
        scope: &mut Oscilloscope<S>,
        generator: &mut Generator<G>,
        pid: &mut PidController,
    ) -> AppResult<FeedbackResult> {
        let drive = self.channels.drive;
        let context = RunContext::start(scope.resource(), generator.resource());
        generator.set_frequency(self.frequency_hz, drive)?;
        generator.set_amplitude(self.initial_amplitude, drive)?;
        info!(
            setpoint = pid.setpoint(),
            frequency_hz = self.frequency_hz,
            duration_secs = self.duration.as_secs_f64(),
            "Starting power feedback\n{}",
            pid
        );

        let mut session = generator.output_session(&[drive])?;
        let outcome = self.control_loop(scope, &mut session, pid);
        let shutdown = session.finish();

        let records = outcome?;
        shutdown?;
        info!(cycles = records.len(), "Power feedback finished");

        Ok(FeedbackResult {
            setpoint: pid.setpoint(),
            frequency_hz: self.frequency_hz,
            context,
            records,
        })
    }

    fn control_loop<S: InstrumentLink, G: InstrumentLink>(
        &self,
        scope: &mut Oscilloscope<S>,
        generator: &mut Generator<G>,
        pid: &mut PidController,
    ) -> AppResult<Vec<ExperimentRecord>> {
        let BenchChannels {
            voltage,
            current,
            drive,
        } = self.channels;
        let mut records = Vec::new();
        let mut amplitude = self.initial_amplitude;
        let start = Instant::now();
        let mut last = start;

        while start.elapsed() < self.duration {
            if matches!(self.max_cycles, Some(max) if records.len() as u64 >= max) {
                break;
            }

            let power = scope.measure_power_watts(voltage, current)?;
            let now = Instant::now();
            let dt = now.duration_since(last).as_secs_f64();
            last = now;

            let output = pid.update(power, dt);
            let requested = amplitude + output;
            amplitude = match generator.set_amplitude(requested, drive) {
                Ok(()) => requested,
                Err(DaqError::ActuationRange { requested, limit }) => {
                    warn!(
                        requested,
                        limit,
                        fallback = self.fallback_amplitude,
                        "Amplitude out of range, using fallback"
                    );
                    generator.set_amplitude(self.fallback_amplitude, drive)?;
                    self.fallback_amplitude
                }
                Err(e) => return Err(e),
            };

            records.push(ExperimentRecord {
                elapsed_secs: now.duration_since(start).as_secs_f64(),
                power,
                output,
                amplitude,
            });
        }

        Ok(records)
    }
}

/// Outcome of a [`PowerFeedback`] run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub setpoint: f64,
    pub frequency_hz: f64,
    pub context: RunContext,
    pub records: Vec<ExperimentRecord>,
}

impl FeedbackResult {
    /// Mean absolute deviation from the setpoint over the last `n` cycles.
    pub fn tail_error(&self, n: usize) -> Option<f64> {
        let tail = &self.records[self.records.len().saturating_sub(n)..];
        if tail.is_empty() {
            return None;
        }
        let sum: f64 = tail.iter().map(|r| (r.power - self.setpoint).abs()).sum();
        Some(sum / tail.len() as f64)
    }

    pub fn metadata(&self) -> RunMetadata {
        RunMetadata::builder("power_feedback")
            .description(&format!(
                "PID power regulation to {} W at {} Hz",
                self.setpoint, self.frequency_hz
            ))
            .context(&self.context)
            .parameter("setpoint_w", self.setpoint)
            .parameter("frequency_hz", self.frequency_hz)
            .parameter("cycles", self.records.len())
            .build()
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> AppResult<PathBuf> {
        write_records(path, &self.metadata(), &self.records)
    }
}
