//! Open-loop amplitude step.

use super::BenchChannels;
use crate::config::Settings;
use crate::data::storage::write_records;
use crate::error::AppResult;
use crate::generator::Generator;
use crate::instrument::InstrumentLink;
use crate::metadata::{RunContext, RunMetadata};
use crate::oscilloscope::Oscilloscope;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepSample {
    pub elapsed_secs: f64,
    pub power: f64,
    /// Time spent in the measurement itself.
    pub measure_secs: f64,
    pub amplitude: f64,
}

#[derive(Debug, Clone)]
pub struct StepResponse {
    pub channels: BenchChannels,
    pub frequency_hz: f64,
    pub low_amplitude: f64,
    pub high_amplitude: f64,
    pub step_at: Duration,
    pub duration: Duration,
}

impl Default for StepResponse {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl StepResponse {
    pub fn from_settings(settings: &Settings) -> Self {
        let step = &settings.step;
        Self {
            channels: BenchChannels::from_settings(settings),
            frequency_hz: step.frequency_hz,
            low_amplitude: step.low_amplitude,
            high_amplitude: step.high_amplitude,
            step_at: step.step_at(),
            duration: step.duration(),
        }
    }

    /// Drive at the low amplitude, switch to the high one once `step_at` has passed, and
    /// sample power back to back until `duration` has elapsed.
    pub fn run<S: InstrumentLink, G: InstrumentLink>(
        &self,
        scope: &mut Oscilloscope<S>,
        generator: &mut Generator<G>,
    ) -> AppResult<StepResult> {
        let BenchChannels {
            voltage,
            current,
            drive,
        } = self.channels;
        let context = RunContext::start(scope.resource(), generator.resource());
        generator.set_amplitude(self.low_amplitude, drive)?;
        generator.set_frequency(self.frequency_hz, drive)?;

        let mut session = generator.output_session(&[drive])?;
        let initial = scope.measure_power_watts(voltage, current)?;
        info!(initial_power = initial, "Step response started");

        let mut samples = Vec::new();
        let mut amplitude = self.low_amplitude;
        let start = Instant::now();
        let mut elapsed = Duration::ZERO;
        while elapsed < self.duration {
            let measure_start = Instant::now();
            let power = scope.measure_power_watts(voltage, current)?;
            let measure_secs = measure_start.elapsed().as_secs_f64();
            elapsed = start.elapsed();

            if elapsed > self.step_at && amplitude != self.high_amplitude {
                session.set_amplitude(self.high_amplitude, drive)?;
                amplitude = self.high_amplitude;
                info!(elapsed_secs = elapsed.as_secs_f64(), "Amplitude stepped");
            }

            samples.push(StepSample {
                elapsed_secs: elapsed.as_secs_f64(),
                power,
                measure_secs,
                amplitude,
            });
        }
        session.finish()?;

        let result = StepResult {
            frequency_hz: self.frequency_hz,
            low_amplitude: self.low_amplitude,
            high_amplitude: self.high_amplitude,
            step_at_secs: self.step_at.as_secs_f64(),
            context,
            samples,
        };
        info!(
            samples = result.samples.len(),
            samples_per_second = result.samples_per_second(),
            "Step response finished"
        );
        Ok(result)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub frequency_hz: f64,
    pub low_amplitude: f64,
    pub high_amplitude: f64,
    pub step_at_secs: f64,
    pub context: RunContext,
    pub samples: Vec<StepSample>,
}

impl StepResult {
    /// Samples taken per second of run time.
    pub fn samples_per_second(&self) -> f64 {
        match self.samples.last() {
            Some(last) if last.elapsed_secs > 0.0 => {
                self.samples.len() as f64 / last.elapsed_secs
            }
            _ => 0.0,
        }
    }

    /// Mean time spent per measurement.
    pub fn mean_measure_secs(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.measure_secs).sum::<f64>() / self.samples.len() as f64
    }

    pub fn metadata(&self) -> RunMetadata {
        RunMetadata::builder("step_response")
            .description(&format!(
                "Amplitude step {} V to {} V at {} Hz",
                self.low_amplitude, self.high_amplitude, self.frequency_hz
            ))
            .context(&self.context)
            .parameter("frequency_hz", self.frequency_hz)
            .parameter("step_at_secs", self.step_at_secs)
            .parameter("samples_per_second", self.samples_per_second())
            .build()
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> AppResult<PathBuf> {
        write_records(path, &self.metadata(), &self.samples)
    }
}
