//! Resonance search by frequency sweep.
//!
//! The drive frequency is stepped through a linear grid and power and phase are recorded at
//! every point. Resonance is estimated two ways: the frequency of maximum power, and the
//! frequency where the voltage/current phase is closest to zero. Repeating the sweep gives
//! the spread of both estimates.

use crate::config::{Settings, SweepConfig};
use crate::data::storage::write_records;
use crate::error::{AppResult, DaqError};
use crate::experiment::BenchChannels;
use crate::generator::Generator;
use crate::instrument::InstrumentLink;
use crate::metadata::{RunContext, RunMetadata};
use crate::oscilloscope::Oscilloscope;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub frequency_hz: f64,
    pub power: f64,
    pub phase_deg: f64,
}

#[derive(Debug, Clone)]
pub struct ResonanceSweep {
    pub channels: BenchChannels,
    pub start_hz: f64,
    pub end_hz: f64,
    pub points: usize,
    pub settle: Duration,
    pub amplitude: f64,
}

impl Default for ResonanceSweep {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ResonanceSweep {
    pub fn from_settings(settings: &Settings) -> Self {
        let sweep: &SweepConfig = &settings.sweep;
        Self {
            channels: BenchChannels::from_settings(settings),
            start_hz: sweep.start_hz,
            end_hz: sweep.end_hz,
            points: sweep.points,
            settle: sweep.settle(),
            amplitude: sweep.amplitude,
        }
    }

    /// Spacing between neighbouring grid frequencies.
    pub fn step_hz(&self) -> f64 {
        (self.end_hz - self.start_hz) / (self.points.saturating_sub(1).max(1)) as f64
    }

    /// `points` linearly spaced frequencies from `start_hz` to `end_hz` inclusive.
    pub fn frequencies(&self) -> Vec<f64> {
        let step = self.step_hz();
        (0..self.points)
            .map(|k| self.start_hz + k as f64 * step)
            .collect()
    }

    /// One sweep with the drive output enabled for its duration.
    pub fn run<S: InstrumentLink, G: InstrumentLink>(
        &self,
        scope: &mut Oscilloscope<S>,
        generator: &mut Generator<G>,
    ) -> AppResult<SweepResult> {
        if self.points < 2 || !(self.start_hz < self.end_hz) {
            return Err(DaqError::Configuration(format!(
                "Sweep needs 2+ points over an increasing range, got {} points over {}..{} Hz",
                self.points, self.start_hz, self.end_hz
            )));
        }

        let BenchChannels {
            voltage,
            current,
            drive,
        } = self.channels;
        let context = RunContext::start(scope.resource(), generator.resource());
        generator.set_amplitude(self.amplitude, drive)?;
        generator.set_frequency(self.start_hz, drive)?;

        let mut session = generator.output_session(&[drive])?;
        let mut points = Vec::with_capacity(self.points);
        for frequency_hz in self.frequencies() {
            session.set_frequency(frequency_hz, drive)?;
            if !self.settle.is_zero() {
                std::thread::sleep(self.settle);
            }
            let reading = scope.measure_power(voltage, current)?;
            debug!(frequency_hz, power = reading.power, phase = reading.phase, "Sweep point");
            points.push(SweepPoint {
                frequency_hz,
                power: reading.power,
                phase_deg: reading.phase,
            });
        }
        session.finish()?;

        let result = SweepResult::from_points(context, points)?;
        info!(
            max_power_hz = result.max_power_hz,
            zero_phase_hz = result.zero_phase_hz,
            max_power = result.max_power,
            "Resonance sweep finished"
        );
        Ok(result)
    }

    /// Repeat the sweep and summarize both estimates.
    pub fn run_repeated<S: InstrumentLink, G: InstrumentLink>(
        &self,
        scope: &mut Oscilloscope<S>,
        generator: &mut Generator<G>,
        repetitions: usize,
    ) -> AppResult<ResonanceStats> {
        if repetitions == 0 {
            return Err(DaqError::Configuration(
                "Sweep repetitions must be at least 1".to_string(),
            ));
        }

        let mut sweeps = Vec::with_capacity(repetitions);
        for repetition in 0..repetitions {
            let result = self.run(scope, generator)?;
            info!(
                repetition,
                max_power_hz = result.max_power_hz,
                zero_phase_hz = result.zero_phase_hz,
                "Sweep repetition done"
            );
            sweeps.push(result);
        }

        let stats = ResonanceStats::from_sweeps(sweeps);
        info!(
            "Resonance (max power) = {:.1} ± {:.1} Hz, (zero phase) = {:.1} ± {:.1} Hz",
            stats.max_power.mean,
            stats.max_power.std_error,
            stats.zero_phase.mean,
            stats.zero_phase.std_error
        );
        Ok(stats)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub context: RunContext,
    pub points: Vec<SweepPoint>,
    /// Frequency of the highest measured power.
    pub max_power_hz: f64,
    pub max_power: f64,
    /// Frequency of the smallest absolute phase.
    pub zero_phase_hz: f64,
    pub zero_phase_deg: f64,
}

impl SweepResult {
    /// Estimate resonance from recorded points. Ties go to the lowest frequency.
    pub fn from_points(context: RunContext, points: Vec<SweepPoint>) -> AppResult<Self> {
        let first = *points
            .first()
            .ok_or_else(|| DaqError::Configuration("Sweep produced no points".to_string()))?;

        let mut by_power = first;
        let mut by_phase = first;
        for point in &points[1..] {
            if point.power > by_power.power {
                by_power = *point;
            }
            if point.phase_deg.abs() < by_phase.phase_deg.abs() {
                by_phase = *point;
            }
        }

        Ok(Self {
            max_power_hz: by_power.frequency_hz,
            max_power: by_power.power,
            zero_phase_hz: by_phase.frequency_hz,
            zero_phase_deg: by_phase.phase_deg,
            context,
            points,
        })
    }

    pub fn metadata(&self) -> RunMetadata {
        RunMetadata::builder("resonance_sweep")
            .description(&self.describe())
            .context(&self.context)
            .parameter("max_power_hz", self.max_power_hz)
            .parameter("zero_phase_hz", self.zero_phase_hz)
            .parameter("points", self.points.len())
            .build()
    }

    fn describe(&self) -> String {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => format!(
                "Frequency sweep {} Hz to {} Hz over {} points",
                first.frequency_hz,
                last.frequency_hz,
                self.points.len()
            ),
            _ => "Frequency sweep".to_string(),
        }
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> AppResult<PathBuf> {
        write_records(path, &self.metadata(), &self.points)
    }
}

/// Mean and standard error of repeated estimates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub mean: f64,
    /// Population standard deviation over `sqrt(n)`.
    pub std_error: f64,
}

impl Estimate {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std_error: variance.sqrt() / n.sqrt(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResonanceStats {
    pub sweeps: Vec<SweepResult>,
    pub max_power: Estimate,
    pub zero_phase: Estimate,
}

/// One row per repetition when written to CSV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepetitionRow {
    pub repetition: usize,
    pub max_power_hz: f64,
    pub zero_phase_hz: f64,
}

impl ResonanceStats {
    fn from_sweeps(sweeps: Vec<SweepResult>) -> Self {
        let max_power: Vec<f64> = sweeps.iter().map(|s| s.max_power_hz).collect();
        let zero_phase: Vec<f64> = sweeps.iter().map(|s| s.zero_phase_hz).collect();
        let empty = Estimate {
            mean: f64::NAN,
            std_error: f64::NAN,
        };
        Self {
            max_power: Estimate::from_samples(&max_power).unwrap_or(empty),
            zero_phase: Estimate::from_samples(&zero_phase).unwrap_or(empty),
            sweeps,
        }
    }

    pub fn rows(&self) -> Vec<RepetitionRow> {
        self.sweeps
            .iter()
            .enumerate()
            .map(|(repetition, sweep)| RepetitionRow {
                repetition,
                max_power_hz: sweep.max_power_hz,
                zero_phase_hz: sweep.zero_phase_hz,
            })
            .collect()
    }

    /// Instruments and start time come from the first sweep.
    pub fn metadata(&self) -> RunMetadata {
        let mut builder = RunMetadata::builder("resonance_repeated");
        if let Some(first) = self.sweeps.first() {
            let description = format!("{} repetitions of: {}", self.sweeps.len(), first.describe());
            builder = builder.description(&description).context(&first.context);
        }
        builder
            .parameter("repetitions", self.sweeps.len())
            .parameter("max_power", self.max_power)
            .parameter("zero_phase", self.zero_phase)
            .build()
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> AppResult<PathBuf> {
        write_records(path, &self.metadata(), &self.rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(frequency_hz: f64, power: f64, phase_deg: f64) -> SweepPoint {
        SweepPoint {
            frequency_hz,
            power,
            phase_deg,
        }
    }

    #[test]
    fn test_grid_is_inclusive() {
        let sweep = ResonanceSweep {
            start_hz: 100.0,
            end_hz: 200.0,
            points: 5,
            ..ResonanceSweep::default()
        };
        assert_eq!(sweep.frequencies(), vec![100.0, 125.0, 150.0, 175.0, 200.0]);
        assert_eq!(sweep.step_hz(), 25.0);
    }

    fn context() -> RunContext {
        RunContext::start("SCOPE::INSTR", "GEN::INSTR")
    }

    #[test]
    fn test_estimates_from_points() {
        let points = vec![
            point(1.0, 0.5, -40.0),
            point(2.0, 2.0, 5.0),
            point(3.0, 1.0, -2.0),
        ];
        let result = SweepResult::from_points(context(), points).unwrap();
        assert_eq!(result.max_power_hz, 2.0);
        assert_eq!(result.max_power, 2.0);
        assert_eq!(result.zero_phase_hz, 3.0);
        assert!(SweepResult::from_points(context(), Vec::new()).is_err());
    }

    #[test]
    fn test_estimate_statistics() {
        let estimate = Estimate::from_samples(&[37_900.0, 38_000.0, 38_100.0]).unwrap();
        assert!((estimate.mean - 38_000.0).abs() < 1e-9);
        let expected = (20_000.0f64 / 3.0).sqrt() / 3.0f64.sqrt();
        assert!((estimate.std_error - expected).abs() < 1e-9);
        assert!(Estimate::from_samples(&[]).is_none());

        let single = Estimate::from_samples(&[38_000.0]).unwrap();
        assert_eq!(single.std_error, 0.0);
    }

    #[test]
    fn test_repeated_metadata_from_first_sweep() {
        let first = SweepResult::from_points(
            context(),
            vec![point(37_000.0, 1.0, 3.0), point(39_000.0, 2.0, -1.0)],
        )
        .unwrap();
        let second = SweepResult::from_points(
            RunContext::start("OTHER::SCOPE", "OTHER::GEN"),
            vec![point(37_000.0, 2.0, 1.0), point(39_000.0, 1.0, -3.0)],
        )
        .unwrap();
        let stats = ResonanceStats::from_sweeps(vec![first.clone(), second]);

        let metadata = stats.metadata();
        assert_eq!(metadata.started_at, first.context.started_at);
        assert_eq!(metadata.instruments["oscilloscope"], "SCOPE::INSTR");
        assert_eq!(metadata.instruments["generator"], "GEN::INSTR");
        assert_eq!(
            metadata.description,
            "2 repetitions of: Frequency sweep 37000 Hz to 39000 Hz over 2 points"
        );
        assert_eq!(metadata.parameters["repetitions"], serde_json::json!(2));
        assert_eq!(first.metadata().instruments, metadata.instruments);
    }
}
