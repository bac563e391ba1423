//! Experiments run on the transducer bench.
//!
//! - [`PowerFeedback`]: closed-loop power regulation. Every cycle measures power, feeds it
//!   through the PID controller and nudges the generator amplitude by the controller output.
//! - [`StepResponse`]: open-loop amplitude step, recording how the measured power follows.
//!
//! Both enable the drive output through [`Generator::output_session`], so the output is
//! switched off on every exit path before a result or an error reaches the caller.
//!
//! [`Generator::output_session`]: crate::generator::Generator::output_session

pub mod feedback;
pub mod step;

pub use feedback::{ExperimentRecord, FeedbackResult, PowerFeedback};
pub use step::{StepResponse, StepResult, StepSample};

use crate::config::Settings;
use serde::{Deserialize, Serialize};

/// Which instrument channels an experiment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchChannels {
    /// Oscilloscope channel on the voltage probe.
    pub voltage: u8,
    /// Oscilloscope channel on the current-sense shunt.
    pub current: u8,
    /// Generator channel driving the amplifier.
    pub drive: u8,
}

impl Default for BenchChannels {
    fn default() -> Self {
        Self {
            voltage: 1,
            current: 2,
            drive: 1,
        }
    }
}

impl BenchChannels {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            voltage: settings.measurement.voltage_channel,
            current: settings.measurement.current_channel,
            drive: settings.actuation.drive_channel,
        }
    }
}
