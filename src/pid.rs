//! Discrete PID controller for the power-feedback loop.
//!
//! The controller is deliberately minimal: proportional, integral and derivative terms on
//! the error `setpoint - measured`, with the output clamped symmetrically to
//! `[-max_output, max_output]`. There is no anti-windup; the integral accumulates
//! `error * dt` on every update for as long as the controller lives (or until [`reset`]).
//!
//! [`reset`]: PidController::reset

use serde::{Deserialize, Serialize};
use std::fmt;

/// PID controller state and configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidController {
    /// Proportional gain.
    kp: f64,
    /// Integral gain.
    ki: f64,
    /// Derivative gain.
    kd: f64,
    setpoint: f64,
    /// Symmetric output bound. `f64::INFINITY` leaves the output unbounded.
    #[serde(default = "unbounded")]
    max_output: f64,
    #[serde(skip)]
    previous_error: f64,
    #[serde(skip)]
    integral: f64,
}

fn unbounded() -> f64 {
    f64::INFINITY
}

impl PidController {
    /// Create a controller with an unbounded output.
    pub fn new(kp: f64, ki: f64, kd: f64, setpoint: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            max_output: f64::INFINITY,
            previous_error: 0.0,
            integral: 0.0,
        }
    }

    /// Set the symmetric output bound.
    pub fn with_max_output(mut self, max_output: f64) -> Self {
        self.max_output = max_output;
        self
    }

    /// Advance the controller by one sample.
    ///
    /// A non-positive `dt` zeroes the derivative term instead of dividing by it. A term whose
    /// gain is zero contributes nothing, even when its value has overflowed. A non-finite
    /// measurement leaves the state untouched and yields 0.
    pub fn update(&mut self, measured_value: f64, dt: f64) -> f64 {
        let error = self.setpoint - measured_value;
        if !error.is_finite() {
            return 0.0;
        }
        self.integral += error * dt;
        let derivative = if dt > 0.0 {
            (error - self.previous_error) / dt
        } else {
            0.0
        };

        let mut output =
            term(self.kp, error) + term(self.ki, self.integral) + term(self.kd, derivative);
        if output.is_nan() {
            output = 0.0;
        }
        if output > self.max_output {
            output = self.max_output;
        }
        if output < -self.max_output {
            output = -self.max_output;
        }

        self.previous_error = error;
        output
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn set_gains(&mut self, kp: f64, ki: f64, kd: f64) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    pub fn set_max_output(&mut self, max_output: f64) {
        self.max_output = max_output;
    }

    /// Clear the accumulated integral and the previous error. Gains and setpoint are kept.
    pub fn reset(&mut self) {
        self.previous_error = 0.0;
        self.integral = 0.0;
    }

    /// `(kp, ki, kd)`
    pub fn gains(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn max_output(&self) -> f64 {
        self.max_output
    }

    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }
}

fn term(gain: f64, value: f64) -> f64 {
    if gain == 0.0 {
        0.0
    } else {
        gain * value
    }
}

impl fmt::Display for PidController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- PID ---")?;
        writeln!(f, " - Kp = {}", self.kp)?;
        writeln!(f, " - Ki = {}", self.ki)?;
        writeln!(f, " - Kd = {}", self.kd)?;
        writeln!(f, " - setpoint = {}", self.setpoint)?;
        write!(f, " - max_output = {}", self.max_output)
    }
}
