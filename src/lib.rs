//! Core library for the pulser_daq application.
//!
//! Drives an oscilloscope and a waveform generator over VISA to regulate the power
//! delivered to a resonant transducer with a PID loop, and to locate its resonance.
//!
//! - [`oscilloscope`] / [`generator`]: instrument facades over an [`instrument::InstrumentLink`]
//! - [`pid`]: the controller
//! - [`experiment`]: power feedback and step response runs
//! - [`resonance`]: frequency sweeps
//! - [`sampler`]: background power sampling
//! - [`config`], [`logging`], [`data`]: settings, tracing setup and CSV output
//!
//! Everything runs against [`instrument::mock`] without hardware.

pub mod bench;
pub mod config;
pub mod data;
pub mod discovery;
pub mod error;
pub mod error_recovery;
pub mod experiment;
pub mod generator;
pub mod instrument;
pub mod logging;
pub mod measurement;
pub mod metadata;
pub mod oscilloscope;
pub mod pid;
pub mod resonance;
pub mod sampler;

pub use error::{AppResult, DaqError};
