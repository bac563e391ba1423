//! Instrument links and vendor dialects.
//!
//! An [`InstrumentLink`] is the only thing the facades in [`crate::oscilloscope`] and
//! [`crate::generator`] know about the bus: a synchronous, blocking request/response
//! channel to one instrument. Three implementations exist:
//!
//! - [`visa::VisaLink`]: a VISA session (GPIB, USB-TMC, LXI) through `visa-rs`, compiled
//!   with the `instrument_visa` feature.
//! - [`mock::SimulatedScopeLink`] / [`mock::SimulatedGeneratorLink`]: a simulated bench
//!   with a resonant load, for running experiments without hardware.
//! - [`mock::ScriptedLink`]: canned responses with a command transcript, for tests.

pub mod dialect;
pub mod mock;
pub mod visa;

use crate::error::{AppResult, DaqError};

pub use dialect::{PhaseReading, ScopeDialect};

/// Synchronous request/response channel to a single instrument.
pub trait InstrumentLink {
    /// Send a command and read the (trimmed) response.
    fn query(&mut self, command: &str) -> AppResult<String>;

    /// Send a command without reading a response.
    fn write(&mut self, command: &str) -> AppResult<()>;

    /// Resource string identifying the instrument (e.g. `USB0::0xF4EC::...::INSTR`).
    fn resource(&self) -> &str;

    /// Release the underlying session.
    fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

impl<L: InstrumentLink + ?Sized> InstrumentLink for Box<L> {
    fn query(&mut self, command: &str) -> AppResult<String> {
        (**self).query(command)
    }

    fn write(&mut self, command: &str) -> AppResult<()> {
        (**self).write(command)
    }

    fn resource(&self) -> &str {
        (**self).resource()
    }

    fn close(&mut self) -> AppResult<()> {
        (**self).close()
    }
}

/// Boxed link chosen at runtime (real or simulated).
pub type DynLink = Box<dyn InstrumentLink + Send>;

/// Query the `*IDN?` identification string.
pub fn identify<L: InstrumentLink + ?Sized>(link: &mut L) -> AppResult<String> {
    link.query("*IDN?").map(|idn| idn.trim().to_string())
}

pub(crate) fn validate_channel(channel: u8, channels: u8) -> AppResult<()> {
    if channel < 1 || channel > channels {
        return Err(DaqError::channel_out_of_range(channel, channels));
    }
    Ok(())
}
