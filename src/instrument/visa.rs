//! VISA instrument links.
//!
//! Wraps the `visa-rs` crate (bindings to the system VISA library) behind the
//! [`InstrumentLink`] trait. Supports resource strings like:
//!
//! - `USB0::0xF4EC::0xEE3A::SDS1MKGX802538::0::INSTR` (USB-TMC)
//! - `TCPIP0::192.168.1.100::INSTR` (LXI)
//! - `GPIB0::1::INSTR`
//!
//! Without the `instrument_visa` feature every entry point returns
//! [`DaqError::FeatureNotEnabled`].

use super::InstrumentLink;
use crate::error::{AppResult, DaqError};

#[cfg(feature = "instrument_visa")]
use std::ffi::CString;
#[cfg(feature = "instrument_visa")]
use std::io::{BufRead, BufReader, Write};
#[cfg(feature = "instrument_visa")]
use tracing::debug;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// Line terminator appended to every command.
pub const LINE_TERMINATOR: &str = "\n";

#[cfg(feature = "instrument_visa")]
fn visa_error(context: &str, err: impl std::fmt::Debug) -> DaqError {
    DaqError::Instrument(format!("{}: {:?}", context, err))
}

#[cfg(feature = "instrument_visa")]
fn visa_string(text: &str) -> AppResult<VisaString> {
    let c_string = CString::new(text)
        .map_err(|_| DaqError::Instrument(format!("resource '{}' contains a NUL byte", text)))?;
    Ok(VisaString::from(c_string))
}

/// A session opened on one VISA resource.
#[cfg(feature = "instrument_visa")]
pub struct VisaLink {
    resource: String,
    // Declared before `rm` so the session is closed before its resource manager.
    instrument: Option<Instrument>,
    _rm: DefaultRM,
}

#[cfg(feature = "instrument_visa")]
impl VisaLink {
    /// Open `resource` through the default resource manager.
    pub fn open(resource: &str) -> AppResult<Self> {
        let rm = DefaultRM::new()
            .map_err(|e| visa_error("failed to create VISA resource manager", e))?;
        let instrument = rm
            .open(&visa_string(resource)?, AccessMode::NO_LOCK, TIMEOUT_IMMEDIATE)
            .map_err(|e| visa_error(&format!("failed to open VISA resource {}", resource), e))?;
        debug!("VISA resource '{}' opened", resource);
        Ok(Self {
            resource: resource.to_string(),
            instrument: Some(instrument),
            _rm: rm,
        })
    }

    fn session(&self) -> AppResult<&Instrument> {
        self.instrument
            .as_ref()
            .ok_or_else(|| DaqError::Instrument(format!("{} is closed", self.resource)))
    }

    fn send(&self, command: &str) -> AppResult<()> {
        let mut session = self.session()?;
        session
            .write_all(format!("{}{}", command, LINE_TERMINATOR).as_bytes())
            .map_err(|e| {
                DaqError::Instrument(format!("VISA write failed for '{}': {}", command, e))
            })
    }
}

#[cfg(feature = "instrument_visa")]
impl InstrumentLink for VisaLink {
    fn query(&mut self, command: &str) -> AppResult<String> {
        self.send(command)?;
        let mut reader = BufReader::new(self.session()?);
        let mut response = String::new();
        reader
            .read_line(&mut response)
            .map_err(|e| {
                DaqError::Instrument(format!("VISA read failed for '{}': {}", command, e))
            })?;
        let response = response.trim().to_string();
        debug!("VISA query '{}' -> '{}'", command, response);
        Ok(response)
    }

    fn write(&mut self, command: &str) -> AppResult<()> {
        self.send(command)?;
        debug!("VISA command sent: {}", command);
        Ok(())
    }

    fn resource(&self) -> &str {
        &self.resource
    }

    fn close(&mut self) -> AppResult<()> {
        if self.instrument.take().is_some() {
            debug!("VISA resource '{}' closed", self.resource);
        }
        Ok(())
    }
}

/// Enumerate every `INSTR` resource the VISA library can see.
#[cfg(feature = "instrument_visa")]
pub fn list_resources() -> AppResult<Vec<String>> {
    let rm =
        DefaultRM::new().map_err(|e| visa_error("failed to create VISA resource manager", e))?;
    let mut list = rm
        .find_res_list(&visa_string("?*INSTR")?)
        .map_err(|e| visa_error("resource enumeration failed", e))?;
    let mut resources = Vec::new();
    while let Some(resource) = list
        .find_next()
        .map_err(|e| visa_error("resource enumeration failed", e))?
    {
        resources.push(resource.to_string());
    }
    Ok(resources)
}

/// Placeholder compiled without the `instrument_visa` feature.
#[cfg(not(feature = "instrument_visa"))]
pub struct VisaLink {
    resource: String,
}

#[cfg(not(feature = "instrument_visa"))]
impl VisaLink {
    pub fn open(_resource: &str) -> AppResult<Self> {
        Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
    }
}

#[cfg(not(feature = "instrument_visa"))]
impl InstrumentLink for VisaLink {
    fn query(&mut self, _command: &str) -> AppResult<String> {
        Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    fn write(&mut self, _command: &str) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

#[cfg(not(feature = "instrument_visa"))]
pub fn list_resources() -> AppResult<Vec<String>> {
    Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "instrument_visa"))]
    #[test]
    fn test_visa_disabled() {
        assert!(matches!(
            VisaLink::open("USB0::0x1::0x2::X::INSTR"),
            Err(DaqError::FeatureNotEnabled(_))
        ));
        assert!(matches!(list_resources(), Err(DaqError::FeatureNotEnabled(_))));
    }
}
