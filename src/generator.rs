//! Waveform generator facade.
//!
//! Commands follow the Siglent SDG remote syntax (`C<n>:BSWV ...`, `C<n>:OUTP ...`).
//! Amplitudes are checked against a safety ceiling before they reach the bus, since the
//! generator drives a high-voltage amplifier.
//!
//! Outputs enabled through [`Generator::output_session`] are switched off again when the
//! returned [`OutputGuard`] goes out of scope, whichever way the caller leaves.

use crate::error::{AppResult, DaqError};
use crate::instrument::{self, validate_channel, InstrumentLink};
use std::ops::{Deref, DerefMut};
use tracing::{debug, info, warn};

/// Default amplitude ceiling in volts.
pub const DEFAULT_MAX_AMPLITUDE: f64 = 0.8;

#[derive(Debug, Clone, Default)]
struct ChannelState {
    amplitude: Option<f64>,
    enabled: bool,
}

pub struct Generator<L: InstrumentLink> {
    link: L,
    channels: u8,
    max_amplitude: f64,
    state: Vec<ChannelState>,
}

impl<L: InstrumentLink> Generator<L> {
    pub fn new(link: L, channels: u8, max_amplitude: f64) -> Self {
        Self {
            link,
            channels,
            max_amplitude,
            state: vec![ChannelState::default(); usize::from(channels)],
        }
    }

    /// Like [`new`](Self::new), logging the identification string.
    pub fn connect(mut link: L, channels: u8, max_amplitude: f64) -> AppResult<Self> {
        let idn = instrument::identify(&mut link)?;
        info!(resource = link.resource(), channels, "Connected generator: {}", idn);
        Ok(Self::new(link, channels, max_amplitude))
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn max_amplitude(&self) -> f64 {
        self.max_amplitude
    }

    pub fn resource(&self) -> &str {
        self.link.resource()
    }

    pub fn identify(&mut self) -> AppResult<String> {
        instrument::identify(&mut self.link)
    }

    /// Fails with [`DaqError::FrequencyRange`], without touching the bus, unless `hz` is
    /// finite and positive.
    pub fn set_frequency(&mut self, hz: f64, channel: u8) -> AppResult<()> {
        validate_channel(channel, self.channels)?;
        if !hz.is_finite() || hz <= 0.0 {
            return Err(DaqError::FrequencyRange { requested: hz });
        }
        self.link.write(&format!("C{}:BSWV FRQ,{}", channel, hz))
    }

    /// Command the amplitude of `channel`.
    ///
    /// Fails with [`DaqError::ActuationRange`], without touching the bus, when `volts` is
    /// negative, not finite, or above the ceiling.
    pub fn set_amplitude(&mut self, volts: f64, channel: u8) -> AppResult<()> {
        validate_channel(channel, self.channels)?;
        if !volts.is_finite() || volts < 0.0 || volts > self.max_amplitude {
            return Err(DaqError::ActuationRange {
                requested: volts,
                limit: self.max_amplitude,
            });
        }
        self.link.write(&format!("C{}:BSWV AMP,{}", channel, volts))?;
        self.channel_mut(channel).amplitude = Some(volts);
        Ok(())
    }

    pub fn set_offset(&mut self, volts: f64, channel: u8) -> AppResult<()> {
        validate_channel(channel, self.channels)?;
        self.link.write(&format!("C{}:BSWV OFST,{}", channel, volts))
    }

    /// Output load in ohms. `f64::INFINITY` selects high impedance.
    pub fn set_output_impedance(&mut self, ohms: f64, channel: u8) -> AppResult<()> {
        validate_channel(channel, self.channels)?;
        let load = if ohms.is_infinite() {
            "HZ".to_string()
        } else {
            ohms.to_string()
        };
        self.link.write(&format!("C{}:OUTP LOAD,{}", channel, load))
    }

    pub fn enable_output(&mut self, channel: u8) -> AppResult<()> {
        validate_channel(channel, self.channels)?;
        self.link.write(&format!("C{}:OUTP ON", channel))?;
        self.channel_mut(channel).enabled = true;
        debug!("Output C{} enabled", channel);
        Ok(())
    }

    pub fn disable_output(&mut self, channel: u8) -> AppResult<()> {
        validate_channel(channel, self.channels)?;
        self.link.write(&format!("C{}:OUTP OFF", channel))?;
        self.channel_mut(channel).enabled = false;
        debug!("Output C{} disabled", channel);
        Ok(())
    }

    /// Frequency reported by the instrument.
    pub fn query_frequency(&mut self, channel: u8) -> AppResult<f64> {
        self.query_waveform_value(channel, "FRQ")
    }

    /// Amplitude reported by the instrument.
    pub fn query_amplitude(&mut self, channel: u8) -> AppResult<f64> {
        self.query_waveform_value(channel, "AMP")
    }

    /// Last amplitude commanded on `channel`, if any.
    pub fn amplitude(&self, channel: u8) -> Option<f64> {
        self.channel(channel).and_then(|state| state.amplitude)
    }

    pub fn is_enabled(&self, channel: u8) -> bool {
        self.channel(channel).map_or(false, |state| state.enabled)
    }

    pub fn enabled_channels(&self) -> Vec<u8> {
        (1..=self.channels).filter(|&ch| self.is_enabled(ch)).collect()
    }

    /// Enable `channels` and return a guard that disables them again when dropped.
    ///
    /// If enabling fails partway, the channels already enabled are disabled before the error
    /// is returned.
    pub fn output_session(&mut self, channels: &[u8]) -> AppResult<OutputGuard<'_, L>> {
        let mut guard = OutputGuard {
            generator: self,
            channels: Vec::with_capacity(channels.len()),
        };
        for &channel in channels {
            guard.generator.enable_output(channel)?;
            guard.channels.push(channel);
        }
        Ok(guard)
    }

    /// Disable every enabled output and release the link.
    pub fn close(&mut self) -> AppResult<()> {
        let mut errors = Vec::new();
        for channel in self.enabled_channels() {
            if let Err(e) = self.disable_output(channel) {
                errors.push(e);
            }
        }
        if let Err(e) = self.link.close() {
            errors.push(e);
        }
        info!(resource = self.link.resource(), "Generator closed");
        collect_errors(errors)
    }

    pub fn into_link(self) -> L {
        self.link
    }

    fn channel(&self, channel: u8) -> Option<&ChannelState> {
        self.state.get(usize::from(channel).checked_sub(1)?)
    }

    // Callers validate `channel` first.
    fn channel_mut(&mut self, channel: u8) -> &mut ChannelState {
        &mut self.state[usize::from(channel) - 1]
    }

    fn query_waveform_value(&mut self, channel: u8, key: &str) -> AppResult<f64> {
        validate_channel(channel, self.channels)?;
        let command = format!("C{}:BSWV?", channel);
        let response = self.link.query(&command)?;
        parse_waveform_value(&response, key).ok_or(DaqError::InvalidResponse { command, response })
    }
}

/// Pick `key` out of a `C1:BSWV WVTP,SINE,FRQ,38000HZ,AMP,0.25V,...` reply.
fn parse_waveform_value(response: &str, key: &str) -> Option<f64> {
    let (_, list) = response.trim().split_once(' ')?;
    let fields: Vec<&str> = list.split(',').collect();
    fields
        .chunks(2)
        .find(|pair| pair[0].trim() == key)
        .and_then(|pair| pair.get(1))
        .and_then(|value| {
            value
                .trim()
                .trim_end_matches(|c: char| c.is_ascii_alphabetic())
                .parse()
                .ok()
        })
}

fn collect_errors(mut errors: Vec<DaqError>) -> AppResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(DaqError::ShutdownFailed(errors)),
    }
}

/// Scoped output enable. Dereferences to the [`Generator`] so the session can keep
/// commanding it.
pub struct OutputGuard<'a, L: InstrumentLink> {
    generator: &'a mut Generator<L>,
    channels: Vec<u8>,
}

impl<L: InstrumentLink> OutputGuard<'_, L> {
    /// Channels this guard will disable.
    pub fn channels(&self) -> &[u8] {
        &self.channels
    }

    /// Disable the guarded outputs now and report failures.
    pub fn finish(mut self) -> AppResult<()> {
        collect_errors(self.shutdown())
    }

    fn shutdown(&mut self) -> Vec<DaqError> {
        let mut errors = Vec::new();
        for channel in std::mem::take(&mut self.channels) {
            // Already switched off by hand inside the session.
            if !self.generator.is_enabled(channel) {
                continue;
            }
            if let Err(e) = self.generator.disable_output(channel) {
                warn!("Failed to disable output C{}: {}", channel, e);
                errors.push(e);
            }
        }
        errors
    }
}

impl<L: InstrumentLink> Deref for OutputGuard<'_, L> {
    type Target = Generator<L>;

    fn deref(&self) -> &Self::Target {
        self.generator
    }
}

impl<L: InstrumentLink> DerefMut for OutputGuard<'_, L> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.generator
    }
}

impl<L: InstrumentLink> Drop for OutputGuard<'_, L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
