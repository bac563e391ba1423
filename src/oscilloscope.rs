//! Oscilloscope facade: per-channel measurements and derived power.
//!
//! Every measurement validates its channel arguments against the configured channel count
//! before touching the bus, issues the query in the dialect picked at connect time, and
//! parses the reply. Phase readings are retried against a [`RetryBudget`] because some
//! firmwares answer with a placeholder while the trigger has not settled.

use crate::error::{AppResult, DaqError};
use crate::error_recovery::{RetryBudget, RetryPolicy};
use crate::instrument::{self, validate_channel, InstrumentLink, PhaseReading, ScopeDialect};
use crate::measurement::{MeasurementSample, PowerReading};
use tracing::{debug, info, warn};

pub struct Oscilloscope<L: InstrumentLink> {
    link: L,
    dialect: ScopeDialect,
    channels: u8,
    shunt_factor: f64,
    retry: RetryBudget,
}

impl<L: InstrumentLink> Oscilloscope<L> {
    /// Identify the instrument and pick its command dialect.
    ///
    /// Vendors without a known dialect are driven with Keysight-style SCPI.
    pub fn connect(
        mut link: L,
        channels: u8,
        shunt_factor: f64,
        policy: RetryPolicy,
    ) -> AppResult<Self> {
        let idn = instrument::identify(&mut link)?;
        let dialect = ScopeDialect::from_identity(&idn).unwrap_or_else(|| {
            warn!(idn = %idn, "Unrecognized oscilloscope vendor, assuming Keysight-style SCPI");
            ScopeDialect::Keysight
        });
        info!(
            resource = link.resource(),
            dialect = %dialect,
            channels,
            "Connected oscilloscope: {}",
            idn
        );
        Ok(Self::with_dialect(link, dialect, channels, shunt_factor, policy))
    }

    /// Wrap a link whose dialect is already known. Issues no query.
    pub fn with_dialect(
        link: L,
        dialect: ScopeDialect,
        channels: u8,
        shunt_factor: f64,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            link,
            dialect,
            channels,
            shunt_factor,
            retry: RetryBudget::new(policy),
        }
    }

    pub fn dialect(&self) -> ScopeDialect {
        self.dialect
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn shunt_factor(&self) -> f64 {
        self.shunt_factor
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.retry.policy()
    }

    pub fn resource(&self) -> &str {
        self.link.resource()
    }

    /// Raw `*IDN?` reply.
    pub fn identify(&mut self) -> AppResult<String> {
        instrument::identify(&mut self.link)
    }

    /// RMS voltage on `channel`.
    pub fn measure_rms(&mut self, channel: u8) -> AppResult<f64> {
        validate_channel(channel, self.channels)?;
        let command = self.dialect.rms_query(channel);
        self.query_value(&command)
    }

    /// Peak-to-peak voltage on `channel`.
    pub fn measure_vpp(&mut self, channel: u8) -> AppResult<f64> {
        validate_channel(channel, self.channels)?;
        let command = self.dialect.vpp_query(channel);
        self.query_value(&command)
    }

    /// Signal frequency on `channel` in hertz.
    pub fn measure_frequency(&mut self, channel: u8) -> AppResult<f64> {
        validate_channel(channel, self.channels)?;
        let command = self.dialect.frequency_query(channel);
        self.query_value(&command)
    }

    /// Phase of `channel_b` relative to `channel_a` in degrees.
    ///
    /// An invalid reading is re-queried after the policy's backoff delay. The call fails
    /// with [`DaqError::MeasurementTimeout`] once `max_attempts` consecutive invalid
    /// readings have been seen, so at most `max_attempts` queries are issued. Bus faults
    /// are returned immediately.
    pub fn measure_phase(&mut self, channel_a: u8, channel_b: u8) -> AppResult<f64> {
        validate_channel(channel_a, self.channels)?;
        validate_channel(channel_b, self.channels)?;
        let command = self.dialect.phase_query(channel_a, channel_b);

        self.retry.reset();
        loop {
            let response = self.link.query(&command)?;
            match self.dialect.parse_phase(&command, &response)? {
                PhaseReading::Valid(phase) => {
                    self.retry.reset();
                    return Ok(phase);
                }
                PhaseReading::Invalid => {
                    debug!(
                        attempt = self.retry.consecutive_invalid() + 1,
                        "Invalid phase reading on C{}-C{}", channel_a, channel_b
                    );
                    if let Err(e) = self.retry.record_invalid() {
                        warn!("Phase measurement gave up: {}", e);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Active power from a voltage channel and a current-sense channel.
    pub fn measure_power(&mut self, v_channel: u8, i_channel: u8) -> AppResult<PowerReading> {
        validate_channel(v_channel, self.channels)?;
        validate_channel(i_channel, self.channels)?;
        if v_channel == i_channel {
            return Err(DaqError::InvalidChannel {
                channel: i_channel,
                reason: "voltage and current must be measured on different channels".to_string(),
            });
        }

        let voltage = self.measure_rms(v_channel)?;
        let current = self.measure_rms(i_channel)?;
        let phase = self.measure_phase(v_channel, i_channel)?;
        let reading = PowerReading::derive(voltage, current, phase, self.shunt_factor);
        debug!(
            power = reading.power,
            voltage = reading.voltage,
            current = reading.current,
            phase = reading.phase,
            "Power measured"
        );
        Ok(reading)
    }

    /// Like [`measure_power`](Self::measure_power), but only the watts.
    pub fn measure_power_watts(&mut self, v_channel: u8, i_channel: u8) -> AppResult<f64> {
        self.measure_power(v_channel, i_channel).map(|reading| reading.power)
    }

    /// Timestamped power reading.
    pub fn sample(&mut self, v_channel: u8, i_channel: u8) -> AppResult<MeasurementSample> {
        self.measure_power(v_channel, i_channel)
            .map(MeasurementSample::new)
    }

    /// Release the link.
    pub fn close(&mut self) -> AppResult<()> {
        info!(resource = self.link.resource(), "Closing oscilloscope");
        self.link.close()
    }

    pub fn into_link(self) -> L {
        self.link
    }

    fn query_value(&mut self, command: &str) -> AppResult<f64> {
        let response = self.link.query(command)?;
        self.dialect.parse_value(command, &response)
    }
}
