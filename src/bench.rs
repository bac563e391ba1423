//! Opening the oscilloscope/generator pair described by the settings.

use crate::config::{InstrumentConfig, Settings};
use crate::discovery::{auto_detect, DeviceKind};
use crate::error::AppResult;
use crate::generator::Generator;
use crate::instrument::mock::{bench, SimulatedDevice};
use crate::instrument::visa::VisaLink;
use crate::instrument::DynLink;
use crate::oscilloscope::Oscilloscope;
use tracing::info;

pub struct Bench {
    pub scope: Oscilloscope<DynLink>,
    pub generator: Generator<DynLink>,
}

impl Bench {
    pub fn open(settings: &Settings, simulate: bool) -> AppResult<Self> {
        if simulate {
            Self::simulated(settings, Self::simulated_device(settings))
        } else {
            Self::connect(settings)
        }
    }

    /// Connect to the real instruments over VISA.
    pub fn connect(settings: &Settings) -> AppResult<Self> {
        let (scope_resource, scope_channels) =
            resolve(&settings.oscilloscope, settings, DeviceKind::Oscilloscope)?;
        let (generator_resource, generator_channels) =
            resolve(&settings.generator, settings, DeviceKind::Generator)?;

        let scope_link: DynLink = Box::new(VisaLink::open(&scope_resource)?);
        let generator_link: DynLink = Box::new(VisaLink::open(&generator_resource)?);
        Self::from_links(
            settings,
            scope_link,
            scope_channels,
            generator_link,
            generator_channels,
        )
    }

    /// Run against a simulated bench.
    pub fn simulated(settings: &Settings, device: SimulatedDevice) -> AppResult<Self> {
        info!("Using the simulated bench");
        let (scope_link, generator_link, _) = bench(device);
        Self::from_links(
            settings,
            Box::new(scope_link),
            settings.oscilloscope.channels,
            Box::new(generator_link),
            settings.generator.channels,
        )
    }

    /// Simulated hardware wired the way the settings expect.
    pub fn simulated_device(settings: &Settings) -> SimulatedDevice {
        let mut device =
            SimulatedDevice::new().with_generator_channels(settings.generator.channels);
        device.shunt_factor = settings.measurement.shunt_factor;
        device.voltage_channel = settings.measurement.voltage_channel;
        device.current_channel = settings.measurement.current_channel;
        device.drive_channel = settings.actuation.drive_channel;
        device
    }

    fn from_links(
        settings: &Settings,
        scope_link: DynLink,
        scope_channels: u8,
        generator_link: DynLink,
        generator_channels: u8,
    ) -> AppResult<Self> {
        let scope = Oscilloscope::connect(
            scope_link,
            scope_channels,
            settings.measurement.shunt_factor,
            settings.retry_policy(),
        )?;
        let generator = Generator::connect(
            generator_link,
            generator_channels,
            settings.actuation.max_amplitude,
        )?;
        Ok(Self { scope, generator })
    }

    /// Disable every output and release both links.
    pub fn close(&mut self) -> AppResult<()> {
        let generator = self.generator.close();
        let scope = self.scope.close();
        generator.and(scope)
    }
}

/// Configured resource, or the known device of `kind` found on the bus.
fn resolve(
    config: &InstrumentConfig,
    settings: &Settings,
    kind: DeviceKind,
) -> AppResult<(String, u8)> {
    if !config.resource.is_empty() {
        return Ok((config.resource.clone(), config.channels));
    }
    let (device, resource) = auto_detect(&settings.known_devices, kind)?;
    info!(device = %device.name, resource = %resource, "Auto-detected {}", kind);
    Ok((resource, device.channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::ScopeDialect;

    #[test]
    fn test_simulated_bench_connects() {
        let settings = Settings::default();
        let mut bench = Bench::open(&settings, true).unwrap();
        assert_eq!(bench.scope.dialect(), ScopeDialect::Keysight);
        assert_eq!(bench.generator.max_amplitude(), 0.8);
        bench.close().unwrap();
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[test]
    fn test_real_bench_needs_visa() {
        let mut settings = Settings::default();
        settings.oscilloscope.resource = "USB0::1::2::3::INSTR".to_string();
        settings.generator.resource = "USB0::4::5::6::INSTR".to_string();
        assert!(Bench::open(&settings, false).is_err());
    }
}
