//! Simulated bench and scripted links.
//!
//! [`SimulatedDevice`] models a generator driving a resonant transducer through a high
//! voltage amplifier, watched by an oscilloscope on a voltage probe and a current-sense
//! shunt. The simulated links speak the same command strings as the real instruments
//! (Keysight-style SCPI on the oscilloscope, Siglent SDG on the generator), so every facade
//! and experiment runs unchanged against it.
//!
//! [`ScriptedLink`] replays canned responses and records every command it receives.

use super::InstrumentLink;
use crate::error::{AppResult, DaqError};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::VecDeque;
use std::f64::consts::FRAC_1_SQRT_2;
use std::sync::Arc;

const SCOPE_IDN: &str = "KEYSIGHT TECHNOLOGIES,DSOX1204G,SIM00001,2.12";
const GENERATOR_IDN: &str = "Siglent Technologies,SDG1032X,SIM00002,1.01.01.33R1";
const OVERFLOW: &str = "9.9E+37";

/// Settings of one generator output.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorChannelState {
    pub frequency: f64,
    pub amplitude: f64,
    pub offset: f64,
    pub load_ohms: f64,
    pub output_enabled: bool,
}

impl Default for GeneratorChannelState {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            amplitude: 0.0,
            offset: 0.0,
            load_ohms: 50.0,
            output_enabled: false,
        }
    }
}

/// Explicit state of the simulated hardware.
#[derive(Debug)]
pub struct SimulatedDevice {
    /// Series resonance of the load.
    pub resonance_hz: f64,
    pub quality_factor: f64,
    /// Load resistance at resonance.
    pub load_ohms: f64,
    /// Gain of the amplifier between generator and load.
    pub amplifier_gain: f64,
    /// Volts across the current-sense shunt per ampere.
    pub shunt_factor: f64,
    pub drive_channel: u8,
    pub voltage_channel: u8,
    pub current_channel: u8,
    generator: Vec<GeneratorChannelState>,
    generator_log: Vec<String>,
    noise: f64,
    rng: StdRng,
    invalid_phase_reads: u32,
    phase_queries: u64,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// A 38 kHz transducer delivering about 2.25 W at 0.25 V drive.
    pub fn new() -> Self {
        Self {
            resonance_hz: 38_000.0,
            quality_factor: 50.0,
            load_ohms: 2.0e6,
            amplifier_gain: 12_000.0,
            shunt_factor: 0.2,
            drive_channel: 1,
            voltage_channel: 1,
            current_channel: 2,
            generator: vec![GeneratorChannelState::default(); 2],
            generator_log: Vec::new(),
            noise: 0.0,
            rng: StdRng::seed_from_u64(0),
            invalid_phase_reads: 0,
            phase_queries: 0,
        }
    }

    pub fn with_resonance(mut self, resonance_hz: f64, quality_factor: f64) -> Self {
        self.resonance_hz = resonance_hz;
        self.quality_factor = quality_factor;
        self
    }

    /// Relative uniform noise on voltage/current readings (phase gets `noise * 10` degrees).
    pub fn with_noise(mut self, noise: f64, seed: u64) -> Self {
        self.noise = noise;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_generator_channels(mut self, channels: u8) -> Self {
        self.generator = vec![GeneratorChannelState::default(); usize::from(channels)];
        self
    }

    pub fn into_shared(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    /// Make the next `count` phase queries answer with the overflow marker.
    pub fn inject_invalid_phase(&mut self, count: u32) {
        self.invalid_phase_reads = count;
    }

    pub fn phase_queries(&self) -> u64 {
        self.phase_queries
    }

    pub fn generator_channel(&self, channel: u8) -> Option<&GeneratorChannelState> {
        self.generator.get(usize::from(channel).checked_sub(1)?)
    }

    /// Every command written to the simulated generator, in order.
    pub fn generator_log(&self) -> &[String] {
        &self.generator_log
    }

    /// Power actually dissipated in the load.
    pub fn true_power(&self) -> f64 {
        match self.drive() {
            Some((amplitude, frequency)) => {
                let v = self.load_voltage(amplitude);
                let x = self.reactance_ratio(frequency);
                v * v / (self.load_ohms * (1.0 + x * x))
            }
            None => 0.0,
        }
    }

    fn drive(&self) -> Option<(f64, f64)> {
        self.generator_channel(self.drive_channel)
            .filter(|state| state.output_enabled)
            .map(|state| (state.amplitude, state.frequency))
    }

    fn load_voltage(&self, amplitude: f64) -> f64 {
        amplitude * self.amplifier_gain * FRAC_1_SQRT_2
    }

    /// `Q (f/f0 - f0/f)`: tangent of the impedance angle.
    fn reactance_ratio(&self, frequency: f64) -> f64 {
        self.quality_factor * (frequency / self.resonance_hz - self.resonance_hz / frequency)
    }

    fn jitter(&mut self, value: f64, scale: f64) -> f64 {
        if self.noise > 0.0 {
            let spread = self.noise * scale;
            value + self.rng.gen_range(-spread..=spread)
        } else {
            value
        }
    }

    fn rms(&mut self, channel: u8) -> f64 {
        let value = match self.drive() {
            Some((amplitude, frequency)) => {
                let v = self.load_voltage(amplitude);
                if channel == self.voltage_channel {
                    v
                } else if channel == self.current_channel {
                    let x = self.reactance_ratio(frequency);
                    v / (self.load_ohms * (1.0 + x * x).sqrt()) * self.shunt_factor
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.jitter(value, value.abs())
    }

    fn phase(&mut self, channel_a: u8, channel_b: u8) -> Option<f64> {
        self.phase_queries += 1;
        if self.invalid_phase_reads > 0 {
            self.invalid_phase_reads -= 1;
            return None;
        }
        let (_, frequency) = self.drive()?;
        let angle = self.reactance_ratio(frequency).atan().to_degrees();
        let pair = (channel_a, channel_b);
        let phase = if pair == (self.voltage_channel, self.current_channel) {
            angle
        } else if pair == (self.current_channel, self.voltage_channel) {
            -angle
        } else {
            return None;
        };
        Some(self.jitter(phase, 10.0))
    }

    fn frequency(&self, channel: u8) -> Option<f64> {
        if channel != self.voltage_channel && channel != self.current_channel {
            return None;
        }
        self.drive().map(|(_, frequency)| frequency)
    }

    fn generator_mut(&mut self, channel: u8) -> AppResult<&mut GeneratorChannelState> {
        let index = usize::from(channel).checked_sub(1);
        index
            .and_then(|index| self.generator.get_mut(index))
            .ok_or_else(|| DaqError::Instrument(format!("generator has no channel C{}", channel)))
    }
}

/// Build a simulated oscilloscope/generator pair sharing one device.
pub fn bench(
    device: SimulatedDevice,
) -> (
    SimulatedScopeLink,
    SimulatedGeneratorLink,
    Arc<Mutex<SimulatedDevice>>,
) {
    let device = device.into_shared();
    (
        SimulatedScopeLink::new(device.clone()),
        SimulatedGeneratorLink::new(device.clone()),
        device,
    )
}

/// Oscilloscope side of the simulated bench.
pub struct SimulatedScopeLink {
    device: Arc<Mutex<SimulatedDevice>>,
    resource: String,
    queries: u64,
    fail_after: Option<u64>,
}

impl SimulatedScopeLink {
    pub fn new(device: Arc<Mutex<SimulatedDevice>>) -> Self {
        Self {
            device,
            resource: "SIM::SCOPE::INSTR".to_string(),
            queries: 0,
            fail_after: None,
        }
    }

    /// Report a bus fault on every query after the first `queries`.
    pub fn fail_after(mut self, queries: u64) -> Self {
        self.fail_after = Some(queries);
        self
    }

    pub fn query_count(&self) -> u64 {
        self.queries
    }
}

fn parse_chan(token: &str) -> Option<u8> {
    token.trim().strip_prefix("CHAN")?.parse().ok()
}

impl InstrumentLink for SimulatedScopeLink {
    fn query(&mut self, command: &str) -> AppResult<String> {
        self.queries += 1;
        if matches!(self.fail_after, Some(limit) if self.queries > limit) {
            return Err(DaqError::Instrument(format!(
                "{}: simulated bus fault on '{}'",
                self.resource, command
            )));
        }

        let mut device = self.device.lock();
        let command = command.trim();
        if command == "*IDN?" {
            return Ok(SCOPE_IDN.to_string());
        }
        let undefined = || DaqError::Instrument(format!("undefined header '{}'", command));
        let (header, args) = command.split_once(' ').ok_or_else(undefined)?;
        match header {
            "MEASURE:VRMS?" => {
                let channel = parse_chan(args).ok_or_else(undefined)?;
                Ok(format!("{:E}", device.rms(channel)))
            }
            "MEASURE:VPP?" => {
                let channel = parse_chan(args).ok_or_else(undefined)?;
                Ok(format!("{:E}", device.rms(channel) * 2.0 * std::f64::consts::SQRT_2))
            }
            "MEASURE:FREQUENCY?" => {
                let channel = parse_chan(args).ok_or_else(undefined)?;
                Ok(device
                    .frequency(channel)
                    .map_or_else(|| OVERFLOW.to_string(), |f| format!("{:E}", f)))
            }
            "MEASURE:PHASE?" => {
                let (a, b) = args.split_once(',').ok_or_else(undefined)?;
                let a = parse_chan(a).ok_or_else(undefined)?;
                let b = parse_chan(b).ok_or_else(undefined)?;
                Ok(device
                    .phase(a, b)
                    .map_or_else(|| OVERFLOW.to_string(), |p| format!("{:E}", p)))
            }
            _ => Err(undefined()),
        }
    }

    fn write(&mut self, command: &str) -> AppResult<()> {
        Err(DaqError::Instrument(format!(
            "simulated oscilloscope does not accept '{}'",
            command
        )))
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

/// Generator side of the simulated bench.
pub struct SimulatedGeneratorLink {
    device: Arc<Mutex<SimulatedDevice>>,
    resource: String,
}

impl SimulatedGeneratorLink {
    pub fn new(device: Arc<Mutex<SimulatedDevice>>) -> Self {
        Self {
            device,
            resource: "SIM::GENERATOR::INSTR".to_string(),
        }
    }
}

/// Split `C1:BSWV AMP,0.25` into `(1, "BSWV", "AMP,0.25")`.
fn split_generator_command(command: &str) -> Option<(u8, &str, &str)> {
    let (channel, rest) = command.trim().split_once(':')?;
    let channel = channel.strip_prefix('C')?.parse().ok()?;
    let (header, args) = rest.split_once(' ').unwrap_or((rest, ""));
    Some((channel, header, args))
}

fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()
}

impl InstrumentLink for SimulatedGeneratorLink {
    fn query(&mut self, command: &str) -> AppResult<String> {
        if command.trim() == "*IDN?" {
            return Ok(GENERATOR_IDN.to_string());
        }
        let undefined = || DaqError::Instrument(format!("undefined header '{}'", command));
        let (channel, header, _) = split_generator_command(command).ok_or_else(undefined)?;
        if header != "BSWV?" {
            return Err(undefined());
        }
        let mut device = self.device.lock();
        let state = device.generator_mut(channel)?;
        Ok(format!(
            "C{}:BSWV WVTP,SINE,FRQ,{}HZ,AMP,{}V,OFST,{}V",
            channel, state.frequency, state.amplitude, state.offset
        ))
    }

    fn write(&mut self, command: &str) -> AppResult<()> {
        let undefined = || DaqError::Instrument(format!("undefined header '{}'", command));
        let (channel, header, args) = split_generator_command(command).ok_or_else(undefined)?;
        let mut device = self.device.lock();
        device.generator_log.push(command.trim().to_string());
        let state = device.generator_mut(channel)?;
        let (key, value) = args.split_once(',').unwrap_or((args, ""));
        match (header, key) {
            ("BSWV", "FRQ") => state.frequency = parse_number(value).ok_or_else(undefined)?,
            ("BSWV", "AMP") => state.amplitude = parse_number(value).ok_or_else(undefined)?,
            ("BSWV", "OFST") => state.offset = parse_number(value).ok_or_else(undefined)?,
            ("OUTP", "ON") => state.output_enabled = true,
            ("OUTP", "OFF") => state.output_enabled = false,
            ("OUTP", "LOAD") if value.trim() == "HZ" => state.load_ohms = f64::INFINITY,
            ("OUTP", "LOAD") => state.load_ohms = parse_number(value).ok_or_else(undefined)?,
            _ => return Err(undefined()),
        }
        Ok(())
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<AppResult<String>>,
    commands: Vec<String>,
    queries: usize,
}

/// Link that replays canned responses in order.
pub struct ScriptedLink {
    resource: String,
    script: Arc<Mutex<Script>>,
}

/// Control side of a [`ScriptedLink`], usable after the link has been moved into a facade.
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedLink {
    pub fn new(resource: &str) -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script::default()));
        (
            Self {
                resource: resource.to_string(),
                script: script.clone(),
            },
            ScriptHandle { script },
        )
    }
}

impl ScriptHandle {
    pub fn push_response(&self, response: impl Into<String>) {
        self.script.lock().responses.push_back(Ok(response.into()));
    }

    pub fn push_repeated(&self, response: &str, count: usize) {
        for _ in 0..count {
            self.push_response(response);
        }
    }

    pub fn push_error(&self, message: &str) {
        self.script
            .lock()
            .responses
            .push_back(Err(DaqError::Instrument(message.to_string())));
    }

    /// Every command sent so far, queries and writes alike.
    pub fn commands(&self) -> Vec<String> {
        self.script.lock().commands.clone()
    }

    pub fn query_count(&self) -> usize {
        self.script.lock().queries
    }
}

impl InstrumentLink for ScriptedLink {
    fn query(&mut self, command: &str) -> AppResult<String> {
        let mut script = self.script.lock();
        script.commands.push(command.to_string());
        script.queries += 1;
        script.responses.pop_front().unwrap_or_else(|| {
            Err(DaqError::Instrument(format!(
                "no scripted response for '{}'",
                command
            )))
        })
    }

    fn write(&mut self, command: &str) -> AppResult<()> {
        self.script.lock().commands.push(command.to_string());
        Ok(())
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driven_bench(frequency: f64) -> (SimulatedScopeLink, Arc<Mutex<SimulatedDevice>>) {
        let (scope, mut generator, device) = bench(SimulatedDevice::new());
        generator.write(&format!("C1:BSWV FRQ,{}", frequency)).unwrap();
        generator.write("C1:BSWV AMP,0.25").unwrap();
        generator.write("C1:OUTP ON").unwrap();
        (scope, device)
    }

    #[test]
    fn test_generator_commands_update_state() {
        let (_, mut generator, device) = bench(SimulatedDevice::new());
        generator.write("C2:BSWV FRQ,40000").unwrap();
        generator.write("C2:BSWV AMP,0.5").unwrap();
        generator.write("C2:OUTP ON").unwrap();
        let device = device.lock();
        let state = device.generator_channel(2).unwrap();
        assert_eq!(state.frequency, 40000.0);
        assert_eq!(state.amplitude, 0.5);
        assert!(state.output_enabled);
        assert_eq!(device.generator_log().len(), 3);
    }

    #[test]
    fn test_generator_rejects_unknown_channel() {
        let (_, mut generator, _) = bench(SimulatedDevice::new());
        assert!(generator.write("C3:OUTP ON").is_err());
        assert!(generator.write("garbage").is_err());
    }

    #[test]
    fn test_generator_reports_waveform() {
        let (_, mut generator, _) = bench(SimulatedDevice::new());
        generator.write("C1:BSWV FRQ,38000").unwrap();
        let reply = generator.query("C1:BSWV?").unwrap();
        assert!(reply.contains("FRQ,38000HZ"));
    }

    #[test]
    fn test_scope_silent_without_drive() {
        let (mut scope, _, _) = bench(SimulatedDevice::new());
        let rms: f64 = scope.query("MEASURE:VRMS? CHAN1").unwrap().parse().unwrap();
        assert_eq!(rms, 0.0);
        assert_eq!(scope.query("MEASURE:PHASE? CHAN1,CHAN2").unwrap(), OVERFLOW);
    }

    #[test]
    fn test_scope_at_resonance_is_in_phase() {
        let (mut scope, device) = driven_bench(38_000.0);
        let phase: f64 = scope
            .query("MEASURE:PHASE? CHAN1,CHAN2")
            .unwrap()
            .parse()
            .unwrap();
        assert!(phase.abs() < 1e-9);
        assert!((device.lock().true_power() - 2.25).abs() < 1e-6);
    }

    #[test]
    fn test_scope_phase_sign_above_resonance() {
        let (mut scope, _) = driven_bench(39_000.0);
        let forward: f64 = scope.query("MEASURE:PHASE? CHAN1,CHAN2").unwrap().parse().unwrap();
        let reverse: f64 = scope.query("MEASURE:PHASE? CHAN2,CHAN1").unwrap().parse().unwrap();
        assert!(forward > 0.0);
        assert_eq!(forward, -reverse);
    }

    #[test]
    fn test_injected_invalid_phase() {
        let (mut scope, device) = driven_bench(38_000.0);
        device.lock().inject_invalid_phase(2);
        assert_eq!(scope.query("MEASURE:PHASE? CHAN1,CHAN2").unwrap(), OVERFLOW);
        assert_eq!(scope.query("MEASURE:PHASE? CHAN1,CHAN2").unwrap(), OVERFLOW);
        assert_ne!(scope.query("MEASURE:PHASE? CHAN1,CHAN2").unwrap(), OVERFLOW);
        assert_eq!(device.lock().phase_queries(), 3);
    }

    #[test]
    fn test_scope_fault_injection() {
        let (scope, _) = driven_bench(38_000.0);
        let mut scope = scope.fail_after(1);
        assert!(scope.query("*IDN?").is_ok());
        assert!(matches!(scope.query("*IDN?"), Err(DaqError::Instrument(_))));
    }

    #[test]
    fn test_noise_is_reproducible() {
        let read = |seed| {
            let (mut scope, mut generator, _) =
                bench(SimulatedDevice::new().with_noise(0.05, seed));
            generator.write("C1:BSWV AMP,0.25").unwrap();
            generator.write("C1:OUTP ON").unwrap();
            scope.query("MEASURE:VRMS? CHAN1").unwrap()
        };
        assert_eq!(read(7), read(7));
    }

    #[test]
    fn test_scripted_link_replays_in_order() {
        let (mut link, script) = ScriptedLink::new("SCRIPT::INSTR");
        script.push_response("1");
        script.push_error("bus down");
        assert_eq!(link.query("A?").unwrap(), "1");
        assert!(link.query("B?").is_err());
        assert!(link.query("C?").is_err());
        link.write("D").unwrap();
        assert_eq!(script.commands(), vec!["A?", "B?", "C?", "D"]);
        assert_eq!(script.query_count(), 3);
    }
}
