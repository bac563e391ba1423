//! Facades and experiments against the simulated transducer bench.

use parking_lot::Mutex;
use pulser_daq::error_recovery::RetryPolicy;
use pulser_daq::experiment::{BenchChannels, PowerFeedback};
use pulser_daq::generator::Generator;
use pulser_daq::instrument::mock::{
    bench, SimulatedDevice, SimulatedGeneratorLink, SimulatedScopeLink,
};
use pulser_daq::oscilloscope::Oscilloscope;
use pulser_daq::pid::PidController;
use pulser_daq::resonance::ResonanceSweep;
use pulser_daq::sampler::Sampler;
use pulser_daq::DaqError;
use std::sync::Arc;
use std::time::Duration;

type Rig = (
    Oscilloscope<SimulatedScopeLink>,
    Generator<SimulatedGeneratorLink>,
    Arc<Mutex<SimulatedDevice>>,
);

fn rig(device: SimulatedDevice) -> Rig {
    let (scope_link, generator_link, device) = bench(device);
    rig_from_links(scope_link, generator_link, device)
}

fn rig_from_links(
    scope_link: SimulatedScopeLink,
    generator_link: SimulatedGeneratorLink,
    device: Arc<Mutex<SimulatedDevice>>,
) -> Rig {
    let scope = Oscilloscope::connect(scope_link, 2, 0.2, RetryPolicy::new(20, Duration::ZERO))
        .unwrap();
    let generator = Generator::connect(generator_link, 2, 0.8).unwrap();
    (scope, generator, device)
}

/// Drive C1 at `amplitude` on resonance.
fn drive(generator: &mut Generator<SimulatedGeneratorLink>, amplitude: f64) {
    generator.set_frequency(38_000.0, 1).unwrap();
    generator.set_amplitude(amplitude, 1).unwrap();
    generator.enable_output(1).unwrap();
}

fn feedback(max_cycles: Option<u64>) -> PowerFeedback {
    PowerFeedback {
        channels: BenchChannels::default(),
        frequency_hz: 38_000.0,
        initial_amplitude: 0.25,
        fallback_amplitude: 0.6,
        duration: Duration::from_secs(10),
        max_cycles,
    }
}

fn count_writes(device: &Arc<Mutex<SimulatedDevice>>, command: &str) -> usize {
    device
        .lock()
        .generator_log()
        .iter()
        .filter(|c| c.as_str() == command)
        .count()
}

#[test]
fn test_power_on_resonance() {
    let (mut scope, mut generator, device) = rig(SimulatedDevice::new());
    drive(&mut generator, 0.25);

    let reading = scope.measure_power(1, 2).unwrap();
    assert!((reading.power - 2.25).abs() < 1e-6, "power {}", reading.power);
    assert!(reading.phase.abs() < 1e-9);
    assert!((reading.power - device.lock().true_power()).abs() < 1e-6);
}

#[test]
fn test_phase_sign_follows_channel_order() {
    let (mut scope, mut generator, _) = rig(SimulatedDevice::new());
    drive(&mut generator, 0.25);
    generator.set_frequency(38_500.0, 1).unwrap();

    let forward = scope.measure_phase(1, 2).unwrap();
    let reverse = scope.measure_phase(2, 1).unwrap();
    assert!(forward > 0.0);
    assert!((forward + reverse).abs() < 1e-9);
}

#[test]
fn test_phase_retried_below_budget() {
    let (mut scope, mut generator, device) = rig(SimulatedDevice::new());
    drive(&mut generator, 0.25);
    device.lock().inject_invalid_phase(19);

    assert!(scope.measure_phase(1, 2).is_ok());
    assert_eq!(device.lock().phase_queries(), 20);
}

#[test]
fn test_phase_fails_at_budget() {
    let (mut scope, mut generator, device) = rig(SimulatedDevice::new());
    drive(&mut generator, 0.25);
    device.lock().inject_invalid_phase(20);

    match scope.measure_phase(1, 2) {
        Err(DaqError::MeasurementTimeout { attempts }) => assert_eq!(attempts, 20),
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert_eq!(device.lock().phase_queries(), 20);

    // The budget starts over on the next call.
    assert!(scope.measure_phase(1, 2).is_ok());
    assert_eq!(device.lock().phase_queries(), 21);
}

#[test]
fn test_invalid_channel_never_reaches_the_bus() {
    let (mut scope, mut generator, device) = rig(SimulatedDevice::new());
    drive(&mut generator, 0.25);

    assert!(matches!(
        scope.measure_rms(3),
        Err(DaqError::InvalidChannel { channel: 3, .. })
    ));
    assert!(matches!(
        scope.measure_phase(0, 1),
        Err(DaqError::InvalidChannel { channel: 0, .. })
    ));
    assert!(matches!(
        generator.set_amplitude(0.1, 3),
        Err(DaqError::InvalidChannel { channel: 3, .. })
    ));
    assert_eq!(device.lock().phase_queries(), 0);
    // *IDN? only
    assert_eq!(scope.into_link().query_count(), 1);
}

#[test]
fn test_feedback_converges_to_setpoint() {
    let (mut scope, mut generator, device) = rig(SimulatedDevice::new());
    let mut pid = PidController::new(0.005, 0.0, 0.0, 1.5);

    let result = feedback(Some(200))
        .run(&mut scope, &mut generator, &mut pid)
        .unwrap();

    assert_eq!(result.records.len(), 200);
    let error = result.tail_error(10).unwrap();
    assert!(error < 0.01, "tail error {}", error);
    assert!(!device.lock().generator_channel(1).unwrap().output_enabled);
}

#[test]
fn test_feedback_bus_fault_disables_output_once() {
    let (scope_link, generator_link, device) = bench(SimulatedDevice::new());
    // *IDN? plus five full cycles of VRMS, VRMS, PHASE
    let scope_link = scope_link.fail_after(1 + 3 * 5);
    let (mut scope, mut generator, device) = rig_from_links(scope_link, generator_link, device);
    let mut pid = PidController::new(0.005, 0.0, 0.0, 1.5);

    let result = feedback(None).run(&mut scope, &mut generator, &mut pid);

    assert!(matches!(result, Err(DaqError::Instrument(_))));
    assert_eq!(count_writes(&device, "C1:OUTP ON"), 1);
    assert_eq!(count_writes(&device, "C1:OUTP OFF"), 1);
    assert!(!generator.is_enabled(1));
    assert!(!device.lock().generator_channel(1).unwrap().output_enabled);

    generator.close().unwrap();
    assert_eq!(count_writes(&device, "C1:OUTP OFF"), 1);
}

#[test]
fn test_feedback_falls_back_when_amplitude_out_of_range() {
    let (mut scope, mut generator, device) = rig(SimulatedDevice::new());
    // A setpoint far above what 0.8 V can deliver drives the request past the ceiling.
    let mut pid = PidController::new(1.0, 0.0, 0.0, 100.0);

    let result = feedback(Some(1))
        .run(&mut scope, &mut generator, &mut pid)
        .unwrap();

    assert_eq!(result.records[0].amplitude, 0.6);
    assert_eq!(generator.amplitude(1), Some(0.6));
    assert_eq!(count_writes(&device, "C1:BSWV AMP,0.6"), 1);
}

#[test]
fn test_sweep_locates_resonance() {
    let (mut scope, mut generator, device) = rig(SimulatedDevice::new());
    let sweep = ResonanceSweep {
        channels: BenchChannels::default(),
        start_hz: 37_000.0,
        end_hz: 39_000.0,
        points: 201,
        settle: Duration::ZERO,
        amplitude: 0.2,
    };

    let result = sweep.run(&mut scope, &mut generator).unwrap();

    assert_eq!(result.points.len(), 201);
    assert!((result.max_power_hz - 38_000.0).abs() <= sweep.step_hz());
    assert!((result.zero_phase_hz - 38_000.0).abs() <= sweep.step_hz());
    assert!(!device.lock().generator_channel(1).unwrap().output_enabled);
}

#[test]
fn test_repeated_sweep_with_noise() {
    let device = SimulatedDevice::new()
        .with_resonance(37_800.0, 50.0)
        .with_noise(0.01, 7);
    let (mut scope, mut generator, _) = rig(device);
    let sweep = ResonanceSweep {
        channels: BenchChannels::default(),
        start_hz: 37_000.0,
        end_hz: 39_000.0,
        points: 101,
        settle: Duration::ZERO,
        amplitude: 0.2,
    };

    let stats = sweep.run_repeated(&mut scope, &mut generator, 3).unwrap();

    assert_eq!(stats.sweeps.len(), 3);
    assert!((stats.max_power.mean - 37_800.0).abs() < 100.0);
    assert!((stats.zero_phase.mean - 37_800.0).abs() <= sweep.step_hz());
    assert!(stats.max_power.std_error.is_finite());
}

#[test]
fn test_sampler_delivers_samples_in_order() {
    let (scope, mut generator, _) = rig(SimulatedDevice::new());
    drive(&mut generator, 0.25);

    let mut sampler = Sampler::spawn(scope, 1, 2, Duration::from_millis(1), 4).unwrap();
    let mut previous = None;
    for _ in 0..10 {
        let sample = sampler.recv().unwrap().unwrap();
        assert!((sample.power - 2.25).abs() < 1e-6);
        if let Some(previous) = previous {
            assert!(sample.timestamp >= previous);
        }
        previous = Some(sample.timestamp);
    }

    let mut scope = sampler.stop().unwrap();
    assert!(scope.measure_power_watts(1, 2).is_ok());
}

#[test]
fn test_sampler_ends_on_measurement_error() {
    let (scope_link, generator_link, device) = bench(SimulatedDevice::new());
    let scope_link = scope_link.fail_after(1 + 3 * 2);
    let (scope, mut generator, _) = rig_from_links(scope_link, generator_link, device);
    drive(&mut generator, 0.25);

    let mut sampler = Sampler::spawn(scope, 1, 2, Duration::ZERO, 8).unwrap();
    assert!(sampler.recv().unwrap().is_ok());
    assert!(sampler.recv().unwrap().is_ok());
    assert!(sampler.recv().unwrap().is_err());
    assert!(sampler.recv().is_none());
    assert!(sampler.stop().is_ok());
}
