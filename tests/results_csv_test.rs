//! Experiment results written to CSV through the simulated bench.
#![cfg(feature = "storage_csv")]

use pulser_daq::bench::Bench;
use pulser_daq::config::Settings;
use pulser_daq::data::{read_records, session_file_name};
use pulser_daq::experiment::{ExperimentRecord, PowerFeedback};
use pulser_daq::resonance::{RepetitionRow, ResonanceSweep, SweepPoint};
use tempfile::tempdir;

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.pid.kp = 0.005;
    settings.pid.ki = 0.0;
    settings.pid.kd = 0.0;
    settings.pid.setpoint = 1.5;
    settings.feedback.max_cycles = Some(25);
    settings.sweep.start_hz = 37_500.0;
    settings.sweep.end_hz = 38_500.0;
    settings.sweep.points = 21;
    settings.sweep.settle_ms = 0;
    settings
}

#[test]
fn test_feedback_records_round_trip() {
    let dir = tempdir().unwrap();
    let settings = settings();
    let mut bench = Bench::open(&settings, true).unwrap();
    let mut pid = settings.pid.controller();

    let result = PowerFeedback::from_settings(&settings)
        .run(&mut bench.scope, &mut bench.generator, &mut pid)
        .unwrap();
    bench.close().unwrap();

    let path = result
        .write_csv(dir.path().join("runs").join(session_file_name("feedback")))
        .unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with("# {"));
    assert!(contents.contains("\"experiment\": \"power_feedback\""));
    assert!(contents.contains("elapsed_secs,power,output,amplitude"));
    assert!(contents.contains("\"oscilloscope\": \"SIM::SCOPE::INSTR\""));
    assert!(contents.contains("\"generator\": \"SIM::GENERATOR::INSTR\""));

    let records: Vec<ExperimentRecord> = read_records(&path).unwrap();
    assert_eq!(records, result.records);
    assert_eq!(records.len(), 25);
}

#[test]
fn test_sweep_points_and_repetitions_written() {
    let dir = tempdir().unwrap();
    let settings = settings();
    let mut bench = Bench::open(&settings, true).unwrap();
    let sweep = ResonanceSweep::from_settings(&settings);

    let single = sweep.run(&mut bench.scope, &mut bench.generator).unwrap();
    let repeated = sweep
        .run_repeated(&mut bench.scope, &mut bench.generator, 2)
        .unwrap();
    bench.close().unwrap();

    let points_path = single.write_csv(dir.path().join("sweep.csv")).unwrap();
    let points: Vec<SweepPoint> = read_records(points_path).unwrap();
    assert_eq!(points.len(), 21);
    assert_eq!(points.first().unwrap().frequency_hz, 37_500.0);
    assert_eq!(points.last().unwrap().frequency_hz, 38_500.0);

    let stats_path = repeated.write_csv(dir.path().join("resonance.csv")).unwrap();
    let rows: Vec<RepetitionRow> = read_records(stats_path).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.max_power_hz == 38_000.0));
    // Noise-free sweeps agree exactly.
    assert_eq!(repeated.max_power.std_error, 0.0);
}
