use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use pulser_daq::error_recovery::RetryPolicy;
use pulser_daq::instrument::mock::{bench, SimulatedDevice};
use pulser_daq::instrument::InstrumentLink;
use pulser_daq::oscilloscope::Oscilloscope;
use pulser_daq::pid::PidController;
use std::time::Duration;

fn benchmark_pid_update(c: &mut Criterion) {
    let mut pid = PidController::new(1.0, 0.2, 0.2, 2.0).with_max_output(0.1);

    c.bench_function("pid_update", |b| {
        b.iter(|| {
            for i in 0..100 {
                let measured = black_box(2.0 + (i as f64 * 0.01).sin());
                black_box(pid.update(measured, black_box(0.1)));
            }
        })
    });
}

fn benchmark_simulated_power(c: &mut Criterion) {
    c.bench_function("simulated_measure_power", |b| {
        b.iter_batched(
            || {
                let (scope_link, mut generator_link, _) = bench(SimulatedDevice::new());
                generator_link.write("C1:BSWV FRQ,38000").unwrap();
                generator_link.write("C1:BSWV AMP,0.25").unwrap();
                generator_link.write("C1:OUTP ON").unwrap();
                Oscilloscope::connect(scope_link, 2, 0.2, RetryPolicy::new(20, Duration::ZERO))
                    .unwrap()
            },
            |mut scope| {
                for _ in 0..10 {
                    black_box(scope.measure_power(1, 2).unwrap());
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, benchmark_pid_update, benchmark_simulated_power);
criterion_main!(benches);
