//! Metric and pipeline benchmarks
//!
//! Loop area is computed once per hysteresis profile and the retention fit
//! once per device, so both should stay far below instrument latency.
//! The full-run benchmark drives the simulator on a virtual clock and
//! measures pure control-loop overhead.
//!
//! Run with: cargo bench --bench metrics

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use memristor_pipeline::driver::{ManualClock, MeasurementDriver};
use memristor_pipeline::metrics::{hysteresis_loop_area, median, retention_alpha};
use memristor_pipeline::sim::{DeviceParams, SimulatedMemristor};
use memristor_pipeline::{TestRunner, Thresholds};

const SIZES: [usize; 3] = [100, 1_000, 100_000];

/// Synthetic pinched loop with `n` points
#[allow(clippy::cast_precision_loss)]
fn pinched_loop(n: usize) -> (Vec<f64>, Vec<f64>) {
    (0..n)
        .map(|k| {
            let phase = std::f64::consts::TAU * k as f64 / n as f64;
            let v = phase.sin();
            (v, 1e-5 * v * (1.0 + 0.5 * phase.cos()))
        })
        .unzip()
}

fn bench_loop_area(c: &mut Criterion) {
    let mut group = c.benchmark_group("hysteresis_loop_area");

    for size in SIZES {
        let (v, i) = pinched_loop(size);
        group.bench_with_input(BenchmarkId::new("shoelace", size), &(v, i), |b, (v, i)| {
            b.iter(|| hysteresis_loop_area(black_box(v), black_box(i)));
        });
    }

    group.finish();
}

#[allow(clippy::cast_precision_loss)]
fn bench_retention_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("retention_alpha");

    for size in SIZES {
        let times: Vec<f64> = (1..=size).map(|k| k as f64).collect();
        let currents: Vec<f64> = times.iter().map(|t| 1e-6 * t.powf(-0.3)).collect();
        group.bench_with_input(
            BenchmarkId::new("ols_log_log", size),
            &(times, currents),
            |b, (t, i)| {
                b.iter(|| retention_alpha(black_box(t), black_box(i)));
            },
        );
    }

    group.finish();
}

#[allow(clippy::cast_precision_loss)]
fn bench_median(c: &mut Criterion) {
    let ratios: Vec<f64> = (0..1_000).map(|k| ((k * 7919) % 1_000) as f64).collect();
    c.bench_function("median_1k", |b| b.iter(|| median(black_box(&ratios))));
}

fn bench_simulated_run(c: &mut Criterion) {
    let thresholds = Arc::new(Thresholds::default());

    c.bench_function("run_device_simulated", |b| {
        b.iter(|| {
            let clock = ManualClock::new();
            let device = SimulatedMemristor::with_clock(DeviceParams::default(), clock.clone());
            let driver = MeasurementDriver::with_clock(device, clock);
            let mut runner = TestRunner::new(driver, Arc::clone(&thresholds));
            runner.run_device(black_box("bench"))
        });
    });
}

criterion_group!(
    benches,
    bench_loop_area,
    bench_retention_fit,
    bench_median,
    bench_simulated_run
);
criterion_main!(benches);
