use std::error::Error;
use std::sync::Arc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use tracer_core::mocks::NoopLineSensors;
use tracer_core::{
    CalibrationTable, EstimatorCfg, NavigatorCfg, PositionEstimator, build_navigator,
};
use tracer_traits::{
    ManualClock, MarkerReading, MarkerSensors, Motors, NoTelemetry, SensorSnapshot,
};

struct Clear;
impl MarkerSensors for Clear {
    fn read(&mut self) -> Result<MarkerReading, Box<dyn Error + Send + Sync>> {
        Ok(MarkerReading {
            left: 900,
            right: 900,
        })
    }
}

struct Sink;
impl Motors for Sink {
    fn set_power(&mut self, _l: i32, _r: i32) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

// A dark stripe sweeping back and forth across the array.
fn synth_sweep(n: usize) -> Vec<SensorSnapshot> {
    let xs = [-30.0f32, -18.0, -6.0, 6.0, 18.0, 30.0];
    (0..n)
        .map(|i| {
            let line = 35.0 * (i as f32 / 150.0).sin();
            let mut s = [0u16; 6];
            for (k, x) in xs.iter().enumerate() {
                let d = (x - line).abs();
                s[k] = if d < 10.0 { 100 + (d * 40.0) as u16 } else { 900 };
            }
            s
        })
        .collect()
}

fn configure(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p tracer_core --bench tick
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }
}

pub fn bench_estimator(c: &mut Criterion) {
    let mut g = c.benchmark_group("estimator");
    configure(&mut g);
    let frames = synth_sweep(10_000);
    g.bench_function("estimate_sweep", |b| {
        b.iter_batched(
            || PositionEstimator::new(EstimatorCfg::default(), CalibrationTable::default()),
            |mut est| {
                for f in &frames {
                    black_box(est.estimate(black_box(f)));
                }
            },
            BatchSize::SmallInput,
        )
    });
    g.finish();
}

pub fn bench_tick(c: &mut Criterion) {
    let mut g = c.benchmark_group("navigator");
    configure(&mut g);
    let frames = synth_sweep(10_000);
    g.bench_function("step_with_snapshot", |b| {
        b.iter_batched(
            || {
                let mut nav = build_navigator(
                    NoopLineSensors,
                    Clear,
                    Sink,
                    NoTelemetry,
                    NavigatorCfg::default(),
                    None,
                    None,
                    Some(Arc::new(ManualClock::new())),
                )
                .expect("bench navigator");
                nav.begin();
                nav
            },
            |mut nav| {
                for f in &frames {
                    let _ = black_box(nav.step_with_snapshot(black_box(f)));
                }
            },
            BatchSize::LargeInput,
        )
    });
    g.finish();
}

criterion_group!(tick, bench_estimator, bench_tick);
criterion_main!(tick);
