//! Per-frame cost of selection, lock update, smoothing and shaping

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use locktrack::{
    Bbox, Detection, LockConfig, LockStateMachine, MotionHistory, MotionShaper, Point,
    Preference, ShaperParams, SmootherConfig, StatisticalSmoother, TargetSelector,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

const FOV: f32 = 320.0;

fn create_test_frames(n_detections: usize, n_frames: usize) -> Vec<Vec<Detection>> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n_frames)
        .map(|frame| {
            (0..n_detections)
                .map(|i| {
                    let x = (i * 40 + frame) as f32 % (FOV - 40.0) + rng.gen_range(-1.5..1.5);
                    let y = (i * 25) as f32 % (FOV - 80.0) + rng.gen_range(-1.5..1.5);
                    Detection::new(
                        Bbox::new(x, y, x + 30.0, y + 70.0),
                        rng.gen_range(0.3..1.0),
                        "target",
                    )
                })
                .collect()
        })
        .collect()
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    for n in [1usize, 8, 32] {
        let frames = create_test_frames(n, 60);
        group.bench_with_input(BenchmarkId::from_parameter(n), &frames, |b, frames| {
            b.iter_batched(
                || {
                    (
                        TargetSelector::new(FOV, 50.0),
                        MotionHistory::default(),
                        LockStateMachine::new(LockConfig::default()),
                        StatisticalSmoother::new(SmootherConfig::default()),
                        MotionShaper::new(),
                    )
                },
                |(selector, mut history, mut lock, mut smoother, mut shaper)| {
                    let params = ShaperParams {
                        fov: FOV,
                        ..ShaperParams::default()
                    };
                    for (i, detections) in frames.iter().enumerate() {
                        let now = i as f64 / 60.0;
                        let candidates = selector.candidates(black_box(detections));
                        for c in &candidates {
                            history.update(c.id, c.aim_point, now);
                        }
                        history.cleanup(now, 2.0);
                        if let Some(out) = lock.update(&candidates, &selector, &history, now) {
                            black_box(shaper.shape(out.aim_point, &params, Some(&mut smoother), false));
                        }
                    }
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let frames = create_test_frames(64, 1);
    let selector = TargetSelector::new(FOV, 50.0);
    let candidates = selector.candidates(&frames[0]);

    c.bench_function("select_weighted_64", |b| {
        b.iter(|| selector.select(black_box(&candidates), Preference::Weighted))
    });
}

fn bench_smoother(c: &mut Criterion) {
    let mut group = c.benchmark_group("smoother_update");
    for coupled in [false, true] {
        let mut smoother = StatisticalSmoother::new(SmootherConfig {
            coupled,
            ..SmootherConfig::default()
        });
        let name = if coupled { "coupled" } else { "independent" };
        group.bench_function(name, |b| {
            b.iter(|| smoother.update(black_box(3.0), black_box(-2.0)))
        });
    }
    group.finish();
}

fn bench_shaper(c: &mut Criterion) {
    let params = ShaperParams::default();
    let mut shaper = MotionShaper::new();
    c.bench_function("shape_no_smoother", |b| {
        b.iter(|| shaper.shape(black_box(Point::new(200.0, 140.0)), &params, None, false))
    });
}

criterion_group!(benches, bench_frame, bench_selection, bench_smoother, bench_shaper);
criterion_main!(benches);
