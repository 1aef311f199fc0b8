use criterion::{Criterion, black_box, criterion_group, criterion_main};

use mzimage::signal::normalization::total_ion_current;
use mzimage::signal::{BaselineCorrection, RangePoolingStrategy, SmoothingStrategy};

/// A profile spectrum shaped like real data: a handful of peaks riding on a
/// slow baseline drift.
fn synthetic_profile(len: usize) -> (Vec<f64>, Vec<f64>) {
    let mzs: Vec<f64> = (0..len).map(|i| 100.0 + i as f64 * 0.01).collect();
    let intensities: Vec<f64> = (0..len)
        .map(|i| {
            let x = i as f64;
            let drift = 50.0 + x * 0.002;
            let peaks = (x * 0.07).sin().powi(8) * 900.0;
            drift + peaks
        })
        .collect();
    (mzs, intensities)
}

fn smooth(strategy: SmoothingStrategy, intensities: &[f64], half_window: usize) {
    let mut buffer = intensities.to_vec();
    strategy.apply(&mut buffer, half_window);
    assert_eq!(buffer.len(), intensities.len());
}

fn correct_baseline(strategy: BaselineCorrection, intensities: &[f64], half_window: usize) {
    let mut buffer = intensities.to_vec();
    strategy.apply(&mut buffer, half_window);
    assert_eq!(buffer.len(), intensities.len());
}

fn pool_windows(strategy: RangePoolingStrategy, intensities: &[f64], width: usize) -> f64 {
    intensities
        .chunks(width)
        .map(|window| strategy.pool(window))
        .sum()
}

fn signal_pipeline(c: &mut Criterion) {
    let (mzs, intensities) = synthetic_profile(50_000);

    c.bench_function("savitzky_golay_smoothing", |b| {
        b.iter(|| smooth(SmoothingStrategy::SavitzkyGolay, black_box(&intensities), 2))
    });
    c.bench_function("gaussian_smoothing", |b| {
        b.iter(|| smooth(SmoothingStrategy::Gaussian, black_box(&intensities), 4))
    });
    c.bench_function("tophat_baseline", |b| {
        b.iter(|| correct_baseline(BaselineCorrection::TopHat, black_box(&intensities), 50))
    });
    c.bench_function("median_baseline", |b| {
        b.iter(|| correct_baseline(BaselineCorrection::Median, black_box(&intensities), 50))
    });
    c.bench_function("maximum_pooling", |b| {
        b.iter(|| pool_windows(RangePoolingStrategy::Maximum, black_box(&intensities), 64))
    });
    c.bench_function("median_pooling", |b| {
        b.iter(|| pool_windows(RangePoolingStrategy::Median, black_box(&intensities), 64))
    });
    c.bench_function("total_ion_current", |b| {
        b.iter(|| total_ion_current(black_box(&mzs), black_box(&intensities), false))
    });
}

criterion_group!(benches, signal_pipeline);
criterion_main!(benches);
