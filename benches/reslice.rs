//! Benchmarks for the reslice executors

use std::f64::consts::FRAC_PI_6;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nalgebra::Matrix4;
use volreslice::{Extent, InterpolationMode, Reslice, SlabMode, Volume};

fn ramp_volume(size: usize) -> Volume {
    let n = size as i32 - 1;
    Volume::from_fn(Extent::new(0, n, 0, n, 0, n), 1, |x, y, z, _| ((z * 100 + y * 10 + x) % 256) as f32 / 255.0)
        .unwrap()
}

fn rotation_axes(size: usize) -> Matrix4<f64> {
    let (s, c) = FRAC_PI_6.sin_cos();
    let half = 0.5 * (size - 1) as f64;
    let mut axes = Matrix4::identity();
    axes[(0, 0)] = c;
    axes[(1, 0)] = s;
    axes[(0, 1)] = -s;
    axes[(1, 1)] = c;
    axes[(0, 3)] = half;
    axes[(1, 3)] = half;
    axes[(2, 3)] = half;
    axes
}

fn benchmark_general(c: &mut Criterion) {
    let mut group = c.benchmark_group("reslice_general");

    for size in [32, 64, 128].iter() {
        let input = ramp_volume(*size);
        group.throughput(Throughput::Elements((*size as u64).pow(3)));

        for mode in [InterpolationMode::Nearest, InterpolationMode::Linear, InterpolationMode::Cubic] {
            let reslice = Reslice::new()
                .with_reslice_axes(rotation_axes(*size))
                .with_interpolation_mode(mode);
            group.bench_with_input(BenchmarkId::new(mode.name(), size), &size, |b, _| {
                b.iter(|| black_box(reslice.execute(&input).unwrap()))
            });
        }
    }

    group.finish();
}

fn benchmark_permute(c: &mut Criterion) {
    let mut group = c.benchmark_group("reslice_permute");

    for size in [32, 64, 128].iter() {
        let input = ramp_volume(*size);
        group.throughput(Throughput::Elements((*size as u64).pow(3)));

        // half-voxel shift keeps the linear kernel busy on the permuted path
        let shifted = Reslice::new().with_output_origin([0.5, 0.5, 0.5]);
        group.bench_with_input(BenchmarkId::new("linear", size), &size, |b, _| {
            b.iter(|| black_box(shifted.execute(&input).unwrap()))
        });

        let general = shifted.clone().with_optimization(false);
        group.bench_with_input(BenchmarkId::new("linear_unoptimized", size), &size, |b, _| {
            b.iter(|| black_box(general.execute(&input).unwrap()))
        });

        let copy = Reslice::new().with_axes_direction_cosines([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]);
        group.bench_with_input(BenchmarkId::new("nearest_copy", size), &size, |b, _| {
            b.iter(|| black_box(copy.execute(&input).unwrap()))
        });
    }

    group.finish();
}

fn benchmark_slab(c: &mut Criterion) {
    let mut group = c.benchmark_group("reslice_slab");
    let size = 64;
    let input = ramp_volume(size);

    for count in [1, 4, 16].iter() {
        group.throughput(Throughput::Elements((size as u64).pow(3)));
        let reslice = Reslice::new()
            .with_slab_number_of_slices(*count)
            .with_slab_mode(SlabMode::Max);
        group.bench_with_input(BenchmarkId::new("max", count), count, |b, _| {
            b.iter(|| black_box(reslice.execute(&input).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_general, benchmark_permute, benchmark_slab);
criterion_main!(benches);
