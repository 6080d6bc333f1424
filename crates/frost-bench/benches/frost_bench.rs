//! Benchmarks for the blur backends.
//!
//! Run with: `cargo bench -p frost-bench`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use frost::{
    frost_native_blur, BlurBackend, BlurConfiguration, ConcurrentTaskScheduler, CpuBlur, GpuBlur, ImageBuffer, Mode,
    NativeBlur, PixelFormat, SoftwareDevice,
};

const SIZES: [u32; 3] = [128, 512, 1024];
const RADIUS: u32 = 8;

/// Deterministic RGBA gradient with some high-frequency noise.
fn test_image(size: u32) -> ImageBuffer {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let n = (x.wrapping_mul(2654435761) ^ y.wrapping_mul(40503)) & 0x3f;
            pixels.push(((x * 255 / size) ^ n) as u8);
            pixels.push(((y * 255 / size) ^ n) as u8);
            pixels.push((((x + y) * 127 / size) ^ n) as u8);
            pixels.push(255);
        }
    }
    ImageBuffer::from_raw(pixels, size, size, PixelFormat::Rgba8).unwrap()
}

fn run(backend: &dyn BlurBackend, source: &ImageBuffer) -> ImageBuffer {
    let mut img = source.clone();
    backend.blur(black_box(&mut img)).unwrap();
    img
}

/// Separable CPU passes, sequential vs partitioned across the pool.
fn bench_cpu(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu");
    let scheduler = Arc::new(ConcurrentTaskScheduler::new().unwrap());

    for size in SIZES {
        let img = test_image(size);
        group.throughput(Throughput::Elements(u64::from(size * size)));

        let sequential = CpuBlur::new(Mode::Gaussian, RADIUS, None);
        group.bench_with_input(BenchmarkId::new("sequential", size), &img, |b, img| {
            b.iter(|| run(&sequential, img))
        });

        let concurrent = CpuBlur::new(Mode::Gaussian, RADIUS, Some(scheduler.clone()));
        group.bench_with_input(BenchmarkId::new("concurrent", size), &img, |b, img| {
            b.iter(|| run(&concurrent, img))
        });
    }

    group.finish();
}

/// Fixed-point in-place routine.
fn bench_native(c: &mut Criterion) {
    let mut group = c.benchmark_group("native");
    let scheduler = Arc::new(ConcurrentTaskScheduler::new().unwrap());

    for size in SIZES {
        let img = test_image(size);
        group.throughput(Throughput::Elements(u64::from(size * size)));

        let sequential = NativeBlur::new(Mode::Gaussian, RADIUS, frost_native_blur, None);
        group.bench_with_input(BenchmarkId::new("sequential", size), &img, |b, img| {
            b.iter(|| run(&sequential, img))
        });

        let concurrent = NativeBlur::new(Mode::Gaussian, RADIUS, frost_native_blur, Some(scheduler.clone()));
        group.bench_with_input(BenchmarkId::new("concurrent", size), &img, |b, img| {
            b.iter(|| run(&concurrent, img))
        });
    }

    group.finish();
}

/// Kernel shapes on the same backend; weights differ, tap count does not.
fn bench_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("modes");
    let img = test_image(512);
    group.throughput(Throughput::Elements(512 * 512));

    for mode in [Mode::Box, Mode::Gaussian, Mode::Stack] {
        let backend = NativeBlur::new(mode, RADIUS, frost_native_blur, None);
        group.bench_with_input(BenchmarkId::new(mode.name(), RADIUS), &img, |b, img| {
            b.iter(|| run(&backend, img))
        });
    }

    group.finish();
}

/// Offscreen pipeline on the software device, pools warm after the first iteration.
fn bench_software_gpu(c: &mut Criterion) {
    let mut group = c.benchmark_group("gpu_software");
    group.sample_size(20);

    for size in [128, 512] {
        let img = test_image(size);
        group.throughput(Throughput::Elements(u64::from(size * size)));

        let gpu = GpuBlur::new(Arc::new(SoftwareDevice::new()), Mode::Gaussian, RADIUS);
        group.bench_with_input(BenchmarkId::new("gaussian", size), &img, |b, img| {
            b.iter(|| run(&gpu, img))
        });
    }

    group.finish();
}

/// Full engine path with a quarter-size sample and upscale.
fn bench_engine_downsample(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    let img = test_image(1024);
    group.throughput(Throughput::Elements(1024 * 1024));

    for factor in [1.0f32, 0.5, 0.25] {
        let engine = BlurConfiguration::builder()
            .radius(RADIUS)
            .sample_factor(factor)
            .concurrent(true)
            .build()
            .unwrap();
        group.bench_with_input(BenchmarkId::new("sample_factor", factor), &img, |b, img| {
            b.iter(|| engine.blur(black_box(img.clone())).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cpu,
    bench_native,
    bench_modes,
    bench_software_gpu,
    bench_engine_downsample,
);

criterion_main!(benches);
