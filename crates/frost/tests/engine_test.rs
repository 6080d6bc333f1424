//! End-to-end tests for BlurEngine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use frost::{
    Backend, BlurConfiguration, BlurError, BlurResult, GpuDevice, ImageBuffer, InlineDispatcher, Mode,
    NativeBitmap, PixelFormat, RequestId, SoftwareDevice, frost_native_blur,
};

const WHITE: [u8; 4] = [255, 255, 255, 255];

fn noise(w: u32, h: u32, seed: u32) -> ImageBuffer {
    let mut img = ImageBuffer::new(w, h, PixelFormat::Rgba8).unwrap();
    let mut state = seed | 1;
    for v in img.pixels_mut() {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        *v = (state >> 24) as u8;
    }
    img
}

fn noise_in(format: PixelFormat, w: u32, h: u32, seed: u32) -> ImageBuffer {
    let mut state = seed | 1;
    let pixels = (0..w as usize * h as usize * format.channels())
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect();
    ImageBuffer::from_raw(pixels, w, h, format).unwrap()
}

fn software_gpu() -> GpuDevice {
    GpuDevice::Software(SoftwareDevice::new())
}

#[test]
fn test_zero_radius_is_identity() {
    for backend in [Backend::Cpu, Backend::Native, Backend::Gpu] {
        let engine = BlurConfiguration::builder()
            .radius(0)
            .backend(backend)
            .gpu_device(software_gpu())
            .build()
            .unwrap();
        assert_eq!(engine.backend_name(), "identity");
        let img = noise(17, 9, 3);
        let out = engine.blur(img.clone()).unwrap();
        assert_eq!(out.pixels(), img.pixels());
    }
}

#[test]
fn test_white_stays_white_on_every_backend() {
    let setups = [
        (Backend::Cpu, false),
        (Backend::Cpu, true),
        (Backend::Native, false),
        (Backend::Native, true),
        (Backend::Gpu, false),
    ];
    for (backend, concurrent) in setups {
        let engine = BlurConfiguration::builder()
            .mode(Mode::Box)
            .radius(2)
            .backend(backend)
            .concurrent(concurrent)
            .gpu_device(software_gpu())
            .build()
            .unwrap();
        let img = ImageBuffer::filled(100, 100, PixelFormat::Rgba8, &WHITE).unwrap();
        let out = engine.blur(img).unwrap();
        assert!(
            out.pixels().iter().all(|&v| v == 255),
            "{backend} concurrent={concurrent}"
        );
    }
}

#[test]
fn test_black_dot_gaussian() {
    let engine = BlurConfiguration::builder()
        .mode(Mode::Gaussian)
        .radius(1)
        .backend(Backend::Cpu)
        .build()
        .unwrap();
    let mut img = ImageBuffer::filled(10, 10, PixelFormat::Rgba8, &WHITE).unwrap();
    img.set_pixel(5, 5, &[0, 0, 0, 255]);
    let out = engine.blur(img).unwrap();

    let lum = |x: u32, y: u32| out.pixel(x, y)[0];
    let center = lum(5, 5);
    for y in 0..10u32 {
        for x in 0..10u32 {
            let near = x.abs_diff(5) <= 1 && y.abs_diff(5) <= 1;
            if !near {
                assert_eq!(lum(x, y), 255, "({x}, {y}) should be untouched");
            } else {
                assert!(lum(x, y) < 255, "({x}, {y}) should be darkened");
                assert!(lum(x, y) >= center);
            }
            assert_eq!(out.pixel(x, y)[3], 255);
        }
    }
    // Symmetric around the dot.
    for (dx, dy) in [(1, 0), (0, 1), (1, 1)] {
        let values = [
            lum(5 + dx, 5 + dy),
            lum(5 - dx, 5 - dy),
            lum(5 + dy, 5 + dx),
            lum(5 - dy, 5 - dx),
        ];
        let (min, max) = (values.iter().min().unwrap(), values.iter().max().unwrap());
        assert!(max - min <= 1, "asymmetric at offset ({dx}, {dy}): {values:?}");
    }
    assert!(lum(5, 5) < lum(4, 5) && lum(4, 5) < lum(4, 4));
}

#[test]
fn test_concurrent_cpu_deterministic() {
    let source = noise(64, 48, 0xdead_beef);
    for mode in Mode::ALL {
        let sequential = BlurConfiguration::builder()
            .mode(mode)
            .radius(5)
            .backend(Backend::Cpu)
            .build()
            .unwrap()
            .blur(source.clone())
            .unwrap();

        for workers in [1, 2, 4, 8] {
            let engine = BlurConfiguration::builder()
                .mode(mode)
                .radius(5)
                .backend(Backend::Cpu)
                .concurrent(true)
                .workers(workers)
                .build()
                .unwrap();
            let out = engine.blur(source.clone()).unwrap();
            assert_eq!(out.pixels(), sequential.pixels(), "mode {mode}, workers {workers}");
        }
    }
}

#[test]
fn test_backends_agree_within_tolerance() {
    let source = noise(33, 21, 99);
    let blur = |backend| {
        BlurConfiguration::builder()
            .mode(Mode::Stack)
            .radius(4)
            .backend(backend)
            .gpu_device(software_gpu())
            .build()
            .unwrap()
            .blur(source.clone())
            .unwrap()
    };
    let cpu = blur(Backend::Cpu);
    for other in [blur(Backend::Native), blur(Backend::Gpu)] {
        for (a, b) in cpu.pixels().iter().zip(other.pixels()) {
            assert!(a.abs_diff(*b) <= 2, "{a} vs {b}");
        }
    }
}

#[test]
fn test_gpu_concurrent_rejected_before_device_use() {
    let device = SoftwareDevice::new();
    let err = BlurConfiguration::builder()
        .backend(Backend::Gpu)
        .concurrent(true)
        .gpu_device(GpuDevice::Software(device.clone()))
        .build()
        .unwrap_err();
    assert!(matches!(err, BlurError::UnsupportedOperation(_)));
    assert_eq!(device.stats().contexts_created, 0);
}

#[cfg(not(feature = "wgpu"))]
#[test]
fn test_explicit_wgpu_without_feature() {
    let err = BlurConfiguration::builder()
        .backend(Backend::Gpu)
        .gpu_device(GpuDevice::Wgpu)
        .build()
        .unwrap_err();
    assert!(matches!(err, BlurError::UnsupportedOperation(_)));
}

#[test]
fn test_gpu_context_failure_returns_unblurred() {
    let device = SoftwareDevice::new();
    device.fail_context_creation(true);
    let engine = BlurConfiguration::builder()
        .backend(Backend::Gpu)
        .radius(3)
        .gpu_device(GpuDevice::Software(device))
        .build()
        .unwrap();
    let img = noise(12, 12, 5);
    let out = engine.blur(img.clone()).unwrap();
    assert_eq!(out.pixels(), img.pixels());
}

#[test]
fn test_gpu_fallback_returns_input_after_crop_and_downsample() {
    let device = SoftwareDevice::new();
    device.fail_context_creation(true);
    for (factor, (x, y)) in [(0.5, (0, 0)), (1.0, (3, 2)), (0.5, (3, 2))] {
        let engine = BlurConfiguration::builder()
            .backend(Backend::Gpu)
            .radius(3)
            .sample_factor(factor)
            .translate(x, y)
            .gpu_device(GpuDevice::Software(device.clone()))
            .build()
            .unwrap();
        let img = noise(20, 20, 11);
        let out = engine.blur(img.clone()).unwrap();
        assert_eq!(out.dimensions(), img.dimensions(), "factor {factor}, translate ({x}, {y})");
        assert_eq!(out.pixels(), img.pixels(), "factor {factor}, translate ({x}, {y})");
    }
}

#[test]
fn test_release_resources_tears_down_gpu_state() {
    let device = SoftwareDevice::new();
    let engine = BlurConfiguration::builder()
        .backend(Backend::Gpu)
        .radius(2)
        .gpu_device(GpuDevice::Software(device.clone()))
        .build()
        .unwrap();
    engine.blur(noise(8, 8, 1)).unwrap();
    engine.release_resources();
    let stats = device.stats();
    assert_eq!(stats.contexts_destroyed, 1);
    assert_eq!(stats.surfaces_destroyed, 2);
    assert_eq!(stats.textures_destroyed, 1);

    // Still usable afterwards.
    engine.blur(noise(8, 8, 2)).unwrap();
    assert_eq!(device.stats().contexts_created, 2);
}

unsafe extern "C" fn broken_routine(_: u32, _: *const NativeBitmap, _: u32, _: u32, _: u32, _: u32) -> i32 {
    -1
}

#[test]
fn test_native_failure_surfaces_as_backend_failure() {
    let engine = BlurConfiguration::builder()
        .backend(Backend::Native)
        .native_routine(broken_routine)
        .build()
        .unwrap();
    let err = engine.blur(noise(6, 6, 4)).unwrap_err();
    assert!(matches!(err, BlurError::BackendFailure(_)));
}

#[test]
fn test_recycled_input_rejected() {
    let engine = BlurConfiguration::builder().backend(Backend::Cpu).build().unwrap();
    let mut img = noise(4, 4, 8);
    img.recycle();
    assert!(matches!(engine.blur(img), Err(BlurError::RecycledInput)));
}

#[test]
fn test_sample_factor_with_and_without_upscale() {
    let uniform = ImageBuffer::filled(40, 30, PixelFormat::Rgba8, &[10, 120, 230, 255]).unwrap();

    let upscaled = BlurConfiguration::builder()
        .backend(Backend::Cpu)
        .sample_factor(0.5)
        .build()
        .unwrap()
        .blur(uniform.clone())
        .unwrap();
    assert_eq!(upscaled.dimensions(), (40, 30));
    assert!(upscaled.pixels().chunks_exact(4).all(|p| p == [10, 120, 230, 255]));

    let small = BlurConfiguration::builder()
        .backend(Backend::Cpu)
        .sample_factor(0.5)
        .upscale(false)
        .build()
        .unwrap()
        .blur(uniform)
        .unwrap();
    assert_eq!(small.dimensions(), (20, 15));
}

#[test]
fn test_sample_factor_below_one_pixel() {
    let engine = BlurConfiguration::builder()
        .backend(Backend::Cpu)
        .sample_factor(0.01)
        .build()
        .unwrap();
    let err = engine.blur(noise(10, 10, 2)).unwrap_err();
    assert!(matches!(err, BlurError::InvalidConfiguration(_)));
}

#[test]
fn test_invalid_configurations() {
    for factor in [0.0, -0.5, 1.5, f32::NAN] {
        let err = BlurConfiguration::builder().sample_factor(factor).build().unwrap_err();
        assert!(matches!(err, BlurError::InvalidConfiguration(_)), "factor {factor}");
    }
    let err = BlurConfiguration::builder().workers(0).build().unwrap_err();
    assert!(matches!(err, BlurError::InvalidConfiguration(_)));
}

// =============================================================================
// Pixel formats
// =============================================================================

#[test]
fn test_bgra_alpha_passes_through() {
    for backend in [Backend::Cpu, Backend::Native] {
        for concurrent in [false, true] {
            let engine = BlurConfiguration::builder()
                .mode(Mode::Gaussian)
                .radius(3)
                .backend(backend)
                .concurrent(concurrent)
                .workers(3)
                .build()
                .unwrap();
            let img = noise_in(PixelFormat::Bgra8, 23, 17, 21);
            let out = engine.blur(img.clone()).unwrap();
            assert_eq!(out.format(), PixelFormat::Bgra8);
            let alpha = |i: &ImageBuffer| i.pixels().chunks_exact(4).map(|p| p[3]).collect::<Vec<_>>();
            assert_eq!(alpha(&out), alpha(&img), "{backend} concurrent={concurrent}");
            assert_ne!(out.pixels(), img.pixels(), "colour channels should be filtered");
        }
    }
}

#[test]
fn test_gray_single_channel_blurred() {
    let source = noise_in(PixelFormat::Gray8, 31, 19, 5);
    let blur = |backend, concurrent| {
        BlurConfiguration::builder()
            .mode(Mode::Box)
            .radius(2)
            .backend(backend)
            .concurrent(concurrent)
            .workers(4)
            .build()
            .unwrap()
            .blur(source.clone())
            .unwrap()
    };

    let cpu = blur(Backend::Cpu, false);
    assert_eq!(cpu.format(), PixelFormat::Gray8);
    assert_eq!(cpu.pixels().len(), 31 * 19);
    assert_ne!(cpu.pixels(), source.pixels());
    assert_eq!(blur(Backend::Cpu, true).pixels(), cpu.pixels());

    for native in [blur(Backend::Native, false), blur(Backend::Native, true)] {
        for (a, b) in cpu.pixels().iter().zip(native.pixels()) {
            assert!(a.abs_diff(*b) <= 2, "{a} vs {b}");
        }
    }

    // Single dark pixel spreads over its 5x5 box neighbourhood only.
    let mut dot = ImageBuffer::filled(9, 9, PixelFormat::Gray8, &[200]).unwrap();
    dot.set_pixel(4, 4, &[0]);
    let out = BlurConfiguration::builder()
        .mode(Mode::Box)
        .radius(2)
        .backend(Backend::Native)
        .build()
        .unwrap()
        .blur(dot)
        .unwrap();
    assert!(out.pixel(4, 4)[0].abs_diff(192) <= 1, "{:?}", out.pixel(4, 4));
    assert_eq!(out.pixel(0, 0), &[200]);
}

// =============================================================================
// Async
// =============================================================================

type Log = Arc<Mutex<Vec<(RequestId, Result<(u32, u32), String>, thread::ThreadId)>>>;

fn record(log: &Log) -> impl FnOnce(BlurResult) + Send + use<> {
    let log = log.clone();
    move |r: BlurResult| {
        let outcome = r.outcome.map(|img| img.dimensions()).map_err(|e| format!("{e:?}"));
        log.lock().unwrap().push((r.id, outcome, thread::current().id()));
    }
}

fn drain_until(engine: &frost::BlurEngine, log: &Log, count: usize) {
    for _ in 0..200 {
        if log.lock().unwrap().len() >= count {
            return;
        }
        engine.wait_for_callback(Duration::from_millis(50));
    }
    panic!("expected {count} callbacks, got {}", log.lock().unwrap().len());
}

#[test]
fn test_async_delivers_on_draining_thread() {
    let engine = BlurConfiguration::builder().backend(Backend::Cpu).radius(2).build().unwrap();
    let log: Log = Arc::default();

    let id = engine.blur_async(noise(16, 16, 1), record(&log));
    drain_until(&engine, &log, 1);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, id);
    assert_eq!(log[0].1, Ok((16, 16)));
    assert_eq!(log[0].2, thread::current().id());
}

#[test]
fn test_async_latest_wins() {
    // Slow enough that the worker is still busy with the first request when
    // the others arrive.
    let engine = BlurConfiguration::builder()
        .backend(Backend::Native)
        .radius(2)
        .native_routine(slow_routine)
        .build()
        .unwrap();
    let log: Log = Arc::default();

    let ids: Vec<RequestId> = (0..3)
        .map(|i| engine.blur_async(noise(64, 64, i + 1), record(&log)))
        .collect();
    drain_until(&engine, &log, 3);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(engine.run_pending_callbacks(), 0);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 3, "each callback fires exactly once");
    for &id in &ids {
        let entry = log.iter().find(|e| e.0 == id).unwrap();
        if id == ids[2] {
            assert_eq!(entry.1, Ok((64, 64)));
        } else {
            assert_eq!(entry.1, Err("Superseded".to_string()));
        }
    }
}

#[test]
fn test_async_recycled_input_fails() {
    let engine = BlurConfiguration::builder().backend(Backend::Cpu).build().unwrap();
    let log: Log = Arc::default();
    let mut img = noise(4, 4, 1);
    img.recycle();
    engine.blur_async(img, record(&log));
    assert_eq!(engine.run_pending_callbacks(), 1);
    assert_eq!(log.lock().unwrap()[0].1, Err("RecycledInput".to_string()));
}

unsafe extern "C" fn slow_routine(
    mode: u32,
    bitmap: *const NativeBitmap,
    radius: u32,
    partitions: u32,
    index: u32,
    direction: u32,
) -> i32 {
    thread::sleep(Duration::from_millis(100));
    unsafe { frost_native_blur(mode, bitmap, radius, partitions, index, direction) }
}

#[test]
fn test_drop_fails_pending_request() {
    let log: Log = Arc::default();
    let engine = BlurConfiguration::builder()
        .backend(Backend::Native)
        .native_routine(slow_routine)
        .dispatcher(Arc::new(InlineDispatcher))
        .build()
        .unwrap();

    let first = engine.blur_async(noise(8, 8, 1), record(&log));
    thread::sleep(Duration::from_millis(50));
    let second = engine.blur_async(noise(8, 8, 2), record(&log));
    drop(engine);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    let outcome = |id| log.iter().find(|e| e.0 == id).map(|e| e.1.clone()).unwrap();
    assert_eq!(outcome(first), Err("Superseded".to_string()));
    assert_eq!(outcome(second), Err("ShutDown".to_string()));
}

#[test]
fn test_custom_dispatcher_bypasses_result_loop() {
    let log: Log = Arc::default();
    let engine = BlurConfiguration::builder()
        .backend(Backend::Cpu)
        .dispatcher(Arc::new(InlineDispatcher))
        .build()
        .unwrap();
    engine.blur_async(noise(8, 8, 1), record(&log));
    for _ in 0..200 {
        if !log.lock().unwrap().is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(engine.run_pending_callbacks(), 0);
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_ne!(log[0].2, thread::current().id());
}

#[test]
fn test_drop_delivers_queued_results_through_default_loop() {
    let log: Log = Arc::default();
    let engine = BlurConfiguration::builder()
        .backend(Backend::Native)
        .native_routine(slow_routine)
        .build()
        .unwrap();

    let first = engine.blur_async(noise(8, 8, 1), record(&log));
    thread::sleep(Duration::from_millis(50));
    let second = engine.blur_async(noise(8, 8, 2), record(&log));
    drop(engine);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2, "every callback fires on drop");
    let outcome = |id| log.iter().find(|e| e.0 == id).map(|e| e.1.clone()).unwrap();
    assert_eq!(outcome(first), Err("Superseded".to_string()));
    assert_eq!(outcome(second), Err("ShutDown".to_string()));
    assert!(log.iter().all(|e| e.2 == thread::current().id()));
}

#[test]
fn test_worker_survives_panicking_callback() {
    let log: Log = Arc::default();
    let engine = BlurConfiguration::builder()
        .backend(Backend::Cpu)
        .radius(1)
        .dispatcher(Arc::new(InlineDispatcher))
        .build()
        .unwrap();

    let reached = Arc::new(AtomicBool::new(false));
    let flag = reached.clone();
    engine.blur_async(noise(8, 8, 1), move |_| {
        flag.store(true, Ordering::SeqCst);
        panic!("callback failure");
    });
    for _ in 0..200 {
        if reached.load(Ordering::SeqCst) {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(reached.load(Ordering::SeqCst));

    let id = engine.blur_async(noise(8, 8, 2), record(&log));
    for _ in 0..200 {
        if !log.lock().unwrap().is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, id);
    assert_eq!(log[0].1, Ok((8, 8)));
}
