//! WGSL sources for the offscreen blur programs.
//! Used by the wgpu device when the `wgpu` feature is enabled.

#![allow(dead_code)] // Programs used by wgpu device

use crate::config::Mode;

/// Full-screen triangle plus the separable blur fragment stage.
///
/// The fragment stage calls `tap_weight(i, radius)`, which is supplied per
/// mode, and divides by the accumulated weight sum. Alpha is taken from the
/// center sample.
pub const BLUR_PROGRAM: &str = r#"
struct Params {
    radius: i32,
    direction: u32,
    width: i32,
    height: i32,
}

@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var<uniform> params: Params;

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> @builtin(position) vec4<f32> {
    let x = f32(i32(vi & 1u) * 4 - 1);
    let y = f32(i32(vi >> 1u) * 4 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let p = vec2<i32>(floor(pos.xy));
    var dir = vec2<i32>(1, 0);
    if params.direction == 1u {
        dir = vec2<i32>(0, 1);
    }
    let max_coord = vec2<i32>(params.width - 1, params.height - 1);
    let center = textureLoad(src, p, 0);

    var acc = vec3<f32>(0.0);
    var weight_sum = 0.0;
    for (var i = 0; i <= 2 * params.radius; i++) {
        let w = tap_weight(i, params.radius);
        let q = clamp(p + dir * (i - params.radius), vec2<i32>(0), max_coord);
        acc += textureLoad(src, q, 0).rgb * w;
        weight_sum += w;
    }
    return vec4<f32>(acc / weight_sum, center.a);
}
"#;

/// Uniform weights.
pub const BOX_WEIGHT: &str = r#"
fn tap_weight(i: i32, r: i32) -> f32 {
    return 1.0;
}
"#;

/// Gaussian bell, sigma = radius + 1.
pub const GAUSSIAN_WEIGHT: &str = r#"
fn tap_weight(i: i32, r: i32) -> f32 {
    let c = f32(r);
    let sigma = c + 1.0;
    let d = f32(i) - c;
    return (1.0 / sigma) * exp(-(d * d) / (2.0 * sigma * sigma));
}
"#;

/// Tent weights.
pub const STACK_WEIGHT: &str = r#"
fn tap_weight(i: i32, r: i32) -> f32 {
    return f32(r + 1 - abs(i - r));
}
"#;

/// Complete WGSL module for `mode`.
pub fn blur_program(mode: Mode) -> String {
    let weight = match mode {
        Mode::Box => BOX_WEIGHT,
        Mode::Gaussian => GAUSSIAN_WEIGHT,
        Mode::Stack => STACK_WEIGHT,
    };
    format!("{weight}\n{BLUR_PROGRAM}")
}
