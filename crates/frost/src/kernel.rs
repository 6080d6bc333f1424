//! 1-D kernel weights for the three blur modes.
//!
//! Every backend uses the same raw tap formula:
//!
//! - **Box**: `1`
//! - **Gaussian**: `(1/σ) · exp(-(i - c)² / 2σ²)` with `c = radius`, `σ = c + 1`
//! - **Stack**: `radius + 1 - |i - radius|`
//!
//! CPU and native paths normalize the full sequence up front; fragment
//! programs evaluate [`tap_weight`] per fragment and divide by the running sum.

use crate::config::Mode;

/// Unnormalized weight of tap `index` in a kernel of `2 * radius + 1` taps.
#[inline]
pub fn tap_weight(mode: Mode, radius: u32, index: u32) -> f32 {
    match mode {
        Mode::Box => 1.0,
        Mode::Gaussian => {
            let center = radius as f32;
            let sigma = center + 1.0;
            let d = index as f32 - center;
            (1.0 / sigma) * (-(d * d) / (2.0 * sigma * sigma)).exp()
        }
        Mode::Stack => (radius + 1 - index.abs_diff(radius)) as f32,
    }
}

/// Normalized 1-D kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel1D {
    weights: Vec<f32>,
    radius: u32,
}

impl Kernel1D {
    pub fn new(mode: Mode, radius: u32) -> Self {
        let diameter = 2 * radius + 1;
        let mut weights: Vec<f32> = (0..diameter).map(|i| tap_weight(mode, radius, i)).collect();
        let sum: f32 = weights.iter().sum();
        for w in &mut weights {
            *w /= sum;
        }
        Self { weights, radius }
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn diameter(&self) -> usize {
        self.weights.len()
    }

    /// Weights in 16.16 fixed point, adjusted so they sum to exactly `1 << 16`.
    pub fn to_fixed(&self) -> Vec<i32> {
        const ONE: i32 = 1 << 16;
        let mut fixed: Vec<i32> = self.weights.iter().map(|w| (w * ONE as f32).round() as i32).collect();
        let drift = ONE - fixed.iter().sum::<i32>();
        fixed[self.radius as usize] += drift;
        fixed
    }
}
