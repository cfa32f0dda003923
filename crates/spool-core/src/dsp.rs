//! Shared numeric helpers for the render path
//!
//! Everything here is allocation-free and safe to call per sample.

use std::f32::consts::FRAC_PI_4;

/// Time constant of the per-chunk parameter smoother (10ms)
pub const SMOOTHING_TIME_SECS: f32 = 0.010;

/// Magnitude below which filter outputs are snapped to exactly zero
pub const DENORMAL_THRESHOLD: f32 = 1.0e-20;

/// One-pole coefficient for a chunk of `frames` samples
///
/// `alpha = 1 - exp(-frames / (tau * sample_rate))`
#[inline]
pub fn chunk_smoothing_alpha(frames: usize, sample_rate: f32, tau_secs: f32) -> f32 {
    if frames == 0 || sample_rate <= 0.0 {
        return 0.0;
    }
    1.0 - (-(frames as f32) / (tau_secs * sample_rate)).exp()
}

/// Equal-power pan law
///
/// `pan` is bipolar (-1 = hard left, 1 = hard right). Returns `(left, right)`.
#[inline]
pub fn equal_power_pan(pan: f32) -> (f32, f32) {
    let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Soft saturation used on every output stage
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    x.tanh()
}

/// Snap sub-denormal values to exactly zero
#[inline]
pub fn snap_denormal(x: f32) -> f32 {
    if x.abs() < DENORMAL_THRESHOLD {
        0.0
    } else {
        x
    }
}

/// Enable flush-to-zero / denormals-are-zero for the calling thread
///
/// MXCSR is per thread, so every render entry point calls this. It is a
/// single register read/write and cheap enough to do per block.
#[inline]
pub fn enable_flush_to_zero() {
    #[cfg(all(any(target_arch = "x86", target_arch = "x86_64"), target_feature = "sse"))]
    #[allow(deprecated)]
    unsafe {
        #[cfg(target_arch = "x86")]
        use std::arch::x86::{_mm_getcsr, _mm_setcsr};
        #[cfg(target_arch = "x86_64")]
        use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};

        // FTZ (bit 15) | DAZ (bit 6)
        const FTZ_DAZ: u32 = 0x8040;
        let csr = _mm_getcsr();
        if csr & FTZ_DAZ != FTZ_DAZ {
            _mm_setcsr(csr | FTZ_DAZ);
        }
    }
}

/// One-pole low-pass coefficient for a cutoff in Hz
#[inline]
pub fn one_pole_coeff(cutoff_hz: f32, sample_rate: f32) -> f32 {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz.max(1.0));
    let dt = 1.0 / sample_rate;
    dt / (rc + dt)
}
