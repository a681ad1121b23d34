//! # DSP Primitives
//!
//! The leaf components the engine is assembled from, in dependency order:
//!
//! - **`delay_line`**: fractional-read ring buffer.
//! - **`allpass`**: first-order all-pass stages and the diffusion chain
//!   built from them.
//! - **`fdn`**: feedback delay network with an orthonormal mixing matrix.
//! - **`filter`**: one-pole lowpass / highpass / feedback damping.
//! - **`ducking`**: envelope follower that pulls the wet signal down while
//!   the dry signal is playing.
//! - **`widener`**: Haas delay / mid-side stereo width.
//! - **`smoother`** and **`timing`**: parameter lag, tempo sync, and
//!   decay-time math.

pub mod allpass;
pub mod delay_line;
pub mod ducking;
pub mod fdn;
pub mod filter;
pub mod smoother;
pub mod timing;
pub mod widener;

use std::f32::consts::FRAC_PI_2;

/// Magnitudes below this are treated as silence in recursive state.
pub const DENORMAL_THRESHOLD: f32 = 1e-15;

/// Snap subnormal-range values (and NaN/inf) to zero.
///
/// Recursive filters decaying towards silence otherwise spend a long time
/// in the subnormal range, which is very slow on x86 without FTZ.
#[inline]
pub fn flush_denormal(x: f32) -> f32 {
    if x.abs() < DENORMAL_THRESHOLD || !x.is_finite() {
        0.0
    } else {
        x
    }
}

/// Equal-power crossfade gains `(dry, wet)` for a mix in `[0, 1]`.
///
/// `dry² + wet² = 1` for every mix value, so the perceived loudness stays
/// constant while crossfading uncorrelated signals.
#[inline]
pub fn equal_power_gains(mix01: f32) -> (f32, f32) {
    let theta = mix01.clamp(0.0, 1.0) * FRAC_PI_2;
    (theta.cos(), theta.sin())
}
