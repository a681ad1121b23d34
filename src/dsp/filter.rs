//! # One-Pole Filters
//!
//! Every filter in the delay is the same first-order smoother written in
//! "alpha" form:
//!
//! ```text
//! state += alpha * (input - state)
//! lowpass  = state
//! highpass = input - state
//! ```
//!
//! `alpha` is derived from a cutoff frequency:
//!
//! ```text
//! alpha = 1 - e^(-2π * cutoff_hz / sample_rate)
//! ```
//!
//! `alpha = 1` passes the input straight through the lowpass (and silences
//! the highpass); `alpha → 0` freezes the lowpass state.
//!
//! The user never sees a cutoff in Hz. Each filter maps a normalized
//! "amount" to its own frequency range first:
//!
//! | Filter   | amount = 0 | amount = 1 | Curve        |
//! |----------|-----------:|-----------:|--------------|
//! | Lowpass  | 18 kHz     | 1 kHz      | exponential  |
//! | Highpass | 20 Hz      | 2 kHz      | exponential  |
//! | Damping  | 12 kHz     | 6 kHz      | linear, then narrowed by quality |

use std::f32::consts::TAU;

use super::flush_denormal;

const LOWPASS_OPEN_HZ: f32 = 18_000.0;
const LOWPASS_CLOSED_HZ: f32 = 1_000.0;
const HIGHPASS_OPEN_HZ: f32 = 20.0;
const HIGHPASS_CLOSED_HZ: f32 = 2_000.0;
const DAMPING_OPEN_HZ: f32 = 12_000.0;
const DAMPING_CLOSED_HZ: f32 = 6_000.0;

/// At full quality the damping cutoff drops by this fraction on top of the
/// amount mapping.
const DAMPING_QUALITY_REDUCTION: f32 = 0.25;

/// Convert a cutoff frequency to a one-pole coefficient in `[0, 1]`.
pub fn one_pole_alpha(cutoff_hz: f32, sample_rate: f32) -> f32 {
    if !(sample_rate > 0.0) || !cutoff_hz.is_finite() {
        return 1.0;
    }
    let alpha = 1.0 - (-TAU * cutoff_hz.max(0.0) / sample_rate).exp();
    alpha.clamp(0.0, 1.0)
}

/// Exponential sweep between two frequencies, `t` in `[0, 1]`.
fn sweep_exponential(from_hz: f32, to_hz: f32, t: f32) -> f32 {
    from_hz * (to_hz / from_hz).powf(t.clamp(0.0, 1.0))
}

/// Cutoff of the tone lowpass for a normalized amount.
pub fn lowpass_amount_to_cutoff(amount01: f32) -> f32 {
    sweep_exponential(LOWPASS_OPEN_HZ, LOWPASS_CLOSED_HZ, amount01)
}

/// Cutoff of the tone highpass for a normalized amount.
pub fn highpass_amount_to_cutoff(amount01: f32) -> f32 {
    sweep_exponential(HIGHPASS_OPEN_HZ, HIGHPASS_CLOSED_HZ, amount01)
}

/// Cutoff of the feedback damping filter.
///
/// Higher diffusion quality darkens the loop a little further so dense
/// settings don't build up fizz.
pub fn damping_amount_to_cutoff(amount01: f32, quality01: f32) -> f32 {
    let amount = amount01.clamp(0.0, 1.0);
    let base = DAMPING_OPEN_HZ + (DAMPING_CLOSED_HZ - DAMPING_OPEN_HZ) * amount;
    base * (1.0 - DAMPING_QUALITY_REDUCTION * quality01.clamp(0.0, 1.0) * amount)
}

pub fn lowpass_amount_to_alpha(sample_rate: f32, amount01: f32) -> f32 {
    one_pole_alpha(lowpass_amount_to_cutoff(amount01), sample_rate)
}

pub fn highpass_amount_to_alpha(sample_rate: f32, amount01: f32) -> f32 {
    one_pole_alpha(highpass_amount_to_cutoff(amount01), sample_rate)
}

pub fn damping_amount_to_alpha(sample_rate: f32, amount01: f32, quality01: f32) -> f32 {
    one_pole_alpha(damping_amount_to_cutoff(amount01, quality01), sample_rate)
}

/// A one-pole (6 dB/octave) filter state.
///
/// The coefficient is passed in per call rather than stored, so one block
/// computes it once and every channel shares it.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnePoleFilter {
    /// The smoothed signal: the lowpass output, and the part the highpass
    /// subtracts.
    state: f32,
}

impl OnePoleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn tick(&mut self, input: f32, alpha: f32) -> f32 {
        self.state = flush_denormal(self.state + alpha * (input - self.state));
        self.state
    }

    /// Lowpass one sample.
    #[inline]
    pub fn process_lowpass(&mut self, input: f32, alpha: f32) -> f32 {
        self.tick(input, alpha)
    }

    /// Highpass one sample: whatever the lowpass didn't keep.
    #[inline]
    pub fn process_highpass(&mut self, input: f32, alpha: f32) -> f32 {
        input - self.tick(input, alpha)
    }

    /// Zero the state.
    pub fn reset(&mut self) {
        self.state = 0.0;
    }

    pub fn state(&self) -> f32 {
        self.state
    }
}
