//! One-pole parameter lag.
//!
//! Controls arrive from the host as step changes. Feeding a step straight
//! into a delay read position produces a click (or a pitch "zip" if the
//! position jumps a long way), so the engine chases each target with
//!
//! ```text
//! current += coeff * (target - current)
//! ```
//!
//! once per sample. With `coeff` in `(0, 1]` the value approaches the
//! target monotonically and never overshoots.

/// Per-sample coefficient for delay time. Deliberately slow (~13 ms to
/// reach 63 % at 48 kHz) so automation sweeps sound like tape, not steps.
pub const DELAY_TIME_COEFF: f32 = 0.0015;

/// Per-sample coefficient for diffusion size.
pub const SIZE_COEFF: f32 = 0.002;

/// Below this distance the smoother snaps onto the target.
const SETTLE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct Smoother {
    current: f32,
    target: f32,
    coeff: f32,
}

impl Smoother {
    pub fn new(initial: f32, coeff: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            coeff: coeff.clamp(f32::MIN_POSITIVE, 1.0),
        }
    }

    pub fn set_target(&mut self, target: f32) {
        if target.is_finite() {
            self.target = target;
        }
    }

    /// Jump straight to the target.
    pub fn snap_to_target(&mut self) {
        self.current = self.target;
    }

    /// Advance one sample and return the smoothed value.
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.current != self.target {
            let next = self.current + self.coeff * (self.target - self.current);
            // Far from zero the step can drop below one ulp and stall.
            let settled = next == self.current
                || (self.target - next).abs() < SETTLE_EPSILON * (1.0 + self.target.abs());
            self.current = if settled { self.target } else { next };
        }
        self.current
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }
}
