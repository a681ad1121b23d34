//! # Stereo Width
//!
//! One control, two techniques:
//!
//! - **Narrowing** (`width` in `[-1, 0]`): mid/side. The side signal is
//!   scaled by `1 + width`, so `-1` collapses to mono and `0` is untouched.
//! - **Widening** (`width` in `(0, 1]`): Haas effect. The right channel is
//!   delayed by up to `max_delay - 1` samples; a few milliseconds of offset
//!   reads as width rather than as an echo.
//!
//! Both channel buffers are written on every sample in either mode, so
//! sweeping the control across zero never replays stale history.

use super::delay_line::DelayLine;

#[derive(Debug, Clone, Default)]
pub struct HaasWidener {
    left: DelayLine,
    right: DelayLine,
    max_delay_samples: usize,
}

impl HaasWidener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the Haas window. Control context only.
    pub fn prepare(&mut self, max_delay_samples: usize) {
        let len = max_delay_samples.max(1);
        self.left.prepare(len);
        self.right.prepare(len);
        self.max_delay_samples = len;
    }

    pub fn max_delay_samples(&self) -> usize {
        self.max_delay_samples
    }

    /// Process one stereo frame.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32, width: f32) -> (f32, f32) {
        let width = if width.is_finite() {
            width.clamp(-1.0, 1.0)
        } else {
            0.0
        };

        self.left.write(left);
        self.right.write(right);

        let output = if width == 0.0 {
            (left, right)
        } else if width < 0.0 {
            let mid = 0.5 * (left + right);
            let side = 0.5 * (left - right) * (1.0 + width);
            (mid + side, mid - side)
        } else {
            let delay = (self.max_delay_samples.saturating_sub(1)) as f32 * width;
            (self.left.read(0.0), self.right.read(delay))
        };

        self.left.advance();
        self.right.advance();
        output
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}
