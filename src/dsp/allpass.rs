//! # All-Pass Diffusion
//!
//! A first-order (Schroeder) all-pass stage passes every frequency at unity
//! gain but smears its phase, which turns a sharp echo into a short cloud of
//! reflections. Chaining several stages with unrelated delay lengths gives
//! the "diffused" echo sound.
//!
//! ## The Recursion
//!
//! ```text
//! w[n] = x[n] - g * w[n - D]
//! y[n] = g * w[n] + w[n - D]
//! ```
//!
//! The stage's buffer stores `w`, not the raw input or output, so one delay
//! line per stage is enough. For `|g| < 1` the transfer function
//! `(g + z^-D) / (1 + g z^-D)` has magnitude one at every frequency.
//!
//! ## Jitter
//!
//! At higher quality settings each stage's delay is wobbled by a slow sine
//! so the comb-like periodicity of fixed stages doesn't ring metallically.

use std::f32::consts::PI;

use nih_plug::nih_debug_assert;

use super::delay_line::DelayLine;
use super::{equal_power_gains, flush_denormal};

/// Shortest and longest stage delay as size sweeps from 0 to 1.
const STAGE_MIN_MS: f32 = 5.0;
const STAGE_MAX_MS: f32 = 40.0;

/// The last stage is this much longer than the first.
const STAGE_SPREAD_RATIO: f32 = 1.6;

const BASE_FEEDBACK: f32 = 0.70;
const FEEDBACK_REDUCTION: f32 = 0.12;
const MIN_FEEDBACK: f32 = 0.40;
const MAX_FEEDBACK: f32 = 0.95;

/// Jitter depth at full quality, per unit of stage ratio.
const MAX_JITTER_MS: f32 = 0.5;

/// One all-pass stage with its own delay buffer.
#[derive(Debug, Clone, Default)]
pub struct AllpassStage {
    line: DelayLine,
    delay_samples: f32,
    feedback: f32,
    jitter_depth: f32,
}

impl AllpassStage {
    /// Allocate room for `max_delay_samples` of delay plus interpolation
    /// headroom.
    pub fn prepare(&mut self, max_delay_samples: usize) {
        self.line.prepare(max_delay_samples + 2);
        self.delay_samples = self.delay_samples.min(self.line.max_delay());
    }

    pub fn set_delay_samples(&mut self, delay_samples: f32) {
        self.delay_samples = delay_samples.clamp(1.0, self.line.max_delay().max(1.0));
    }

    /// Set the feedback coefficient, clamped strictly inside the unit
    /// circle.
    pub fn set_feedback(&mut self, g: f32) {
        self.feedback = g.clamp(-0.99, 0.99);
    }

    pub fn set_jitter_depth(&mut self, depth_samples: f32) {
        self.jitter_depth = depth_samples.max(0.0);
    }

    pub fn delay_samples(&self) -> f32 {
        self.delay_samples
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    pub fn jitter_depth(&self) -> f32 {
        self.jitter_depth
    }

    /// Run one sample through the stage. `jitter_offset` (in samples) is
    /// added to the nominal delay.
    ///
    /// Stages with a buffer of two samples or less act as a bypass.
    #[inline]
    pub fn process(&mut self, input: f32, jitter_offset: f32) -> f32 {
        if self.line.len() <= 2 {
            return input;
        }

        let delay = (self.delay_samples + jitter_offset).clamp(1.0, self.line.max_delay());
        let delayed = self.line.read(delay);
        let w = flush_denormal(input - self.feedback * delayed);
        let output = self.feedback * w + delayed;
        self.line.push(w);
        output
    }

    pub fn reset(&mut self) {
        self.line.reset();
    }
}

/// A serial chain of all-pass stages, crossfaded against the dry input.
#[derive(Debug, Clone, Default)]
pub struct DiffusionChain {
    stages: Vec<AllpassStage>,
    active_stages: usize,
    max_delay_per_stage: usize,
}

impl DiffusionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `stage_count` independent stages. Control context only.
    pub fn prepare(&mut self, stage_count: usize, max_delay_per_stage: usize) {
        self.stages.resize_with(stage_count, AllpassStage::default);
        for stage in &mut self.stages {
            stage.prepare(max_delay_per_stage);
        }
        self.max_delay_per_stage = max_delay_per_stage;
        self.active_stages = stage_count;
    }

    pub fn stages(&self) -> &[AllpassStage] {
        &self.stages
    }

    pub fn active_stages(&self) -> usize {
        self.active_stages
    }

    /// Limit processing to the first `count` stages.
    ///
    /// Stages that come back into use are cleared first so they don't
    /// replay whatever they held when they were switched off.
    pub fn set_active_stages(&mut self, count: usize) {
        let count = count.min(self.stages.len());
        if count > self.active_stages {
            for stage in &mut self.stages[self.active_stages..count] {
                stage.reset();
            }
        }
        self.active_stages = count;
    }

    /// Recompute every stage's delay, feedback, and jitter depth.
    ///
    /// Allocation-free, so it may run at the top of an audio block.
    pub fn configure(&mut self, sample_rate: f32, size01: f32, quality01: f32) {
        let count = self.stages.len();
        if count == 0 {
            return;
        }
        nih_debug_assert!(sample_rate > 0.0);

        let size = size01.clamp(0.0, 1.0);
        let quality = quality01.clamp(0.0, 1.0);
        let samples_per_ms = sample_rate / 1000.0;

        // The longest stage sweeps 5..40 ms; the others sit below it on a
        // 1.0x..1.6x ladder.
        let longest_ms = STAGE_MIN_MS + (STAGE_MAX_MS - STAGE_MIN_MS) * size.powf(1.5);

        for (i, stage) in self.stages.iter_mut().enumerate() {
            let ratio = if count > 1 {
                1.0 + (STAGE_SPREAD_RATIO - 1.0) * i as f32 / (count - 1) as f32
            } else {
                STAGE_SPREAD_RATIO
            };
            let delay_ms = longest_ms * ratio / STAGE_SPREAD_RATIO;
            let jitter = quality * MAX_JITTER_MS * ratio * samples_per_ms;

            let headroom = stage.line.max_delay() - jitter - 1.0;
            stage.delay_samples = (delay_ms * samples_per_ms).clamp(1.0, headroom.max(1.0));
            stage.set_jitter_depth(jitter);
            stage.set_feedback(stage_feedback(delay_ms));
        }
    }

    /// Run one sample through the active stages and crossfade the result
    /// against `input` with equal power.
    ///
    /// `jitter_phase` is the LFO phase (radians) for the first stage; each
    /// following stage sees it advanced by `jitter_increment`.
    #[inline]
    pub fn process_chain_sample(
        &mut self,
        input: f32,
        amount01: f32,
        jitter_phase: f32,
        jitter_increment: f32,
    ) -> f32 {
        let mut phase = jitter_phase;
        let mut diffused = input;
        for stage in &mut self.stages[..self.active_stages] {
            let offset = if stage.jitter_depth > 0.0 {
                stage.jitter_depth * phase.sin()
            } else {
                0.0
            };
            diffused = stage.process(diffused, offset);
            phase += jitter_increment;
            if phase > PI {
                phase -= 2.0 * PI;
            }
        }

        let (dry, wet) = equal_power_gains(amount01);
        dry * input + wet * diffused
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }
}

/// Longer stages get a gentler coefficient so they don't ring.
fn stage_feedback(delay_ms: f32) -> f32 {
    let reduction = FEEDBACK_REDUCTION * (delay_ms / STAGE_MAX_MS).clamp(0.0, 1.0);
    (BASE_FEEDBACK - reduction).clamp(MIN_FEEDBACK, MAX_FEEDBACK)
}
