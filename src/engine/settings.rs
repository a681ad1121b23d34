//! Prepare-time sizing knobs.
//!
//! Everything here decides how much memory `prepare_to_play` allocates,
//! so none of it may change while audio is running. The values the user
//! moves during playback live in [`EngineParams`](super::control::EngineParams).

use crate::dsp::fdn::MAX_LINES;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Widest tap-cluster spread, in ms. The delay buffer is oversized by
    /// this plus half of it so the latest tap never wraps.
    pub max_spread_ms: f32,

    /// Fixed headroom added to every delay buffer, in ms.
    pub safety_margin_ms: f32,

    /// Longest Haas offset applied at full width, in ms.
    pub haas_window_ms: f32,

    /// All-pass stages allocated per channel; quality tiers enable a
    /// prefix of them.
    pub allpass_stage_capacity: usize,

    /// Longest single all-pass stage, in ms (jitter headroom included).
    pub allpass_max_stage_ms: f32,

    /// Lines in the feedback delay network (1..=8).
    pub fdn_lines: usize,

    /// Longest FDN line, in ms.
    pub fdn_max_line_ms: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_spread_ms: 80.0,
            safety_margin_ms: 20.0,
            haas_window_ms: 25.0,
            allpass_stage_capacity: 6,
            allpass_max_stage_ms: 45.0,
            fdn_lines: MAX_LINES,
            fdn_max_line_ms: 110.0,
        }
    }
}

/// Convert milliseconds to a whole number of samples, rounding up.
pub fn ms_to_samples(ms: f32, sample_rate: f32) -> usize {
    (ms.max(0.0) * sample_rate / 1000.0).ceil() as usize
}

impl EngineSettings {
    /// Main delay buffer length for a given maximum delay:
    /// `max_delay + spread + spread / 2 + safety margin`.
    pub fn delay_buffer_samples(&self, sample_rate: f32, max_delay_seconds: f32) -> usize {
        let nominal = ms_to_samples(max_delay_seconds.max(0.0) * 1000.0, sample_rate);
        let spread = ms_to_samples(self.max_spread_ms, sample_rate);
        let margin = ms_to_samples(self.safety_margin_ms, sample_rate);
        nominal + spread + spread / 2 + margin
    }

    pub fn haas_samples(&self, sample_rate: f32) -> usize {
        ms_to_samples(self.haas_window_ms, sample_rate).max(1)
    }

    pub fn allpass_stage_samples(&self, sample_rate: f32) -> usize {
        ms_to_samples(self.allpass_max_stage_ms, sample_rate)
    }

    pub fn fdn_line_samples(&self, sample_rate: f32) -> usize {
        ms_to_samples(self.fdn_max_line_ms, sample_rate)
    }
}
