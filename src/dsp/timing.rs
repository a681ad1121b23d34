//! Time-domain mappings: how long the delay is, how fast it decays, and
//! how much diffusion work each quality setting buys.
//!
//! ## Tempo Sync
//!
//! ```text
//! quarter note = 60 / bpm seconds
//! whole = 4 quarters, half = 2, eighth = 1/2, sixteenth = 1/4
//! triplet = x 2/3, dotted = x 1.5
//! ```
//!
//! ## Decay Time
//!
//! The feedback control is a T60: the time for the echoes to fall by
//! 60 dB. A loop of length `L` seconds therefore needs a per-pass gain of
//!
//! ```text
//! g = 10^(-3 * L / T60)
//! ```
//!
//! so that after `T60 / L` passes the level is `10^-3`.

use nih_plug::prelude::Enum;

/// Fallback when the host reports a nonsensical sample rate.
pub const DEFAULT_SAMPLE_RATE: f32 = 44_100.0;

/// Fallback when the host has no tempo.
pub const DEFAULT_BPM: f32 = 120.0;

/// Ceiling on any loop gain derived from a decay time.
pub const MAX_LOOP_GAIN: f32 = 0.9999;

/// Replace non-positive or non-finite sample rates with 44.1 kHz.
pub fn sanitize_sample_rate(sample_rate: f32) -> f32 {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        sample_rate
    } else {
        DEFAULT_SAMPLE_RATE
    }
}

/// How the delay time control is interpreted.
#[derive(Enum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelayTimeMode {
    #[default]
    #[id = "ms"]
    #[name = "Milliseconds"]
    Milliseconds,
    #[id = "sync"]
    #[name = "Tempo Sync"]
    TempoSynced,
}

#[derive(Enum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoteDivision {
    #[id = "1-1"]
    #[name = "1/1"]
    Whole,
    #[id = "1-2"]
    #[name = "1/2"]
    Half,
    #[default]
    #[id = "1-4"]
    #[name = "1/4"]
    Quarter,
    #[id = "1-8"]
    #[name = "1/8"]
    Eighth,
    #[id = "1-16"]
    #[name = "1/16"]
    Sixteenth,
}

impl NoteDivision {
    /// Length in quarter notes.
    pub fn beats(self) -> f32 {
        match self {
            NoteDivision::Whole => 4.0,
            NoteDivision::Half => 2.0,
            NoteDivision::Quarter => 1.0,
            NoteDivision::Eighth => 0.5,
            NoteDivision::Sixteenth => 0.25,
        }
    }
}

#[derive(Enum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoteModifier {
    #[default]
    #[id = "straight"]
    #[name = "Straight"]
    Straight,
    #[id = "triplet"]
    #[name = "Triplet"]
    Triplet,
    #[id = "dotted"]
    #[name = "Dotted"]
    Dotted,
}

impl NoteModifier {
    pub fn factor(self) -> f32 {
        match self {
            NoteModifier::Straight => 1.0,
            NoteModifier::Triplet => 2.0 / 3.0,
            NoteModifier::Dotted => 1.5,
        }
    }
}

/// Length of a note value at `bpm`, in seconds.
pub fn synced_delay_seconds(bpm: f32, division: NoteDivision, modifier: NoteModifier) -> f32 {
    let bpm = if bpm.is_finite() && bpm > 0.0 {
        bpm
    } else {
        DEFAULT_BPM
    };
    60.0 / bpm * division.beats() * modifier.factor()
}

/// Delay time in seconds for either mode.
pub fn delay_seconds(
    mode: DelayTimeMode,
    delay_ms: f32,
    bpm: f32,
    division: NoteDivision,
    modifier: NoteModifier,
) -> f32 {
    match mode {
        DelayTimeMode::Milliseconds => delay_ms.max(0.0) / 1000.0,
        DelayTimeMode::TempoSynced => synced_delay_seconds(bpm, division, modifier),
    }
}

/// Per-pass gain of a loop `loop_seconds` long that should decay by 60 dB
/// in `t60_seconds`. Zero (silenced loop) for any non-positive or
/// non-finite input.
pub fn loop_gain_for_t60(loop_seconds: f32, t60_seconds: f32) -> f32 {
    let valid = |t: f32| t.is_finite() && t > 0.0;
    if !valid(loop_seconds) || !valid(t60_seconds) {
        return 0.0;
    }
    10.0_f32
        .powf(-3.0 * loop_seconds / t60_seconds)
        .clamp(0.0, MAX_LOOP_GAIN)
}

/// Inverse of [`loop_gain_for_t60`]: the T60 that gives `gain` per pass.
pub fn t60_for_loop_gain(loop_seconds: f32, gain: f32) -> f32 {
    if !(gain > 0.0 && gain < 1.0) || loop_seconds <= 0.0 {
        return 0.0;
    }
    -3.0 * loop_seconds / gain.log10()
}

/// Discrete quality levels. Continuous "quality" controls jitter depth;
/// the tier decides how many stages and taps run at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl QualityTier {
    pub fn from_quality(quality01: f32) -> Self {
        let q = if quality01.is_finite() { quality01 } else { 0.0 };
        if q < 1.0 / 3.0 {
            QualityTier::Low
        } else if q < 2.0 / 3.0 {
            QualityTier::Medium
        } else {
            QualityTier::High
        }
    }

    pub fn index(self) -> usize {
        match self {
            QualityTier::Low => 0,
            QualityTier::Medium => 1,
            QualityTier::High => 2,
        }
    }

    /// Stages of the all-pass chain when it is the diffusion strategy.
    pub fn chain_stages(self) -> usize {
        match self {
            QualityTier::Low => 2,
            QualityTier::Medium => 4,
            QualityTier::High => 6,
        }
    }

    /// All-pass stages run after the tap cluster.
    pub fn cluster_post_stages(self) -> usize {
        match self {
            QualityTier::Low => 0,
            QualityTier::Medium => 2,
            QualityTier::High => 3,
        }
    }

    /// Taps in the diffusion cluster.
    pub fn cluster_taps(self) -> usize {
        match self {
            QualityTier::Low => 4,
            QualityTier::Medium => 8,
            QualityTier::High => 12,
        }
    }

    /// Scale on the continuous jitter depth. The low tier runs static
    /// stages.
    pub fn jitter_scale(self) -> f32 {
        match self {
            QualityTier::Low => 0.0,
            QualityTier::Medium => 0.5,
            QualityTier::High => 1.0,
        }
    }

    /// Rate of the jitter LFO.
    pub fn jitter_rate_hz(self) -> f32 {
        match self {
            QualityTier::Low => 0.0,
            QualityTier::Medium => 0.35,
            QualityTier::High => 0.6,
        }
    }
}
