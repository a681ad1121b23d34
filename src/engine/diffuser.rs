//! # Diffusion Strategies
//!
//! The echo read from the main delay line can be smeared three ways:
//!
//! - **Tap cluster**: several taps scattered around the base delay time,
//!   summed with energy-normalized gains, followed by a few all-pass stages
//!   at the higher quality tiers.
//! - **All-pass chain**: the base tap runs through a serial chain of
//!   jittered all-pass stages.
//! - **Feedback network**: the base tap feeds a small FDN whose decaying
//!   output is blended back in.
//!
//! Every strategy crossfades against the plain base tap with the
//! equal-power law, so a diffusion amount of zero returns the base tap
//! unchanged whatever the strategy.

use std::f32::consts::{PI, TAU};

use nih_plug::prelude::Enum;

use super::settings::EngineSettings;
use crate::dsp::allpass::DiffusionChain;
use crate::dsp::delay_line::DelayLine;
use crate::dsp::equal_power_gains;
use crate::dsp::fdn::{mean_line_delay, prime_line_delays, FeedbackDelayNetwork, MAX_LINES};
use crate::dsp::timing::{loop_gain_for_t60, QualityTier};

/// Phase offset between neighbouring stages' jitter LFOs (golden angle),
/// so no two stages wobble in step.
const STAGE_PHASE_SPACING: f32 = 2.399_963;

/// FDN decay at size 0 and the extra decay at size 1, in seconds.
const NETWORK_DECAY_MIN: f32 = 0.3;
const NETWORK_DECAY_RANGE: f32 = 2.7;

/// Which strategy smears the echo.
///
/// The `#[id]` strings are what hosts save in sessions, so they stay fixed
/// even if the display names change.
#[derive(Enum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffusionMode {
    /// Several taps scattered around the base delay. The cheapest mode and
    /// the most "multi-tap" sounding one.
    #[id = "cluster"]
    #[name = "Tap Cluster"]
    TapCluster,
    /// Serial all-pass stages: a dense, smooth smear.
    #[default]
    #[id = "chain"]
    #[name = "All-Pass Chain"]
    AllpassChain,
    /// An 8-line feedback delay network. Adds its own reverberant tail on
    /// top of the echo's decay.
    #[id = "network"]
    #[name = "Feedback Network"]
    FeedbackNetwork,
}

/// One tap of a cluster: where it sits relative to the base delay, as a
/// fraction of the current spread, and how loud it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tap {
    /// In `[-0.5, 0.5]`; negative taps arrive before the base echo.
    pub offset: f32,
    pub gain: f32,
}

/// Immutable tap positions shared between the control and audio threads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TapLayout {
    taps: Vec<Tap>,
}

impl TapLayout {
    /// Build a layout from arbitrary taps. Offsets are clamped into
    /// `[-0.5, 0.5]`, taps are sorted by offset, and gains are scaled so
    /// their squares sum to one.
    pub fn new(mut taps: Vec<Tap>) -> Self {
        taps.retain(|tap| tap.offset.is_finite() && tap.gain.is_finite());
        for tap in &mut taps {
            tap.offset = tap.offset.clamp(-0.5, 0.5);
        }
        taps.sort_by(|a, b| a.offset.total_cmp(&b.offset));

        let energy: f32 = taps.iter().map(|tap| tap.gain * tap.gain).sum();
        if energy > 0.0 {
            let norm = energy.sqrt().recip();
            for tap in &mut taps {
                tap.gain *= norm;
            }
        }
        Self { taps }
    }

    /// `count` taps spread evenly across the window with a little
    /// deterministic jitter, tapered towards the edges.
    pub fn clustered(count: usize, seed: u32) -> Self {
        let mut rng = XorShift::new(seed);
        let taps = (0..count)
            .map(|i| {
                let offset = if count > 1 {
                    let centre = -0.5 + i as f32 / (count - 1) as f32;
                    let jitter = (rng.next_f32() - 0.5) * 0.5 / count as f32;
                    centre + jitter
                } else {
                    0.0
                };
                let gain = 1.0 - offset.abs().min(0.5);
                Tap { offset, gain }
            })
            .collect();
        Self::new(taps)
    }

    pub fn taps(&self) -> &[Tap] {
        &self.taps
    }
}

/// Tiny xorshift generator for reproducible layouts.
struct XorShift(u32);

impl XorShift {
    fn new(seed: u32) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9) | 1)
    }

    fn next_f32(&mut self) -> f32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        (x >> 8) as f32 / (1u32 << 24) as f32
    }
}

/// Block-constant configuration shared by every strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffuserConfig {
    pub sample_rate: f32,
    pub size: f32,
    pub quality: f32,
    pub tier: QualityTier,
    /// One-pole coefficient for the network's line damping; `1.0` is off.
    pub damping_alpha: f32,
}

/// Per-sample input to a strategy.
pub struct DiffuseInput<'a> {
    /// The channel's main delay line, not yet written this sample.
    pub line: &'a DelayLine,
    pub base_delay: f32,
    pub base_tap: f32,
    /// Current cluster width in samples.
    pub spread_samples: f32,
    pub amount: f32,
    pub layout: &'a TapLayout,
}

/// A diffusion strategy.
///
/// Each channel owns one instance of every strategy (see [`DiffuserBank`]).
/// The engine calls [`prepare`](Self::prepare) from the control side,
/// [`configure`](Self::configure) at the top of a block whenever the
/// structural settings change, and [`process`](Self::process) once per
/// sample. Only `prepare` may allocate.
///
/// `process` receives the base tap and returns the diffused echo. With an
/// `amount` of zero it must return the base tap unchanged.
pub trait Diffuser {
    /// Allocate buffers. Control context only.
    fn prepare(&mut self, sample_rate: f32, settings: &EngineSettings);

    /// Apply block-constant settings. Must not allocate.
    fn configure(&mut self, config: &DiffuserConfig);

    fn process(&mut self, input: &DiffuseInput) -> f32;

    /// Clear all state without reallocating.
    fn reset(&mut self);
}

/// Slow sine driving the all-pass jitter.
#[derive(Debug, Clone, Copy, Default)]
struct JitterLfo {
    phase: f32,
    step: f32,
}

impl JitterLfo {
    fn configure(&mut self, sample_rate: f32, tier: QualityTier) {
        self.step = TAU * tier.jitter_rate_hz() / sample_rate;
    }

    #[inline]
    fn advance(&mut self) -> f32 {
        let phase = self.phase;
        self.phase += self.step;
        if self.phase > PI {
            self.phase -= TAU;
        }
        phase
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// Tap cluster followed, at the higher tiers, by a short all-pass chain.
#[derive(Debug, Clone, Default)]
pub struct ClusterDiffuser {
    post: DiffusionChain,
    lfo: JitterLfo,
}

impl Diffuser for ClusterDiffuser {
    fn prepare(&mut self, sample_rate: f32, settings: &EngineSettings) {
        self.post.prepare(
            settings.allpass_stage_capacity,
            settings.allpass_stage_samples(sample_rate),
        );
        self.lfo.reset();
    }

    fn configure(&mut self, config: &DiffuserConfig) {
        self.post.configure(
            config.sample_rate,
            config.size,
            config.quality * config.tier.jitter_scale(),
        );
        self.post.set_active_stages(config.tier.cluster_post_stages());
        self.lfo.configure(config.sample_rate, config.tier);
    }

    #[inline]
    fn process(&mut self, input: &DiffuseInput) -> f32 {
        let max_delay = input.line.max_delay().max(1.0);
        let cluster: f32 = input
            .layout
            .taps()
            .iter()
            .map(|tap| {
                let delay = (input.base_delay + tap.offset * input.spread_samples).clamp(1.0, max_delay);
                tap.gain * input.line.read(delay)
            })
            .sum();

        let (dry, wet) = equal_power_gains(input.amount);
        let blended = dry * input.base_tap + wet * cluster;

        let phase = self.lfo.advance();
        if self.post.active_stages() > 0 {
            self.post
                .process_chain_sample(blended, input.amount, phase, STAGE_PHASE_SPACING)
        } else {
            blended
        }
    }

    fn reset(&mut self) {
        self.post.reset();
        self.lfo.reset();
    }
}

#[derive(Debug, Clone, Default)]
pub struct AllpassDiffuser {
    chain: DiffusionChain,
    lfo: JitterLfo,
}

impl Diffuser for AllpassDiffuser {
    fn prepare(&mut self, sample_rate: f32, settings: &EngineSettings) {
        self.chain.prepare(
            settings.allpass_stage_capacity,
            settings.allpass_stage_samples(sample_rate),
        );
        self.lfo.reset();
    }

    fn configure(&mut self, config: &DiffuserConfig) {
        self.chain.configure(
            config.sample_rate,
            config.size,
            config.quality * config.tier.jitter_scale(),
        );
        self.chain.set_active_stages(config.tier.chain_stages());
        self.lfo.configure(config.sample_rate, config.tier);
    }

    #[inline]
    fn process(&mut self, input: &DiffuseInput) -> f32 {
        let phase = self.lfo.advance();
        self.chain
            .process_chain_sample(input.base_tap, input.amount, phase, STAGE_PHASE_SPACING)
    }

    fn reset(&mut self) {
        self.chain.reset();
        self.lfo.reset();
    }
}

/// FDN fed by the base tap. Lines have prime lengths set by size and
/// alternate output polarity so the sum doesn't collapse to the mean.
#[derive(Debug, Clone, Default)]
pub struct NetworkDiffuser {
    network: FeedbackDelayNetwork,
    delays: [f32; MAX_LINES],
}

impl Diffuser for NetworkDiffuser {
    fn prepare(&mut self, sample_rate: f32, settings: &EngineSettings) {
        self.network
            .prepare(settings.fdn_lines, settings.fdn_line_samples(sample_rate) + 2);

        let count = self.network.line_count();
        let gains: [f32; MAX_LINES] =
            std::array::from_fn(|i| if i % 2 == 0 { 1.0 } else { -1.0 });
        self.network.set_line_output_gains(&gains[..count]);
    }

    fn configure(&mut self, config: &DiffuserConfig) {
        let count = self.network.line_count();
        let delays = &mut self.delays[..count];
        prime_line_delays(config.sample_rate, config.size, delays);
        // Line lengths move in whole primes; leave them alone unless the
        // set actually changed so small size moves don't jump the taps.
        if self.network.line_delays() != &delays[..] {
            self.network.set_line_delays(delays);
        }

        let loop_seconds = mean_line_delay(delays) / config.sample_rate;
        let decay = network_decay_seconds(config.size);
        self.network.set_feedback_gain(loop_gain_for_t60(loop_seconds, decay));
        self.network.set_damping_alpha(config.damping_alpha);
    }

    #[inline]
    fn process(&mut self, input: &DiffuseInput) -> f32 {
        let wet = self.network.process_sample(input.base_tap, 1.0);
        let (dry, wet_gain) = equal_power_gains(input.amount);
        dry * input.base_tap + wet_gain * wet
    }

    fn reset(&mut self) {
        self.network.reset();
    }
}

/// Decay time of the network's own tail.
pub fn network_decay_seconds(size01: f32) -> f32 {
    NETWORK_DECAY_MIN + NETWORK_DECAY_RANGE * size01.clamp(0.0, 1.0)
}

/// One instance of every strategy, so switching never allocates.
#[derive(Debug, Clone, Default)]
pub struct DiffuserBank {
    cluster: ClusterDiffuser,
    chain: AllpassDiffuser,
    network: NetworkDiffuser,
}

impl DiffuserBank {
    pub fn prepare(&mut self, sample_rate: f32, settings: &EngineSettings) {
        for diffuser in self.all_mut() {
            diffuser.prepare(sample_rate, settings);
        }
    }

    pub fn select(&mut self, mode: DiffusionMode) -> &mut dyn Diffuser {
        match mode {
            DiffusionMode::TapCluster => &mut self.cluster,
            DiffusionMode::AllpassChain => &mut self.chain,
            DiffusionMode::FeedbackNetwork => &mut self.network,
        }
    }

    pub fn reset(&mut self) {
        for diffuser in self.all_mut() {
            diffuser.reset();
        }
    }

    fn all_mut(&mut self) -> [&mut dyn Diffuser; 3] {
        [&mut self.cluster, &mut self.chain, &mut self.network]
    }
}
