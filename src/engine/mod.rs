//! # The Diffusion Delay Engine
//!
//! Host-independent core: everything the plugin does to audio happens in
//! [`DiffusionDelay::process_block`].
//!
//! ## Signal Flow (per channel, per sample)
//!
//! ```text
//! x ──┬──► [pre-filter?] ──►(+)──► [delay line] ──► base tap ──┬──► [diffuser]
//!     │                      ▲                                 │        │
//!     │                      └── clamp ◄── × loop gain ◄── [damping]    │
//!     │                                                                 │
//!     ├──► [duck envelope] ─────────────────────► × duck gain ◄─────────┘
//!     │                                                 │
//!     │                                          [post-filter?]
//!     │                                                 │
//!     │                                       [stereo width, L/R]
//!     │                                                 │
//!     └──── × dry ─────────────────────────►(+)◄──── × wet
//! ```
//!
//! The base tap is read before this sample is written, so a delay of `D`
//! samples returns `x[n - D]`. The smallest usable delay is one sample.
//!
//! Only the base tap is fed back. A diffuser's gain can exceed one at some
//! frequencies, and inside the loop that makes the echoes grow. With the
//! base tap in the loop the loop gain is exactly `10^(-3·delay/T60)`, and
//! every repeat is diffused afresh on its way to the output.
//!
//! ## Lifecycle
//!
//! Unprepared → Prepared → Processing. Until
//! [`prepare_to_play`](DiffusionDelay::prepare_to_play) has run, blocks
//! pass through untouched. [`reset`](DiffusionDelay::reset) clears every
//! buffer without reallocating.

pub mod control;
pub mod diffuser;
pub mod settings;

use std::sync::Arc;

use nih_plug::nih_log;

use crate::dsp::delay_line::DelayLine;
use crate::dsp::ducking::{
    compute_attack_release_alphas, compute_duck_gain, DuckingDetector, DEFAULT_MAX_ATTENUATION_DB,
};
use crate::dsp::filter::{
    damping_amount_to_alpha, highpass_amount_to_alpha, lowpass_amount_to_alpha, OnePoleFilter,
};
use crate::dsp::smoother::{Smoother, DELAY_TIME_COEFF, SIZE_COEFF};
use crate::dsp::timing::{delay_seconds, loop_gain_for_t60, sanitize_sample_rate, QualityTier};
use crate::dsp::widener::HaasWidener;
use crate::dsp::{equal_power_gains, flush_denormal};

use control::{BlockParams, DelayController, EngineParams, LayoutReceiver, MAX_DELAY_MS};
use diffuser::{network_decay_seconds, DiffuseInput, DiffuserBank, DiffuserConfig, DiffusionMode};
use settings::{ms_to_samples, EngineSettings};

/// Feedback is clamped to this magnitude before it re-enters the line.
const FEEDBACK_CLAMP: f32 = 4.0;

/// Headroom used when the host asks for a nonsensical maximum delay.
const DEFAULT_MAX_DELAY_SECONDS: f32 = 2.0;

/// Everything one channel owns.
#[derive(Debug, Clone, Default)]
struct ChannelState {
    line: DelayLine,
    diffusers: DiffuserBank,
    lowpass: OnePoleFilter,
    highpass: OnePoleFilter,
    damper: OnePoleFilter,
    ducker: DuckingDetector,

    // Current frame, kept between the channel pass and the stereo pass.
    dry: f32,
    wet: f32,
}

impl ChannelState {
    fn prepare(&mut self, buffer_samples: usize, sample_rate: f32, settings: &EngineSettings) {
        self.line.prepare(buffer_samples);
        self.diffusers.prepare(sample_rate, settings);
        self.reset();
    }

    /// Highpass then lowpass; an alpha of `None` skips that filter.
    #[inline]
    fn tone(&mut self, x: f32, lowpass: Option<f32>, highpass: Option<f32>) -> f32 {
        let mut y = x;
        if let Some(alpha) = highpass {
            y = self.highpass.process_highpass(y, alpha);
        }
        if let Some(alpha) = lowpass {
            y = self.lowpass.process_lowpass(y, alpha);
        }
        y
    }

    fn reset_tone(&mut self) {
        self.lowpass.reset();
        self.highpass.reset();
    }

    fn reset(&mut self) {
        self.line.reset();
        self.diffusers.reset();
        self.reset_tone();
        self.damper.reset();
        self.ducker.reset();
        self.dry = 0.0;
        self.wet = 0.0;
    }
}

/// The host-independent diffused delay.
///
/// Owns every buffer the effect needs, sized once by
/// [`prepare_to_play`](Self::prepare_to_play) and
/// [`prepare_channels`](Self::prepare_channels). Controls arrive through the
/// [`DelayController`] returned by [`new`](Self::new): scalar targets are
/// read once per block, delay time and size are smoothed per sample, and
/// tap layouts are adopted at block boundaries.
///
/// Per channel the engine keeps a main delay line, one instance of every
/// diffusion strategy, the tone and damping filters and a ducking detector.
/// The stereo widener is shared by the first two channels.
pub struct DiffusionDelay {
    settings: EngineSettings,
    params: Arc<EngineParams>,
    layouts: LayoutReceiver,

    prepared: bool,
    sample_rate: f32,
    max_delay_seconds: f32,
    buffer_samples: usize,
    max_spread_samples: f32,

    channel_count: usize,
    channels: Vec<ChannelState>,
    widener: HaasWidener,

    delay_smoother: Smoother,
    size_smoother: Smoother,
    /// Snap the smoothers onto their targets at the next block.
    snap_smoothers: bool,

    diffusion_mode: DiffusionMode,
    filter_pre: bool,
    diffuser_config: Option<DiffuserConfig>,
    tail_samples: u32,
}

impl DiffusionDelay {
    /// Build an unprepared engine with default controls and the handle
    /// that changes them.
    pub fn new(settings: EngineSettings) -> (Self, DelayController) {
        Self::with_params(settings, BlockParams::default())
    }

    /// Like [`new`](Self::new), starting from `initial` instead of the
    /// defaults.
    pub fn with_params(settings: EngineSettings, initial: BlockParams) -> (Self, DelayController) {
        let (controller, params, layouts) = DelayController::new(initial);
        let engine = Self {
            settings,
            params,
            layouts,
            prepared: false,
            sample_rate: sanitize_sample_rate(0.0),
            max_delay_seconds: DEFAULT_MAX_DELAY_SECONDS,
            buffer_samples: 0,
            max_spread_samples: 0.0,
            channel_count: 0,
            channels: Vec::new(),
            widener: HaasWidener::new(),
            delay_smoother: Smoother::new(0.0, DELAY_TIME_COEFF),
            size_smoother: Smoother::new(initial.diffusion_size, SIZE_COEFF),
            snap_smoothers: true,
            diffusion_mode: initial.diffusion_mode,
            filter_pre: initial.filter_pre,
            diffuser_config: None,
            tail_samples: 0,
        };
        (engine, controller)
    }

    /// Allocate every buffer for `sample_rate` and delays up to
    /// `max_delay_seconds`. Control context only.
    pub fn prepare_to_play(&mut self, sample_rate: f32, max_delay_seconds: f32) {
        let sample_rate = sanitize_sample_rate(sample_rate);
        let max_delay_seconds = if max_delay_seconds.is_finite() && max_delay_seconds > 0.0 {
            max_delay_seconds.min(MAX_DELAY_MS / 1000.0)
        } else {
            DEFAULT_MAX_DELAY_SECONDS
        };

        self.sample_rate = sample_rate;
        self.max_delay_seconds = max_delay_seconds;
        self.buffer_samples = self.settings.delay_buffer_samples(sample_rate, max_delay_seconds);
        self.max_spread_samples = ms_to_samples(self.settings.max_spread_ms, sample_rate) as f32;
        self.widener.prepare(self.settings.haas_samples(sample_rate));

        self.channels
            .resize_with(self.channel_count, ChannelState::default);
        for channel in &mut self.channels {
            channel.prepare(self.buffer_samples, sample_rate, &self.settings);
        }

        self.prepared = true;
        self.reset();

        nih_log!(
            "prepared diffusion delay: {sample_rate} Hz, {max_delay_seconds} s max, \
             {} samples per line, {} channel(s)",
            self.buffer_samples,
            self.channels.len()
        );
    }

    /// Make room for `count` channels. Control context only; blocks with
    /// more channels than this leave the extra channels untouched.
    pub fn prepare_channels(&mut self, count: usize) {
        self.channel_count = count;
        if !self.prepared {
            return;
        }

        let previous = self.channels.len();
        self.channels.resize_with(count, ChannelState::default);
        for channel in self.channels.iter_mut().skip(previous) {
            channel.prepare(self.buffer_samples, self.sample_rate, &self.settings);
        }
        // New channels must be configured before they run.
        self.diffuser_config = None;
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn prepared_channels(&self) -> usize {
        self.channels.len()
    }

    /// Clear all audible state. The next block starts from silence with
    /// the smoothers already at their targets.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
        self.widener.reset();
        self.snap_smoothers = true;
        self.diffuser_config = None;
    }

    /// How long the output keeps ringing after the input stops, as of the
    /// last block.
    pub fn tail_samples(&self) -> u32 {
        self.tail_samples
    }

    /// Process one block in place. `channels` holds one slice per channel.
    pub fn process_block(&mut self, channels: &mut [&mut [f32]]) {
        if !self.prepared || self.channels.is_empty() {
            return;
        }

        let fs = self.sample_rate;
        let p = self.params.load();
        self.layouts.refresh();
        let rebuild = self.params.take_rebuild_request();

        let target_seconds = delay_seconds(
            p.delay_mode,
            p.delay_ms,
            p.tempo_bpm,
            p.note_division,
            p.note_modifier,
        );
        let max_base_delay = (self.max_delay_seconds * fs).max(1.0);
        let target_delay = (target_seconds * fs).clamp(1.0, max_base_delay);
        self.delay_smoother.set_target(target_delay);
        self.size_smoother.set_target(p.diffusion_size);
        if self.snap_smoothers {
            self.delay_smoother.snap_to_target();
            self.size_smoother.snap_to_target();
            self.snap_smoothers = false;
        }

        let (dry_gain, wet_gain) = equal_power_gains(p.mix);
        let lowpass = (p.lowpass > 0.0).then(|| lowpass_amount_to_alpha(fs, p.lowpass));
        let highpass = (p.highpass > 0.0).then(|| highpass_amount_to_alpha(fs, p.highpass));
        let damping =
            (p.damping > 0.0).then(|| damping_amount_to_alpha(fs, p.damping, p.diffusion_quality));
        let ducking = p.duck_amount > 0.0;
        let (attack_alpha, release_alpha) =
            compute_attack_release_alphas(fs, p.duck_attack, p.duck_release);
        let loop_gain = loop_gain_for_t60(target_delay / fs, p.feedback_time);

        if p.filter_pre != self.filter_pre {
            for channel in &mut self.channels {
                channel.reset_tone();
            }
            self.filter_pre = p.filter_pre;
        }

        let mode = p.diffusion_mode;
        let mode_changed = mode != self.diffusion_mode;
        if mode_changed {
            for channel in &mut self.channels {
                channel.diffusers.select(mode).reset();
            }
            self.diffusion_mode = mode;
        }

        // Structural settings follow the size target, not the smoothed
        // value, so a size change reconfigures once instead of every block
        // while the smoother glides. The smoothed size still drives the
        // cluster spread per sample.
        let config = DiffuserConfig {
            sample_rate: fs,
            size: self.size_smoother.target(),
            quality: p.diffusion_quality,
            tier: QualityTier::from_quality(p.diffusion_quality),
            damping_alpha: damping.unwrap_or(1.0),
        };
        if rebuild || mode_changed || self.diffuser_config != Some(config) {
            for channel in &mut self.channels {
                channel.diffusers.select(mode).configure(&config);
            }
            self.diffuser_config = Some(config);
        }

        let active = channels.len().min(self.channels.len());
        let block_len = channels[..active]
            .iter()
            .map(|samples| samples.len())
            .min()
            .unwrap_or(0);
        let layout = self.layouts.current();

        for i in 0..block_len {
            let delay = self.delay_smoother.next();
            let spread = self.size_smoother.next() * self.max_spread_samples;

            for (channel, samples) in self.channels.iter_mut().zip(channels.iter()) {
                let x = samples[i];
                channel.dry = x;

                let input = if self.filter_pre {
                    channel.tone(x, lowpass, highpass)
                } else {
                    x
                };

                let base_tap = channel.line.read(delay);
                let diffused = channel.diffusers.select(mode).process(&DiffuseInput {
                    line: &channel.line,
                    base_delay: delay,
                    base_tap,
                    spread_samples: spread,
                    amount: p.diffusion_amount,
                    layout,
                });

                let damped = match damping {
                    Some(alpha) => channel.damper.process_lowpass(base_tap, alpha),
                    None => base_tap,
                };
                let feedback =
                    flush_denormal((damped * loop_gain).clamp(-FEEDBACK_CLAMP, FEEDBACK_CLAMP));
                channel.line.push(input + feedback);

                // The detector always follows the input so that switching
                // ducking on applies the current level, not a stale one.
                let envelope = channel.ducker.process_sample(x, attack_alpha, release_alpha);
                let mut wet = diffused;
                if ducking {
                    wet *= compute_duck_gain(envelope, p.duck_amount, DEFAULT_MAX_ATTENUATION_DB);
                }
                if !self.filter_pre {
                    wet = channel.tone(wet, lowpass, highpass);
                }
                channel.wet = wet;
            }

            if let [left, right, ..] = &mut self.channels[..active] {
                let (l, r) = self.widener.process(left.wet, right.wet, p.width);
                left.wet = l;
                right.wet = r;
            }

            for (channel, samples) in self.channels.iter().zip(channels.iter_mut()) {
                samples[i] = channel.dry * dry_gain + channel.wet * wet_gain;
            }
        }

        self.tail_samples = self.compute_tail(&p, target_delay, loop_gain);
    }

    fn compute_tail(&self, p: &BlockParams, delay_samples: f32, loop_gain: f32) -> u32 {
        let fs = self.sample_rate;
        let echoes = if loop_gain > 0.0 {
            delay_samples + p.feedback_time * fs
        } else {
            delay_samples
        };
        let diffusion = match p.diffusion_mode {
            DiffusionMode::FeedbackNetwork => network_decay_seconds(p.diffusion_size) * fs,
            DiffusionMode::TapCluster | DiffusionMode::AllpassChain => {
                self.max_spread_samples
                    + (self.settings.allpass_stage_capacity
                        * self.settings.allpass_stage_samples(fs)) as f32
            }
        };
        let widener = self.widener.max_delay_samples() as f32;
        (echoes + diffusion + widener).min(u32::MAX as f32) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::timing::{DelayTimeMode, NoteDivision, NoteModifier};

    const FS: f32 = 48000.0;

    /// Everything neutral except the delay itself.
    fn plain_delay(delay_ms: f32) -> BlockParams {
        BlockParams {
            delay_ms,
            feedback_time: 0.0,
            diffusion_amount: 0.0,
            mix: 1.0,
            lowpass: 0.0,
            highpass: 0.0,
            damping: 0.0,
            duck_amount: 0.0,
            width: 0.0,
            ..BlockParams::default()
        }
    }

    fn prepared(initial: BlockParams, channels: usize) -> (DiffusionDelay, DelayController) {
        let (mut engine, controller) = DiffusionDelay::with_params(EngineSettings::default(), initial);
        engine.prepare_channels(channels);
        engine.prepare_to_play(FS, 1.0);
        (engine, controller)
    }

    fn run(engine: &mut DiffusionDelay, input: &[Vec<f32>], block: usize) -> Vec<Vec<f32>> {
        let mut output: Vec<Vec<f32>> = input.to_vec();
        let len = input[0].len();
        let mut start = 0;
        while start < len {
            let end = (start + block).min(len);
            let mut slices: Vec<&mut [f32]> =
                output.iter_mut().map(|ch| &mut ch[start..end]).collect();
            engine.process_block(&mut slices);
            start = end;
        }
        output
    }

    fn impulse(len: usize) -> Vec<f32> {
        let mut signal = vec![0.0; len];
        signal[0] = 1.0;
        signal
    }

    fn noise(len: usize, seed: u32) -> Vec<f32> {
        let mut state = seed | 1;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state >> 8) as f32 / (1u32 << 23) as f32 - 1.0
            })
            .collect()
    }

    #[test]
    fn test_unprepared_engine_passes_audio_through() {
        let (mut engine, _controller) = DiffusionDelay::new(EngineSettings::default());
        let input = vec![noise(256, 1), noise(256, 2)];
        let output = run(&mut engine, &input, 64);
        assert_eq!(output, input);
        assert_eq!(engine.tail_samples(), 0);
    }

    #[test]
    fn test_extra_channels_are_left_untouched() {
        let (mut engine, _controller) = prepared(plain_delay(10.0), 2);
        let input = vec![noise(512, 1), noise(512, 2), noise(512, 3)];
        let output = run(&mut engine, &input, 128);
        assert_eq!(output[2], input[2]);
        assert_ne!(output[0], input[0]);
    }

    #[test]
    fn test_channels_added_after_prepare_get_buffers() {
        let (mut engine, _controller) = prepared(plain_delay(1.0), 1);
        engine.prepare_channels(2);
        assert_eq!(engine.prepared_channels(), 2);

        let input = vec![impulse(100), impulse(100)];
        let output = run(&mut engine, &input, 100);
        let delay = ms_to_samples(1.0, FS);
        assert!((output[1][delay] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_plain_delay_moves_the_impulse() {
        let (mut engine, _controller) = prepared(plain_delay(10.0), 1);
        let output = run(&mut engine, &[impulse(2000)], 256);
        let delay = 480;
        for (n, &y) in output[0].iter().enumerate() {
            let expected = if n == delay { 1.0 } else { 0.0 };
            assert!((y - expected).abs() < 1e-5, "sample {n}: {y}");
        }
    }

    #[test]
    fn test_tempo_sync_uses_host_tempo() {
        let (mut engine, controller) = prepared(plain_delay(10.0), 1);
        controller.set_delay_mode(DelayTimeMode::TempoSynced);
        controller.set_note_division(NoteDivision::Sixteenth);
        controller.set_note_modifier(NoteModifier::Straight);
        controller.set_tempo(240.0);

        // 1/16 at 240 bpm = 62.5 ms
        let output = run(&mut engine, &[impulse(4000)], 512);
        assert!((output[0][3000] - 1.0).abs() < 1e-5, "got {}", output[0][3000]);
    }

    #[test]
    fn test_reset_leaves_no_residual_state() {
        let initial = BlockParams {
            delay_ms: 30.0,
            feedback_time: 8.0,
            diffusion_amount: 0.8,
            damping: 0.4,
            lowpass: 0.3,
            highpass: 0.2,
            duck_amount: 0.5,
            width: 0.7,
            ..BlockParams::default()
        };
        for mode in [
            DiffusionMode::TapCluster,
            DiffusionMode::AllpassChain,
            DiffusionMode::FeedbackNetwork,
        ] {
            let (mut engine, controller) = prepared(initial, 2);
            controller.set_diffusion_mode(mode);
            run(&mut engine, &[noise(8000, 5), noise(8000, 6)], 256);

            engine.reset();
            let silence = vec![vec![0.0; 8000], vec![0.0; 8000]];
            let output = run(&mut engine, &silence, 256);
            assert!(
                output.iter().flatten().all(|&y| y == 0.0),
                "{mode:?} still rang after reset"
            );
        }
    }

    /// With no feedback the tone filters and the delay are both linear and
    /// time-invariant, so filtering before or after the line sounds the same.
    #[test]
    fn test_pre_and_post_filtering_agree_without_feedback() {
        let params = BlockParams {
            lowpass: 0.6,
            highpass: 0.3,
            ..plain_delay(5.0)
        };
        let input = vec![noise(4000, 9)];

        let (mut post_engine, _c1) = prepared(params, 1);
        let post = run(&mut post_engine, &input, 200);

        let (mut pre_engine, _c2) = prepared(
            BlockParams {
                filter_pre: true,
                ..params
            },
            1,
        );
        let pre = run(&mut pre_engine, &input, 200);

        for (n, (a, b)) in post[0].iter().zip(&pre[0]).enumerate() {
            assert!((a - b).abs() < 1e-4, "sample {n}: post {a}, pre {b}");
        }
    }

    #[test]
    fn test_feedback_produces_a_tail_and_reports_it() {
        let params = BlockParams {
            feedback_time: 2.0,
            ..plain_delay(100.0)
        };
        let (mut engine, _controller) = prepared(params, 1);
        let output = run(&mut engine, &[impulse(20_000)], 512);
        assert!(output[0][4800].abs() > 0.9);
        assert!(output[0][9600].abs() > 0.1, "second echo missing");
        assert!(engine.tail_samples() as f32 >= 2.0 * FS);
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, y| m.max(y.abs()))
    }

    /// Diffused repeats die away on the feedback time's schedule: two T60s
    /// after the impulse the output is far below -60 dB of the first echo,
    /// whatever the strategy, tier or amount.
    #[test]
    fn test_diffused_echoes_decay_by_their_t60() {
        let t60 = 1.0;
        let delay = (0.1 * FS) as usize;
        let len = (2.0 * t60 * FS) as usize + delay;

        for mode in [
            DiffusionMode::TapCluster,
            DiffusionMode::AllpassChain,
            DiffusionMode::FeedbackNetwork,
        ] {
            for quality in [0.0, 0.5, 1.0] {
                for amount in [0.5, 1.0] {
                    let params = BlockParams {
                        feedback_time: t60,
                        diffusion_mode: mode,
                        diffusion_amount: amount,
                        diffusion_size: 0.2,
                        diffusion_quality: quality,
                        ..plain_delay(100.0)
                    };
                    let (mut engine, _controller) = prepared(params, 1);
                    let output = run(&mut engine, &[impulse(len)], 480);
                    let channel = &output[0];

                    let first = peak(&channel[delay..2 * delay]);
                    let late = peak(&channel[(2.0 * t60 * FS) as usize..]);
                    assert!(first > 0.01, "{mode:?} q{quality} a{amount}: no echo");
                    assert!(
                        late < first * 1e-3,
                        "{mode:?} q{quality} a{amount}: first {first}, after 2·T60 {late}"
                    );
                }
            }
        }
    }

    /// Under the longest decay and full diffusion nothing gets near the
    /// feedback clamp.
    #[test]
    fn test_long_feedback_stays_near_input_level() {
        let params = BlockParams {
            feedback_time: control::MAX_FEEDBACK_TIME,
            diffusion_amount: 1.0,
            diffusion_size: 1.0,
            diffusion_quality: 1.0,
            width: 1.0,
            ..plain_delay(20.0)
        };
        for mode in [
            DiffusionMode::TapCluster,
            DiffusionMode::AllpassChain,
            DiffusionMode::FeedbackNetwork,
        ] {
            let (mut engine, controller) = prepared(params, 2);
            controller.set_diffusion_mode(mode);
            let mut input = vec![impulse(48_000), impulse(48_000)];
            input[1][0] = -1.0;
            let output = run(&mut engine, &input, 480);

            // The repeats never exceed the impulse, so even the loudest
            // diffuser keeps the output well inside the clamp.
            let level = output.iter().map(|ch| peak(ch)).fold(0.0f32, f32::max);
            assert!(level.is_finite(), "{mode:?} produced {level}");
            assert!(level < FEEDBACK_CLAMP, "{mode:?} reached {level}");
        }
    }

    #[test]
    fn test_size_change_configures_once_at_its_target() {
        let (mut engine, controller) = prepared(
            BlockParams {
                diffusion_amount: 1.0,
                diffusion_size: 0.1,
                ..plain_delay(50.0)
            },
            1,
        );
        run(&mut engine, &[noise(1024, 4)], 256);

        controller.set_diffusion_size(0.9);
        for _ in 0..4 {
            run(&mut engine, &[noise(256, 8)], 256);
            assert!(!engine.size_smoother.is_settled());
            assert_eq!(engine.diffuser_config.map(|c| c.size), Some(0.9));
        }
    }

    #[test]
    fn test_ducking_follows_the_input_while_disabled() {
        let (mut engine, controller) = prepared(
            BlockParams {
                duck_amount: 1.0,
                ..plain_delay(10.0)
            },
            1,
        );
        run(&mut engine, &[noise(24_000, 13)], 480);
        assert!(engine.channels[0].ducker.envelope() > 0.5);

        // Silence with ducking off still lets the envelope release, so
        // turning ducking back on does not start from the old level.
        controller.set_duck_amount(0.0);
        run(&mut engine, &[vec![0.0; 144_000]], 480);
        assert!(engine.channels[0].ducker.envelope() < 1e-3);

        controller.set_duck_amount(1.0);
        let output = run(&mut engine, &[impulse(1000)], 1000);
        assert!(output[0][480] > 0.9, "echo ducked by a stale envelope: {}", output[0][480]);
    }

    #[test]
    fn test_switching_modes_mid_stream_is_clean() {
        let (mut engine, controller) = prepared(
            BlockParams {
                diffusion_amount: 0.7,
                feedback_time: 3.0,
                ..plain_delay(50.0)
            },
            2,
        );
        let input = vec![noise(4096, 21), noise(4096, 22)];
        for mode in [
            DiffusionMode::FeedbackNetwork,
            DiffusionMode::TapCluster,
            DiffusionMode::AllpassChain,
        ] {
            controller.set_diffusion_mode(mode);
            let output = run(&mut engine, &input, 256);
            assert!(output.iter().flatten().all(|y| y.is_finite()));
        }
    }

    #[test]
    fn test_bad_prepare_arguments_fall_back() {
        let (mut engine, _controller) = DiffusionDelay::new(EngineSettings::default());
        engine.prepare_channels(1);
        engine.prepare_to_play(-1.0, f32::NAN);
        assert!(engine.is_prepared());
        assert_eq!(engine.sample_rate(), sanitize_sample_rate(-1.0));
        let output = run(&mut engine, &[noise(1024, 3)], 128);
        assert!(output[0].iter().all(|y| y.is_finite()));
    }
}
