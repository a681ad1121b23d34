//! Control-context side of the engine.
//!
//! Two kinds of data cross from the UI/automation thread to the audio
//! thread:
//!
//! - **Scalar targets** ([`EngineParams`]): one atomic per control, stored
//!   and loaded with `Relaxed` ordering. Controls are independent, so no
//!   cross-parameter ordering is needed; the audio thread loads every
//!   target once at the top of a block into a [`BlockParams`] and uses that
//!   copy for the whole block.
//! - **Tap layouts** ([`TapLayout`]): immutable values behind an `Arc`.
//!   The controller pushes a new `Arc` through an SPSC ring; the audio
//!   thread adopts at most one per block and pushes the one it replaced
//!   back through a second ring, so the last reference is dropped by
//!   whoever owns the [`DelayController`].
//!
//! The plugin drives its controller from `process()`, so there both ends
//! of the hand-off run on the audio thread. That is only allocation-free
//! because the plugin publishes nothing but the per-tier layouts, which
//! the controller keeps alive and which are therefore never freed.
//! [`DelayController::publish_layout`] allocates and may free, so it
//! needs a controller owned by a non-audio thread.
//!
//! Structural changes the audio thread can afford to make itself (chain
//! delays, FDN line lengths) are requested through a deferred-rebuild flag
//! that the next block consumes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use nih_plug::prelude::Enum;
use nih_plug::{nih_log, nih_warn};
use rtrb::{Consumer, Producer, RingBuffer};

use super::diffuser::{DiffusionMode, TapLayout};
use crate::dsp::timing::{DelayTimeMode, NoteDivision, NoteModifier, QualityTier, DEFAULT_BPM};

/// Longest delay a setter accepts, in ms. The engine further limits reads
/// to what was prepared.
pub const MAX_DELAY_MS: f32 = 10_000.0;

/// Longest decay time, in seconds.
pub const MAX_FEEDBACK_TIME: f32 = 30.0;

const MIN_BPM: f32 = 20.0;
const MAX_BPM: f32 = 999.0;

/// Snapshots in flight between the two threads.
const LAYOUT_QUEUE_CAPACITY: usize = 8;

/// Clamp into range; non-finite input falls back to `default`.
#[inline]
fn clamp_finite(value: f32, min: f32, max: f32, default: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        default
    }
}

fn store_enum<T: Enum>(slot: &AtomicU32, value: T) {
    slot.store(value.to_index() as u32, Ordering::Relaxed);
}

fn load_enum<T: Enum>(slot: &AtomicU32) -> T {
    let last = T::variants().len().saturating_sub(1);
    T::from_index((slot.load(Ordering::Relaxed) as usize).min(last))
}

/// Atomic targets shared by the controller and the engine.
#[derive(Debug)]
pub struct EngineParams {
    delay_ms: AtomicF32,
    delay_mode: AtomicU32,
    note_division: AtomicU32,
    note_modifier: AtomicU32,
    feedback_time: AtomicF32,

    diffusion_mode: AtomicU32,
    diffusion_amount: AtomicF32,
    diffusion_size: AtomicF32,
    diffusion_quality: AtomicF32,

    mix: AtomicF32,
    lowpass: AtomicF32,
    highpass: AtomicF32,
    damping: AtomicF32,
    filter_pre: AtomicBool,

    duck_amount: AtomicF32,
    duck_attack: AtomicF32,
    duck_release: AtomicF32,

    width: AtomicF32,
    tempo_bpm: AtomicF32,

    rebuild_requested: AtomicBool,
}

/// Plain copy of every target, taken once per block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockParams {
    pub delay_ms: f32,
    pub delay_mode: DelayTimeMode,
    pub note_division: NoteDivision,
    pub note_modifier: NoteModifier,
    /// Seconds for the echoes to decay by 60 dB. Zero disables feedback.
    pub feedback_time: f32,

    pub diffusion_mode: DiffusionMode,
    pub diffusion_amount: f32,
    pub diffusion_size: f32,
    pub diffusion_quality: f32,

    pub mix: f32,
    pub lowpass: f32,
    pub highpass: f32,
    pub damping: f32,
    pub filter_pre: bool,

    pub duck_amount: f32,
    pub duck_attack: f32,
    pub duck_release: f32,

    pub width: f32,
    pub tempo_bpm: f32,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self {
            delay_ms: 400.0,
            delay_mode: DelayTimeMode::Milliseconds,
            note_division: NoteDivision::Quarter,
            note_modifier: NoteModifier::Straight,
            feedback_time: 2.0,
            diffusion_mode: DiffusionMode::AllpassChain,
            diffusion_amount: 0.5,
            diffusion_size: 0.5,
            diffusion_quality: 0.5,
            mix: 0.35,
            lowpass: 0.2,
            highpass: 0.1,
            damping: 0.3,
            filter_pre: false,
            duck_amount: 0.0,
            duck_attack: 0.3,
            duck_release: 0.4,
            width: 0.0,
            tempo_bpm: DEFAULT_BPM,
        }
    }
}

impl Default for EngineParams {
    fn default() -> Self {
        Self::from_values(&BlockParams::default())
    }
}

impl EngineParams {
    pub fn from_values(values: &BlockParams) -> Self {
        Self {
            delay_ms: AtomicF32::new(values.delay_ms),
            delay_mode: AtomicU32::new(values.delay_mode.to_index() as u32),
            note_division: AtomicU32::new(values.note_division.to_index() as u32),
            note_modifier: AtomicU32::new(values.note_modifier.to_index() as u32),
            feedback_time: AtomicF32::new(values.feedback_time),
            diffusion_mode: AtomicU32::new(values.diffusion_mode.to_index() as u32),
            diffusion_amount: AtomicF32::new(values.diffusion_amount),
            diffusion_size: AtomicF32::new(values.diffusion_size),
            diffusion_quality: AtomicF32::new(values.diffusion_quality),
            mix: AtomicF32::new(values.mix),
            lowpass: AtomicF32::new(values.lowpass),
            highpass: AtomicF32::new(values.highpass),
            damping: AtomicF32::new(values.damping),
            filter_pre: AtomicBool::new(values.filter_pre),
            duck_amount: AtomicF32::new(values.duck_amount),
            duck_attack: AtomicF32::new(values.duck_attack),
            duck_release: AtomicF32::new(values.duck_release),
            width: AtomicF32::new(values.width),
            tempo_bpm: AtomicF32::new(values.tempo_bpm),
            rebuild_requested: AtomicBool::new(true),
        }
    }

    /// Load every target. Audio context, once per block.
    pub fn load(&self) -> BlockParams {
        let f = |a: &AtomicF32| a.load(Ordering::Relaxed);
        BlockParams {
            delay_ms: f(&self.delay_ms),
            delay_mode: load_enum(&self.delay_mode),
            note_division: load_enum(&self.note_division),
            note_modifier: load_enum(&self.note_modifier),
            feedback_time: f(&self.feedback_time),
            diffusion_mode: load_enum(&self.diffusion_mode),
            diffusion_amount: f(&self.diffusion_amount),
            diffusion_size: f(&self.diffusion_size),
            diffusion_quality: f(&self.diffusion_quality),
            mix: f(&self.mix),
            lowpass: f(&self.lowpass),
            highpass: f(&self.highpass),
            damping: f(&self.damping),
            filter_pre: self.filter_pre.load(Ordering::Relaxed),
            duck_amount: f(&self.duck_amount),
            duck_attack: f(&self.duck_attack),
            duck_release: f(&self.duck_release),
            width: f(&self.width),
            tempo_bpm: f(&self.tempo_bpm),
        }
    }

    /// Consume the deferred-rebuild flag.
    pub fn take_rebuild_request(&self) -> bool {
        self.rebuild_requested.swap(false, Ordering::Relaxed)
    }

    fn request_rebuild(&self) {
        self.rebuild_requested.store(true, Ordering::Relaxed);
    }
}

/// Audio-side end of the layout hand-off.
pub struct LayoutReceiver {
    incoming: Consumer<Arc<TapLayout>>,
    retire: Producer<Arc<TapLayout>>,
    current: Arc<TapLayout>,
}

impl LayoutReceiver {
    /// Adopt the next published layout, if there is one and the retired
    /// layout can be handed back. Returns whether the layout changed.
    pub fn refresh(&mut self) -> bool {
        if self.retire.is_full() {
            return false;
        }
        match self.incoming.pop() {
            Ok(next) => {
                let previous = std::mem::replace(&mut self.current, next);
                // Checked above: the retire ring has a free slot.
                let _ = self.retire.push(previous);
                true
            }
            Err(_) => false,
        }
    }

    pub fn current(&self) -> &TapLayout {
        &self.current
    }
}

/// Control-context handle: the named setters of the engine.
///
/// No setter fails. Out-of-range values clamp, non-finite values fall back
/// to the control's default.
pub struct DelayController {
    params: Arc<EngineParams>,
    tier_layouts: [Arc<TapLayout>; 3],
    published_tier: QualityTier,
    publisher: Producer<Arc<TapLayout>>,
    retired: Consumer<Arc<TapLayout>>,
}

impl DelayController {
    /// Build the shared targets, the per-tier layouts, and both ends of
    /// the snapshot hand-off.
    pub fn new(initial: BlockParams) -> (Self, Arc<EngineParams>, LayoutReceiver) {
        let params = Arc::new(EngineParams::from_values(&initial));
        let tier_layouts = [QualityTier::Low, QualityTier::Medium, QualityTier::High]
            .map(|tier| Arc::new(TapLayout::clustered(tier.cluster_taps(), tier.index() as u32)));

        let tier = QualityTier::from_quality(initial.diffusion_quality);
        let (publisher, incoming) = RingBuffer::new(LAYOUT_QUEUE_CAPACITY);
        let (retire, retired) = RingBuffer::new(LAYOUT_QUEUE_CAPACITY);

        let receiver = LayoutReceiver {
            incoming,
            retire,
            current: Arc::clone(&tier_layouts[tier.index()]),
        };
        let controller = Self {
            params: Arc::clone(&params),
            tier_layouts,
            published_tier: tier,
            publisher,
            retired,
        };
        (controller, params, receiver)
    }

    pub fn set_delay_ms(&self, ms: f32) {
        let value = clamp_finite(ms, 0.0, MAX_DELAY_MS, BlockParams::default().delay_ms);
        self.params.delay_ms.store(value, Ordering::Relaxed);
    }

    pub fn set_delay_mode(&self, mode: DelayTimeMode) {
        store_enum(&self.params.delay_mode, mode);
    }

    pub fn set_note_division(&self, division: NoteDivision) {
        store_enum(&self.params.note_division, division);
    }

    pub fn set_note_modifier(&self, modifier: NoteModifier) {
        store_enum(&self.params.note_modifier, modifier);
    }

    /// Decay time (T60) of the echoes in seconds; 0 means a single echo.
    pub fn set_feedback_time(&self, seconds: f32) {
        let value = clamp_finite(seconds, 0.0, MAX_FEEDBACK_TIME, 0.0);
        self.params.feedback_time.store(value, Ordering::Relaxed);
    }

    pub fn set_diffusion_mode(&self, mode: DiffusionMode) {
        let previous: DiffusionMode = load_enum(&self.params.diffusion_mode);
        store_enum(&self.params.diffusion_mode, mode);
        if previous != mode {
            self.params.request_rebuild();
        }
    }

    pub fn set_diffusion_amount(&self, amount01: f32) {
        let value = clamp_finite(amount01, 0.0, 1.0, 0.0);
        self.params.diffusion_amount.store(value, Ordering::Relaxed);
    }

    pub fn set_diffusion_size(&self, size01: f32) {
        let value = clamp_finite(size01, 0.0, 1.0, BlockParams::default().diffusion_size);
        let previous = self.params.diffusion_size.swap(value, Ordering::Relaxed);
        if previous != value {
            self.params.request_rebuild();
        }
    }

    /// Quality also picks the tap layout: crossing a tier boundary
    /// publishes that tier's precomputed layout.
    pub fn set_diffusion_quality(&mut self, quality01: f32) {
        let value = clamp_finite(quality01, 0.0, 1.0, BlockParams::default().diffusion_quality);
        let previous = self.params.diffusion_quality.swap(value, Ordering::Relaxed);
        if previous != value {
            self.params.request_rebuild();
        }

        let tier = QualityTier::from_quality(value);
        if tier != self.published_tier {
            let layout = Arc::clone(&self.tier_layouts[tier.index()]);
            if self.push_layout(layout) {
                self.published_tier = tier;
            }
        }
    }

    pub fn set_mix(&self, mix01: f32) {
        let value = clamp_finite(mix01, 0.0, 1.0, BlockParams::default().mix);
        self.params.mix.store(value, Ordering::Relaxed);
    }

    pub fn set_lowpass(&self, amount01: f32) {
        self.params
            .lowpass
            .store(clamp_finite(amount01, 0.0, 1.0, 0.0), Ordering::Relaxed);
    }

    pub fn set_highpass(&self, amount01: f32) {
        self.params
            .highpass
            .store(clamp_finite(amount01, 0.0, 1.0, 0.0), Ordering::Relaxed);
    }

    pub fn set_damping(&self, amount01: f32) {
        self.params
            .damping
            .store(clamp_finite(amount01, 0.0, 1.0, 0.0), Ordering::Relaxed);
    }

    /// `true` filters the signal entering the delay, `false` filters the
    /// wet output.
    pub fn set_filter_pre(&self, pre: bool) {
        self.params.filter_pre.store(pre, Ordering::Relaxed);
    }

    pub fn set_duck_amount(&self, amount01: f32) {
        self.params
            .duck_amount
            .store(clamp_finite(amount01, 0.0, 1.0, 0.0), Ordering::Relaxed);
    }

    pub fn set_duck_attack(&self, attack01: f32) {
        let value = clamp_finite(attack01, 0.0, 1.0, BlockParams::default().duck_attack);
        self.params.duck_attack.store(value, Ordering::Relaxed);
    }

    pub fn set_duck_release(&self, release01: f32) {
        let value = clamp_finite(release01, 0.0, 1.0, BlockParams::default().duck_release);
        self.params.duck_release.store(value, Ordering::Relaxed);
    }

    /// Stereo width of the wet signal, `-1` (mono) to `1` (full Haas).
    pub fn set_width(&self, width: f32) {
        self.params
            .width
            .store(clamp_finite(width, -1.0, 1.0, 0.0), Ordering::Relaxed);
    }

    /// Host tempo, used only in tempo-synced mode.
    pub fn set_tempo(&self, bpm: f32) {
        let value = clamp_finite(bpm, MIN_BPM, MAX_BPM, DEFAULT_BPM);
        self.params.tempo_bpm.store(value, Ordering::Relaxed);
    }

    /// Publish a custom layout. Allocates; call from the control thread.
    ///
    /// Returns `false` if the hand-off queue is full, in which case the
    /// layout is dropped and the audio thread keeps its current one.
    pub fn publish_layout(&mut self, layout: TapLayout) -> bool {
        nih_log!("publishing custom tap layout ({} taps)", layout.taps().len());
        let published = self.push_layout(Arc::new(layout));
        if !published {
            nih_warn!("tap layout queue full, keeping the current layout");
        }
        published
    }

    /// Hand a layout to the audio thread. Publishing one of the tier
    /// layouts only clones an `Arc`, so this path never allocates or frees.
    fn push_layout(&mut self, layout: Arc<TapLayout>) -> bool {
        self.collect_retired();
        self.publisher.push(layout).is_ok()
    }

    /// Drop layouts the audio thread has finished with. Returns how many
    /// were collected.
    ///
    /// Tier layouts stay referenced by the controller, so only custom
    /// layouts are actually freed here.
    pub fn collect_retired(&mut self) -> usize {
        let mut collected = 0;
        while self.retired.pop().is_ok() {
            collected += 1;
        }
        collected
    }
}
