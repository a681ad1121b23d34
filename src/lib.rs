//! # Loveless Diffusion Delay: An AU/VST3/CLAP Diffused Delay Plugin
//!
//! A delay whose echoes can be smeared into a reverb-like cloud, built
//! with [nih-plug](https://github.com/robbert-vdh/nih-plug). Outputs Audio
//! Unit (AUv2), VST3, and CLAP formats from a single codebase.
//!
//! The plugin itself is thin glue: it forwards parameter values and host
//! tempo to a [`DelayController`], then hands the audio buffer to the
//! host-independent [`DiffusionDelay`] engine.
//!
//! ## Signal Flow
//!
//! ```text
//! Input ──┬──────────────────────────────────────────────────────── × dry ──┐
//!         │                                                                 │
//!         │   ┌────── FEEDBACK LOOP ───────────────────┐                    │
//!         │   │                                        │                    │
//!         └──►(+)──► [Delay Line] ──┬──► [Damping] ──► × loop gain          │
//!                                   │                                       │
//!                                   ▼                                       │
//!                              [Diffuser]  cluster / all-pass / FDN         │
//!                                   │                                       │
//!                                   ▼                                       │
//!                              [Ducking] ──► [Tone] ──► [Width] ── × wet ──(+)──► Output
//! ```
//!
//! The loop carries the plain delayed signal; each repeat is diffused on
//! its way out, so the decay time holds in every diffusion mode.
//!
//! See [`engine`] for the per-sample details and [`dsp`] for the building
//! blocks.

pub mod dsp;
pub mod engine;
mod params;

use std::num::NonZeroU32;
use std::sync::Arc;

use engine::control::DelayController;
use engine::settings::EngineSettings;
use engine::DiffusionDelay;
use nih_plug::prelude::*;
use params::{DiffusionDelayParams, MAX_DELAY_SECONDS};

/// The main plugin struct.
///
/// `engine` owns all audio-rate state; `controller` is its control-side
/// handle. Both are created up front so nothing is allocated in
/// `process()`.
pub struct LovelessDiffusionDelay {
    params: Arc<DiffusionDelayParams>,
    engine: DiffusionDelay,
    controller: DelayController,
}

impl Default for LovelessDiffusionDelay {
    fn default() -> Self {
        let (engine, controller) = DiffusionDelay::new(EngineSettings::default());
        Self {
            params: Arc::new(DiffusionDelayParams::default()),
            engine,
            controller,
        }
    }
}

impl LovelessDiffusionDelay {
    /// Push the current parameter values into the engine's targets.
    ///
    /// Every setter is an atomic store, and a quality-tier change only
    /// publishes a layout that already exists, so this is safe to call at
    /// the top of every block. The tier layouts stay owned by the
    /// controller, so collecting retired ones here never frees memory.
    fn sync_controller(&mut self, tempo: Option<f64>) {
        let params = &self.params;
        let controller = &mut self.controller;

        controller.set_delay_ms(params.delay_time.value());
        controller.set_delay_mode(params.time_mode.value());
        controller.set_note_division(params.division.value());
        controller.set_note_modifier(params.modifier.value());
        controller.set_feedback_time(params.feedback_time.value());

        controller.set_diffusion_mode(params.diffusion_mode.value());
        controller.set_diffusion_amount(params.diffusion_amount.value());
        controller.set_diffusion_size(params.diffusion_size.value());
        controller.set_diffusion_quality(params.diffusion_quality.value());

        controller.set_mix(params.mix.value());
        controller.set_lowpass(params.lowpass.value());
        controller.set_highpass(params.highpass.value());
        controller.set_damping(params.damping.value());
        controller.set_filter_pre(params.filter_pre.value());

        controller.set_duck_amount(params.duck_amount.value());
        controller.set_duck_attack(params.duck_attack.value());
        controller.set_duck_release(params.duck_release.value());

        controller.set_width(params.width.value());

        // Hosts without a transport keep the last (or default) tempo.
        if let Some(bpm) = tempo {
            controller.set_tempo(bpm as f32);
        }
    }
}

impl Plugin for LovelessDiffusionDelay {
    const NAME: &'static str = "Loveless Diffusion Delay";
    const VENDOR: &'static str = "Loveless Audio";
    const URL: &'static str = "";
    const EMAIL: &'static str = "steve.loveless@gmail.com";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        // Stereo in/out: the width control only acts here.
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            aux_input_ports: &[],
            aux_output_ports: &[],
            names: PortNames::const_default(),
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            aux_input_ports: &[],
            aux_output_ports: &[],
            names: PortNames::const_default(),
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;

    // The engine reads its targets once per block, so splitting blocks at
    // automation points is what makes automation sample-accurate.
    const SAMPLE_ACCURATE_AUTOMATION: bool = true;

    type SysExMessage = ();
    type BackgroundTask = ();

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    /// Allocate every buffer for this sample rate and channel count.
    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        _context: &mut impl InitContext<Self>,
    ) -> bool {
        let num_channels = audio_io_layout
            .main_input_channels
            .map(|c| c.get() as usize)
            .unwrap_or(2);

        self.sync_controller(None);
        self.engine.prepare_channels(num_channels);
        self.engine
            .prepare_to_play(buffer_config.sample_rate, MAX_DELAY_SECONDS);

        nih_log!(
            "{} initialized: {} channel(s), max block {}",
            Self::NAME,
            num_channels,
            buffer_config.max_buffer_size
        );
        true
    }

    /// Called on transport stop and similar; clears the echoes without
    /// reallocating.
    fn reset(&mut self) {
        self.engine.reset();
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        self.sync_controller(context.transport().tempo);

        let engine = &mut self.engine;
        no_denormals::no_denormals(|| engine.process_block(buffer.as_slice()));

        ProcessStatus::Tail(self.engine.tail_samples())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Plugin format trait implementations
// ─────────────────────────────────────────────────────────────────────

impl ClapPlugin for LovelessDiffusionDelay {
    const CLAP_ID: &'static str = "com.loveless-audio.loveless-diffusion-delay-v1";
    const CLAP_DESCRIPTION: Option<&'static str> =
        Some("A delay with tap-cluster, all-pass, and feedback-network diffusion");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Stereo,
        ClapFeature::Mono,
        ClapFeature::Delay,
        ClapFeature::Reverb,
    ];
}

impl Vst3Plugin for LovelessDiffusionDelay {
    // Exactly 16 ASCII bytes.
    const VST3_CLASS_ID: [u8; 16] = *b"LvlssDiffDly_v01";

    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] = &[
        Vst3SubCategory::Fx,
        Vst3SubCategory::Delay,
        Vst3SubCategory::Reverb,
    ];
}

// ─────────────────────────────────────────────────────────────────────
// Export macros
// ─────────────────────────────────────────────────────────────────────
//
// nih_export_clap! exports the `clap_entry` symbol for CLAP hosts.
// nih_export_vst3! exports `GetPluginFactory` for VST3 hosts.
// clap_wrapper re-exports the CLAP entry point as AUv2 for Logic Pro.

nih_export_clap!(LovelessDiffusionDelay);
nih_export_vst3!(LovelessDiffusionDelay);

clap_wrapper::export_auv2!();
