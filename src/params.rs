//! # Plugin Parameters
//!
//! The host-facing controls. Each `#[id = "..."]` string is what DAWs
//! store in sessions and automation lanes, so never change an id once
//! released.
//!
//! None of these parameters use nih-plug's smoothers: the engine smooths
//! delay time and size per sample itself, and reads every other control
//! once per block.

use nih_plug::prelude::*;

use crate::dsp::timing::{DelayTimeMode, NoteDivision, NoteModifier};
use crate::engine::control::BlockParams;
use crate::engine::diffuser::DiffusionMode;

/// Longest delay the plugin allocates for, in seconds.
pub const MAX_DELAY_SECONDS: f32 = 2.0;

#[derive(Params)]
pub struct DiffusionDelayParams {
    #[id = "delay"]
    pub delay_time: FloatParam,

    #[id = "tmode"]
    pub time_mode: EnumParam<DelayTimeMode>,

    #[id = "div"]
    pub division: EnumParam<NoteDivision>,

    #[id = "divmod"]
    pub modifier: EnumParam<NoteModifier>,

    /// Decay time (T60) of the repeats.
    #[id = "fdbk"]
    pub feedback_time: FloatParam,

    #[id = "dmode"]
    pub diffusion_mode: EnumParam<DiffusionMode>,

    #[id = "diff"]
    pub diffusion_amount: FloatParam,

    #[id = "size"]
    pub diffusion_size: FloatParam,

    #[id = "qual"]
    pub diffusion_quality: FloatParam,

    #[id = "mix"]
    pub mix: FloatParam,

    #[id = "lpf"]
    pub lowpass: FloatParam,

    #[id = "hpf"]
    pub highpass: FloatParam,

    #[id = "damp"]
    pub damping: FloatParam,

    /// Filter the signal going into the delay instead of the wet output.
    #[id = "fpre"]
    pub filter_pre: BoolParam,

    #[id = "duck"]
    pub duck_amount: FloatParam,

    #[id = "datk"]
    pub duck_attack: FloatParam,

    #[id = "drel"]
    pub duck_release: FloatParam,

    #[id = "width"]
    pub width: FloatParam,
}

fn percent(name: &str, default: f32) -> FloatParam {
    FloatParam::new(name, default, FloatRange::Linear { min: 0.0, max: 1.0 })
        .with_unit("%")
        .with_value_to_string(formatters::v2s_f32_percentage(1))
        .with_string_to_value(formatters::s2v_f32_percentage())
}

impl Default for DiffusionDelayParams {
    fn default() -> Self {
        let defaults = BlockParams::default();

        Self {
            delay_time: FloatParam::new(
                "Delay Time",
                defaults.delay_ms,
                FloatRange::Skewed {
                    min: 1.0,
                    max: MAX_DELAY_SECONDS * 1000.0,
                    factor: FloatRange::skew_factor(-1.5),
                },
            )
            .with_unit(" ms")
            .with_step_size(0.1),

            time_mode: EnumParam::new("Time Mode", defaults.delay_mode),
            division: EnumParam::new("Division", defaults.note_division),
            modifier: EnumParam::new("Note Feel", defaults.note_modifier),

            // 0 s is a single echo; the skew puts most of the travel in
            // the useful sub-10 s region.
            feedback_time: FloatParam::new(
                "Feedback Time",
                defaults.feedback_time,
                FloatRange::Skewed {
                    min: 0.0,
                    max: 30.0,
                    factor: FloatRange::skew_factor(-2.0),
                },
            )
            .with_unit(" s")
            .with_step_size(0.01),

            diffusion_mode: EnumParam::new("Diffusion Mode", defaults.diffusion_mode),
            diffusion_amount: percent("Diffusion", defaults.diffusion_amount),
            diffusion_size: percent("Size", defaults.diffusion_size),
            diffusion_quality: percent("Quality", defaults.diffusion_quality),

            mix: percent("Mix", defaults.mix),

            lowpass: percent("High Cut", defaults.lowpass),
            highpass: percent("Low Cut", defaults.highpass),
            damping: percent("Damping", defaults.damping),
            filter_pre: BoolParam::new("Filter Pre-Delay", defaults.filter_pre),

            duck_amount: percent("Ducking", defaults.duck_amount),
            duck_attack: percent("Duck Attack", defaults.duck_attack),
            duck_release: percent("Duck Release", defaults.duck_release),

            width: FloatParam::new(
                "Width",
                defaults.width,
                FloatRange::Linear {
                    min: -1.0,
                    max: 1.0,
                },
            )
            .with_unit("%")
            .with_value_to_string(formatters::v2s_f32_percentage(0))
            .with_string_to_value(formatters::s2v_f32_percentage()),
        }
    }
}
