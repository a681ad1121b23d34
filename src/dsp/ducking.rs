//! # Ducking
//!
//! While the dry signal is playing, the echoes are pulled down so they
//! don't smear the performance; when the input goes quiet the echoes swell
//! back up. The detector runs on the dry input of each channel and the
//! resulting gain multiplies that channel's wet signal.
//!
//! ## Detector
//!
//! 1. A fast absolute-value follower (fixed coefficient, roughly 30 ms at
//!    44.1 kHz) produces a level.
//! 2. The level is boosted (`× 1.8 × 1.5`) and clamped to `[0, 1]`.
//! 3. The envelope chases that level with the user's attack coefficient
//!    when rising and the release coefficient when falling. Below −62 dB
//!    the release runs four times faster so the echoes return promptly
//!    after the input stops.
//!
//! ## Gain
//!
//! ```text
//! attenuation_db = amount * sqrt(envelope) * max_attenuation_db
//! gain           = 10^(-attenuation_db / 20)
//! ```

/// Coefficient of the fast level follower. Deliberately not scaled by the
/// sample rate, so the follower is slightly faster at 96 kHz than at 44.1 kHz.
pub const FAST_FOLLOWER_ALPHA: f32 = 0.0005;

const LEVEL_BOOST: f32 = 1.8 * 1.5;

/// −62 dB.
const SILENCE_THRESHOLD: f32 = 7.943_282e-4;
const SILENCE_RELEASE_MULTIPLIER: f32 = 4.0;

const ENVELOPE_FLOOR: f32 = 1e-8;
const GAIN_FLOOR: f32 = 1e-6;

pub const DEFAULT_MAX_ATTENUATION_DB: f32 = 60.0;

const ATTACK_MIN_MS: f32 = 5.0;
const ATTACK_MAX_MS: f32 = 200.0;
const ATTACK_CURVE: f32 = 0.45;
const RELEASE_MIN_MS: f32 = 50.0;
const RELEASE_MAX_MS: f32 = 2000.0;

/// One-pole coefficient reaching ~63 % of a step in `time_ms`.
fn time_to_alpha(sample_rate: f32, time_ms: f32) -> f32 {
    let tau_samples = sample_rate * time_ms / 1000.0;
    if tau_samples <= 0.0 {
        return 1.0;
    }
    (1.0 - (-1.0 / tau_samples).exp()).clamp(0.0, 1.0)
}

/// Map normalized attack and release to one-pole coefficients.
///
/// Attack spans 5–200 ms along a `x^0.45` curve; release spans
/// 50–2000 ms linearly.
pub fn compute_attack_release_alphas(sample_rate: f32, attack01: f32, release01: f32) -> (f32, f32) {
    let attack_ms = ATTACK_MIN_MS
        + (ATTACK_MAX_MS - ATTACK_MIN_MS) * attack01.clamp(0.0, 1.0).powf(ATTACK_CURVE);
    let release_ms = RELEASE_MIN_MS + (RELEASE_MAX_MS - RELEASE_MIN_MS) * release01.clamp(0.0, 1.0);
    (
        time_to_alpha(sample_rate, attack_ms),
        time_to_alpha(sample_rate, release_ms),
    )
}

/// Gain for a given envelope. Non-increasing in `envelope`, exactly `1.0`
/// at zero envelope.
pub fn compute_duck_gain(envelope: f32, amount01: f32, max_attenuation_db: f32) -> f32 {
    let envelope = envelope.clamp(0.0, 1.0);
    let amount = amount01.clamp(0.0, 1.0);
    if envelope == 0.0 || amount == 0.0 {
        return 1.0;
    }
    let attenuation_db = amount * envelope.sqrt() * max_attenuation_db.max(0.0);
    let gain = 10.0_f32.powf(-attenuation_db / 20.0);
    if gain < GAIN_FLOOR {
        0.0
    } else {
        gain
    }
}

/// Per-channel envelope state.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckingDetector {
    fast_level: f32,
    envelope: f32,
}

impl DuckingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one dry sample and return the updated envelope in `[0, 1]`.
    #[inline]
    pub fn process_sample(&mut self, sample: f32, attack_alpha: f32, release_alpha: f32) -> f32 {
        let magnitude = if sample.is_finite() { sample.abs() } else { 0.0 };

        self.fast_level += FAST_FOLLOWER_ALPHA * (magnitude - self.fast_level);
        let level = (self.fast_level * LEVEL_BOOST).clamp(0.0, 1.0);

        if level > self.envelope {
            self.envelope += attack_alpha * (level - self.envelope);
        } else {
            let alpha = if magnitude < SILENCE_THRESHOLD {
                (release_alpha * SILENCE_RELEASE_MULTIPLIER).min(1.0)
            } else {
                release_alpha
            };
            self.envelope += alpha * (level - self.envelope);
        }

        if self.envelope < ENVELOPE_FLOOR {
            self.envelope = 0.0;
        }
        if self.fast_level < ENVELOPE_FLOOR {
            self.fast_level = 0.0;
        }
        self.envelope = self.envelope.clamp(0.0, 1.0);
        self.envelope
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    pub fn reset(&mut self) {
        self.fast_level = 0.0;
        self.envelope = 0.0;
    }
}
