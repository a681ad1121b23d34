//! # Feedback Delay Network
//!
//! `N` delay lines whose outputs are cross-mixed through an orthonormal
//! matrix and fed back into their inputs. Because an orthonormal matrix
//! preserves energy, the decay of the whole network is set by the scalar
//! feedback gain and the per-line damping alone:
//!
//! ```text
//!          ┌──────────────── M (orthonormal) ◄──────────────┐
//!          │                                                │
//! dry ──►(+)──► [line 0..N] ──► [damping] ──► snapshot ─────┘
//!                                   │
//!                                   └──► Σ gain_i ──► wet
//! ```
//!
//! ## Mixing Matrices
//!
//! - Power-of-two line counts use a normalized Hadamard matrix, built by
//!   recursive doubling `H₂ₙ = [[Hₙ, Hₙ], [Hₙ, -Hₙ]]` and scaled by `1/√N`.
//! - Anything else uses the Householder reflection `I - (2/N)·11ᵀ`.
//!
//! ## Read-Then-Write
//!
//! Every sample first reads *all* lines into a snapshot, then writes *all*
//! lines from that snapshot. Writing line 0 before line 1 has been read
//! would feed line 1 a mix that already contains this sample's output,
//! which is no longer the matrix product.

use nih_plug::nih_debug_assert_eq;

use super::delay_line::DelayLine;
use super::filter::OnePoleFilter;
use super::flush_denormal;

/// Upper bound on the number of lines.
pub const MAX_LINES: usize = 8;

/// Hard ceiling on the loop gain.
pub const MAX_FEEDBACK_GAIN: f32 = 0.9999;

/// Window (in ms) the prime line delays are spread over, at size 0 and 1.
const LINE_DELAY_MIN_MS: (f32, f32) = (11.0, 29.0);
const LINE_DELAY_MAX_MS: (f32, f32) = (37.0, 97.0);

/// A square orthonormal mixing matrix of at most `MAX_LINES` rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixingMatrix {
    size: usize,
    coefficients: [[f32; MAX_LINES]; MAX_LINES],
}

impl MixingMatrix {
    /// Hadamard when `size` is a power of two, Householder otherwise.
    pub fn for_size(size: usize) -> Self {
        let size = size.clamp(1, MAX_LINES);
        if size.is_power_of_two() {
            Self::hadamard(size)
        } else {
            Self::householder(size)
        }
    }

    fn hadamard(size: usize) -> Self {
        let mut coefficients = [[0.0; MAX_LINES]; MAX_LINES];
        coefficients[0][0] = 1.0;

        let mut n = 1;
        while n < size {
            for row in 0..n {
                for col in 0..n {
                    let h = coefficients[row][col];
                    coefficients[row][col + n] = h;
                    coefficients[row + n][col] = h;
                    coefficients[row + n][col + n] = -h;
                }
            }
            n *= 2;
        }

        let norm = 1.0 / (size as f32).sqrt();
        for row in coefficients.iter_mut().take(size) {
            for c in row.iter_mut().take(size) {
                *c *= norm;
            }
        }

        Self { size, coefficients }
    }

    fn householder(size: usize) -> Self {
        let mut coefficients = [[0.0; MAX_LINES]; MAX_LINES];
        let k = 2.0 / size as f32;
        for (row, line) in coefficients.iter_mut().enumerate().take(size) {
            for (col, c) in line.iter_mut().enumerate().take(size) {
                *c = if row == col { 1.0 - k } else { -k };
            }
        }
        Self { size, coefficients }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.coefficients[row][col]
    }

    /// `output = M · input`, over the first `size` entries.
    #[inline]
    pub fn apply(&self, input: &[f32; MAX_LINES], output: &mut [f32; MAX_LINES]) {
        for (row, out) in output.iter_mut().enumerate().take(self.size) {
            *out = self.coefficients[row][..self.size]
                .iter()
                .zip(&input[..self.size])
                .map(|(m, x)| m * x)
                .sum();
        }
    }
}

/// A bank of cross-coupled delay lines.
#[derive(Debug, Clone)]
pub struct FeedbackDelayNetwork {
    lines: Vec<DelayLine>,
    dampers: [OnePoleFilter; MAX_LINES],
    delays: [f32; MAX_LINES],
    output_gains: [f32; MAX_LINES],
    matrix: MixingMatrix,
    feedback_gain: f32,
    damping_alpha: f32,

    // Owned scratch so concurrent instances never share state.
    snapshot: [f32; MAX_LINES],
    mixed: [f32; MAX_LINES],
}

impl Default for FeedbackDelayNetwork {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            dampers: [OnePoleFilter::default(); MAX_LINES],
            delays: [1.0; MAX_LINES],
            output_gains: [1.0; MAX_LINES],
            matrix: MixingMatrix::for_size(1),
            feedback_gain: 0.0,
            damping_alpha: 1.0,
            snapshot: [0.0; MAX_LINES],
            mixed: [0.0; MAX_LINES],
        }
    }
}

impl FeedbackDelayNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `line_count` lines (clamped to 1..=8) of
    /// `max_delay_buffer_samples` each and build the matching matrix.
    pub fn prepare(&mut self, line_count: usize, max_delay_buffer_samples: usize) {
        let count = line_count.clamp(1, MAX_LINES);
        self.lines.resize_with(count, DelayLine::default);
        for line in &mut self.lines {
            line.prepare(max_delay_buffer_samples);
        }
        self.matrix = MixingMatrix::for_size(count);
        self.reset();
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn mixing_matrix(&self) -> &MixingMatrix {
        &self.matrix
    }

    /// Per-line delays in samples. Extra entries are ignored; missing ones
    /// keep their previous value.
    pub fn set_line_delays(&mut self, delays: &[f32]) {
        nih_debug_assert_eq!(delays.len(), self.lines.len());
        for ((slot, line), &delay) in self.delays.iter_mut().zip(&self.lines).zip(delays) {
            *slot = delay.clamp(1.0, line.max_delay().max(1.0));
        }
    }

    pub fn set_line_output_gains(&mut self, gains: &[f32]) {
        nih_debug_assert_eq!(gains.len(), self.lines.len());
        for (slot, &gain) in self.output_gains.iter_mut().zip(gains) {
            *slot = gain;
        }
    }

    pub fn set_feedback_gain(&mut self, gain: f32) {
        self.feedback_gain = if gain.is_finite() {
            gain.clamp(0.0, MAX_FEEDBACK_GAIN)
        } else {
            0.0
        };
    }

    pub fn feedback_gain(&self) -> f32 {
        self.feedback_gain
    }

    /// One-pole coefficient of the per-line damping lowpass. `1.0` is no
    /// damping.
    pub fn set_damping_alpha(&mut self, alpha: f32) {
        self.damping_alpha = alpha.clamp(0.0, 1.0);
    }

    pub fn line_delays(&self) -> &[f32] {
        &self.delays[..self.lines.len()]
    }

    /// Read and damp every line, remember the damped outputs for the
    /// following [`write_feedback_distributed`](Self::write_feedback_distributed),
    /// and return their gain-weighted sum.
    #[inline]
    pub fn read_wet_sum(&mut self, normalize: bool) -> f32 {
        let count = self.lines.len();
        let mut sum = 0.0;
        for i in 0..count {
            let tap = self.lines[i].read(self.delays[i]);
            let damped = self.dampers[i].process_lowpass(tap, self.damping_alpha);
            self.snapshot[i] = damped;
            sum += damped * self.output_gains[i];
        }
        if normalize && count > 0 {
            sum / count as f32
        } else {
            sum
        }
    }

    /// Mix the snapshot taken by [`read_wet_sum`](Self::read_wet_sum)
    /// through the matrix, scale it by `bus_gain · feedback_gain`, add
    /// `dry_input` to every line, and write.
    #[inline]
    pub fn write_feedback_distributed(&mut self, bus_gain: f32, dry_input: f32) {
        self.matrix.apply(&self.snapshot, &mut self.mixed);
        let scale = bus_gain * self.feedback_gain;
        for (line, mixed) in self.lines.iter_mut().zip(&self.mixed) {
            line.push(flush_denormal(mixed * scale + dry_input));
        }
    }

    /// Read-then-write convenience for one sample.
    ///
    /// The returned wet sum is read before this sample's input reaches the
    /// lines, so the wet output lags the input by at least one line delay.
    #[inline]
    pub fn process_sample(&mut self, input: f32, bus_gain: f32) -> f32 {
        let wet = self.read_wet_sum(true);
        self.write_feedback_distributed(bus_gain, input);
        wet
    }

    pub fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
        for damper in &mut self.dampers {
            damper.reset();
        }
        self.snapshot = [0.0; MAX_LINES];
        self.mixed = [0.0; MAX_LINES];
    }
}

/// Mean of the active line delays, in samples.
pub fn mean_line_delay(delays: &[f32]) -> f32 {
    if delays.is_empty() {
        return 0.0;
    }
    delays.iter().sum::<f32>() / delays.len() as f32
}

/// Fill `out` with distinct prime delays (in samples) spread over a window
/// that grows with `size01`.
///
/// Prime lengths share no common factors, so the lines' echo patterns
/// never line up and the tail stays free of periodic coloration.
pub fn prime_line_delays(sample_rate: f32, size01: f32, out: &mut [f32]) {
    let count = out.len();
    if count == 0 {
        return;
    }
    let size = size01.clamp(0.0, 1.0);
    let lo_ms = LINE_DELAY_MIN_MS.0 + (LINE_DELAY_MIN_MS.1 - LINE_DELAY_MIN_MS.0) * size;
    let hi_ms = LINE_DELAY_MAX_MS.0 + (LINE_DELAY_MAX_MS.1 - LINE_DELAY_MAX_MS.0) * size;

    let mut previous = 1usize;
    for (i, slot) in out.iter_mut().enumerate() {
        // Geometric spacing across the window.
        let t = if count > 1 { i as f32 / (count - 1) as f32 } else { 0.5 };
        let ms = lo_ms * (hi_ms / lo_ms).powf(t);
        let target = ((ms * sample_rate / 1000.0) as usize).max(previous + 1);
        let prime = next_prime(target);
        *slot = prime as f32;
        previous = prime;
    }
}

/// Smallest prime `>= n`.
pub fn next_prime(n: usize) -> usize {
    let mut candidate = n.max(2);
    while !is_prime(candidate) {
        candidate += 1;
    }
    candidate
}

fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_orthonormal(m: &MixingMatrix) {
        let n = m.size();
        for a in 0..n {
            for b in 0..n {
                let dot: f32 = (0..n).map(|k| m.get(a, k) * m.get(b, k)).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!(
                    (dot - expected).abs() < 1e-5,
                    "rows {a},{b} of size-{n} matrix: dot = {dot}"
                );
            }
        }
    }

    #[test]
    fn test_every_matrix_size_is_orthonormal() {
        for size in 1..=MAX_LINES {
            assert_orthonormal(&MixingMatrix::for_size(size));
        }
    }

    #[test]
    fn test_power_of_two_uses_hadamard_signs() {
        let m = MixingMatrix::for_size(4);
        let h = 0.5;
        let expected = [
            [h, h, h, h],
            [h, -h, h, -h],
            [h, h, -h, -h],
            [h, -h, -h, h],
        ];
        for (row, values) in expected.iter().enumerate() {
            for (col, v) in values.iter().enumerate() {
                assert!((m.get(row, col) - v).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_odd_size_uses_householder() {
        let m = MixingMatrix::for_size(3);
        assert!((m.get(0, 0) - (1.0 - 2.0 / 3.0)).abs() < 1e-6);
        assert!((m.get(0, 1) + 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_line_count_clamps() {
        let mut fdn = FeedbackDelayNetwork::new();
        fdn.prepare(0, 64);
        assert_eq!(fdn.line_count(), 1);
        fdn.prepare(32, 64);
        assert_eq!(fdn.line_count(), MAX_LINES);
        assert_eq!(fdn.mixing_matrix().size(), MAX_LINES);
    }

    #[test]
    fn test_feedback_gain_clamps() {
        let mut fdn = FeedbackDelayNetwork::new();
        fdn.set_feedback_gain(1.5);
        assert_eq!(fdn.feedback_gain(), MAX_FEEDBACK_GAIN);
        fdn.set_feedback_gain(-1.0);
        assert_eq!(fdn.feedback_gain(), 0.0);
        fdn.set_feedback_gain(f32::NAN);
        assert_eq!(fdn.feedback_gain(), 0.0);
    }

    /// With no feedback each line is a plain delay: the impulse comes out
    /// once per line, exactly at that line's delay.
    #[test]
    fn test_zero_feedback_is_parallel_delays() {
        let mut fdn = FeedbackDelayNetwork::new();
        fdn.prepare(4, 64);
        fdn.set_line_delays(&[5.0, 7.0, 11.0, 13.0]);
        fdn.set_feedback_gain(0.0);

        let mut hits = Vec::new();
        for n in 0..40 {
            let wet = fdn.process_sample(if n == 0 { 1.0 } else { 0.0 }, 1.0);
            if wet.abs() > 1e-6 {
                hits.push((n, wet));
            }
        }
        let times: Vec<usize> = hits.iter().map(|(n, _)| *n).collect();
        assert_eq!(times, vec![5, 7, 11, 13]);
        for (_, wet) in hits {
            assert!((wet - 0.25).abs() < 1e-6, "normalized tap should be 1/4, got {wet}");
        }
    }

    /// With an orthonormal matrix and g < 1 the impulse response decays
    /// and never exceeds the input by more than a bounded factor.
    #[test]
    fn test_impulse_response_is_bounded_and_decays() {
        for count in [2, 3, 4, 5, 8] {
            let mut fdn = FeedbackDelayNetwork::new();
            fdn.prepare(count, 4096);
            let mut delays = vec![0.0; count];
            prime_line_delays(48000.0, 0.3, &mut delays);
            fdn.set_line_delays(&delays);
            fdn.set_feedback_gain(0.9);

            let mut peak = 0.0_f32;
            let mut late_peak = 0.0_f32;
            let total = 48000 * 4;
            for n in 0..total {
                let wet = fdn.process_sample(if n == 0 { 1.0 } else { 0.0 }, 1.0);
                peak = peak.max(wet.abs());
                if n > total - 4800 {
                    late_peak = late_peak.max(wet.abs());
                }
            }
            assert!(peak <= 1.0, "{count} lines: peak {peak}");
            assert!(late_peak < 1e-3, "{count} lines: tail still at {late_peak}");
        }
    }

    /// The energy held in the lines' active windows can only shrink once
    /// the input stops: each step removes the snapshot and writes back
    /// `g² · |M · snapshot|² = g² · |snapshot|²`.
    #[test]
    fn test_stored_energy_never_grows_without_input() {
        let delays = [17.0, 19.0, 23.0, 29.0, 31.0, 37.0, 41.0, 43.0];
        let mut fdn = FeedbackDelayNetwork::new();
        fdn.prepare(8, 256);
        fdn.set_line_delays(&delays);
        fdn.set_feedback_gain(0.999);

        for n in 0..64 {
            let x = ((n * 37) % 11) as f32 / 11.0 - 0.5;
            fdn.process_sample(x, 1.0);
        }

        let stored_energy = |fdn: &FeedbackDelayNetwork| -> f32 {
            fdn.lines
                .iter()
                .zip(delays)
                .map(|(line, d)| {
                    (1..=d as usize)
                        .map(|k| line.read_integer(k).powi(2))
                        .sum::<f32>()
                })
                .sum()
        };

        let mut previous = stored_energy(&fdn);
        assert!(previous > 0.0);
        for _ in 0..4000 {
            fdn.process_sample(0.0, 1.0);
            let current = stored_energy(&fdn);
            assert!(
                current <= previous * (1.0 + 1e-5),
                "energy grew: {previous} -> {current}"
            );
            previous = current;
        }
    }

    #[test]
    fn test_damping_darkens_feedback() {
        let run = |alpha: f32| -> f32 {
            let mut fdn = FeedbackDelayNetwork::new();
            fdn.prepare(4, 512);
            fdn.set_line_delays(&[31.0, 37.0, 41.0, 43.0]);
            fdn.set_feedback_gain(0.95);
            fdn.set_damping_alpha(alpha);
            (0..20_000)
                .map(|n| fdn.process_sample(if n == 0 { 1.0 } else { 0.0 }, 1.0).powi(2))
                .sum()
        };
        assert!(run(0.2) < run(1.0));
    }

    #[test]
    fn test_bus_gain_scales_feedback() {
        let mut fdn = FeedbackDelayNetwork::new();
        fdn.prepare(2, 64);
        fdn.set_line_delays(&[3.0, 5.0]);
        fdn.set_feedback_gain(0.9);

        // bus gain 0 leaves only the direct taps.
        let mut hits = 0;
        for n in 0..60 {
            let wet = fdn.process_sample(if n == 0 { 1.0 } else { 0.0 }, 0.0);
            if wet.abs() > 1e-9 {
                hits += 1;
            }
        }
        assert_eq!(hits, 2);
    }

    #[test]
    fn test_reset_silences_network() {
        let mut fdn = FeedbackDelayNetwork::new();
        fdn.prepare(4, 128);
        fdn.set_line_delays(&[7.0, 11.0, 13.0, 17.0]);
        fdn.set_feedback_gain(0.9);
        for n in 0..50 {
            fdn.process_sample(if n == 0 { 1.0 } else { 0.0 }, 1.0);
        }
        fdn.reset();
        for _ in 0..500 {
            assert_eq!(fdn.process_sample(0.0, 1.0), 0.0);
        }
    }

    #[test]
    fn test_prime_line_delays_are_distinct_primes() {
        let mut delays = [0.0; 8];
        prime_line_delays(48000.0, 1.0, &mut delays);
        for pair in delays.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        for d in delays {
            assert!(is_prime(d as usize), "{d} is not prime");
        }
        // Longest line stays inside the ~97 ms window.
        assert!(delays[7] < 0.1 * 48000.0);
        assert!(mean_line_delay(&delays) > 0.0);
    }

    #[test]
    fn test_next_prime() {
        assert_eq!(next_prime(0), 2);
        assert_eq!(next_prime(14), 17);
        assert_eq!(next_prime(17), 17);
    }
}
