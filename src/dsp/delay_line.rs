//! # Delay Line (Ring Buffer)
//!
//! The delay line is the building block every other component in this
//! crate leans on: the main echo buffer, every all-pass stage, every FDN
//! line, and the Haas widener all store their history in one of these.
//!
//! ## Cursor Convention
//!
//! The write cursor points at the slot the *next* sample will land in.
//! Reads look backwards from that cursor:
//!
//! ```text
//! read(d) = buffer[(write_pos - d) mod len]
//! ```
//!
//! So with the split [`write`](DelayLine::write) / [`advance`](DelayLine::advance)
//! protocol, reading `d` samples back *before* writing the current sample
//! returns exactly the sample written `d` steps ago, and `read(0)` right
//! after `write()` returns the sample just written. [`push`](DelayLine::push)
//! combines the two for callers that never read in between.
//!
//! ## Linear Interpolation
//!
//! Fractional delays blend the two neighbouring slots:
//!
//! ```text
//! result = sample_a * (1 - frac) + sample_b * frac
//! ```
//!
//! where `sample_a` is the newer slot and `sample_b` the one behind it.

/// A ring buffer that functions as an audio delay line.
///
/// Allocated once in [`prepare`](Self::prepare) and never resized while
/// audio is running.
#[derive(Debug, Clone)]
pub struct DelayLine {
    /// The circular buffer storing audio samples.
    buffer: Vec<f32>,

    /// Where the next incoming sample will be stored. Always in
    /// `[0, buffer.len())`.
    write_pos: usize,
}

impl Default for DelayLine {
    fn default() -> Self {
        Self::new(1)
    }
}

impl DelayLine {
    /// Create a delay line holding `max_length` samples (at least one).
    pub fn new(max_length: usize) -> Self {
        Self {
            buffer: vec![0.0; max_length.max(1)],
            write_pos: 0,
        }
    }

    /// (Re)allocate the buffer for `max_samples` samples, zero it, and move
    /// the write cursor back to the start.
    ///
    /// Control-context only: this is the one place a delay line allocates.
    pub fn prepare(&mut self, max_samples: usize) {
        let len = max_samples.max(1);
        if self.buffer.len() == len {
            self.reset();
            return;
        }
        self.buffer = vec![0.0; len];
        self.write_pos = 0;
    }

    /// Number of samples the buffer holds.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Always false: a delay line holds at least one sample.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Largest delay (in samples) that can be read without wrapping onto
    /// the slot about to be written.
    pub fn max_delay(&self) -> f32 {
        self.buffer.len().saturating_sub(1) as f32
    }

    /// Store a sample at the write cursor without advancing it.
    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
    }

    /// Move the write cursor forward by one slot, wrapping at the end.
    #[inline]
    pub fn advance(&mut self) {
        self.write_pos += 1;
        if self.write_pos == self.buffer.len() {
            self.write_pos = 0;
        }
    }

    /// Store a sample and advance the cursor in one step.
    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.write(sample);
        self.advance();
    }

    /// Read `delay_samples` behind the write cursor with linear
    /// interpolation.
    ///
    /// Negative delays read at zero; delays past the buffer are clamped to
    /// the oldest slot. A buffer of one sample (or less) reads silence.
    #[inline]
    pub fn read(&self, delay_samples: f32) -> f32 {
        let len = self.buffer.len();
        if len <= 1 {
            return 0.0;
        }

        // `max(0.0)` also maps NaN to 0.
        let delay_clamped = delay_samples.max(0.0).min((len - 1) as f32);

        let delay_int = delay_clamped as usize;
        let delay_frac = delay_clamped - delay_int as f32;

        let index_a = (self.write_pos + len - delay_int) % len;
        let sample_a = self.buffer[index_a];
        if delay_frac == 0.0 {
            return sample_a;
        }

        let index_b = if index_a == 0 { len - 1 } else { index_a - 1 };
        let sample_b = self.buffer[index_b];

        sample_a * (1.0 - delay_frac) + sample_b * delay_frac
    }

    /// Read a whole-sample delay without interpolation.
    #[inline]
    pub fn read_integer(&self, delay_samples: usize) -> f32 {
        let len = self.buffer.len();
        if len <= 1 {
            return 0.0;
        }
        let delay = delay_samples.min(len - 1);
        self.buffer[(self.write_pos + len - delay) % len]
    }

    /// Zero the buffer and rewind the cursor without reallocating.
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }

    #[cfg(test)]
    pub(crate) fn write_pos(&self) -> usize {
        self.write_pos
    }

    #[cfg(test)]
    pub(crate) fn is_silent(&self) -> bool {
        self.buffer.iter().all(|s| *s == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_exact() {
        let mut dl = DelayLine::new(100);

        dl.write(0.75);
        dl.advance();

        let result = dl.read(1.0);
        assert!((result - 0.75).abs() < 1e-6, "Expected 0.75, got {result}");
    }

    /// Reading at zero right after `write()` returns the sample just
    /// written, with no interpolation error.
    #[test]
    fn test_zero_delay_returns_written_sample() {
        let mut dl = DelayLine::new(16);
        dl.write(0.3125);
        assert_eq!(dl.read(0.0), 0.3125);
    }

    #[test]
    fn test_interpolation() {
        let mut dl = DelayLine::new(100);

        dl.write(0.0);
        dl.advance();
        dl.write(1.0);
        dl.advance();

        // write_pos = 2: slot 1 holds 1.0, slot 0 holds 0.0.
        let result = dl.read(1.5);
        assert!((result - 0.5).abs() < 1e-6, "Expected 0.5, got {result}");
    }

    #[test]
    fn test_wrapping() {
        let mut dl = DelayLine::new(4);

        for i in 0..6 {
            dl.push(i as f32);
        }

        // Buffer is [4, 5, 2, 3] with the cursor on slot 2.
        assert_eq!(dl.write_pos(), 2);
        let result = dl.read(1.0);
        assert!((result - 5.0).abs() < 1e-6, "Expected 5.0, got {result}");
        assert!((dl.read(3.0) - 3.0).abs() < 1e-6);
    }

    /// Interpolating across the wrap point blends the last and first slots.
    #[test]
    fn test_fractional_read_across_wrap() {
        let mut dl = DelayLine::new(4);
        for v in [1.0, 2.0, 3.0, 4.0] {
            dl.push(v);
        }
        // Cursor is back on slot 0; read(0.5) blends slot 0 (1.0) and slot 3 (4.0).
        let result = dl.read(0.5);
        assert!((result - 2.5).abs() < 1e-6, "Expected 2.5, got {result}");
    }

    /// An impulse written once is found again exactly `d` samples later for
    /// every representable delay.
    #[test]
    fn test_impulse_found_at_every_delay() {
        let len = 64;
        for d in 0..=(len - 2) {
            let mut dl = DelayLine::new(len);
            dl.write(1.0);
            for _ in 0..d {
                dl.advance();
                dl.write(0.0);
            }
            let result = dl.read(d as f32);
            assert!(
                (result - 1.0).abs() < 1e-6,
                "Expected impulse at delay {d}, got {result}"
            );
        }
    }

    #[test]
    fn test_negative_delay_clamps_to_zero() {
        let mut dl = DelayLine::new(8);
        dl.write(0.9);
        assert_eq!(dl.read(-3.0), 0.9);
        assert_eq!(dl.read(f32::NAN), 0.9);
    }

    #[test]
    fn test_single_sample_buffer_reads_silence() {
        let mut dl = DelayLine::new(1);
        dl.push(1.0);
        dl.write(1.0);
        assert_eq!(dl.read(0.0), 0.0);
        assert_eq!(dl.read_integer(0), 0.0);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut dl = DelayLine::new(10);

        dl.push(0.5);
        dl.push(0.25);
        dl.reset();

        assert_eq!(dl.len(), 10);
        assert_eq!(dl.write_pos(), 0);
        assert!(dl.is_silent());
    }

    #[test]
    fn test_prepare_reallocates_and_clears() {
        let mut dl = DelayLine::default();
        assert_eq!(dl.len(), 1);

        dl.prepare(0);
        assert_eq!(dl.len(), 1);

        dl.prepare(32);
        assert_eq!(dl.len(), 32);
        dl.push(1.0);
        dl.prepare(32);
        assert!(dl.is_silent());
        assert_eq!(dl.write_pos(), 0);
    }

    #[test]
    fn test_fifo_sequence() {
        let mut dl = DelayLine::new(10);

        for i in 1..=5 {
            dl.push(i as f32);
        }

        assert!((dl.read(1.0) - 5.0).abs() < 1e-6);
        assert!((dl.read(2.0) - 4.0).abs() < 1e-6);
        assert!((dl.read(3.0) - 3.0).abs() < 1e-6);
        assert!((dl.read(4.0) - 2.0).abs() < 1e-6);
        assert!((dl.read(5.0) - 1.0).abs() < 1e-6);
        assert_eq!(dl.read_integer(5), 1.0);
    }
}
