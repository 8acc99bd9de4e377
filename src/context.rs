use crate::constants::{BEATS_PER_CYCLE, BLOCK_SIZE, DEFAULT_BPM, DEFAULT_SAMPLE_RATE};

/// Timing information shared by every opcode during a block
///
/// The beat position advances incrementally, one block at a time, so a
/// tempo change bends the musical clock instead of making it jump.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Sample rate in Hz
    pub sample_rate: f32,

    /// Tempo in beats per minute
    pub bpm: f32,

    /// Samples rendered since the last reset
    pub sample_counter: u64,

    /// Blocks rendered since the last reset
    pub block_counter: u64,

    /// Beat position at the first sample of the current block
    pub beat_position: f64,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_BPM)
    }
}

impl ExecutionContext {
    pub fn new(sample_rate: f32, bpm: f32) -> Self {
        Self {
            sample_rate,
            bpm,
            sample_counter: 0,
            block_counter: 0,
            beat_position: 0.0,
        }
    }

    #[inline]
    pub fn inv_sample_rate(&self) -> f32 {
        1.0 / self.sample_rate
    }

    pub fn samples_per_beat(&self) -> f64 {
        60.0 / self.bpm as f64 * self.sample_rate as f64
    }

    #[inline]
    pub fn beats_per_sample(&self) -> f64 {
        self.bpm as f64 / (60.0 * self.sample_rate as f64)
    }

    /// Beat position of sample `offset` within the current block.
    #[inline]
    pub fn beat_at(&self, offset: usize) -> f64 {
        self.beat_position + offset as f64 * self.beats_per_sample()
    }

    /// Beat window `[start, end)` covered by the current block.
    pub fn block_beats(&self) -> (f64, f64) {
        (self.beat_position, self.beat_at(BLOCK_SIZE))
    }

    /// Phase within the current beat, `[0, 1)`.
    pub fn beat_phase(&self, offset: usize) -> f64 {
        self.beat_at(offset).rem_euclid(1.0)
    }

    /// Phase within the current bar/cycle, `[0, 1)`.
    pub fn bar_phase(&self, offset: usize) -> f64 {
        (self.beat_at(offset) / BEATS_PER_CYCLE).rem_euclid(1.0)
    }

    pub fn advance_block(&mut self) {
        self.beat_position = self.beat_at(BLOCK_SIZE);
        self.sample_counter += BLOCK_SIZE as u64;
        self.block_counter += 1;
    }

    pub fn seek(&mut self, beat: f64) {
        self.beat_position = beat;
    }

    pub fn reset(&mut self) {
        self.sample_counter = 0;
        self.block_counter = 0;
        self.beat_position = 0.0;
    }
}
