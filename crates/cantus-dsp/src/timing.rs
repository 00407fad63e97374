//! Block timing shared by every per-block generator.

/// Sample rate and block length a generator is advanced with.
///
/// Envelopes and LFOs step once per block, so their rates depend on both values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub sample_rate: f32,
    pub buffer_size: usize,
}

impl Timing {
    pub fn new(sample_rate: f32, buffer_size: usize) -> Self {
        Self {
            sample_rate,
            buffer_size: buffer_size.max(1),
        }
    }

    /// Duration of one block in seconds.
    #[inline]
    pub fn block_duration(&self) -> f32 {
        self.buffer_size as f32 / self.sample_rate
    }

    #[inline]
    pub fn blocks_per_second(&self) -> f32 {
        self.sample_rate / self.buffer_size as f32
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::new(44100.0, 256)
    }
}
