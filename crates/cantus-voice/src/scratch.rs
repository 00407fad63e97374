//! Per-block working buffers.
//!
//! Every buffer a note needs inside a block comes from one bump arena that
//! is reset when the next block starts. After the first few blocks the arena
//! has grown to its steady size and rendering stops touching the allocator.

use bumpalo::Bump;

/// Arena handed to [`Note::render_block`](crate::Note::render_block).
#[derive(Debug, Default)]
pub struct RenderScratch {
    arena: Bump,
}

impl RenderScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the arena for `buffer_size`-sample blocks of a note with
    /// `copies` unison copies in total.
    pub fn with_capacity(buffer_size: usize, copies: usize) -> Self {
        // Carrier, modulator and offset buffers per copy plus the note buses.
        let floats = buffer_size * (copies * 4 + 8);
        Self {
            arena: Bump::with_capacity(floats * std::mem::size_of::<f32>()),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.arena.reset();
    }

    pub(crate) fn arena(&self) -> &Bump {
        &self.arena
    }

    /// Bytes currently reserved by the arena.
    pub fn allocated_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }
}

/// A zeroed block of `len` samples.
#[inline]
pub(crate) fn zeroed(arena: &Bump, len: usize) -> &mut [f32] {
    arena.alloc_slice_fill_copy(len, 0.0f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_zeroed_after_reset() {
        let mut scratch = RenderScratch::with_capacity(64, 2);
        {
            let buf = zeroed(scratch.arena(), 64);
            buf.fill(1.0);
        }
        scratch.reset();
        let buf = zeroed(scratch.arena(), 64);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_steady_state_does_not_grow() {
        let mut scratch = RenderScratch::new();
        for _ in 0..4 {
            scratch.reset();
            let _ = zeroed(scratch.arena(), 512);
            let _ = zeroed(scratch.arena(), 512);
        }
        let settled = scratch.allocated_bytes();
        for _ in 0..16 {
            scratch.reset();
            let _ = zeroed(scratch.arena(), 512);
            let _ = zeroed(scratch.arena(), 512);
        }
        assert_eq!(scratch.allocated_bytes(), settled);
    }
}
