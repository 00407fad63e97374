//! Legato crossfades.
//!
//! A legato event clones the sounding note graph, fades the clone out and
//! fades the original in at its new pitch. Both ramps share one step and start
//! on the same sample, so the two gains always sum to one.

use crate::controller::Controller;
use crate::error::Result;
use crate::note::Note;
use crate::scratch::RenderScratch;

/// Crossfade length in seconds.
pub const LEGATO_FADE_SECONDS: f32 = 0.005;

/// Per-note legato gain ramp. A zero step means no fade is running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegatoFade {
    level: f32,
    step: f32,
}

impl Default for LegatoFade {
    fn default() -> Self {
        Self::idle()
    }
}

impl LegatoFade {
    /// Fade length in samples, at least one.
    pub fn fade_len(sample_rate: f32) -> usize {
        ((LEGATO_FADE_SECONDS * sample_rate) as usize).max(1)
    }

    /// Unity gain, no fade.
    pub fn idle() -> Self {
        Self { level: 1.0, step: 0.0 }
    }

    pub fn fade_in(sample_rate: f32) -> Self {
        Self {
            level: 0.0,
            step: 1.0 / Self::fade_len(sample_rate) as f32,
        }
    }

    /// Fade from `from` down to silence at the same rate as [`fade_in`](Self::fade_in).
    pub fn fade_out(from: f32, sample_rate: f32) -> Self {
        Self {
            level: from.clamp(0.0, 1.0),
            step: -1.0 / Self::fade_len(sample_rate) as f32,
        }
    }

    #[inline]
    pub fn level(&self) -> f32 {
        self.level
    }

    #[inline]
    pub fn is_fading(&self) -> bool {
        self.step != 0.0
    }

    /// A finished fade-out.
    #[inline]
    pub fn is_silent(&self) -> bool {
        self.step == 0.0 && self.level <= 0.0
    }

    /// Scale a block. The level moves before each sample is scaled.
    pub fn apply(&mut self, left: &mut [f32], right: &mut [f32]) {
        if !self.is_fading() {
            if self.level < 1.0 {
                for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                    *l *= self.level;
                    *r *= self.level;
                }
            }
            return;
        }
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            self.level += self.step;
            if self.step > 0.0 && self.level >= 1.0 {
                self.level = 1.0;
                self.step = 0.0;
            } else if self.step < 0.0 && self.level <= 0.0 {
                self.level = 0.0;
                self.step = 0.0;
            }
            *l *= self.level;
            *r *= self.level;
        }
    }
}

/// The audible note of one legato line plus at most one clone fading out.
pub struct LegatoChain {
    current: Note,
    fading: Option<Note>,
}

impl LegatoChain {
    pub fn new(note: Note) -> Self {
        Self {
            current: note,
            fading: None,
        }
    }

    pub fn current(&self) -> &Note {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Note {
        &mut self.current
    }

    pub fn fading(&self) -> Option<&Note> {
        self.fading.as_ref()
    }

    pub fn is_transitioning(&self) -> bool {
        self.fading.is_some()
    }

    /// Glide into a new pitch. A crossfade still in flight is cut short: its
    /// clone is dropped and the new clone, taken from the audible note, starts
    /// its fade-out at unity.
    ///
    /// On allocation failure the chain keeps playing the old pitch untouched.
    pub fn legato(&mut self, freq: f32, velocity: f32, portamento: bool, midinote: u8) -> Result<()> {
        if self.fading.take().is_some() {
            tracing::debug!("Legato restarted before the previous crossfade ended");
        }
        let clone = Note::legato_fade_out(&self.current)?;
        self.current.legato_fade_in(freq, velocity, portamento, midinote);
        self.fading = Some(clone);
        Ok(())
    }

    pub fn release_key(&mut self) {
        self.current.release_key();
        if let Some(fading) = self.fading.as_mut() {
            fading.release_key();
        }
    }

    pub fn kill(&mut self) {
        self.current.kill();
        self.fading = None;
    }

    /// Add one block of both notes to the outputs. Returns false once the
    /// audible note has finished.
    pub fn render_block(
        &mut self,
        out_l: &mut [f32],
        out_r: &mut [f32],
        ctl: &Controller,
        scratch: &mut RenderScratch,
    ) -> bool {
        let alive = self.current.render_block(out_l, out_r, ctl, scratch);
        if let Some(fading) = self.fading.as_mut() {
            let fading_alive = fading.render_block(out_l, out_r, ctl, scratch);
            if !fading_alive || fading.legato().is_silent() {
                tracing::debug!("Legato crossfade finished");
                self.fading = None;
            }
        }
        alive
    }
}
