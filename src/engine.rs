//! SynthEngine: a minimal host that owns notes by id and renders them.

use std::fmt;
use std::sync::Arc;

use cantus_dsp::Timing;
use cantus_voice::{
    Controller, LegatoChain, Note, ParameterStore, RenderScratch, VoiceParameterSet,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use crate::builder::{EngineConfig, SynthEngineBuilder};
use crate::{Error, Result};

/// Handle to a note started with [`SynthEngine::note_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteId(u64);

impl NoteId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns the sounding notes and mixes them into caller buffers.
///
/// The engine makes no scheduling decisions: the caller says when a note
/// starts, glides, releases or is killed. Each note id names a legato line,
/// so [`legato`](Self::legato) crossfades within it.
///
/// # Example
///
/// ```ignore
/// use cantus::prelude::*;
///
/// let mut engine = SynthEngine::builder()
///     .sample_rate(48000.0)
///     .parameters(VoiceParameterSet::single_voice(OscillatorTable::sine(1024)?))
///     .build()?;
///
/// let id = engine.note_on(440.0, 0.9, false, 69)?;
/// let (mut left, mut right) = (vec![0.0; 512], vec![0.0; 512]);
/// engine.render(&mut left, &mut right);
/// engine.legato(id, 660.0, 0.9, false, 76)?;
/// engine.release(id)?;
/// ```
pub struct SynthEngine {
    config: EngineConfig,
    store: Arc<ParameterStore>,
    controller: Controller,
    notes: Vec<(NoteId, LegatoChain)>,
    scratch: RenderScratch,
    rng: Pcg32,
    next_id: u64,
}

impl SynthEngine {
    pub fn builder() -> SynthEngineBuilder {
        SynthEngineBuilder::default()
    }

    pub(crate) fn from_parts(config: EngineConfig, parameters: VoiceParameterSet) -> Self {
        Self {
            config,
            store: ParameterStore::shared(parameters),
            controller: Controller::default(),
            notes: Vec::new(),
            scratch: RenderScratch::with_capacity(config.buffer_size, 1),
            rng: Pcg32::seed_from_u64(config.seed),
            next_id: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn timing(&self) -> Timing {
        Timing::new(self.config.sample_rate, self.config.buffer_size)
    }

    /// Shared parameter store, for publishing from another thread.
    pub fn parameter_store(&self) -> Arc<ParameterStore> {
        Arc::clone(&self.store)
    }

    /// Publish a new parameter set. Sounding notes pick it up on their next block.
    pub fn set_parameters(&self, parameters: VoiceParameterSet) {
        self.store.update(parameters);
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    /// Start a note. On failure nothing else is affected.
    pub fn note_on(
        &mut self,
        freq: f32,
        velocity: f32,
        portamento: bool,
        midinote: u8,
    ) -> Result<NoteId> {
        let note = Note::new(
            Arc::clone(&self.store),
            freq,
            velocity,
            portamento,
            midinote,
            self.timing(),
            self.rng.gen(),
        )?;
        let id = NoteId(self.next_id);
        self.next_id += 1;
        self.notes.push((id, LegatoChain::new(note)));
        Ok(id)
    }

    /// Crossfade note `id` to a new pitch.
    pub fn legato(
        &mut self,
        id: NoteId,
        freq: f32,
        velocity: f32,
        portamento: bool,
        midinote: u8,
    ) -> Result<()> {
        self.chain_mut(id)?.legato(freq, velocity, portamento, midinote)?;
        Ok(())
    }

    pub fn release(&mut self, id: NoteId) -> Result<()> {
        self.chain_mut(id)?.release_key();
        Ok(())
    }

    /// Stop note `id` immediately, without a release stage.
    pub fn kill(&mut self, id: NoteId) -> Result<()> {
        let index = self
            .notes
            .iter()
            .position(|(note_id, _)| *note_id == id)
            .ok_or(Error::UnknownNote(id))?;
        let (_, mut chain) = self.notes.remove(index);
        chain.kill();
        Ok(())
    }

    pub fn note(&self, id: NoteId) -> Option<&LegatoChain> {
        self.notes
            .iter()
            .find(|(note_id, _)| *note_id == id)
            .map(|(_, chain)| chain)
    }

    pub fn active_notes(&self) -> usize {
        self.notes.len()
    }

    /// Render every note into `out_l`/`out_r`, overwriting them. Long buffers
    /// are processed in blocks of the configured buffer size. Finished notes
    /// are dropped.
    ///
    /// Envelopes and LFOs advance once per block, so lengths should be a
    /// multiple of the buffer size. A shorter trailing chunk still advances
    /// them by a whole block, which slightly speeds up every time-based
    /// stage.
    pub fn render(&mut self, out_l: &mut [f32], out_r: &mut [f32]) {
        out_l.fill(0.0);
        out_r.fill(0.0);
        let block = self.config.buffer_size;
        for (left, right) in out_l.chunks_mut(block).zip(out_r.chunks_mut(block)) {
            let controller = self.controller;
            let scratch = &mut self.scratch;
            self.notes.retain_mut(|(id, chain)| {
                let alive = chain.render_block(left, right, &controller, scratch);
                if !alive {
                    tracing::debug!(note = %id, "Note removed");
                }
                alive
            });
        }
    }

    fn chain_mut(&mut self, id: NoteId) -> Result<&mut LegatoChain> {
        self.notes
            .iter_mut()
            .find(|(note_id, _)| *note_id == id)
            .map(|(_, chain)| chain)
            .ok_or(Error::UnknownNote(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cantus_dsp::OscillatorTable;

    fn engine() -> SynthEngine {
        SynthEngine::builder()
            .sample_rate(48000.0)
            .buffer_size(128)
            .parameters(VoiceParameterSet::single_voice(OscillatorTable::sine(512).unwrap()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_note_ids_are_unique() {
        let mut engine = engine();
        let a = engine.note_on(440.0, 1.0, false, 69).unwrap();
        let b = engine.note_on(220.0, 1.0, false, 57).unwrap();
        assert_ne!(a, b);
        assert_eq!(engine.active_notes(), 2);
    }

    #[test]
    fn test_unknown_note() {
        let mut engine = engine();
        let id = engine.note_on(440.0, 1.0, false, 69).unwrap();
        engine.kill(id).unwrap();
        assert!(matches!(engine.release(id), Err(Error::UnknownNote(_))));
        assert!(matches!(engine.kill(id), Err(Error::UnknownNote(_))));
        assert_eq!(engine.active_notes(), 0);
    }

    #[test]
    fn test_bad_note_leaves_others_playing() {
        let mut engine = engine();
        engine.note_on(440.0, 1.0, false, 69).unwrap();
        assert!(engine.note_on(-1.0, 1.0, false, 69).is_err());
        assert_eq!(engine.active_notes(), 1);
    }

    #[test]
    fn test_render_splits_long_buffers() {
        let mut engine = engine();
        engine.note_on(440.0, 1.0, false, 69).unwrap();
        let mut left = vec![0.0f32; 1000];
        let mut right = vec![0.0f32; 1000];
        engine.render(&mut left, &mut right);
        assert!(left[900..].iter().any(|&s| s.abs() > 0.01));
    }

    #[test]
    fn test_block_multiples_render_like_single_blocks() {
        let mut whole = engine();
        let mut split = engine();
        whole.note_on(440.0, 1.0, false, 69).unwrap();
        split.note_on(440.0, 1.0, false, 69).unwrap();

        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        whole.render(&mut left, &mut right);

        let mut joined = Vec::with_capacity(512);
        for _ in 0..4 {
            let mut l = vec![0.0f32; 128];
            let mut r = vec![0.0f32; 128];
            split.render(&mut l, &mut r);
            joined.extend_from_slice(&l);
        }
        assert_eq!(left, joined);
    }

    #[test]
    fn test_display() {
        assert_eq!(NoteId(12).to_string(), "#12");
    }
}
