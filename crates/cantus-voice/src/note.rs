//! A sounding note: the voice slots, note-wide modulation and the per-block
//! render entry point.

use std::sync::Arc;

use cantus_dsp::{Envelope, EnvelopeGenerator, Lfo, LfoGenerator, Timing};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use crate::controller::Controller;
use crate::declick::Punch;
use crate::error::{try_with_capacity, Error, Result};
use crate::legato::LegatoFade;
use crate::math::{apply_amplitude, bandwidth_multiplier, detune_cents, pan_gains, pan_gains_unit, velocity_factor};
use crate::modulation::Depth;
use crate::params::{GlobalParams, VoiceParameterSet, NUM_VOICES};
use crate::scratch::{zeroed, RenderScratch};
use crate::store::ParameterStore;
use crate::voice::{BlockContext, Buses, NoteContext, StereoFilter, VoiceSlot};

/// Note-wide envelopes, LFOs and filter.
#[derive(Clone)]
struct GlobalModulation {
    freq_envelope: Box<dyn EnvelopeGenerator>,
    freq_lfo: Box<dyn LfoGenerator>,
    amp_envelope: Box<dyn EnvelopeGenerator>,
    amp_lfo: Box<dyn LfoGenerator>,
    filter_envelope: Box<dyn EnvelopeGenerator>,
    filter_lfo: Box<dyn LfoGenerator>,
    filter: Option<StereoFilter>,
    amplitude: Depth,
}

impl GlobalModulation {
    fn new(params: &GlobalParams, note: &NoteContext, rng: &mut Pcg32) -> Self {
        let (freq, timing) = (note.freq, note.timing);
        Self {
            freq_envelope: Envelope::boxed(&params.freq_envelope, freq, timing),
            freq_lfo: Lfo::boxed(&params.freq_lfo, freq, timing, rng.gen()),
            amp_envelope: Envelope::boxed(&params.amp_envelope, freq, timing),
            amp_lfo: Lfo::boxed(&params.amp_lfo, freq, timing, rng.gen()),
            filter_envelope: Envelope::boxed(&params.filter_envelope, freq, timing),
            filter_lfo: Lfo::boxed(&params.filter_lfo, freq, timing, rng.gen()),
            filter: params.filter.as_ref().map(|f| StereoFilter::new(f, note)),
            amplitude: Depth::default(),
        }
    }

    fn sample_amplitude(&mut self, volume: f32) -> f32 {
        volume * self.amp_envelope.sample_amplitude() * self.amp_lfo.sample_amplitude()
    }

    fn release_key(&mut self) {
        self.freq_envelope.release_key();
        self.amp_envelope.release_key();
        self.filter_envelope.release_key();
    }
}

/// `4 * 0.1^(3(1 - v/96))`, +12 dB at full scale, with velocity sensing.
fn global_volume(params: &GlobalParams, velocity: f32) -> f32 {
    4.0 * 0.1f32.powf(3.0 * (1.0 - params.volume / 96.0))
        * velocity_factor(velocity, params.velocity_sense)
}

/// One note: up to [`NUM_VOICES`] voice slots plus note-wide modulation.
///
/// A note reads its parameters from a shared [`ParameterStore`]. The store's
/// generation is checked once per block; when it has moved, every cached
/// coefficient is recomputed from the new snapshot. The voice structure
/// (which slots play, unison sizes, modulation kinds, sub-voice trees) is
/// fixed at note-on.
pub struct Note {
    store: Arc<ParameterStore>,
    params: Arc<VoiceParameterSet>,
    generation: u64,
    ctx: NoteContext,
    portamento: bool,
    voices: Vec<Option<VoiceSlot>>,
    global: GlobalModulation,
    volume: f32,
    pan: (f32, f32),
    random_pan: f32,
    punch: Punch,
    legato: LegatoFade,
    finished: bool,
}

impl Note {
    /// Build a note from the store's current snapshot.
    ///
    /// `seed` fixes every random choice (unison jitter, start phases, random
    /// pan, LFO phases, noise), so equal seeds render equal audio.
    pub fn new(
        store: Arc<ParameterStore>,
        freq: f32,
        velocity: f32,
        portamento: bool,
        midinote: u8,
        timing: Timing,
        seed: u64,
    ) -> Result<Self> {
        if !(freq.is_finite() && freq > 0.0) {
            return Err(Error::InvalidConfig(format!("note frequency {freq} Hz")));
        }
        let generation = store.generation();
        let params = store.load();
        let global = &params.global;
        let mut rng = Pcg32::seed_from_u64(seed);

        let ctx = NoteContext {
            timing,
            freq,
            velocity: velocity.clamp(0.0, 1.0),
            midinote,
            bandwidth_multiplier: bandwidth_multiplier(global.bandwidth),
            global_detune_cents: 0.0,
            global_curve: global.detune.curve.unwrap_or_default(),
            stereo: global.stereo,
        };

        let mut voices = try_with_capacity(NUM_VOICES, "voice slots")?;
        for index in 0..NUM_VOICES {
            let voice_seed: u64 = rng.gen();
            let slot = if params.voices[index].enabled {
                Some(VoiceSlot::new(&params, index, &ctx, false, voice_seed)?)
            } else {
                None
            };
            voices.push(slot);
        }

        let global_modulation = GlobalModulation::new(global, &ctx, &mut rng);
        let random_pan = rng.gen::<f32>();
        let punch = Punch::new(&global.punch, freq, ctx.velocity, timing.sample_rate);

        let mut note = Self {
            store,
            params: params.clone(),
            generation,
            ctx,
            portamento,
            voices,
            global: global_modulation,
            volume: 0.0,
            pan: (1.0, 1.0),
            random_pan,
            punch,
            legato: LegatoFade::idle(),
            finished: false,
        };
        note.refresh();
        let amplitude = note.global.sample_amplitude(note.volume);
        note.global.amplitude = Depth::new(amplitude);

        tracing::debug!(
            midinote,
            freq,
            voices = note.active_voices(),
            "Note on"
        );
        Ok(note)
    }

    /// Recompute every cached coefficient from the current snapshot.
    fn refresh(&mut self) {
        let global = &self.params.global;
        let curve = global.detune.curve.unwrap_or_default();
        self.ctx.global_curve = curve;
        self.ctx.global_detune_cents = detune_cents(curve, global.detune.coarse, global.detune.fine);
        self.ctx.bandwidth_multiplier = bandwidth_multiplier(global.bandwidth);
        self.ctx.stereo = global.stereo;
        self.volume = global_volume(global, self.ctx.velocity);
        self.pan = if global.pan <= 0.0 {
            pan_gains_unit(self.random_pan)
        } else {
            pan_gains(global.pan)
        };
        if let (Some(filter), Some(params)) = (self.global.filter.as_mut(), global.filter.as_ref()) {
            filter.refresh(params, &self.ctx);
        }
        for voice in self.voices.iter_mut().flatten() {
            voice.refresh(&self.params, &self.ctx);
        }
    }

    fn reload_if_changed(&mut self) {
        if let Some(params) = self.store.load_if_changed(&mut self.generation) {
            self.params = params;
            self.refresh();
        }
    }

    /// Independent deep copy of the whole graph: every voice, sub-voice,
    /// generator and filter state.
    pub fn clone_graph(&self) -> Result<Note> {
        let mut voices = try_with_capacity(self.voices.len(), "cloned voice slots")?;
        voices.extend(self.voices.iter().cloned());
        Ok(Note {
            store: Arc::clone(&self.store),
            params: Arc::clone(&self.params),
            generation: self.generation,
            ctx: self.ctx,
            portamento: self.portamento,
            voices,
            global: self.global.clone(),
            volume: self.volume,
            pan: self.pan,
            random_pan: self.random_pan,
            punch: self.punch,
            legato: self.legato,
            finished: self.finished,
        })
    }

    /// Clone `source` as the outgoing half of a legato crossfade. The clone
    /// fades from unity down to silence, even when `source` is itself still
    /// fading in, so the audible level carries over unchanged.
    pub fn legato_fade_out(source: &Note) -> Result<Note> {
        let mut clone = source.clone_graph()?;
        clone.legato = LegatoFade::fade_out(1.0, source.ctx.timing.sample_rate);
        tracing::debug!(midinote = source.ctx.midinote, "Legato fade-out clone");
        Ok(clone)
    }

    /// Retarget this note to a new pitch and fade it in. Envelopes keep
    /// running; nothing is retriggered.
    pub fn legato_fade_in(&mut self, freq: f32, velocity: f32, portamento: bool, midinote: u8) {
        if freq.is_finite() && freq > 0.0 {
            self.ctx.freq = freq;
        }
        self.ctx.velocity = velocity.clamp(0.0, 1.0);
        self.ctx.midinote = midinote;
        self.portamento = portamento;
        self.refresh();
        self.legato = LegatoFade::fade_in(self.ctx.timing.sample_rate);
        tracing::debug!(midinote, freq, "Legato fade-in");
    }

    /// Enter the release stage of every envelope, recursively.
    pub fn release_key(&mut self) {
        self.global.release_key();
        for voice in self.voices.iter_mut().flatten() {
            voice.release_key();
        }
    }

    /// Drop all voices immediately.
    pub fn kill(&mut self) {
        if !self.finished {
            tracing::debug!(midinote = self.ctx.midinote, "Note killed");
        }
        for slot in self.voices.iter_mut() {
            *slot = None;
        }
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn frequency(&self) -> f32 {
        self.ctx.freq
    }

    pub fn midinote(&self) -> u8 {
        self.ctx.midinote
    }

    pub fn velocity(&self) -> f32 {
        self.ctx.velocity
    }

    pub fn timing(&self) -> Timing {
        self.ctx.timing
    }

    pub fn legato(&self) -> LegatoFade {
        self.legato
    }

    /// Voices still sounding.
    pub fn active_voices(&self) -> usize {
        self.voices.iter().flatten().count()
    }

    pub fn voice(&self, index: usize) -> Option<&VoiceSlot> {
        self.voices.get(index).and_then(Option::as_ref)
    }

    /// Add one block to `out_l`/`out_r`.
    ///
    /// Returns false once the note has finished. The block in which the
    /// note-wide amplitude envelope completes still carries a closing fade.
    pub fn render_block(
        &mut self,
        out_l: &mut [f32],
        out_r: &mut [f32],
        ctl: &Controller,
        scratch: &mut RenderScratch,
    ) -> bool {
        if self.finished {
            return false;
        }
        let n = out_l.len().min(out_r.len());
        if n == 0 {
            return true;
        }
        scratch.reset();
        self.reload_if_changed();
        let bump = scratch.arena();

        let portamento = if self.portamento { ctl.portamento.freq_ratio } else { 1.0 };
        // The block the glide ends in still uses its last ratio.
        if !ctl.portamento.used {
            self.portamento = false;
        }
        let global_pitch = 0.01
            * (self.global.freq_envelope.sample() + self.global.freq_lfo.sample() * ctl.mod_wheel);
        let amplitude = self.global.sample_amplitude(self.volume);
        self.global.amplitude.push(amplitude);
        if let Some(filter) = self.global.filter.as_mut() {
            let pitch = self.global.filter_envelope.sample() + self.global.filter_lfo.sample() + ctl.filter_cutoff;
            filter.update(pitch, ctl.filter_q);
        }

        let ctx = BlockContext {
            note: &self.ctx,
            ctl,
            global_pitch,
            portamento,
        };
        let mut buses = Buses {
            main_l: zeroed(bump, n),
            main_r: zeroed(bump, n),
            bypass_l: zeroed(bump, n),
            bypass_r: zeroed(bump, n),
        };

        for (index, slot) in self.voices.iter_mut().enumerate() {
            let Some(voice) = slot.as_mut() else {
                continue;
            };
            if !voice.begin_block(&ctx) {
                continue;
            }
            if voice.render(bump, n, &ctx, &mut buses) {
                tracing::debug!(voice = index, "Voice finished");
                *slot = None;
            }
        }

        let Buses {
            main_l,
            main_r,
            bypass_l,
            bypass_r,
        } = buses;
        let stereo = self.ctx.stereo;
        if let Some(filter) = self.global.filter.as_mut() {
            filter.process(main_l, if stereo { Some(&mut *main_r) } else { None });
        }
        if !stereo {
            main_r.copy_from_slice(main_l);
            bypass_r.copy_from_slice(bypass_l);
        }
        for (m, b) in main_l.iter_mut().zip(bypass_l.iter()) {
            *m += b;
        }
        for (m, b) in main_r.iter_mut().zip(bypass_r.iter()) {
            *m += b;
        }

        let Depth { old, new } = self.global.amplitude;
        apply_amplitude(main_l, old * self.pan.0, new * self.pan.0);
        apply_amplitude(main_r, old * self.pan.1, new * self.pan.1);

        self.punch.apply(main_l, main_r);
        self.legato.apply(main_l, main_r);

        if self.global.amp_envelope.finished() {
            for (i, (l, r)) in main_l.iter_mut().zip(main_r.iter_mut()).enumerate() {
                let fade = 1.0 - i as f32 / n as f32;
                *l *= fade;
                *r *= fade;
            }
            self.finished = true;
            tracing::debug!(midinote = self.ctx.midinote, "Note finished");
        }

        for (o, &s) in out_l.iter_mut().zip(main_l.iter()) {
            *o += s;
        }
        for (o, &s) in out_r.iter_mut().zip(main_r.iter()) {
            *o += s;
        }
        !self.finished
    }
}
