//! One voice slot of a note, and the nested sub-voices it owns.
//!
//! A top-level slot renders its unison copies, mixes them into stereo, applies
//! amplitude, declick and its own filter, then adds the result to the note's
//! filtered or bypass bus. A nested slot (a sub-voice) is the same machinery
//! driven by its parent: it gets a frequency and optionally a phase-offset
//! buffer, and hands back its raw oscillator times its amplitude.

use bumpalo::Bump;
use cantus_dsp::{
    Biquad, Envelope, EnvelopeGenerator, EnvelopeParams, FilterParams, FilterState, Lfo,
    LfoGenerator, LfoParams, OscillatorTable, Timing,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use crate::controller::Controller;
use crate::declick::fade_in;
use crate::error::{try_with_capacity, try_zeroed, Result};
use crate::math::{
    apply_amplitude, detune_cents, pan_gains, pan_gains_unit, velocity_factor, DetuneCurve,
};
use crate::modulation::{
    apply_depth, freq_mod_normalize, frequency_offsets, modulator_volume, morph, phase_offsets,
    ring, ring_to_side, Depth, ModSource, Modulation, Modulator, ReplayCursor,
};
use crate::params::{ModulationKind, VoiceKind, VoiceParameterSet, VoiceParams};
use crate::phase::{Phase, PhaseStep};
use crate::scratch::zeroed;
use crate::unison::UnisonEngine;

/// Gain of a voice mixed into a mono note.
const MONO_GAIN: f32 = 0.7;

/// Note-wide values voices derive their cached coefficients from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NoteContext {
    pub timing: Timing,
    pub freq: f32,
    pub velocity: f32,
    pub midinote: u8,
    pub bandwidth_multiplier: f32,
    pub global_detune_cents: f32,
    pub global_curve: DetuneCurve,
    pub stereo: bool,
}

/// Values computed once per block and shared by every voice of a note.
#[derive(Clone, Copy)]
pub(crate) struct BlockContext<'a> {
    pub note: &'a NoteContext,
    pub ctl: &'a Controller,
    /// Note-wide pitch offset in semitones.
    pub global_pitch: f32,
    pub portamento: f32,
}

/// The note's accumulation buses for one block.
pub(crate) struct Buses<'b> {
    pub main_l: &'b mut [f32],
    pub main_r: &'b mut [f32],
    pub bypass_l: &'b mut [f32],
    pub bypass_r: &'b mut [f32],
}

/// A stereo filter pair positioned in octaves around 1 kHz.
#[derive(Clone)]
pub(crate) struct StereoFilter {
    left: Box<dyn FilterState>,
    right: Box<dyn FilterState>,
    center_pitch: f32,
    tracking: f32,
    q: f32,
}

impl StereoFilter {
    pub fn new(params: &FilterParams, note: &NoteContext) -> Self {
        let sample_rate = note.timing.sample_rate;
        let mut filter = Self {
            left: Biquad::boxed(params, sample_rate),
            right: Biquad::boxed(params, sample_rate),
            center_pitch: 0.0,
            tracking: 0.0,
            q: 0.0,
        };
        filter.refresh(params, note);
        filter
    }

    pub fn refresh(&mut self, params: &FilterParams, note: &NoteContext) {
        let velocity = velocity_factor(note.velocity, params.velocity_sense);
        self.center_pitch = params.center_pitch() + params.velocity_offset(velocity);
        self.tracking = params.tracking(note.freq);
        self.q = params.q_factor();
    }

    /// Retune to the centre moved by `pitch` octaves.
    pub fn update(&mut self, pitch: f32, q_scale: f32) {
        let freq = FilterParams::real_freq(self.center_pitch + pitch + self.tracking);
        let q = self.q * q_scale;
        self.left.set_freq_and_q(freq, q);
        self.right.set_freq_and_q(freq, q);
    }

    pub fn process(&mut self, left: &mut [f32], right: Option<&mut [f32]>) {
        self.left.process(left);
        if let Some(right) = right {
            self.right.process(right);
        }
    }
}

#[derive(Clone)]
enum Carrier {
    Table(OscillatorTable),
    Noise,
    /// A lower voice rendered live, one per copy.
    Voice(Vec<VoiceSlot>),
    /// No usable table; the voice renders silence.
    Silent,
}

#[derive(Debug, Clone, Copy, Default)]
struct CarrierCopy {
    cursor: ReplayCursor,
    step: PhaseStep,
    freq: f32,
}

/// One oscillator chain of a note.
#[derive(Clone)]
pub struct VoiceSlot {
    index: usize,
    nested: bool,
    carrier: Carrier,
    modulation: Modulation,
    unison: UnisonEngine,
    /// Carrier copies. Pulse-width voices have two per unison copy.
    copies: Vec<CarrierCopy>,

    detune_cents: f32,
    fine_cents: f32,
    fixed_freq: Option<f32>,
    volume: f32,
    pan: (f32, f32),
    random_pan: f32,
    delay_ticks: i64,
    first_block: bool,
    filter_bypass: bool,
    stereo: bool,

    amp_envelope: Option<Box<dyn EnvelopeGenerator>>,
    amp_lfo: Option<Box<dyn LfoGenerator>>,
    freq_envelope: Option<Box<dyn EnvelopeGenerator>>,
    freq_lfo: Option<Box<dyn LfoGenerator>>,
    filter_envelope: Option<Box<dyn EnvelopeGenerator>>,
    filter_lfo: Option<Box<dyn LfoGenerator>>,
    filter: Option<StereoFilter>,

    amplitude: Depth,
    rng: Pcg32,
}

fn envelope(params: Option<&EnvelopeParams>, note: &NoteContext) -> Option<Box<dyn EnvelopeGenerator>> {
    params.map(|p| Envelope::boxed(p, note.freq, note.timing))
}

fn lfo(params: Option<&LfoParams>, note: &NoteContext, rng: &mut Pcg32) -> Option<Box<dyn LfoGenerator>> {
    params.map(|p| Lfo::boxed(p, note.freq, note.timing, rng.gen()))
}

/// Key-scaled fixed frequency, if the voice ignores the played pitch.
fn fixed_frequency(params: &VoiceParams, midinote: u8) -> Option<f32> {
    if !params.fixed_freq {
        return None;
    }
    let mut freq = 440.0;
    let et = params.fixed_freq_et;
    if et > 0 {
        let octaves = (midinote as f32 - 69.0) / 12.0 * (((et as f32 - 1.0) / 63.0).exp2() - 1.0);
        freq *= if et <= 64 {
            octaves.exp2()
        } else {
            3f32.powf(octaves)
        };
    }
    Some(freq)
}

/// `0.1^(3(1 - v/127))`, -60 dB .. 0 dB, with velocity sensing and sign.
fn voice_volume(params: &VoiceParams, velocity: f32) -> f32 {
    let volume = 0.1f32.powf(3.0 * (1.0 - params.volume / 127.0))
        * velocity_factor(velocity, params.velocity_sense);
    if params.volume_minus {
        -volume
    } else {
        volume
    }
}

/// Onset delay in blocks.
fn delay_ticks(delay: f32, timing: Timing) -> i64 {
    let seconds = ((delay / 127.0 * 50f32.ln()).exp() - 1.0) / 10.0;
    (seconds / timing.buffer_size as f32 * timing.sample_rate).trunc() as i64
}

impl VoiceSlot {
    /// Build slot `index` of `set`. A nested slot is a sub-voice: unison is
    /// forced to one copy and volume, pan, delay and filtering are left to
    /// the parent.
    pub(crate) fn new(
        set: &VoiceParameterSet,
        index: usize,
        note: &NoteContext,
        nested: bool,
        seed: u64,
    ) -> Result<Self> {
        let params = &set.voices[index];
        let mut rng = Pcg32::seed_from_u64(seed);

        let kind = match params.kind {
            VoiceKind::WhiteNoise => ModulationKind::None,
            VoiceKind::Sound => params.modulator.kind,
        };
        let pair = if kind == ModulationKind::PulseWidth { 2 } else { 1 };
        let size = if nested { 1 } else { params.unison.size.max(1) };
        let raw = size * pair;

        let unison = UnisonEngine::new(&params.unison, size, note.timing.blocks_per_second(), &mut rng)?;
        let random_pan = rng.gen::<f32>();

        let mut starts: Vec<f32> = try_with_capacity(size, "start phases")?;
        for _ in 0..size {
            starts.push(if size > 1 { rng.gen() } else { params.start_phase });
        }

        let carrier = match params.kind {
            VoiceKind::WhiteNoise => Carrier::Noise,
            VoiceKind::Sound => match params.voice_source {
                Some(source) => Carrier::Voice(nested_voices(set, source, note, size, pair, &mut rng)?),
                None => match set.carrier_table(index) {
                    Some(table) => Carrier::Table(table),
                    None => {
                        tracing::debug!("Voice {} has no oscillator table; rendering silence", index);
                        Carrier::Silent
                    }
                },
            },
        };

        let table_len = match &carrier {
            Carrier::Table(table) => table.len(),
            _ => 0,
        };
        let mut copies: Vec<CarrierCopy> = try_with_capacity(raw, "carrier copies")?;
        for k in 0..raw {
            let phase = if table_len > 0 {
                Phase::from_cycles(starts[k / pair], table_len)
            } else {
                Phase::default()
            };
            copies.push(CarrierCopy {
                cursor: ReplayCursor::new(phase),
                ..Default::default()
            });
        }

        let modulation = build_modulation(set, index, note, kind, &starts, raw, &mut rng)?;

        let filter = match (&params.filter, nested) {
            (Some(filter), false) => Some(StereoFilter::new(filter, note)),
            _ => None,
        };

        let mut slot = Self {
            index,
            nested,
            carrier,
            modulation,
            unison,
            copies,
            detune_cents: 0.0,
            fine_cents: 0.0,
            fixed_freq: None,
            volume: 0.0,
            pan: (1.0, 1.0),
            random_pan,
            delay_ticks: if nested { 0 } else { delay_ticks(params.delay, note.timing) },
            first_block: true,
            filter_bypass: false,
            stereo: true,
            amp_envelope: envelope(params.amp_envelope.as_ref(), note),
            amp_lfo: lfo(params.amp_lfo.as_ref(), note, &mut rng),
            freq_envelope: envelope(params.freq_envelope.as_ref(), note),
            freq_lfo: lfo(params.freq_lfo.as_ref(), note, &mut rng),
            filter_envelope: envelope(params.filter_envelope.as_ref(), note),
            filter_lfo: lfo(params.filter_lfo.as_ref(), note, &mut rng),
            filter,
            amplitude: Depth::default(),
            rng,
        };
        slot.refresh(set, note);

        let amplitude = slot.sample_amplitude();
        slot.amplitude = Depth::new(amplitude);
        if let Some(m) = slot.modulation.modulator_mut() {
            let mut depth = m.volume;
            if let Some(env) = m.amp_envelope.as_mut() {
                depth *= env.sample_amplitude();
            }
            m.depth = Depth::new(depth);
        }
        Ok(slot)
    }

    /// Recompute everything derived from the parameter values. The shape of
    /// the slot (copies, sources, modulation kind) stays as built.
    pub(crate) fn refresh(&mut self, set: &VoiceParameterSet, note: &NoteContext) {
        let params = &set.voices[self.index];
        let curve = params.detune.curve.unwrap_or(note.global_curve);
        self.detune_cents = detune_cents(curve, params.detune.coarse, 8192);
        self.fine_cents = detune_cents(curve, 0, params.detune.fine);
        self.fixed_freq = fixed_frequency(params, note.midinote);
        self.volume = voice_volume(params, note.velocity);
        self.pan = if params.pan <= 0.0 {
            pan_gains_unit(self.random_pan)
        } else {
            pan_gains(params.pan)
        };
        self.filter_bypass = params.filter_bypass;
        self.stereo = params.stereo;
        if let (Some(filter), Some(filter_params)) = (self.filter.as_mut(), params.filter.as_ref()) {
            filter.refresh(filter_params, note);
        }

        let base_freq = self.base_freq(note, 1.0);
        let kind = self.modulation.kind();
        if let Some(m) = self.modulation.modulator_mut() {
            let mp = &params.modulator;
            let velocity = velocity_factor(note.velocity, mp.velocity_sense);
            m.volume = modulator_volume(kind, mp.volume, mp.damp, base_freq, velocity);
            let curve = mp.detune.curve.unwrap_or(note.global_curve);
            m.detune_cents = detune_cents(curve, mp.detune.coarse, mp.detune.fine);
            if let ModSource::Voice(subs) = &mut m.source {
                for sub in subs {
                    sub.refresh(set, note);
                }
            }
        }
        if let Carrier::Voice(subs) = &mut self.carrier {
            for sub in subs {
                sub.refresh(set, note);
            }
        }
    }

    /// Slot index in the parameter set.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    pub fn modulation_kind(&self) -> ModulationKind {
        self.modulation.kind()
    }

    /// Carrier copies, two per unison copy in pulse-width mode.
    pub fn copies(&self) -> usize {
        self.copies.len()
    }

    pub fn unison_size(&self) -> usize {
        self.unison.size()
    }

    /// Sub-voices owned directly by this slot.
    pub fn nested_voices(&self) -> usize {
        let carriers = match &self.carrier {
            Carrier::Voice(subs) => subs.len(),
            _ => 0,
        };
        let modulators = match self.modulation.modulator().map(|m| &m.source) {
            Some(ModSource::Voice(subs)) => subs.len(),
            _ => 0,
        };
        carriers + modulators
    }

    /// Carrier read positions, for inspection.
    pub fn phases(&self) -> impl Iterator<Item = Phase> + '_ {
        self.copies.iter().map(|c| c.cursor.phase())
    }

    pub fn is_finished(&self) -> bool {
        self.amp_envelope.as_ref().is_some_and(|env| env.finished())
    }

    /// Enter the release stage of every envelope, recursively.
    pub fn release_key(&mut self) {
        for env in [
            self.amp_envelope.as_mut(),
            self.freq_envelope.as_mut(),
            self.filter_envelope.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            env.release_key();
        }
        if let Some(m) = self.modulation.modulator_mut() {
            m.release_key();
        }
        if let Carrier::Voice(subs) = &mut self.carrier {
            for sub in subs {
                sub.release_key();
            }
        }
    }

    #[inline]
    fn pair(&self) -> usize {
        if matches!(self.modulation, Modulation::PulseWidth(_)) {
            2
        } else {
            1
        }
    }

    fn base_freq(&self, note: &NoteContext, relbw: f32) -> f32 {
        let cents = self.detune_cents
            + self.fine_cents * relbw * note.bandwidth_multiplier
            + note.global_detune_cents;
        self.fixed_freq.unwrap_or(note.freq) * (cents / 1200.0).exp2()
    }

    fn sample_amplitude(&mut self) -> f32 {
        let mut amplitude = 1.0;
        if let Some(env) = self.amp_envelope.as_mut() {
            amplitude *= env.sample_amplitude();
        }
        if let Some(lfo) = self.amp_lfo.as_mut() {
            amplitude *= lfo.sample_amplitude();
        }
        amplitude
    }

    /// Count down the onset delay, then advance this block's generators.
    /// Returns false while the voice is still waiting.
    pub(crate) fn begin_block(&mut self, ctx: &BlockContext) -> bool {
        self.delay_ticks = self.delay_ticks.saturating_sub(1);
        if self.delay_ticks > 0 {
            return false;
        }
        let base_freq = self.base_freq(ctx.note, ctx.ctl.bandwidth);
        self.update(ctx, base_freq);
        true
    }

    /// Advance envelopes, LFOs and unison vibrato one block and retune every
    /// copy from `base_freq`.
    fn update(&mut self, ctx: &BlockContext, base_freq: f32) {
        let relbw = ctx.ctl.bandwidth;
        self.unison.update(relbw * ctx.note.bandwidth_multiplier);

        let amplitude = self.sample_amplitude();
        self.amplitude.push(amplitude);

        if let Some(filter) = self.filter.as_mut() {
            let mut pitch = 0.0;
            if let Some(env) = self.filter_envelope.as_mut() {
                pitch += env.sample();
            }
            if let Some(lfo) = self.filter_lfo.as_mut() {
                pitch += lfo.sample();
            }
            filter.update(pitch, 1.0);
        }

        if matches!(self.carrier, Carrier::Noise) {
            return;
        }

        let mut pitch = 0.0;
        if let Some(lfo) = self.freq_lfo.as_mut() {
            pitch += lfo.sample() / 100.0 * relbw;
        }
        if let Some(env) = self.freq_envelope.as_mut() {
            pitch += env.sample() / 100.0;
        }
        let (global_pitch, portamento, wheel) = if self.nested {
            (0.0, 1.0, 1.0)
        } else {
            (ctx.global_pitch, ctx.portamento, ctx.ctl.pitch_wheel)
        };
        let freq = base_freq * ((pitch + global_pitch) / 12.0).exp2() * portamento * wheel;

        let sample_rate = ctx.note.timing.sample_rate;
        let pair = self.pair();
        let ratios = self.unison.ratios();
        let table_len = match &self.carrier {
            Carrier::Table(table) => table.len(),
            _ => 0,
        };
        for (k, copy) in self.copies.iter_mut().enumerate() {
            copy.freq = freq * ratios[k / pair];
            if table_len > 0 {
                copy.step = PhaseStep::from_freq(copy.freq, table_len, sample_rate);
            }
        }

        if let Some(m) = self.modulation.modulator_mut() {
            let mut semitones = m.detune_cents / 100.0;
            if let Some(env) = m.freq_envelope.as_mut() {
                semitones += env.sample() / 100.0;
            }
            let mod_freq = (semitones / 12.0).exp2() * freq * portamento;
            let mod_len = match &m.source {
                ModSource::Table { table, .. } => table.len(),
                ModSource::Voice(_) => 0,
            };
            for (k, (step, f)) in m.steps.iter_mut().zip(m.freqs.iter_mut()).enumerate() {
                *f = mod_freq * ratios[k];
                if mod_len > 0 {
                    *step = PhaseStep::from_freq(*f, mod_len, sample_rate);
                }
            }

            let mut depth = m.volume * ctx.ctl.fm_amp;
            if let Some(env) = m.amp_envelope.as_mut() {
                depth *= env.sample_amplitude();
            }
            m.depth.push(depth);
        }
    }

    /// Render every carrier copy for one block, `n` samples per copy laid out
    /// back to back. `inherited` offsets (cycles) are added to this voice's
    /// own phase-domain offsets; `integrating` asks for per-sample means.
    fn render_copies<'b>(
        &mut self,
        bump: &'b Bump,
        n: usize,
        inherited: Option<&[f32]>,
        integrating: bool,
        ctx: &BlockContext,
    ) -> &'b mut [f32] {
        let raw = self.copies.len();
        let pair = self.pair();
        let waves = zeroed(bump, n * raw);

        let integrating_modulator = self.modulation.integrates();
        let mut signal = self
            .modulation
            .modulator_mut()
            .map(|m| render_modulator(m, bump, n, integrating_modulator, ctx));

        let mut offsets: Option<&'b mut [f32]> = None;
        if self.modulation.kind().is_phase_domain() || inherited.is_some() {
            let offs = zeroed(bump, n * raw);
            if let Some(signal) = signal.as_deref_mut() {
                match &mut self.modulation {
                    Modulation::Phase(m) => {
                        apply_depth(signal, m.depth);
                        phase_offsets(signal);
                        offs.copy_from_slice(signal);
                    }
                    Modulation::PulseWidth(m) => {
                        apply_depth(signal, m.depth);
                        phase_offsets(signal);
                        // Each pair reads the same modulator, pushed opposite ways.
                        for (k, chunk) in offs.chunks_mut(n).enumerate() {
                            let source = &signal[(k / 2) * n..(k / 2 + 1) * n];
                            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                            for (o, &s) in chunk.iter_mut().zip(source) {
                                *o = s * sign;
                            }
                        }
                    }
                    Modulation::Frequency { modulator, accumulated } => {
                        apply_depth(signal, modulator.depth);
                        let normalize = freq_mod_normalize(ctx.note.timing.sample_rate);
                        for (chunk, phase) in signal.chunks_mut(n).zip(accumulated.iter_mut()) {
                            frequency_offsets(chunk, phase, normalize);
                        }
                        offs.copy_from_slice(signal);
                    }
                    _ => {}
                }
            }
            if let Some(inherited) = inherited {
                for chunk in offs.chunks_mut(n) {
                    for (o, &i) in chunk.iter_mut().zip(inherited) {
                        *o += i;
                    }
                }
            }
            offsets = Some(offs);
        }

        let copies = &mut self.copies;
        match &mut self.carrier {
            Carrier::Table(table) => {
                for (k, (copy, wave)) in copies.iter_mut().zip(waves.chunks_mut(n)).enumerate() {
                    let offs = offsets.as_deref().map(|o| &o[k * n..(k + 1) * n]);
                    for (i, out) in wave.iter_mut().enumerate() {
                        let offset = offs.map_or(0.0, |o| o[i]);
                        *out = if integrating {
                            copy.cursor.integrate(table, copy.step, offset)
                        } else {
                            copy.cursor.sample(table, copy.step, offset)
                        };
                    }
                }
            }
            Carrier::Noise => {
                for s in waves.iter_mut() {
                    *s = self.rng.gen::<f32>() * 2.0 - 1.0;
                }
            }
            Carrier::Voice(subs) => {
                for (k, (sub, wave)) in subs.iter_mut().zip(waves.chunks_mut(n)).enumerate() {
                    let offs = offsets.as_deref().map(|o| &o[k * n..(k + 1) * n]);
                    let out = sub.render_nested(bump, n, copies[k].freq, offs, integrating, ctx);
                    wave.copy_from_slice(out);
                }
            }
            Carrier::Silent => {}
        }

        if let Some(signal) = signal.as_deref() {
            for (wave, modulator) in waves.chunks_mut(n).zip(signal.chunks(n)) {
                match &self.modulation {
                    Modulation::Morph(m) => morph(wave, modulator, m.depth),
                    Modulation::Ring(m) => ring(wave, modulator, m.depth),
                    Modulation::RingToSide(m) => ring_to_side(wave, modulator, m.depth),
                    _ => {}
                }
            }
        }

        if pair == 2 {
            for wave in waves.chunks_mut(n).skip(1).step_by(2) {
                for s in wave.iter_mut() {
                    *s = -*s;
                }
            }
        }
        waves
    }

    /// Render as a sub-voice at `freq` Hz: raw copies times amplitude.
    pub(crate) fn render_nested<'b>(
        &mut self,
        bump: &'b Bump,
        n: usize,
        freq: f32,
        inherited: Option<&[f32]>,
        integrating: bool,
        ctx: &BlockContext,
    ) -> &'b [f32] {
        let relbw = ctx.ctl.bandwidth * ctx.note.bandwidth_multiplier;
        let ratio = ((self.detune_cents + self.fine_cents * relbw) / 1200.0).exp2();
        self.update(ctx, freq * ratio);

        let waves = self.render_copies(bump, n, inherited, integrating, ctx);
        let out = zeroed(bump, n);
        let pair = self.pair();
        let gain = self.unison.gain();
        for (k, wave) in waves.chunks(n).enumerate() {
            let g = self.unison.polarity(k / pair) * gain;
            for (o, &w) in out.iter_mut().zip(wave) {
                *o += w * g;
            }
        }
        apply_amplitude(out, self.amplitude.old, self.amplitude.new);
        out
    }

    /// Render one block onto the note's buses. Returns true once the voice's
    /// amplitude envelope has finished; the block has then been faded out.
    pub(crate) fn render(&mut self, bump: &Bump, n: usize, ctx: &BlockContext, buses: &mut Buses) -> bool {
        let waves = self.render_copies(bump, n, None, false, ctx);
        let stereo = ctx.note.stereo && self.stereo;
        let left = zeroed(bump, n);
        let right = zeroed(bump, n);

        let pair = self.pair();
        for (k, wave) in waves.chunks(n).enumerate() {
            if stereo {
                let (gl, gr) = self.unison.pan_gains(k / pair);
                for ((l, r), &w) in left.iter_mut().zip(right.iter_mut()).zip(wave) {
                    *l += w * gl;
                    *r += w * gr;
                }
            } else {
                let g = self.unison.polarity(k / pair);
                for (l, &w) in left.iter_mut().zip(wave) {
                    *l += w * g;
                }
            }
        }

        let gain = self.unison.gain();
        let old = self.amplitude.old * gain;
        let new = self.amplitude.new * gain;
        apply_amplitude(left, old, new);
        if stereo {
            apply_amplitude(right, old, new);
        }

        if self.first_block {
            fade_in(left);
            if stereo {
                fade_in(right);
            }
            self.first_block = false;
        }

        if let Some(filter) = self.filter.as_mut() {
            filter.process(left, if stereo { Some(&mut *right) } else { None });
        }

        let finished = self.is_finished();
        if finished {
            for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
                let fade = 1.0 - i as f32 / n as f32;
                *l *= fade;
                *r *= fade;
            }
        }
        if !stereo {
            right.copy_from_slice(left);
        }

        let (bus_l, bus_r) = if self.filter_bypass {
            (&mut *buses.bypass_l, &mut *buses.bypass_r)
        } else {
            (&mut *buses.main_l, &mut *buses.main_r)
        };
        if ctx.note.stereo {
            let gain_l = self.volume * self.pan.0;
            let gain_r = self.volume * self.pan.1;
            for (((bl, br), &l), &r) in bus_l.iter_mut().zip(bus_r.iter_mut()).zip(left.iter()).zip(right.iter()) {
                *bl += l * gain_l;
                *br += r * gain_r;
            }
        } else {
            let gain = self.volume * MONO_GAIN;
            for (bl, &l) in bus_l.iter_mut().zip(left.iter()) {
                *bl += l * gain;
            }
        }
        finished
    }
}

/// Sub-voices built from slot `source`, one per carrier copy. Pulse-width
/// pairs start as identical twins.
fn nested_voices(
    set: &VoiceParameterSet,
    source: usize,
    note: &NoteContext,
    size: usize,
    pair: usize,
    rng: &mut Pcg32,
) -> Result<Vec<VoiceSlot>> {
    let mut subs = try_with_capacity(size * pair, "nested voices")?;
    for _ in 0..size {
        let sub = VoiceSlot::new(set, source, note, true, rng.gen())?;
        if pair == 2 {
            subs.push(sub.clone());
        }
        subs.push(sub);
    }
    Ok(subs)
}

/// Modulator signal for every modulator copy. Frequency modulators are read
/// as per-sample means.
fn render_modulator<'b>(
    m: &mut Modulator,
    bump: &'b Bump,
    n: usize,
    integrating: bool,
    ctx: &BlockContext,
) -> &'b mut [f32] {
    let signal = zeroed(bump, n * m.copies());
    match &mut m.source {
        ModSource::Table { table, cursors } => {
            for ((cursor, step), chunk) in cursors.iter_mut().zip(&m.steps).zip(signal.chunks_mut(n)) {
                for out in chunk.iter_mut() {
                    *out = if integrating {
                        cursor.integrate(table, *step, 0.0)
                    } else {
                        cursor.sample(table, *step, 0.0)
                    };
                }
            }
        }
        ModSource::Voice(subs) => {
            for ((sub, &freq), chunk) in subs.iter_mut().zip(&m.freqs).zip(signal.chunks_mut(n)) {
                chunk.copy_from_slice(sub.render_nested(bump, n, freq, None, integrating, ctx));
            }
        }
    }
    signal
}

fn build_modulation(
    set: &VoiceParameterSet,
    index: usize,
    note: &NoteContext,
    kind: ModulationKind,
    starts: &[f32],
    raw: usize,
    rng: &mut Pcg32,
) -> Result<Modulation> {
    if kind == ModulationKind::None {
        return Ok(Modulation::None);
    }
    let params = &set.voices[index].modulator;
    let copies = starts.len();

    let source = match params.voice {
        Some(source) => ModSource::Voice(nested_voices(set, source, note, copies, 1, rng)?),
        None => match set.modulator_table(index) {
            Some(table) => {
                let mut cursors = try_with_capacity(copies, "modulator phases")?;
                for &start in starts {
                    let phase = Phase::from_cycles(start + params.start_phase, table.len());
                    cursors.push(ReplayCursor::new(phase));
                }
                ModSource::Table { table, cursors }
            }
            None => {
                tracing::debug!("Voice {} modulator has no table; modulation disabled", index);
                return Ok(Modulation::None);
            }
        },
    };

    let mut steps = try_with_capacity(copies, "modulator steps")?;
    steps.resize(copies, PhaseStep::default());
    let freqs = try_zeroed(copies, "modulator frequencies")?;

    let modulator = Modulator {
        source,
        freq_envelope: envelope(params.freq_envelope.as_ref(), note),
        amp_envelope: envelope(params.amp_envelope.as_ref(), note),
        volume: 0.0,
        detune_cents: 0.0,
        depth: Depth::default(),
        steps,
        freqs,
    };

    Ok(match kind {
        ModulationKind::None => Modulation::None,
        ModulationKind::Morph => Modulation::Morph(modulator),
        ModulationKind::Ring => Modulation::Ring(modulator),
        ModulationKind::RingToSide => Modulation::RingToSide(modulator),
        ModulationKind::Phase => Modulation::Phase(modulator),
        ModulationKind::Frequency => Modulation::Frequency {
            modulator,
            accumulated: try_zeroed(raw, "frequency modulation phases")?,
        },
        ModulationKind::PulseWidth => Modulation::PulseWidth(modulator),
    })
}
