//! Note parameters and their load-time sanitising.
//!
//! A [`VoiceParameterSet`] is an immutable snapshot as far as a note is
//! concerned. Everything the render path relies on (unison sizes, voice
//! references, envelope shapes, value ranges) is settled by
//! [`VoiceParameterSet::sanitize`] before a note ever sees it.

use cantus_dsp::{EnvelopeMode, EnvelopeParams, FilterParams, LfoParams, OscillatorTable};
use serde::{Deserialize, Serialize};

use crate::math::DetuneCurve;

/// Voice slots per note.
pub const NUM_VOICES: usize = 8;

/// Largest configurable unison size.
pub const MAX_UNISON_SIZE: usize = 50;

/// Carrier modulation scheme, fixed for the lifetime of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModulationKind {
    #[default]
    None,
    Morph,
    Ring,
    /// Ring modulation without the dry carrier, doubled in level.
    RingToSide,
    Phase,
    Frequency,
    PulseWidth,
}

impl ModulationKind {
    /// Schemes that move the carrier's read position.
    pub fn is_phase_domain(self) -> bool {
        matches!(
            self,
            ModulationKind::Phase | ModulationKind::Frequency | ModulationKind::PulseWidth
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoiceKind {
    #[default]
    Sound,
    WhiteNoise,
}

/// Which unison copies play with inverted polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PhaseInvert {
    #[default]
    None,
    Random,
    /// Copies whose index is a multiple of `n`.
    EveryNth(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetuneParams {
    /// `None` follows the note-wide curve.
    pub curve: Option<DetuneCurve>,
    /// Packed octave and coarse step, see [`crate::math::detune_cents`].
    pub coarse: u16,
    /// 0..=16383, 8192 is centred.
    pub fine: u16,
}

impl Default for DetuneParams {
    fn default() -> Self {
        Self {
            curve: None,
            coarse: 0,
            fine: 8192,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnisonParams {
    pub size: usize,
    /// 0..=127, mapped quadratically to at most 200 cents.
    pub spread: f32,
    /// 0..=127, 64 spreads copies across the full stereo field.
    pub stereo_spread: f32,
    /// 0..=127
    pub vibrato: f32,
    /// 0..=127
    pub vibrato_speed: f32,
    pub phase_invert: PhaseInvert,
}

impl Default for UnisonParams {
    fn default() -> Self {
        Self {
            size: 1,
            spread: 60.0,
            stereo_spread: 64.0,
            vibrato: 64.0,
            vibrato_speed: 64.0,
            phase_invert: PhaseInvert::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulatorParams {
    pub kind: ModulationKind,
    #[serde(skip)]
    pub table: Option<OscillatorTable>,
    /// Borrow a lower voice's modulator table.
    pub ext_table: Option<usize>,
    /// Use a lower voice's live output as the modulator.
    pub voice: Option<usize>,
    /// 0..=127
    pub volume: f32,
    /// 0..=127, 64 is neutral across the keyboard.
    pub damp: f32,
    /// 0..=127
    pub velocity_sense: f32,
    pub detune: DetuneParams,
    /// Start offset from the carrier, in cycles.
    pub start_phase: f32,
    pub freq_envelope: Option<EnvelopeParams>,
    pub amp_envelope: Option<EnvelopeParams>,
}

impl Default for ModulatorParams {
    fn default() -> Self {
        Self {
            kind: ModulationKind::None,
            table: None,
            ext_table: None,
            voice: None,
            volume: 90.0,
            damp: 64.0,
            velocity_sense: 64.0,
            detune: DetuneParams::default(),
            start_phase: 0.0,
            freq_envelope: None,
            amp_envelope: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    pub enabled: bool,
    pub kind: VoiceKind,
    #[serde(skip)]
    pub table: Option<OscillatorTable>,
    /// Start position in cycles.
    pub start_phase: f32,
    /// Borrow a lower voice's carrier table.
    pub ext_oscil: Option<usize>,
    /// Use a lower voice's live output as the carrier.
    pub voice_source: Option<usize>,
    pub unison: UnisonParams,
    pub detune: DetuneParams,
    pub fixed_freq: bool,
    /// 0 disables key scaling of the fixed frequency.
    pub fixed_freq_et: u8,
    /// 0..=127
    pub volume: f32,
    pub volume_minus: bool,
    /// 0..=127
    pub velocity_sense: f32,
    /// 1..=127, 0 picks a random position per note.
    pub pan: f32,
    /// 0..=127 onset delay.
    pub delay: f32,
    /// Route around the note-wide filter.
    pub filter_bypass: bool,
    pub stereo: bool,
    pub amp_envelope: Option<EnvelopeParams>,
    pub amp_lfo: Option<LfoParams>,
    pub freq_envelope: Option<EnvelopeParams>,
    pub freq_lfo: Option<LfoParams>,
    pub filter: Option<FilterParams>,
    pub filter_envelope: Option<EnvelopeParams>,
    pub filter_lfo: Option<LfoParams>,
    pub modulator: ModulatorParams,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: VoiceKind::Sound,
            table: None,
            start_phase: 0.0,
            ext_oscil: None,
            voice_source: None,
            unison: UnisonParams::default(),
            detune: DetuneParams::default(),
            fixed_freq: false,
            fixed_freq_et: 0,
            volume: 100.0,
            volume_minus: false,
            velocity_sense: 127.0,
            pan: 64.0,
            delay: 0.0,
            filter_bypass: false,
            stereo: true,
            amp_envelope: None,
            amp_lfo: None,
            freq_envelope: None,
            freq_lfo: None,
            filter: None,
            filter_envelope: None,
            filter_lfo: None,
            modulator: ModulatorParams::default(),
        }
    }
}

impl VoiceParams {
    /// Enabled voice playing `table` at full volume, centred.
    pub fn with_table(table: OscillatorTable) -> Self {
        Self {
            enabled: true,
            table: Some(table),
            volume: 127.0,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PunchParams {
    /// 0..=127, 0 disables punch.
    pub strength: f32,
    /// 0..=127
    pub time: f32,
    /// 0..=127
    pub stretch: f32,
    /// 0..=127
    pub velocity_sense: f32,
}

impl Default for PunchParams {
    fn default() -> Self {
        Self {
            strength: 0.0,
            time: 60.0,
            stretch: 64.0,
            velocity_sense: 72.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalParams {
    pub stereo: bool,
    pub detune: DetuneParams,
    /// 0..=127, 64 is neutral.
    pub bandwidth: f32,
    /// 0..=127, 96 is unity before velocity.
    pub volume: f32,
    pub velocity_sense: f32,
    pub pan: f32,
    pub punch: PunchParams,
    pub amp_envelope: EnvelopeParams,
    pub amp_lfo: LfoParams,
    pub freq_envelope: EnvelopeParams,
    pub freq_lfo: LfoParams,
    pub filter: Option<FilterParams>,
    pub filter_envelope: EnvelopeParams,
    pub filter_lfo: LfoParams,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            stereo: true,
            detune: DetuneParams {
                curve: Some(DetuneCurve::Linear35Cents),
                ..Default::default()
            },
            bandwidth: 64.0,
            volume: 96.0,
            velocity_sense: 127.0,
            pan: 64.0,
            punch: PunchParams::default(),
            amp_envelope: EnvelopeParams::default(),
            amp_lfo: LfoParams::default(),
            freq_envelope: EnvelopeParams::flat(EnvelopeMode::Frequency, 64.0),
            freq_lfo: LfoParams::default(),
            filter: None,
            filter_envelope: EnvelopeParams::flat(EnvelopeMode::Filter, 64.0),
            filter_lfo: LfoParams::default(),
        }
    }
}

/// Full parameter snapshot for one note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParameterSet {
    pub global: GlobalParams,
    pub voices: [VoiceParams; NUM_VOICES],
}

impl VoiceParameterSet {
    /// One enabled voice in slot 0.
    pub fn single_voice(table: OscillatorTable) -> Self {
        let mut set = Self::default();
        set.voices[0] = VoiceParams::with_table(table);
        set
    }

    /// Clamp or substitute everything the render path cannot handle.
    /// Returns the number of corrections made.
    pub fn sanitize(&mut self) -> usize {
        let mut fixes = 0;

        fixes += sanitize_global(&mut self.global);
        for index in 0..NUM_VOICES {
            fixes += sanitize_voice(index, &mut self.voices[index]);
        }

        if fixes > 0 {
            tracing::warn!("Parameter set needed {} corrections", fixes);
        }
        fixes
    }

    pub fn sanitized(mut self) -> Self {
        self.sanitize();
        self
    }

    /// Carrier table of `voice`, following `ext_oscil` borrowing.
    pub fn carrier_table(&self, voice: usize) -> Option<OscillatorTable> {
        let params = &self.voices[voice];
        match params.ext_oscil {
            Some(source) if source < voice => self.carrier_table(source),
            _ => params.table.clone(),
        }
    }

    /// Modulator table of `voice`, following `ext_table` borrowing.
    pub fn modulator_table(&self, voice: usize) -> Option<OscillatorTable> {
        let params = &self.voices[voice].modulator;
        match params.ext_table {
            Some(source) if source < voice => self.modulator_table(source),
            _ => params.table.clone(),
        }
    }

    /// Number of voices that will sound.
    pub fn enabled_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.enabled).count()
    }
}

fn clamp_param(value: &mut f32, lo: f32, hi: f32, fallback: f32) -> usize {
    let fixed = if value.is_finite() { value.clamp(lo, hi) } else { fallback };
    if fixed != *value {
        *value = fixed;
        1
    } else {
        0
    }
}

fn sanitize_detune(detune: &mut DetuneParams) -> usize {
    if detune.fine > 16383 {
        detune.fine = 16383;
        1
    } else {
        0
    }
}

fn sanitize_envelope(envelope: &mut EnvelopeParams) -> usize {
    usize::from(envelope.sanitize())
}

fn sanitize_optional_envelope(envelope: &mut Option<EnvelopeParams>) -> usize {
    envelope.as_mut().map_or(0, sanitize_envelope)
}

fn sanitize_optional_lfo(lfo: &mut Option<LfoParams>) -> usize {
    lfo.as_mut().map_or(0, |l| usize::from(l.sanitize()))
}

/// Drop references to this slot or any later slot.
fn sanitize_reference(index: usize, reference: &mut Option<usize>, what: &str) -> usize {
    match *reference {
        Some(source) if source >= index => {
            tracing::warn!(
                "Voice {} {} refers to voice {}, which is not an earlier voice; ignoring",
                index,
                what,
                source
            );
            *reference = None;
            1
        }
        _ => 0,
    }
}

fn sanitize_global(global: &mut GlobalParams) -> usize {
    let mut fixes = sanitize_detune(&mut global.detune);
    if global.detune.curve.is_none() {
        global.detune.curve = Some(DetuneCurve::default());
        fixes += 1;
    }
    fixes += clamp_param(&mut global.bandwidth, 0.0, 127.0, 64.0);
    fixes += clamp_param(&mut global.volume, 0.0, 127.0, 96.0);
    fixes += clamp_param(&mut global.velocity_sense, 0.0, 127.0, 64.0);
    fixes += clamp_param(&mut global.pan, 0.0, 127.0, 64.0);

    let punch = &mut global.punch;
    fixes += clamp_param(&mut punch.strength, 0.0, 127.0, 0.0);
    fixes += clamp_param(&mut punch.time, 0.0, 127.0, 60.0);
    fixes += clamp_param(&mut punch.stretch, 0.0, 127.0, 64.0);
    fixes += clamp_param(&mut punch.velocity_sense, 0.0, 127.0, 72.0);

    fixes += sanitize_envelope(&mut global.amp_envelope);
    fixes += sanitize_envelope(&mut global.freq_envelope);
    fixes += sanitize_envelope(&mut global.filter_envelope);
    fixes += usize::from(global.amp_lfo.sanitize());
    fixes += usize::from(global.freq_lfo.sanitize());
    fixes += usize::from(global.filter_lfo.sanitize());
    if let Some(filter) = global.filter.as_mut() {
        fixes += usize::from(filter.sanitize());
    }
    fixes
}

fn sanitize_voice(index: usize, voice: &mut VoiceParams) -> usize {
    let mut fixes = 0;

    if voice.unison.size == 0 {
        tracing::warn!("Voice {} has unison size 0; using 1", index);
        voice.unison.size = 1;
        fixes += 1;
    } else if voice.unison.size > MAX_UNISON_SIZE {
        tracing::warn!(
            "Voice {} unison size {} exceeds {}; clamping",
            index,
            voice.unison.size,
            MAX_UNISON_SIZE
        );
        voice.unison.size = MAX_UNISON_SIZE;
        fixes += 1;
    }
    if let PhaseInvert::EveryNth(0) = voice.unison.phase_invert {
        voice.unison.phase_invert = PhaseInvert::EveryNth(1);
        fixes += 1;
    }
    fixes += clamp_param(&mut voice.unison.spread, 0.0, 127.0, 0.0);
    fixes += clamp_param(&mut voice.unison.stereo_spread, 0.0, 127.0, 64.0);
    fixes += clamp_param(&mut voice.unison.vibrato, 0.0, 127.0, 0.0);
    fixes += clamp_param(&mut voice.unison.vibrato_speed, 0.0, 127.0, 64.0);

    fixes += sanitize_reference(index, &mut voice.ext_oscil, "oscillator table");
    fixes += sanitize_reference(index, &mut voice.voice_source, "oscillator source");
    fixes += sanitize_reference(index, &mut voice.modulator.ext_table, "modulator table");
    fixes += sanitize_reference(index, &mut voice.modulator.voice, "modulator source");

    let start = voice.start_phase.rem_euclid(1.0);
    if start.is_finite() && start != voice.start_phase {
        voice.start_phase = start;
        fixes += 1;
    } else if !start.is_finite() {
        voice.start_phase = 0.0;
        fixes += 1;
    }
    fixes += clamp_param(&mut voice.volume, 0.0, 127.0, 100.0);
    fixes += clamp_param(&mut voice.velocity_sense, 0.0, 127.0, 127.0);
    fixes += clamp_param(&mut voice.pan, 0.0, 127.0, 64.0);
    fixes += clamp_param(&mut voice.delay, 0.0, 127.0, 0.0);
    fixes += sanitize_detune(&mut voice.detune);

    fixes += sanitize_optional_envelope(&mut voice.amp_envelope);
    fixes += sanitize_optional_envelope(&mut voice.freq_envelope);
    fixes += sanitize_optional_envelope(&mut voice.filter_envelope);
    fixes += sanitize_optional_lfo(&mut voice.amp_lfo);
    fixes += sanitize_optional_lfo(&mut voice.freq_lfo);
    fixes += sanitize_optional_lfo(&mut voice.filter_lfo);
    if let Some(filter) = voice.filter.as_mut() {
        fixes += usize::from(filter.sanitize());
    }

    let modulator = &mut voice.modulator;
    fixes += clamp_param(&mut modulator.volume, 0.0, 127.0, 0.0);
    fixes += clamp_param(&mut modulator.damp, 0.0, 127.0, 64.0);
    fixes += clamp_param(&mut modulator.velocity_sense, 0.0, 127.0, 64.0);
    fixes += clamp_param(&mut modulator.start_phase, -1.0, 1.0, 0.0);
    fixes += sanitize_detune(&mut modulator.detune);
    fixes += sanitize_optional_envelope(&mut modulator.freq_envelope);
    fixes += sanitize_optional_envelope(&mut modulator.amp_envelope);

    fixes
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sine() -> OscillatorTable {
        OscillatorTable::sine(256).unwrap()
    }

    #[test]
    fn test_default_set_is_clean() {
        let mut set = VoiceParameterSet::single_voice(sine());
        assert_eq!(set.sanitize(), 0);
        assert_eq!(set.enabled_voices(), 1);
    }

    #[test]
    fn test_unison_zero_becomes_one() {
        let mut set = VoiceParameterSet::single_voice(sine());
        set.voices[0].unison.size = 0;
        assert_eq!(set.sanitize(), 1);
        assert_eq!(set.voices[0].unison.size, 1);
    }

    #[test]
    fn test_forward_references_dropped() {
        let mut set = VoiceParameterSet::single_voice(sine());
        set.voices[2].enabled = true;
        set.voices[2].ext_oscil = Some(2);
        set.voices[2].modulator.voice = Some(5);
        set.voices[2].voice_source = Some(1);
        set.sanitize();
        assert_eq!(set.voices[2].ext_oscil, None);
        assert_eq!(set.voices[2].modulator.voice, None);
        assert_eq!(set.voices[2].voice_source, Some(1));
    }

    #[test]
    fn test_table_borrowing_follows_chain() {
        let table = sine();
        let mut set = VoiceParameterSet::single_voice(table.clone());
        set.voices[1].ext_oscil = Some(0);
        set.voices[3].ext_oscil = Some(1);
        assert_eq!(set.carrier_table(3), Some(table));
        assert_eq!(set.carrier_table(2), None);
    }

    #[test]
    fn test_preset_loads_from_json() {
        let json = r#"{
            "global": { "volume": 110.0, "punch": { "strength": 300.0 } },
            "voices": [
                { "enabled": true, "unison": { "size": 0 }, "modulator": { "kind": "Frequency", "voice": 3 } },
                {}, {}, {}, {}, {}, {}, {}
            ]
        }"#;
        let set: VoiceParameterSet = serde_json::from_str(json).unwrap();
        let set = set.sanitized();
        assert_eq!(set.global.volume, 110.0);
        assert_eq!(set.global.punch.strength, 127.0);
        assert_eq!(set.voices[0].unison.size, 1);
        assert_eq!(set.voices[0].modulator.kind, ModulationKind::Frequency);
        assert_eq!(set.voices[0].modulator.voice, None);
        assert!(set.voices[0].table.is_none());
    }

    proptest! {
        #[test]
        fn prop_sanitize_is_idempotent(
            size in 0usize..200,
            spread in -500.0f32..500.0,
            volume in -500.0f32..500.0,
            source in proptest::option::of(0usize..NUM_VOICES),
            slot in 0usize..NUM_VOICES,
        ) {
            let mut set = VoiceParameterSet::default();
            let voice = &mut set.voices[slot];
            voice.enabled = true;
            voice.unison.size = size;
            voice.unison.spread = spread;
            voice.volume = volume;
            voice.modulator.voice = source;
            set.sanitize();
            let once = set.clone();
            prop_assert_eq!(set.sanitize(), 0);
            prop_assert_eq!(&set, &once);

            let voice = &set.voices[slot];
            prop_assert!((1..=MAX_UNISON_SIZE).contains(&voice.unison.size));
            if let Some(s) = voice.modulator.voice {
                prop_assert!(s < slot);
            }
        }
    }
}
