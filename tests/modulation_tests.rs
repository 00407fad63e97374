//! Modulation and voice nesting tests
//!
//! A voice used as a modulator or carrier source must sound exactly like the
//! table it plays when it adds nothing of its own.

#[path = "helpers/mod.rs"]
mod helpers;

use cantus::prelude::*;
use helpers::tolerances::*;
use helpers::*;

const BLOCKS: usize = 8;

fn render_note(set: VoiceParameterSet, freq: f32) -> Vec<f32> {
    let mut engine = test_engine(set);
    engine.note_on(freq, 1.0, false, 69).unwrap();
    let (left, _) = render(&mut engine, TEST_BUFFER_SIZE * BLOCKS);
    left
}

/// Voice 1 is the only sounding voice; voice 0 is a silent source.
fn carrier_with_modulation(kind: ModulationKind, volume: f32) -> VoiceParameterSet {
    let mut set = VoiceParameterSet::default();
    set.voices[0] = VoiceParams {
        enabled: false,
        ..VoiceParams::with_table(sine_table())
    };
    set.voices[1] = VoiceParams::with_table(sine_table());
    set.voices[1].modulator.kind = kind;
    set.voices[1].modulator.volume = volume;
    set
}

#[test]
fn test_voice_fm_matches_table_fm() {
    let mut from_table = carrier_with_modulation(ModulationKind::Frequency, 70.0);
    from_table.voices[1].modulator.table = Some(sine_table());

    let mut from_voice = carrier_with_modulation(ModulationKind::Frequency, 70.0);
    from_voice.voices[1].modulator.voice = Some(0);

    let a = render_note(from_table, 330.0);
    let b = render_note(from_voice, 330.0);
    assert_has_audio(&a, 0.01);
    assert_signals_equal(&a, &b, DSP_EPSILON, "voice FM vs table FM");
}

#[test]
fn test_voice_pm_matches_table_pm() {
    let mut from_table = carrier_with_modulation(ModulationKind::Phase, 50.0);
    from_table.voices[1].modulator.table = Some(sine_table());

    let mut from_voice = carrier_with_modulation(ModulationKind::Phase, 50.0);
    from_voice.voices[1].modulator.voice = Some(0);

    let a = render_note(from_table, 440.0);
    let b = render_note(from_voice, 440.0);
    assert_signals_equal(&a, &b, DSP_EPSILON, "voice PM vs table PM");
}

#[test]
fn test_voice_carrier_matches_table_carrier() {
    let mut from_voice = carrier_with_modulation(ModulationKind::None, 0.0);
    from_voice.voices[1].table = None;
    from_voice.voices[1].voice_source = Some(0);

    let a = render_note(sine_set(), 440.0);
    let b = render_note(from_voice, 440.0);
    assert_signals_equal(&a, &b, DSP_EPSILON, "voice carrier vs table carrier");
}

#[test]
fn test_modulation_changes_the_sound() {
    let mut fm = carrier_with_modulation(ModulationKind::Frequency, 90.0);
    fm.voices[1].modulator.voice = Some(0);

    let plain = render_note(sine_set(), 440.0);
    let modulated = render_note(fm, 440.0);
    assert!(max_difference(&plain, &modulated) > 0.01);
}

#[test]
fn test_zero_depth_phase_modulation_is_transparent() {
    let mut pm = carrier_with_modulation(ModulationKind::Phase, 0.0);
    pm.voices[1].modulator.table = Some(sine_table());

    let plain = render_note(sine_set(), 440.0);
    let modulated = render_note(pm, 440.0);
    assert_signals_equal(&plain, &modulated, DSP_EPSILON, "zero-depth PM");
}

#[test]
fn test_nested_chain_is_deterministic() {
    // 0 -> FM -> 1 -> FM -> 2, with unison on the outer voice.
    let mut set = VoiceParameterSet::default();
    set.voices[0] = VoiceParams {
        enabled: false,
        ..VoiceParams::with_table(sine_table())
    };
    set.voices[1] = VoiceParams {
        enabled: false,
        ..VoiceParams::with_table(sine_table())
    };
    set.voices[1].modulator.kind = ModulationKind::Frequency;
    set.voices[1].modulator.voice = Some(0);
    set.voices[2] = VoiceParams::with_table(sine_table());
    set.voices[2].unison.size = 3;
    set.voices[2].modulator.kind = ModulationKind::Frequency;
    set.voices[2].modulator.voice = Some(1);

    let a = render_note(set.clone(), 220.0);
    let b = render_note(set, 220.0);
    assert_has_audio(&a, 0.01);
    assert!(a.iter().all(|s| s.is_finite()));
    assert_eq!(a, b);
}

#[test]
fn test_disabled_grandparent_collapses_to_single_level() {
    let mut single = VoiceParameterSet::default();
    single.voices[2] = VoiceParams::with_table(sine_table());
    single.voices[2].modulator.kind = ModulationKind::Frequency;
    single.voices[2].modulator.table = Some(sine_table());

    let mut chain = single.clone();
    chain.voices[2].modulator.table = None;
    chain.voices[2].modulator.voice = Some(1);
    chain.voices[0] = VoiceParams {
        enabled: false,
        ..VoiceParams::with_table(sine_table())
    };
    chain.voices[1] = VoiceParams {
        enabled: false,
        ..VoiceParams::with_table(sine_table())
    };
    // The grandparent link stays wired, its modulation switched off.
    chain.voices[1].modulator.voice = Some(0);
    chain.voices[1].modulator.kind = ModulationKind::None;

    let a = render_note(single, 262.0);
    let b = render_note(chain, 262.0);
    assert_has_audio(&a, 0.01);
    assert_signals_equal(&a, &b, DSP_EPSILON, "collapsed FM chain");
}

#[test]
fn test_pulse_width_without_depth_is_silent() {
    let mut set = carrier_with_modulation(ModulationKind::PulseWidth, 0.0);
    set.voices[1].modulator.table = Some(sine_table());

    let out = render_note(set, 440.0);
    assert_silence(&out, SILENCE_THRESHOLD);
}
