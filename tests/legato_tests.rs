//! Legato crossfade tests
//!
//! A legato moves a sounding note to a new pitch through a short crossfade
//! with a clone of itself. The mix must never get louder than either side.

#[path = "helpers/mod.rs"]
mod helpers;

use cantus::prelude::*;
use helpers::*;

fn steady_note(freq: f32, midinote: u8) -> (SynthEngine, NoteId, f32) {
    let mut engine = test_engine(sine_set());
    let id = engine.note_on(freq, 1.0, false, midinote).unwrap();
    render(&mut engine, TEST_BUFFER_SIZE * 8);
    let (left, _) = render(&mut engine, TEST_BUFFER_SIZE * 2);
    let level = peak(&left);
    (engine, id, level)
}

#[test]
fn test_legato_retargets_pitch() {
    let (mut engine, id, _) = steady_note(440.0, 69);
    engine.legato(id, 660.0, 1.0, false, 76).unwrap();
    assert_eq!(engine.active_notes(), 1);

    let (left, _) = render(&mut engine, 24000);
    let freq = estimate_frequency(&left[2400..], TEST_SAMPLE_RATE);
    assert!((freq - 660.0).abs() < 4.0, "Estimated {} Hz", freq);
    assert_eq!(engine.note(id).unwrap().current().frequency(), 660.0);
}

#[test]
fn test_crossfade_never_exceeds_steady_level() {
    let (mut engine, id, level) = steady_note(440.0, 69);
    engine.legato(id, 466.16, 1.0, false, 70).unwrap();
    assert!(engine.note(id).unwrap().is_transitioning());

    let (left, right) = render(&mut engine, TEST_BUFFER_SIZE);
    assert!(peak(&left) <= level * 1.02 + 1e-3, "{} > {}", peak(&left), level);
    assert!(peak(&right) <= level * 1.02 + 1e-3);
    assert_has_audio(&left, 0.01);
}

#[test]
fn test_crossfade_ends_within_a_block() {
    let (mut engine, id, _) = steady_note(440.0, 69);
    engine.legato(id, 330.0, 1.0, false, 64).unwrap();
    render(&mut engine, TEST_BUFFER_SIZE);
    assert!(!engine.note(id).unwrap().is_transitioning());
}

#[test]
fn test_repeated_legato_stays_bounded() {
    let (mut engine, id, level) = steady_note(440.0, 69);
    engine.legato(id, 494.0, 1.0, false, 71).unwrap();
    render(&mut engine, 64);
    engine.legato(id, 523.25, 1.0, false, 72).unwrap();

    assert!(engine.note(id).unwrap().is_transitioning());
    let (left, _) = render(&mut engine, TEST_BUFFER_SIZE);
    assert!(peak(&left) <= level * 1.02 + 1e-3);
}

fn crossfade_gain(engine: &SynthEngine, id: NoteId) -> f32 {
    let chain = engine.note(id).unwrap();
    chain.current().legato().level() + chain.fading().map_or(0.0, |n| n.legato().level())
}

#[test]
fn test_second_legato_keeps_gain_continuous() {
    let (mut engine, id, level) = steady_note(440.0, 69);
    engine.legato(id, 494.0, 1.0, false, 71).unwrap();
    render(&mut engine, 64);
    let before = crossfade_gain(&engine, id);
    assert!((before - 1.0).abs() < 1e-3, "Gain before {}", before);

    engine.legato(id, 523.25, 1.0, false, 72).unwrap();
    let after = crossfade_gain(&engine, id);
    assert!((after - before).abs() < 1e-3, "Gain {} -> {}", before, after);

    // Mid-crossfade the mix stays near the steady level.
    render(&mut engine, 64);
    let mid = crossfade_gain(&engine, id);
    assert!((mid - 1.0).abs() < 1e-3, "Gain mid {}", mid);
    let (left, _) = render(&mut engine, 256);
    assert!(peak(&left) >= level * 0.5, "{} vs {}", peak(&left), level);
}

#[test]
fn test_release_during_crossfade_finishes() {
    let (mut engine, id, _) = steady_note(440.0, 69);
    engine.legato(id, 550.0, 1.0, false, 73).unwrap();
    engine.release(id).unwrap();
    render(&mut engine, 24000);
    assert_eq!(engine.active_notes(), 0);
}

#[test]
fn test_legato_unknown_note() {
    let mut engine = test_engine(sine_set());
    let id = engine.note_on(440.0, 1.0, false, 69).unwrap();
    engine.kill(id).unwrap();
    assert!(matches!(
        engine.legato(id, 660.0, 1.0, false, 76),
        Err(Error::UnknownNote(_))
    ));
}
