//! Fixed weights of the chord decoder.

use midi_timeline::{Key, Scale};

/// Fit of a note `n` semitones above a major chord's root.
pub const MAJOR_INTERVALS: [f64; 12] = [1.0, -0.4, 0.1, -1.4, 0.7, 0.1, 0.2, 0.8, -0.3, 0.0, 0.4, 0.2];
/// Fit of a note `n` semitones above a minor chord's root.
pub const MINOR_INTERVALS: [f64; 12] = [1.0, -0.2, 0.0, 0.7, -1.2, 0.1, 0.2, 0.6, 0.0, -0.2, 0.4, -0.2];

/// Penalty by distance on the circle of fifths, 0..=6.
pub const FIFTHS_PENALTY: [f64; 7] = [0.0, 1.0, 1.5, 3.0, 4.0, 6.0, 8.0];

pub const BEAT_POOL_WEIGHT: f64 = 1.8;
pub const MEDIUM_POOL_WEIGHT: f64 = 1.5;
pub const STRONG_POOL_WEIGHT: f64 = 1.5;

pub const KEY_DISTANCE_MULTIPLE: f64 = 0.025;
pub const IN_SCALE_MULTIPLE: f64 = 0.0375;
pub const PREVIOUS_CHORD_MULTIPLE: f64 = 0.175;
/// Extra transition penalty per squared beat level.
pub const WEAK_BEAT_FACTOR: f64 = 0.7;

/// Notes starting this close to a pool's start count double, seconds.
pub const ONSET_WINDOW: f64 = 0.02;
pub const ONSET_MULTIPLE: f64 = 2.0;
/// Weight every pool starts with.
pub const BASE_NOTE_SUM: f64 = 0.2;

pub fn interval_score(chord: Key, pitch: u8) -> f64 {
    let interval = (pitch as i32 - chord.tone as i32).rem_euclid(12) as usize;
    match chord.scale {
        Scale::Major => MAJOR_INTERVALS[interval],
        Scale::Minor => MINOR_INTERVALS[interval],
    }
}

/// Penalty for moving between two keys or chords.
pub fn fifths_penalty(a: Key, b: Key) -> f64 {
    FIFTHS_PENALTY[a.fifths_distance(b).min(6)]
}

/// Penalty for a chord change; a mode switch on the same root position
/// costs as much as two fifths.
pub fn transition_penalty(chord: Key, previous: Key) -> f64 {
    let mut distance = chord.fifths_distance(previous).min(6);
    if distance == 0 && chord.scale != previous.scale {
        distance = 2;
    }
    FIFTHS_PENALTY[distance]
}

/// How many of the chord's root, fifth and third lie in `key`'s scale.
pub fn tones_in_scale(chord: Key, key: Key) -> i32 {
    chord
        .triad()
        .iter()
        .filter(|&&pitch_class| key.scale_contains(pitch_class))
        .count() as i32
}
