use tracing::debug;

use crate::event::{ControlKind, MetaKind};
use crate::key::{Scale, Tone};
use crate::timeline::Timeline;

/// Interval in semitones moving `from` onto `to` by the smaller step, in -5..=6.
pub fn shortest_shift(from: Tone, to: Tone) -> i32 {
    let up = (to as i32 - from as i32).rem_euclid(12);
    let down = (from as i32 - to as i32).rem_euclid(12);
    if down < up {
        -down
    } else {
        up
    }
}

fn fold(pitch: u8, shift: i32) -> u8 {
    let mut moved = pitch as i32 + shift;
    while moved < 0 {
        moved += 12;
    }
    while moved > 127 {
        moved -= 12;
    }
    moved as u8
}

/// Moves the whole performance so the key's tonic (the relative major's
/// tonic for minor keys) lands on `target`. Percussion is left alone.
///
/// Returns the applied shift, or `None` when the timeline has no key yet.
pub fn transpose_to(timeline: &mut Timeline, target: Tone) -> Option<i32> {
    let key = timeline.key?;
    let reference = match key.scale {
        Scale::Major => key.tone,
        Scale::Minor => key.tone.transposed(3),
    };
    let shift = shortest_shift(reference, target);
    if shift == 0 {
        return Some(0);
    }

    for event in timeline.control_events_mut() {
        if event.is_percussion() {
            continue;
        }
        match &mut event.kind {
            ControlKind::NoteOn(note) => note.pitch = fold(note.pitch, shift),
            ControlKind::NoteOff(off) => off.pitch = fold(off.pitch, shift),
            ControlKind::NoteAftertouch { pitch, .. } => *pitch = fold(*pitch, shift),
            ControlKind::Controller(_)
            | ControlKind::PitchBend(_)
            | ControlKind::ProgramChange { .. }
            | ControlKind::ChannelAftertouch { .. } => {}
        }
    }

    for event in timeline.meta_events_mut() {
        match &mut event.kind {
            MetaKind::KeySignature(key) => *key = key.transposed(shift),
            MetaKind::Beat(beat) => beat.chord = beat.chord.map(|chord| chord.transposed(shift)),
            _ => {}
        }
    }

    timeline.key = Some(key.transposed(shift));
    debug!(shift, key = %key, "transposed timeline");
    Some(shift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ControlEvent, MetaEvent};
    use crate::key::Key;
    use crate::timeline::{TimeDivision, PERCUSSION_CHANNEL};

    #[test]
    fn shortest_shift_picks_smaller_direction() {
        assert_eq!(shortest_shift(Tone::D, Tone::C), -2);
        assert_eq!(shortest_shift(Tone::A, Tone::C), 3);
        assert_eq!(shortest_shift(Tone::FSharp, Tone::C), 6);
        assert_eq!(shortest_shift(Tone::C, Tone::C), 0);
    }

    #[test]
    fn transposes_notes_keys_and_chords() {
        let mut timeline = Timeline::new(0, TimeDivision::TicksPerBeat(480));
        timeline.push_control(0, ControlEvent::note_on(0, 0, 62, 100));
        timeline.push_control(0, ControlEvent::note_off(480, 0, 62));
        timeline.push_control(0, ControlEvent::note_on(0, 0, 1, 100));
        timeline.push_control(0, ControlEvent::note_on(0, PERCUSSION_CHANNEL, 38, 100));
        timeline.push_meta(0, MetaEvent::key_signature(0, Key::new(Tone::D, Scale::Major)));
        let mut beat = MetaEvent::beat(0, 0.0, 0.5, crate::event::BeatLevel::Strong);
        if let Some(b) = beat.as_beat_mut() {
            b.chord = Some(Key::new(Tone::A, Scale::Major));
        }
        timeline.push_meta(0, beat);
        timeline.key = Some(Key::new(Tone::D, Scale::Major));

        assert_eq!(transpose_to(&mut timeline, Tone::C), Some(-2));

        let events = &timeline.tracks[0].channel(0).events;
        assert_eq!(events[0].as_note().unwrap().pitch, 60);
        assert_eq!(events[1].released_pitch(), Some(60));
        // folded up an octave
        assert_eq!(events[2].as_note().unwrap().pitch, 11);
        assert_eq!(
            timeline.tracks[0].channel(PERCUSSION_CHANNEL).events[0]
                .as_note()
                .unwrap()
                .pitch,
            38
        );
        assert_eq!(timeline.key, Some(Key::new(Tone::C, Scale::Major)));
        assert_eq!(timeline.key_signatures()[0].1, Key::new(Tone::C, Scale::Major));
        assert_eq!(
            timeline.beats()[0].as_beat().unwrap().chord,
            Some(Key::new(Tone::G, Scale::Major))
        );
    }

    #[test]
    fn minor_keys_move_their_relative_major() {
        let mut timeline = Timeline::new(0, TimeDivision::TicksPerBeat(480));
        timeline.key = Some(Key::new(Tone::E, Scale::Minor));
        // relative major G, shortest move to C is +5
        assert_eq!(transpose_to(&mut timeline, Tone::C), Some(5));
        assert_eq!(timeline.key, Some(Key::new(Tone::A, Scale::Minor)));
    }

    #[test]
    fn no_key_no_transpose() {
        let mut timeline = Timeline::new(0, TimeDivision::TicksPerBeat(480));
        assert_eq!(transpose_to(&mut timeline, Tone::C), None);
    }
}
