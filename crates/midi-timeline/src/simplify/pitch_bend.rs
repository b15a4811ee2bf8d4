//! Pitch-bend ranges (RPN 0) and bend-to-note attachment.

use tracing::debug;

use crate::event::{AttachedBend, ControlEvent, ControlKind, DEFAULT_BEND_RANGE};
use crate::lookup::TimedIndex;
use crate::timeline::{Channel, Timeline};

/// Progress through the `CC101=0, CC100=0, CC6=range` selector sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RpnState {
    Idle,
    AfterMsb,
    AfterLsb,
}

impl RpnState {
    /// Advances on one channel event; returns a range when CC6 completes the sequence.
    fn step(self, event: &ControlEvent) -> (RpnState, Option<u8>) {
        let ControlKind::Controller(controller) = event.kind else {
            return (RpnState::Idle, None);
        };
        match (controller.number, controller.value, self) {
            (101, 0, _) => (RpnState::AfterMsb, None),
            (101, _, _) => (RpnState::Idle, None),
            (100, 0, RpnState::AfterMsb) => (RpnState::AfterLsb, None),
            (100, _, _) => (RpnState::Idle, None),
            (6, range, RpnState::AfterLsb) => (RpnState::Idle, Some(range)),
            (6, _, _) => (RpnState::Idle, None),
            _ => (self, None),
        }
    }
}

/// Runs the selector automaton over one track's channel; ranges are keyed
/// by channel number so they reach bends on every track.
fn collect_ranges(channel: &Channel, ranges: &mut TimedIndex<u8, u8>) {
    let mut state = RpnState::Idle;
    for index in channel.indices_by_tick() {
        let event = &channel.events[index];
        let (next, range) = state.step(event);
        if let Some(range) = range {
            ranges.insert(channel.number, event.real_time, range);
        }
        state = next;
    }
}

/// Sets `range` on every Pitch-Bend event from the latest preceding RPN 0
/// sequence on its channel number, [`DEFAULT_BEND_RANGE`] when there is none.
pub fn resolve_bend_ranges(timeline: &mut Timeline) {
    let mut ranges = TimedIndex::new();
    for track in &timeline.tracks {
        for channel in &track.channels {
            collect_ranges(channel, &mut ranges);
        }
    }

    for track in &mut timeline.tracks {
        for channel in &mut track.channels {
            let key = channel.number;
            for event in &mut channel.events {
                let time = event.real_time;
                if let ControlKind::PitchBend(bend) = &mut event.kind {
                    bend.range = ranges
                        .latest_at(&key, time)
                        .copied()
                        .unwrap_or(DEFAULT_BEND_RANGE);
                }
            }
        }
    }

    debug!(changes = ranges.len(), "resolved pitch-bend ranges");
}

/// Attaches to each sounding note every same-channel bend inside
/// `[start, end]`. Previously attached bends are replaced.
pub fn attach_bends(timeline: &mut Timeline) {
    let mut attached = 0usize;

    for track in &mut timeline.tracks {
        for channel in &mut track.channels {
            let mut bends: Vec<AttachedBend> = channel
                .events
                .iter()
                .filter_map(|event| match event.kind {
                    ControlKind::PitchBend(bend) => Some(AttachedBend {
                        tick: event.tick,
                        real_time: event.real_time,
                        value: bend.value,
                        range: bend.range,
                    }),
                    _ => None,
                })
                .collect();
            bends.sort_by_key(|bend| bend.tick);

            for event in &mut channel.events {
                let start = event.real_time;
                let Some(note) = event.as_note_mut() else {
                    continue;
                };
                note.bends.clear();
                if !note.is_sounding() {
                    continue;
                }
                let end = note.end.unwrap_or(start);
                note.bends.extend(
                    bends
                        .iter()
                        .filter(|bend| bend.real_time >= start && bend.real_time <= end)
                        .copied(),
                );
                attached += note.bends.len();
            }
        }
    }

    debug!(attached, "attached pitch bends to notes");
}

/// Splits bent notes into plain notes wherever the rounded bent pitch
/// changes, then drops all Pitch-Bend events. Runs after [`attach_bends`].
pub fn discretize_bends(timeline: &mut Timeline) {
    let mut split = 0usize;

    for track in &mut timeline.tracks {
        for channel in &mut track.channels {
            let mut added = Vec::new();

            for event in &mut channel.events {
                let (start_tick, channel_number) = (event.tick, event.channel);
                let Some(note) = event.as_note_mut() else {
                    continue;
                };
                if note.bends.is_empty() {
                    continue;
                }

                let end_tick = note.length_ticks.map(|length| start_tick + length);
                let end = note.end;
                let mut pitch = note.pitch;
                let mut pieces: Vec<(u64, f64, u8)> = Vec::new();
                for bend in &note.bends {
                    let bent = (note.bent_pitch(bend) + 0.5).floor().clamp(0.0, 127.0) as u8;
                    if bent != pitch {
                        pieces.push((bend.tick, bend.real_time, bent));
                        pitch = bent;
                    }
                }
                note.bends.clear();

                let Some(&(first_tick, first_time, _)) = pieces.first() else {
                    continue;
                };
                note.end = Some(first_time);
                note.length_ticks = Some(first_tick.saturating_sub(start_tick));

                for (i, &(tick, time, pitch)) in pieces.iter().enumerate() {
                    let (next_tick, next_time) = match pieces.get(i + 1) {
                        Some(&(next_tick, next_time, _)) => (Some(next_tick), Some(next_time)),
                        None => (end_tick, end),
                    };
                    let mut piece = note.clone();
                    piece.pitch = pitch;
                    piece.end = next_time;
                    piece.length_ticks = next_tick.map(|next| next.saturating_sub(tick));
                    let mut piece_event =
                        ControlEvent::new(tick, channel_number, ControlKind::NoteOn(piece));
                    piece_event.real_time = time;
                    added.push(piece_event);
                }
                split += 1;
            }

            channel
                .events
                .retain(|event| !matches!(event.kind, ControlKind::PitchBend(_)));
            channel.events.extend(added);
        }
    }

    debug!(split, "discretized bent notes");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PitchBend;
    use crate::simplify::time::{compute_note_lengths, compute_real_times};
    use crate::timeline::TimeDivision;

    fn build(events: Vec<ControlEvent>) -> Timeline {
        let mut timeline = Timeline::new(0, TimeDivision::TicksPerBeat(480));
        for event in events {
            timeline.push_control(0, event);
        }
        compute_real_times(&mut timeline);
        compute_note_lengths(&mut timeline);
        resolve_bend_ranges(&mut timeline);
        timeline
    }

    fn ranges(timeline: &Timeline) -> Vec<u8> {
        timeline.tracks[0]
            .channel(0)
            .events
            .iter()
            .filter_map(|e| match e.kind {
                ControlKind::PitchBend(PitchBend { range, .. }) => Some(range),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn default_range_without_rpn() {
        let timeline = build(vec![ControlEvent::pitch_bend(0, 0, 8192)]);
        assert_eq!(ranges(&timeline), vec![4]);
    }

    #[test]
    fn rpn_sequence_sets_range() {
        let timeline = build(vec![
            ControlEvent::pitch_bend(0, 0, 8192),
            ControlEvent::controller(10, 0, 101, 0),
            ControlEvent::controller(10, 0, 100, 0),
            ControlEvent::controller(10, 0, 6, 12),
            ControlEvent::pitch_bend(20, 0, 8192),
        ]);
        assert_eq!(ranges(&timeline), vec![4, 12]);
    }

    #[test]
    fn unrelated_controllers_do_not_break_the_sequence() {
        let timeline = build(vec![
            ControlEvent::controller(10, 0, 101, 0),
            ControlEvent::controller(10, 0, 7, 100),
            ControlEvent::controller(10, 0, 100, 0),
            ControlEvent::controller(10, 0, 64, 0),
            ControlEvent::controller(10, 0, 6, 2),
            ControlEvent::pitch_bend(20, 0, 8192),
        ]);
        assert_eq!(ranges(&timeline), vec![2]);
    }

    #[test]
    fn other_parameters_and_notes_reset() {
        let timeline = build(vec![
            // RPN 1 (fine tuning) is not a bend range
            ControlEvent::controller(10, 0, 101, 0),
            ControlEvent::controller(10, 0, 100, 1),
            ControlEvent::controller(10, 0, 6, 64),
            // a note between selector and data entry
            ControlEvent::controller(20, 0, 101, 0),
            ControlEvent::controller(20, 0, 100, 0),
            ControlEvent::note_on(20, 0, 60, 100),
            ControlEvent::controller(20, 0, 6, 24),
            ControlEvent::pitch_bend(30, 0, 8192),
        ]);
        assert_eq!(ranges(&timeline), vec![4]);
    }

    #[test]
    fn ranges_are_per_channel() {
        let timeline = build(vec![
            ControlEvent::controller(0, 1, 101, 0),
            ControlEvent::controller(0, 1, 100, 0),
            ControlEvent::controller(0, 1, 6, 12),
            ControlEvent::pitch_bend(10, 0, 8192),
        ]);
        assert_eq!(ranges(&timeline), vec![4]);
    }

    #[test]
    fn ranges_reach_bends_on_other_tracks() {
        let mut timeline = Timeline::new(1, TimeDivision::TicksPerBeat(480));
        timeline.push_control(0, ControlEvent::controller(0, 3, 101, 0));
        timeline.push_control(0, ControlEvent::controller(0, 3, 100, 0));
        timeline.push_control(0, ControlEvent::controller(0, 3, 6, 12));
        timeline.push_control(1, ControlEvent::pitch_bend(10, 3, 8192));
        timeline.push_control(1, ControlEvent::pitch_bend(10, 4, 8192));
        compute_real_times(&mut timeline);
        resolve_bend_ranges(&mut timeline);

        let range = |channel: u8| match timeline.tracks[1].channel(channel).events[0].kind {
            ControlKind::PitchBend(PitchBend { range, .. }) => range,
            _ => 0,
        };
        assert_eq!(range(3), 12);
        assert_eq!(range(4), DEFAULT_BEND_RANGE);
    }

    #[test]
    fn bends_attach_within_note_span() {
        let mut timeline = build(vec![
            ControlEvent::pitch_bend(0, 0, 8192),
            ControlEvent::note_on(0, 0, 60, 100),
            ControlEvent::pitch_bend(240, 0, 8192 + 2048),
            ControlEvent::note_off(480, 0, 60),
            ControlEvent::pitch_bend(480, 0, 8192 + 4096),
            ControlEvent::pitch_bend(600, 0, 8192),
        ]);
        attach_bends(&mut timeline);

        let note = timeline.tracks[0].channel(0).events[1].as_note().unwrap();
        let pitches: Vec<f64> = note.bends.iter().map(|b| note.bent_pitch(b)).collect();
        assert_eq!(pitches, vec![60.0, 60.5, 61.0]);

        attach_bends(&mut timeline);
        let note = timeline.tracks[0].channel(0).events[1].as_note().unwrap();
        assert_eq!(note.bends.len(), 3);
    }

    #[test]
    fn discretize_splits_on_semitone_changes() {
        let mut timeline = build(vec![
            ControlEvent::note_on(0, 0, 60, 100),
            ControlEvent::pitch_bend(240, 0, 8192 + 4096),
            ControlEvent::pitch_bend(360, 0, 8192 + 4100),
            ControlEvent::pitch_bend(480, 0, 8192 + 8191),
            ControlEvent::note_off(960, 0, 60),
        ]);
        attach_bends(&mut timeline);
        discretize_bends(&mut timeline);

        let events = &timeline.tracks[0].channel(0).events;
        assert!(events
            .iter()
            .all(|e| !matches!(e.kind, ControlKind::PitchBend(_))));

        let mut notes: Vec<(u64, u8, Option<u64>)> = events
            .iter()
            .filter_map(|e| e.sounding_note().map(|n| (e.tick, n.pitch, n.length_ticks)))
            .collect();
        notes.sort();
        assert_eq!(
            notes,
            vec![(0, 60, Some(240)), (240, 61, Some(240)), (480, 62, Some(480))]
        );
    }
}
