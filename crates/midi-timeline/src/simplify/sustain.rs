//! Sustain pedal (CC64) simulation.
//!
//! Per channel number, across all tracks, pedal changes, note starts and note ends are merged into one
//! chronological stream. A note released while the pedal is down keeps
//! sounding until the pedal comes up; a retriggered pitch cuts the previous
//! note at the new start.

use tracing::debug;

use crate::event::{Control, ControlEvent};
use crate::simplify::time::TempoMap;
use crate::timeline::{Timeline, CHANNEL_COUNT};

const PEDAL_DOWN: u8 = 64;

/// A control event on one channel number: `(track, index)`.
type Slot = (usize, usize);

#[derive(Debug, Clone, Copy)]
enum Step {
    Pedal(u8),
    NoteEnd(Slot),
    NoteStart(Slot),
}

impl Step {
    /// Tie order: pedal changes, then note ends, then note starts.
    fn rank(&self) -> u8 {
        match self {
            Step::Pedal(_) => 0,
            Step::NoteEnd(_) => 1,
            Step::NoteStart(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Held {
    slot: Slot,
    released: bool,
}

/// Extends note ends across sustain pedal holds. Pedal and notes are matched
/// by channel number, whichever tracks they sit on. Needs note ends from
/// [`crate::simplify::time::compute_note_lengths`].
pub fn apply_sustain(timeline: &mut Timeline) {
    let tempo = TempoMap::from_timeline(timeline);
    let mut extended = 0usize;

    for number in 0..CHANNEL_COUNT as u8 {
        extended += ChannelSustain {
            timeline: &mut *timeline,
            number,
            tempo: &tempo,
        }
        .run();
    }

    debug!(extended, "applied sustain pedal");
}

struct ChannelSustain<'a> {
    timeline: &'a mut Timeline,
    number: u8,
    tempo: &'a TempoMap,
}

impl ChannelSustain<'_> {
    fn event(&self, (track, index): Slot) -> &ControlEvent {
        &self.timeline.tracks[track].channel(self.number).events[index]
    }

    fn pitch(&self, slot: Slot) -> Option<usize> {
        self.event(slot).as_note().map(|note| note.pitch as usize)
    }

    fn end(&self, slot: Slot) -> Option<f64> {
        self.event(slot).as_note().and_then(|note| note.end)
    }

    /// Moves a note's end, keeping `length_ticks` consistent with it.
    fn set_end(&mut self, (track, index): Slot, time: f64) {
        let end_tick = self.tempo.tick_at(time);
        let event = &mut self.timeline.tracks[track].channel_mut(self.number).events[index];
        let start_tick = event.tick;
        if let Some(note) = event.as_note_mut() {
            note.end = Some(time);
            note.length_ticks = Some(end_tick.saturating_sub(start_tick));
        }
    }

    fn steps(&self) -> Vec<(f64, Step)> {
        let mut steps = Vec::new();
        for (track, data) in self.timeline.tracks.iter().enumerate() {
            for (index, event) in data.channel(self.number).events.iter().enumerate() {
                if let Some(controller) = event.as_controller() {
                    if controller.is(Control::SustainPedal) {
                        steps.push((event.real_time, Step::Pedal(controller.value)));
                    }
                } else if let Some(note) = event.sounding_note() {
                    steps.push((event.real_time, Step::NoteStart((track, index))));
                    if let Some(end) = note.end {
                        steps.push((end, Step::NoteEnd((track, index))));
                    }
                }
            }
        }
        steps
    }

    fn run(mut self) -> usize {
        let mut steps = self.steps();
        if !steps.iter().any(|(_, step)| matches!(step, Step::Pedal(_))) {
            return 0;
        }
        steps.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.rank().cmp(&b.1.rank())));

        let mut sustained = false;
        let mut held: [Option<Held>; 128] = [None; 128];
        let mut extended = 0;

        for (time, step) in steps {
            match step {
                Step::Pedal(value) if value >= PEDAL_DOWN => sustained = true,
                Step::Pedal(_) => {
                    if sustained {
                        for slot in held.iter_mut() {
                            if let Some(note) = slot.filter(|h| h.released) {
                                self.set_end(note.slot, time);
                                extended += 1;
                                *slot = None;
                            }
                        }
                    }
                    sustained = false;
                }
                Step::NoteStart(slot) => {
                    let Some(pitch) = self.pitch(slot) else {
                        continue;
                    };
                    if let Some(previous) = held[pitch] {
                        self.set_end(previous.slot, time);
                    }
                    held[pitch] = Some(Held {
                        slot,
                        released: false,
                    });
                }
                Step::NoteEnd(slot) => {
                    let Some(pitch) = self.pitch(slot) else {
                        continue;
                    };
                    // a retriggered note no longer owns the slot
                    let Some(current) = held[pitch].filter(|h| h.slot == slot) else {
                        continue;
                    };
                    held[pitch] = sustained.then_some(Held {
                        released: true,
                        ..current
                    });
                }
            }
        }

        // pedal still down at the end of the performance
        if sustained {
            let length = self.timeline.length;
            for note in held.iter().flatten().filter(|h| h.released) {
                let end = self.end(note.slot).unwrap_or(length);
                self.set_end(note.slot, end.max(length));
                extended += 1;
            }
        }

        extended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ControlEvent, MetaEvent};
    use crate::simplify::time::{compute_note_lengths, compute_real_times};
    use crate::timeline::TimeDivision;

    // 480 ppq at the default tempo: 960 ticks per second
    fn run(events: Vec<ControlEvent>, end_tick: u64) -> Timeline {
        let mut timeline = Timeline::new(0, TimeDivision::TicksPerBeat(480));
        for event in events {
            timeline.push_control(0, event);
        }
        timeline.push_meta(0, MetaEvent::end_of_track(end_tick));
        compute_real_times(&mut timeline);
        compute_note_lengths(&mut timeline);
        apply_sustain(&mut timeline);
        timeline
    }

    fn end_of(timeline: &Timeline, index: usize) -> Option<f64> {
        timeline.tracks[0].channel(0).events[index]
            .as_note()
            .and_then(|n| n.end)
    }

    fn ticks_of(timeline: &Timeline, index: usize) -> Option<u64> {
        timeline.tracks[0].channel(0).events[index]
            .as_note()
            .and_then(|n| n.length_ticks)
    }

    #[test]
    fn release_under_pedal_lasts_until_pedal_up() {
        let timeline = run(
            vec![
                ControlEvent::controller(0, 0, 64, 127),
                ControlEvent::note_on(0, 0, 60, 100),
                ControlEvent::note_off(480, 0, 60),
                ControlEvent::controller(1920, 0, 64, 0),
            ],
            3840,
        );
        assert_eq!(end_of(&timeline, 1), Some(2.0));
        assert_eq!(ticks_of(&timeline, 1), Some(1920));
    }

    #[test]
    fn release_after_pedal_up_keeps_its_own_end() {
        let timeline = run(
            vec![
                ControlEvent::controller(0, 0, 64, 127),
                ControlEvent::note_on(0, 0, 60, 100),
                ControlEvent::controller(480, 0, 64, 0),
                ControlEvent::note_off(960, 0, 60),
            ],
            3840,
        );
        assert_eq!(end_of(&timeline, 1), Some(1.0));
    }

    #[test]
    fn pedal_held_past_the_end_extends_to_timeline_length() {
        let timeline = run(
            vec![
                ControlEvent::controller(0, 0, 64, 127),
                ControlEvent::note_on(0, 0, 60, 100),
                ControlEvent::note_off(480, 0, 60),
            ],
            3840,
        );
        assert_eq!(end_of(&timeline, 1), Some(4.0));
        assert_eq!(ticks_of(&timeline, 1), Some(3840));
    }

    #[test]
    fn retrigger_cuts_sustained_note() {
        let timeline = run(
            vec![
                ControlEvent::controller(0, 0, 64, 127),
                ControlEvent::note_on(0, 0, 60, 100),
                ControlEvent::note_off(240, 0, 60),
                ControlEvent::note_on(960, 0, 60, 100),
                ControlEvent::note_off(1200, 0, 60),
                ControlEvent::controller(1920, 0, 64, 0),
            ],
            3840,
        );
        assert_eq!(end_of(&timeline, 1), Some(1.0));
        assert_eq!(ticks_of(&timeline, 1), Some(960));
        assert_eq!(end_of(&timeline, 3), Some(2.0));
        assert_eq!(ticks_of(&timeline, 3), Some(960));
    }

    #[test]
    fn cut_note_end_does_not_release_successor() {
        // first note is cut at 0.5 s by the retrigger; its own end at 1.0 s
        // must not touch the second note
        let timeline = run(
            vec![
                ControlEvent::note_on(0, 0, 60, 100),
                ControlEvent::note_on(480, 0, 60, 100),
                ControlEvent::controller(600, 0, 64, 127),
                ControlEvent::note_off(960, 0, 60),
                ControlEvent::note_off(1440, 0, 60),
                ControlEvent::controller(1920, 0, 64, 0),
            ],
            3840,
        );
        // note lengths pair each start with the first later release
        assert_eq!(end_of(&timeline, 0), Some(0.5));
        assert_eq!(end_of(&timeline, 1), Some(2.0));
    }

    #[test]
    fn no_pedal_no_change() {
        let timeline = run(
            vec![
                ControlEvent::note_on(0, 0, 60, 100),
                ControlEvent::note_off(480, 0, 60),
            ],
            960,
        );
        assert_eq!(end_of(&timeline, 0), Some(0.5));
    }

    #[test]
    fn pedal_on_another_track_sustains_the_channel() {
        let mut timeline = Timeline::new(1, TimeDivision::TicksPerBeat(480));
        timeline.push_control(0, ControlEvent::controller(0, 0, 64, 127));
        timeline.push_control(0, ControlEvent::controller(1920, 0, 64, 0));
        // same pedal must not touch another channel
        timeline.push_control(1, ControlEvent::note_on(0, 0, 60, 100));
        timeline.push_control(1, ControlEvent::note_off(480, 0, 60));
        timeline.push_control(1, ControlEvent::note_on(0, 1, 64, 100));
        timeline.push_control(1, ControlEvent::note_off(480, 1, 64));
        timeline.push_meta(0, MetaEvent::end_of_track(3840));
        compute_real_times(&mut timeline);
        compute_note_lengths(&mut timeline);
        apply_sustain(&mut timeline);

        let note = |channel: u8| {
            let note = timeline.tracks[1].channel(channel).events[0].as_note().unwrap();
            (note.end, note.length_ticks)
        };
        assert_eq!(note(0), (Some(2.0), Some(1920)));
        assert_eq!(note(1), (Some(0.5), Some(480)));
    }
}
