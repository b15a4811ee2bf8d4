//! Tick to real-time mapping and note lengths.

use tracing::debug;

use crate::event::MetaKind;
use crate::timeline::{TimeDivision, Timeline};

/// Tempo before the first Set-Tempo event, in µs per quarter (120 BPM).
pub const DEFAULT_TEMPO: u32 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoSegment {
    tick: u64,
    seconds: f64,
    micros_per_quarter: u32,
}

/// Piecewise-linear tick → seconds map built from the Set-Tempo events.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    segments: Vec<TempoSegment>,
    ticks_per_beat: f64,
    /// Seconds per tick for SMPTE division, where tempo changes do not apply.
    frame_tick: Option<f64>,
}

impl TempoMap {
    pub fn from_timeline(timeline: &Timeline) -> Self {
        match timeline.division {
            TimeDivision::Frames {
                fps,
                ticks_per_frame,
            } => Self {
                segments: Vec::new(),
                ticks_per_beat: ticks_per_frame.max(1) as f64,
                frame_tick: Some(1.0 / (fps * ticks_per_frame.max(1) as f64)),
            },
            TimeDivision::TicksPerBeat(ticks) => {
                let mut tempos: Vec<(u64, u32)> = timeline
                    .meta_events()
                    .filter_map(|e| match e.kind {
                        MetaKind::Tempo { micros_per_quarter } => Some((e.tick, micros_per_quarter)),
                        _ => None,
                    })
                    .collect();
                tempos.sort_by_key(|(tick, _)| *tick);
                Self::from_tempos(ticks, &tempos)
            }
        }
    }

    /// Map for tick division from `(tick, µs per quarter)` changes sorted by tick.
    pub fn from_tempos(ticks_per_beat: u16, tempos: &[(u64, u32)]) -> Self {
        let mut map = Self {
            segments: vec![TempoSegment {
                tick: 0,
                seconds: 0.0,
                micros_per_quarter: DEFAULT_TEMPO,
            }],
            ticks_per_beat: ticks_per_beat.max(1) as f64,
            frame_tick: None,
        };

        for &(tick, micros_per_quarter) in tempos {
            let seconds = map.seconds_at(tick);
            match map.segments.last_mut() {
                Some(last) if last.tick == tick => last.micros_per_quarter = micros_per_quarter,
                _ => map.segments.push(TempoSegment {
                    tick,
                    seconds,
                    micros_per_quarter,
                }),
            }
        }
        map
    }

    fn segment_for_tick(&self, tick: u64) -> Option<&TempoSegment> {
        let after = self.segments.partition_point(|s| s.tick <= tick);
        self.segments[..after].last()
    }

    fn seconds_per_tick(&self, segment: &TempoSegment) -> f64 {
        segment.micros_per_quarter as f64 / 1e6 / self.ticks_per_beat
    }

    pub fn seconds_at(&self, tick: u64) -> f64 {
        if let Some(per_tick) = self.frame_tick {
            return tick as f64 * per_tick;
        }
        match self.segment_for_tick(tick) {
            Some(segment) => {
                let delta = (tick - segment.tick) as f64;
                segment.seconds
                    + delta * segment.micros_per_quarter as f64 / (1e6 * self.ticks_per_beat)
            }
            None => 0.0,
        }
    }

    /// Nearest tick at a real time; inverse of [`TempoMap::seconds_at`].
    pub fn tick_at(&self, seconds: f64) -> u64 {
        let seconds = seconds.max(0.0);
        if let Some(per_tick) = self.frame_tick {
            return (seconds / per_tick).round() as u64;
        }
        let after = self.segments.partition_point(|s| s.seconds <= seconds);
        match self.segments[..after].last() {
            Some(segment) => {
                let per_tick = self.seconds_per_tick(segment);
                segment.tick + ((seconds - segment.seconds) / per_tick).round() as u64
            }
            None => 0,
        }
    }

    pub fn ticks_per_beat(&self) -> f64 {
        self.ticks_per_beat
    }
}

/// Fills `real_time` on every event and sets [`Timeline::length`].
pub fn compute_real_times(timeline: &mut Timeline) {
    let map = TempoMap::from_timeline(timeline);

    for event in timeline.control_events_mut() {
        event.real_time = map.seconds_at(event.tick);
    }
    for event in timeline.meta_events_mut() {
        event.real_time = map.seconds_at(event.tick);
    }

    let end_of_track = timeline
        .meta_events()
        .filter(|e| matches!(e.kind, MetaKind::EndOfTrack))
        .map(|e| e.real_time)
        .reduce(f64::max);
    timeline.length = end_of_track
        .or_else(|| {
            timeline
                .control_events()
                .map(|(_, e)| e.real_time)
                .chain(timeline.meta_events().map(|e| e.real_time))
                .reduce(f64::max)
        })
        .unwrap_or(0.0);

    debug!(length = timeline.length, "computed real times");
}

/// Pairs every sounding Note-On with the first later release of the same
/// pitch on its channel. Unmatched notes keep no end.
pub fn compute_note_lengths(timeline: &mut Timeline) {
    let mut unmatched = 0usize;

    for track in &mut timeline.tracks {
        for channel in &mut track.channels {
            let order = channel.indices_by_tick();
            let mut resolved = Vec::new();

            for (pos, &index) in order.iter().enumerate() {
                let Some(note) = channel.events[index].sounding_note() else {
                    continue;
                };
                let release = order[pos + 1..]
                    .iter()
                    .map(|&later| &channel.events[later])
                    .find(|later| later.released_pitch() == Some(note.pitch))
                    .map(|later| (later.tick, later.real_time));
                resolved.push((index, release));
            }

            for (index, release) in resolved {
                let event = &mut channel.events[index];
                let start_tick = event.tick;
                let Some(note) = event.as_note_mut() else {
                    continue;
                };
                match release {
                    Some((tick, real_time)) => {
                        note.length_ticks = Some(tick - start_tick);
                        note.end = Some(real_time);
                    }
                    None => {
                        note.length_ticks = None;
                        note.end = None;
                        unmatched += 1;
                    }
                }
            }
        }
    }

    if unmatched > 0 {
        debug!(unmatched, "notes without a release");
    }
}
