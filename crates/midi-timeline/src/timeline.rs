use serde::{Deserialize, Serialize};

use crate::event::{ControlEvent, MetaEvent, MetaKind, NoteOn, TimeSignature};
use crate::key::Key;

pub const CHANNEL_COUNT: usize = 16;

/// Channel reserved for General MIDI percussion (channel 10 counting from one).
pub const PERCUSSION_CHANNEL: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeDivision {
    TicksPerBeat(u16),
    /// SMPTE timing; `fps` is 24, 25, 29.97 or 30.
    Frames { fps: f64, ticks_per_frame: u8 },
}

impl TimeDivision {
    /// Tick resolution used for the metrical grid.
    pub fn ticks_per_beat(&self) -> u32 {
        match self {
            TimeDivision::TicksPerBeat(ticks) => *ticks as u32,
            TimeDivision::Frames {
                ticks_per_frame, ..
            } => *ticks_per_frame as u32,
        }
    }
}

/// Where the key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Detected,
    KeySignature,
}

/// Where the beat grid came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetreSource {
    Embedded,
    Detected,
}

/// Stable address of a control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId {
    pub track: usize,
    pub channel: u8,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub number: u8,
    /// In arrival order, not necessarily sorted by time.
    pub events: Vec<ControlEvent>,
}

impl Channel {
    pub fn new(number: u8) -> Self {
        Self {
            number,
            events: Vec::new(),
        }
    }

    /// A channel is playable when it has at least one Note-On.
    pub fn is_playable(&self) -> bool {
        self.events.iter().any(|e| e.as_note().is_some())
    }

    /// Indices of `events` ordered by tick, stable for equal ticks.
    pub fn indices_by_tick(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.events.len()).collect();
        order.sort_by_key(|&i| self.events[i].tick);
        order
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub channels: Vec<Channel>,
    pub meta: Vec<MetaEvent>,
}

impl Track {
    pub fn new() -> Self {
        Self {
            channels: (0..CHANNEL_COUNT as u8).map(Channel::new).collect(),
            meta: Vec::new(),
        }
    }

    pub fn channel(&self, number: u8) -> &Channel {
        &self.channels[number as usize % CHANNEL_COUNT]
    }

    pub fn channel_mut(&mut self, number: u8) -> &mut Channel {
        &mut self.channels[number as usize % CHANNEL_COUNT]
    }

    pub fn event_count(&self) -> usize {
        self.meta.len() + self.channels.iter().map(|c| c.events.len()).sum::<usize>()
    }
}

impl Default for Track {
    fn default() -> Self {
        Self::new()
    }
}

/// A whole MIDI performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub format: u8,
    pub division: TimeDivision,
    pub tracks: Vec<Track>,
    /// Real seconds of the latest End-of-Track.
    pub length: f64,
    pub key: Option<Key>,
    pub key_source: Option<KeySource>,
    pub metre_source: Option<MetreSource>,
    pub metre_fit: f64,
    pub max_volume: f64,
}

impl Timeline {
    pub fn new(format: u8, division: TimeDivision) -> Self {
        Self {
            format,
            division,
            tracks: Vec::new(),
            length: 0.0,
            key: None,
            key_source: None,
            metre_source: None,
            metre_fit: 0.0,
            max_volume: 0.0,
        }
    }

    /// Appends an empty track and returns its index.
    pub fn add_track(&mut self) -> usize {
        self.tracks.push(Track::new());
        self.tracks.len() - 1
    }

    /// Track 0, created on demand. Derived meta events (beats) live here.
    pub fn first_track_mut(&mut self) -> &mut Track {
        if self.tracks.is_empty() {
            self.tracks.push(Track::new());
        }
        &mut self.tracks[0]
    }

    pub fn push_control(&mut self, track: usize, event: ControlEvent) {
        while self.tracks.len() <= track {
            self.tracks.push(Track::new());
        }
        self.tracks[track].channel_mut(event.channel).events.push(event);
    }

    pub fn push_meta(&mut self, track: usize, event: MetaEvent) {
        while self.tracks.len() <= track {
            self.tracks.push(Track::new());
        }
        self.tracks[track].meta.push(event);
    }

    pub fn control_events(&self) -> impl Iterator<Item = (EventId, &ControlEvent)> {
        self.tracks.iter().enumerate().flat_map(|(t, track)| {
            track.channels.iter().flat_map(move |channel| {
                channel.events.iter().enumerate().map(move |(index, event)| {
                    (
                        EventId {
                            track: t,
                            channel: channel.number,
                            index,
                        },
                        event,
                    )
                })
            })
        })
    }

    pub fn control_events_mut(&mut self) -> impl Iterator<Item = &mut ControlEvent> {
        self.tracks
            .iter_mut()
            .flat_map(|track| track.channels.iter_mut())
            .flat_map(|channel| channel.events.iter_mut())
    }

    pub fn meta_events(&self) -> impl Iterator<Item = &MetaEvent> {
        self.tracks.iter().flat_map(|track| track.meta.iter())
    }

    pub fn meta_events_mut(&mut self) -> impl Iterator<Item = &mut MetaEvent> {
        self.tracks.iter_mut().flat_map(|track| track.meta.iter_mut())
    }

    /// Every Note-On, including velocity-0 releases.
    pub fn notes(&self) -> impl Iterator<Item = (EventId, &ControlEvent, &NoteOn)> {
        self.control_events()
            .filter_map(|(id, event)| event.as_note().map(|note| (id, event, note)))
    }

    pub fn sounding_notes(&self) -> impl Iterator<Item = (EventId, &ControlEvent, &NoteOn)> {
        self.notes().filter(|(_, _, note)| note.is_sounding())
    }

    /// Sounding notes outside the percussion channel, ordered by real time.
    pub fn pitched_notes_by_time(&self) -> Vec<(EventId, &ControlEvent, &NoteOn)> {
        let mut notes: Vec<_> = self
            .sounding_notes()
            .filter(|(_, event, _)| !event.is_percussion())
            .collect();
        notes.sort_by(|a, b| a.1.real_time.total_cmp(&b.1.real_time));
        notes
    }

    pub fn event(&self, id: EventId) -> Option<&ControlEvent> {
        self.tracks
            .get(id.track)?
            .channels
            .get(id.channel as usize)?
            .events
            .get(id.index)
    }

    pub fn event_mut(&mut self, id: EventId) -> Option<&mut ControlEvent> {
        self.tracks
            .get_mut(id.track)?
            .channels
            .get_mut(id.channel as usize)?
            .events
            .get_mut(id.index)
    }

    pub fn note_mut(&mut self, id: EventId) -> Option<&mut NoteOn> {
        self.event_mut(id).and_then(|event| event.as_note_mut())
    }

    /// Beat events ordered by real time.
    pub fn beats(&self) -> Vec<&MetaEvent> {
        let mut beats: Vec<&MetaEvent> = self.meta_events().filter(|e| e.is_beat()).collect();
        beats.sort_by(|a, b| a.real_time.total_cmp(&b.real_time));
        beats
    }

    pub fn beats_mut(&mut self) -> Vec<&mut MetaEvent> {
        let mut beats: Vec<&mut MetaEvent> =
            self.meta_events_mut().filter(|e| e.is_beat()).collect();
        beats.sort_by(|a, b| a.real_time.total_cmp(&b.real_time));
        beats
    }

    pub fn clear_beats(&mut self) {
        for track in &mut self.tracks {
            track.meta.retain(|e| !e.is_beat());
        }
    }

    /// Key signatures as `(real_time, key)`, ordered by time.
    pub fn key_signatures(&self) -> Vec<(f64, Key)> {
        let mut keys: Vec<(f64, Key)> = self
            .meta_events()
            .filter_map(|e| match e.kind {
                MetaKind::KeySignature(key) => Some((e.real_time, key)),
                _ => None,
            })
            .collect();
        keys.sort_by(|a, b| a.0.total_cmp(&b.0));
        keys
    }

    /// Time signatures as `(tick, signature)`, ordered by tick.
    pub fn time_signatures(&self) -> Vec<(u64, TimeSignature)> {
        let mut signatures: Vec<(u64, TimeSignature)> = self
            .meta_events()
            .filter_map(|e| match e.kind {
                MetaKind::TimeSignature(ts) => Some((e.tick, ts)),
                _ => None,
            })
            .collect();
        signatures.sort_by_key(|(tick, _)| *tick);
        signatures
    }

    /// Tick of the latest End-of-Track, else of the latest event.
    pub fn end_tick(&self) -> u64 {
        self.meta_events()
            .filter(|e| matches!(e.kind, MetaKind::EndOfTrack))
            .map(|e| e.tick)
            .max()
            .or_else(|| {
                self.control_events()
                    .map(|(_, e)| e.tick)
                    .chain(self.meta_events().map(|e| e.tick))
                    .max()
            })
            .unwrap_or(0)
    }

    /// For each channel number, whether any track has a Note-On on it.
    pub fn playable_channels(&self) -> [bool; CHANNEL_COUNT] {
        let mut playable = [false; CHANNEL_COUNT];
        for track in &self.tracks {
            for channel in &track.channels {
                if channel.is_playable() {
                    playable[channel.number as usize] = true;
                }
            }
        }
        playable
    }

    pub fn event_count(&self) -> usize {
        self.tracks.iter().map(Track::event_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BeatLevel;

    fn sample() -> Timeline {
        let mut timeline = Timeline::new(1, TimeDivision::TicksPerBeat(480));
        timeline.push_control(0, ControlEvent::note_on(0, 0, 60, 100));
        timeline.push_control(1, ControlEvent::note_on(480, 3, 64, 0));
        timeline.push_control(1, ControlEvent::controller(0, 3, 7, 100));
        timeline.push_meta(0, MetaEvent::end_of_track(960));
        timeline
    }

    #[test]
    fn events_route_to_their_channel() {
        let timeline = sample();
        assert_eq!(timeline.tracks.len(), 2);
        assert_eq!(timeline.tracks[1].channel(3).events.len(), 2);
        assert_eq!(timeline.control_events().count(), 3);
    }

    #[test]
    fn event_ids_address_events() {
        let mut timeline = sample();
        let ids: Vec<EventId> = timeline.notes().map(|(id, _, _)| id).collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(
            ids[1],
            EventId {
                track: 1,
                channel: 3,
                index: 0
            }
        );

        timeline.note_mut(ids[0]).unwrap().volume = 0.5;
        assert_eq!(timeline.event(ids[0]).unwrap().as_note().unwrap().volume, 0.5);
        assert!(timeline
            .event(EventId {
                track: 4,
                channel: 0,
                index: 0
            })
            .is_none());
    }

    #[test]
    fn sounding_notes_skip_releases() {
        let timeline = sample();
        assert_eq!(timeline.sounding_notes().count(), 1);
    }

    #[test]
    fn playable_channels_span_tracks() {
        let playable = sample().playable_channels();
        assert!(playable[0]);
        assert!(playable[3]);
        assert!(!playable[9]);
    }

    #[test]
    fn beats_sort_by_time_and_clear() {
        let mut timeline = sample();
        timeline.push_meta(0, MetaEvent::beat(0, 1.0, 0.5, BeatLevel::Weak));
        timeline.push_meta(1, MetaEvent::beat(0, 0.5, 0.5, BeatLevel::Strong));
        let times: Vec<f64> = timeline.beats().iter().map(|b| b.real_time).collect();
        assert_eq!(times, vec![0.5, 1.0]);

        timeline.clear_beats();
        assert!(timeline.beats().is_empty());
        assert_eq!(timeline.meta_events().count(), 1);
    }

    #[test]
    fn end_tick_prefers_end_of_track() {
        let mut timeline = sample();
        assert_eq!(timeline.end_tick(), 960);
        timeline.tracks[0].meta.clear();
        assert_eq!(timeline.end_tick(), 480);
    }
}
