//! Control and meta events.
//!
//! Every event carries its tick-domain absolute time (`tick`) and the real
//! time in seconds (`real_time`) assigned by [`crate::simplify::time`].

use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::timeline::PERCUSSION_CHANNEL;

/// Default bend range in semitones when no RPN 0 sequence precedes a bend.
pub const DEFAULT_BEND_RANGE: u8 = 4;

/// Centre value of a 14-bit pitch bend.
pub const BEND_CENTER: u16 = 8192;

/// Controllers with a known meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    ModulationWheel,
    DataEntryMsb,
    Volume,
    Pan,
    Expression,
    DataEntryLsb,
    SustainPedal,
    ReverbLevel,
    TremoloLevel,
    ChorusLevel,
    CelesteLevel,
    PhaserLevel,
    NonRegisteredParameterLsb,
    NonRegisteredParameterMsb,
    RegisteredParameterLsb,
    RegisteredParameterMsb,
    AllControllersOff,
    AllNotesOff,
}

impl Control {
    pub fn from_number(number: u8) -> Option<Self> {
        let control = match number {
            1 => Control::ModulationWheel,
            6 => Control::DataEntryMsb,
            7 => Control::Volume,
            10 => Control::Pan,
            11 => Control::Expression,
            38 => Control::DataEntryLsb,
            64 => Control::SustainPedal,
            91 => Control::ReverbLevel,
            92 => Control::TremoloLevel,
            93 => Control::ChorusLevel,
            94 => Control::CelesteLevel,
            95 => Control::PhaserLevel,
            98 => Control::NonRegisteredParameterLsb,
            99 => Control::NonRegisteredParameterMsb,
            100 => Control::RegisteredParameterLsb,
            101 => Control::RegisteredParameterMsb,
            121 => Control::AllControllersOff,
            123 => Control::AllNotesOff,
            _ => return None,
        };
        Some(control)
    }

    pub fn number(self) -> u8 {
        match self {
            Control::ModulationWheel => 1,
            Control::DataEntryMsb => 6,
            Control::Volume => 7,
            Control::Pan => 10,
            Control::Expression => 11,
            Control::DataEntryLsb => 38,
            Control::SustainPedal => 64,
            Control::ReverbLevel => 91,
            Control::TremoloLevel => 92,
            Control::ChorusLevel => 93,
            Control::CelesteLevel => 94,
            Control::PhaserLevel => 95,
            Control::NonRegisteredParameterLsb => 98,
            Control::NonRegisteredParameterMsb => 99,
            Control::RegisteredParameterLsb => 100,
            Control::RegisteredParameterMsb => 101,
            Control::AllControllersOff => 121,
            Control::AllNotesOff => 123,
        }
    }
}

/// What sounds a note: the drum kit or a General MIDI program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    Percussion,
    Program(u8),
}

/// A pitch bend attached to the note it sounds under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttachedBend {
    pub tick: u64,
    pub real_time: f64,
    pub value: u16,
    pub range: u8,
}

impl AttachedBend {
    /// Pitch offset in semitones.
    pub fn semitones(&self) -> f64 {
        bend_semitones(self.value, self.range)
    }
}

fn bend_semitones(value: u16, range: u8) -> f64 {
    range as f64 * (value as f64 - BEND_CENTER as f64) / 16384.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteOn {
    pub pitch: u8,
    pub velocity: u8,
    /// velocity/127 × volume/127 × expression/127
    pub volume: f64,
    pub length_ticks: Option<u64>,
    /// Real time the note stops sounding, once resolved.
    pub end: Option<f64>,
    pub instrument: Option<Instrument>,
    pub bends: Vec<AttachedBend>,
}

impl NoteOn {
    pub fn new(pitch: u8, velocity: u8) -> Self {
        Self {
            pitch,
            velocity,
            volume: 0.0,
            length_ticks: None,
            end: None,
            instrument: None,
            bends: Vec::new(),
        }
    }

    /// Velocity-0 Note-Ons are note releases.
    pub fn is_sounding(&self) -> bool {
        self.velocity > 0
    }

    /// Pitch in semitones under a bend, `pitch + range × (value − 8192) / 16384`.
    pub fn bent_pitch(&self, bend: &AttachedBend) -> f64 {
        self.pitch as f64 + bend.semitones()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteOff {
    pub pitch: u8,
    pub velocity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub number: u8,
    pub value: u8,
}

impl Controller {
    pub fn control(&self) -> Option<Control> {
        Control::from_number(self.number)
    }

    pub fn is(&self, control: Control) -> bool {
        self.number == control.number()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchBend {
    /// 14-bit value, 8192 is centre.
    pub value: u16,
    /// Resolved range in semitones.
    pub range: u8,
}

impl PitchBend {
    pub fn semitones(&self) -> f64 {
        bend_semitones(self.value, self.range)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlKind {
    NoteOn(NoteOn),
    NoteOff(NoteOff),
    Controller(Controller),
    PitchBend(PitchBend),
    ProgramChange { program: u8 },
    ChannelAftertouch { value: u8 },
    NoteAftertouch { pitch: u8, value: u8 },
}

/// A channel-scoped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub tick: u64,
    pub real_time: f64,
    pub channel: u8,
    pub kind: ControlKind,
}

impl ControlEvent {
    pub fn new(tick: u64, channel: u8, kind: ControlKind) -> Self {
        Self {
            tick,
            real_time: 0.0,
            channel,
            kind,
        }
    }

    pub fn note_on(tick: u64, channel: u8, pitch: u8, velocity: u8) -> Self {
        Self::new(tick, channel, ControlKind::NoteOn(NoteOn::new(pitch, velocity)))
    }

    pub fn note_off(tick: u64, channel: u8, pitch: u8) -> Self {
        Self::new(
            tick,
            channel,
            ControlKind::NoteOff(NoteOff { pitch, velocity: 0 }),
        )
    }

    pub fn controller(tick: u64, channel: u8, number: u8, value: u8) -> Self {
        Self::new(
            tick,
            channel,
            ControlKind::Controller(Controller { number, value }),
        )
    }

    pub fn pitch_bend(tick: u64, channel: u8, value: u16) -> Self {
        Self::new(
            tick,
            channel,
            ControlKind::PitchBend(PitchBend {
                value,
                range: DEFAULT_BEND_RANGE,
            }),
        )
    }

    pub fn program_change(tick: u64, channel: u8, program: u8) -> Self {
        Self::new(tick, channel, ControlKind::ProgramChange { program })
    }

    pub fn is_percussion(&self) -> bool {
        self.channel == PERCUSSION_CHANNEL
    }

    pub fn as_note(&self) -> Option<&NoteOn> {
        match &self.kind {
            ControlKind::NoteOn(note) => Some(note),
            _ => None,
        }
    }

    pub fn as_note_mut(&mut self) -> Option<&mut NoteOn> {
        match &mut self.kind {
            ControlKind::NoteOn(note) => Some(note),
            _ => None,
        }
    }

    /// The Note-On if this event starts a sounding note.
    pub fn sounding_note(&self) -> Option<&NoteOn> {
        self.as_note().filter(|note| note.is_sounding())
    }

    pub fn as_controller(&self) -> Option<&Controller> {
        match &self.kind {
            ControlKind::Controller(controller) => Some(controller),
            _ => None,
        }
    }

    /// Pitch this event releases, for Note-Offs and velocity-0 Note-Ons.
    pub fn released_pitch(&self) -> Option<u8> {
        match &self.kind {
            ControlKind::NoteOff(off) => Some(off.pitch),
            ControlKind::NoteOn(note) if !note.is_sounding() => Some(note.pitch),
            _ => None,
        }
    }

    /// Real length of a sounding note, zero when it has no resolved end.
    pub fn real_length(&self) -> f64 {
        match self.as_note().and_then(|note| note.end) {
            Some(end) => (end - self.real_time).max(0.0),
            None => 0.0,
        }
    }
}

/// Metrical strength of a beat, 0 strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatLevel {
    Strong = 0,
    Medium = 1,
    Weak = 2,
}

impl BeatLevel {
    pub fn rank(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    /// Length in seconds.
    pub length: f64,
    pub level: BeatLevel,
    pub chord: Option<Key>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
    pub clocks_per_click: u8,
    pub thirty_seconds_per_quarter: u8,
}

impl TimeSignature {
    pub fn common_time() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
            clocks_per_click: 24,
            thirty_seconds_per_quarter: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    Text,
    Copyright,
    TrackName,
    InstrumentName,
    Lyric,
    Marker,
    CuePoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetaKind {
    Tempo { micros_per_quarter: u32 },
    TimeSignature(TimeSignature),
    KeySignature(Key),
    Beat(Beat),
    Text { kind: TextKind, text: String },
    EndOfTrack,
}

/// A track-scoped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEvent {
    pub tick: u64,
    pub real_time: f64,
    pub kind: MetaKind,
}

impl MetaEvent {
    pub fn new(tick: u64, kind: MetaKind) -> Self {
        Self {
            tick,
            real_time: 0.0,
            kind,
        }
    }

    pub fn tempo(tick: u64, micros_per_quarter: u32) -> Self {
        Self::new(tick, MetaKind::Tempo { micros_per_quarter })
    }

    pub fn time_signature(tick: u64, numerator: u8, denominator: u8) -> Self {
        Self::new(
            tick,
            MetaKind::TimeSignature(TimeSignature {
                numerator,
                denominator,
                ..TimeSignature::common_time()
            }),
        )
    }

    pub fn key_signature(tick: u64, key: Key) -> Self {
        Self::new(tick, MetaKind::KeySignature(key))
    }

    pub fn end_of_track(tick: u64) -> Self {
        Self::new(tick, MetaKind::EndOfTrack)
    }

    /// A beat whose real time is already known.
    pub fn beat(tick: u64, real_time: f64, length: f64, level: BeatLevel) -> Self {
        Self {
            tick,
            real_time,
            kind: MetaKind::Beat(Beat {
                length,
                level,
                chord: None,
            }),
        }
    }

    pub fn as_beat(&self) -> Option<&Beat> {
        match &self.kind {
            MetaKind::Beat(beat) => Some(beat),
            _ => None,
        }
    }

    pub fn as_beat_mut(&mut self) -> Option<&mut Beat> {
        match &mut self.kind {
            MetaKind::Beat(beat) => Some(beat),
            _ => None,
        }
    }

    pub fn is_beat(&self) -> bool {
        matches!(self.kind, MetaKind::Beat(_))
    }
}
