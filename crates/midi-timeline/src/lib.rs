//! Timeline model for a parsed MIDI performance.
//!
//! A [`Timeline`] is built once from a standard MIDI file and then enriched in
//! place by the passes under [`simplify`]: real-time mapping, note lengths,
//! loudness, sustain pedal, pitch-bend ranges and instruments. Higher-level
//! analysis (metre, key, chords) lives in `music-structure`.

pub mod event;
pub mod gm;
pub mod import;
pub mod key;
pub mod lookup;
pub mod math;
pub mod simplify;
pub mod timeline;

pub use event::{
    AttachedBend, Beat, BeatLevel, Control, ControlEvent, ControlKind, Controller, Instrument,
    MetaEvent, MetaKind, NoteOff, NoteOn, PitchBend, TextKind, TimeSignature,
};
pub use key::{Key, KeyMatch, Scale, Tone, KEY_COUNT};
pub use lookup::TimedIndex;
pub use timeline::{
    Channel, EventId, KeySource, MetreSource, TimeDivision, Timeline, Track, CHANNEL_COUNT,
    PERCUSSION_CHANNEL,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("MIDI parse error: {0}")]
    MidiParse(String),

    #[error("sample length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("key index {0} out of range 0..24")]
    KeyIndex(usize),

    #[error("unknown tone name: {0}")]
    UnknownTone(String),
}

pub type Result<T> = std::result::Result<T, Error>;
