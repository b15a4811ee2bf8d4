//! Tonal key value type shared by key detection and chord labelling.
//!
//! A chord is represented by the same type as a key: a root tone plus a major
//! or minor triad quality. Keys index as `scale × 12 + tone`, so 0..12 are the
//! major keys and 12..24 the minor ones.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of distinct keys (and triads).
pub const KEY_COUNT: usize = 24;

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
const FLAT_NAMES: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

const MAJOR_SCALE: [bool; 12] = [
    true, false, true, false, true, true, false, true, false, true, false, true,
];
const MINOR_SCALE: [bool; 12] = [
    true, false, true, true, false, true, false, true, true, false, true, false,
];

/// Pitch class, C = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tone {
    C,
    #[serde(rename = "C#")]
    CSharp,
    D,
    #[serde(rename = "D#")]
    DSharp,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    G,
    #[serde(rename = "G#")]
    GSharp,
    A,
    #[serde(rename = "A#")]
    ASharp,
    B,
}

impl Tone {
    pub const ALL: [Tone; 12] = [
        Tone::C,
        Tone::CSharp,
        Tone::D,
        Tone::DSharp,
        Tone::E,
        Tone::F,
        Tone::FSharp,
        Tone::G,
        Tone::GSharp,
        Tone::A,
        Tone::ASharp,
        Tone::B,
    ];

    /// Tone of any integer pitch class, reduced modulo 12.
    pub fn from_pitch_class(pc: i32) -> Tone {
        Self::ALL[pc.rem_euclid(12) as usize]
    }

    pub fn from_pitch(pitch: u8) -> Tone {
        Self::from_pitch_class(pitch as i32)
    }

    pub fn pitch_class(self) -> u8 {
        self as u8
    }

    pub fn transposed(self, semitones: i32) -> Tone {
        Self::from_pitch_class(self as i32 + semitones)
    }

    pub fn name(self) -> &'static str {
        SHARP_NAMES[self as usize]
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tone {
    type Err = Error;

    /// Accepts sharp or flat spellings, case-insensitive on the letter.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let normalized = match chars.next() {
            Some(first) => format!("{}{}", first.to_ascii_uppercase(), chars.as_str()),
            None => return Err(Error::UnknownTone(s.to_string())),
        };

        SHARP_NAMES
            .iter()
            .position(|name| *name == normalized)
            .or_else(|| FLAT_NAMES.iter().position(|name| *name == normalized))
            .map(|pc| Self::ALL[pc])
            .ok_or_else(|| Error::UnknownTone(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Major,
    Minor,
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scale::Major => write!(f, "major"),
            Scale::Minor => write!(f, "minor"),
        }
    }
}

/// How a detected key relates to a reference key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMatch {
    Identical,
    Parallel,
    Relative,
    Fifth,
    Unrelated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub tone: Tone,
    pub scale: Scale,
}

impl Key {
    pub const fn new(tone: Tone, scale: Scale) -> Self {
        Self { tone, scale }
    }

    pub fn from_index(index: usize) -> Result<Self> {
        if index >= KEY_COUNT {
            return Err(Error::KeyIndex(index));
        }
        let scale = if index < 12 { Scale::Major } else { Scale::Minor };
        Ok(Self::new(Tone::ALL[index % 12], scale))
    }

    pub fn index(self) -> usize {
        match self.scale {
            Scale::Major => self.tone as usize,
            Scale::Minor => 12 + self.tone as usize,
        }
    }

    /// All 24 keys in index order: the majors on C..B, then the minors.
    pub fn all() -> impl Iterator<Item = Key> {
        [Scale::Major, Scale::Minor]
            .into_iter()
            .flat_map(|scale| Tone::ALL.into_iter().map(move |tone| Key::new(tone, scale)))
    }

    /// Key from a key-signature event: sharps positive, flats negative.
    pub fn from_signature(sharps: i8, scale: Scale) -> Self {
        let major_tonic = 7 * sharps as i32;
        let tone = match scale {
            Scale::Major => Tone::from_pitch_class(major_tonic),
            Scale::Minor => Tone::from_pitch_class(major_tonic + 9),
        };
        Self::new(tone, scale)
    }

    /// Position on the circle of fifths, minor keys sharing their relative major's slot.
    fn circle_position(self) -> i32 {
        match self.scale {
            Scale::Major => self.tone as i32,
            Scale::Minor => self.tone as i32 + 3,
        }
    }

    /// Number of steps between two keys on the circle of fifths, 0..=6.
    pub fn fifths_distance(self, other: Key) -> usize {
        let diff = (self.circle_position() - other.circle_position()).unsigned_abs() as usize;
        // 7 is its own inverse modulo 12
        let fifths = (7 * diff) % 12;
        fifths.min(12 - fifths)
    }

    pub fn compare(self, other: Key) -> KeyMatch {
        if self == other {
            return KeyMatch::Identical;
        }
        if self.tone == other.tone {
            return KeyMatch::Parallel;
        }
        let up = (other.tone as i32 - self.tone as i32).rem_euclid(12);
        match (self.scale, other.scale) {
            (Scale::Major, Scale::Minor) if up == 9 => KeyMatch::Relative,
            (Scale::Minor, Scale::Major) if up == 3 => KeyMatch::Relative,
            (a, b) if a == b && (up == 5 || up == 7) => KeyMatch::Fifth,
            _ => KeyMatch::Unrelated,
        }
    }

    /// Whether a pitch class lies in this key's scale (natural minor for minor keys).
    pub fn scale_contains(self, pitch_class: i32) -> bool {
        let degree = (pitch_class - self.tone as i32).rem_euclid(12) as usize;
        match self.scale {
            Scale::Major => MAJOR_SCALE[degree],
            Scale::Minor => MINOR_SCALE[degree],
        }
    }

    /// Pitch classes of the root-position triad on this key.
    pub fn triad(self) -> [i32; 3] {
        let root = self.tone as i32;
        let third = match self.scale {
            Scale::Major => 4,
            Scale::Minor => 3,
        };
        [root, (root + third) % 12, (root + 7) % 12]
    }

    pub fn transposed(self, semitones: i32) -> Self {
        Self::new(self.tone.transposed(semitones), self.scale)
    }

    /// Short chord symbol, e.g. `C` or `F#m`.
    pub fn chord_symbol(self) -> String {
        match self.scale {
            Scale::Major => self.tone.name().to_string(),
            Scale::Minor => format!("{}m", self.tone.name()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tone, self.scale)
    }
}

impl TryFrom<usize> for Key {
    type Error = Error;

    fn try_from(index: usize) -> Result<Self> {
        Key::from_index(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips_for_all_keys() {
        for (i, key) in Key::all().enumerate() {
            assert_eq!(key.index(), i);
            assert_eq!(Key::from_index(i).unwrap(), key);
        }
    }

    #[test]
    fn index_out_of_range_is_error() {
        assert!(matches!(Key::from_index(24), Err(Error::KeyIndex(24))));
    }

    #[test]
    fn signatures_map_to_expected_keys() {
        assert_eq!(Key::from_signature(0, Scale::Major), Key::new(Tone::C, Scale::Major));
        assert_eq!(Key::from_signature(1, Scale::Major), Key::new(Tone::G, Scale::Major));
        assert_eq!(Key::from_signature(-1, Scale::Major), Key::new(Tone::F, Scale::Major));
        assert_eq!(Key::from_signature(-3, Scale::Major), Key::new(Tone::DSharp, Scale::Major));
        assert_eq!(Key::from_signature(0, Scale::Minor), Key::new(Tone::A, Scale::Minor));
        assert_eq!(Key::from_signature(2, Scale::Minor), Key::new(Tone::B, Scale::Minor));
    }

    #[test]
    fn fifths_distance_counts_steps_on_the_circle() {
        let c = Key::new(Tone::C, Scale::Major);
        assert_eq!(c.fifths_distance(Key::new(Tone::G, Scale::Major)), 1);
        assert_eq!(c.fifths_distance(Key::new(Tone::F, Scale::Major)), 1);
        assert_eq!(c.fifths_distance(Key::new(Tone::D, Scale::Major)), 2);
        assert_eq!(c.fifths_distance(Key::new(Tone::FSharp, Scale::Major)), 6);
        // relative minor shares the slot
        assert_eq!(c.fifths_distance(Key::new(Tone::A, Scale::Minor)), 0);
        assert_eq!(c.fifths_distance(Key::new(Tone::C, Scale::Minor)), 3);
    }

    #[test]
    fn compare_classifies_relations() {
        let c = Key::new(Tone::C, Scale::Major);
        assert_eq!(c.compare(c), KeyMatch::Identical);
        assert_eq!(c.compare(Key::new(Tone::C, Scale::Minor)), KeyMatch::Parallel);
        assert_eq!(c.compare(Key::new(Tone::A, Scale::Minor)), KeyMatch::Relative);
        assert_eq!(
            Key::new(Tone::A, Scale::Minor).compare(c),
            KeyMatch::Relative
        );
        assert_eq!(c.compare(Key::new(Tone::G, Scale::Major)), KeyMatch::Fifth);
        assert_eq!(c.compare(Key::new(Tone::F, Scale::Major)), KeyMatch::Fifth);
        assert_eq!(c.compare(Key::new(Tone::E, Scale::Major)), KeyMatch::Unrelated);
    }

    #[test]
    fn tone_parses_sharps_and_flats() {
        assert_eq!("C#".parse::<Tone>().unwrap(), Tone::CSharp);
        assert_eq!("db".parse::<Tone>().unwrap(), Tone::CSharp);
        assert_eq!("Bb".parse::<Tone>().unwrap(), Tone::ASharp);
        assert!("H".parse::<Tone>().is_err());
        assert!("".parse::<Tone>().is_err());
    }

    #[test]
    fn scale_membership_and_symbols() {
        let a_minor = Key::new(Tone::A, Scale::Minor);
        assert!(a_minor.scale_contains(0));
        assert!(!a_minor.scale_contains(1));
        assert_eq!(a_minor.triad(), [9, 0, 4]);
        assert_eq!(a_minor.chord_symbol(), "Am");
        assert_eq!(a_minor.to_string(), "A minor");
        assert_eq!(a_minor.transposed(3).to_string(), "C minor");
    }
}
