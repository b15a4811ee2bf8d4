//! Musical structure over a MIDI [`Timeline`]: beat grid and beat strength,
//! tonal key, and one chord per beat.
//!
//! [`StructureEngine`] runs the whole pipeline. Every stage is also exposed
//! as a public function so hosts can run a subset or swap the key strategy.

pub mod chord_tables;
pub mod chords;
pub mod config;
pub mod engine;
pub mod key;
pub mod metre;
pub mod types;

pub use chords::{analyze_chords, decode_chords};
pub use config::{AnalysisConfig, KeyStrategy};
pub use engine::StructureEngine;
pub use key::{
    ClassifierKeyFinder, KeyClassifier, KeyEstimate, KeyFinder, ProfileKeyFinder,
    WindowedKeyFinder,
};
pub use metre::strength::classify_strengths;
pub use metre::tactus::{detect_tactus, TactusParams, TactusSolution};
pub use metre::{compute_metre, MetreOutcome};
pub use types::StructureReport;

pub use midi_timeline::Timeline;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot analyze without a beat grid")]
    NoBeatGrid,

    #[error("cannot analyze chords without a key")]
    NoKey,

    #[error("no pitched notes to analyze")]
    NoPitchedNotes,

    #[error("beat detector found no candidate beat lengths")]
    NoTactusCandidates,

    #[error("key classifier returned index {0}, expected 0..24")]
    InvalidKeyIndex(usize),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid value in {var}: {message}")]
    ConfigEnv { var: String, message: String },

    #[error(transparent)]
    Timeline(#[from] midi_timeline::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
