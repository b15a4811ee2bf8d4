//! Passes that enrich a freshly imported [`crate::Timeline`] in place.
//!
//! Order matters: real times first, then note lengths, then everything that
//! reads note ends (loudness, sustain, bends).

pub mod instruments;
pub mod loudness;
pub mod pitch_bend;
pub mod sustain;
pub mod time;
pub mod transpose;

pub use instruments::assign_instruments;
pub use loudness::resolve_volumes;
pub use pitch_bend::{attach_bends, discretize_bends, resolve_bend_ranges};
pub use sustain::apply_sustain;
pub use time::{compute_note_lengths, compute_real_times, TempoMap};
pub use transpose::transpose_to;
