//! Beat grid for a timeline.
//!
//! When the file's own tick grid explains the note onsets well, beats come
//! straight from it (time signatures included). Otherwise the tactus detector
//! infers the beats from the onsets and the strength classifier ranks them.

pub mod fit;
pub mod interval;
pub mod strength;
pub mod tactus;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use midi_timeline::math::min_with_index;
use midi_timeline::simplify::TempoMap;
use midi_timeline::{BeatLevel, MetaEvent, MetreSource, TimeSignature, Timeline};

use crate::config::MetreConfig;
use crate::Result;

use fit::{beat_grid_fit, metre_fit};
use strength::assign_beat_strengths;
use tactus::{detect_tactus, tactus_notes};

/// Beats longer than this on average are split in two, seconds.
const MAX_MEAN_BEAT: f64 = 1.0;
/// Length of a lone beat, seconds.
const DEFAULT_BEAT_LENGTH: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetreOutcome {
    pub source: MetreSource,
    pub fit: f64,
    pub beats: usize,
    /// Path score of the tactus detector when it produced the grid.
    pub tactus_score: Option<f64>,
}

/// A beat before it becomes a meta event.
#[derive(Debug, Clone, Copy, PartialEq)]
struct GridBeat {
    tick: u64,
    start: f64,
    length: f64,
    level: BeatLevel,
}

fn bar_level(position: usize, numerator: u8) -> BeatLevel {
    match (position, numerator) {
        (0, _) => BeatLevel::Strong,
        (2, 4) | (3, 6) => BeatLevel::Medium,
        _ => BeatLevel::Weak,
    }
}

/// Sets each length to the gap to the next start; the last beat repeats its
/// predecessor's length.
fn lengths_from_successors(beats: &mut [GridBeat]) {
    for i in 0..beats.len() {
        beats[i].length = match beats.get(i + 1) {
            Some(next) => next.start - beats[i].start,
            None if i > 0 => beats[i - 1].length,
            None => DEFAULT_BEAT_LENGTH,
        };
    }
}

fn mean_length(beats: &[GridBeat]) -> f64 {
    if beats.is_empty() {
        return 0.0;
    }
    beats.iter().map(|b| b.length).sum::<f64>() / beats.len() as f64
}

/// Beats along the file's tick grid, anchored at `offset`. A piece ending
/// exactly on a beat keeps that beat.
fn embedded_grid(timeline: &Timeline, tempo: &TempoMap, offset: u64) -> Vec<GridBeat> {
    let ticks_per_beat = timeline.division.ticks_per_beat().max(1) as u64;
    let end = timeline.end_tick();
    let signatures = timeline.time_signatures();

    let mut ticks: Vec<(u64, BeatLevel)> = Vec::new();
    if offset > 0 {
        ticks.push((0, BeatLevel::Weak));
    }

    let mut signature = TimeSignature::common_time();
    let mut next_signature = 0;
    let mut position = 0usize;
    let mut tick = offset;
    while tick <= end || ticks.is_empty() {
        while let Some((at, changed)) = signatures.get(next_signature) {
            if *at > tick {
                break;
            }
            signature = *changed;
            position = 0;
            next_signature += 1;
        }
        let numerator = signature.numerator.max(1);
        ticks.push((tick, bar_level(position % numerator as usize, numerator)));

        let step = ticks_per_beat * 4 / signature.denominator.max(1) as u64;
        tick += step.max(1);
        position += 1;
    }

    let mut beats: Vec<GridBeat> = ticks
        .into_iter()
        .map(|(tick, level)| GridBeat {
            tick,
            start: tempo.seconds_at(tick),
            length: 0.0,
            level,
        })
        .collect();
    lengths_from_successors(&mut beats);

    while mean_length(&beats) > MAX_MEAN_BEAT {
        beats = beats
            .into_iter()
            .flat_map(|beat| {
                let half = beat.length / 2.0;
                let middle = beat.start + half;
                [
                    GridBeat {
                        length: half,
                        ..beat
                    },
                    GridBeat {
                        tick: tempo.tick_at(middle),
                        start: middle,
                        length: half,
                        level: BeatLevel::Weak,
                    },
                ]
            })
            .collect();
    }
    beats
}

/// Beats from the tactus detector, extended to cover the whole timeline.
fn detected_grid(
    timeline: &Timeline,
    tempo: &TempoMap,
    config: &MetreConfig,
) -> Result<(Vec<GridBeat>, f64)> {
    let notes = tactus_notes(timeline);
    let solution = detect_tactus(&notes, &config.tactus)?;
    let onsets: Vec<f64> = timeline
        .sounding_notes()
        .map(|(_, event, _)| event.real_time)
        .collect();
    let first = min_with_index(&onsets).map_or(0.0, |(_, time)| time);

    let mut beats: Vec<GridBeat> = solution
        .onsets_ms
        .iter()
        .map(|onset| {
            let start = first + onset / 1000.0;
            GridBeat {
                tick: tempo.tick_at(start),
                start,
                length: 0.0,
                level: BeatLevel::Medium,
            }
        })
        .collect();
    lengths_from_successors(&mut beats);

    if let Some(last) = beats.last_mut() {
        if last.length <= 0.0 {
            last.length = DEFAULT_BEAT_LENGTH;
        }
    }
    while let Some(&last) = beats.last() {
        let start = last.start + last.length;
        if start >= timeline.length {
            break;
        }
        beats.push(GridBeat {
            tick: tempo.tick_at(start),
            start,
            ..last
        });
    }

    Ok((beats, solution.score))
}

/// Replaces the timeline's beat events with a fresh grid.
///
/// Returns `None` when the timeline has no sounding notes; no beats are
/// written then. Needs real times and note ends.
pub fn compute_metre(timeline: &mut Timeline, config: &MetreConfig) -> Result<Option<MetreOutcome>> {
    timeline.clear_beats();
    if timeline.sounding_notes().next().is_none() {
        warn!("no sounding notes, skipping beat grid");
        return Ok(None);
    }

    let tempo = TempoMap::from_timeline(timeline);
    let embedded = metre_fit(timeline);
    debug!(offset = embedded.offset, fit = embedded.fit, "embedded metre fit");

    let (source, mut beats, tactus_score) = if embedded.fit > config.fit_threshold {
        let beats = embedded_grid(timeline, &tempo, embedded.offset);
        (MetreSource::Embedded, beats, None)
    } else {
        let (beats, score) = detected_grid(timeline, &tempo, config)?;
        (MetreSource::Detected, beats, Some(score))
    };

    if let Some(first) = beats.first().copied() {
        if first.start > 0.0 {
            beats.insert(
                0,
                GridBeat {
                    tick: 0,
                    start: 0.0,
                    length: first.start,
                    level: BeatLevel::Weak,
                },
            );
        }
    }

    let count = beats.len();
    let track = timeline.first_track_mut();
    for beat in beats {
        track
            .meta
            .push(MetaEvent::beat(beat.tick, beat.start, beat.length, beat.level));
    }

    let fit = match source {
        MetreSource::Embedded => embedded.fit,
        MetreSource::Detected => {
            assign_beat_strengths(timeline);
            beat_grid_fit(timeline)?
        }
    };
    timeline.metre_fit = fit;
    timeline.metre_source = Some(source);

    info!(?source, beats = count, fit, "computed beat grid");
    Ok(Some(MetreOutcome {
        source,
        fit,
        beats: count,
        tactus_score,
    }))
}
