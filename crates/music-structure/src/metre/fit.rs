//! How well note onsets sit on a beat grid.

use serde::{Deserialize, Serialize};

use midi_timeline::Timeline;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetreFit {
    /// Tick the grid is anchored at.
    pub offset: u64,
    /// Mean onset goodness, 0..=1.
    pub fit: f64,
}

/// Goodness of an onset `time` units after a beat of `period` units: close
/// to a sixteenth subdivision scores high, beats outweigh half-beats.
fn goodness(time: f64, period: f64) -> f64 {
    if period <= 0.0 {
        return 0.0;
    }
    let portion = (4.0 * time / period + 0.5).floor();
    let weight = if portion.rem_euclid(4.0) == 0.0 {
        1.0
    } else if portion.rem_euclid(2.0) == 0.0 {
        0.5
    } else {
        0.25
    };
    let deviation = (time - portion * period / 4.0) * 8.0 / period;
    (-16.0 * deviation * deviation).exp() * weight
}

fn mean_goodness(ticks: &[u64], offset: u64, period: u64) -> f64 {
    let period = period.max(1) as i64;
    let total: f64 = ticks
        .iter()
        .map(|&tick| {
            let time = (tick as i64 - offset as i64).rem_euclid(period);
            goodness(time as f64, period as f64)
        })
        .sum();
    total / ticks.len() as f64
}

/// Fit of the sounding notes against the file's own tick grid, trying
/// offset 0 and the first note's tick. Ties keep offset 0.
pub fn metre_fit(timeline: &Timeline) -> MetreFit {
    let mut ticks: Vec<u64> = timeline.sounding_notes().map(|(_, e, _)| e.tick).collect();
    if ticks.is_empty() {
        return MetreFit {
            offset: 0,
            fit: 0.0,
        };
    }
    ticks.sort_unstable();

    let period = timeline.division.ticks_per_beat() as u64;
    let mut best = MetreFit {
        offset: 0,
        fit: mean_goodness(&ticks, 0, period),
    };
    let first = ticks[0];
    if first != 0 {
        let fit = mean_goodness(&ticks, first, period);
        if fit > best.fit {
            best = MetreFit { offset: first, fit };
        }
    }
    best
}

/// Fit of the sounding notes against the beat events already in the
/// timeline, measured in seconds from the enclosing beat.
pub fn beat_grid_fit(timeline: &Timeline) -> Result<f64> {
    let beats: Vec<(f64, f64)> = timeline
        .beats()
        .into_iter()
        .filter_map(|event| event.as_beat().map(|beat| (event.real_time, beat.length)))
        .collect();
    if beats.is_empty() {
        return Err(Error::NoBeatGrid);
    }

    let mut count = 0usize;
    let mut total = 0.0;
    for (_, event, _) in timeline.sounding_notes() {
        let time = event.real_time;
        let index = beats.partition_point(|(start, _)| *start <= time).saturating_sub(1);
        let (start, length) = beats[index];
        total += goodness((time - start).max(0.0), length);
        count += 1;
    }

    Ok(if count == 0 { 0.0 } else { total / count as f64 })
}
