//! Beat-grid (tactus) detection from note onsets.
//!
//! Time is quantized into pips. A dynamic program over `pip × beat length`
//! scores chains of beats by the salience of the pips they land on, the
//! syncopation positions between them and the regularity of successive beat
//! lengths. Several beat-length ranges are tried and the best is traced back.

use serde::{Deserialize, Serialize};
use tracing::debug;

use midi_timeline::math::max_with_index;
use midi_timeline::Timeline;

use crate::{Error, Result};

/// Registral neighbours are notes within this many semitones.
const REGISTRAL_SPAN: i32 = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TactusParams {
    /// Quantization step in ms.
    pub pip_ms: i64,
    /// Longest note length that still adds salience, ms.
    pub max_effective_length_ms: i64,
    pub note_factor: f64,
    /// Multiplier on the penalty for uneven successive beats.
    pub beat_interval_factor: f64,
    /// Salience bonus of every non-empty pip.
    pub note_bonus: f64,
    /// Extra count per percussion note in a pip.
    pub percussion_bonus: f64,
    /// Beat length changes up to this many ms are free when gradual.
    pub beat_slop_ms: i64,
    pub tactus_min_ms: f64,
    pub tactus_max_ms: f64,
    /// Ratio between the longest and shortest beat of one candidate range.
    pub tactus_width: f64,
    /// Growth factor between candidate ranges.
    pub tactus_step: f64,
    pub length_power: f64,
}

impl Default for TactusParams {
    fn default() -> Self {
        Self {
            pip_ms: 35,
            max_effective_length_ms: 1000,
            note_factor: 1.0,
            beat_interval_factor: 10.0,
            note_bonus: 0.2,
            percussion_bonus: 1.0,
            beat_slop_ms: 35,
            tactus_min_ms: 400.0,
            tactus_max_ms: 1200.0,
            tactus_width: 1.8,
            tactus_step: 1.1,
            length_power: 2.0,
        }
    }
}

impl TactusParams {
    fn quantize(&self, ms: f64) -> usize {
        (ms / self.pip_ms.max(1) as f64 + 0.5).max(0.0) as usize
    }

    fn log(&self, x: f64) -> f64 {
        x.ln() / self.length_power.ln()
    }

    /// Length multiplier of a chain's first beat.
    fn start_score(&self) -> f64 {
        self.log(self.tactus_min_ms + 1.0)
    }
}

/// One sounding note as seen by the detector. Times in ms from the first note.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TactusNote {
    pub start_ms: i64,
    pub length_ms: i64,
    pub volume: f64,
    /// `(track, channel)`; registral neighbours share it.
    pub voice: (usize, u8),
    pub pitch: u8,
    pub percussion: bool,
}

/// Sounding notes of a timeline ordered by start, relative to the first one.
pub fn tactus_notes(timeline: &Timeline) -> Vec<TactusNote> {
    let mut notes: Vec<_> = timeline.sounding_notes().collect();
    notes.sort_by(|a, b| a.1.real_time.total_cmp(&b.1.real_time));
    let Some(first) = notes.first().map(|(_, event, _)| event.real_time) else {
        return Vec::new();
    };

    notes
        .into_iter()
        .map(|(id, event, note)| TactusNote {
            start_ms: ((event.real_time - first) * 1000.0) as i64,
            length_ms: (event.real_length() * 1000.0) as i64,
            volume: note.volume,
            voice: (id.track, id.channel),
            pitch: note.pitch,
            percussion: event.is_percussion(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TactusSolution {
    /// Beat onsets in ms from the first note; always starts at 0.
    pub onsets_ms: Vec<f64>,
    pub score: f64,
    /// Beat-length range (in pips) the solution was found in.
    pub min_pip: usize,
    pub max_pip: usize,
}

impl TactusSolution {
    /// Gaps between consecutive onsets.
    pub fn lengths_ms(&self) -> Vec<f64> {
        self.onsets_ms.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

/// Tempo drift between successive beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Trend {
    #[default]
    Steady,
    Rising,
    Falling,
}

impl Trend {
    /// Next trend for a signed beat-length change; `true` when it is penalized.
    fn step(self, delta: i64, slop: i64) -> (Trend, bool) {
        let small_rise = delta > 0 && delta <= slop;
        let small_fall = delta < 0 && delta >= -slop;
        match self {
            _ if delta == 0 => (self, false),
            Trend::Steady if small_rise => (Trend::Rising, false),
            Trend::Steady if small_fall => (Trend::Falling, false),
            Trend::Rising if small_fall => (Trend::Steady, false),
            Trend::Falling if small_rise => (Trend::Steady, false),
            _ => (Trend::Steady, true),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    score: f64,
    /// Length of the preceding beat, `None` for a chain's first beat.
    previous: Option<usize>,
    trend: Trend,
}

struct ScoreTable {
    min: usize,
    max: usize,
    cells: Vec<Cell>,
}

impl ScoreTable {
    fn width(&self) -> usize {
        self.max - self.min + 1
    }

    fn cell(&self, pip: usize, length: usize) -> &Cell {
        &self.cells[pip * self.width() + (length - self.min)]
    }

    fn fill(base: &[f64], min: usize, max: usize, params: &TactusParams) -> Self {
        let mut table = Self {
            min,
            max,
            cells: Vec::with_capacity(base.len() * (max - min + 1)),
        };
        let pip = params.pip_ms as f64;
        let start_score = params.start_score();

        for i in 0..base.len() {
            for length in min..=max {
                if i < length {
                    table.cells.push(Cell {
                        score: base[i] * start_score,
                        previous: None,
                        trend: Trend::Steady,
                    });
                    continue;
                }

                let from = i - length;
                let syncopation = base[i - length / 2] / 4.0
                    + base[i - length / 3] / 12.0
                    + base[i - length * 2 / 3] / 12.0
                    + base[i - length / 4] / 16.0
                    + base[i - length * 3 / 4] / 16.0;
                let gain = syncopation + base[i];

                let mut best = Cell {
                    score: f64::NEG_INFINITY,
                    previous: None,
                    trend: Trend::Steady,
                };
                for previous in min..=max {
                    let before = table.cell(from, previous);
                    let (score, trend) = if from < previous {
                        let multiple = params.log(length as f64 * pip + 1.0);
                        (before.score + gain * multiple, Trend::Steady)
                    } else {
                        let multiple = params.log((length + previous) as f64 * pip / 2.0 + 1.0);
                        let delta = (length as i64 - previous as i64) * params.pip_ms;
                        let (trend, punished) = before.trend.step(delta, params.beat_slop_ms);
                        let penalty = if punished {
                            params.beat_interval_factor * (delta.abs() as f64 / 1000.0).sqrt()
                        } else {
                            0.0
                        };
                        (before.score + gain * multiple - penalty, trend)
                    };
                    if score > best.score {
                        best = Cell {
                            score,
                            previous: Some(previous),
                            trend,
                        };
                    }
                }
                table.cells.push(best);
            }
        }
        table
    }

    /// Best `(score, pip, length)` among the last `max` pips, latest pip first.
    fn best_final(&self, pips: usize) -> Option<(f64, usize, usize)> {
        let finals: Vec<(usize, usize)> = (pips.saturating_sub(self.max)..pips)
            .rev()
            .flat_map(|i| (self.min..=self.max).map(move |length| (i, length)))
            .collect();
        let scores: Vec<f64> = finals.iter().map(|&(i, length)| self.cell(i, length).score).collect();
        max_with_index(&scores).map(|(at, score)| (score, finals[at].0, finals[at].1))
    }

    /// Beat pips of the chain ending in `(pip, length)`, in time order.
    fn backtrack(&self, mut pip: usize, mut length: usize) -> Vec<usize> {
        let mut beats = vec![pip];
        while let Some(previous) = self.cell(pip, length).previous {
            pip -= length;
            length = previous;
            beats.push(pip);
        }
        beats.reverse();
        beats
    }
}

struct Pips {
    /// Note indices starting in each pip.
    notes: Vec<Vec<usize>>,
    base: Vec<f64>,
}

fn build_pips(notes: &[TactusNote], params: &TactusParams) -> Pips {
    let mean_volume = notes.iter().map(|n| n.volume).sum::<f64>() / notes.len() as f64;
    let relative = |n: &TactusNote| {
        if mean_volume > 0.0 {
            n.volume / mean_volume
        } else {
            1.0
        }
    };

    // effective length: held length or registral inter-onset interval, capped
    let effective: Vec<i64> = notes
        .iter()
        .enumerate()
        .map(|(i, note)| {
            let mut ioi = 0;
            for later in &notes[i + 1..] {
                let neighbour = if note.percussion {
                    later.percussion && later.pitch == note.pitch
                } else {
                    later.voice == note.voice
                        && (later.pitch as i32 - note.pitch as i32).abs() <= REGISTRAL_SPAN
                };
                if neighbour {
                    ioi = later.start_ms - note.start_ms;
                    break;
                }
                if later.start_ms - note.start_ms >= params.max_effective_length_ms {
                    break;
                }
            }
            note.length_ms.max(ioi).min(params.max_effective_length_ms)
        })
        .collect();

    let last = notes
        .iter()
        .map(|n| n.start_ms + n.length_ms)
        .max()
        .unwrap_or(0);
    let mut pip_notes = vec![Vec::new(); params.quantize(last as f64) + 1];
    for (i, note) in notes.iter().enumerate() {
        let pip = params.quantize(note.start_ms as f64).min(pip_notes.len() - 1);
        pip_notes[pip].push(i);
    }

    let base = pip_notes
        .iter()
        .map(|members| {
            if members.is_empty() {
                return 0.0;
            }
            let count = members.len() as f64;
            let mean_length =
                members.iter().map(|&i| effective[i] as f64).sum::<f64>() / count / 1000.0;
            let mean_volume = members.iter().map(|&i| relative(&notes[i]).sqrt()).sum::<f64>() / count;
            let percussion = members.iter().filter(|&&i| notes[i].percussion).count() as f64
                * params.percussion_bonus;
            params.note_factor
                * ((count.sqrt() + percussion) * mean_length * mean_volume + params.note_bonus)
        })
        .collect();

    Pips {
        notes: pip_notes,
        base,
    }
}

/// Finds the most plausible beat sequence for `notes` (sorted by start).
pub fn detect_tactus(notes: &[TactusNote], params: &TactusParams) -> Result<TactusSolution> {
    if notes.is_empty() {
        return Err(Error::NoTactusCandidates);
    }
    let pips = build_pips(notes, params);

    let mut best: Option<(f64, usize, usize)> = None;
    let mut tmin = params.tactus_min_ms;
    let mut tmax = params.tactus_min_ms * params.tactus_width;
    while tmax <= params.tactus_max_ms {
        let (min, max) = (params.quantize(tmin).max(1), params.quantize(tmax));
        if min <= max {
            let table = ScoreTable::fill(&pips.base, min, max, params);
            if let Some((score, _, _)) = table.best_final(pips.base.len()) {
                debug!(min_pip = min, max_pip = max, score, "tactus range");
                if best.map_or(true, |(top, _, _)| score > top) {
                    best = Some((score, min, max));
                }
            }
        }
        tmin *= params.tactus_step;
        tmax *= params.tactus_step;
        if params.tactus_step <= 1.0 {
            break;
        }
    }

    let (_, min, max) = best.ok_or(Error::NoTactusCandidates)?;
    let table = ScoreTable::fill(&pips.base, min, max, params);
    let (score, pip, length) = table
        .best_final(pips.base.len())
        .ok_or(Error::NoTactusCandidates)?;

    let mut onsets_ms = vec![0.0];
    for beat in table.backtrack(pip, length) {
        if beat == 0 {
            continue;
        }
        let members = &pips.notes[beat];
        let onset = if members.is_empty() {
            (beat as i64 * params.pip_ms) as f64
        } else {
            members.iter().map(|&i| notes[i].start_ms as f64).sum::<f64>() / members.len() as f64
        };
        onsets_ms.push(onset);
    }

    debug!(
        beats = onsets_ms.len(),
        min_pip = min,
        max_pip = max,
        score,
        "tactus chosen"
    );

    Ok(TactusSolution {
        onsets_ms,
        score,
        min_pip: min,
        max_pip: max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regular(count: usize, spacing_ms: i64, length_ms: i64) -> Vec<TactusNote> {
        (0..count)
            .map(|i| TactusNote {
                start_ms: i as i64 * spacing_ms,
                length_ms,
                volume: 0.6,
                voice: (0, 0),
                pitch: 60,
                percussion: false,
            })
            .collect()
    }

    #[test]
    fn trend_tolerates_gradual_change() {
        assert_eq!(Trend::Steady.step(0, 35), (Trend::Steady, false));
        assert_eq!(Trend::Steady.step(35, 35), (Trend::Rising, false));
        assert_eq!(Trend::Steady.step(-35, 35), (Trend::Falling, false));
        assert_eq!(Trend::Rising.step(0, 35), (Trend::Rising, false));
        assert_eq!(Trend::Rising.step(-35, 35), (Trend::Steady, false));
        assert_eq!(Trend::Rising.step(35, 35), (Trend::Steady, true));
        assert_eq!(Trend::Falling.step(35, 35), (Trend::Steady, false));
        assert_eq!(Trend::Steady.step(70, 35), (Trend::Steady, true));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            detect_tactus(&[], &TactusParams::default()),
            Err(Error::NoTactusCandidates)
        ));
    }

    #[test]
    fn regular_onsets_give_regular_beats() {
        let notes = regular(16, 500, 250);
        let solution = detect_tactus(&notes, &TactusParams::default()).unwrap();

        assert_eq!(solution.onsets_ms.len(), 16);
        for length in solution.lengths_ms() {
            assert!((length - 500.0).abs() <= 35.0, "beat length {length}");
        }
    }

    #[test]
    fn slower_onsets_give_slower_beats() {
        let notes = regular(12, 700, 300);
        let solution = detect_tactus(&notes, &TactusParams::default()).unwrap();

        assert_eq!(solution.onsets_ms.len(), 12);
        for length in solution.lengths_ms() {
            assert!((length - 700.0).abs() <= 35.0, "beat length {length}");
        }
    }

    #[test]
    fn single_note_yields_single_onset() {
        let solution = detect_tactus(&regular(1, 500, 250), &TactusParams::default()).unwrap();
        assert_eq!(solution.onsets_ms, vec![0.0]);
    }

    #[test]
    fn backtrack_follows_predecessors() {
        let params = TactusParams::default();
        let base = vec![1.0; 60];
        let table = ScoreTable::fill(&base, 11, 20, &params);
        let (_, pip, length) = table.best_final(base.len()).unwrap();
        let beats = table.backtrack(pip, length);
        assert!(beats.windows(2).all(|w| w[1] - w[0] >= 11 && w[1] - w[0] <= 20));
        assert_eq!(*beats.last().unwrap(), pip);
    }
}
