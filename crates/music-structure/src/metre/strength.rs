//! Hierarchical beat strength from grouping intervals.

use tracing::debug;

use midi_timeline::math::max_with_index;
use midi_timeline::{BeatLevel, Timeline};

/// Grouping intervals in beats and the bonus each earns per grouped beat.
const INTERVALS: [usize; 6] = [2, 3, 4, 5, 6, 7];
const INTERVAL_BONUS: [f64; 6] = [1.7, 3.0, 4.0, 4.7, 5.9, 6.0];

const SALIENCE_FLOOR: f64 = 0.1;
/// Sign applied to the bonus when the group length changes.
const CHANGE_MULTIPLE: f64 = -1.0;
/// How many trailing beats may end the best grouping.
const FINAL_WINDOW: usize = 7;
/// Notes this early still belong to the next beat, seconds.
const ONSET_TOLERANCE: f64 = 0.05;

/// Offsets before a group end that are weak for each interval.
fn weak_offsets(interval: usize) -> &'static [usize] {
    match interval {
        3 => &[1, 2],
        4 => &[1, 3],
        6 => &[1, 2, 4, 5],
        _ => &[],
    }
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    score: f64,
    /// Interval slot of the previous group, `None` for a start state.
    previous: Option<usize>,
}

/// Assigns a level to each beat from its salience: group boundaries are
/// strong, interior positions fixed by the group length are weak, the rest
/// medium. Returns the levels and the best path score.
pub fn classify_strengths(saliences: &[f64]) -> (Vec<BeatLevel>, f64) {
    let n = saliences.len();
    let mut table: Vec<[Cell; INTERVALS.len()]> = Vec::with_capacity(n);

    for (i, &base) in saliences.iter().enumerate() {
        let mut row = [Cell {
            score: base,
            previous: None,
        }; INTERVALS.len()];
        for (k, &interval) in INTERVALS.iter().enumerate() {
            if interval > i {
                continue;
            }
            let before = &table[i - interval];
            let mut best = Cell {
                score: f64::NEG_INFINITY,
                previous: None,
            };
            for (j, cell) in before.iter().enumerate() {
                let sign = if j == k { 1.0 } else { CHANGE_MULTIPLE };
                let score = cell.score + (base + SALIENCE_FLOOR) * INTERVAL_BONUS[k] * sign;
                if score > best.score {
                    best = Cell {
                        score,
                        previous: Some(j),
                    };
                }
            }
            row[k] = best;
        }
        table.push(row);
    }

    // only grouped states can end the path
    let finals: Vec<(usize, usize)> = (n.saturating_sub(FINAL_WINDOW)..n)
        .flat_map(|i| (0..INTERVALS.len()).map(move |k| (i, k)))
        .filter(|&(i, k)| table[i][k].previous.is_some())
        .collect();
    let scores: Vec<f64> = finals.iter().map(|&(i, k)| table[i][k].score).collect();
    let best = max_with_index(&scores).map(|(at, score)| (score, finals[at].0, finals[at].1));

    let mut levels = vec![BeatLevel::Medium; n];
    let Some((score, mut i, mut k)) = best else {
        if let Some(first) = levels.first_mut() {
            *first = BeatLevel::Strong;
        }
        return (levels, 0.0);
    };

    loop {
        levels[i] = BeatLevel::Strong;
        let Some(previous) = table[i][k].previous else {
            break;
        };
        let interval = INTERVALS[k];
        for &offset in weak_offsets(interval) {
            levels[i - offset] = BeatLevel::Weak;
        }
        i -= interval;
        k = previous;
    }

    (levels, score)
}

/// Note salience (volume × real length) gathered per beat of the timeline.
pub fn beat_saliences(timeline: &Timeline) -> Vec<f64> {
    let beats: Vec<(f64, f64)> = timeline
        .beats()
        .into_iter()
        .filter_map(|event| event.as_beat().map(|beat| (event.real_time, beat.length)))
        .collect();
    let mut saliences = vec![0.0; beats.len()];
    if beats.is_empty() {
        return saliences;
    }

    let mut notes: Vec<_> = timeline.sounding_notes().collect();
    notes.sort_by(|a, b| a.1.real_time.total_cmp(&b.1.real_time));

    let mut current = 0;
    for (_, event, note) in notes {
        let time = event.real_time;
        while current + 1 < beats.len() && beats[current].0 + beats[current].1 <= time + ONSET_TOLERANCE
        {
            current += 1;
        }
        if (beats[current].0 - time).abs() <= ONSET_TOLERANCE {
            saliences[current] += note.volume * event.real_length();
        }
    }
    saliences
}

/// Classifies the timeline's beats in place. Returns the path score.
pub fn assign_beat_strengths(timeline: &mut Timeline) -> f64 {
    let saliences = beat_saliences(timeline);
    let (levels, score) = classify_strengths(&saliences);

    for (event, level) in timeline.beats_mut().into_iter().zip(&levels) {
        if let Some(beat) = event.as_beat_mut() {
            beat.level = *level;
        }
    }

    debug!(beats = levels.len(), score, "classified beat strengths");
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use BeatLevel::{Medium as M, Strong as S, Weak as W};

    #[test]
    fn four_beat_accents_group_in_fours() {
        let saliences: Vec<f64> = (0..16)
            .map(|i| if i % 4 == 0 { 4.0 } else { 0.5 })
            .collect();
        let (levels, score) = classify_strengths(&saliences);

        assert!(score > 0.0);
        assert_eq!(
            levels,
            vec![S, W, M, W, S, W, M, W, S, W, M, W, S, M, M, M]
        );
    }

    #[test]
    fn three_beat_accents_group_in_threes() {
        let saliences: Vec<f64> = (0..12)
            .map(|i| if i % 3 == 0 { 4.0 } else { 0.5 })
            .collect();
        let (levels, _) = classify_strengths(&saliences);

        // the trailing pair falls after the last group boundary
        assert_eq!(levels, vec![S, W, W, S, W, W, S, W, W, S, M, M]);
    }

    #[test]
    fn too_few_beats_fall_back_to_leading_strong() {
        assert_eq!(classify_strengths(&[1.0]), (vec![S], 0.0));
        assert_eq!(classify_strengths(&[]), (vec![], 0.0));
    }

    #[test]
    fn weak_offsets_per_interval() {
        assert_eq!(weak_offsets(3), &[1, 2]);
        assert_eq!(weak_offsets(4), &[1, 3]);
        assert_eq!(weak_offsets(6), &[1, 2, 4, 5]);
        assert!(weak_offsets(5).is_empty());
    }
}
