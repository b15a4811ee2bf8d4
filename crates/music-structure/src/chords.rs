//! One chord per beat.
//!
//! Every beat is scored against the 24 major and minor triads from three
//! pools of notes: the beat itself, the span since the last medium-or-strong
//! beat and the span since the last strong beat. A Viterbi pass then trades
//! those scores against the cost of changing chords.

use std::collections::HashSet;

use tracing::{debug, info};

use midi_timeline::math::max_with_index;
use midi_timeline::{BeatLevel, Key, KeySource, Timeline, KEY_COUNT};

use crate::chord_tables::{
    fifths_penalty, interval_score, tones_in_scale, transition_penalty, BASE_NOTE_SUM,
    BEAT_POOL_WEIGHT, IN_SCALE_MULTIPLE, KEY_DISTANCE_MULTIPLE, MEDIUM_POOL_WEIGHT,
    ONSET_MULTIPLE, ONSET_WINDOW, PREVIOUS_CHORD_MULTIPLE, STRONG_POOL_WEIGHT, WEAK_BEAT_FACTOR,
};
use crate::{Error, Result};

/// Best chord path through per-beat scores.
///
/// `transition(i, chord, previous)` is added when beat `i` holds `chord` after
/// `previous`. Ties go to the lower chord index. Returns the chord index per
/// beat and the path score.
pub fn decode_chords<F>(base: &[[f64; KEY_COUNT]], transition: F) -> (Vec<usize>, f64)
where
    F: Fn(usize, usize, usize) -> f64,
{
    let Some(first) = base.first() else {
        return (Vec::new(), 0.0);
    };

    let mut scores = *first;
    let mut back: Vec<[usize; KEY_COUNT]> = Vec::with_capacity(base.len());
    back.push([0; KEY_COUNT]);

    for (i, row) in base.iter().enumerate().skip(1) {
        let mut next = [f64::NEG_INFINITY; KEY_COUNT];
        let mut from = [0; KEY_COUNT];
        for chord in 0..KEY_COUNT {
            for previous in 0..KEY_COUNT {
                let score = scores[previous] + row[chord] + transition(i, chord, previous);
                if score > next[chord] {
                    next[chord] = score;
                    from[chord] = previous;
                }
            }
        }
        scores = next;
        back.push(from);
    }

    let (mut chord, best) = max_with_index(&scores).unwrap_or((0, f64::NEG_INFINITY));

    let mut path = vec![0; base.len()];
    for i in (0..base.len()).rev() {
        path[i] = chord;
        chord = back[i][chord];
    }
    (path, best)
}

#[derive(Debug, Clone, Copy)]
struct PoolNote {
    start: f64,
    end: f64,
    pitch: u8,
    volume: f64,
}

/// Notes gathered over a time span.
#[derive(Debug, Clone)]
struct Pool {
    start: f64,
    length: f64,
    /// Indices into the decoder's note list, in insertion order.
    notes: Vec<usize>,
    members: HashSet<usize>,
    onset_bonus: bool,
}

impl Pool {
    fn new(start: f64, length: f64, onset_bonus: bool) -> Self {
        Self {
            start,
            length,
            notes: Vec::new(),
            members: HashSet::new(),
            onset_bonus,
        }
    }

    fn add(&mut self, note: usize) {
        if self.members.insert(note) {
            self.notes.push(note);
        }
    }

    fn join(&mut self, start: f64, length: f64, notes: &[usize]) {
        self.start = self.start.min(start);
        self.length += length;
        for &note in notes {
            self.add(note);
        }
    }

    fn weight(&self, note: &PoolNote, lowest: u8) -> f64 {
        if self.length <= 0.0 {
            return 0.0;
        }
        let overlap = (self.start + self.length).min(note.end) - note.start.max(self.start);
        let octave = (note.pitch.saturating_sub(lowest) / 12) as f64 + 1.0;
        note.volume * (overlap / self.length) / octave
    }

    fn score(&self, notes: &[PoolNote], lowest: u8) -> PoolScore {
        let weighted: Vec<(&PoolNote, f64)> = self
            .notes
            .iter()
            .map(|&i| (&notes[i], self.weight(&notes[i], lowest)))
            .collect();

        let mut chords = [0.0; KEY_COUNT];
        for (chord, score) in Key::all().zip(chords.iter_mut()) {
            *score = weighted
                .iter()
                .map(|(note, weight)| {
                    let mut fit = interval_score(chord, note.pitch);
                    if self.onset_bonus && (note.start - self.start).abs() < ONSET_WINDOW {
                        fit *= ONSET_MULTIPLE;
                    }
                    fit * weight
                })
                .sum();
        }

        PoolScore {
            total: BASE_NOTE_SUM + weighted.iter().map(|(_, w)| w).sum::<f64>(),
            chords,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PoolScore {
    total: f64,
    chords: [f64; KEY_COUNT],
}

struct Segment {
    key: Key,
    level: BeatLevel,
    beat: usize,
    medium: usize,
    strong: usize,
}

/// Key in force at each beat: declared signatures when the key came from
/// the file, the detected key otherwise.
fn active_keys(timeline: &Timeline, starts: &[f64]) -> Result<Vec<Key>> {
    let signatures = timeline.key_signatures();
    if timeline.key_source == Some(KeySource::KeySignature) {
        if let Some(&(_, first)) = signatures.first() {
            return Ok(starts
                .iter()
                .map(|&start| {
                    signatures
                        .iter()
                        .take_while(|(time, _)| *time <= start)
                        .last()
                        .map_or(first, |(_, key)| *key)
                })
                .collect());
        }
    }
    let key = timeline.key.ok_or(Error::NoKey)?;
    Ok(vec![key; starts.len()])
}

/// Scores every beat against all chords and writes the best path into the
/// beat events. Needs beats, note ends, volumes and a key.
pub fn analyze_chords(timeline: &mut Timeline) -> Result<Vec<Key>> {
    let beats: Vec<(f64, f64, BeatLevel)> = timeline
        .beats()
        .into_iter()
        .filter_map(|event| {
            event
                .as_beat()
                .map(|beat| (event.real_time, beat.length, beat.level))
        })
        .collect();
    if beats.is_empty() {
        return Err(Error::NoBeatGrid);
    }

    let notes: Vec<PoolNote> = timeline
        .pitched_notes_by_time()
        .into_iter()
        .map(|(_, event, note)| PoolNote {
            start: event.real_time,
            end: note.end.unwrap_or(event.real_time),
            pitch: note.pitch,
            volume: note.volume,
        })
        .collect();
    let lowest = notes
        .iter()
        .map(|n| n.pitch)
        .min()
        .ok_or(Error::NoPitchedNotes)?;

    let starts: Vec<f64> = beats.iter().map(|b| b.0).collect();
    let keys = active_keys(timeline, &starts)?;

    let mut pools: Vec<Pool> = beats
        .iter()
        .map(|&(start, length, _)| Pool::new(start, length, true))
        .collect();

    let mut current = 0;
    for (index, note) in notes.iter().enumerate() {
        while current < beats.len() && beats[current].0 + beats[current].1 <= note.start {
            current += 1;
        }
        if current == beats.len() {
            break;
        }
        let mut span = current;
        while span < beats.len() && beats[span].0 < note.end {
            pools[span].add(index);
            span += 1;
        }
    }

    let mut medium = pools.len();
    pools.push(Pool::new(0.0, 0.0, true));
    let mut strong = pools.len();
    pools.push(Pool::new(0.0, 0.0, false));

    let mut segments = Vec::with_capacity(beats.len());
    for (i, &(start, length, level)) in beats.iter().enumerate() {
        if level <= BeatLevel::Medium {
            medium = pools.len();
            pools.push(Pool::new(start, 0.0, true));
        }
        if level == BeatLevel::Strong {
            strong = pools.len();
            pools.push(Pool::new(start, 0.0, false));
        }
        let beat_notes = pools[i].notes.clone();
        pools[medium].join(start, length, &beat_notes);
        pools[strong].join(start, length, &beat_notes);

        segments.push(Segment {
            key: keys[i],
            level,
            beat: i,
            medium,
            strong,
        });
    }

    let scores: Vec<PoolScore> = pools.iter().map(|pool| pool.score(&notes, lowest)).collect();

    let mut note_sums = Vec::with_capacity(segments.len());
    let base: Vec<[f64; KEY_COUNT]> = segments
        .iter()
        .map(|segment| {
            let (beat, medium, strong) = (
                &scores[segment.beat],
                &scores[segment.medium],
                &scores[segment.strong],
            );
            let note_sum = BEAT_POOL_WEIGHT * beat.total
                + MEDIUM_POOL_WEIGHT * medium.total
                + STRONG_POOL_WEIGHT * strong.total;
            note_sums.push(note_sum);

            let mut row = [0.0; KEY_COUNT];
            for (chord, (index, score)) in Key::all().zip(row.iter_mut().enumerate()) {
                let in_scale = tones_in_scale(chord, segment.key);
                *score = STRONG_POOL_WEIGHT * strong.chords[index]
                    + MEDIUM_POOL_WEIGHT * medium.chords[index]
                    + BEAT_POOL_WEIGHT * beat.chords[index]
                    - KEY_DISTANCE_MULTIPLE * fifths_penalty(chord, segment.key) * note_sum
                    - IN_SCALE_MULTIPLE * 2f64.powi(3 - in_scale) * note_sum;
            }
            row
        })
        .collect();

    let chords: Vec<Key> = Key::all().collect();
    let (path, score) = decode_chords(&base, |i, chord, previous| {
        let level = segments[i].level.rank() as f64;
        -PREVIOUS_CHORD_MULTIPLE
            * transition_penalty(chords[chord], chords[previous])
            * note_sums[i]
            * (1.0 + WEAK_BEAT_FACTOR * level * level)
    });
    debug!(beats = path.len(), score, "decoded chord path");

    let assigned: Vec<Key> = path.iter().map(|&index| chords[index]).collect();
    for (event, chord) in timeline.beats_mut().into_iter().zip(&assigned) {
        if let Some(beat) = event.as_beat_mut() {
            beat.chord = Some(*chord);
        }
    }

    info!(beats = assigned.len(), "assigned chords");
    Ok(assigned)
}
