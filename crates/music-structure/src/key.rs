//! Key detection from pitch-class histograms.
//!
//! A histogram of the performance is correlated against reference major and
//! minor profiles at all twelve rotations. How the histogram is built is a
//! strategy ([`KeyFinder`]); a [`KeyClassifier`] can replace the correlation
//! step entirely.

use serde::{Deserialize, Serialize};
use tracing::debug;

use midi_timeline::math::{correlation, max_with_index};
use midi_timeline::{Key, KeyMatch, Scale, Timeline, Tone, KEY_COUNT};

use crate::{Error, Result};

/// Reference pitch-class distribution of C major.
pub const MAJOR_PROFILE: [f64; 12] = [
    0.08874125044,
    0.007118282121,
    0.05789536125,
    0.009728318899,
    0.07948748369,
    0.05457349626,
    0.01138925139,
    0.08482619528,
    0.01233835568,
    0.04342152094,
    0.006762368015,
    0.04745521414,
];

/// Reference pitch-class distribution of C minor.
pub const MINOR_PROFILE: [f64; 12] = [
    0.08447028117,
    0.00996559497,
    0.05623442876,
    0.07331830585,
    0.005813263732,
    0.05457349626,
    0.01245699371,
    0.08862261241,
    0.04792976628,
    0.007948748369,
    0.0157788587,
    0.03915055167,
];

/// Default window for [`WindowedKeyFinder`], seconds.
pub const DEFAULT_WINDOW: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeyEstimate {
    pub key: Key,
    /// Correlation with the winning profile; 1.0 for classifier results.
    pub correlation: f64,
}

impl KeyEstimate {
    /// Result for a performance without pitched notes.
    pub fn neutral() -> Self {
        Self {
            key: Key::new(Tone::C, Scale::Major),
            correlation: 0.0,
        }
    }

    pub fn matches(&self, expected: Key) -> KeyMatch {
        self.key.compare(expected)
    }
}

/// Strategy for finding the key of a prepared timeline.
pub trait KeyFinder: Send + Sync {
    fn find_key(&self, timeline: &Timeline) -> Result<KeyEstimate>;
}

/// Opaque model mapping a normalized histogram to a key index 0..24
/// (majors on C..B, then minors).
pub trait KeyClassifier: Send + Sync {
    fn classify(&self, histogram: &[f64; 12]) -> usize;
}

/// Tonic index and correlation of the rotation that best fits `profile`.
fn best_rotation(histogram: &[f64; 12], profile: &[f64; 12]) -> Result<(usize, f64)> {
    let scores = (0..12)
        .map(|r| {
            let rotated: Vec<f64> = (0..12).map(|k| histogram[(k + r) % 12]).collect();
            correlation(&rotated, profile)
        })
        .collect::<midi_timeline::Result<Vec<f64>>>()?;
    Ok(max_with_index(&scores).unwrap_or((0, 0.0)))
}

/// Best key for a histogram. An all-zero histogram gives the neutral estimate.
/// Ties go to the first key in index order, so a major beats an equally
/// correlated minor.
pub fn estimate_key(histogram: &[f64; 12]) -> Result<KeyEstimate> {
    if histogram.iter().all(|&v| v == 0.0) {
        return Ok(KeyEstimate::neutral());
    }

    let major = best_rotation(histogram, &MAJOR_PROFILE)?;
    let minor = best_rotation(histogram, &MINOR_PROFILE)?;
    let (scale, (tonic, correlation)) = if minor.1 > major.1 {
        (Scale::Minor, minor)
    } else {
        (Scale::Major, major)
    };
    Ok(KeyEstimate {
        key: Key::new(Tone::ALL[tonic], scale),
        correlation,
    })
}

fn normalize(histogram: &mut [f64; 12]) {
    let sum: f64 = histogram.iter().sum();
    if sum > 0.0 {
        histogram.iter_mut().for_each(|v| *v /= sum);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Every note counts once.
    #[default]
    Occurrence,
    /// Every note counts with its resolved volume.
    Loudness,
}

/// Whole-piece histogram of audible non-percussion notes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileKeyFinder {
    pub weighting: Weighting,
}

impl ProfileKeyFinder {
    pub fn new(weighting: Weighting) -> Self {
        Self { weighting }
    }

    pub fn histogram(&self, timeline: &Timeline) -> [f64; 12] {
        let mut histogram = [0.0; 12];
        for (_, event, note) in timeline.sounding_notes() {
            if event.is_percussion() || note.volume <= 0.0 {
                continue;
            }
            histogram[(note.pitch % 12) as usize] += match self.weighting {
                Weighting::Occurrence => 1.0,
                Weighting::Loudness => note.volume,
            };
        }
        normalize(&mut histogram);
        histogram
    }
}

impl KeyFinder for ProfileKeyFinder {
    fn find_key(&self, timeline: &Timeline) -> Result<KeyEstimate> {
        let estimate = estimate_key(&self.histogram(timeline))?;
        debug!(key = %estimate.key, correlation = estimate.correlation, weighting = ?self.weighting, "profile key");
        Ok(estimate)
    }
}

/// Counts each audible pitch class at most once per fixed-length time
/// window, so long repeated figures do not dominate.
#[derive(Debug, Clone, Copy)]
pub struct WindowedKeyFinder {
    pub window_seconds: f64,
}

impl Default for WindowedKeyFinder {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW,
        }
    }
}

impl WindowedKeyFinder {
    pub fn histogram(&self, timeline: &Timeline) -> [f64; 12] {
        let mut histogram = [0.0; 12];
        let mut seen = [false; 12];
        let mut window: Option<i64> = None;
        let span = self.window_seconds.max(f64::EPSILON);

        let flush = |histogram: &mut [f64; 12], seen: &mut [bool; 12]| {
            for (count, hit) in histogram.iter_mut().zip(seen.iter_mut()) {
                if *hit {
                    *count += 1.0;
                    *hit = false;
                }
            }
        };

        for (_, event, note) in timeline.pitched_notes_by_time() {
            if note.volume <= 0.0 {
                continue;
            }
            let index = (event.real_time / span).floor() as i64;
            if window.is_some_and(|current| current != index) {
                flush(&mut histogram, &mut seen);
            }
            window = Some(index);
            seen[(note.pitch % 12) as usize] = true;
        }
        flush(&mut histogram, &mut seen);

        normalize(&mut histogram);
        histogram
    }
}

impl KeyFinder for WindowedKeyFinder {
    fn find_key(&self, timeline: &Timeline) -> Result<KeyEstimate> {
        let estimate = estimate_key(&self.histogram(timeline))?;
        debug!(key = %estimate.key, correlation = estimate.correlation, "windowed key");
        Ok(estimate)
    }
}

/// Hands the windowed histogram to an external classifier.
pub struct ClassifierKeyFinder<C> {
    classifier: C,
    windows: WindowedKeyFinder,
}

impl<C: KeyClassifier> ClassifierKeyFinder<C> {
    pub fn new(classifier: C) -> Self {
        Self {
            classifier,
            windows: WindowedKeyFinder::default(),
        }
    }
}

impl<C: KeyClassifier> KeyFinder for ClassifierKeyFinder<C> {
    fn find_key(&self, timeline: &Timeline) -> Result<KeyEstimate> {
        let histogram = self.windows.histogram(timeline);
        if histogram.iter().all(|&v| v == 0.0) {
            return Ok(KeyEstimate::neutral());
        }
        let index = self.classifier.classify(&histogram);
        if index >= KEY_COUNT {
            return Err(Error::InvalidKeyIndex(index));
        }
        Ok(KeyEstimate {
            key: Key::from_index(index)?,
            correlation: 1.0,
        })
    }
}

/// First declared key signature other than C major, the usual placeholder
/// of files that declare nothing.
pub fn key_from_signatures(timeline: &Timeline) -> Option<Key> {
    let placeholder = Key::new(Tone::C, Scale::Major);
    timeline
        .key_signatures()
        .into_iter()
        .map(|(_, key)| key)
        .find(|key| *key != placeholder)
}
