//! Serializable summary of an analyzed timeline.

use serde::{Deserialize, Serialize};

use midi_timeline::math::standard_deviation;
use midi_timeline::{BeatLevel, KeySource, MetreSource, Scale, TimeDivision, Timeline, Tone};

use crate::key::KeyEstimate;
use crate::metre::interval::common_onset_interval;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyReport {
    /// Display name, e.g. "A minor".
    pub name: String,
    pub tone: Tone,
    pub scale: Scale,
    /// 0..24, majors first.
    pub index: usize,
    pub correlation: f64,
    pub source: KeySource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatReport {
    pub start: f64,
    pub length: f64,
    pub level: BeatLevel,
    /// Chord symbol, e.g. "F#m".
    pub chord: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureReport {
    /// Seconds.
    pub duration: f64,
    pub format: u8,
    pub ticks_per_beat: u32,
    pub smpte: bool,
    pub note_count: usize,
    pub max_volume: f64,
    pub key: Option<KeyReport>,
    pub metre_source: Option<MetreSource>,
    pub metre_fit: f64,
    pub beats: Vec<BeatReport>,
    /// Sample standard deviation of the beat lengths; `None` below two beats.
    pub beat_length_deviation: Option<f64>,
    /// Most common gap between note onsets, seconds.
    pub onset_interval: Option<f64>,
    /// General MIDI names of the instruments that play, in order of appearance.
    pub instruments: Vec<String>,
}

impl StructureReport {
    pub fn from_timeline(timeline: &Timeline, estimate: Option<KeyEstimate>) -> Self {
        let key = timeline.key.map(|key| KeyReport {
            name: key.to_string(),
            tone: key.tone,
            scale: key.scale,
            index: key.index(),
            correlation: estimate
                .filter(|e| e.key == key)
                .map_or(0.0, |e| e.correlation),
            source: timeline.key_source.unwrap_or(KeySource::Detected),
        });

        let beats: Vec<BeatReport> = timeline
            .beats()
            .into_iter()
            .filter_map(|event| {
                event.as_beat().map(|beat| BeatReport {
                    start: event.real_time,
                    length: beat.length,
                    level: beat.level,
                    chord: beat.chord.map(|chord| chord.chord_symbol()),
                })
            })
            .collect();

        let lengths: Vec<f64> = beats.iter().map(|b| b.length).collect();
        let beat_length_deviation = (lengths.len() > 1).then(|| standard_deviation(&lengths));

        let mut instruments: Vec<String> = Vec::new();
        let mut notes: Vec<_> = timeline.sounding_notes().collect();
        notes.sort_by(|a, b| a.1.real_time.total_cmp(&b.1.real_time));
        for (_, _, note) in notes {
            if let Some(instrument) = note.instrument {
                let name = instrument.name().to_string();
                if !instruments.contains(&name) {
                    instruments.push(name);
                }
            }
        }

        Self {
            duration: timeline.length,
            format: timeline.format,
            ticks_per_beat: timeline.division.ticks_per_beat(),
            smpte: matches!(timeline.division, TimeDivision::Frames { .. }),
            note_count: timeline.sounding_notes().count(),
            max_volume: timeline.max_volume,
            key,
            metre_source: timeline.metre_source,
            metre_fit: timeline.metre_fit,
            beats,
            beat_length_deviation,
            onset_interval: common_onset_interval(timeline),
            instruments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midi_timeline::{ControlEvent, Instrument, Key, MetaEvent};

    #[test]
    fn test_report_from_timeline() {
        let mut timeline = Timeline::new(1, TimeDivision::TicksPerBeat(480));
        let mut note = ControlEvent::note_on(0, 0, 60, 100);
        if let Some(n) = note.as_note_mut() {
            n.instrument = Some(Instrument::Program(0));
        }
        timeline.push_control(0, note.clone());
        timeline.push_control(0, note);
        let mut beat = MetaEvent::beat(0, 0.0, 0.5, BeatLevel::Strong);
        if let Some(b) = beat.as_beat_mut() {
            b.chord = Some(Key::new(Tone::A, Scale::Minor));
        }
        timeline.push_meta(0, beat);
        timeline.key = Some(Key::new(Tone::A, Scale::Minor));
        timeline.key_source = Some(KeySource::KeySignature);
        timeline.length = 2.0;

        let report = StructureReport::from_timeline(&timeline, None);
        assert_eq!(report.duration, 2.0);
        assert_eq!(report.ticks_per_beat, 480);
        assert_eq!(report.note_count, 2);
        assert_eq!(report.instruments, vec!["Acoustic Grand Piano".to_string()]);
        assert_eq!(report.beats[0].chord.as_deref(), Some("Am"));
        assert_eq!(report.beat_length_deviation, None);
        // volumes were never resolved, so no onset is audible
        assert_eq!(report.onset_interval, None);

        let key = report.key.unwrap();
        assert_eq!(key.name, "A minor");
        assert_eq!(key.index, 21);
        assert_eq!(key.source, KeySource::KeySignature);

        let json = serde_json::to_value(&StructureReport::from_timeline(&timeline, None)).unwrap();
        assert_eq!(json["key"]["tone"], "A");
        assert_eq!(json["beats"][0]["level"], "strong");
    }

    #[test]
    fn test_beat_length_deviation() {
        let mut timeline = Timeline::new(1, TimeDivision::TicksPerBeat(480));
        for (tick, start, length) in [(0, 0.0, 0.5), (480, 0.5, 0.5), (960, 1.0, 1.0), (1440, 2.0, 1.0)] {
            timeline.push_meta(0, MetaEvent::beat(tick, start, length, BeatLevel::Weak));
        }
        let report = StructureReport::from_timeline(&timeline, None);
        // lengths 0.5, 0.5, 1, 1: sample variance 1/12
        let deviation = report.beat_length_deviation.unwrap();
        assert!((deviation - (1.0f64 / 12.0).sqrt()).abs() < 1e-12);
    }
}
