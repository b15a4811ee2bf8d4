//! The full analysis pipeline over one timeline.

use std::sync::Arc;

use tracing::{info, warn};

use midi_timeline::simplify::{
    apply_sustain, assign_instruments, attach_bends, compute_note_lengths, compute_real_times,
    discretize_bends, resolve_bend_ranges, resolve_volumes, transpose_to,
};
use midi_timeline::{KeySource, Timeline};

use crate::chords::analyze_chords;
use crate::config::{AnalysisConfig, KeyStrategy};
use crate::key::{key_from_signatures, KeyEstimate, KeyFinder, ProfileKeyFinder, Weighting, WindowedKeyFinder};
use crate::metre::compute_metre;
use crate::types::StructureReport;
use crate::{Error, Result};

/// Runs every analysis stage in order. Cheap to share across threads;
/// each call works on its own timeline.
pub struct StructureEngine {
    config: AnalysisConfig,
    key_finder: Arc<dyn KeyFinder>,
}

fn finder_for(strategy: KeyStrategy) -> Arc<dyn KeyFinder> {
    match strategy {
        KeyStrategy::Profile => Arc::new(ProfileKeyFinder::new(Weighting::Occurrence)),
        KeyStrategy::Loudness => Arc::new(ProfileKeyFinder::new(Weighting::Loudness)),
        KeyStrategy::Windowed => Arc::new(WindowedKeyFinder::default()),
    }
}

impl Default for StructureEngine {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}

impl StructureEngine {
    /// Create with the key strategy named in the config.
    pub fn new(config: AnalysisConfig) -> Self {
        let key_finder = finder_for(config.key.strategy);
        Self { config, key_finder }
    }

    /// Replace the key strategy (e.g. a [`crate::ClassifierKeyFinder`]).
    pub fn with_key_finder(mut self, key_finder: Arc<dyn KeyFinder>) -> Self {
        self.key_finder = key_finder;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Parse a standard MIDI file and analyze it.
    pub fn analyze_bytes(&self, bytes: &[u8]) -> Result<(Timeline, StructureReport)> {
        let mut timeline = Timeline::parse(bytes)?;
        let report = self.run(&mut timeline)?;
        Ok((timeline, report))
    }

    /// Enrich `timeline` in place and summarize it. Running twice gives the
    /// same result.
    pub fn run(&self, timeline: &mut Timeline) -> Result<StructureReport> {
        let stages = &self.config.stages;

        compute_real_times(timeline);
        compute_note_lengths(timeline);
        resolve_volumes(timeline);
        info!(
            length = timeline.length,
            events = timeline.event_count(),
            max_volume = timeline.max_volume,
            "timed events"
        );

        if stages.sustain {
            apply_sustain(timeline);
        }
        if stages.pitch_bends {
            resolve_bend_ranges(timeline);
            attach_bends(timeline);
        }
        if stages.instruments {
            assign_instruments(timeline);
        }

        if let Some(outcome) = compute_metre(timeline, &self.config.metre)? {
            info!(source = ?outcome.source, beats = outcome.beats, fit = outcome.fit, "metre");
        }

        let estimate = self.find_key(timeline)?;

        if stages.chords && !timeline.beats().is_empty() {
            match analyze_chords(timeline) {
                Ok(chords) => info!(beats = chords.len(), "chords"),
                Err(Error::NoPitchedNotes) => warn!("no pitched notes, skipping chords"),
                Err(e) => return Err(e),
            }
        }

        if let Some(target) = self.config.transpose_to {
            if let Some(shift) = transpose_to(timeline, target) {
                info!(shift, target = ?target, "transposed");
            }
        }

        if stages.pitch_bends && stages.discretize_bends {
            discretize_bends(timeline);
        }

        Ok(StructureReport::from_timeline(timeline, Some(estimate)))
    }

    /// Sets the timeline's key, preferring a declared signature when the
    /// config trusts them. Returns the detector's own estimate.
    fn find_key(&self, timeline: &mut Timeline) -> Result<KeyEstimate> {
        let estimate = self.key_finder.find_key(timeline)?;

        let declared = if self.config.key.trust_key_signatures {
            key_from_signatures(timeline)
        } else {
            None
        };

        match declared {
            Some(key) => {
                info!(
                    key = %key,
                    detected = %estimate.key,
                    agreement = ?estimate.matches(key),
                    "key from signature"
                );
                timeline.key = Some(key);
                timeline.key_source = Some(KeySource::KeySignature);
            }
            None => {
                info!(key = %estimate.key, correlation = estimate.correlation, "detected key");
                timeline.key = Some(estimate.key);
                timeline.key_source = Some(KeySource::Detected);
            }
        }
        Ok(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyClassifier;
    use midi_timeline::{ControlEvent, Key, MetaEvent, Scale, TimeDivision, Tone};

    fn scale_timeline() -> Timeline {
        let mut timeline = Timeline::new(1, TimeDivision::TicksPerBeat(480));
        for (i, pitch) in [60u8, 62, 64, 65, 67, 69, 71, 72].into_iter().enumerate() {
            let tick = i as u64 * 480;
            timeline.push_control(0, ControlEvent::note_on(tick, 0, pitch, 100));
            timeline.push_control(0, ControlEvent::note_off(tick + 480, 0, pitch));
        }
        timeline.push_meta(0, MetaEvent::end_of_track(3840));
        timeline
    }

    struct AlwaysGMajor;

    impl KeyClassifier for AlwaysGMajor {
        fn classify(&self, _: &[f64; 12]) -> usize {
            7
        }
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StructureEngine>();
    }

    #[test]
    fn test_detected_key_and_grid() {
        let mut timeline = scale_timeline();
        let report = StructureEngine::default().run(&mut timeline).unwrap();

        let key = report.key.unwrap();
        assert_eq!((key.tone, key.scale), (Tone::C, Scale::Major));
        assert_eq!(key.source, KeySource::Detected);
        assert_eq!(report.beats.len(), 9);
        assert!(report.beats.iter().all(|b| b.chord.is_some()));
    }

    #[test]
    fn test_declared_signature_wins_when_trusted() {
        let mut timeline = scale_timeline();
        timeline.push_meta(0, MetaEvent::key_signature(0, Key::new(Tone::A, Scale::Minor)));
        let report = StructureEngine::default().run(&mut timeline).unwrap();
        assert_eq!(timeline.key, Some(Key::new(Tone::A, Scale::Minor)));
        assert_eq!(report.key.unwrap().source, KeySource::KeySignature);

        let mut config = AnalysisConfig::default();
        config.key.trust_key_signatures = false;
        let mut timeline = scale_timeline();
        timeline.push_meta(0, MetaEvent::key_signature(0, Key::new(Tone::A, Scale::Minor)));
        StructureEngine::new(config).run(&mut timeline).unwrap();
        assert_eq!(timeline.key_source, Some(KeySource::Detected));
    }

    #[test]
    fn test_custom_key_finder() {
        let engine = StructureEngine::default()
            .with_key_finder(Arc::new(crate::ClassifierKeyFinder::new(AlwaysGMajor)));
        let mut timeline = scale_timeline();
        engine.run(&mut timeline).unwrap();
        assert_eq!(timeline.key, Some(Key::new(Tone::G, Scale::Major)));
    }

    #[test]
    fn test_transpose_and_stage_toggles() {
        let mut config = AnalysisConfig::default();
        config.transpose_to = Some(Tone::D);
        config.stages.chords = false;
        let mut timeline = scale_timeline();
        let report = StructureEngine::new(config).run(&mut timeline).unwrap();

        assert_eq!(timeline.key, Some(Key::new(Tone::D, Scale::Major)));
        assert!(report.beats.iter().all(|b| b.chord.is_none()));
        let first = timeline.tracks[0].channel(0).events[0].as_note().unwrap().pitch;
        assert_eq!(first, 62);
    }

    #[test]
    fn test_silent_timeline() {
        let mut timeline = Timeline::new(1, TimeDivision::TicksPerBeat(480));
        timeline.push_meta(0, MetaEvent::end_of_track(1920));
        let report = StructureEngine::default().run(&mut timeline).unwrap();

        let key = report.key.unwrap();
        assert_eq!((key.tone, key.scale), (Tone::C, Scale::Major));
        assert_eq!(key.correlation, 0.0);
        assert!(report.beats.is_empty());
        assert_eq!(report.metre_source, None);
    }
}
