//! Building a [`Timeline`] from a `midly` parse.

use midly::{Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::debug;

use crate::event::{
    ControlEvent, ControlKind, Controller, MetaEvent, MetaKind, NoteOff, NoteOn, PitchBend,
    TextKind, TimeSignature, DEFAULT_BEND_RANGE,
};
use crate::key::{Key, Scale};
use crate::timeline::{TimeDivision, Timeline};
use crate::{Error, Result};

impl Timeline {
    /// Parses standard MIDI file bytes.
    pub fn parse(bytes: &[u8]) -> Result<Timeline> {
        let smf = Smf::parse(bytes).map_err(|e| Error::MidiParse(e.to_string()))?;
        Ok(Self::from_smf(&smf))
    }

    /// Converts delta-timed track events to absolute ticks. Real times are
    /// left at zero until [`crate::simplify::time::compute_real_times`] runs.
    pub fn from_smf(smf: &Smf) -> Timeline {
        let division = match smf.header.timing {
            Timing::Metrical(ticks) => TimeDivision::TicksPerBeat(ticks.as_int()),
            Timing::Timecode(fps, ticks_per_frame) => TimeDivision::Frames {
                fps: match fps {
                    Fps::Fps24 => 24.0,
                    Fps::Fps25 => 25.0,
                    Fps::Fps29 => 29.97,
                    Fps::Fps30 => 30.0,
                },
                ticks_per_frame,
            },
        };

        let format = match smf.header.format {
            midly::Format::SingleTrack => 0,
            midly::Format::Parallel => 1,
            midly::Format::Sequential => 2,
        };

        let mut timeline = Timeline::new(format, division);

        for track in &smf.tracks {
            let index = timeline.add_track();
            let mut current_tick: u64 = 0;

            for event in track {
                current_tick += event.delta.as_int() as u64;

                match event.kind {
                    TrackEventKind::Midi { channel, message } => {
                        let kind = control_kind(message);
                        timeline.push_control(
                            index,
                            ControlEvent::new(current_tick, channel.as_int(), kind),
                        );
                    }
                    TrackEventKind::Meta(message) => {
                        if let Some(kind) = meta_kind(message) {
                            timeline.push_meta(index, MetaEvent::new(current_tick, kind));
                        }
                    }
                    TrackEventKind::SysEx(_) | TrackEventKind::Escape(_) => {}
                }
            }
        }

        debug!(
            format,
            tracks = timeline.tracks.len(),
            events = timeline.event_count(),
            "imported MIDI file"
        );
        timeline
    }
}

fn control_kind(message: MidiMessage) -> ControlKind {
    match message {
        MidiMessage::NoteOn { key, vel } => {
            ControlKind::NoteOn(NoteOn::new(key.as_int(), vel.as_int()))
        }
        MidiMessage::NoteOff { key, vel } => ControlKind::NoteOff(NoteOff {
            pitch: key.as_int(),
            velocity: vel.as_int(),
        }),
        MidiMessage::Controller { controller, value } => ControlKind::Controller(Controller {
            number: controller.as_int(),
            value: value.as_int(),
        }),
        MidiMessage::PitchBend { bend } => ControlKind::PitchBend(PitchBend {
            value: bend.0.as_int(),
            range: DEFAULT_BEND_RANGE,
        }),
        MidiMessage::ProgramChange { program } => ControlKind::ProgramChange {
            program: program.as_int(),
        },
        MidiMessage::ChannelAftertouch { vel } => ControlKind::ChannelAftertouch {
            value: vel.as_int(),
        },
        MidiMessage::Aftertouch { key, vel } => ControlKind::NoteAftertouch {
            pitch: key.as_int(),
            value: vel.as_int(),
        },
    }
}

fn meta_kind(message: MetaMessage) -> Option<MetaKind> {
    let text = |kind: TextKind, bytes: &[u8]| MetaKind::Text {
        kind,
        text: String::from_utf8_lossy(bytes).into_owned(),
    };

    let kind = match message {
        MetaMessage::Tempo(tempo) => MetaKind::Tempo {
            micros_per_quarter: tempo.as_int(),
        },
        MetaMessage::TimeSignature(numerator, denom_pow, clocks_per_click, thirty_seconds) => {
            MetaKind::TimeSignature(TimeSignature {
                numerator,
                denominator: 1u8.checked_shl(denom_pow as u32).unwrap_or(128),
                clocks_per_click,
                thirty_seconds_per_quarter: thirty_seconds,
            })
        }
        MetaMessage::KeySignature(sharps, minor) => {
            let scale = if minor { Scale::Minor } else { Scale::Major };
            MetaKind::KeySignature(Key::from_signature(sharps, scale))
        }
        MetaMessage::EndOfTrack => MetaKind::EndOfTrack,
        MetaMessage::Text(bytes) => text(TextKind::Text, bytes),
        MetaMessage::Copyright(bytes) => text(TextKind::Copyright, bytes),
        MetaMessage::TrackName(bytes) => text(TextKind::TrackName, bytes),
        MetaMessage::InstrumentName(bytes) => text(TextKind::InstrumentName, bytes),
        MetaMessage::Lyric(bytes) => text(TextKind::Lyric, bytes),
        MetaMessage::Marker(bytes) => text(TextKind::Marker, bytes),
        MetaMessage::CuePoint(bytes) => text(TextKind::CuePoint, bytes),
        _ => return None,
    };
    Some(kind)
}
