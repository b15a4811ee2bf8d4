use tracing::debug;

use crate::event::{ControlKind, Instrument};
use crate::lookup::TimedIndex;
use crate::timeline::Timeline;

/// Program changes keyed by `(track, channel)`.
pub fn collect_programs(timeline: &Timeline) -> TimedIndex<(usize, u8), u8> {
    timeline
        .control_events()
        .filter_map(|(id, event)| match event.kind {
            ControlKind::ProgramChange { program } => {
                Some(((id.track, id.channel), event.real_time, program))
            }
            _ => None,
        })
        .collect()
}

/// Sets `instrument` on every Note-On: the drum kit on the percussion
/// channel, else the latest program at or before the note, else program 0.
pub fn assign_instruments(timeline: &mut Timeline) {
    let programs = collect_programs(timeline);

    let assigned: Vec<_> = timeline
        .notes()
        .map(|(id, event, _)| {
            let instrument = if event.is_percussion() {
                Instrument::Percussion
            } else {
                let program = programs
                    .latest_at(&(id.track, id.channel), event.real_time)
                    .copied()
                    .unwrap_or(0);
                Instrument::Program(program)
            };
            (id, instrument)
        })
        .collect();

    for (id, instrument) in &assigned {
        if let Some(note) = timeline.note_mut(*id) {
            note.instrument = Some(*instrument);
        }
    }

    debug!(notes = assigned.len(), programs = programs.len(), "assigned instruments");
}
