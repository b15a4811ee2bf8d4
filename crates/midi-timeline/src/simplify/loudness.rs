//! Per-note loudness from velocity, channel volume and expression.

use tracing::debug;

use crate::event::Control;
use crate::lookup::TimedIndex;
use crate::timeline::Timeline;

/// Controller value assumed when a channel never sets volume or expression.
pub const DEFAULT_CONTROLLER_VALUE: u8 = 96;

/// Controller samples keyed by MIDI channel number, merged across tracks.
#[derive(Debug, Default)]
pub struct ControllerLevels {
    volume: TimedIndex<u8, u8>,
    expression: TimedIndex<u8, u8>,
}

impl ControllerLevels {
    pub fn collect(timeline: &Timeline) -> Self {
        let mut levels = Self::default();
        for (id, event) in timeline.control_events() {
            let Some(controller) = event.as_controller() else {
                continue;
            };
            let key = id.channel;
            match controller.control() {
                Some(Control::Volume) => levels.volume.insert(key, event.real_time, controller.value),
                Some(Control::Expression) => {
                    levels.expression.insert(key, event.real_time, controller.value)
                }
                _ => {}
            }
        }
        levels
    }

    /// Mean of samples in `[start, end)`, else the latest at or before
    /// `start`, else [`DEFAULT_CONTROLLER_VALUE`].
    fn sample(index: &TimedIndex<u8, u8>, key: u8, start: f64, end: f64) -> f64 {
        let inside = index.between(&key, start, end);
        if !inside.is_empty() {
            return inside.iter().map(|(_, v)| *v as f64).sum::<f64>() / inside.len() as f64;
        }
        index
            .latest_at(&key, start)
            .copied()
            .unwrap_or(DEFAULT_CONTROLLER_VALUE) as f64
    }

    pub fn volume(&self, key: u8, start: f64, end: f64) -> f64 {
        Self::sample(&self.volume, key, start, end)
    }

    pub fn expression(&self, key: u8, start: f64, end: f64) -> f64 {
        Self::sample(&self.expression, key, start, end)
    }
}

/// Sets `volume` on every Note-On and records [`Timeline::max_volume`].
pub fn resolve_volumes(timeline: &mut Timeline) {
    let levels = ControllerLevels::collect(timeline);

    let resolved: Vec<_> = timeline
        .notes()
        .map(|(id, event, note)| {
            let key = id.channel;
            let start = event.real_time;
            let end = note.end.unwrap_or(start);
            let volume = note.velocity as f64 / 127.0
                * levels.volume(key, start, end) / 127.0
                * levels.expression(key, start, end) / 127.0;
            (id, volume)
        })
        .collect();

    let mut max_volume: f64 = 0.0;
    for (id, volume) in resolved {
        if let Some(note) = timeline.note_mut(id) {
            note.volume = volume;
            max_volume = max_volume.max(volume);
        }
    }
    timeline.max_volume = max_volume;

    debug!(max_volume, "resolved note volumes");
}
