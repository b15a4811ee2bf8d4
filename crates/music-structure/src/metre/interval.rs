//! Most common gap between consecutive note onsets.

use midi_timeline::math::{gaussian_blur, max_with_index};
use midi_timeline::Timeline;

/// Histogram bin width, seconds.
const BIN: f64 = 0.001;
/// Gaps this long or longer are not counted, seconds.
const MAX_INTERVAL: f64 = 2.0;
/// Blur width in bins.
const BLUR: usize = 21;

/// Peak of the blurred histogram of gaps between consecutive audible
/// onsets, in seconds. Simultaneous onsets add no gap; `None` when no gap
/// was counted. Needs real times and resolved volumes.
pub fn common_onset_interval(timeline: &Timeline) -> Option<f64> {
    let mut onsets: Vec<f64> = timeline
        .sounding_notes()
        .filter(|(_, _, note)| note.volume > 0.0)
        .map(|(_, event, _)| event.real_time)
        .collect();
    onsets.sort_by(f64::total_cmp);

    let mut histogram = vec![0.0; (MAX_INTERVAL / BIN) as usize];
    let mut counted = 0;
    for pair in onsets.windows(2) {
        let bin = ((pair[1] - pair[0]) / BIN).round() as usize;
        if bin == 0 || bin >= histogram.len() {
            continue;
        }
        histogram[bin] += 1.0;
        counted += 1;
    }
    if counted == 0 {
        return None;
    }

    gaussian_blur(&mut histogram, BLUR);
    max_with_index(&histogram).map(|(bin, _)| bin as f64 * BIN)
}
