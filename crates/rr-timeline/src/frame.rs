//! Right-edge rounding for ongoing timelines.

use chrono::{DateTime, Duration, Utc};

const FRAME_PRESETS: [Duration; 10] = [
    Duration::minutes(1),
    Duration::minutes(5),
    Duration::minutes(10),
    Duration::minutes(30),
    Duration::hours(1),
    Duration::hours(2),
    Duration::hours(4),
    Duration::hours(8),
    Duration::hours(12),
    Duration::hours(24),
];

/// Picks a stable chart end for a call that is still going on.
///
/// The frame only grows in coarse steps so the chart does not rescale on
/// every refresh: the first preset longer than the elapsed time, then whole
/// days once a call passes 24 hours.
pub fn frame_end(start: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let elapsed = now - start;
    if let Some(preset) = FRAME_PRESETS.into_iter().find(|&p| elapsed < p) {
        return start + preset;
    }
    let whole_days = Duration::days(elapsed.num_days());
    start + Duration::days(1) + whole_days
}
