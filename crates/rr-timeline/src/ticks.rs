//! Adaptive tick spacing for the time axis.

use chrono::{DateTime, Duration, FixedOffset, Utc};

/// Primary tick candidates, finest first.
const PRIMARY_LADDER: [Duration; 11] = [
    Duration::seconds(10),
    Duration::seconds(30),
    Duration::minutes(1),
    Duration::minutes(5),
    Duration::minutes(10),
    Duration::minutes(30),
    Duration::hours(1),
    Duration::hours(4),
    Duration::hours(8),
    Duration::hours(12),
    Duration::hours(24),
];

/// Upper bound on primary gridlines across the span.
const MAX_PRIMARY_TICKS: i32 = 12;

/// Weekly ticks start on Monday; 1970-01-05 is the first Monday after the epoch.
const ALIGNMENT_ANCHOR_SECS: i64 = 4 * 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickWeight {
    Primary,
    Secondary,
}

/// A gridline spacing with its label format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub interval: Duration,
    /// `strftime`-style format for the label.
    pub label_format: &'static str,
    pub weight: TickWeight,
}

impl Tick {
    pub fn new(interval: Duration, weight: TickWeight) -> Self {
        Self {
            interval,
            label_format: label_format(interval),
            weight,
        }
    }

    /// Tick instants in `[start, end)` aligned to local-time boundaries.
    ///
    /// A zero-length span yields a single tick at `start`.
    pub fn positions(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: FixedOffset,
    ) -> Vec<DateTime<Utc>> {
        if end <= start {
            return vec![start];
        }
        let step = self.interval.num_seconds();
        if step <= 0 {
            return vec![start];
        }

        let local = start.timestamp() + i64::from(offset.local_minus_utc());
        let aligned = local - (local - ALIGNMENT_ANCHOR_SECS).rem_euclid(step);
        let mut current = start + Duration::seconds(aligned - local);
        if current < start {
            current += self.interval;
        }

        let mut out = Vec::new();
        while current < end {
            out.push(current);
            current += self.interval;
        }
        out
    }
}

/// Chooses the primary and secondary tick spacing for `span`.
pub fn choose_ticks(span: Duration) -> (Tick, Tick) {
    let primary = primary_interval(span);
    (
        Tick::new(primary, TickWeight::Primary),
        Tick::new(secondary_interval(primary), TickWeight::Secondary),
    )
}

fn primary_interval(span: Duration) -> Duration {
    PRIMARY_LADDER
        .into_iter()
        .find(|&preset| span < preset * MAX_PRIMARY_TICKS)
        .unwrap_or(Duration::hours(24))
}

fn secondary_interval(primary: Duration) -> Duration {
    if primary < Duration::days(1) {
        Duration::days(1)
    } else if primary < Duration::weeks(1) {
        Duration::weeks(1)
    } else {
        Duration::days(30)
    }
}

fn label_format(interval: Duration) -> &'static str {
    if interval < Duration::minutes(1) {
        "%H:%M:%S"
    } else if interval < Duration::days(1) {
        "%H:%M"
    } else {
        "%m/%d"
    }
}
