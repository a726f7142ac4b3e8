//! Compact duration formatting (`1d2h3m4s`).

use std::fmt::Write;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Unit suffixes appended after each number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeUnits {
    pub days: String,
    pub hours: String,
    pub minutes: String,
    pub seconds: String,
}

impl Default for TimeUnits {
    fn default() -> Self {
        Self {
            days: "d".to_string(),
            hours: "h".to_string(),
            minutes: "m".to_string(),
            seconds: "s".to_string(),
        }
    }
}

/// Whether the seconds component is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Minutes,
    Seconds,
}

/// Formats `duration` dropping leading zero components.
///
/// With [`Precision::Minutes`] the minutes component is always printed, so a
/// fresh call reads `0m`. With [`Precision::Seconds`] the seconds component is
/// always printed and minutes only once non-zero. Negative durations format as
/// zero.
pub fn format_duration(duration: Duration, units: &TimeUnits, precision: Precision) -> String {
    let total = duration.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total / 3_600) % 24;
    let minutes = (total / 60) % 60;
    let seconds = total % 60;
    let with_seconds = precision == Precision::Seconds;

    let mut out = String::new();
    if days > 0 {
        let _ = write!(out, "{days}{}", units.days);
    }
    if days > 0 || hours > 0 {
        let _ = write!(out, "{hours}{}", units.hours);
    }
    if days > 0 || hours > 0 || minutes > 0 || !with_seconds {
        let _ = write!(out, "{minutes}{}", units.minutes);
    }
    if with_seconds {
        let _ = write!(out, "{seconds}{}", units.seconds);
    }
    out
}
