//! JSON description of a timeline, with times in seconds from the start.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::RenderError;
use crate::color::Rgba;
use crate::layout::Layout;
use crate::png;
use crate::render::{Emphasis, Entry, Timeline};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// Wall-clock instant of second zero. Defaults to the Unix epoch.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    /// Chart end; defaults to the latest section end.
    #[serde(default)]
    pub frame_end: Option<f64>,
    /// Where open sections end; defaults to the frame end.
    #[serde(default)]
    pub now: Option<f64>,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub now_indicator: bool,
    pub users: Vec<UserRequest>,
    #[serde(default)]
    pub layout: Option<Layout>,
    /// Primary tick spacing in seconds.
    #[serde(default)]
    pub main_tics: Option<f64>,
    /// Secondary tick spacing in seconds.
    #[serde(default)]
    pub sub_tics: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRequest {
    #[serde(default)]
    pub id: u64,
    /// PNG file, relative paths resolve against the request file.
    #[serde(default)]
    pub avatar_location: Option<PathBuf>,
    #[serde(default)]
    pub color: Option<Rgba>,
    pub sections: Vec<SectionRequest>,
    #[serde(default)]
    pub streaming: Vec<SpanRequest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionRequest {
    pub start: f64,
    /// `null` for a section that is still open.
    pub end: Option<f64>,
    #[serde(default)]
    pub status: Emphasis,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpanRequest {
    pub start: f64,
    pub end: Option<f64>,
}

impl RenderRequest {
    pub fn from_json(json: &str) -> Result<Self, RenderError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Latest finite section or stream end, in seconds.
    fn latest_end(&self) -> f64 {
        self.users
            .iter()
            .flat_map(|u| {
                let sections = u.sections.iter().map(|s| s.end.unwrap_or(s.start));
                let streams = u.streaming.iter().map(|s| s.end.unwrap_or(s.start));
                sections.chain(streams)
            })
            .fold(0.0, f64::max)
    }

    /// Builds a timeline, loading avatars relative to `base_dir`.
    pub fn into_timeline(self, base_dir: &Path) -> Result<Timeline, RenderError> {
        let start = self.start.unwrap_or(DateTime::UNIX_EPOCH);
        let at = |seconds: f64| offset(seconds).map(|d| start + d);

        let frame_end_secs = self.frame_end.unwrap_or_else(|| self.latest_end());
        let frame_end = at(frame_end_secs)?;
        let now = at(self.now.unwrap_or(frame_end_secs))?;
        let utc_offset = FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            RenderError::InvalidRequest(format!(
                "utc offset out of range: {} minutes",
                self.utc_offset_minutes
            ))
        })?;

        let mut timeline = Timeline::new(start, frame_end, now)
            .with_offset(utc_offset)
            .with_now_indicator(self.now_indicator)
            .with_layout(self.layout.unwrap_or_default());
        if let (Some(main), Some(sub)) = (self.main_tics, self.sub_tics) {
            timeline.ticks = Some((positive(main)?, positive(sub)?));
        }

        for user in self.users {
            let avatar = match &user.avatar_location {
                Some(location) => Some(load_avatar(&base_dir.join(location))?),
                None => None,
            };
            let mut entry = Entry::new(user.id)
                .with_avatar(avatar)
                .with_color(user.color);
            for section in &user.sections {
                let end = section.end.map(at).transpose()?;
                entry.add_presence(at(section.start)?, end, section.status);
            }
            for span in &user.streaming {
                let end = span.end.map(at).transpose()?;
                entry.add_streaming(at(span.start)?, end);
            }
            timeline.push(entry);
        }
        Ok(timeline)
    }
}

fn offset(seconds: f64) -> Result<Duration, RenderError> {
    if !seconds.is_finite() || seconds.abs() > 1e12 {
        return Err(RenderError::InvalidRequest(format!(
            "time offset out of range: {seconds}"
        )));
    }
    Ok(Duration::milliseconds((seconds * 1_000.0).round() as i64))
}

fn positive(seconds: f64) -> Result<Duration, RenderError> {
    let duration = offset(seconds)?;
    if duration <= Duration::zero() {
        return Err(RenderError::InvalidRequest(format!(
            "tick spacing must be positive: {seconds}"
        )));
    }
    Ok(duration)
}

fn load_avatar(path: &Path) -> Result<crate::Raster, RenderError> {
    let bytes = std::fs::read(path)?;
    png::decode(&bytes)
}
