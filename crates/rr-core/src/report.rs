//! Status report content for ongoing and ended calls.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::{Precision, TimeUnits, format_duration};
use crate::session::Session;

/// Embed accent colour used for every status report.
pub const REPORT_COLOR: u32 = 0x0054_7443;

/// Attachment name the timeline image is uploaded under.
pub const TIMELINE_ATTACHMENT: &str = "timeline.png";

/// User-facing strings. `{channel}` in descriptions is replaced with the
/// session's channel label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportLabels {
    pub ongoing_title: String,
    pub ongoing_description: String,
    pub ended_title: String,
    pub ended_description: String,
    pub start_time: String,
    pub end_time: String,
    pub time_elapsed: String,
    pub history: String,
    pub units: TimeUnits,
}

impl Default for ReportLabels {
    fn default() -> Self {
        Self {
            ongoing_title: "Call in progress".to_string(),
            ongoing_description: "A call is going on in {channel}.".to_string(),
            ended_title: "Call ended".to_string(),
            ended_description: "The call in {channel} has ended.".to_string(),
            start_time: "Started".to_string(),
            end_time: "Ended".to_string(),
            time_elapsed: "Duration".to_string(),
            history: "Participants".to_string(),
            units: TimeUnits::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportImage {
    pub url: String,
}

/// A rendered status message body, shaped like a chat embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<ReportField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ReportImage>,
}

impl StatusReport {
    /// Report for a call that is still going on.
    pub fn ongoing(session: &Session, now: DateTime<Utc>, labels: &ReportLabels) -> Self {
        let start = session.start_time().unwrap_or(now);
        let mut fields = vec![
            field(&labels.start_time, timestamp_mention(start), true),
            field(
                &labels.time_elapsed,
                format_duration(session.elapsed(now), &labels.units, Precision::Minutes),
                true,
            ),
        ];
        if session.rule().history.shows_names() {
            fields.push(field(&labels.history, history(session, now, labels), false));
        }

        Self {
            title: labels.ongoing_title.clone(),
            description: describe(&labels.ongoing_description, session),
            color: REPORT_COLOR,
            fields,
            image: None,
        }
    }

    /// Report for a closed call. An unset end time is treated as `now`.
    pub fn ended(session: &Session, now: DateTime<Utc>, labels: &ReportLabels) -> Self {
        let end = session.end_time().unwrap_or(now);
        let start = session.start_time().unwrap_or(end);
        let mut fields = vec![
            field(&labels.start_time, timestamp_mention(start), true),
            field(&labels.end_time, timestamp_mention(end), true),
            field(
                &labels.time_elapsed,
                format_duration(session.elapsed(end), &labels.units, Precision::Minutes),
                true,
            ),
        ];
        let history_detail = session.rule().history;
        if history_detail.shows_names() {
            fields.push(field(&labels.history, history(session, end, labels), false));
        }

        Self {
            title: labels.ended_title.clone(),
            description: describe(&labels.ended_description, session),
            color: REPORT_COLOR,
            fields,
            image: history_detail.shows_timeline().then(|| ReportImage {
                url: format!("attachment://{TIMELINE_ATTACHMENT}"),
            }),
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", self.description)?;
        for field in &self.fields {
            writeln!(f, "{}:", field.name)?;
            for line in field.value.lines() {
                writeln!(f, "  {line}")?;
            }
        }
        Ok(())
    }
}

/// Short-time timestamp mention rendered in each reader's local time.
pub fn timestamp_mention(at: DateTime<Utc>) -> String {
    format!("<t:{}:t>", at.timestamp())
}

fn field(name: &str, value: String, inline: bool) -> ReportField {
    ReportField {
        name: name.to_string(),
        value,
        inline,
    }
}

fn describe(template: &str, session: &Session) -> String {
    template.replace("{channel}", session.channel_label())
}

fn history(session: &Session, now: DateTime<Utc>, labels: &ReportLabels) -> String {
    let with_durations = session.rule().history.shows_durations();
    let lines: Vec<String> = session
        .participants()
        .map(|p| {
            if with_durations {
                let elapsed = p.elapsed_present_duration(now);
                format!(
                    "{} ({})",
                    p.display_name(),
                    format_duration(elapsed, &labels.units, Precision::Seconds)
                )
            } else {
                p.display_name().to_string()
            }
        })
        .collect();

    if lines.is_empty() {
        "-".to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{HistoryDetail, Rule};
    use crate::types::{ChannelId, UserId, VoiceStatus};
    use chrono::{Duration, TimeZone};

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::minutes(minutes)
    }

    fn session(history: HistoryDetail) -> Session {
        let rule = Rule {
            history,
            ..Rule::enabled_for(ChannelId::new(500).unwrap())
        };
        let mut s = Session::new(ChannelId::new(100).unwrap(), "lounge", rule);
        s.start(ts(0)).unwrap();
        for (id, name, joined) in [(1, "alice", 0), (2, "bob", 5)] {
            let user = UserId::new(id).unwrap();
            s.register_participant(user, name).unwrap();
            s.member_join(user, ts(joined), VoiceStatus::ACTIVE).unwrap();
        }
        s
    }

    #[test]
    fn ongoing_with_durations() {
        let report = StatusReport::ongoing(
            &session(HistoryDetail::NameWithDuration),
            ts(75),
            &ReportLabels::default(),
        );
        assert_eq!(report.color, REPORT_COLOR);
        assert!(report.image.is_none());
        insta::assert_snapshot!(report.to_string(), @r"
        Call in progress
        A call is going on in lounge.
        Started:
          <t:1740859200:t>
        Duration:
          1h15m
        Participants:
          alice (1h15m0s)
          bob (1h10m0s)
        ");
    }

    #[test]
    fn ended_without_history() {
        let mut s = session(HistoryDetail::None);
        s.member_leave(UserId::new(2).unwrap(), ts(20)).unwrap();
        s.end(ts(30)).unwrap();

        let report = StatusReport::ended(&s, ts(99), &ReportLabels::default());
        insta::assert_snapshot!(report.to_string(), @r"
        Call ended
        The call in lounge has ended.
        Started:
          <t:1740859200:t>
        Ended:
          <t:1740861000:t>
        Duration:
          30m
        ");
    }

    #[test]
    fn ended_with_timeline_references_attachment() {
        let mut s = session(HistoryDetail::NameWithDurationAndTimeline);
        s.end(ts(30)).unwrap();
        let report = StatusReport::ended(&s, ts(30), &ReportLabels::default());
        assert_eq!(
            report.image,
            Some(ReportImage {
                url: "attachment://timeline.png".to_string()
            })
        );
        let history = &report.fields.last().unwrap().value;
        assert_eq!(history, "alice (30m0s)\nbob (25m0s)");
    }

    #[test]
    fn names_only_history() {
        let report = StatusReport::ongoing(
            &session(HistoryDetail::NameOnly),
            ts(1),
            &ReportLabels::default(),
        );
        let history = report.fields.last().unwrap();
        assert_eq!(history.name, "Participants");
        assert_eq!(history.value, "alice\nbob");
        assert!(!history.inline);
    }

    #[test]
    fn empty_history_has_placeholder() {
        let rule = Rule {
            history: HistoryDetail::NameOnly,
            ..Rule::default()
        };
        let mut s = Session::new(ChannelId::new(100).unwrap(), "lounge", rule);
        s.start(ts(0)).unwrap();
        let report = StatusReport::ongoing(&s, ts(0), &ReportLabels::default());
        assert_eq!(report.fields.last().unwrap().value, "-");
    }
}
