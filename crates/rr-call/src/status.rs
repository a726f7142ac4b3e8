//! Builds status messages, with timeline images, from session snapshots.

use chrono::{DateTime, Utc};
use rr_core::report::ReportImage;
use rr_core::{Session, StatusReport, TIMELINE_ATTACHMENT};
use rr_timeline::{Emphasis, Entry, RenderError, Timeline, frame_end};
use thiserror::Error;

use crate::avatar::{AvatarCache, AvatarError, AvatarPolicy};
use crate::config::HandlerConfig;
use crate::sink::{Attachment, StatusMessage};

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Avatar(#[from] AvatarError),
}

/// Whether the call is still going on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Ongoing,
    Ended,
}

/// Builds the status message for `session` as of `now`.
///
/// Ongoing timelines end at a rounded-up frame and mark `now`; ended
/// timelines span exactly the session.
pub async fn status_message(
    session: &Session,
    now: DateTime<Utc>,
    phase: Phase,
    config: &HandlerConfig,
    avatars: Option<&AvatarCache>,
) -> Result<StatusMessage, TimelineError> {
    let mut report = match phase {
        Phase::Ongoing => StatusReport::ongoing(session, now, &config.labels),
        Phase::Ended => StatusReport::ended(session, now, &config.labels),
    };
    if !session.rule().history.shows_timeline() {
        return Ok(StatusMessage::text(report));
    }

    let timeline = session_timeline(session, now, phase, config, avatars).await?;
    let png = timeline.render_png()?;
    report.image = Some(ReportImage {
        url: format!("attachment://{TIMELINE_ATTACHMENT}"),
    });
    Ok(StatusMessage {
        report,
        attachment: Some(Attachment {
            filename: TIMELINE_ATTACHMENT.to_string(),
            png,
        }),
    })
}

/// Converts a session's participant intervals into a renderable timeline.
pub async fn session_timeline(
    session: &Session,
    now: DateTime<Utc>,
    phase: Phase,
    config: &HandlerConfig,
    avatars: Option<&AvatarCache>,
) -> Result<Timeline, TimelineError> {
    let start = session.start_time().unwrap_or(now);
    let (end, frame, indicator) = match phase {
        Phase::Ongoing => (now, frame_end(start, now), true),
        Phase::Ended => {
            let end = session.end_time().unwrap_or(now);
            (end, end, false)
        }
    };

    let mut timeline = Timeline::new(start, frame, end)
        .with_offset(config.utc_offset)
        .with_now_indicator(indicator);

    for participant in session.participants() {
        let avatar = match avatars {
            Some(cache) => match cache.get(participant.id()).await {
                Ok(avatar) => Some(avatar),
                Err(err) if config.avatar_policy == AvatarPolicy::Optional => {
                    tracing::warn!(
                        channel_id = %session.channel_id(),
                        participant = %participant.id(),
                        error = %err,
                        "rendering without avatar"
                    );
                    None
                }
                Err(err) => return Err(err.into()),
            },
            None => None,
        };

        let mut entry = Entry::new(participant.id().get()).with_avatar(avatar);
        for presence in participant.presence_intervals() {
            let emphasis = Emphasis::from_flags(presence.status.mute, presence.status.deaf);
            entry.add_presence(presence.interval.start, presence.interval.end, emphasis);
        }
        for streaming in participant.streaming_intervals() {
            entry.add_streaming(streaming.start, streaming.end);
        }
        timeline.push(entry);
    }
    Ok(timeline)
}
