//! Replays a recorded voice-state script through the call tracker.
//!
//! Script times are seconds after `start`. The tracker sees a manual clock
//! set to each event's time, so a replay produces the same messages it would
//! have produced live. Grace periods are evaluated in script time: an empty
//! call closes when the next event comes at least one grace period after it
//! emptied, and every call still open when the script ends is closed.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rr_call::{
    AvatarCache, CallContext, CallTracker, Clock, FinalizeHandle, HandlerConfig, HandlerState,
    ManualClock, MessageHandle, NotificationSink, SessionManager, SinkError, StatusMessage,
    VoiceState, VoiceStateChange,
};
use rr_core::{
    ChannelId, ChannelProfile, MemberProfile, Rule, RuleBook, RuleResolver, Scope, Session, UserId,
};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayScript {
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub channels: Vec<ChannelProfile>,
    #[serde(default)]
    pub members: Vec<MemberProfile>,
    /// Applied on top of the stored rules.
    #[serde(default)]
    pub rules: Vec<ScriptRule>,
    pub events: Vec<ScriptEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptRule {
    pub scope: Scope,
    pub id: u64,
    #[serde(flatten)]
    pub rule: Rule,
}

/// One member's voice state from `at` onwards.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptEvent {
    pub at: u32,
    pub member: UserId,
    /// `None` when disconnected.
    #[serde(default)]
    pub channel: Option<ChannelId>,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
    #[serde(default)]
    pub guild_mute: bool,
    #[serde(default)]
    pub guild_deaf: bool,
    #[serde(default)]
    pub self_stream: bool,
}

impl ReplayScript {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid replay script {}", path.display()))
    }

    /// Parses a script and checks that events are ordered and reference
    /// known members and channels.
    pub fn from_json(json: &str) -> Result<Self> {
        let script: Self = serde_json::from_str(json)?;
        let mut previous = 0;
        for (index, event) in script.events.iter().enumerate() {
            if event.at < previous {
                bail!("event {index} at {}s is earlier than the event before it", event.at);
            }
            previous = event.at;
            script.member(event.member)?;
            script.voice_state(event)?;
        }
        Ok(script)
    }

    pub fn apply_rules(&self, book: &mut RuleBook) {
        for entry in &self.rules {
            book.set(entry.scope, entry.id, entry.rule.clone());
        }
    }

    fn at(&self, seconds: u32) -> DateTime<Utc> {
        self.start + chrono::Duration::seconds(i64::from(seconds))
    }

    fn member(&self, id: UserId) -> Result<&MemberProfile> {
        self.members
            .iter()
            .find(|member| member.id == id)
            .with_context(|| format!("unknown member {id}"))
    }

    fn voice_state(&self, event: &ScriptEvent) -> Result<VoiceState> {
        let channel = match event.channel {
            Some(id) => Some(
                self.channels
                    .iter()
                    .find(|channel| channel.id == id)
                    .cloned()
                    .with_context(|| format!("unknown channel {id}"))?,
            ),
            None => None,
        };
        Ok(VoiceState {
            channel,
            self_mute: event.self_mute,
            self_deaf: event.self_deaf,
            guild_mute: event.guild_mute,
            guild_deaf: event.guild_deaf,
            self_stream: event.self_stream,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    /// Changes the tracker rejected.
    pub rejected: usize,
    pub calls: usize,
    /// Calls whose final status could not be published.
    pub unfinished: usize,
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Replayed {} events ({} rejected), {} calls closed ({} not finalized)",
            self.events, self.rejected, self.calls, self.unfinished
        )
    }
}

/// Feeds `script` through a fresh tracker and waits for every call to be
/// finalized.
pub async fn run(
    script: &ReplayScript,
    rules: Arc<dyn RuleResolver>,
    sink: Arc<dyn NotificationSink>,
    config: HandlerConfig,
    avatars: Option<Arc<AvatarCache>>,
) -> Result<ReplaySummary> {
    let grace = chrono::Duration::from_std(config.close_grace).context("close grace out of range")?;
    let clock = Arc::new(ManualClock::new(script.start));
    let mut ctx = CallContext::new(sink, Arc::clone(&clock) as Arc<dyn Clock>, config);
    if let Some(avatars) = avatars {
        ctx = ctx.with_avatars(avatars);
    }
    let manager = Arc::new(SessionManager::new(Arc::new(ctx)));
    let tracker = CallTracker::new(Arc::clone(&manager), rules);

    let mut summary = ReplaySummary::default();
    let mut states: HashMap<UserId, VoiceState> = HashMap::new();
    let mut now = script.start;

    for event in &script.events {
        now = script.at(event.at);
        close_expired(&manager, Some(now), grace, &mut summary).await;
        clock.set(now);

        let member = script.member(event.member)?;
        let after = script.voice_state(event)?;
        let before = states.insert(member.id, after.clone()).unwrap_or_default();
        let change = VoiceStateChange {
            member: member.clone(),
            before,
            after,
        };
        if let Err(err) = tracker.handle(&change).await {
            tracing::warn!(participant = %member.id, at = event.at, error = %err, "replayed change rejected");
            summary.rejected += 1;
        }
        summary.events += 1;
    }

    close_expired(&manager, None, grace, &mut summary).await;
    for handle in manager.close_all(now).await {
        finish(handle, &mut summary).await;
    }
    tracing::info!(?summary, "replay finished");
    Ok(summary)
}

/// Closes empty calls whose grace period has run out by `now`, or all empty
/// calls when `now` is `None`. Each closes at the time it emptied.
async fn close_expired(
    manager: &SessionManager,
    now: Option<DateTime<Utc>>,
    grace: chrono::Duration,
    summary: &mut ReplaySummary,
) {
    let mut pending = manager.handlers();
    pending.retain(|handler| handler.state() == HandlerState::PendingClose);
    pending.sort_by_key(|handler| handler.channel_id());

    for handler in pending {
        let Some(emptied) = emptied_at(&handler.snapshot().await) else {
            continue;
        };
        if now.is_some_and(|now| now - emptied < grace) {
            continue;
        }
        finish(handler.close(emptied).await, summary).await;
    }
}

async fn finish(handle: FinalizeHandle, summary: &mut ReplaySummary) {
    if handle.is_noop() {
        return;
    }
    summary.calls += 1;
    if let Err(err) = handle.wait().await {
        tracing::warn!(error = %err, "call not finalized");
        summary.unfinished += 1;
    }
}

/// When the last participant left.
fn emptied_at(session: &Session) -> Option<DateTime<Utc>> {
    session
        .participants()
        .filter_map(|participant| participant.presence_intervals().last())
        .filter_map(|presence| presence.interval.end)
        .max()
}

/// Records messages instead of posting them.
#[derive(Debug, Default)]
pub struct TranscriptSink {
    images: Option<PathBuf>,
    transcript: Mutex<Transcript>,
}

#[derive(Debug, Default)]
struct Transcript {
    published: u64,
    entries: Vec<String>,
}

impl TranscriptSink {
    /// Timeline images are written to `images/<message id>.png` when set.
    pub fn new(images: Option<PathBuf>) -> Self {
        Self {
            images,
            transcript: Mutex::default(),
        }
    }

    /// Every publish and update so far, in order.
    pub fn entries(&self) -> Vec<String> {
        self.lock().entries.clone()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for entry in &self.lock().entries {
            writeln!(writer, "{entry}")?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Transcript> {
        self.transcript.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, action: &str, handle: &MessageHandle, message: &StatusMessage) -> Result<(), SinkError> {
        let mut entry = format!(
            "[{action} {} -> #{}]\n{}",
            handle.message_id, handle.channel, message.report
        );
        if let Some(attachment) = &message.attachment {
            entry.push_str(&format!("(attachment {})\n", attachment.filename));
            if let Some(dir) = &self.images {
                let path = dir.join(format!("{}.png", handle.message_id));
                std::fs::write(&path, &attachment.png)
                    .map_err(|err| SinkError::Transport(format!("{}: {err}", path.display())))?;
            }
        }
        self.lock().entries.push(entry);
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TranscriptSink {
    async fn publish(&self, target: ChannelId, message: StatusMessage) -> Result<MessageHandle, SinkError> {
        let handle = {
            let mut transcript = self.lock();
            transcript.published += 1;
            MessageHandle {
                channel: target,
                message_id: format!("m{}", transcript.published),
            }
        };
        self.record("publish", &handle, &message)?;
        Ok(handle)
    }

    async fn update(&self, handle: &MessageHandle, message: StatusMessage) -> Result<(), SinkError> {
        self.record("update", handle, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;
    use rr_core::HistoryDetail;

    const SCRIPT: &str = r#"{
        "start": "2025-03-01T20:00:00Z",
        "channels": [{ "id": 100, "name": "lounge", "guild_id": 1 }],
        "members": [
            { "id": 11, "username": "alice", "display_name": "Alice" },
            { "id": 12, "username": "bob" }
        ],
        "rules": [{ "scope": "guild", "id": 1, "enabled": true, "notification_channel": 900 }],
        "events": [
            { "at": 0, "member": 11, "channel": 100 },
            { "at": 60, "member": 11 },
            { "at": 200, "member": 11, "channel": 100 },
            { "at": 230, "member": 12, "channel": 100, "self_mute": true },
            { "at": 300, "member": 11 }
        ]
    }"#;

    fn rules(script: &ReplayScript) -> Arc<dyn RuleResolver> {
        let mut book = RuleBook::default();
        script.apply_rules(&mut book);
        Arc::new(book)
    }

    fn headlines(sink: &TranscriptSink) -> String {
        sink.entries()
            .iter()
            .map(|entry| entry.lines().take(2).collect::<Vec<_>>().join(" "))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn expired_grace_starts_a_new_call() {
        let script = ReplayScript::from_json(SCRIPT).unwrap();
        let sink = Arc::new(TranscriptSink::default());

        let summary = run(
            &script,
            rules(&script),
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            HandlerConfig::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            ReplaySummary {
                events: 5,
                rejected: 0,
                calls: 2,
                unfinished: 0,
            }
        );
        assert_snapshot!(headlines(&sink), @r"
        [publish m1 -> #900] Call in progress
        [update m1 -> #900] Call in progress
        [update m1 -> #900] Call in progress
        [update m1 -> #900] Call ended
        [publish m2 -> #900] Call in progress
        [update m2 -> #900] Call in progress
        [update m2 -> #900] Call in progress
        [update m2 -> #900] Call in progress
        [update m2 -> #900] Call ended
        ");
    }

    #[tokio::test]
    async fn call_still_going_closes_at_the_last_event() {
        let script = ReplayScript::from_json(SCRIPT).unwrap();
        let sink = Arc::new(TranscriptSink::default());
        run(
            &script,
            rules(&script),
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            HandlerConfig::default(),
            None,
        )
        .await
        .unwrap();

        let entries = sink.entries();
        let last = entries.last().unwrap();
        assert!(last.contains("The call in lounge has ended."), "{last}");
        assert!(!last.contains("Participants"), "{last}");
    }

    #[tokio::test]
    async fn timeline_images_are_written_per_message() {
        let mut script = ReplayScript::from_json(SCRIPT).unwrap();
        script.rules[0].rule.history = HistoryDetail::NameWithDurationAndTimeline;
        let temp = tempfile::tempdir().unwrap();
        let sink = Arc::new(TranscriptSink::new(Some(temp.path().to_path_buf())));

        run(
            &script,
            rules(&script),
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            HandlerConfig::default(),
            None,
        )
        .await
        .unwrap();

        assert!(temp.path().join("m1.png").exists());
        assert!(temp.path().join("m2.png").exists());
        let last = sink.entries().pop().unwrap();
        assert!(last.contains("Participants:"), "{last}");
        assert!(last.ends_with("(attachment timeline.png)\n"), "{last}");
    }

    #[tokio::test]
    async fn disabled_channels_produce_no_messages() {
        let mut script = ReplayScript::from_json(SCRIPT).unwrap();
        script.rules.clear();
        let sink = Arc::new(TranscriptSink::default());

        let summary = run(
            &script,
            rules(&script),
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            HandlerConfig::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.calls, 0);
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn rejects_unordered_or_dangling_events() {
        let unordered = SCRIPT.replace(r#""at": 230"#, r#""at": 30"#);
        let err = ReplayScript::from_json(&unordered).unwrap_err();
        assert!(err.to_string().contains("earlier"), "{err}");

        let dangling = SCRIPT.replace(r#""member": 12, "channel": 100"#, r#""member": 12, "channel": 101"#);
        let err = ReplayScript::from_json(&dangling).unwrap_err();
        assert!(err.to_string().contains("unknown channel 101"), "{err}");

        let stranger = SCRIPT.replace(r#""member": 12,"#, r#""member": 13,"#);
        let err = ReplayScript::from_json(&stranger).unwrap_err();
        assert!(err.to_string().contains("unknown member 13"), "{err}");
    }

    #[test]
    fn summary_reads_as_a_sentence() {
        let summary = ReplaySummary {
            events: 5,
            rejected: 1,
            calls: 2,
            unfinished: 0,
        };
        assert_eq!(
            summary.to_string(),
            "Replayed 5 events (1 rejected), 2 calls closed (0 not finalized)"
        );
    }
}
