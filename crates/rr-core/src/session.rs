//! One continuous occupancy period of a voice channel.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::participant::Participant;
use crate::rule::Rule;
use crate::types::{ChannelId, UserId, VoiceStatus};

/// Errors raised when a mutation violates the session state machine.
///
/// These indicate ordering bugs in the caller and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid transition{}: {reason}", for_participant(.participant))]
    InvalidTransition {
        participant: Option<UserId>,
        reason: &'static str,
    },
    #[error("participant {0} is already registered")]
    AlreadyRegistered(UserId),
    #[error("participant {0} is not registered")]
    UnknownParticipant(UserId),
}

fn for_participant(participant: &Option<UserId>) -> String {
    participant.map_or_else(String::new, |p| format!(" for participant {p}"))
}

/// The record of one call in a channel: who was there and when.
///
/// Participants are kept in join order. `online_count` always equals the number
/// of participants currently present.
#[derive(Debug, Clone)]
pub struct Session {
    channel_id: ChannelId,
    channel_label: String,
    rule: Rule,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    participants: Vec<Participant>,
    index: HashMap<UserId, usize>,
    online_count: usize,
}

impl Session {
    pub fn new(channel_id: ChannelId, channel_label: impl Into<String>, rule: Rule) -> Self {
        Self {
            channel_id,
            channel_label: channel_label.into(),
            rule,
            start_time: None,
            end_time: None,
            participants: Vec::new(),
            index: HashMap::new(),
            online_count: 0,
        }
    }

    pub const fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn channel_label(&self) -> &str {
        &self.channel_label
    }

    pub const fn rule(&self) -> &Rule {
        &self.rule
    }

    pub const fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub const fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub const fn online_count(&self) -> usize {
        self.online_count
    }

    pub const fn is_empty(&self) -> bool {
        self.online_count == 0
    }

    /// Participants in the order they first joined.
    pub fn participants(&self) -> impl ExactSizeIterator<Item = &Participant> {
        self.participants.iter()
    }

    pub fn participant(&self, id: UserId) -> Option<&Participant> {
        self.index.get(&id).map(|&i| &self.participants[i])
    }

    pub fn is_registered(&self, id: UserId) -> bool {
        self.index.contains_key(&id)
    }

    /// Records the session start. Can only happen once.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.start_time.is_some() {
            return Err(SessionError::InvalidTransition {
                participant: None,
                reason: "session already started",
            });
        }
        self.start_time = Some(now);
        Ok(())
    }

    /// Records the session end. Can only happen once, after the start.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        let Some(start) = self.start_time else {
            return Err(SessionError::InvalidTransition {
                participant: None,
                reason: "session ended before it started",
            });
        };
        if self.end_time.is_some() {
            return Err(SessionError::InvalidTransition {
                participant: None,
                reason: "session already ended",
            });
        }
        let end = now.max(start);
        self.end_time = Some(end);
        tracing::debug!(
            channel_id = %self.channel_id,
            participants = self.participants.len(),
            elapsed_secs = (end - start).num_seconds(),
            "session ended"
        );
        Ok(())
    }

    /// Wall-clock length of the session, up to its end or `now`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        match self.start_time {
            Some(start) => (self.end_time.unwrap_or(now) - start).max(Duration::zero()),
            None => Duration::zero(),
        }
    }

    pub fn register_participant(
        &mut self,
        id: UserId,
        display_name: impl Into<String>,
    ) -> Result<&Participant, SessionError> {
        if self.index.contains_key(&id) {
            return Err(SessionError::AlreadyRegistered(id));
        }
        self.index.insert(id, self.participants.len());
        self.participants.push(Participant::new(id, display_name));
        Ok(&self.participants[self.participants.len() - 1])
    }

    /// Marks a registered participant present and counts them online.
    pub fn member_join(
        &mut self,
        id: UserId,
        now: DateTime<Utc>,
        status: VoiceStatus,
    ) -> Result<(), SessionError> {
        self.participant_mut(id)?.mark_present(now, status)?;
        self.online_count += 1;
        Ok(())
    }

    pub fn member_update(
        &mut self,
        id: UserId,
        now: DateTime<Utc>,
        status: VoiceStatus,
    ) -> Result<(), SessionError> {
        self.participant_mut(id)?.update_status(now, status)
    }

    /// Marks a participant absent, ending their stream if one is open.
    /// Returns whether the session is now empty.
    pub fn member_leave(&mut self, id: UserId, now: DateTime<Utc>) -> Result<bool, SessionError> {
        self.participant_mut(id)?.leave(now)?;
        self.online_count -= 1;
        Ok(self.is_empty())
    }

    pub fn member_start_streaming(
        &mut self,
        id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.participant_mut(id)?.mark_streaming_start(now)
    }

    pub fn member_stop_streaming(
        &mut self,
        id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.participant_mut(id)?.mark_streaming_end(now)
    }

    fn participant_mut(&mut self, id: UserId) -> Result<&mut Participant, SessionError> {
        let &i = self
            .index
            .get(&id)
            .ok_or(SessionError::UnknownParticipant(id))?;
        Ok(&mut self.participants[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0)
            .single()
            .expect("valid test timestamp")
            + Duration::minutes(minutes)
    }

    fn user(id: u64) -> UserId {
        UserId::new(id).unwrap()
    }

    fn session() -> Session {
        Session::new(ChannelId::new(100).unwrap(), "general", Rule::default())
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut s = session();
        s.register_participant(user(1), "alice").unwrap();
        assert_eq!(
            s.register_participant(user(1), "alice").unwrap_err(),
            SessionError::AlreadyRegistered(user(1))
        );
    }

    #[test]
    fn participants_keep_join_order() {
        let mut s = session();
        for (id, name) in [(3, "carol"), (1, "alice"), (2, "bob")] {
            s.register_participant(user(id), name).unwrap();
        }
        let names: Vec<_> = s.participants().map(Participant::display_name).collect();
        assert_eq!(names, ["carol", "alice", "bob"]);
    }

    #[test]
    fn online_count_follows_presence() {
        let mut s = session();
        s.start(ts(0)).unwrap();
        s.register_participant(user(1), "alice").unwrap();
        s.register_participant(user(2), "bob").unwrap();

        s.member_join(user(1), ts(0), VoiceStatus::ACTIVE).unwrap();
        s.member_join(user(2), ts(1), VoiceStatus::ACTIVE).unwrap();
        assert_eq!(s.online_count(), 2);

        assert!(!s.member_leave(user(1), ts(2)).unwrap());
        assert!(s.member_leave(user(2), ts(3)).unwrap());
        assert!(s.is_empty());
    }

    #[test]
    fn failed_transition_does_not_change_count() {
        let mut s = session();
        s.register_participant(user(1), "alice").unwrap();
        s.member_join(user(1), ts(0), VoiceStatus::ACTIVE).unwrap();
        assert!(s.member_join(user(1), ts(1), VoiceStatus::ACTIVE).is_err());
        assert_eq!(s.online_count(), 1);

        s.member_leave(user(1), ts(2)).unwrap();
        assert!(s.member_leave(user(1), ts(3)).is_err());
        assert_eq!(s.online_count(), 0);
    }

    #[test]
    fn join_then_immediate_leave_restores_count() {
        let mut s = session();
        s.register_participant(user(1), "alice").unwrap();
        s.member_join(user(1), ts(0), VoiceStatus::ACTIVE).unwrap();
        s.register_participant(user(2), "bob").unwrap();

        let before = s.online_count();
        s.member_join(user(2), ts(5), VoiceStatus::ACTIVE).unwrap();
        s.member_leave(user(2), ts(5)).unwrap();
        assert_eq!(s.online_count(), before);

        let interval = s.participant(user(2)).unwrap().presence_intervals()[0].interval;
        assert_eq!(interval.end, Some(interval.start));
    }

    #[test]
    fn unknown_participant_is_reported() {
        let mut s = session();
        assert_eq!(
            s.member_leave(user(9), ts(0)).unwrap_err(),
            SessionError::UnknownParticipant(user(9))
        );
    }

    #[test]
    fn start_and_end_are_set_once() {
        let mut s = session();
        assert!(s.end(ts(1)).is_err());
        s.start(ts(0)).unwrap();
        assert!(s.start(ts(1)).is_err());
        assert_eq!(s.start_time(), Some(ts(0)));
        s.end(ts(10)).unwrap();
        assert!(s.end(ts(11)).is_err());
        assert_eq!(s.end_time(), Some(ts(10)));
        assert_eq!(s.elapsed(ts(99)), Duration::minutes(10));
    }

    #[test]
    fn error_messages_name_the_participant() {
        let err = SessionError::InvalidTransition {
            participant: Some(user(5)),
            reason: "participant is not present",
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for participant 5: participant is not present"
        );
        let err = SessionError::InvalidTransition {
            participant: None,
            reason: "session already ended",
        };
        assert_eq!(err.to_string(), "invalid transition: session already ended");
    }
}
