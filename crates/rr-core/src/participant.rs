//! Per-participant interval tracking.
//!
//! A [`Participant`] records when a member was present in the call, under which
//! mute/deafen status, and when they were streaming. Intervals are kept in the
//! order they were opened and never overlap within a dimension.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionError;
use crate::types::{UserId, VoiceStatus};

/// A closed or still-open time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    /// `None` while the interval is open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl Interval {
    const fn open(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    pub const fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// End of the interval, treating an open interval as ending at `now`.
    pub fn end_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.end.unwrap_or(now).max(self.start)
    }

    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.end_or(now) - self.start
    }
}

/// A presence interval tagged with the status the member had during it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceInterval {
    pub interval: Interval,
    pub status: VoiceStatus,
}

/// A participant's presence, status, and streaming history within one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    id: UserId,
    display_name: String,
    present: bool,
    last_transition: Option<DateTime<Utc>>,
    accumulated: Duration,
    presence: Vec<PresenceInterval>,
    streaming: Vec<Interval>,
}

impl Participant {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            present: false,
            last_transition: None,
            accumulated: Duration::zero(),
            presence: Vec::new(),
            streaming: Vec::new(),
        }
    }

    pub const fn id(&self) -> UserId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub const fn is_present(&self) -> bool {
        self.present
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.last().is_some_and(Interval::is_open)
    }

    pub fn has_streamed(&self) -> bool {
        !self.streaming.is_empty()
    }

    pub fn presence_intervals(&self) -> &[PresenceInterval] {
        &self.presence
    }

    pub fn streaming_intervals(&self) -> &[Interval] {
        &self.streaming
    }

    /// Status tag of the currently open presence interval.
    pub fn current_status(&self) -> Option<VoiceStatus> {
        self.presence
            .last()
            .filter(|p| p.interval.is_open())
            .map(|p| p.status)
    }

    /// Opens a presence interval tagged with `status`.
    pub fn mark_present(
        &mut self,
        now: DateTime<Utc>,
        status: VoiceStatus,
    ) -> Result<(), SessionError> {
        if self.present {
            return Err(self.invalid("participant is already present"));
        }
        if let Some(last) = self.presence.last() {
            if now < last.interval.end_or(last.interval.start) {
                return Err(self.invalid("join precedes the previous leave"));
            }
        }

        self.present = true;
        self.last_transition = Some(now);
        self.presence.push(PresenceInterval {
            interval: Interval::open(now),
            status,
        });
        Ok(())
    }

    /// Re-tags presence with a new mute/deafen status.
    ///
    /// Unchanged status is a no-op. Otherwise the open interval is closed at
    /// `now` and a new one opened with `status`; `present` is unaffected.
    pub fn update_status(
        &mut self,
        now: DateTime<Utc>,
        status: VoiceStatus,
    ) -> Result<(), SessionError> {
        if !self.present {
            return Err(self.invalid("status update for an absent participant"));
        }
        if self.current_status() == Some(status) {
            return Ok(());
        }

        self.close_presence(now)?;
        self.last_transition = Some(now);
        self.presence.push(PresenceInterval {
            interval: Interval::open(now),
            status,
        });
        Ok(())
    }

    /// Closes the open presence interval and marks the participant absent.
    pub fn mark_absent(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.present {
            return Err(self.invalid("participant is not present"));
        }

        self.close_presence(now)?;
        self.present = false;
        self.last_transition = Some(now);
        Ok(())
    }

    /// Marks the participant absent and ends any open stream at `now`.
    ///
    /// Nothing changes unless both intervals can be closed.
    pub fn leave(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if !self.present {
            return Err(self.invalid("participant is not present"));
        }
        if self
            .presence
            .last()
            .is_some_and(|p| p.interval.is_open() && now < p.interval.start)
        {
            return Err(self.invalid("leave precedes the join"));
        }
        if self.streaming.last().is_some_and(|s| s.is_open() && now < s.start) {
            return Err(self.invalid("leave precedes the stream start"));
        }

        if self.is_streaming() {
            self.mark_streaming_end(now)?;
        }
        self.mark_absent(now)
    }

    pub fn mark_streaming_start(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        if self.is_streaming() {
            return Err(self.invalid("participant is already streaming"));
        }
        if self.streaming.last().is_some_and(|last| now < last.end_or(last.start)) {
            return Err(self.invalid("stream start precedes the previous stream end"));
        }
        self.streaming.push(Interval::open(now));
        Ok(())
    }

    pub fn mark_streaming_end(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        let invalid_start = self.invalid("stream end precedes its start");
        let not_streaming = self.invalid("participant is not streaming");
        match self.streaming.last_mut() {
            Some(open) if open.is_open() => {
                if now < open.start {
                    return Err(invalid_start);
                }
                open.end = Some(now);
                Ok(())
            }
            _ => Err(not_streaming),
        }
    }

    /// Total time present, including the open interval up to `now`.
    pub fn elapsed_present_duration(&self, now: DateTime<Utc>) -> Duration {
        match (self.present, self.last_transition) {
            (true, Some(since)) if now > since => self.accumulated + (now - since),
            _ => self.accumulated,
        }
    }

    fn close_presence(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        let precedes = self.invalid("transition precedes the open interval");
        let Some(open) = self.presence.last_mut().filter(|p| p.interval.is_open()) else {
            return Err(SessionError::InvalidTransition {
                participant: Some(self.id),
                reason: "present without an open interval",
            });
        };
        if now < open.interval.start {
            return Err(precedes);
        }
        open.interval.end = Some(now);
        self.accumulated += now - open.interval.start;
        Ok(())
    }

    const fn invalid(&self, reason: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            participant: Some(self.id),
            reason,
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Step {
        Join(VoiceStatus),
        Update(VoiceStatus),
        Leave,
    }

    fn arb_status() -> impl Strategy<Value = VoiceStatus> {
        (any::<bool>(), any::<bool>()).prop_map(|(mute, deaf)| VoiceStatus::new(mute, deaf))
    }

    fn arb_step() -> impl Strategy<Value = Step> {
        prop_oneof![
            arb_status().prop_map(Step::Join),
            arb_status().prop_map(Step::Update),
            Just(Step::Leave),
        ]
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0)
            .single()
            .expect("valid test timestamp")
    }

    proptest! {
        #[test]
        fn elapsed_matches_interval_sum_and_is_monotonic(
            steps in proptest::collection::vec((arb_step(), 0i64..600), 0..40),
            samples in proptest::collection::vec(0i64..3600, 1..8),
        ) {
            let mut p = Participant::new(UserId::new(1).unwrap(), "p");
            let mut now = base();
            for (step, gap) in steps {
                now += Duration::seconds(gap);
                // Out-of-order steps are rejected and leave the record untouched.
                let _ = match step {
                    Step::Join(status) => p.mark_present(now, status),
                    Step::Update(status) => p.update_status(now, status),
                    Step::Leave => p.mark_absent(now),
                };
            }

            let mut samples: Vec<_> = samples.into_iter().map(|s| now + Duration::seconds(s)).collect();
            samples.sort();

            let mut previous = Duration::zero();
            for at in samples {
                let expected: Duration = p
                    .presence_intervals()
                    .iter()
                    .map(|i| i.interval.duration(at))
                    .fold(Duration::zero(), |acc, d| acc + d);
                let elapsed = p.elapsed_present_duration(at);
                prop_assert_eq!(elapsed, expected);
                prop_assert!(elapsed >= previous);
                previous = elapsed;
            }

            prop_assert_eq!(
                p.is_present(),
                p.presence_intervals().last().is_some_and(|i| i.interval.is_open())
            );
        }
    }
}
