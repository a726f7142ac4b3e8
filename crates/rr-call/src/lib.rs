//! Call session lifecycle: per-channel handlers, their registry, and the
//! tasks that keep published status messages current.

pub mod avatar;
pub mod clock;
pub mod config;
pub mod handler;
pub mod manager;
pub mod sink;
pub mod status;
pub mod tasks;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use avatar::{AvatarCache, AvatarError, AvatarPolicy, AvatarSupplier};
pub use clock::{Clock, ManualClock, RuntimeClock, SystemClock};
pub use config::{HandlerConfig, RetryPolicy};
pub use handler::{CallContext, FinalizeHandle, HandlerError, HandlerState, SessionHandler};
pub use manager::{ManagerError, Registry, SessionManager};
pub use sink::{Attachment, MessageHandle, NotificationSink, SinkError, StatusMessage};
pub use status::{Phase, TimelineError, session_timeline, status_message};
pub use tasks::spawn_refresh_loop;
pub use tracker::{CallTracker, Transition, TrackerError, VoiceState, VoiceStateChange, classify};
