//! Background tasks attached to a live handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::clock::Clock;
use crate::handler::{HandlerState, SessionHandler};

/// Refreshes `handler` every `period` until it closes.
pub fn spawn_refresh_loop(
    handler: Arc<SessionHandler>,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> JoinHandle<()> {
    let mut state = handler.subscribe();
    tokio::spawn(async move {
        let channel_id = handler.channel_id();
        let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(channel_id = %channel_id, period_secs = period.as_secs(), "refresh loop started");

        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    // failures are logged by the handler; keep ticking
                    let _ = handler.refresh(clock.now()).await;
                }
                () = async {
                    // the borrowed value is not Send; drop it inside this branch
                    let _ = state.wait_for(|s| *s == HandlerState::Closed).await;
                } => break,
            }
        }
        tracing::debug!(channel_id = %channel_id, "refresh loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RuntimeClock;
    use crate::testing::{RecordingSink, context, settle, ts};
    use rr_core::{ChannelId, Rule, Session};
    use std::sync::Weak;

    const PERIOD: Duration = Duration::from_secs(60);

    async fn open(sink: &Arc<RecordingSink>) -> Arc<SessionHandler> {
        let session = Session::new(
            ChannelId::new(1).unwrap(),
            "lounge",
            Rule::enabled_for(ChannelId::new(900).unwrap()),
        );
        SessionHandler::create(session, ts(0), context(sink), Weak::new())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_each_period() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let task = spawn_refresh_loop(handler.clone(), Arc::new(RuntimeClock::new(ts(0))), PERIOD);

        settle().await;
        assert!(sink.updates().is_empty());
        for expected in 1..=3 {
            tokio::time::advance(PERIOD).await;
            settle().await;
            assert_eq!(sink.updates().len(), expected);
        }
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_once_closed() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let task = spawn_refresh_loop(handler.clone(), Arc::new(RuntimeClock::new(ts(0))), PERIOD);

        handler.close(ts(1)).await.wait().await.unwrap();
        task.await.unwrap();

        tokio::time::advance(PERIOD * 5).await;
        settle().await;
        assert_eq!(sink.updates().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn survives_refresh_failures() {
        let sink = Arc::new(RecordingSink::default());
        let handler = open(&sink).await;
        let task = spawn_refresh_loop(handler.clone(), Arc::new(RuntimeClock::new(ts(0))), PERIOD);

        settle().await;
        sink.fail_next_updates(1);
        tokio::time::advance(PERIOD).await;
        settle().await;
        assert_eq!(sink.update_attempts(), 1);
        assert!(sink.updates().is_empty());

        tokio::time::advance(PERIOD).await;
        settle().await;
        assert_eq!(sink.updates().len(), 1);
        assert!(!task.is_finished());
        task.abort();
    }
}
