//! One-second countdown for the current token.
//!
//! Remaining time is measured against a monotonic deadline fixed when the
//! countdown starts, so wall-clock jumps do not make it stutter. The loop
//! ends after reporting expiry.

use crate::events::{emit, ServiceEvent};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokensmith::token::{ExpiryTracker, ThresholdEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a running countdown.
pub struct CountdownTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CountdownTask {
    pub fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Starts ticking toward `expires_at`, emitting `Countdown` every `tick` and
/// threshold events as they are crossed.
pub fn spawn_countdown(
    events: broadcast::Sender<ServiceEvent>,
    expires_at: DateTime<Utc>,
    thresholds: &[i64],
    tick: Duration,
) -> CountdownTask {
    let mut tracker = ExpiryTracker::new(expires_at, thresholds);
    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();

    let left = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let deadline = Instant::now() + left;

    let handle = tokio::spawn(async move {
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = loop_cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let until = deadline.saturating_duration_since(Instant::now());
            let now = expires_at - chrono::Duration::milliseconds(until.as_millis() as i64);
            let (remaining, crossed) = tracker.observe(now);

            emit(&events, ServiceEvent::Countdown { remaining });
            if let Some(event) = crossed {
                debug!(?event, "Expiry threshold reached");
                emit(&events, event.into());
                if event == ThresholdEvent::Expired {
                    break;
                }
            }
        }
    });

    CountdownTask { cancel, handle }
}
