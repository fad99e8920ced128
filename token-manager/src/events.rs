//! Lifecycle events pushed to subscribers (UI, notification policy).

use crate::scheduler::SchedulerState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokensmith::token::{Remaining, ThresholdEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Broadcast channel capacity. Slow subscribers lag and skip, they never block.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything observable about the token lifecycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEvent {
    ConfigsChanged,
    SelectionChanged {
        config_id: Option<String>,
    },
    /// Decrypted credentials were zeroed.
    CacheCleared,
    Unlocked {
        config_id: String,
    },
    TokenUpdated {
        config_id: String,
        expires_at: DateTime<Utc>,
        /// Produced by the auto-refresh scheduler rather than a user request.
        scheduled: bool,
    },
    TokenCleared,
    /// Once per countdown tick.
    Countdown {
        remaining: Remaining,
    },
    ExpiryThresholdCrossed {
        seconds: i64,
    },
    TokenExpired,
    SchedulerChanged {
        state: SchedulerState,
    },
    SchedulerExhausted {
        max_refreshes: u32,
    },
    RefreshFailed {
        error: String,
    },
}

impl From<ThresholdEvent> for ServiceEvent {
    fn from(event: ThresholdEvent) -> Self {
        match event {
            ThresholdEvent::Crossed { seconds } => ServiceEvent::ExpiryThresholdCrossed { seconds },
            ThresholdEvent::Expired => ServiceEvent::TokenExpired,
        }
    }
}

/// Sends an event, ignoring the no-subscriber case.
pub(crate) fn emit(tx: &broadcast::Sender<ServiceEvent>, event: ServiceEvent) {
    let _ = tx.send(event);
}

/// Forwards threshold crossings and expiry to `callback`.
///
/// The listener ends when the sender side is dropped.
pub fn spawn_threshold_listener<F>(
    mut rx: broadcast::Receiver<ServiceEvent>,
    callback: F,
) -> JoinHandle<()>
where
    F: Fn(ThresholdEvent) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ServiceEvent::ExpiryThresholdCrossed { seconds }) => {
                    callback(ThresholdEvent::Crossed { seconds })
                }
                Ok(ServiceEvent::TokenExpired) => callback(ThresholdEvent::Expired),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Threshold listener lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
