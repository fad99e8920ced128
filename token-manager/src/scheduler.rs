//! Auto-refresh scheduler.
//!
//! [`AutoRefresh`] is the state machine; it performs no I/O and is driven by
//! the token service. [`spawn_refresh_loop`] runs the periodic check as a
//! task tied to a [`CancellationToken`], so a superseded loop stops at its
//! next await point and never acts again.
//!
//! ```text
//!            enable (locked)           unlock
//! Disabled ─────────────────▶ Armed ───────────▶ Active ──┐ tick: refresh ok
//!    │                                            ▲  │ ◀──┘
//!    └──────── enable (credentials available) ────┘  ├── bound reached ──▶ Exhausted
//!                                                     └── refresh error ──▶ Failed
//! Active/Armed ── disable, lock, or switch to a locked config ──▶ Disabled
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Weak;
use std::time::Duration;
use tokensmith::refresh::AutoRefreshConfig;
use tokensmith::{Result, TokenError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Scheduler state as reported to the UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Disabled,
    /// Enabled, waiting for a password-gated decrypt.
    Armed,
    /// Enabled with credentials available; the check loop is running.
    Active,
    /// Refresh bound reached; auto-refresh switched itself off.
    Exhausted,
    /// A scheduled refresh failed; auto-refresh switched itself off.
    Failed { reason: String },
}

/// What a refresh check should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickDecision {
    /// Scheduler is not active; nothing to do.
    Inactive,
    /// Token still has enough validity left (or there is no token to keep alive).
    Idle,
    /// Near expiry with refreshes left.
    Refresh,
    /// Near expiry but the bound is already reached.
    Exhausted,
}

/// Bounded auto-refresh state machine.
#[derive(Clone, Debug)]
pub struct AutoRefresh {
    config: AutoRefreshConfig,
    state: SchedulerState,
    threshold_secs: i64,
}

impl AutoRefresh {
    /// Rebuilds the machine from persisted settings.
    ///
    /// An enabled config comes back `Active` when credentials are available
    /// and `Armed` otherwise; decrypted credentials never survive a restart.
    pub fn restore(
        mut config: AutoRefreshConfig,
        credentials_available: bool,
        threshold_secs: i64,
    ) -> Self {
        let state = if !config.enabled {
            SchedulerState::Disabled
        } else if config.is_exhausted() {
            config.enabled = false;
            SchedulerState::Exhausted
        } else if credentials_available {
            SchedulerState::Active
        } else {
            SchedulerState::Armed
        };

        Self {
            config,
            state,
            threshold_secs,
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn config(&self) -> &AutoRefreshConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.state == SchedulerState::Active
    }

    /// Turns auto-refresh on with a fresh counter.
    ///
    /// Already `Active` or `Armed` schedulers are left as they are.
    pub fn enable(
        &mut self,
        max_refreshes: u32,
        credentials_available: bool,
        now: DateTime<Utc>,
    ) -> Result<&SchedulerState> {
        if max_refreshes == 0 {
            return Err(TokenError::Validation(
                "max_refreshes must be at least 1".to_string(),
            ));
        }
        if matches!(self.state, SchedulerState::Active | SchedulerState::Armed) {
            return Ok(&self.state);
        }

        self.config.start(max_refreshes, now);
        self.state = if credentials_available {
            SchedulerState::Active
        } else {
            SchedulerState::Armed
        };
        info!(max_refreshes, state = ?self.state, "Auto-refresh enabled");
        Ok(&self.state)
    }

    /// `Armed → Active` once credentials have been decrypted.
    /// Returns whether the loop must be started.
    pub fn credentials_unlocked(&mut self) -> bool {
        if self.state == SchedulerState::Armed {
            self.state = SchedulerState::Active;
            return true;
        }
        false
    }

    /// `Active/Armed → Disabled` because credentials are no longer available.
    pub fn credentials_lost(&mut self) -> bool {
        self.disable()
    }

    /// Explicit disable. Returns whether anything changed.
    pub fn disable(&mut self) -> bool {
        if matches!(self.state, SchedulerState::Active | SchedulerState::Armed) {
            self.config.enabled = false;
            self.state = SchedulerState::Disabled;
            info!("Auto-refresh disabled");
            return true;
        }
        false
    }

    /// Reacts to a new selection. Returns whether the loop must be (re)started.
    ///
    /// The refresh counter is kept across switches; the bound caps the whole run.
    pub fn selection_changed(&mut self, credentials_available: bool) -> bool {
        match self.state {
            SchedulerState::Active | SchedulerState::Armed if credentials_available => {
                self.state = SchedulerState::Active;
                true
            }
            SchedulerState::Active | SchedulerState::Armed => {
                self.disable();
                false
            }
            _ => false,
        }
    }

    /// Decides what a check at `seconds_left` of remaining validity should do.
    /// `None` means there is no token for the selected config.
    pub fn decide(&self, seconds_left: Option<i64>) -> TickDecision {
        if !self.is_active() {
            return TickDecision::Inactive;
        }
        match seconds_left {
            Some(left) if left <= self.threshold_secs => {
                if self.config.is_exhausted() {
                    TickDecision::Exhausted
                } else {
                    TickDecision::Refresh
                }
            }
            _ => TickDecision::Idle,
        }
    }

    /// Counts a successful scheduled refresh. Returns `true` when this one
    /// reached the bound, leaving the scheduler `Exhausted`.
    pub fn record_success(&mut self) -> bool {
        if self.config.record_refresh() {
            self.state = SchedulerState::Exhausted;
            info!(
                max_refreshes = self.config.max_refreshes,
                "Auto-refresh limit reached"
            );
            return true;
        }
        false
    }

    pub fn record_failure(&mut self, reason: String) {
        self.config.enabled = false;
        self.state = SchedulerState::Failed { reason };
    }

    pub fn mark_exhausted(&mut self) {
        self.config.enabled = false;
        self.state = SchedulerState::Exhausted;
    }
}

/// Receiver of periodic refresh checks.
#[async_trait]
pub trait RefreshTarget: Send + Sync + 'static {
    /// Runs one check. Implementations cancel `cancel` to end the loop.
    async fn refresh_tick(&self, cancel: &CancellationToken);
}

/// Handle to a running check loop.
pub struct RefreshTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshTask {
    /// Cancels the loop and aborts the task. Safe to call on a finished task.
    pub fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Spawns the periodic check loop.
///
/// The first check runs one interval after spawning. The loop ends when `cancel` fires or the
/// target has been dropped.
pub fn spawn_refresh_loop<T: RefreshTarget>(target: Weak<T>, every: Duration) -> RefreshTask {
    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(interval_secs = every.as_secs(), "Refresh loop started");

        loop {
            tokio::select! {
                _ = loop_cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(target) = target.upgrade() else {
                break;
            };
            target.refresh_tick(&loop_cancel).await;
        }

        debug!("Refresh loop stopped");
    });

    RefreshTask { cancel, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn machine(max: u32, available: bool) -> AutoRefresh {
        let mut m = AutoRefresh::restore(AutoRefreshConfig::new(max), available, 60);
        m.enable(max, available, Utc::now()).unwrap();
        m
    }

    #[test]
    fn test_enable_with_credentials_is_active() {
        let m = machine(3, true);
        assert_eq!(m.state(), &SchedulerState::Active);
        assert!(m.config().enabled);
        assert!(m.config().started_at.is_some());
    }

    #[test]
    fn test_enable_locked_is_armed_until_unlock() {
        let mut m = machine(3, false);
        assert_eq!(m.state(), &SchedulerState::Armed);
        assert_eq!(m.decide(Some(0)), TickDecision::Inactive);

        assert!(m.credentials_unlocked());
        assert_eq!(m.state(), &SchedulerState::Active);
        assert!(!m.credentials_unlocked());
    }

    #[test]
    fn test_enable_rejects_zero_bound() {
        let mut m = AutoRefresh::restore(AutoRefreshConfig::new(1), true, 60);
        assert!(matches!(
            m.enable(0, true, Utc::now()),
            Err(TokenError::Validation(_))
        ));
        assert_eq!(m.state(), &SchedulerState::Disabled);
    }

    #[test]
    fn test_decide_threshold() {
        let m = machine(3, true);
        assert_eq!(m.decide(Some(61)), TickDecision::Idle);
        assert_eq!(m.decide(Some(60)), TickDecision::Refresh);
        assert_eq!(m.decide(Some(0)), TickDecision::Refresh);
        assert_eq!(m.decide(None), TickDecision::Idle);
    }

    #[test]
    fn test_exhausts_after_n_successes() {
        let mut m = machine(2, true);
        assert!(!m.record_success());
        assert_eq!(m.state(), &SchedulerState::Active);
        assert!(m.record_success());
        assert_eq!(m.state(), &SchedulerState::Exhausted);
        assert!(!m.config().enabled);
        assert_eq!(m.config().current_refreshes, 2);

        // No further refresh decisions regardless of remaining time
        assert_eq!(m.decide(Some(0)), TickDecision::Inactive);
    }

    #[test]
    fn test_failure_disables() {
        let mut m = machine(3, true);
        m.record_failure("HTTP 500".to_string());
        assert_eq!(
            m.state(),
            &SchedulerState::Failed {
                reason: "HTTP 500".to_string()
            }
        );
        assert!(!m.config().enabled);
        assert_eq!(m.decide(Some(0)), TickDecision::Inactive);
    }

    #[test]
    fn test_selection_change() {
        let mut m = machine(3, true);
        assert!(m.selection_changed(true));
        assert_eq!(m.state(), &SchedulerState::Active);

        assert!(!m.selection_changed(false));
        assert_eq!(m.state(), &SchedulerState::Disabled);

        // Disabled schedulers stay disabled
        assert!(!m.selection_changed(true));
        assert_eq!(m.state(), &SchedulerState::Disabled);
    }

    #[test]
    fn test_reenable_after_exhaustion_resets_counter() {
        let mut m = machine(1, true);
        m.record_success();
        assert_eq!(m.state(), &SchedulerState::Exhausted);

        m.enable(4, true, Utc::now()).unwrap();
        assert_eq!(m.state(), &SchedulerState::Active);
        assert_eq!(m.config().current_refreshes, 0);
        assert_eq!(m.config().max_refreshes, 4);
    }

    #[test]
    fn test_restore() {
        let mut cfg = AutoRefreshConfig::new(3);
        cfg.start(3, Utc::now());

        assert_eq!(
            AutoRefresh::restore(cfg.clone(), true, 60).state(),
            &SchedulerState::Active
        );
        assert_eq!(
            AutoRefresh::restore(cfg.clone(), false, 60).state(),
            &SchedulerState::Armed
        );

        cfg.current_refreshes = 3;
        let exhausted = AutoRefresh::restore(cfg, true, 60);
        assert_eq!(exhausted.state(), &SchedulerState::Exhausted);
        assert!(!exhausted.config().enabled);

        assert_eq!(
            AutoRefresh::restore(AutoRefreshConfig::new(3), true, 60).state(),
            &SchedulerState::Disabled
        );
    }

    struct CountingTarget {
        ticks: AtomicU32,
        stop_after: u32,
    }

    #[async_trait]
    impl RefreshTarget for CountingTarget {
        async fn refresh_tick(&self, cancel: &CancellationToken) {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.stop_after {
                cancel.cancel();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_when_target_cancels() {
        let target = Arc::new(CountingTarget {
            ticks: AtomicU32::new(0),
            stop_after: 3,
        });
        let task = spawn_refresh_loop(Arc::downgrade(&target), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(target.ticks.load(Ordering::SeqCst), 3);
        assert!(task.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_loop_never_ticks_again() {
        let target = Arc::new(CountingTarget {
            ticks: AtomicU32::new(0),
            stop_after: u32::MAX,
        });
        let task = spawn_refresh_loop(Arc::downgrade(&target), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(15)).await;
        let seen = target.ticks.load(Ordering::SeqCst);
        assert_eq!(seen, 1);

        task.stop();
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(target.ticks.load(Ordering::SeqCst), seen);
    }
}
