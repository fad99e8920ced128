//! Remaining-time computation and threshold crossing.
//!
//! Everything here is a pure function of `(now, expires_at)`; the ticking
//! lives in the token manager's countdown task.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Time left before a token expires, clamped at zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Remaining {
    pub minutes: i64,
    pub seconds: i64,
}

impl Remaining {
    pub fn total_seconds(&self) -> i64 {
        self.minutes * 60 + self.seconds
    }

    pub fn is_zero(&self) -> bool {
        self.minutes == 0 && self.seconds == 0
    }
}

/// Minutes and seconds from `now` until `expires_at`, never negative.
///
/// A partial second counts as a whole one, so the result is zero exactly
/// when the token is no longer valid.
pub fn remaining(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Remaining {
    let left = expires_at - now;
    let mut total = left.num_seconds();
    if left > Duration::seconds(total) {
        total += 1;
    }
    let total = total.max(0);
    Remaining {
        minutes: total / 60,
        seconds: total % 60,
    }
}

/// Notification emitted when the countdown crosses a boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThresholdEvent {
    /// Remaining time dropped to or below `seconds`.
    Crossed { seconds: i64 },
    Expired,
}

/// Tracks which thresholds have fired for one token.
///
/// Each threshold fires at most once; `Expired` fires once when the
/// remaining time reaches zero. Build a new tracker for every new token.
#[derive(Clone, Debug)]
pub struct ExpiryTracker {
    expires_at: DateTime<Utc>,
    /// Descending, deduplicated.
    thresholds: Vec<i64>,
    fired: usize,
    expired: bool,
}

impl ExpiryTracker {
    pub fn new(expires_at: DateTime<Utc>, thresholds: &[i64]) -> Self {
        let mut thresholds: Vec<i64> = thresholds.iter().copied().filter(|t| *t > 0).collect();
        thresholds.sort_unstable_by(|a, b| b.cmp(a));
        thresholds.dedup();

        Self {
            expires_at,
            thresholds,
            fired: 0,
            expired: false,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Advances to `now`, returning the remaining time and any newly crossed thresholds.
    ///
    /// If several thresholds were skipped (e.g. the tracker was created for an
    /// already short-lived token) only the tightest one is reported.
    pub fn observe(&mut self, now: DateTime<Utc>) -> (Remaining, Option<ThresholdEvent>) {
        let left = remaining(now, self.expires_at);
        let total = left.total_seconds();

        if now >= self.expires_at {
            if self.expired {
                return (left, None);
            }
            self.expired = true;
            self.fired = self.thresholds.len();
            return (left, Some(ThresholdEvent::Expired));
        }

        let mut crossed = None;
        while self.fired < self.thresholds.len() && total <= self.thresholds[self.fired] {
            crossed = Some(self.thresholds[self.fired]);
            self.fired += 1;
        }

        (left, crossed.map(|seconds| ThresholdEvent::Crossed { seconds }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_remaining_split() {
        let now = Utc::now();
        let r = remaining(now, now + Duration::seconds(125));
        assert_eq!(r, Remaining { minutes: 2, seconds: 5 });
        assert_eq!(r.total_seconds(), 125);
    }

    #[test]
    fn test_partial_second_rounds_up() {
        let now = Utc::now();
        let r = remaining(now, now + Duration::milliseconds(60_500));
        assert_eq!(r, Remaining { minutes: 1, seconds: 1 });
    }

    #[test]
    fn test_not_expired_while_valid() {
        let now = Utc::now();
        let expires_at = now + Duration::milliseconds(500);
        let mut tracker = ExpiryTracker::new(expires_at, &[]);

        let (left, event) = tracker.observe(now);
        assert_eq!(left, Remaining { minutes: 0, seconds: 1 });
        assert_eq!(event, None);

        let (left, event) = tracker.observe(expires_at);
        assert!(left.is_zero());
        assert_eq!(event, Some(ThresholdEvent::Expired));
    }

    #[test]
    fn test_remaining_clamped_at_zero() {
        let now = Utc::now();
        let r = remaining(now, now - Duration::seconds(30));
        assert_eq!(r, Remaining::default());
        assert!(r.is_zero());
    }

    #[test]
    fn test_thresholds_fire_once() {
        let now = Utc::now();
        let mut tracker = ExpiryTracker::new(now + Duration::seconds(400), &[60, 300]);

        assert_eq!(tracker.observe(now).1, None);
        assert_eq!(
            tracker.observe(now + Duration::seconds(100)).1,
            Some(ThresholdEvent::Crossed { seconds: 300 })
        );
        assert_eq!(tracker.observe(now + Duration::seconds(101)).1, None);
        assert_eq!(
            tracker.observe(now + Duration::seconds(340)).1,
            Some(ThresholdEvent::Crossed { seconds: 60 })
        );
        assert_eq!(
            tracker.observe(now + Duration::seconds(400)).1,
            Some(ThresholdEvent::Expired)
        );
        assert_eq!(tracker.observe(now + Duration::seconds(500)).1, None);
    }

    #[test]
    fn test_skipped_thresholds_report_tightest() {
        let now = Utc::now();
        let mut tracker = ExpiryTracker::new(now + Duration::seconds(30), &[300, 60]);
        assert_eq!(
            tracker.observe(now).1,
            Some(ThresholdEvent::Crossed { seconds: 60 })
        );
    }

    #[test]
    fn test_already_expired_token() {
        let now = Utc::now();
        let mut tracker = ExpiryTracker::new(now - Duration::seconds(1), &[60]);
        let (left, event) = tracker.observe(now);
        assert!(left.is_zero());
        assert_eq!(event, Some(ThresholdEvent::Expired));
    }
}
