//! Persisted auto-refresh settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bound and progress of automatic token refresh.
///
/// `current_refreshes` never exceeds `max_refreshes`; reaching the bound
/// switches `enabled` off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoRefreshConfig {
    pub enabled: bool,
    pub max_refreshes: u32,
    pub current_refreshes: u32,
    pub started_at: Option<DateTime<Utc>>,
}

impl AutoRefreshConfig {
    pub fn new(max_refreshes: u32) -> Self {
        Self {
            enabled: false,
            max_refreshes,
            current_refreshes: 0,
            started_at: None,
        }
    }

    /// Starts a fresh run with a zeroed counter.
    pub fn start(&mut self, max_refreshes: u32, now: DateTime<Utc>) {
        self.enabled = true;
        self.max_refreshes = max_refreshes;
        self.current_refreshes = 0;
        self.started_at = Some(now);
    }

    pub fn remaining_refreshes(&self) -> u32 {
        self.max_refreshes.saturating_sub(self.current_refreshes)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_refreshes >= self.max_refreshes
    }

    /// Counts one successful refresh. Returns `true` when the bound was reached,
    /// in which case auto-refresh is switched off.
    pub fn record_refresh(&mut self) -> bool {
        if self.current_refreshes < self.max_refreshes {
            self.current_refreshes += 1;
        }
        if self.is_exhausted() {
            self.enabled = false;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_never_exceeds_bound() {
        let mut config = AutoRefreshConfig::new(2);
        config.start(2, Utc::now());

        assert!(!config.record_refresh());
        assert!(config.enabled);
        assert!(config.record_refresh());
        assert!(!config.enabled);

        // Extra calls are absorbed
        assert!(config.record_refresh());
        assert_eq!(config.current_refreshes, 2);
        assert_eq!(config.remaining_refreshes(), 0);
    }

    #[test]
    fn test_start_resets_counter() {
        let mut config = AutoRefreshConfig::new(1);
        config.start(1, Utc::now());
        config.record_refresh();

        config.start(5, Utc::now());
        assert!(config.enabled);
        assert_eq!(config.current_refreshes, 0);
        assert_eq!(config.remaining_refreshes(), 5);
    }
}
