//! Bearer access tokens and the exchange that produces them.
//!
//! - [`exchange`] - POSTs credentials to a token endpoint and resolves expiry
//! - [`jwt`] - reads the `exp` claim embedded in a JWT
//! - [`expiry`] - pure remaining-time math and threshold tracking

pub mod exchange;
pub mod expiry;
pub mod jwt;

pub use exchange::{HttpTokenGenerator, TokenGenerator, DEFAULT_TOKEN_LIFETIME_SECS};
pub use expiry::{remaining, ExpiryTracker, Remaining, ThresholdEvent};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bearer token with an absolute expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub value: String,
    /// Config the token was generated from.
    pub config_id: String,
    pub expires_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    /// Scheduled refreshes that produced this token's lineage, when auto-refresh is on.
    #[serde(default)]
    pub refresh_count: Option<u32>,
}

impl AccessToken {
    /// True iff `now < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Remaining {
        remaining(now, self.expires_at)
    }

    /// Whole seconds left before expiry, never negative.
    pub fn seconds_left_at(&self, now: DateTime<Utc>) -> i64 {
        self.remaining_at(now).total_seconds()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("config_id", &self.config_id)
            .field("expires_at", &self.expires_at)
            .field("generated_at", &self.generated_at)
            .field("refresh_count", &self.refresh_count)
            .finish()
    }
}
