//! In-memory cache of decrypted credentials.
//!
//! Holds at most one bundle, keyed by the config it was decrypted from.
//! Clearing zeroes the bundle in place before it is dropped.

use super::CredentialBundle;
use chrono::{DateTime, Duration, Utc};
use zeroize::Zeroize;

struct CacheEntry {
    config_id: String,
    bundle: CredentialBundle,
    unlocked_at: DateTime<Utc>,
}

/// Decrypted credentials for the selected config.
///
/// Created by a successful password-gated decrypt, destroyed on lock, on
/// selection change, when its optional lifetime runs out, or on drop.
pub struct CredentialCache {
    entry: Option<CacheEntry>,
    ttl: Option<Duration>,
}

impl CredentialCache {
    /// `ttl` of `None` keeps the entry until it is explicitly cleared.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self { entry: None, ttl }
    }

    /// Caches `bundle` for `config_id`, zeroing any previous entry first.
    pub fn store(&mut self, config_id: &str, bundle: CredentialBundle) {
        self.clear();
        self.entry = Some(CacheEntry {
            config_id: config_id.to_string(),
            bundle,
            unlocked_at: Utc::now(),
        });
    }

    /// Returns a copy of the cached bundle for `config_id`.
    pub fn get(&mut self, config_id: &str) -> Option<CredentialBundle> {
        self.get_at(config_id, Utc::now())
    }

    pub fn get_at(&mut self, config_id: &str, now: DateTime<Utc>) -> Option<CredentialBundle> {
        self.expire(now);
        self.entry
            .as_ref()
            .filter(|entry| entry.config_id == config_id)
            .map(|entry| entry.bundle.clone())
    }

    pub fn contains(&mut self, config_id: &str) -> bool {
        self.expire(Utc::now());
        self.entry
            .as_ref()
            .is_some_and(|entry| entry.config_id == config_id)
    }

    /// Id of the config whose credentials are cached, if any.
    pub fn cached_config_id(&self) -> Option<&str> {
        self.entry.as_ref().map(|entry| entry.config_id.as_str())
    }

    /// Zeroes and drops the cached bundle. Returns whether anything was cached.
    pub fn clear(&mut self) -> bool {
        match self.entry.take() {
            Some(mut entry) => {
                entry.bundle.zeroize();
                tracing::debug!(config_id = %entry.config_id, "Decrypted credentials cleared");
                true
            }
            None => false,
        }
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        let expired = match (&self.entry, self.ttl) {
            (Some(entry), Some(ttl)) => now - entry.unlocked_at >= ttl,
            _ => false,
        };
        if expired {
            self.clear();
        }
    }
}

impl Drop for CredentialCache {
    fn drop(&mut self) {
        self.clear();
    }
}
