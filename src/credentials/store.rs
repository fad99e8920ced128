//! Named token configs, the current selection, and the decrypted-credential cache.

use super::{
    ConfigDraft, ConfigRepository, CredentialBundle, CredentialCache, EncryptedBlob,
    StoredCredentials, TokenConfig,
};
use crate::error::{Result, TokenError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Holds all token configs and selects among them.
///
/// Every mutation writes through to the repository before returning. At most
/// one config is selected; changing the selection zeroes the credential cache.
///
/// # Storage mode
/// Whether a config is encrypted changes only through
/// [`save_with_password`](Self::save_with_password) and
/// [`save_without_password`](Self::save_without_password). A plain
/// [`upsert`](Self::upsert) that would flip the mode is rejected.
pub struct CredentialStore {
    repo: Arc<dyn ConfigRepository>,
    configs: Vec<TokenConfig>,
    selected: Option<String>,
    cache: CredentialCache,
}

impl CredentialStore {
    /// Loads configs and selection from the repository.
    ///
    /// A persisted selection pointing at a missing config is dropped.
    pub fn load(repo: Arc<dyn ConfigRepository>, cache: CredentialCache) -> Result<Self> {
        let configs = repo.load_configs()?;
        let mut selected = repo.load_selected()?;

        if let Some(id) = &selected {
            if !configs.iter().any(|c| &c.id == id) {
                debug!(config_id = %id, "Dropping selection of missing config");
                selected = None;
                repo.save_selected(None)?;
            }
        }

        info!(config_count = configs.len(), selected = ?selected, "Credential store loaded");

        Ok(Self {
            repo,
            configs,
            selected,
            cache,
        })
    }

    pub fn list(&self) -> &[TokenConfig] {
        &self.configs
    }

    pub fn get(&self, id: &str) -> Option<&TokenConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    /// Inserts or replaces a config by id, keeping its storage mode.
    pub fn upsert(&mut self, config: TokenConfig) -> Result<TokenConfig> {
        config.validate()?;
        if let StoredCredentials::Plaintext(bundle) = &config.credentials {
            bundle.validate()?;
        }

        let (mode_changed, credentials_changed) = match self.get(&config.id) {
            Some(existing) => (
                existing.is_encrypted() != config.is_encrypted(),
                existing.credentials != config.credentials,
            ),
            None => (false, false),
        };
        if mode_changed {
            return Err(TokenError::Validation(
                "changing between encrypted and plaintext storage requires an explicit save"
                    .to_string(),
            ));
        }
        if credentials_changed {
            self.invalidate_cache_for(&config.id);
        }

        self.write(config)
    }

    /// Saves a draft with its credentials sealed under `password`.
    pub fn save_with_password(&mut self, draft: ConfigDraft, password: &str) -> Result<TokenConfig> {
        draft.credentials.validate()?;
        let blob = draft.credentials.seal(password)?;
        self.save_sealed(draft, blob)
    }

    /// Saves a draft whose credentials were already sealed into `blob`.
    ///
    /// Lets callers run the key derivation away from the store lock.
    pub fn save_sealed(&mut self, draft: ConfigDraft, blob: EncryptedBlob) -> Result<TokenConfig> {
        let config = self.config_from_draft(draft, StoredCredentials::Encrypted(blob));
        config.validate()?;

        self.invalidate_cache_for(&config.id);
        info!(config_id = %config.id, "Saving config with encrypted credentials");
        self.write(config)
    }

    /// Saves a draft with plaintext credentials.
    pub fn save_without_password(&mut self, draft: ConfigDraft) -> Result<TokenConfig> {
        draft.credentials.validate()?;
        let credentials = StoredCredentials::Plaintext(draft.credentials.clone());
        let config = self.config_from_draft(draft, credentials);
        config.validate()?;

        self.invalidate_cache_for(&config.id);
        info!(config_id = %config.id, "Saving config with plaintext credentials");
        self.write(config)
    }

    /// Removes a config. Removing the selected config clears the selection.
    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let deleted = self.repo.delete_config(id)?;
        let before = self.configs.len();
        self.configs.retain(|c| c.id != id);

        if self.selected.as_deref() == Some(id) {
            self.select(None)?;
        }

        Ok(deleted || self.configs.len() != before)
    }

    /// Selects a config (or none). Returns whether the selection changed.
    ///
    /// Any change zeroes the cached credentials, whatever config they belonged to.
    pub fn select(&mut self, id: Option<&str>) -> Result<bool> {
        if let Some(id) = id {
            if self.get(id).is_none() {
                return Err(TokenError::NotFound(id.to_string()));
            }
        }
        if self.selected.as_deref() == id {
            return Ok(false);
        }

        self.cache.clear();
        self.repo.save_selected(id)?;
        self.selected = id.map(str::to_string);
        info!(selected = ?self.selected, "Selection changed");
        Ok(true)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected(&self) -> Option<&TokenConfig> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    /// Caches a bundle decrypted outside the store.
    ///
    /// Fails with `Superseded` when `config_id` is no longer selected, so a
    /// slow decrypt never lands in the cache of a different selection.
    pub fn cache_unlocked(&mut self, config_id: &str, bundle: CredentialBundle) -> Result<()> {
        if self.selected.as_deref() != Some(config_id) {
            return Err(TokenError::Superseded(config_id.to_string()));
        }
        if self.get(config_id).is_some_and(|c| c.is_encrypted()) {
            self.cache.store(config_id, bundle);
            info!(config_id = %config_id, "Credentials unlocked");
        }
        Ok(())
    }

    /// Zeroes the cache. Returns whether anything was cached.
    pub fn lock(&mut self) -> bool {
        self.cache.clear()
    }

    pub fn is_unlocked(&mut self) -> bool {
        match self.selected.clone() {
            Some(id) => self.cache.contains(&id),
            None => false,
        }
    }

    /// Credentials for the selected config without asking for a password:
    /// the plaintext bundle, or the cached decrypt.
    pub fn available_credentials(&mut self) -> Option<(TokenConfig, CredentialBundle)> {
        let config = self.selected()?.clone();
        let bundle = match config.plaintext_credentials() {
            Some(bundle) => bundle.clone(),
            None => self.cache.get(&config.id)?,
        };
        Some((config, bundle))
    }

    pub fn has_available_credentials(&mut self) -> bool {
        let encrypted = match self.selected() {
            Some(config) => config.is_encrypted(),
            None => return false,
        };
        !encrypted || self.is_unlocked()
    }

    /// Upserts many configs at once (import). Returns how many were written.
    pub fn import(&mut self, configs: Vec<TokenConfig>) -> Result<usize> {
        let mut written = 0;
        for config in configs {
            config.validate()?;
            self.invalidate_cache_for(&config.id);
            self.write(config)?;
            written += 1;
        }
        Ok(written)
    }

    fn config_from_draft(&self, draft: ConfigDraft, credentials: StoredCredentials) -> TokenConfig {
        let now = Utc::now();
        let id = draft
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = self.get(&id).map(|c| c.created_at).unwrap_or(now);

        TokenConfig {
            id,
            name: draft.name.clone(),
            endpoint: draft.endpoint.clone(),
            credentials,
            encoding: draft.encoding,
            use_jwt_expiry: draft.use_jwt_expiry,
            created_at,
            updated_at: now,
        }
    }

    fn invalidate_cache_for(&mut self, id: &str) {
        if self.cache.cached_config_id() == Some(id) {
            self.cache.clear();
        }
    }

    fn write(&mut self, mut config: TokenConfig) -> Result<TokenConfig> {
        config.updated_at = Utc::now();
        self.repo.save_config(&config)?;

        match self.configs.iter_mut().find(|c| c.id == config.id) {
            Some(slot) => *slot = config.clone(),
            None => self.configs.push(config.clone()),
        }
        debug!(config_id = %config.id, encrypted = config.is_encrypted(), "Config saved");
        Ok(config)
    }
}
