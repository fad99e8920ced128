//! Token service: the single owner of the credential store, the current
//! access token, and the background tasks that keep it alive.
//!
//! # Concurrency
//!
//! - State lives behind `std::sync::Mutex`es that are never held across an
//!   await. Lock order is refresh → store → token → tasks.
//! - One generation per config at a time. A second caller gets
//!   [`TokenError::InFlight`]; a scheduled check that finds one running
//!   skips its tick.
//! - Changing the selection cancels the refresh loop before the store
//!   switches, and a loop re-checks its cancellation token after every await.
//!   A superseded loop therefore never writes a token.

use crate::countdown::{spawn_countdown, CountdownTask};
use crate::events::{emit, ServiceEvent, EVENT_CHANNEL_CAPACITY};
use crate::scheduler::{
    spawn_refresh_loop, AutoRefresh, RefreshTarget, RefreshTask, SchedulerState, TickDecision,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokensmith::config::AppConfig;
use tokensmith::credentials::{
    ConfigDraft, ConfigRepository, CredentialCache, CredentialStore, EncryptedBlob, TokenConfig,
};
use tokensmith::export;
use tokensmith::refresh::AutoRefreshConfig;
use tokensmith::token::{AccessToken, Remaining, TokenGenerator};
use tokensmith::{Result, TokenError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tunables for the service, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub check_interval: Duration,
    pub threshold_secs: i64,
    pub default_max_refreshes: u32,
    pub countdown_tick: Duration,
    pub notify_thresholds: Vec<i64>,
    pub cache_ttl: Option<chrono::Duration>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ServiceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(config.refresh.check_interval_seconds.max(1)),
            threshold_secs: config.refresh.threshold_seconds,
            default_max_refreshes: config.refresh.default_max_refreshes,
            countdown_tick: Duration::from_millis(config.countdown.tick_interval_ms.max(1)),
            notify_thresholds: config.countdown.notify_thresholds_seconds.clone(),
            cache_ttl: config.cache.ttl(),
        }
    }
}

/// Snapshot of the current token for display.
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub present: bool,
    pub valid: bool,
    pub config_id: Option<String>,
    pub remaining: Remaining,
    pub expires_at: Option<DateTime<Utc>>,
    pub generated_at: Option<DateTime<Utc>>,
    pub refresh_count: Option<u32>,
}

/// Scheduler state plus its persisted bound.
#[derive(Debug, Clone, Serialize)]
pub struct AutoRefreshStatus {
    #[serde(flatten)]
    pub state: SchedulerState,
    pub max_refreshes: u32,
    pub current_refreshes: u32,
    pub remaining_refreshes: u32,
    pub started_at: Option<DateTime<Utc>>,
}

impl AutoRefreshStatus {
    fn from_machine(machine: &AutoRefresh) -> Self {
        let config = machine.config();
        Self {
            state: machine.state().clone(),
            max_refreshes: config.max_refreshes,
            current_refreshes: config.current_refreshes,
            remaining_refreshes: config.remaining_refreshes(),
            started_at: config.started_at,
        }
    }
}

/// Cloneable handle to the token lifecycle.
///
/// Must be created inside a Tokio runtime; restored tokens and auto-refresh
/// runs start their tasks immediately.
#[derive(Clone)]
pub struct TokenService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    repo: Arc<dyn ConfigRepository>,
    generator: Arc<dyn TokenGenerator>,
    settings: ServiceSettings,
    refresh: Mutex<AutoRefresh>,
    store: Mutex<CredentialStore>,
    token: Mutex<Option<AccessToken>>,
    refresh_task: Mutex<Option<RefreshTask>>,
    countdown_task: Mutex<Option<CountdownTask>>,
    in_flight: Mutex<HashSet<String>>,
    events: broadcast::Sender<ServiceEvent>,
    weak_self: Weak<ServiceInner>,
}

fn acquire<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks a config as generating until dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    config_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn try_acquire(set: &'a Mutex<HashSet<String>>, config_id: &str) -> Option<Self> {
        if !acquire(set).insert(config_id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            config_id: config_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        acquire(self.set).remove(&self.config_id);
    }
}

impl TokenService {
    /// Restores configs, selection, token and auto-refresh state from `repo`.
    pub fn new(
        repo: Arc<dyn ConfigRepository>,
        generator: Arc<dyn TokenGenerator>,
        settings: ServiceSettings,
    ) -> Result<Self> {
        let mut store =
            CredentialStore::load(Arc::clone(&repo), CredentialCache::new(settings.cache_ttl))?;
        let token = repo.load_token()?;
        let persisted = repo
            .load_refresh()?
            .unwrap_or_else(|| AutoRefreshConfig::new(settings.default_max_refreshes));
        let refresh = AutoRefresh::restore(
            persisted.clone(),
            store.has_available_credentials(),
            settings.threshold_secs,
        );
        if refresh.config() != &persisted {
            repo.save_refresh(refresh.config())?;
        }

        info!(
            token_restored = token.is_some(),
            auto_refresh = ?refresh.state(),
            "Token service initialized"
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new_cyclic(|weak_self| ServiceInner {
            repo,
            generator,
            settings,
            refresh: Mutex::new(refresh),
            store: Mutex::new(store),
            token: Mutex::new(token.clone()),
            refresh_task: Mutex::new(None),
            countdown_task: Mutex::new(None),
            in_flight: Mutex::new(HashSet::new()),
            events,
            weak_self: weak_self.clone(),
        });

        if let Some(token) = &token {
            inner.restart_countdown(token.expires_at);
        }
        if acquire(&inner.refresh).is_active() {
            inner.start_refresh_loop();
        }

        Ok(Self { inner })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.inner.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Configs
    // -----------------------------------------------------------------------

    pub fn list_configs(&self) -> Vec<TokenConfig> {
        acquire(&self.inner.store).list().to_vec()
    }

    pub fn get_config(&self, id: &str) -> Option<TokenConfig> {
        acquire(&self.inner.store).get(id).cloned()
    }

    pub fn selected_config(&self) -> Option<TokenConfig> {
        acquire(&self.inner.store).selected().cloned()
    }

    /// Replaces a config, keeping its storage mode.
    pub fn upsert_config(&self, config: TokenConfig) -> Result<TokenConfig> {
        let saved = acquire(&self.inner.store).upsert(config)?;
        self.inner.configs_changed();
        Ok(saved)
    }

    /// Saves a draft with credentials sealed under `password`.
    ///
    /// The key derivation runs on the blocking pool.
    pub async fn save_with_password(
        &self,
        draft: ConfigDraft,
        password: String,
    ) -> Result<TokenConfig> {
        draft.credentials.validate()?;
        let (draft, blob) = run_blocking(move || {
            let blob = draft.credentials.seal(&password)?;
            Ok((draft, blob))
        })
        .await?;
        let saved = acquire(&self.inner.store).save_sealed(draft, blob)?;
        self.inner.configs_changed();
        Ok(saved)
    }

    pub fn save_without_password(&self, draft: ConfigDraft) -> Result<TokenConfig> {
        let saved = acquire(&self.inner.store).save_without_password(draft)?;
        self.inner.configs_changed();
        Ok(saved)
    }

    /// Deletes a config. Deleting the selected one clears the selection.
    pub fn remove_config(&self, id: &str) -> Result<bool> {
        let was_selected = acquire(&self.inner.store).selected_id() == Some(id);
        if was_selected {
            self.inner.stop_refresh_loop();
        }

        let result = acquire(&self.inner.store).remove(id);
        let removed = match result {
            Ok(removed) => removed,
            Err(e) => {
                self.inner.resume_refresh_loop();
                return Err(e);
            }
        };
        emit(&self.inner.events, ServiceEvent::ConfigsChanged);
        if was_selected {
            self.inner.selection_changed(None);
        }
        Ok(removed)
    }

    /// Selects a config (or none). Returns whether the selection changed.
    ///
    /// A change zeroes decrypted credentials and rearms auto-refresh for the
    /// new config; the current token is kept.
    pub fn select_config(&self, id: Option<&str>) -> Result<bool> {
        {
            let store = acquire(&self.inner.store);
            if let Some(id) = id {
                if store.get(id).is_none() {
                    return Err(TokenError::NotFound(id.to_string()));
                }
            }
            if store.selected_id() == id {
                return Ok(false);
            }
        }

        self.inner.stop_refresh_loop();
        let result = acquire(&self.inner.store).select(id);
        let changed = match result {
            Ok(changed) => changed,
            Err(e) => {
                self.inner.resume_refresh_loop();
                return Err(e);
            }
        };
        if changed {
            self.inner.selection_changed(id.map(str::to_string));
        } else {
            self.inner.resume_refresh_loop();
        }
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Locking
    // -----------------------------------------------------------------------

    /// Decrypts the selected config's credentials into the cache.
    ///
    /// Plaintext configs unlock trivially. An `Armed` scheduler becomes `Active`.
    pub async fn unlock(&self, password: String) -> Result<()> {
        let config = self
            .selected_config()
            .ok_or_else(|| TokenError::Validation("no config selected".to_string()))?;
        self.inner.unlock_config(config, password).await
    }

    /// Zeroes decrypted credentials. Returns whether anything was cached.
    pub fn lock(&self) -> bool {
        let cleared = acquire(&self.inner.store).lock();
        if cleared {
            info!("Credentials locked");
            emit(&self.inner.events, ServiceEvent::CacheCleared);
        }
        self.inner.reconcile_scheduler();
        cleared
    }

    pub fn is_unlocked(&self) -> bool {
        acquire(&self.inner.store).is_unlocked()
    }

    // -----------------------------------------------------------------------
    // Tokens
    // -----------------------------------------------------------------------

    /// Generates a token for the selected config.
    ///
    /// `password` is only needed for an encrypted config whose credentials
    /// are not cached; a successful decrypt is cached. On failure the
    /// previous token is left untouched.
    pub async fn generate(&self, password: Option<String>) -> Result<AccessToken> {
        let found = {
            let mut store = acquire(&self.inner.store);
            if store.selected().is_none() {
                return Err(TokenError::Validation("no config selected".to_string()));
            }
            store.available_credentials()
        };

        let (config, bundle) = match (found, password) {
            (Some(found), _) => found,
            (None, Some(password)) => {
                let config = self.selected_config().ok_or_else(|| {
                    TokenError::Validation("no config selected".to_string())
                })?;
                self.inner.unlock_config(config, password).await?;
                acquire(&self.inner.store)
                    .available_credentials()
                    .ok_or(TokenError::Locked)?
            }
            (None, None) => return Err(TokenError::Locked),
        };

        let _guard = InFlightGuard::try_acquire(&self.inner.in_flight, &config.id)
            .ok_or_else(|| TokenError::InFlight(config.id.clone()))?;

        info!(config_id = %config.id, "Generating access token");
        let mut token = match self.inner.generator.generate(&config, &bundle).await {
            Ok(token) => token,
            Err(e) => {
                warn!(config_id = %config.id, error = %e, "Token generation failed");
                return Err(e);
            }
        };
        drop(bundle);

        if acquire(&self.inner.store).selected_id() != Some(config.id.as_str()) {
            debug!(config_id = %config.id, "Discarding token for deselected config");
            return Err(TokenError::Superseded(config.id));
        }

        {
            let refresh = acquire(&self.inner.refresh);
            if refresh.is_active() {
                token.refresh_count = Some(refresh.config().current_refreshes);
            }
        }
        self.inner.set_token(token.clone(), false)?;
        Ok(token)
    }

    /// Regenerates with cached or plaintext credentials only.
    pub async fn refresh(&self) -> Result<AccessToken> {
        self.generate(None).await
    }

    /// Discards the current token. Returns whether there was one.
    pub fn clear_token(&self) -> Result<bool> {
        let had = acquire(&self.inner.token).take().is_some();
        self.inner.repo.save_token(None)?;
        if let Some(task) = acquire(&self.inner.countdown_task).take() {
            task.stop();
        }
        if had {
            info!("Access token cleared");
            emit(&self.inner.events, ServiceEvent::TokenCleared);
        }
        Ok(had)
    }

    pub fn current_token(&self) -> Option<AccessToken> {
        acquire(&self.inner.token).clone()
    }

    pub fn is_token_valid(&self) -> bool {
        acquire(&self.inner.token)
            .as_ref()
            .is_some_and(|t| t.is_valid_at(Utc::now()))
    }

    /// Time left on the current token; zero when there is none.
    pub fn remaining(&self) -> Remaining {
        acquire(&self.inner.token)
            .as_ref()
            .map(|t| t.remaining_at(Utc::now()))
            .unwrap_or_default()
    }

    pub fn token_status(&self) -> TokenStatus {
        let now = Utc::now();
        let token = acquire(&self.inner.token).clone();
        match token {
            Some(t) => TokenStatus {
                present: true,
                valid: t.is_valid_at(now),
                config_id: Some(t.config_id.clone()),
                remaining: t.remaining_at(now),
                expires_at: Some(t.expires_at),
                generated_at: Some(t.generated_at),
                refresh_count: t.refresh_count,
            },
            None => TokenStatus {
                present: false,
                valid: false,
                config_id: None,
                remaining: Remaining::default(),
                expires_at: None,
                generated_at: None,
                refresh_count: None,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Auto-refresh
    // -----------------------------------------------------------------------

    /// Enables bounded auto-refresh for the selected config.
    ///
    /// Returns `Armed` when the config is encrypted and locked; the loop
    /// starts on the next unlock.
    pub fn enable_auto_refresh(&self, max_refreshes: Option<u32>) -> Result<AutoRefreshStatus> {
        let inner = &self.inner;
        let available = {
            let mut store = acquire(&inner.store);
            if store.selected().is_none() {
                return Err(TokenError::Validation("no config selected".to_string()));
            }
            store.has_available_credentials()
        };

        let max = max_refreshes.unwrap_or(inner.settings.default_max_refreshes);
        let status = {
            let mut refresh = acquire(&inner.refresh);
            refresh.enable(max, available, Utc::now())?;
            inner.repo.save_refresh(refresh.config())?;
            AutoRefreshStatus::from_machine(&refresh)
        };

        if status.state == SchedulerState::Active {
            inner.resume_refresh_loop();
        }
        emit(
            &inner.events,
            ServiceEvent::SchedulerChanged {
                state: status.state.clone(),
            },
        );
        Ok(status)
    }

    pub fn disable_auto_refresh(&self) -> Result<AutoRefreshStatus> {
        self.inner.stop_refresh_loop();
        let (changed, status) = {
            let mut refresh = acquire(&self.inner.refresh);
            let changed = refresh.disable();
            self.inner.repo.save_refresh(refresh.config())?;
            (changed, AutoRefreshStatus::from_machine(&refresh))
        };
        if changed {
            emit(
                &self.inner.events,
                ServiceEvent::SchedulerChanged {
                    state: status.state.clone(),
                },
            );
        }
        Ok(status)
    }

    pub fn auto_refresh_status(&self) -> AutoRefreshStatus {
        AutoRefreshStatus::from_machine(&acquire(&self.inner.refresh))
    }

    /// Runs one scheduler check now, as the loop would.
    ///
    /// Fails with `SchedulerExhausted` when the run already used its bound.
    pub async fn run_refresh_check(&self) -> Result<()> {
        {
            let refresh = acquire(&self.inner.refresh);
            if *refresh.state() == SchedulerState::Exhausted {
                return Err(TokenError::SchedulerExhausted {
                    max: refresh.config().max_refreshes,
                });
            }
        }
        let cancel = CancellationToken::new();
        self.inner.refresh_tick(&cancel).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Export / import
    // -----------------------------------------------------------------------

    /// Seals every config into one blob under `password`.
    pub async fn export_configs(&self, password: String) -> Result<EncryptedBlob> {
        let configs = self.list_configs();
        run_blocking(move || export::export_configs(&configs, &password)).await
    }

    /// Opens an exported blob and upserts its configs. Returns how many were written.
    pub async fn import_configs(&self, blob: EncryptedBlob, password: String) -> Result<usize> {
        let configs = run_blocking(move || export::import_configs(&blob, &password)).await?;
        let written = acquire(&self.inner.store).import(configs)?;
        info!(count = written, "Configs imported");
        self.inner.configs_changed();
        Ok(written)
    }

    /// Stops background tasks. Persisted state is left as is for the next start.
    pub fn shutdown(&self) {
        self.inner.stop_refresh_loop();
        if let Some(task) = acquire(&self.inner.countdown_task).take() {
            task.stop();
        }
        info!("Token service stopped");
    }
}

impl ServiceInner {
    fn configs_changed(&self) {
        emit(&self.events, ServiceEvent::ConfigsChanged);
        self.reconcile_scheduler();
    }

    /// Disables an active scheduler whose credentials disappeared.
    /// An `Armed` scheduler keeps waiting for its unlock.
    fn reconcile_scheduler(&self) {
        if !acquire(&self.refresh).is_active() {
            return;
        }
        let available = acquire(&self.store).has_available_credentials();
        if available {
            return;
        }
        self.stop_refresh_loop();
        let state = {
            let mut refresh = acquire(&self.refresh);
            if !refresh.credentials_lost() {
                return;
            }
            self.persist_refresh(&refresh);
            refresh.state().clone()
        };
        emit(&self.events, ServiceEvent::SchedulerChanged { state });
    }

    fn selection_changed(&self, config_id: Option<String>) {
        emit(&self.events, ServiceEvent::CacheCleared);
        emit(&self.events, ServiceEvent::SelectionChanged { config_id });

        let available = acquire(&self.store).has_available_credentials();
        let (start, state) = {
            let mut refresh = acquire(&self.refresh);
            let before = refresh.state().clone();
            let start = refresh.selection_changed(available);
            self.persist_refresh(&refresh);
            let state = refresh.state().clone();
            (start, (state != before).then_some(state))
        };

        if start {
            self.start_refresh_loop();
        }
        if let Some(state) = state {
            emit(&self.events, ServiceEvent::SchedulerChanged { state });
        }
    }

    async fn unlock_config(&self, config: TokenConfig, password: String) -> Result<()> {
        if !config.is_encrypted() {
            return Ok(());
        }
        let config_id = config.id.clone();
        let bundle = run_blocking(move || config.unseal(&password)).await?;
        acquire(&self.store).cache_unlocked(&config_id, bundle)?;
        emit(
            &self.events,
            ServiceEvent::Unlocked {
                config_id: config_id.clone(),
            },
        );

        let armed = {
            let mut refresh = acquire(&self.refresh);
            let armed = refresh.credentials_unlocked();
            if armed {
                self.persist_refresh(&refresh);
            }
            armed
        };
        if armed {
            info!(config_id = %config_id, "Auto-refresh active after unlock");
            self.start_refresh_loop();
            emit(
                &self.events,
                ServiceEvent::SchedulerChanged {
                    state: SchedulerState::Active,
                },
            );
        }
        Ok(())
    }

    fn set_token(&self, token: AccessToken, scheduled: bool) -> Result<()> {
        let expires_at = token.expires_at;
        let config_id = token.config_id.clone();

        self.repo.save_token(Some(&token))?;
        *acquire(&self.token) = Some(token);
        self.restart_countdown(expires_at);

        info!(config_id = %config_id, expires_at = %expires_at, scheduled, "Access token updated");
        emit(
            &self.events,
            ServiceEvent::TokenUpdated {
                config_id,
                expires_at,
                scheduled,
            },
        );
        Ok(())
    }

    fn restart_countdown(&self, expires_at: DateTime<Utc>) {
        let task = spawn_countdown(
            self.events.clone(),
            expires_at,
            &self.settings.notify_thresholds,
            self.settings.countdown_tick,
        );
        if let Some(old) = acquire(&self.countdown_task).replace(task) {
            old.stop();
        }
    }

    /// Replaces any running loop with a fresh one.
    fn start_refresh_loop(&self) {
        let task = spawn_refresh_loop(self.weak_self.clone(), self.settings.check_interval);
        if let Some(old) = acquire(&self.refresh_task).replace(task) {
            old.stop();
        }
        debug!("Refresh loop armed");
    }

    /// Starts a loop if the scheduler is active and none is running.
    fn resume_refresh_loop(&self) {
        if !acquire(&self.refresh).is_active() {
            return;
        }
        let running = acquire(&self.refresh_task)
            .as_ref()
            .is_some_and(|t| !t.is_cancelled());
        if !running {
            self.start_refresh_loop();
        }
    }

    fn stop_refresh_loop(&self) {
        if let Some(task) = acquire(&self.refresh_task).take() {
            task.stop();
        }
    }

    fn persist_refresh(&self, refresh: &AutoRefresh) {
        if let Err(e) = self.repo.save_refresh(refresh.config()) {
            error!(error = %e, "Failed to persist auto-refresh state");
        }
    }

    fn stop_after(&self, cancel: &CancellationToken, refresh: &AutoRefresh) {
        cancel.cancel();
        self.persist_refresh(refresh);
    }
}

#[async_trait]
impl RefreshTarget for ServiceInner {
    async fn refresh_tick(&self, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }

        let now = Utc::now();
        let selected = acquire(&self.store).selected_id().map(str::to_string);
        let seconds_left = acquire(&self.token)
            .as_ref()
            .filter(|t| Some(&t.config_id) == selected.as_ref())
            .map(|t| t.seconds_left_at(now));

        let decision = acquire(&self.refresh).decide(seconds_left);
        match decision {
            TickDecision::Inactive | TickDecision::Idle => return,
            TickDecision::Exhausted => {
                let max = {
                    let mut refresh = acquire(&self.refresh);
                    refresh.mark_exhausted();
                    self.stop_after(cancel, &refresh);
                    refresh.config().max_refreshes
                };
                emit(&self.events, ServiceEvent::SchedulerExhausted { max_refreshes: max });
                emit(
                    &self.events,
                    ServiceEvent::SchedulerChanged {
                        state: SchedulerState::Exhausted,
                    },
                );
                return;
            }
            TickDecision::Refresh => {}
        }

        let found = acquire(&self.store).available_credentials();
        let Some((config, bundle)) = found else {
            debug!("Scheduled refresh found no credentials");
            cancel.cancel();
            self.reconcile_scheduler();
            return;
        };

        let Some(_guard) = InFlightGuard::try_acquire(&self.in_flight, &config.id) else {
            debug!(config_id = %config.id, "Generation in flight, skipping scheduled refresh");
            return;
        };

        info!(config_id = %config.id, seconds_left = ?seconds_left, "Scheduled token refresh");
        let result = self.generator.generate(&config, &bundle).await;
        drop(bundle);

        let mut refresh = acquire(&self.refresh);
        if cancel.is_cancelled()
            || !refresh.is_active()
            || acquire(&self.store).selected_id() != Some(config.id.as_str())
        {
            debug!(config_id = %config.id, "Discarding result of superseded refresh");
            return;
        }

        match result {
            Ok(mut token) => {
                let exhausted = refresh.record_success();
                token.refresh_count = Some(refresh.config().current_refreshes);
                let max = refresh.config().max_refreshes;
                if exhausted {
                    self.stop_after(cancel, &refresh);
                } else {
                    self.persist_refresh(&refresh);
                }
                drop(refresh);

                if let Err(e) = self.set_token(token, true) {
                    error!(error = %e, "Failed to store refreshed token");
                }
                if exhausted {
                    emit(&self.events, ServiceEvent::SchedulerExhausted { max_refreshes: max });
                    emit(
                        &self.events,
                        ServiceEvent::SchedulerChanged {
                            state: SchedulerState::Exhausted,
                        },
                    );
                }
            }
            Err(e) => {
                warn!(config_id = %config.id, error = %e, "Scheduled refresh failed, disabling auto-refresh");
                refresh.record_failure(e.to_string());
                self.stop_after(cancel, &refresh);
                let state = refresh.state().clone();
                drop(refresh);

                emit(
                    &self.events,
                    ServiceEvent::RefreshFailed {
                        error: e.to_string(),
                    },
                );
                emit(&self.events, ServiceEvent::SchedulerChanged { state });
            }
        }
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        if let Some(task) = acquire(&self.refresh_task).take() {
            task.stop();
        }
        if let Some(task) = acquire(&self.countdown_task).take() {
            task.stop();
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TokenError::Validation(format!("background task failed: {}", e)))?
}
