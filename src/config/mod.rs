use serde::Deserialize;

use crate::token::DEFAULT_TOKEN_LIFETIME_SECS;

/// Complete tokensmith configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub token: TokenSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub countdown: CountdownSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "tokensmith.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Token endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSettings {
    /// Lifetime assumed when the endpoint does not state one (seconds)
    #[serde(default = "default_lifetime")]
    pub default_lifetime_seconds: i64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_lifetime() -> i64 {
    DEFAULT_TOKEN_LIFETIME_SECS
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            default_lifetime_seconds: default_lifetime(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Auto-refresh scheduler settings
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshSettings {
    /// How often the scheduler checks remaining validity (seconds)
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    /// Refresh once remaining validity is at or below this (seconds)
    #[serde(default = "default_threshold")]
    pub threshold_seconds: i64,
    /// Bound used when enabling without an explicit maximum
    #[serde(default = "default_max_refreshes")]
    pub default_max_refreshes: u32,
}

fn default_check_interval() -> u64 {
    10
}

fn default_threshold() -> i64 {
    60
}

fn default_max_refreshes() -> u32 {
    10
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval(),
            threshold_seconds: default_threshold(),
            default_max_refreshes: default_max_refreshes(),
        }
    }
}

/// Countdown ticker settings
#[derive(Debug, Clone, Deserialize)]
pub struct CountdownSettings {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Remaining-time boundaries that trigger a notification (seconds)
    #[serde(default = "default_notify_thresholds")]
    pub notify_thresholds_seconds: Vec<i64>,
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_notify_thresholds() -> Vec<i64> {
    vec![300, 60]
}

impl Default for CountdownSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            notify_thresholds_seconds: default_notify_thresholds(),
        }
    }
}

/// Decrypted credential cache settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheSettings {
    /// Lifetime of a decrypted bundle; 0 keeps it until lock or selection change
    #[serde(default)]
    pub ttl_seconds: u64,
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<chrono::Duration> {
        (self.ttl_seconds > 0).then(|| chrono::Duration::seconds(self.ttl_seconds as i64))
    }
}

/// Local HTTP API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "127.0.0.1:3001".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            token: TokenSettings::default(),
            refresh: RefreshSettings::default(),
            countdown: CountdownSettings::default(),
            cache: CacheSettings::default(),
            api: ApiConfig::default(),
        }
    }
}

impl AppConfig {
    /// Applies `TOKENSMITH_*` environment overrides, ignoring unparseable values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(v) = std::env::var("TOKENSMITH_DB") {
            self.storage.database_path = v;
        }
        if let Ok(v) = std::env::var("TOKENSMITH_BIND") {
            self.api.bind_address = v;
        }
        if let Ok(v) = std::env::var("TOKENSMITH_MAX_REFRESHES") {
            if let Ok(n) = v.parse::<u32>() {
                self.refresh.default_max_refreshes = n;
            }
        }
        self
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.storage.database_path, "tokensmith.db");
        assert_eq!(config.token.default_lifetime_seconds, 900);
        assert_eq!(config.refresh.check_interval_seconds, 10);
        assert_eq!(config.refresh.threshold_seconds, 60);
        assert_eq!(config.countdown.tick_interval_ms, 1000);
        assert_eq!(config.countdown.notify_thresholds_seconds, vec![300, 60]);
        assert!(config.cache.ttl().is_none());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [storage]
            database_path = "/tmp/tokens.db"

            [token]
            default_lifetime_seconds = 600
            request_timeout_seconds = 5

            [refresh]
            check_interval_seconds = 15
            threshold_seconds = 120
            default_max_refreshes = 3

            [countdown]
            notify_thresholds_seconds = [120]

            [cache]
            ttl_seconds = 1800

            [api]
            bind_address = "127.0.0.1:9000"
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.database_path, "/tmp/tokens.db");
        assert_eq!(config.token.request_timeout_seconds, 5);
        assert_eq!(config.refresh.default_max_refreshes, 3);
        assert_eq!(config.countdown.notify_thresholds_seconds, vec![120]);
        assert_eq!(config.countdown.tick_interval_ms, 1000);
        assert_eq!(config.cache.ttl(), Some(chrono::Duration::minutes(30)));
        assert_eq!(config.api.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn test_partial_config() {
        // Missing sections use defaults
        let toml = r#"
            [refresh]
            threshold_seconds = 30
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.refresh.threshold_seconds, 30);
        assert_eq!(config.refresh.check_interval_seconds, 10);
        assert_eq!(config.token.default_lifetime_seconds, 900);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokensmith.toml");
        std::fs::write(&path, "[api]\nbind_address = \"0.0.0.0:4000\"\n").unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.api.bind_address, "0.0.0.0:4000");
        assert!(load_config("/nonexistent/tokensmith.toml").is_err());
    }
}
