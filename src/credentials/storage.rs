//! Persistence port for token configs and lifecycle state.
//!
//! The credential store and token manager only see [`ConfigRepository`];
//! [`SqliteRepository`] is the bundled implementation. Encrypted configs are
//! written exactly as sealed, so the database never holds their plaintext.

use super::TokenConfig;
use crate::error::Result;
use crate::refresh::AutoRefreshConfig;
use crate::token::AccessToken;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SELECTED_KEY: &str = "selected_config";
const TOKEN_KEY: &str = "access_token";
const REFRESH_KEY: &str = "auto_refresh";

/// Keyed storage for everything that survives a restart.
///
/// Implementations must write through immediately; callers treat a returned
/// `Ok` as durable.
pub trait ConfigRepository: Send + Sync {
    fn load_configs(&self) -> Result<Vec<TokenConfig>>;
    /// Inserts or replaces by id.
    fn save_config(&self, config: &TokenConfig) -> Result<()>;
    /// Returns whether a row was deleted.
    fn delete_config(&self, id: &str) -> Result<bool>;

    fn load_selected(&self) -> Result<Option<String>>;
    fn save_selected(&self, id: Option<&str>) -> Result<()>;

    fn load_token(&self) -> Result<Option<AccessToken>>;
    fn save_token(&self, token: Option<&AccessToken>) -> Result<()>;

    fn load_refresh(&self) -> Result<Option<AutoRefreshConfig>>;
    fn save_refresh(&self, config: &AutoRefreshConfig) -> Result<()>;
}

/// SQLite-backed [`ConfigRepository`].
///
/// # Schema
/// ```sql
/// CREATE TABLE token_configs (
///     id TEXT PRIMARY KEY,
///     name TEXT NOT NULL,
///     data TEXT NOT NULL,        -- JSON TokenConfig (credentials sealed if encrypted)
///     created_at TEXT NOT NULL,  -- ISO 8601
///     updated_at TEXT NOT NULL   -- ISO 8601
/// );
/// CREATE TABLE settings (
///     key TEXT PRIMARY KEY,
///     value TEXT NOT NULL        -- JSON
/// );
/// ```
///
/// # Thread Safety
/// - Connection is wrapped in a Mutex
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Creates or opens a repository. `":memory:"` gives a throwaway database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS token_configs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put_setting(&self, key: &str, value: Option<&str>) -> Result<()> {
        let conn = self.conn();
        match value {
            Some(value) => {
                conn.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )?;
            }
            None => {
                conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
            }
        }
        Ok(())
    }
}

impl ConfigRepository for SqliteRepository {
    fn load_configs(&self) -> Result<Vec<TokenConfig>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT data FROM token_configs ORDER BY created_at, id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(Into::into))
            .collect()
    }

    fn save_config(&self, config: &TokenConfig) -> Result<()> {
        let data = serde_json::to_string(config)?;
        self.conn().execute(
            r#"
            INSERT INTO token_configs (id, name, data, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
            params![
                config.id,
                config.name,
                data,
                config.created_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete_config(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM token_configs WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn load_selected(&self) -> Result<Option<String>> {
        self.get_setting(SELECTED_KEY)?
            .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    fn save_selected(&self, id: Option<&str>) -> Result<()> {
        let raw = id.map(serde_json::to_string).transpose()?;
        self.put_setting(SELECTED_KEY, raw.as_deref())
    }

    fn load_token(&self) -> Result<Option<AccessToken>> {
        self.get_setting(TOKEN_KEY)?
            .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    fn save_token(&self, token: Option<&AccessToken>) -> Result<()> {
        let raw = token.map(serde_json::to_string).transpose()?;
        self.put_setting(TOKEN_KEY, raw.as_deref())
    }

    fn load_refresh(&self) -> Result<Option<AutoRefreshConfig>> {
        self.get_setting(REFRESH_KEY)?
            .map(|raw| serde_json::from_str(&raw).map_err(Into::into))
            .transpose()
    }

    fn save_refresh(&self, config: &AutoRefreshConfig) -> Result<()> {
        let raw = serde_json::to_string(config)?;
        self.put_setting(REFRESH_KEY, Some(&raw))
    }
}
