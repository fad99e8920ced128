//! Token configurations and their stored credentials.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore                    │
//! │  - list / upsert / remove / select       │
//! │  - explicit plaintext ↔ encrypted saves  │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt → CredentialCache)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - PBKDF2-HMAC-SHA256 (100k iterations)  │
//! │  - AES-256-GCM, fresh salt + IV per call │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       ConfigRepository (port)            │
//! │  - SqliteRepository                      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - An encrypted config stores one blob holding all four credential values;
//!   they are never readable individually while encrypted
//! - Decrypted bundles are zeroed on drop and whenever the cache is cleared
//! - Passwords and derived keys are never persisted

use crate::error::{Result, TokenError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

mod cache;
mod encryption;
mod storage;
mod store;

pub use cache::CredentialCache;
pub use encryption::{decrypt, encrypt, EncryptedBlob, KDF_ITERATIONS};
pub use storage::{ConfigRepository, SqliteRepository};
pub use store::CredentialStore;

/// The four secret values exchanged for an access token.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CredentialBundle {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl CredentialBundle {
    /// Fails with a validation error naming the first empty field.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("username", &self.username),
            ("password", &self.password),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(TokenError::Validation(format!("{} is required", name)));
            }
        }
        Ok(())
    }

    /// Seals the bundle as JSON under `password`.
    pub fn seal(&self, password: &str) -> Result<EncryptedBlob> {
        let json = zeroize::Zeroizing::new(serde_json::to_string(self)?);
        encrypt(&json, password)
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// How a config's credentials are kept at rest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredCredentials {
    Plaintext(CredentialBundle),
    /// JSON-serialized [`CredentialBundle`] sealed with a password.
    Encrypted(EncryptedBlob),
}

/// Body shape used when POSTing to the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEncoding {
    #[default]
    Json,
    /// `application/x-www-form-urlencoded` with `grant_type=password`
    Form,
}

/// A named credential set and the endpoint it is exchanged against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenConfig {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub credentials: StoredCredentials,
    #[serde(default)]
    pub encoding: RequestEncoding,
    /// Read expiry from the token's embedded `exp` claim.
    #[serde(default)]
    pub use_jwt_expiry: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TokenConfig {
    pub fn is_encrypted(&self) -> bool {
        matches!(self.credentials, StoredCredentials::Encrypted(_))
    }

    /// Checks the fields required before a save.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(TokenError::Validation("id is required".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(TokenError::Validation("name is required".to_string()));
        }
        validate_endpoint(&self.endpoint)
    }

    /// Returns the plaintext bundle, or `None` when the config is encrypted.
    pub fn plaintext_credentials(&self) -> Option<&CredentialBundle> {
        match &self.credentials {
            StoredCredentials::Plaintext(bundle) => Some(bundle),
            StoredCredentials::Encrypted(_) => None,
        }
    }

    /// Opens the credentials with a password.
    ///
    /// Plaintext configs ignore the password and return a copy.
    pub fn unseal(&self, password: &str) -> Result<CredentialBundle> {
        match &self.credentials {
            StoredCredentials::Plaintext(bundle) => Ok(bundle.clone()),
            StoredCredentials::Encrypted(blob) => {
                let json = decrypt(blob, password)?;
                // A blob that opens but is not a bundle was not written by us.
                serde_json::from_str(&json).map_err(|_| TokenError::Decryption)
            }
        }
    }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let url = reqwest::Url::parse(endpoint)
        .map_err(|e| TokenError::Validation(format!("endpoint is not a valid URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(TokenError::Validation(format!(
            "endpoint scheme must be http or https, got {}",
            other
        ))),
    }
}

/// User-entered fields for creating or editing a config.
///
/// Turned into a [`TokenConfig`] by [`CredentialStore::save_with_password`]
/// or [`CredentialStore::save_without_password`].
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigDraft {
    /// Existing id when editing; a new id is generated otherwise.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub endpoint: String,
    pub credentials: CredentialBundle,
    #[serde(default)]
    pub encoding: RequestEncoding,
    #[serde(default)]
    pub use_jwt_expiry: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> CredentialBundle {
        CredentialBundle {
            client_id: "client".to_string(),
            client_secret: "client-secret".to_string(),
            username: "alice".to_string(),
            password: "pa55word".to_string(),
        }
    }

    fn config(credentials: StoredCredentials) -> TokenConfig {
        TokenConfig {
            id: "cfg-1".to_string(),
            name: "Staging".to_string(),
            endpoint: "https://auth.example.com/token".to_string(),
            credentials,
            encoding: RequestEncoding::Json,
            use_jwt_expiry: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_bundle_validation() {
        assert!(bundle().validate().is_ok());

        let mut missing = bundle();
        missing.client_secret.clear();
        match missing.validate() {
            Err(TokenError::Validation(msg)) => assert!(msg.contains("client_secret")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let output = format!("{:?}", bundle());
        assert!(!output.contains("client-secret"));
        assert!(!output.contains("pa55word"));
        assert!(output.contains("alice"));
    }

    #[test]
    fn test_config_validation() {
        assert!(config(StoredCredentials::Plaintext(bundle())).validate().is_ok());

        let mut bad = config(StoredCredentials::Plaintext(bundle()));
        bad.endpoint = "ftp://example.com".to_string();
        assert!(matches!(bad.validate(), Err(TokenError::Validation(_))));

        bad.endpoint = "not a url".to_string();
        assert!(matches!(bad.validate(), Err(TokenError::Validation(_))));

        let mut unnamed = config(StoredCredentials::Plaintext(bundle()));
        unnamed.name = "  ".to_string();
        assert!(matches!(unnamed.validate(), Err(TokenError::Validation(_))));
    }

    #[test]
    fn test_unseal_encrypted() {
        let json = serde_json::to_string(&bundle()).unwrap();
        let blob = encrypt(&json, "master").unwrap();
        let cfg = config(StoredCredentials::Encrypted(blob));

        assert!(cfg.is_encrypted());
        assert!(cfg.plaintext_credentials().is_none());
        assert_eq!(cfg.unseal("master").unwrap(), bundle());
        assert!(matches!(cfg.unseal("nope"), Err(TokenError::Decryption)));
    }

    #[test]
    fn test_stored_credentials_serialization() {
        let cfg = config(StoredCredentials::Plaintext(bundle()));
        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(value["credentials"]["kind"], "plaintext");
        assert_eq!(value["encoding"], "json");

        let back: TokenConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.credentials, cfg.credentials);
    }
}
