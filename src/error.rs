//! Error taxonomy for credential and token operations.
//!
//! Every failure a caller can act on has its own variant. In particular a
//! wrong password ([`TokenError::Decryption`]) is never reported as a parse
//! failure ([`TokenError::InvalidExport`] / [`TokenError::Serialization`]).

use thiserror::Error;

/// Errors raised by the credential store, encryption engine and token generator.
#[derive(Debug, Error)]
pub enum TokenError {
    /// A required field is missing or malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The token endpoint was unreachable or timed out.
    #[error("network error: {0}")]
    Network(String),

    /// The token endpoint answered with a non-2xx status.
    #[error("token endpoint returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A 2xx response carried no recognizable token field.
    #[error("token endpoint response did not contain an access token")]
    MissingToken,

    /// Wrong password or corrupted ciphertext.
    #[error("decryption failed: check your password")]
    Decryption,

    /// The auto-refresh bound has been reached.
    #[error("auto-refresh limit of {max} refreshes reached")]
    SchedulerExhausted { max: u32 },

    /// The selected configuration is encrypted and no decrypted credentials are cached.
    #[error("credentials are locked: unlock with your password first")]
    Locked,

    /// A generation for this configuration is already running.
    #[error("token generation already in progress for config {0}")]
    InFlight(String),

    /// The selection changed while an operation for the previous config was running.
    #[error("selection changed while working on config {0}")]
    Superseded(String),

    #[error("config not found: {0}")]
    NotFound(String),

    /// Payload decrypted correctly but is not a list of token configs.
    #[error("export payload is not a valid config list: {0}")]
    InvalidExport(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TokenError {
    /// HTTP status carried by an upstream failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TokenError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TokenError {
    fn from(e: reqwest::Error) -> Self {
        TokenError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TokenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decryption_message_mentions_password() {
        let msg = TokenError::Decryption.to_string();
        assert!(msg.contains("password"));
    }

    #[test]
    fn test_http_status() {
        let err = TokenError::Http {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.status(), Some(401));
        assert_eq!(TokenError::MissingToken.status(), None);
    }
}
