//! Credential-for-token exchange.
//!
//! Sends the four credential values to the config's endpoint as JSON or as a
//! `grant_type=password` form, then resolves an absolute expiry from whatever
//! the endpoint gives back.

use super::{jwt, AccessToken};
use crate::credentials::{CredentialBundle, RequestEncoding, TokenConfig};
use crate::error::{Result, TokenError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Lifetime assumed when neither the token nor the response states one (15 minutes).
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 900;

/// Produces access tokens from a config and its decrypted credentials.
///
/// The token manager only talks to this trait, so schedulers can be driven
/// by an in-process generator in tests.
#[async_trait]
pub trait TokenGenerator: Send + Sync {
    async fn generate(
        &self,
        config: &TokenConfig,
        credentials: &CredentialBundle,
    ) -> Result<AccessToken>;
}

#[derive(Serialize)]
struct JsonTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct FormTokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    username: &'a str,
    password: &'a str,
}

/// Success response shapes accepted from token endpoints.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum TokenResponse {
    /// Standard OAuth 2.0: `{"access_token": "...", "expires_in": 3600}`
    OAuth {
        access_token: String,
        #[serde(default)]
        expires_in: Option<serde_json::Value>,
    },
    /// Bare: `{"token": "..."}`
    Bare {
        token: String,
        #[serde(default)]
        expires_in: Option<serde_json::Value>,
    },
}

impl TokenResponse {
    fn into_parts(self) -> (String, Option<i64>) {
        let (token, expires_in) = match self {
            TokenResponse::OAuth {
                access_token,
                expires_in,
            } => (access_token, expires_in),
            TokenResponse::Bare { token, expires_in } => (token, expires_in),
        };
        (token, expires_in.as_ref().and_then(lifetime_seconds))
    }
}

/// Accepts `3600`, `3600.0` and `"3600"`; anything else counts as absent.
fn lifetime_seconds(value: &serde_json::Value) -> Option<i64> {
    let seconds = match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    (seconds > 0).then_some(seconds)
}

/// Resolves the absolute expiry of a freshly issued token.
///
/// Priority:
/// 1. JWT mode: the token's `exp` claim, or `now + default_lifetime` if unreadable
/// 2. `now + lifetime` when the response declared one
/// 3. `now + default_lifetime`
pub fn resolve_expiry(
    token: &str,
    lifetime_secs: Option<i64>,
    use_jwt_expiry: bool,
    now: DateTime<Utc>,
    default_lifetime: Duration,
) -> DateTime<Utc> {
    if use_jwt_expiry {
        return match jwt::expiry_claim(token) {
            Some(exp) => exp,
            None => {
                warn!("Token has no readable exp claim, using default lifetime");
                now + default_lifetime
            }
        };
    }

    // Lifetimes too large to represent count as absent
    lifetime_secs
        .and_then(Duration::try_seconds)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now + default_lifetime)
}

/// Parses a 2xx response body into a token value and declared lifetime.
fn parse_token_response(body: &str) -> Result<(String, Option<i64>)> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|_| TokenError::MissingToken)?;
    let (token, lifetime) = response.into_parts();
    if token.trim().is_empty() {
        return Err(TokenError::MissingToken);
    }
    Ok((token, lifetime))
}

/// [`TokenGenerator`] that talks HTTP to the config's endpoint.
#[derive(Clone)]
pub struct HttpTokenGenerator {
    client: reqwest::Client,
    default_lifetime: Duration,
}

impl HttpTokenGenerator {
    /// # Arguments
    /// * `request_timeout` - Per-request timeout; elapsed requests fail as network errors
    /// * `default_lifetime_secs` - Lifetime used when the endpoint does not state one
    pub fn new(request_timeout: std::time::Duration, default_lifetime_secs: i64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            default_lifetime: Duration::seconds(default_lifetime_secs),
        })
    }
}

#[async_trait]
impl TokenGenerator for HttpTokenGenerator {
    async fn generate(
        &self,
        config: &TokenConfig,
        credentials: &CredentialBundle,
    ) -> Result<AccessToken> {
        config.validate()?;
        credentials.validate()?;

        debug!(
            config_id = %config.id,
            endpoint = %config.endpoint,
            encoding = ?config.encoding,
            "Requesting access token"
        );

        let request = self
            .client
            .post(&config.endpoint)
            .header("Accept", "application/json");

        let request = match config.encoding {
            RequestEncoding::Json => request.json(&JsonTokenRequest {
                client_id: &credentials.client_id,
                client_secret: &credentials.client_secret,
                username: &credentials.username,
                password: &credentials.password,
            }),
            RequestEncoding::Form => request.form(&FormTokenRequest {
                grant_type: "password",
                client_id: &credentials.client_id,
                client_secret: &credentials.client_secret,
                username: &credentials.username,
                password: &credentials.password,
            }),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TokenError::Network(format!("request to {} timed out", config.endpoint))
            } else {
                TokenError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());

        if !status.is_success() {
            warn!(config_id = %config.id, status = status.as_u16(), "Token request rejected");
            return Err(TokenError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        let (value, lifetime) = parse_token_response(&body)?;
        let now = Utc::now();
        let expires_at = resolve_expiry(
            &value,
            lifetime,
            config.use_jwt_expiry,
            now,
            self.default_lifetime,
        );

        info!(
            config_id = %config.id,
            expires_at = %expires_at,
            declared_lifetime = ?lifetime,
            "Access token generated"
        );

        Ok(AccessToken {
            value,
            config_id: config.id.clone(),
            expires_at,
            generated_at: now,
            refresh_count: None,
        })
    }
}
