//! Local HTTP API for the UI.
//!
//! Routes:
//! - `GET /api/configs`, `POST /api/configs` - list (without credentials) / create
//! - `PUT /api/configs/:id`, `DELETE /api/configs/:id` - edit / remove
//! - `POST /api/configs/:id/select` - select a config
//! - `POST /api/unlock`, `POST /api/lock` - manage decrypted credentials
//! - `POST /api/token/generate`, `POST /api/token/refresh` - obtain a token
//! - `GET /api/token`, `DELETE /api/token` - status / clear
//! - `GET|POST|DELETE /api/auto-refresh` - scheduler status / enable / disable
//! - `POST /api/export`, `POST /api/import` - encrypted config backup

use crate::service::{AutoRefreshStatus, TokenService, TokenStatus};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokensmith::credentials::{
    ConfigDraft, CredentialBundle, EncryptedBlob, RequestEncoding, TokenConfig,
};
use tokensmith::token::{AccessToken, Remaining};
use tokensmith::TokenError;
use tracing::{info, warn};

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: TokenService,
}

/// A config as shown to the UI. Never carries credentials.
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    pub encoding: RequestEncoding,
    pub use_jwt_expiry: bool,
    pub encrypted: bool,
    pub selected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigSummary {
    fn new(config: &TokenConfig, selected: Option<&str>) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            endpoint: config.endpoint.clone(),
            encoding: config.encoding,
            use_jwt_expiry: config.use_jwt_expiry,
            encrypted: config.is_encrypted(),
            selected: selected == Some(config.id.as_str()),
            created_at: config.created_at,
            updated_at: config.updated_at,
        }
    }
}

/// Request body for creating or editing a config.
///
/// With `password` the credentials are stored encrypted. Editing an
/// encrypted config without a password requires `store_plaintext: true`.
#[derive(Deserialize)]
pub struct SaveConfigRequest {
    pub name: String,
    pub endpoint: String,
    pub credentials: CredentialBundle,
    #[serde(default)]
    pub encoding: RequestEncoding,
    #[serde(default)]
    pub use_jwt_expiry: bool,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub store_plaintext: bool,
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

#[derive(Deserialize, Default)]
pub struct GenerateRequest {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct EnableAutoRefreshRequest {
    #[serde(default)]
    pub max_refreshes: Option<u32>,
}

#[derive(Deserialize)]
pub struct ImportRequest {
    pub blob: EncryptedBlob,
    pub password: String,
}

/// Response for generate/refresh; the only place a token value leaves the service.
#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub config_id: String,
    pub expires_at: DateTime<Utc>,
    pub remaining: Remaining,
}

impl From<AccessToken> for TokenResponse {
    fn from(token: AccessToken) -> Self {
        let remaining = token.remaining_at(Utc::now());
        Self {
            token: token.value,
            config_id: token.config_id,
            expires_at: token.expires_at,
            remaining,
        }
    }
}

#[derive(Serialize)]
pub struct ImportResponse {
    pub imported: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
}

// ---------------------------------------------------------------------------
// Business logic (called from HTTP handlers and unit tests)
// ---------------------------------------------------------------------------

/// Lists every config with its selection flag.
pub fn handle_list_configs(state: &ApiState) -> Vec<ConfigSummary> {
    let selected = state.service.selected_config().map(|c| c.id);
    state
        .service
        .list_configs()
        .iter()
        .map(|c| ConfigSummary::new(c, selected.as_deref()))
        .collect()
}

/// Creates (`id == None`) or replaces a config, choosing the storage mode explicitly.
pub async fn handle_save_config(
    state: &ApiState,
    id: Option<String>,
    req: SaveConfigRequest,
) -> Result<ConfigSummary, TokenError> {
    if let Some(id) = &id {
        let existing = state
            .service
            .get_config(id)
            .ok_or_else(|| TokenError::NotFound(id.clone()))?;
        if existing.is_encrypted() && req.password.is_none() && !req.store_plaintext {
            return Err(TokenError::Validation(
                "password required to keep credentials encrypted; set store_plaintext to convert"
                    .to_string(),
            ));
        }
    }

    let draft = ConfigDraft {
        id,
        name: req.name,
        endpoint: req.endpoint,
        credentials: req.credentials,
        encoding: req.encoding,
        use_jwt_expiry: req.use_jwt_expiry,
    };

    let saved = match req.password {
        Some(password) => state.service.save_with_password(draft, password).await?,
        None => state.service.save_without_password(draft)?,
    };
    info!(config_id = %saved.id, encrypted = saved.is_encrypted(), "Config saved via API");

    let selected = state.service.selected_config().map(|c| c.id);
    Ok(ConfigSummary::new(&saved, selected.as_deref()))
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn list_configs(State(state): State<Arc<ApiState>>) -> Json<Vec<ConfigSummary>> {
    Json(handle_list_configs(&state))
}

async fn create_config(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SaveConfigRequest>,
) -> Result<(StatusCode, Json<ConfigSummary>), AppError> {
    let summary = handle_save_config(&state, None, req).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn update_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<SaveConfigRequest>,
) -> Result<Json<ConfigSummary>, AppError> {
    Ok(Json(handle_save_config(&state, Some(id), req).await?))
}

async fn delete_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if !state.service.remove_config(&id)? {
        return Err(TokenError::NotFound(id).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn select_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.service.select_config(Some(&id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unlock(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<PasswordRequest>,
) -> Result<StatusCode, AppError> {
    state.service.unlock(req.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn lock(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.service.lock();
    StatusCode::NO_CONTENT
}

async fn generate_token(
    State(state): State<Arc<ApiState>>,
    req: Option<Json<GenerateRequest>>,
) -> Result<Json<TokenResponse>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let token = state.service.generate(req.password).await?;
    Ok(Json(token.into()))
}

async fn refresh_token(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.service.refresh().await?;
    Ok(Json(token.into()))
}

async fn token_status(State(state): State<Arc<ApiState>>) -> Json<TokenStatus> {
    Json(state.service.token_status())
}

async fn clear_token(State(state): State<Arc<ApiState>>) -> Result<StatusCode, AppError> {
    state.service.clear_token()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn auto_refresh_status(State(state): State<Arc<ApiState>>) -> Json<AutoRefreshStatus> {
    Json(state.service.auto_refresh_status())
}

async fn enable_auto_refresh(
    State(state): State<Arc<ApiState>>,
    req: Option<Json<EnableAutoRefreshRequest>>,
) -> Result<Json<AutoRefreshStatus>, AppError> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.service.enable_auto_refresh(req.max_refreshes)?))
}

async fn disable_auto_refresh(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<AutoRefreshStatus>, AppError> {
    Ok(Json(state.service.disable_auto_refresh()?))
}

async fn export_configs(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<PasswordRequest>,
) -> Result<Json<EncryptedBlob>, AppError> {
    Ok(Json(state.service.export_configs(req.password).await?))
}

async fn import_configs(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, AppError> {
    let imported = state.service.import_configs(req.blob, req.password).await?;
    Ok(Json(ImportResponse { imported }))
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

pub enum AppError {
    Token(TokenError),
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        AppError::Token(e)
    }
}

fn status_for(e: &TokenError) -> StatusCode {
    match e {
        TokenError::Validation(_) | TokenError::InvalidExport(_) => StatusCode::BAD_REQUEST,
        TokenError::Decryption => StatusCode::UNAUTHORIZED,
        TokenError::NotFound(_) => StatusCode::NOT_FOUND,
        TokenError::Locked
        | TokenError::InFlight(_)
        | TokenError::Superseded(_)
        | TokenError::SchedulerExhausted { .. } => StatusCode::CONFLICT,
        TokenError::Network(_) | TokenError::Http { .. } | TokenError::MissingToken => {
            StatusCode::BAD_GATEWAY
        }
        TokenError::Storage(_) | TokenError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let AppError::Token(e) = self;
        let status = status_for(&e);
        if status.is_server_error() {
            warn!(error = %e, "API request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: e.to_string(),
                upstream_status: e.status(),
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/configs", get(list_configs).post(create_config))
        .route("/api/configs/:id", put(update_config).delete(delete_config))
        .route("/api/configs/:id/select", post(select_config))
        .route("/api/unlock", post(unlock))
        .route("/api/lock", post(lock))
        .route("/api/token/generate", post(generate_token))
        .route("/api/token/refresh", post(refresh_token))
        .route("/api/token", get(token_status).delete(clear_token))
        .route(
            "/api/auto-refresh",
            get(auto_refresh_status)
                .post(enable_auto_refresh)
                .delete(disable_auto_refresh),
        )
        .route("/api/export", post(export_configs))
        .route("/api/import", post(import_configs))
        .with_state(Arc::new(state))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceSettings;
    use async_trait::async_trait;
    use tokensmith::credentials::SqliteRepository;
    use tokensmith::token::TokenGenerator;

    struct NeverCalled;

    #[async_trait]
    impl TokenGenerator for NeverCalled {
        async fn generate(
            &self,
            _config: &TokenConfig,
            _bundle: &CredentialBundle,
        ) -> tokensmith::Result<AccessToken> {
            Err(TokenError::Network("not expected".to_string()))
        }
    }

    fn make_state() -> ApiState {
        let repo = Arc::new(SqliteRepository::new(":memory:").unwrap());
        let service =
            TokenService::new(repo, Arc::new(NeverCalled), ServiceSettings::default()).unwrap();
        ApiState { service }
    }

    fn make_request(name: &str, password: Option<&str>) -> SaveConfigRequest {
        SaveConfigRequest {
            name: name.to_string(),
            endpoint: "https://auth.example.com/token".to_string(),
            credentials: CredentialBundle {
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                username: "alice".to_string(),
                password: "pw".to_string(),
            },
            encoding: RequestEncoding::Json,
            use_jwt_expiry: false,
            password: password.map(str::to_string),
            store_plaintext: false,
        }
    }

    #[tokio::test]
    async fn test_save_and_list_hides_credentials() {
        let state = make_state();
        let created = handle_save_config(&state, None, make_request("Dev", None))
            .await
            .unwrap();
        assert!(!created.encrypted);

        let listed = handle_list_configs(&state);
        assert_eq!(listed.len(), 1);
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("\"pw\""));
    }

    #[tokio::test]
    async fn test_editing_encrypted_config_requires_explicit_mode() {
        let state = make_state();
        let created = handle_save_config(&state, None, make_request("Prod", Some("master")))
            .await
            .unwrap();
        assert!(created.encrypted);

        let err = handle_save_config(&state, Some(created.id.clone()), make_request("Prod", None))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TokenError::Validation(_)));

        let mut convert = make_request("Prod", None);
        convert.store_plaintext = true;
        let converted = handle_save_config(&state, Some(created.id), convert)
            .await
            .unwrap();
        assert!(!converted.encrypted);
    }

    #[tokio::test]
    async fn test_edit_unknown_config() {
        let state = make_state();
        let err = handle_save_config(&state, Some("nope".to_string()), make_request("X", None))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TokenError::NotFound(_)));
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(&TokenError::Decryption), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&TokenError::Http {
                status: 401,
                message: String::new()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for(&TokenError::Locked), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&TokenError::InFlight("a".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&TokenError::Validation("x".to_string())),
            StatusCode::BAD_REQUEST
        );
    }
}
