use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use token_manager::api::{create_router, ApiState};
use token_manager::{spawn_threshold_listener, ServiceSettings, TokenService};
use tokensmith::config::{load_config, AppConfig};
use tokensmith::credentials::SqliteRepository;
use tokensmith::token::{HttpTokenGenerator, ThresholdEvent};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "token_manager=info,tokensmith=info".into()),
        )
        .init();

    info!("Token Manager starting...");

    // Load configuration: file if given, then environment overrides
    let config = match std::env::var("TOKENSMITH_CONFIG") {
        Ok(path) => load_config(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        Err(_) => AppConfig::default(),
    }
    .apply_env();

    info!(
        database_path = %config.storage.database_path,
        bind_address = %config.api.bind_address,
        check_interval_seconds = config.refresh.check_interval_seconds,
        threshold_seconds = config.refresh.threshold_seconds,
        "Configuration loaded"
    );

    let repo = Arc::new(
        SqliteRepository::new(&config.storage.database_path)
            .context("Failed to open token database")?,
    );
    let generator = Arc::new(
        HttpTokenGenerator::new(
            Duration::from_secs(config.token.request_timeout_seconds),
            config.token.default_lifetime_seconds,
        )
        .context("Failed to build HTTP client")?,
    );

    let service = TokenService::new(repo, generator, ServiceSettings::from(&config))
        .context("Failed to initialize token service")?;

    // Notification policy: log threshold crossings
    let notifier = spawn_threshold_listener(service.subscribe(), |event| match event {
        ThresholdEvent::Crossed { seconds } => {
            warn!(seconds_left = seconds, "Access token expires soon")
        }
        ThresholdEvent::Expired => warn!("Access token expired"),
    });

    // Start HTTP API server
    let router = create_router(ApiState {
        service: service.clone(),
    })
    .layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(&config.api.bind_address)
        .await
        .context("Failed to bind token manager API address")?;
    info!(bind_address = %config.api.bind_address, "Token manager API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Token manager API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Graceful shutdown
    server_handle.abort();
    notifier.abort();
    service.shutdown();
    info!("Token manager stopped");

    Ok(())
}
