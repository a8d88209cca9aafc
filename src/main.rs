use anyhow::{Context, Result};
use navioverlay::api::{create_router, AppState, OverlayTemplate};
use navioverlay::config::load_or_default;
use navioverlay::credentials::CredentialCipher;
use navioverlay::tokens::{run_sweep_loop, TokenService, TokenStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "navioverlay=info".into()),
        )
        .init();

    info!("NaviOverlay starting...");

    let config_path = std::env::var("NAVIOVERLAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/navioverlay.toml"));

    let config = load_or_default(&config_path)?;
    config.validate().context("Invalid configuration")?;

    info!(
        config = %config_path.display(),
        port = config.server.port,
        store = %config.tokens.store_path.display(),
        sweep_interval_minutes = config.tokens.sweep_interval_minutes,
        "Configuration loaded"
    );

    // Derive the vault key once; validate() guarantees a passphrase
    let passphrase = config.vault.passphrase.as_deref().unwrap_or_default();
    let cipher = CredentialCipher::from_passphrase(passphrase, &config.vault.salt)
        .context("Failed to derive credential vault key")?;
    info!("Credential vault key derived");

    let ttl = config.tokens.ttl();
    let token_service = Arc::new(TokenService::open(
        TokenStore::new(&config.tokens.store_path),
        cipher,
        ttl,
    ));
    info!(expires = %ttl, "Token expiry policy");

    // First tick sweeps immediately
    tokio::spawn(run_sweep_loop(
        Arc::clone(&token_service),
        config.tokens.sweep_interval_minutes,
    ));

    let overlay_template = match &config.overlay.template_path {
        Some(path) => OverlayTemplate::load(path)?,
        None => OverlayTemplate::builtin(),
    };

    if let Some(dir) = &config.server.static_dir {
        info!(directory = %dir.display(), "Serving static overlay assets");
    }
    let app = create_router(
        AppState {
            token_service,
            overlay_template: Arc::new(overlay_template),
        },
        config.server.static_dir.as_deref(),
    );

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(address = %addr, "NaviOverlay server listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
