//! Shield Guard demo server.
//!
//! Serves a small API behind the firewall pipeline configured in
//! `config/default.yaml`.

use std::sync::Arc;

use tokio::net::TcpListener;

use shield_guard::api::{build_router, ApiState};
use shield_guard::auth::JwtTokenHandler;
use shield_guard::config::SecurityConfig;
use shield_guard::logging;
use shield_guard::middleware::SecurityState;
use shield_guard::{Security, ServiceRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file loaded ({e})");
    }

    logging::init();

    tracing::info!("Starting Shield Guard v{}", env!("CARGO_PKG_VERSION"));

    let config = SecurityConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        firewalls = config.firewalls.len(),
        users = config.users.len(),
        "Configuration loaded"
    );

    let registry = ServiceRegistry::new();
    let security = Arc::new(Security::from_config(&config, &registry).map_err(|e| {
        tracing::error!(error = %e, "Invalid security configuration");
        anyhow::anyhow!("Security configuration error: {}", e)
    })?);

    let jwt = config.jwt.as_ref().map(|jwt| {
        Arc::new(
            JwtTokenHandler::new(&jwt.secret, jwt.issuer.clone())
                .with_identifier_claim(jwt.identifier_claim.clone()),
        )
    });
    if jwt.is_none() {
        tracing::warn!("No jwt section configured, token issuing is disabled");
    }

    let state = SecurityState::from_config(security.clone(), &config).map_err(|e| {
        tracing::error!(error = %e, "Invalid middleware configuration");
        anyhow::anyhow!("Security configuration error: {}", e)
    })?;

    let app = build_router(
        ApiState {
            security,
            jwt,
        },
        state,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
